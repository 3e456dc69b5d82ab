//! Node metadata, transaction ops and watch events.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Identifier of a store session. Ephemeral nodes are owned by one.
pub type SessionId = u64;

/// Per-node metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// 0 on create, incremented by every `set`.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_owner: Option<SessionId>,
    /// Epoch milliseconds.
    pub ctime: u64,
    pub mtime: u64,
}

/// One step of a multi-op transaction.
///
/// `version: None` means "any version".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Assert the node exists (at `version` if given).
    Check { path: String, version: Option<u64> },
    Create {
        path: String,
        data: Vec<u8>,
        ephemeral_owner: Option<SessionId>,
    },
    Set {
        path: String,
        data: Vec<u8>,
        version: Option<u64>,
    },
    Delete { path: String, version: Option<u64> },
}

impl Op {
    pub fn check(path: impl Into<String>) -> Self {
        Op::Check {
            path: path.into(),
            version: None,
        }
    }

    pub fn check_version(path: impl Into<String>, version: u64) -> Self {
        Op::Check {
            path: path.into(),
            version: Some(version),
        }
    }

    pub fn create(path: impl Into<String>, data: Vec<u8>) -> Self {
        Op::Create {
            path: path.into(),
            data,
            ephemeral_owner: None,
        }
    }

    pub fn create_json<T: Serialize>(path: impl Into<String>, value: &T) -> StoreResult<Self> {
        Ok(Self::create(path, to_bytes(value)?))
    }

    pub fn set_json<T: Serialize>(
        path: impl Into<String>,
        value: &T,
        version: Option<u64>,
    ) -> StoreResult<Self> {
        Ok(Op::Set {
            path: path.into(),
            data: to_bytes(value)?,
            version,
        })
    }

    pub fn delete(path: impl Into<String>, version: Option<u64>) -> Self {
        Op::Delete {
            path: path.into(),
            version,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Op::Check { path, .. }
            | Op::Create { path, .. }
            | Op::Set { path, .. }
            | Op::Delete { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Changed,
    Deleted,
}

/// A committed change to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub path: String,
    /// Node version after the change (last version for deletes).
    pub version: u64,
}

pub(crate) fn to_bytes<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialize(e.to_string()))
}

/// Paths are absolute, `/`-separated, without empty segments or a trailing slash.
pub(crate) fn validate_path(path: &str) -> StoreResult<()> {
    let valid = path.len() > 1
        && path.starts_with('/')
        && path[1..].split('/').all(|segment| !segment.is_empty());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Whether `path` is `prefix` itself or lies beneath it.
pub(crate) fn is_under(path: &str, prefix: &str) -> bool {
    prefix == "/"
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
