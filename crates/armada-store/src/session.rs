//! Session handles owning ephemeral nodes.

use std::sync::Weak;

use serde::Serialize;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::store::{CoordStore, Inner, unwrap_single};
use crate::types::{Op, SessionId, Stat, to_bytes};

/// A live session. Ephemeral nodes created through it disappear when it is
/// closed, dropped, or expired by the store.
///
/// A session does not keep the store open; once every [`CoordStore`] handle
/// is gone the session is dead, and its nodes are purged on the next open.
pub struct Session {
    store: Weak<Inner>,
    id: SessionId,
    closed: bool,
}

impl Session {
    pub(crate) fn new(store: &CoordStore, id: SessionId) -> Self {
        Self {
            store: store.downgrade(),
            id,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn store(&self) -> StoreResult<CoordStore> {
        CoordStore::upgrade(&self.store).ok_or(StoreError::SessionClosed(self.id))
    }

    /// Whether the store still considers this session live.
    pub fn is_live(&self) -> bool {
        !self.closed
            && CoordStore::upgrade(&self.store).is_some_and(|store| store.is_session_live(self.id))
    }

    /// Create op for a node owned by this session, for use in a transaction.
    pub fn ephemeral_op(&self, path: impl Into<String>, data: Vec<u8>) -> Op {
        Op::Create {
            path: path.into(),
            data,
            ephemeral_owner: Some(self.id),
        }
    }

    pub fn create_ephemeral_json<T: Serialize>(&self, path: &str, value: &T) -> StoreResult<Stat> {
        let op = self.ephemeral_op(path, to_bytes(value)?);
        let mut stats = self.store()?.transaction(vec![op]).map_err(unwrap_single)?;
        stats
            .pop()
            .flatten()
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    /// Close the session, removing its ephemeral nodes.
    pub fn close(mut self) -> StoreResult<()> {
        self.closed = true;
        self.store()?.expire_session(self.id)?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(store) = CoordStore::upgrade(&self.store) else {
            return;
        };
        if let Err(e) = store.expire_session(self.id) {
            warn!(session = self.id, error = %e, "failed to expire session on drop");
        }
    }
}
