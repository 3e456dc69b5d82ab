//! Job descriptors and content-addressed job identifiers.
//!
//! A [`JobId`] has the form `name:version:hash`, where `hash` is the hex
//! SHA-256 of the job's canonical JSON content (every field except the id).
//! Two jobs with the same name and version but different content therefore
//! never share an id.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

static COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid regex"));

static HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),
    #[error("invalid job name: {0}")]
    InvalidName(String),
    #[error("invalid job version: {0}")]
    InvalidVersion(String),
    #[error("invalid host name: {0}")]
    InvalidHost(String),
}

/// Identifier of a job: `name:version:hash`.
///
/// The short form `name:version` parses too (for lookups typed by humans),
/// but never compares equal to a full id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId {
    name: String,
    version: String,
    hash: Option<String>,
}

impl JobId {
    /// Build a full id, validating each component.
    pub fn new(name: &str, version: &str, hash: &str) -> Result<Self, IdParseError> {
        validate_name(name)?;
        validate_version(version)?;
        if !HASH.is_match(hash) {
            return Err(IdParseError::InvalidJobId(format!("{name}:{version}:{hash}")));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            hash: Some(hash.to_string()),
        })
    }

    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [name, version] => {
                validate_name(name)?;
                validate_version(version)?;
                Ok(Self {
                    name: name.to_string(),
                    version: version.to_string(),
                    hash: None,
                })
            }
            [name, version, hash] => Self::new(name, version, hash),
            _ => Err(IdParseError::InvalidJobId(s.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Whether this id carries the content hash.
    pub fn is_fully_qualified(&self) -> bool {
        self.hash.is_some()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "{}:{}:{}", self.name, self.version, hash),
            None => write!(f, "{}:{}", self.name, self.version),
        }
    }
}

impl FromStr for JobId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// Resource requirements for a job's workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory limit in bytes (0 = unlimited).
    #[serde(default)]
    pub memory_bytes: u64,
    /// Relative CPU shares (0 = runtime default).
    #[serde(default)]
    pub cpu_shares: u32,
}

/// Immutable job descriptor. Identity is [`Job::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub version: String,
    /// Container image reference.
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Resources,
}

/// Hashed view of a job: everything except the id.
#[derive(Serialize)]
struct JobContent<'a> {
    name: &'a str,
    version: &'a str,
    image: &'a str,
    command: &'a [String],
    env: &'a BTreeMap<String, String>,
    resources: &'a Resources,
}

impl Job {
    pub fn builder(name: &str, version: &str, image: &str) -> JobBuilder {
        JobBuilder {
            name: name.to_string(),
            version: version.to_string(),
            image: image.to_string(),
            command: Vec::new(),
            env: BTreeMap::new(),
            resources: Resources::default(),
        }
    }

    /// Hex SHA-256 of the job's canonical content.
    pub fn content_hash(&self) -> String {
        content_hash(&JobContent {
            name: &self.name,
            version: &self.version,
            image: &self.image,
            command: &self.command,
            env: &self.env,
            resources: &self.resources,
        })
    }

    /// Whether the id is the one derived from this job's content.
    pub fn has_valid_id(&self) -> bool {
        self.id.name == self.name
            && self.id.version == self.version
            && self.id.hash.as_deref() == Some(self.content_hash().as_str())
    }
}

fn content_hash(content: &JobContent<'_>) -> String {
    // Struct fields and BTreeMap keys serialize in a fixed order.
    let bytes = serde_json::to_vec(content).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Builder computing the content-addressed id on [`JobBuilder::build`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    name: String,
    version: String,
    image: String,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    resources: Resources,
}

impl JobBuilder {
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn build(self) -> Result<Job, IdParseError> {
        let hash = content_hash(&JobContent {
            name: &self.name,
            version: &self.version,
            image: &self.image,
            command: &self.command,
            env: &self.env,
            resources: &self.resources,
        });
        let id = JobId::new(&self.name, &self.version, &hash)?;
        Ok(Job {
            id,
            name: self.name,
            version: self.version,
            image: self.image,
            command: self.command,
            env: self.env,
            resources: self.resources,
        })
    }
}

fn validate_name(name: &str) -> Result<(), IdParseError> {
    if COMPONENT.is_match(name) {
        Ok(())
    } else {
        Err(IdParseError::InvalidName(name.to_string()))
    }
}

fn validate_version(version: &str) -> Result<(), IdParseError> {
    if COMPONENT.is_match(version) {
        Ok(())
    } else {
        Err(IdParseError::InvalidVersion(version.to_string()))
    }
}

/// Validate a host name for use as a single store path segment.
pub fn validate_host(host: &str) -> Result<(), IdParseError> {
    if COMPONENT.is_match(host) {
        Ok(())
    } else {
        Err(IdParseError::InvalidHost(host.to_string()))
    }
}
