//! Prefix watches over committed changes.

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::{WatchEvent, is_under};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// Events were dropped; the consumer must resynchronise from a full read.
    #[error("watcher lagged, {0} events dropped")]
    Lagged(u64),
    #[error("store closed")]
    Closed,
}

/// Stream of changes under one path prefix.
pub struct Watcher {
    prefix: String,
    rx: broadcast::Receiver<WatchEvent>,
}

impl Watcher {
    pub(crate) fn new(prefix: String, rx: broadcast::Receiver<WatchEvent>) -> Self {
        Self { prefix, rx }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wait for the next change under the prefix.
    pub async fn recv(&mut self) -> Result<WatchEvent, WatchError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if is_under(&event.path, &self.prefix) => return Ok(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => return Err(WatchError::Lagged(n)),
                Err(RecvError::Closed) => return Err(WatchError::Closed),
            }
        }
    }
}
