//! armada-store — embedded coordination store for Armada.
//!
//! Backed by [redb](https://docs.rs/redb), provides a hierarchical,
//! versioned key/value space with compare-and-set writes, all-or-nothing
//! multi-op transactions, session-scoped ephemeral nodes and prefix watches.
//!
//! # Architecture
//!
//! Node payloads and their [`Stat`] metadata live in two tables keyed by
//! absolute path, so a subtree is one contiguous range. The `CoordStore` is
//! `Clone` + `Send` + `Sync` (backed by an `Arc`) and can be shared across
//! async tasks; its methods are synchronous.

pub mod error;
pub mod session;
pub mod store;
pub mod tables;
pub mod types;
pub mod watch;

pub use error::{StoreError, StoreResult};
pub use session::Session;
pub use store::{CoordStore, EVENT_CAPACITY};
pub use types::{EventKind, Op, SessionId, Stat, WatchEvent};
pub use watch::{WatchError, Watcher};
