//! armada-master — the authoritative side of the Armada protocol.
//!
//! [`MasterModel`] owns jobs, deployment intent and host registrations. It
//! enforces referential integrity with store transactions rather than
//! in-process locks, so any number of master instances can serve the same
//! store. Read views are composed by [`status`].

pub mod error;
pub mod model;
pub mod status;

pub use error::{MasterError, MasterResult};
pub use model::MasterModel;
