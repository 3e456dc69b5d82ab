//! armadad — assembles store, master API and agents into one process.
//!
//! The binary in `main.rs` only parses flags; everything it runs lives here
//! so the integration tests can drive the same code paths.

pub mod daemon;
pub mod logging;
