//! Saver Core - Foundation for the sharded checkpoint saver
//!
//! Provides the core value types, checkpoint options, and error handling
//! shared by the tensor I/O boundary and the saver machinery.

pub mod config;
pub mod error;
pub mod types;

pub use config::CheckpointOptions;
pub use error::{Error, Result};
pub use types::*;
