//! Checkpoint operation options

use serde::{Deserialize, Serialize};

/// Options controlling a single save or restore operation
///
/// One instance accompanies one checkpoint operation; it is not retained
/// across calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointOptions {
    /// Pins the device used for the shard merge on save and for reads on
    /// restore. When unset, restore and the empty-saver merge run on
    /// [`crate::DEFAULT_IO_DEVICE`] and a non-empty merge runs on the device
    /// of the last shard processed.
    pub experimental_io_device: Option<String>,
}

impl CheckpointOptions {
    /// Options pinning all host-side I/O to the given device
    pub fn with_io_device(device: impl Into<String>) -> Self {
        Self {
            experimental_io_device: Some(device.into()),
        }
    }
}
