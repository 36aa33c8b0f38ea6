//! Sharded multi-device checkpoint save/restore
//!
//! Low-level savers that store tensors under the checkpoint keys supplied by
//! their owners. Higher-level object-graph checkpointing is built on top:
//!
//! - [`TensorSlot`] / [`TensorOrSlices`] - two-variant unions for slot values
//! - [`SingleDeviceSaver`] - save/restore I/O for one device's tensors
//! - [`MultiDeviceSaver`] - device partitioning, shard merging, and deferred
//!   restore-callback dispatch

pub mod multi;
pub mod single;
pub mod slot;

pub use multi::{MultiDeviceSaver, RestoreFn, SerializedTensors};
pub use single::SingleDeviceSaver;
pub use slot::{TensorOrSlices, TensorSlot};
