//! Tensor I/O trait definition
//!
//! Defines the async interface the saver uses to talk to the tensor runtime.
//! Every method takes the device to run on explicitly; there is no ambient
//! device or execution-mode state.

use async_trait::async_trait;
use saver_core::{DType, OperationHandle, Result, SliceSpec, TensorValue};
use serde::{Deserialize, Serialize};

/// One named, sliced tensor handed to [`TensorIo::bulk_save`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveEntry {
    /// Checkpoint key to store the value under
    pub name: String,

    /// Slice of the variable this value covers; empty for the whole value
    pub slice_spec: SliceSpec,

    /// The value to write
    pub tensor: TensorValue,
}

/// One named, sliced, typed read handed to [`TensorIo::bulk_restore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// Checkpoint key to read
    pub name: String,

    /// Slice of the variable to read; empty for the whole value
    pub slice_spec: SliceSpec,

    /// Expected element type
    pub dtype: DType,
}

/// Async trait for the bulk tensor I/O primitives
///
/// Implementors provide all-or-nothing batched writes and positionally
/// aligned batched reads against a checkpoint file prefix, plus the merge of
/// per-device shards into a final checkpoint.
#[async_trait]
pub trait TensorIo: Send + Sync {
    /// Write all entries under the given file prefix in one operation
    ///
    /// # Arguments
    /// * `device` - Device to pin the write to
    /// * `file_prefix` - Checkpoint file prefix (typically a shard prefix)
    /// * `entries` - Named, sliced tensors to write
    ///
    /// # Errors
    /// The write is all-or-nothing; any failure means nothing readable was
    /// produced under the prefix.
    async fn bulk_save(
        &self,
        device: &str,
        file_prefix: &str,
        entries: Vec<SaveEntry>,
    ) -> Result<OperationHandle>;

    /// Read all requested tensors from the given file prefix in one operation
    ///
    /// # Returns
    /// Tensors positionally aligned with `requests`.
    ///
    /// # Errors
    /// Returns error if any requested `(name, slice_spec)` pair is absent or
    /// disagrees with the stored dtype.
    async fn bulk_restore(
        &self,
        device: &str,
        file_prefix: &str,
        requests: Vec<RestoreRequest>,
    ) -> Result<Vec<TensorValue>>;

    /// Merge shard checkpoints into a unified checkpoint at `final_prefix`
    ///
    /// # Arguments
    /// * `device` - Device to pin the host-side metadata work to
    /// * `shard_prefixes` - Prefixes previously written by `bulk_save`
    /// * `final_prefix` - Destination of the merged checkpoint
    /// * `delete_old_dirs` - Remove the intermediate per-shard temp
    ///   files/directories after merging
    async fn merge_shards(
        &self,
        device: &str,
        shard_prefixes: Vec<String>,
        final_prefix: &str,
        delete_old_dirs: bool,
    ) -> Result<OperationHandle>;
}
