//! Multi-device checkpoint saver
//!
//! Partitions named tensors across devices, writes one shard per device,
//! merges the shards into a unified checkpoint, and on restore invokes each
//! owner's restore callback exactly once, after its last constituent tensor
//! has been read back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use saver_core::{
    CheckpointKey, CheckpointOptions, Device, Error, OperationHandle, Result, SaverDef, SliceSpec,
    DEFAULT_IO_DEVICE,
};
use tensor_io::{sharded_filename, temp_checkpoint_prefix, TensorIo};
use tracing::{debug, info};

use crate::single::SingleDeviceSaver;
use crate::slot::{TensorOrSlices, TensorSlot};

/// Deferred per-object restore callback
///
/// Receives the object's fully assembled `local name -> value-or-slices`
/// map and may return named operation handles to merge into the overall
/// restore result.
pub type RestoreFn = Arc<
    dyn Fn(BTreeMap<CheckpointKey, TensorOrSlices>) -> Option<BTreeMap<String, OperationHandle>>
        + Send
        + Sync,
>;

/// Construction input for [`MultiDeviceSaver`]
///
/// Ordered groups of `(restore callback, checkpoint key -> tensors)`, one
/// group per owning object. A group without a callback is the anonymous
/// sentinel: its tensors are saved and restored but nothing is notified.
#[derive(Default)]
pub struct SerializedTensors {
    groups: Vec<(Option<RestoreFn>, BTreeMap<CheckpointKey, TensorOrSlices>)>,
}

impl SerializedTensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one owning object's tensors and its restore callback
    pub fn add(&mut self, restore_fn: RestoreFn, tensors: BTreeMap<CheckpointKey, TensorOrSlices>) {
        self.groups.push((Some(restore_fn), tensors));
    }

    /// Add one owning object's tensors with a closure as its callback
    pub fn add_with<F>(&mut self, restore_fn: F, tensors: BTreeMap<CheckpointKey, TensorOrSlices>)
    where
        F: Fn(BTreeMap<CheckpointKey, TensorOrSlices>) -> Option<BTreeMap<String, OperationHandle>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Arc::new(restore_fn), tensors);
    }

    /// Add tensors owned by no object; no callback fires for them
    pub fn add_anonymous(&mut self, tensors: BTreeMap<CheckpointKey, TensorOrSlices>) {
        self.groups.push((None, tensors));
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Local name of a checkpoint key: the suffix after the last `/.ATTRIBUTES/`
/// separator, or the whole key when no separator is present
///
/// Restore callbacks only know their own object-relative namespace, so
/// assembled inputs are re-keyed with this before dispatch.
pub fn extract_local_name(checkpoint_key: &str) -> String {
    const ATTRIBUTE_SEPARATOR: &str = "/.ATTRIBUTES/";
    match checkpoint_key.rfind(ATTRIBUTE_SEPARATOR) {
        Some(idx) => checkpoint_key[idx + ATTRIBUTE_SEPARATOR.len()..].to_string(),
        None => checkpoint_key.to_string(),
    }
}

/// Saves checkpoints directly from multiple devices
///
/// A low-level utility which stores tensors under caller-specified
/// checkpoint keys; higher-level object-graph checkpointing is built on top
/// of it. One instance serves one save or restore operation.
pub struct MultiDeviceSaver {
    /// Per-device savers, keyed by device name; `BTreeMap` order fixes the
    /// shard numbering
    single_device_savers: BTreeMap<Device, SingleDeviceSaver>,

    /// Owning callback (by index) for every registered slot
    keys_to_restore_fn: HashMap<(CheckpointKey, SliceSpec), usize>,

    /// Callbacks by index; `None` is the anonymous no-op sentinel
    restore_fns: Vec<Option<RestoreFn>>,

    /// Every slot a callback owns; the length is its restore countdown
    restore_fn_keys: Vec<Vec<(CheckpointKey, SliceSpec)>>,
}

impl MultiDeviceSaver {
    /// Build a saver from each owning object's serialized tensors
    ///
    /// # Errors
    /// Returns [`Error::DuplicateSlot`] when two objects register the same
    /// `(checkpoint key, slice spec)` pair; the second write would silently
    /// overwrite the first in the checkpoint, so this is reported, never
    /// resolved.
    pub fn new(serialized_tensors: SerializedTensors) -> Result<Self> {
        Self::with_registered_savers(serialized_tensors, BTreeMap::new())
    }

    /// Build a saver with a registered-saver table
    ///
    /// Registered savers are not implemented; a non-empty table fails with
    /// [`Error::NotSupported`] before any other work.
    pub fn with_registered_savers(
        serialized_tensors: SerializedTensors,
        registered_savers: BTreeMap<String, Vec<CheckpointKey>>,
    ) -> Result<Self> {
        if !registered_savers.is_empty() {
            return Err(Error::not_supported("registered savers"));
        }

        let mut keys_to_restore_fn = HashMap::new();
        let mut restore_fns = Vec::new();
        let mut restore_fn_keys: Vec<Vec<(CheckpointKey, SliceSpec)>> = Vec::new();
        let mut tensors_by_device: BTreeMap<
            Device,
            BTreeMap<CheckpointKey, BTreeMap<SliceSpec, TensorSlot>>,
        > = BTreeMap::new();

        for (restore_fn, tensor_dict) in serialized_tensors.groups {
            let fn_id = restore_fns.len();
            restore_fns.push(restore_fn);
            restore_fn_keys.push(Vec::new());

            for (checkpoint_key, value) in tensor_dict {
                let spec_to_tensor: BTreeMap<SliceSpec, _> = match value {
                    TensorOrSlices::Tensor(tensor) => {
                        let mut whole = BTreeMap::new();
                        whole.insert(String::new(), tensor);
                        whole
                    }
                    TensorOrSlices::Slices(slices) => slices,
                };

                for (slice_spec, tensor) in spec_to_tensor {
                    let slot = (checkpoint_key.clone(), slice_spec.clone());
                    if keys_to_restore_fn.contains_key(&slot) {
                        return Err(Error::DuplicateSlot {
                            checkpoint_key,
                            slice_spec,
                        });
                    }
                    keys_to_restore_fn.insert(slot.clone(), fn_id);
                    restore_fn_keys[fn_id].push(slot);

                    tensors_by_device
                        .entry(tensor.device.clone())
                        .or_default()
                        .entry(checkpoint_key.clone())
                        .or_default()
                        .insert(slice_spec, TensorSlot::from(tensor));
                }
            }
        }

        let single_device_savers = tensors_by_device
            .into_iter()
            .map(|(device, slots)| (device, SingleDeviceSaver::new(slots)))
            .collect();

        Ok(Self {
            single_device_savers,
            keys_to_restore_fn,
            restore_fns,
            restore_fn_keys,
        })
    }

    /// Number of distinct devices, which equals the shard count on save
    pub fn num_devices(&self) -> usize {
        self.single_device_savers.len()
    }

    /// Devices in lexicographic (shard-numbering) order
    pub fn devices(&self) -> impl Iterator<Item = &str> + '_ {
        self.single_device_savers.keys().map(|d| d.as_str())
    }

    /// Save all tensors as a sharded checkpoint under `file_prefix`
    ///
    /// Writes one shard per device, in lexicographic device order, under a
    /// destination-dependent temp prefix, then merges the shards into the
    /// final checkpoint and deletes the temp directories. Every shard write
    /// completes before the merge starts; the first shard failure aborts the
    /// whole operation with no merge attempted.
    pub async fn save(
        &self,
        io: &dyn TensorIo,
        file_prefix: &str,
        options: &CheckpointOptions,
    ) -> Result<OperationHandle> {
        let tmp_checkpoint_prefix = temp_checkpoint_prefix(file_prefix);
        let num_shards = self.single_device_savers.len();

        let mut saved_prefixes = Vec::with_capacity(num_shards);
        let mut last_device: Option<&str> = None;
        for (shard, (device, saver)) in self.single_device_savers.iter().enumerate() {
            let shard_prefix = sharded_filename(&tmp_checkpoint_prefix, shard, num_shards);
            debug!(device = device.as_str(), shard, num_shards, "Writing shard");
            saver.save(io, device, &shard_prefix).await?;
            saved_prefixes.push(shard_prefix);
            last_device = Some(device);
        }

        // Every shard save above has returned; the merge never observes a
        // partially written shard set.
        let merge_device = options
            .experimental_io_device
            .as_deref()
            .or(last_device)
            .unwrap_or(DEFAULT_IO_DEVICE);
        let handle = io
            .merge_shards(merge_device, saved_prefixes, file_prefix, true)
            .await?;

        info!(file_prefix, num_shards, "Checkpoint saved");
        Ok(handle)
    }

    /// Restore all tensors from the checkpoint at `file_prefix` and dispatch
    /// restore callbacks
    ///
    /// Each device's saver restores in lexicographic device order. Every
    /// restored `(checkpoint key, slice spec, tensor)` triple is accumulated
    /// into its owning callback's pending inputs; when the last one arrives
    /// the callback is invoked exactly once with its keys rewritten to local
    /// names. Operation maps returned by callbacks are merged into the
    /// result (last write wins).
    pub async fn restore(
        &self,
        io: &dyn TensorIo,
        file_prefix: &str,
        options: &CheckpointOptions,
    ) -> Result<BTreeMap<String, OperationHandle>> {
        let mut restore_fn_inputs: Vec<BTreeMap<CheckpointKey, TensorOrSlices>> =
            (0..self.restore_fns.len()).map(|_| BTreeMap::new()).collect();
        let mut restore_fn_input_count: Vec<usize> =
            self.restore_fn_keys.iter().map(|keys| keys.len()).collect();
        let mut restore_ops = BTreeMap::new();

        for (device, saver) in &self.single_device_savers {
            debug!(device = device.as_str(), file_prefix, "Restoring shard tensors");
            let restored_tensor_dict = saver.restore(io, file_prefix, options).await?;

            for (checkpoint_key, slice_and_tensor) in restored_tensor_dict {
                for (slice_spec, tensor) in slice_and_tensor {
                    let fn_id = *self
                        .keys_to_restore_fn
                        .get(&(checkpoint_key.clone(), slice_spec.clone()))
                        .ok_or_else(|| Error::Internal {
                            message: format!(
                                "restored tensor has unregistered slot: \
                                 key={checkpoint_key:?}, slice_spec={slice_spec:?}"
                            ),
                        })?;

                    let inputs = &mut restore_fn_inputs[fn_id];
                    if slice_spec.is_empty() {
                        let previous =
                            inputs.insert(checkpoint_key.clone(), TensorOrSlices::Tensor(tensor));
                        if previous.is_some() {
                            return Err(Error::MixedSliceShapes { checkpoint_key });
                        }
                    } else {
                        let entry = inputs
                            .entry(checkpoint_key.clone())
                            .or_insert_with(|| TensorOrSlices::Slices(BTreeMap::new()));
                        match entry {
                            TensorOrSlices::Slices(slices) => {
                                slices.insert(slice_spec, tensor);
                            }
                            TensorOrSlices::Tensor(_) => {
                                return Err(Error::MixedSliceShapes { checkpoint_key });
                            }
                        }
                    }

                    restore_fn_input_count[fn_id] -= 1;
                    if restore_fn_input_count[fn_id] == 0 {
                        let assembled = std::mem::take(&mut restore_fn_inputs[fn_id]);
                        let restored_tensors: BTreeMap<CheckpointKey, TensorOrSlices> = assembled
                            .into_iter()
                            .map(|(key, value)| (extract_local_name(&key), value))
                            .collect();

                        if let Some(restore_fn) = &self.restore_fns[fn_id] {
                            if let Some(ops) = restore_fn(restored_tensors) {
                                restore_ops.extend(ops);
                            }
                        }
                    }
                }
            }
        }

        info!(file_prefix, num_ops = restore_ops.len(), "Checkpoint restored");
        Ok(restore_ops)
    }

    /// Serialize to a [`SaverDef`] referencing a traced save/restore pair
    ///
    /// Graph tracing of the save and restore functions is not implemented.
    pub fn to_proto(&self) -> Result<SaverDef> {
        Err(Error::not_supported("graph-traced SaverDef export"))
    }
}
