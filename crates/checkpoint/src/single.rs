//! Per-device checkpoint save/restore
//!
//! A `SingleDeviceSaver` owns the `checkpoint key -> slice spec -> slot`
//! mapping for one device and issues exactly one bulk I/O call per save or
//! restore. It is created per operation and holds no state across calls.

use std::collections::BTreeMap;

use saver_core::{
    CheckpointKey, CheckpointOptions, OperationHandle, Result, SliceSpec, TensorValue,
    DEFAULT_IO_DEVICE,
};
use tensor_io::{RestoreRequest, SaveEntry, TensorIo};
use tracing::debug;

use crate::slot::TensorSlot;

/// Saves and restores one device's tensors against a checkpoint file prefix
///
/// Both `save` and `restore` flatten the nested map in `BTreeMap` iteration
/// order; the restore side relies on that order being identical to correlate
/// the positionally aligned bulk-restore results with their slots.
#[derive(Debug, Clone)]
pub struct SingleDeviceSaver {
    slots: BTreeMap<CheckpointKey, BTreeMap<SliceSpec, TensorSlot>>,
}

impl SingleDeviceSaver {
    pub fn new(slots: BTreeMap<CheckpointKey, BTreeMap<SliceSpec, TensorSlot>>) -> Self {
        Self { slots }
    }

    /// Build a saver whose slots all hold raw tensor values
    pub fn from_tensors(tensors: BTreeMap<CheckpointKey, BTreeMap<SliceSpec, TensorValue>>) -> Self {
        let slots = tensors
            .into_iter()
            .map(|(key, slices)| {
                let slices = slices
                    .into_iter()
                    .map(|(spec, tensor)| (spec, TensorSlot::from(tensor)))
                    .collect();
                (key, slices)
            })
            .collect();
        Self { slots }
    }

    /// Build a saver whose slots all hold planned-write specs
    pub fn from_specs(
        specs: BTreeMap<CheckpointKey, BTreeMap<SliceSpec, saver_core::SaveSpec>>,
    ) -> Self {
        let slots = specs
            .into_iter()
            .map(|(key, slices)| {
                let slices = slices
                    .into_iter()
                    .map(|(spec, save_spec)| (spec, TensorSlot::from(save_spec)))
                    .collect();
                (key, slices)
            })
            .collect();
        Self { slots }
    }

    /// Number of `(checkpoint key, slice spec)` slots held
    pub fn num_slots(&self) -> usize {
        self.slots.values().map(|slices| slices.len()).sum()
    }

    /// Write all held tensors under `file_prefix` in one bulk operation
    ///
    /// A slot holding a [`saver_core::SaveSpec`] writes under the spec's own
    /// name and slice spec, letting one object contribute differently-named
    /// writes; a spec without a materialized tensor is skipped. Raw slots
    /// write under their map position.
    pub async fn save(
        &self,
        io: &dyn TensorIo,
        device: &str,
        file_prefix: &str,
    ) -> Result<OperationHandle> {
        let mut entries = Vec::with_capacity(self.num_slots());
        for (checkpoint_key, slices) in &self.slots {
            for (slice_spec, slot) in slices {
                match slot {
                    TensorSlot::Spec(spec) => {
                        if let Some(tensor) = &spec.tensor {
                            entries.push(SaveEntry {
                                name: spec.name.clone(),
                                slice_spec: spec.slice_spec.clone(),
                                tensor: tensor.clone(),
                            });
                        }
                    }
                    TensorSlot::Tensor(tensor) => {
                        entries.push(SaveEntry {
                            name: checkpoint_key.clone(),
                            slice_spec: slice_spec.clone(),
                            tensor: tensor.clone(),
                        });
                    }
                }
            }
        }

        debug!(device, file_prefix, num_entries = entries.len(), "Saving shard");
        io.bulk_save(device, file_prefix, entries).await
    }

    /// Read every held slot back from `file_prefix` in one bulk operation
    ///
    /// Reads run on `options.experimental_io_device` when set, otherwise on
    /// `cpu:0` regardless of the device the tensors were captured from.
    /// Returns the restored values re-nested under each slot's own
    /// `checkpoint key -> slice spec` position.
    pub async fn restore(
        &self,
        io: &dyn TensorIo,
        file_prefix: &str,
        options: &CheckpointOptions,
    ) -> Result<BTreeMap<CheckpointKey, BTreeMap<SliceSpec, TensorValue>>> {
        let mut requests = Vec::with_capacity(self.num_slots());
        for (checkpoint_key, slices) in &self.slots {
            for (slice_spec, slot) in slices {
                match slot {
                    TensorSlot::Spec(spec) => {
                        requests.push(RestoreRequest {
                            name: spec.name.clone(),
                            slice_spec: spec.slice_spec.clone(),
                            dtype: spec.dtype,
                        });
                    }
                    TensorSlot::Tensor(tensor) => {
                        requests.push(RestoreRequest {
                            name: checkpoint_key.clone(),
                            slice_spec: slice_spec.clone(),
                            dtype: tensor.dtype,
                        });
                    }
                }
            }
        }

        let restore_device = options
            .experimental_io_device
            .as_deref()
            .unwrap_or(DEFAULT_IO_DEVICE);
        let restored = io.bulk_restore(restore_device, file_prefix, requests).await?;

        // Same iteration order as the request pass; the results correlate
        // by index.
        let mut nested: BTreeMap<CheckpointKey, BTreeMap<SliceSpec, TensorValue>> = BTreeMap::new();
        let mut restored = restored.into_iter();
        for (checkpoint_key, slices) in &self.slots {
            for slice_spec in slices.keys() {
                let tensor = restored.next().ok_or_else(|| saver_core::Error::Internal {
                    message: format!(
                        "bulk restore returned fewer tensors than requested for {file_prefix}"
                    ),
                })?;
                nested
                    .entry(checkpoint_key.clone())
                    .or_default()
                    .insert(slice_spec.clone(), tensor);
            }
        }
        Ok(nested)
    }
}
