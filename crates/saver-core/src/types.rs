//! Core type definitions for the checkpoint saver

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Global string identifier for a logical variable across the whole checkpoint
pub type CheckpointKey = String;

/// String describing which slice of a (possibly partitioned) variable a tensor
/// represents; the empty string means the whole value
pub type SliceSpec = String;

/// Opaque locality tag (e.g. "cpu:0") used to partition work across shards
pub type Device = String;

/// Device used for restores and host-side merge work when nothing else is
/// pinned. Restore deliberately defaults to CPU regardless of the device a
/// tensor was captured from.
pub const DEFAULT_IO_DEVICE: &str = "cpu:0";

/// Payload data types understood by the saver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl DType {
    /// Size of one element in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 | DType::Bool => 1,
        }
    }
}

/// An owned host-side tensor value
///
/// Carries the device the value was captured on; the saver uses it purely as
/// a grouping key for sharding and never interprets its structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorValue {
    /// Element type
    pub dtype: DType,

    /// Dimension sizes
    pub shape: Vec<u64>,

    /// Raw little-endian element data
    pub data: Bytes,

    /// Device the value was captured on
    pub device: Device,
}

impl TensorValue {
    pub fn new(dtype: DType, shape: Vec<u64>, data: Bytes, device: impl Into<Device>) -> Self {
        Self {
            dtype,
            shape,
            data,
            device: device.into(),
        }
    }

    /// Build a rank-1 f32 tensor from a slice of values
    pub fn from_f32(values: &[f32], device: impl Into<Device>) -> Self {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(
            DType::F32,
            vec![values.len() as u64],
            Bytes::from(data),
            device,
        )
    }

    /// Build a rank-1 i64 tensor from a slice of values
    pub fn from_i64(values: &[i64], device: impl Into<Device>) -> Self {
        let mut data = Vec::with_capacity(values.len() * 8);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(
            DType::I64,
            vec![values.len() as u64],
            Bytes::from(data),
            device,
        )
    }

    /// Number of elements implied by the shape
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// A planned write unit: "this tensor (or slice of one) should be written
/// under this checkpoint key"
///
/// A spec with `tensor: None` describes a value that is declared but not
/// materialized; it is skipped on save but still describes dtype and naming
/// on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSpec {
    /// Checkpoint key to write under, overriding the slot's nominal key
    pub name: String,

    /// Slice of the variable this write covers
    pub slice_spec: SliceSpec,

    /// Element type of the write
    pub dtype: DType,

    /// Value to write, if materialized
    pub tensor: Option<TensorValue>,
}

/// Completion handle for a save, merge, or restore-callback operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// Name of the completed operation
    pub name: String,
}

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Checkpoint format version recorded in a [`SaverDef`]
///
/// The numeric values are interop-fixed and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum CheckpointFormatVersion {
    Legacy = 0,
    V1 = 1,
    V2 = 2,
}

/// Serializable descriptor of a traced save/restore pair
///
/// Records the symbolic names of the filename input, the save output tensor,
/// and the restore op of a graph-captured saver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaverDef {
    /// Name of the filename placeholder tensor
    pub filename_tensor_name: String,

    /// Name of the tensor produced by the traced save
    pub save_tensor_name: String,

    /// Name of the traced restore op
    pub restore_op_name: String,

    /// Checkpoint format version tag
    pub version: CheckpointFormatVersion,
}
