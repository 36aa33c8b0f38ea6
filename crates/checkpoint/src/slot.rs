//! Two-variant unions for checkpoint slot values
//!
//! The saver stores "a tensor OR a planned-write spec" at every
//! `(checkpoint key, slice spec)` slot, and callers hand it "a tensor OR a
//! map of slices". Closed sum types keep those slots exhaustive without
//! one-off wrapper types per call site.

use std::collections::BTreeMap;

use saver_core::{DType, Error, Result, SaveSpec, SliceSpec, TensorValue};

/// Value stored at one `(checkpoint key, slice spec)` slot
#[derive(Debug, Clone, PartialEq)]
pub enum TensorSlot {
    /// A raw tensor value saved under the slot's own key and slice spec
    Tensor(TensorValue),

    /// A planned write carrying its own name, slice spec, and dtype
    Spec(SaveSpec),
}

impl TensorSlot {
    /// The tensor branch, if that is what this slot holds
    pub fn try_tensor(&self) -> Option<&TensorValue> {
        match self {
            TensorSlot::Tensor(tensor) => Some(tensor),
            TensorSlot::Spec(_) => None,
        }
    }

    /// The spec branch, if that is what this slot holds
    pub fn try_spec(&self) -> Option<&SaveSpec> {
        match self {
            TensorSlot::Spec(spec) => Some(spec),
            TensorSlot::Tensor(_) => None,
        }
    }

    /// The tensor branch, failing if the slot holds a spec
    pub fn tensor(&self) -> Result<&TensorValue> {
        self.try_tensor().ok_or(Error::TypeMismatch {
            expected: "TensorValue",
            actual: "SaveSpec",
        })
    }

    /// The spec branch, failing if the slot holds a tensor
    pub fn spec(&self) -> Result<&SaveSpec> {
        self.try_spec().ok_or(Error::TypeMismatch {
            expected: "SaveSpec",
            actual: "TensorValue",
        })
    }

    /// Element type of the slot, from whichever branch is populated
    pub fn dtype(&self) -> DType {
        match self {
            TensorSlot::Tensor(tensor) => tensor.dtype,
            TensorSlot::Spec(spec) => spec.dtype,
        }
    }

    /// Device of the slot's tensor payload, if one is materialized
    pub fn device(&self) -> Option<&str> {
        match self {
            TensorSlot::Tensor(tensor) => Some(&tensor.device),
            TensorSlot::Spec(spec) => spec.tensor.as_ref().map(|t| t.device.as_str()),
        }
    }
}

impl From<TensorValue> for TensorSlot {
    fn from(tensor: TensorValue) -> Self {
        TensorSlot::Tensor(tensor)
    }
}

impl From<SaveSpec> for TensorSlot {
    fn from(spec: SaveSpec) -> Self {
        TensorSlot::Spec(spec)
    }
}

/// A whole tensor value, or the slices of a partitioned one
///
/// Used both for saver construction input (one checkpoint key contributes a
/// value or a slice map) and for assembled restore-callback inputs. The two
/// shapes are mutually exclusive per key.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorOrSlices {
    /// The whole value for a key
    Tensor(TensorValue),

    /// Per-slice values of a partitioned variable
    Slices(BTreeMap<SliceSpec, TensorValue>),
}

impl TensorOrSlices {
    /// The whole-value branch, if that is what this holds
    pub fn try_tensor(&self) -> Option<&TensorValue> {
        match self {
            TensorOrSlices::Tensor(tensor) => Some(tensor),
            TensorOrSlices::Slices(_) => None,
        }
    }

    /// The slice-map branch, if that is what this holds
    pub fn try_slices(&self) -> Option<&BTreeMap<SliceSpec, TensorValue>> {
        match self {
            TensorOrSlices::Slices(slices) => Some(slices),
            TensorOrSlices::Tensor(_) => None,
        }
    }

    /// The whole-value branch, failing if this holds slices
    pub fn tensor(&self) -> Result<&TensorValue> {
        self.try_tensor().ok_or(Error::TypeMismatch {
            expected: "TensorValue",
            actual: "slice map",
        })
    }

    /// The slice-map branch, failing if this holds a whole value
    pub fn slices(&self) -> Result<&BTreeMap<SliceSpec, TensorValue>> {
        self.try_slices().ok_or(Error::TypeMismatch {
            expected: "slice map",
            actual: "TensorValue",
        })
    }
}

impl From<TensorValue> for TensorOrSlices {
    fn from(tensor: TensorValue) -> Self {
        TensorOrSlices::Tensor(tensor)
    }
}

impl From<BTreeMap<SliceSpec, TensorValue>> for TensorOrSlices {
    fn from(slices: BTreeMap<SliceSpec, TensorValue>) -> Self {
        TensorOrSlices::Slices(slices)
    }
}
