//! Error types for the checkpoint saver

use thiserror::Error;

/// Result type alias using the saver Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the checkpoint saver
#[derive(Error, Debug)]
pub enum Error {
    // Construction errors
    #[error(
        "Received multiple tensors with the same checkpoint key and slice spec \
         (key={checkpoint_key:?}, slice_spec={slice_spec:?}). This is invalid because \
         one would overwrite the other in the checkpoint."
    )]
    DuplicateSlot {
        checkpoint_key: String,
        slice_spec: String,
    },

    // Slot access errors
    #[error("Slot type mismatch: expected {expected}, slot holds {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error(
        "Checkpoint key {checkpoint_key:?} mixes a whole-tensor value with sliced values \
         in one restore input"
    )]
    MixedSliceShapes { checkpoint_key: String },

    // Deferred features
    #[error("Not supported: {feature}")]
    NotSupported { feature: String },

    // Checkpoint content errors
    #[error("Tensor not found in checkpoint {prefix}: name={name:?}, slice_spec={slice_spec:?}")]
    TensorNotFound {
        prefix: String,
        name: String,
        slice_spec: String,
    },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for a `NotSupported` error
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Error::NotSupported {
            feature: feature.into(),
        }
    }

    /// Returns true if this error indicates a caller bug or corrupted data,
    /// as opposed to a storage-layer failure
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateSlot { .. }
                | Error::TypeMismatch { .. }
                | Error::MixedSliceShapes { .. }
                | Error::NotSupported { .. }
                | Error::CheckpointCorrupted { .. }
                | Error::Internal { .. }
        )
    }
}
