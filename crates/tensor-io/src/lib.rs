//! Tensor I/O - The runtime boundary consumed by the checkpoint saver
//!
//! Provides:
//! - [`TensorIo`] - async trait for the bulk save/restore/merge primitives
//! - checkpoint filename conventions ([`sharded_filename`] and friends)
//! - [`LocalTensorIo`] - local-filesystem implementation
//!
//! # Example
//!
//! ```no_run
//! use tensor_io::{LocalTensorIo, SaveEntry, TensorIo};
//! use saver_core::TensorValue;
//!
//! # async fn example() -> saver_core::Result<()> {
//! let io = LocalTensorIo::new();
//! let entry = SaveEntry {
//!     name: "model/kernel".to_string(),
//!     slice_spec: String::new(),
//!     tensor: TensorValue::from_f32(&[1.0, 2.0], "cpu:0"),
//! };
//! io.bulk_save("cpu:0", "/tmp/ckpt/part-00000-of-00001", vec![entry])
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod filename;
mod local;

pub use backend::{RestoreRequest, SaveEntry, TensorIo};
pub use filename::{is_remote_prefix, sharded_filename, temp_checkpoint_prefix};
pub use local::LocalTensorIo;
