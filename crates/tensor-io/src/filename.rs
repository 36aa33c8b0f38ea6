//! Checkpoint filename conventions
//!
//! These formats are interop-fixed: shard files embed their index and total
//! count, and in-progress checkpoints use a destination-dependent temp
//! suffix so that partially written shards never collide with final-name
//! listings.

/// Filename for one shard of a sharded checkpoint
///
/// Encodes `0 <= shard < num_shards` as a zero-padded `-NNNNN-of-NNNNN`
/// suffix on the prefix.
pub fn sharded_filename(prefix: &str, shard: usize, num_shards: usize) -> String {
    debug_assert!(shard < num_shards);
    format!("{prefix}-{shard:05}-of-{num_shards:05}")
}

/// Whether a checkpoint prefix points at a remote object store
pub fn is_remote_prefix(file_prefix: &str) -> bool {
    file_prefix.starts_with("s3://")
}

/// Temporary prefix for in-progress shard writes
///
/// Object stores get a `.part` suffix on the prefix itself; local
/// destinations get a `_temp/part` subdirectory that the merge step deletes.
pub fn temp_checkpoint_prefix(file_prefix: &str) -> String {
    if is_remote_prefix(file_prefix) {
        format!("{file_prefix}.part")
    } else {
        format!("{file_prefix}_temp/part")
    }
}
