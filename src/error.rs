//! Error types for the batching layer.

use thiserror::Error;

/// Errors produced by the allocator, section store, binding cache and queue.
///
/// Every mutating operation with a recoverable failure mode also has a
/// non-erroring `try_` form; the dominant recovery pattern for
/// [`OutOfMemory`](GraphicsError::OutOfMemory) is to grow the owning store
/// and retry the original request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsError {
    /// An allocation request cannot be satisfied by any free block.
    #[error("out of device memory: cannot allocate {requested} bytes")]
    OutOfMemory { requested: u64 },

    /// No allocated block starts at the given offset.
    #[error("invalid offset {0}: no allocation starts there")]
    InvalidOffset(u64),

    /// A section index the store never issued, or one already discarded.
    #[error("invalid section index {index}: store has {count} sections")]
    InvalidSection { index: usize, count: usize },

    /// A handle the owning structure never issued, or one already freed.
    #[error("invalid handle {0}")]
    InvalidHandle(u64),

    /// The number of vertex-input locations does not match the attribute
    /// sequence being bound.
    #[error("attribute count mismatch: sequence has {expected}, {provided} locations given")]
    FormatMismatch { expected: usize, provided: usize },

    /// A byte copy between two ranges of different sizes.
    #[error("size mismatch: destination range is {expected} bytes, source is {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A mesh was created without vertex position data.
    #[error("mesh has no vertex position data")]
    EmptyMesh,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphicsError>;
