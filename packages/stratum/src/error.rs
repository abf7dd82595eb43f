//! Capacity-exhaustion errors.
//!
//! Only resource exhaustion is reported through `Result`s; contract
//! violations (looking up an unregistered component type, accessing a
//! component an archetype does not store, iterating a stale query snapshot)
//! are panics and are documented on the functions that raise them.

use thiserror::Error;

/// Errors returned by fallible ECS operations.
///
/// Every variant is an unrecoverable-by-retry resource limit; callers are
/// expected to size the world correctly up front rather than handle these
/// at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// The chunk arena is exhausted and the free list is empty.
    #[error("chunk arena exhausted ({capacity} chunks in use)")]
    ChunkCapacity { capacity: usize },

    /// The entity id space is exhausted.
    #[error("entity capacity exhausted ({capacity} live entities)")]
    EntityCapacity { capacity: usize },

    /// More distinct component types were registered than the composition
    /// bitset can address.
    #[error("component type capacity exhausted ({capacity} types)")]
    ComponentCapacity { capacity: usize },

    /// The arena size passed to the chunk allocator is not an exact
    /// multiple of the chunk size.
    #[error("arena size {size} is not a multiple of the chunk size {chunk_size}")]
    InvalidArenaSize { size: usize, chunk_size: usize },

    /// A single row of the composition does not fit in one chunk.
    #[error("archetype row needs {row_bytes} bytes; it cannot fit a {chunk_size} byte chunk")]
    ArchetypeTooLarge { row_bytes: usize, chunk_size: usize },

    /// The component type cannot be stored in a packed column.
    #[error("component type {name} is not storable: {reason}")]
    UnsupportedComponent {
        name: &'static str,
        reason: &'static str,
    },
}
