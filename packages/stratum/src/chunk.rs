//! The fixed-size chunk arena.
//!
//! All archetype storage lives in 16 KiB chunks handed out by the
//! `ChunkAllocator`: one zero-initialized arena carved into fixed slots,
//! with a free list for recycling. Chunks are addressed by `ChunkId` and
//! accessed as plain byte slices; all layout arithmetic on top of them is
//! bounds-checked slice indexing rather than pointer casts.

use std::fmt::{self, Debug, Formatter};

use crate::error::EcsError;

/// The size of a single chunk in bytes.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// The upper bound on the number of chunks one allocator can manage.
pub const MAX_CHUNK_COUNT: usize = u16::MAX as usize;

/// A handle to one chunk slot in the arena.
///
/// Slot ids are recycled across allocate/free cycles.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(u32);

impl ChunkId {
    /// The id of no chunk; used in the entity location sentinel.
    pub const INVALID: ChunkId = ChunkId(u32::MAX);

    pub(crate) fn new(inner: u32) -> ChunkId {
        ChunkId(inner)
    }

    /// Return the inner slot index.
    pub fn id(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Debug for ChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if *self == ChunkId::INVALID {
            write!(f, "ChunkId(invalid)")
        } else {
            write!(f, "ChunkId({})", self.0)
        }
    }
}

/// One 16 KiB slot of the arena.
///
/// The 64-byte block alignment means any column offset that is a multiple
/// of the 32-byte column alignment is element-aligned for every storable
/// component type.
#[repr(C, align(64))]
struct ChunkBlock([u8; CHUNK_SIZE]);

impl ChunkBlock {
    const ZEROED: ChunkBlock = ChunkBlock([0; CHUNK_SIZE]);
}

/// A bump/free-list allocator over one pre-allocated arena of fixed-size
/// chunks.
///
/// The arena never grows: once every slot is handed out and the free list
/// is empty, allocation fails with [`EcsError::ChunkCapacity`].
pub struct ChunkAllocator {
    arena: Vec<ChunkBlock>,
    free: Vec<ChunkId>,
    next: u32,
}

impl ChunkAllocator {
    /// Create an allocator with an arena of `arena_bytes` bytes.
    ///
    /// `arena_bytes` must be an exact multiple of [`CHUNK_SIZE`] and small
    /// enough to stay under [`MAX_CHUNK_COUNT`] slots. The whole arena is
    /// allocated and zeroed up front.
    pub fn new(arena_bytes: usize) -> Result<ChunkAllocator, EcsError> {
        if arena_bytes == 0 || arena_bytes % CHUNK_SIZE != 0 {
            return Err(EcsError::InvalidArenaSize {
                size: arena_bytes,
                chunk_size: CHUNK_SIZE,
            });
        }

        let capacity = arena_bytes / CHUNK_SIZE;
        if capacity > MAX_CHUNK_COUNT {
            return Err(EcsError::InvalidArenaSize {
                size: arena_bytes,
                chunk_size: CHUNK_SIZE,
            });
        }

        let mut arena = Vec::new();
        arena.resize_with(capacity, || ChunkBlock::ZEROED);

        Ok(ChunkAllocator {
            arena,
            free: Vec::with_capacity(32),
            next: 0,
        })
    }

    /// Hand out a chunk slot, reusing a freed slot when one is available.
    pub fn allocate(&mut self) -> Result<ChunkId, EcsError> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }

        if self.next as usize == self.arena.len() {
            return Err(EcsError::ChunkCapacity {
                capacity: self.arena.len(),
            });
        }

        let id = ChunkId(self.next);
        self.next += 1;
        Ok(id)
    }

    /// Return a chunk slot to the free list.
    ///
    /// The slot's memory is not zeroed here; callers must not assume a
    /// freshly allocated chunk is zeroed.
    pub fn free(&mut self, id: ChunkId) {
        debug_assert!(id.index() < self.next as usize, "freeing unallocated chunk");
        self.free.push(id);
    }

    /// Return the number of slots in the arena.
    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Return the number of slots currently handed out.
    pub fn allocated(&self) -> usize {
        self.next as usize - self.free.len()
    }

    /// Borrow a chunk's bytes.
    ///
    /// # Panics
    /// Panics if `id` does not address an arena slot.
    pub fn bytes(&self, id: ChunkId) -> &[u8] {
        &self.arena[id.index()].0
    }

    /// Mutably borrow a chunk's bytes.
    ///
    /// # Panics
    /// Panics if `id` does not address an arena slot.
    pub fn bytes_mut(&mut self, id: ChunkId) -> &mut [u8] {
        &mut self.arena[id.index()].0
    }

    /// Mutably borrow two distinct chunks at once.
    ///
    /// # Panics
    /// Panics if `a == b` or either id is out of range.
    pub fn bytes_pair_mut(&mut self, a: ChunkId, b: ChunkId) -> (&mut [u8], &mut [u8]) {
        assert_ne!(a, b, "bytes_pair_mut requires two distinct chunks");

        if a < b {
            let (low, high) = self.arena.split_at_mut(b.index());
            (&mut low[a.index()].0, &mut high[0].0)
        } else {
            let (low, high) = self.arena.split_at_mut(a.index());
            (&mut high[0].0, &mut low[b.index()].0)
        }
    }

    /// Mutably borrow every chunk slot, for bulk column extraction.
    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = (ChunkId, &mut [u8])> {
        self.arena
            .iter_mut()
            .enumerate()
            .map(|(index, block)| (ChunkId(index as u32), &mut block.0[..]))
    }
}
