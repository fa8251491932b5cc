//! Free-list registry for sub-allocating device buffer memory.
//!
//! An [`AllocationRegistry`] tracks which byte ranges of a fixed-size linear
//! address space are in use. It has no device awareness: it hands out offsets,
//! and the section store one level up decides what lives at them.
//!
//! The registry never resizes itself. When a buffer grows, the owner creates
//! a fresh registry for the new capacity and re-allocates every live range
//! into it (see `VertexBuffer::grow`).

use crate::error::{GraphicsError, Result};

/// One entry of the registry's partition of `[0, total_size)`.
///
/// A block's own start offset is never stored; it is recovered by summing the
/// sizes of all preceding blocks during the allocation scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    size: u64,
    free: bool,
}

/// Keeps track of allocated memory ranges, usually backing a GPU buffer.
///
/// Allocation is first-fit: the block sequence is scanned front to back and
/// the first free block large enough is taken. A larger block is split into
/// an allocated prefix and a free remainder; an exact-size match just flips
/// the block's flag. Freed blocks are merged with free neighbors, so a fully
/// freed registry collapses back to a single block.
///
/// # Example
///
/// ```
/// use draw_batcher::AllocationRegistry;
///
/// let mut registry = AllocationRegistry::new(1024);
/// let a = registry.allocate(256).unwrap();
/// let b = registry.allocate(256).unwrap();
/// assert_eq!((a, b), (0, 256));
///
/// registry.deallocate(a).unwrap();
/// // First-fit reuses the freed range before touching the tail.
/// assert_eq!(registry.allocate(200).unwrap(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct AllocationRegistry {
    blocks: Vec<Block>,
    total_size: u64,
}

impl AllocationRegistry {
    /// Create a registry managing `total_size` bytes of contiguous memory.
    pub fn new(total_size: u64) -> Self {
        Self {
            blocks: vec![Block {
                size: total_size,
                free: true,
            }],
            total_size,
        }
    }

    /// The full size of the managed address space.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Total number of free bytes. Fragmentation may prevent a single
    /// allocation of this size; see [`max_allocation`](Self::max_allocation).
    pub fn free_size(&self) -> u64 {
        self.blocks.iter().filter(|b| b.free).map(|b| b.size).sum()
    }

    /// The biggest single request that would currently succeed.
    pub fn max_allocation(&self) -> u64 {
        self.blocks
            .iter()
            .filter(|b| b.free)
            .map(|b| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Mark `size` bytes as used and return their offset.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::OutOfMemory`] when no free block is large enough.
    pub fn allocate(&mut self, size: u64) -> Result<u64> {
        self.try_allocate(size)
            .ok_or(GraphicsError::OutOfMemory { requested: size })
    }

    /// Same as [`allocate`](Self::allocate), returning `None` on failure.
    pub fn try_allocate(&mut self, size: u64) -> Option<u64> {
        // Zero-size requests succeed at the first free offset without
        // disturbing the partition; there is nothing to deallocate later.
        if size == 0 {
            let mut offset = 0;
            for block in &self.blocks {
                if block.free {
                    return Some(offset);
                }
                offset += block.size;
            }
            return None;
        }

        let mut offset = 0;
        let mut found = None;
        for (index, block) in self.blocks.iter().enumerate() {
            if block.free && block.size >= size {
                found = Some(index);
                break;
            }
            offset += block.size;
        }

        let index = found?;
        if self.blocks[index].size == size {
            // Exact fit: no new block, the flag flips in place.
            self.blocks[index].free = false;
        } else {
            // Split: allocated prefix, free remainder after it.
            self.blocks[index].size -= size;
            self.blocks.insert(index, Block { size, free: false });
        }
        Some(offset)
    }

    /// Mark the block starting at `offset` as unused.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::InvalidOffset`] when no allocated block starts
    /// exactly at `offset`.
    pub fn deallocate(&mut self, offset: u64) -> Result<()> {
        if self.try_deallocate(offset) {
            Ok(())
        } else {
            Err(GraphicsError::InvalidOffset(offset))
        }
    }

    /// Same as [`deallocate`](Self::deallocate), returning `false` on failure.
    pub fn try_deallocate(&mut self, offset: u64) -> bool {
        let mut start = 0;
        for index in 0..self.blocks.len() {
            if start == offset {
                if self.blocks[index].free {
                    return false;
                }
                self.blocks[index].free = true;
                self.coalesce_around(index);
                return true;
            }
            start += self.blocks[index].size;
            if start > offset {
                break;
            }
        }
        false
    }

    /// Merge the block at `index` with free neighbors on both sides.
    fn coalesce_around(&mut self, index: usize) {
        // Fold the successor in first so `index` stays valid.
        if index + 1 < self.blocks.len() && self.blocks[index + 1].free {
            self.blocks[index].size += self.blocks[index + 1].size;
            self.blocks.remove(index + 1);
        }
        if index > 0 && self.blocks[index - 1].free {
            self.blocks[index - 1].size += self.blocks[index].size;
            self.blocks.remove(index);
        }
    }
}
