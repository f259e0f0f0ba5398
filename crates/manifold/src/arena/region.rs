//! Bump-style region allocator with block chaining.

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::sync::Arc;

use super::{AllocError, Allocator, RegionStats, SystemAlloc};

/// Minimum size of a chained block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Every region allocation is aligned to this, the platform's maximum
/// scalar alignment. Requests with stricter alignment are rejected.
pub const MAX_SCALAR_ALIGN: usize = 16;

struct Block {
    ptr: NonNull<u8>,
    cap: usize,
    used: usize,
}

/// A region allocator.
///
/// `alloc` bumps a pointer within the current block; when the block lacks
/// space, a new block of at least `max(DEFAULT_BLOCK_SIZE, n)` bytes is
/// chained in from the underlying allocator. Individual allocations are
/// never released (`release` is a no-op); dropping the region returns every
/// block at once.
///
/// Only `Copy` payloads may be stored: the region never runs destructors.
pub struct Region {
    alloc: Arc<dyn Allocator>,
    blocks: RefCell<Vec<Block>>,
    wasted: Cell<usize>,
}

impl Region {
    /// Create a region over the system allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(SystemAlloc))
    }

    /// Create a region over a caller-provided allocator.
    #[must_use]
    pub fn with_allocator(alloc: Arc<dyn Allocator>) -> Self {
        Self {
            alloc,
            blocks: RefCell::new(Vec::new()),
            wasted: Cell::new(0),
        }
    }

    /// Move `value` into the region and return a reference to it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator refuses to chain
    /// in a new block.
    pub fn alloc<T: Copy>(&self, value: T) -> Result<&T, AllocError> {
        let ptr = self.alloc_raw(Layout::new::<T>())?;
        // SAFETY: alloc_raw returned a properly aligned, exclusive slot of
        // size_of::<T>() bytes that lives until the region is dropped.
        unsafe {
            let slot = ptr.as_ptr().cast::<T>();
            slot.write(value);
            Ok(&*slot)
        }
    }

    /// Copy `values` into the region and return the new slice.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator refuses to chain
    /// in a new block.
    pub fn alloc_slice<T: Copy>(&self, values: &[T]) -> Result<&[T], AllocError> {
        if values.is_empty() {
            return Ok(&[]);
        }
        let layout = Layout::array::<T>(values.len()).map_err(|_| AllocError)?;
        let ptr = self.alloc_raw(layout)?;
        // SAFETY: alloc_raw returned an aligned, exclusive slot of
        // layout.size() bytes; source and destination cannot overlap.
        unsafe {
            let slot = ptr.as_ptr().cast::<T>();
            std::ptr::copy_nonoverlapping(values.as_ptr(), slot, values.len());
            Ok(std::slice::from_raw_parts(slot, values.len()))
        }
    }

    /// Copy raw bytes into the region.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator refuses to chain
    /// in a new block.
    pub fn alloc_bytes(&self, bytes: &[u8]) -> Result<&[u8], AllocError> {
        self.alloc_slice(bytes)
    }

    /// Per-allocation release. Always a no-op: region memory is reclaimed
    /// wholesale when the region is dropped.
    pub fn release<T: ?Sized>(&self, _value: &T) {}

    /// Current usage statistics.
    #[must_use]
    pub fn stats(&self) -> RegionStats {
        let blocks = self.blocks.borrow();
        RegionStats {
            used: blocks.iter().map(|b| b.used).sum(),
            wasted: self.wasted.get(),
            blocks: blocks.len(),
        }
    }

    fn alloc_raw(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        assert!(
            layout.align() <= MAX_SCALAR_ALIGN,
            "region allocations are limited to scalar alignment"
        );
        let size = layout.size().max(1);
        let mut blocks = self.blocks.borrow_mut();

        if let Some(block) = blocks.last_mut() {
            let offset = align_up(block.used);
            if offset + size <= block.cap {
                block.used = offset + size;
                // SAFETY: offset + size <= cap, so the slot is in bounds.
                return Ok(unsafe { NonNull::new_unchecked(block.ptr.as_ptr().add(offset)) });
            }
            self.wasted.set(self.wasted.get() + (block.cap - block.used));
        }

        let cap = size.max(DEFAULT_BLOCK_SIZE);
        let block_layout =
            Layout::from_size_align(cap, MAX_SCALAR_ALIGN).map_err(|_| AllocError)?;
        let ptr = self.alloc.allocate(block_layout)?;
        blocks.push(Block {
            ptr,
            cap,
            used: size,
        });
        Ok(ptr)
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let blocks = self.blocks.get_mut();
        for block in blocks.drain(..) {
            let layout = Layout::from_size_align(block.cap, MAX_SCALAR_ALIGN)
                .expect("block layout was valid at allocation time");
            // SAFETY: the block came from self.alloc with exactly this layout
            // and is released exactly once.
            unsafe { self.alloc.release(block.ptr, layout) };
        }
    }
}

const fn align_up(offset: usize) -> usize {
    (offset + MAX_SCALAR_ALIGN - 1) & !(MAX_SCALAR_ALIGN - 1)
}
