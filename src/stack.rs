//! The stack allocator (spec.md §4.1): bucketed regions of fixed-size
//! coroutine stacks, O(1) amortized allocation, a free list per region,
//! new regions appended on exhaustion. `internal.h`'s
//! `coro_stack_region_`/`coro_stack_region_bucket_` hand-roll this with
//! raw `mmap`; here it is re-expressed on top of
//! `context::stack::ProtectedFixedSizeStack`, which the teacher already
//! depends on and which gives the guard page spec.md §4.1/§9 recommends
//! for free.

use context::stack::ProtectedFixedSizeStack;

use crate::error::{ResourceError, Result};

/// Number of stacks grouped into one region before a new one is appended.
/// Mirrors `internal.h`'s per-region capacity; the exact number has no
/// semantic significance, only amortization.
const REGION_CAPACITY: usize = 64;

struct Region {
    stacks: Vec<Option<ProtectedFixedSizeStack>>,
    free: Vec<usize>,
}

impl Region {
    fn new(stack_size: usize) -> Result<Self> {
        let mut stacks = Vec::with_capacity(REGION_CAPACITY);
        let mut free = Vec::with_capacity(REGION_CAPACITY);
        for i in 0..REGION_CAPACITY {
            let stack = ProtectedFixedSizeStack::new(stack_size)
                .map_err(ResourceError::StackAllocation)?;
            stacks.push(Some(stack));
            free.push(REGION_CAPACITY - 1 - i);
        }
        Ok(Region { stacks, free })
    }

    fn has_capacity(&self) -> bool {
        !self.free.is_empty()
    }

    fn acquire(&mut self) -> ProtectedFixedSizeStack {
        let slot = self.free.pop().expect("acquire() on an exhausted region");
        self.stacks[slot].take().expect("free slot held no stack")
    }

    fn release(&mut self, slot: usize, stack: ProtectedFixedSizeStack) {
        debug_assert!(self.stacks[slot].is_none());
        self.stacks[slot] = Some(stack);
        self.free.push(slot);
    }
}

/// A handle identifying which region (and slot within it) a checked-out
/// stack must be returned to. Spec.md §4.1's stack header
/// `{region*, owning_tid}` collapses to this plus the borrow-checker: the
/// stack itself is owned by whoever holds the `StackHandle`, not by the
/// pool, for as long as it's checked out.
pub(crate) struct StackHandle {
    region: usize,
    slot: usize,
    stack: Option<ProtectedFixedSizeStack>,
}

impl StackHandle {
    /// Borrows the underlying stack to build a `Fiber`'s `Context` on top
    /// of it. The handle keeps ownership for its whole lifetime so the
    /// stack can be returned to its region's free list via
    /// `StackPool::release` once the fiber that ran on it has finished.
    pub(crate) fn as_ref(&self) -> &ProtectedFixedSizeStack {
        self.stack.as_ref().expect("stack already released from this handle")
    }
}

/// Bucketed regions of fixed-capacity coroutine stacks with per-region
/// free lists. Allocation pops a free slot from the first region with
/// capacity, appending a new region on exhaustion (spec.md §4.1).
pub(crate) struct StackPool {
    stack_size: usize,
    regions: Vec<Region>,
}

impl StackPool {
    pub(crate) fn new(stack_size: usize) -> Self {
        StackPool { stack_size, regions: Vec::new() }
    }

    pub(crate) fn acquire(&mut self) -> Result<StackHandle> {
        let region_idx = match self.regions.iter().position(Region::has_capacity) {
            Some(i) => i,
            None => {
                self.regions.push(Region::new(self.stack_size)?);
                self.regions.len() - 1
            }
        };
        let region = &mut self.regions[region_idx];
        let slot = *region.free.last().unwrap();
        let stack = region.acquire();
        Ok(StackHandle { region: region_idx, slot, stack: Some(stack) })
    }

    /// Returns a stack to its owning region's free list (spec.md §4.1:
    /// "freed stacks return to a free list"), whether `handle` was ever
    /// used to run a fiber or not.
    pub(crate) fn release(&mut self, mut handle: StackHandle) {
        if let Some(stack) = handle.stack.take() {
            self.regions[handle.region].release(handle.slot, stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_reuses_without_growing() {
        let mut pool = StackPool::new(128 * 1024);
        let handle = pool.acquire().unwrap();
        assert_eq!(pool.regions.len(), 1);
        pool.release(handle);
        let _handle2 = pool.acquire().unwrap();
        assert_eq!(pool.regions.len(), 1, "reacquiring a freed slot must not grow the pool");
    }

    #[test]
    fn exhausting_a_region_grows_the_pool() {
        let mut pool = StackPool::new(128 * 1024);
        let mut handles = Vec::new();
        for _ in 0..REGION_CAPACITY {
            handles.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.regions.len(), 1);
        let _overflow = pool.acquire().unwrap();
        assert_eq!(pool.regions.len(), 2, "exhausting one region must append another");
    }
}
