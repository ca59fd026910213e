//! Resource limits the host embeds the runtime with.
//!
//! The core itself never decides *what* the limits are; it calls into a
//! [`ResourceTracker`] at the points where unbounded growth would otherwise
//! be possible (allocation, recursion into nested calls) and propagates a
//! `RecursionError`/`MemoryError` the same way any other exception would
//! flow. This mirrors how the reference VM keeps sandboxing concerns out of
//! the GC/layout/type machinery and pushes them to a pluggable tracker.

/// Called by the heap and the call-frame bookkeeping at the points where an
/// embedder-imposed limit might be exceeded.
pub trait ResourceTracker {
    /// Called before growing the heap by `additional_bytes`. Returning
    /// `false` causes the allocation to fail with `MemoryError`.
    fn on_allocate(&mut self, additional_bytes: usize) -> bool;

    /// Called before pushing a new call frame. Returning `false` causes the
    /// call to fail with `RecursionError`.
    fn check_recursion_depth(&mut self, current_depth: usize) -> bool;
}

/// A tracker with no limits, used in tests and embeddings that trust their
/// input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    fn on_allocate(&mut self, _additional_bytes: usize) -> bool {
        true
    }

    fn check_recursion_depth(&mut self, _current_depth: usize) -> bool {
        true
    }
}

/// A tracker enforcing a maximum heap size and call depth, the shape an
/// embedding host typically configures from its own resource policy.
#[derive(Debug, Clone, Copy)]
pub struct BoundedTracker {
    pub max_heap_bytes: usize,
    pub max_recursion_depth: usize,
    used_bytes: usize,
}

impl BoundedTracker {
    #[must_use]
    pub fn new(max_heap_bytes: usize, max_recursion_depth: usize) -> Self {
        Self { max_heap_bytes, max_recursion_depth, used_bytes: 0 }
    }
}

impl ResourceTracker for BoundedTracker {
    fn on_allocate(&mut self, additional_bytes: usize) -> bool {
        let next = self.used_bytes.saturating_add(additional_bytes);
        if next > self.max_heap_bytes {
            return false;
        }
        self.used_bytes = next;
        true
    }

    fn check_recursion_depth(&mut self, current_depth: usize) -> bool {
        current_depth < self.max_recursion_depth
    }
}

impl ResourceTracker for Box<dyn ResourceTracker> {
    fn on_allocate(&mut self, additional_bytes: usize) -> bool {
        (**self).on_allocate(additional_bytes)
    }

    fn check_recursion_depth(&mut self, current_depth: usize) -> bool {
        (**self).check_recursion_depth(current_depth)
    }
}

/// The heap type used at the boundary where native callables are stored
/// behind `dyn` dispatch (the trampoline and slot-table builder): any
/// `ResourceTracker` works, erased behind a box, so a single runtime
/// instance's heap type doesn't need to be generic over its embedder's
/// concrete tracker.
pub type DynHeap = crate::heap::Heap<Box<dyn ResourceTracker>>;
