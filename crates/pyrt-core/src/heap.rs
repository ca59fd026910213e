//! Heap & scavenger (component B): a two-space semi-space copying
//! collector with forwarding, weak references, and native-proxy dealloc
//! tracking.
//!
//! Rather than encode forwarding into a mutated header word (awkward to do
//! safely without raw pointers), collection keeps the from-space/to-space
//! mapping in a side table that is discarded once the collection finishes —
//! the alternative the design notes call out explicitly for target
//! languages where in-place header mutation is inconvenient.

use crate::layout::LayoutId;
use crate::resource::ResourceTracker;
use crate::tagged::Value;

/// Index into the heap's currently active space. Stable between
/// collections; a collection may reassign it (the scavenger rewrites every
/// root and every surviving object's pointer fields in place).
pub type HeapId = u32;

/// Mirrors the header's `object format` field: how the trailing payload
/// should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    /// Fixed-width raw bytes (e.g. `bytes`, `str` storage).
    DataArray,
    /// A variable-length array of [`Value`]s (e.g. `tuple`, `list` backing
    /// store, or an overflow attribute tail array).
    ObjectArray,
    /// In-object attribute slots plus a raw trailing byte buffer (a native
    /// extension instance with both `Value` members and opaque bytes).
    DataInstance,
    /// In-object attribute slots, the common case for plain instances. The
    /// last slot is the overflow pointer iff the instance's [`crate::layout::Layout`]
    /// has any overflow attributes.
    ObjectInstance,
}

/// The header word every heap object is preceded by.
#[derive(Debug, Clone)]
pub struct HeapHeader {
    pub format: ObjectFormat,
    pub layout_id: LayoutId,
    /// Lazily assigned; stored here (rather than recomputed) so it survives
    /// copying (G2).
    pub identity_hash: Option<u32>,
    pub count: u32,
    /// Set for objects proxying a native (C-extension) instance whose
    /// deallocation is driven by the native refcount rather than managed
    /// reachability. While set, the scavenger keeps the object alive
    /// unconditionally; `untrack_native_proxy` clears it once `tp_dealloc`
    /// has run, after which ordinary reachability applies.
    pub native_tracked: bool,
}

#[derive(Debug)]
pub enum HeapPayload {
    Bytes(Vec<u8>),
    Slots(Vec<Value>),
}

#[derive(Debug)]
pub struct HeapObject {
    pub header: HeapHeader,
    pub payload: HeapPayload,
}

impl HeapObject {
    #[must_use]
    pub fn slots(&self) -> &[Value] {
        match &self.payload {
            HeapPayload::Slots(s) => s,
            HeapPayload::Bytes(_) => &[],
        }
    }

    #[must_use]
    pub fn slots_mut(&mut self) -> &mut [Value] {
        match &mut self.payload {
            HeapPayload::Slots(s) => s,
            HeapPayload::Bytes(_) => &mut [],
        }
    }
}

/// A handle to a pending weak-reference callback, returned by [`Heap::collect`]
/// for the embedder to invoke once the collection itself has finished (the
/// reference semantics require callbacks to run strictly after GC
/// completes, with any exception they raise suppressed rather than
/// propagated to the collector).
pub struct WeakCallback {
    pub id: WeakRefId,
    callback: Box<dyn FnOnce(WeakRefId)>,
}

impl WeakCallback {
    pub fn invoke(self) {
        (self.callback)(self.id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakRefId(u32);

struct WeakRefEntry {
    target: Option<HeapId>,
    callback: Option<Box<dyn FnOnce(WeakRefId)>>,
}

/// Anything holding [`HeapId`]s that must be treated as GC roots: the value
/// stack(s), the handle table, module globals, the intern table. Each
/// implementor is responsible for calling `forward` on every `Value` it
/// owns and storing back the (possibly rewritten) result.
pub trait Roots {
    fn visit_mut(&mut self, forward: &mut dyn FnMut(Value) -> Value);
}

pub struct Heap<T: ResourceTracker> {
    space: Vec<Option<HeapObject>>,
    weak_refs: Vec<WeakRefEntry>,
    tracker: T,
    next_identity_salt: u32,
}

impl<T: ResourceTracker> Heap<T> {
    #[must_use]
    pub fn new(tracker: T) -> Self {
        Self { space: Vec::new(), weak_refs: Vec::new(), tracker, next_identity_salt: 1 }
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Bump-allocates a new object. Returns `None` (caller should raise
    /// `MemoryError`) if the resource tracker rejects the allocation.
    pub fn allocate(&mut self, format: ObjectFormat, layout_id: LayoutId, payload: HeapPayload) -> Option<HeapId> {
        let size_estimate = match &payload {
            HeapPayload::Bytes(b) => b.len(),
            HeapPayload::Slots(s) => s.len() * std::mem::size_of::<Value>(),
        } + std::mem::size_of::<HeapHeader>();
        if !self.tracker.on_allocate(size_estimate) {
            return None;
        }
        let count = match &payload {
            HeapPayload::Bytes(b) => b.len() as u32,
            HeapPayload::Slots(s) => s.len() as u32,
        };
        let header = HeapHeader { format, layout_id, identity_hash: None, count, native_tracked: false };
        let id = self.space.len() as HeapId;
        self.space.push(Some(HeapObject { header, payload }));
        Some(id)
    }

    #[must_use]
    pub fn header(&self, id: HeapId) -> &HeapHeader {
        &self.get(id).header
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapObject {
        self.space[id as usize].as_ref().expect("heap id does not reference a live object")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapObject {
        self.space[id as usize].as_mut().expect("heap id does not reference a live object")
    }

    /// Lazily assigns and returns this object's identity hash (30 bits in
    /// the reference header; we keep the full `u32` and mask callers that
    /// need the narrower width).
    pub fn identity_hash(&mut self, id: HeapId) -> u32 {
        if let Some(h) = self.header(id).identity_hash {
            return h;
        }
        let salt = self.next_identity_salt;
        self.next_identity_salt = self.next_identity_salt.wrapping_add(0x9E37_79B9).max(1);
        let hash = (id ^ salt) & 0x3FFF_FFFF;
        self.get_mut(id).header.identity_hash = Some(hash);
        hash
    }

    pub fn mark_native_tracked(&mut self, id: HeapId) {
        self.get_mut(id).header.native_tracked = true;
    }

    /// Called from the native `tp_dealloc` path once the native refcount
    /// has reached zero and the native destructor has run.
    pub fn untrack_native_proxy(&mut self, id: HeapId) {
        self.get_mut(id).header.native_tracked = false;
    }

    pub fn create_weak_ref(&mut self, target: HeapId, callback: Option<Box<dyn FnOnce(WeakRefId)>>) -> WeakRefId {
        let id = WeakRefId(self.weak_refs.len() as u32);
        self.weak_refs.push(WeakRefEntry { target: Some(target), callback });
        id
    }

    #[must_use]
    pub fn weak_ref_target(&self, id: WeakRefId) -> Option<HeapId> {
        self.weak_refs[id.0 as usize].target
    }

    /// Runs a full collection. `roots` is walked once to seed forwarding;
    /// the to-space is then scanned transitively until no gray objects
    /// remain. Returns weak-ref callbacks due to run (after GC completes,
    /// per the reference semantics) in the order their referents were
    /// found unreachable.
    pub fn collect(&mut self, roots: &mut dyn Roots) -> Vec<WeakCallback> {
        let mut new_space: Vec<Option<HeapObject>> = Vec::with_capacity(self.space.len());
        let mut forwarding: Vec<Option<HeapId>> = vec![None; self.space.len()];
        let mut gray: Vec<HeapId> = Vec::new();

        // Native-tracked proxies are kept alive unconditionally until the
        // native side explicitly untracks them.
        let tracked_ids: Vec<HeapId> = self
            .space
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().filter(|o| o.header.native_tracked).map(|_| i as HeapId))
            .collect();
        for old_id in tracked_ids {
            Self::forward_one(&mut self.space, &mut new_space, &mut forwarding, &mut gray, old_id);
        }

        roots.visit_mut(&mut |v: Value| match v {
            Value::Heap(old_id) => {
                Value::Heap(Self::forward_one(&mut self.space, &mut new_space, &mut forwarding, &mut gray, old_id))
            }
            other => other,
        });

        while let Some(new_id) = gray.pop() {
            let mut obj = new_space[new_id as usize].take().expect("gray worklist entry missing");
            for slot in obj.payload_slots_mut() {
                if let Value::Heap(old_id) = *slot {
                    let new_child = Self::forward_one(&mut self.space, &mut new_space, &mut forwarding, &mut gray, old_id);
                    *slot = Value::Heap(new_child);
                }
            }
            new_space[new_id as usize] = Some(obj);
        }

        let mut due_callbacks = Vec::new();
        for (index, entry) in self.weak_refs.iter_mut().enumerate() {
            if let Some(old_id) = entry.target {
                match forwarding.get(old_id as usize).copied().flatten() {
                    Some(new_id) => entry.target = Some(new_id),
                    None => {
                        entry.target = None;
                        if let Some(cb) = entry.callback.take() {
                            due_callbacks.push(WeakCallback { id: WeakRefId(index as u32), callback: cb });
                        }
                    }
                }
            }
        }

        self.space = new_space;
        due_callbacks
    }

    fn forward_one(
        old_space: &mut [Option<HeapObject>],
        new_space: &mut Vec<Option<HeapObject>>,
        forwarding: &mut [Option<HeapId>],
        gray: &mut Vec<HeapId>,
        old_id: HeapId,
    ) -> HeapId {
        if let Some(new_id) = forwarding[old_id as usize] {
            return new_id;
        }
        let obj = old_space[old_id as usize].take().expect("forwarding an already-freed object");
        let new_id = new_space.len() as HeapId;
        new_space.push(Some(obj));
        forwarding[old_id as usize] = Some(new_id);
        gray.push(new_id);
        new_id
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.space.iter().filter(|s| s.is_some()).count()
    }
}

impl HeapObject {
    fn payload_slots_mut(&mut self) -> &mut [Value] {
        self.slots_mut()
    }
}
