//! Handle table (component E): the long-lived native↔managed bridge.
//!
//! A [`Handle`] is keyed by managed-object identity so that handing the
//! same object to native code twice yields the same handle (invariant 6).
//! Refcount and the borrow bit share one word, as in the reference layout;
//! a borrowed reference is logically a refcount-0 handle that the borrow
//! bit protects from disposal while still participating in root scanning.

use std::any::Any;

use ahash::AHashMap;

use crate::error::{ExcType, ExceptionState, PyException};
use crate::heap::{HeapId, Roots};
use crate::tagged::Value;

pub type HandleId = u32;

const BORROW_BIT: u32 = 1 << 31;
const REFCOUNT_MASK: u32 = !BORROW_BIT;

pub struct Handle {
    refcount_word: u32,
    referent: HeapId,
    /// The single ancillary native-side allocation a handle may cache,
    /// freed automatically when the handle is disposed (dropping the
    /// `Box` runs the native cleanup).
    cache: Option<Box<dyn Any>>,
}

impl Handle {
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount_word & REFCOUNT_MASK
    }

    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        self.refcount_word & BORROW_BIT != 0
    }

    #[must_use]
    pub fn referent(&self) -> HeapId {
        self.referent
    }

    pub fn set_cache<T: 'static>(&mut self, value: T) {
        self.cache = Some(Box::new(value));
    }

    #[must_use]
    pub fn cache(&self) -> Option<&(dyn Any)> {
        self.cache.as_deref()
    }
}

/// Slab-allocated so disposal just returns a slot to the free list (design
/// notes: "prefer a slab allocator per runtime instance").
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Option<Handle>>,
    free_list: Vec<HandleId>,
    by_object: AHashMap<HeapId, HandleId>,
}

impl HandleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_slot(&mut self, handle: Handle) -> HandleId {
        if let Some(id) = self.free_list.pop() {
            self.slots[id as usize] = Some(handle);
            id
        } else {
            let id = self.slots.len() as HandleId;
            self.slots.push(Some(handle));
            id
        }
    }

    /// `new_reference(obj)`: increments refcount if a handle already
    /// exists, otherwise creates one with refcount 1.
    pub fn new_reference(&mut self, obj: HeapId) -> HandleId {
        if let Some(&id) = self.by_object.get(&obj) {
            let h = self.slots[id as usize].as_mut().expect("by_object points at a freed handle");
            h.refcount_word = (h.refcount_word & BORROW_BIT) | ((h.refcount() + 1) & REFCOUNT_MASK);
            return id;
        }
        let id = self.alloc_slot(Handle { refcount_word: 1, referent: obj, cache: None });
        self.by_object.insert(obj, id);
        id
    }

    /// A borrowed reference: refcount-0 with the borrow bit set. Does not
    /// create a second handle if one already exists for `obj`.
    pub fn new_borrowed(&mut self, obj: HeapId) -> HandleId {
        if let Some(&id) = self.by_object.get(&obj) {
            let h = self.slots[id as usize].as_mut().expect("by_object points at a freed handle");
            h.refcount_word |= BORROW_BIT;
            return id;
        }
        let id = self.alloc_slot(Handle { refcount_word: BORROW_BIT, referent: obj, cache: None });
        self.by_object.insert(obj, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: HandleId) -> &Handle {
        self.slots[id as usize].as_ref().expect("handle already disposed")
    }

    pub fn get_mut(&mut self, id: HandleId) -> &mut Handle {
        self.slots[id as usize].as_mut().expect("handle already disposed")
    }

    /// Decrements refcount; frees the handle (and its cache) iff refcount
    /// reaches zero and the borrow bit is clear (invariant 6).
    pub fn dispose(&mut self, id: HandleId) {
        let h = self.slots[id as usize].as_mut().expect("double dispose of a handle");
        let rc = h.refcount();
        if rc > 0 {
            h.refcount_word = (h.refcount_word & BORROW_BIT) | (rc - 1);
        }
        if h.refcount() == 0 && !h.is_borrowed() {
            let obj = h.referent;
            self.slots[id as usize] = None;
            self.by_object.remove(&obj);
            self.free_list.push(id);
        }
    }

    /// Releases the borrow bit without touching refcount (e.g. native code
    /// is done treating `obj` as a GC root via a loan, but another strong
    /// reference may still exist).
    pub fn release_borrow(&mut self, id: HandleId) {
        let h = self.get_mut(id);
        h.refcount_word &= !BORROW_BIT;
        if h.refcount() == 0 {
            let obj = h.referent;
            self.slots[id as usize] = None;
            self.by_object.remove(&obj);
            self.free_list.push(id);
        }
    }

    #[must_use]
    pub fn handle_for(&self, obj: HeapId) -> Option<HandleId> {
        self.by_object.get(&obj).copied()
    }
}

impl Roots for HandleTable {
    /// Every handle whose refcount > 0 OR whose borrow bit is set is a
    /// root; its referent is forwarded and the handle's back-reference
    /// rewritten in place.
    fn visit_mut(&mut self, forward: &mut dyn FnMut(Value) -> Value) {
        for slot in &mut self.slots {
            if let Some(h) = slot {
                if h.refcount() > 0 || h.is_borrowed() {
                    if let Value::Heap(new_id) = forward(Value::Heap(h.referent)) {
                        h.referent = new_id;
                    }
                }
            }
        }
        self.by_object = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|h| (h.referent, idx as HandleId)))
            .collect();
    }
}

/// `check_function_result`: every call into native code must return either
/// a valid handle with no pending exception, or no handle with a pending
/// exception. Violations become `SystemError` (§4.E).
pub fn check_function_result(result: Option<HandleId>, exc_state: &mut ExceptionState) -> Result<HandleId, PyException> {
    match (result, exc_state.is_pending()) {
        (Some(handle), false) => Ok(handle),
        (None, true) => Err(exc_state.take_pending().expect("is_pending was just checked")),
        (None, false) => Err(PyException::new(ExcType::SystemError, "NULL result without an exception set".to_owned())),
        (Some(_), true) => {
            exc_state.clear();
            Err(PyException::new(ExcType::SystemError, "a function returned a result with an exception set".to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_object_yields_same_handle() {
        let mut table = HandleTable::new();
        let a = table.new_reference(7);
        let b = table.new_reference(7);
        assert_eq!(a, b);
        assert_eq!(table.get(a).refcount(), 2);
    }

    #[test]
    fn dispose_frees_at_zero_refcount() {
        let mut table = HandleTable::new();
        let h = table.new_reference(7);
        table.dispose(h);
        assert!(table.handle_for(7).is_none());
    }

    #[test]
    fn borrowed_handle_survives_dispose_of_strong_ref() {
        let mut table = HandleTable::new();
        let h1 = table.new_reference(7);
        table.new_borrowed(7);
        table.dispose(h1);
        // refcount is 0 but borrow bit still set, so the handle must live.
        assert!(table.handle_for(7).is_some());
    }

    #[test]
    fn check_function_result_rejects_illegal_combinations() {
        let mut exc = ExceptionState::new();
        assert!(check_function_result(Some(1), &mut exc).is_ok());

        exc.set_pending(PyException::new(ExcType::ValueError, None));
        let err = check_function_result(Some(1), &mut exc).unwrap_err();
        assert_eq!(err.exc_type, ExcType::SystemError);
        assert!(!exc.is_pending());

        let err = check_function_result(None, &mut exc).unwrap_err();
        assert_eq!(err.exc_type, ExcType::SystemError);
    }
}
