//! The three-step multi-phase module initialization protocol (§6): an
//! extension supplies a [`crate::spec::PyModuleDef`] describing its name,
//! its optional per-module state size, and a list of `Py_mod_exec` slots;
//! `initialize_module` drives the module object through creation, state
//! allocation, and slot execution exactly once.
//!
//! A real C extension hands back genuine `PyObject*` pointers across this
//! boundary. This workspace has no actual extension process memory behind
//! it, so a [`pyrt_core::handle::HandleId`] is smuggled across as a
//! pointer-sized integer instead — `handle_as_ptr`/`ptr_as_handle` make that
//! substitution explicit rather than hiding it behind a transmute at every
//! call site.

use std::ffi::CStr;
use std::os::raw::c_void;

use pyrt_core::error::{ExcType, ExceptionState, PyException};
use pyrt_core::handle::{HandleId, HandleTable};
use pyrt_core::heap::{HeapPayload, ObjectFormat};
use pyrt_core::intern::StringId;
use pyrt_core::layout::LayoutId;
use pyrt_core::resource::DynHeap;
use pyrt_core::tagged::Value;

use crate::spec::{PyModExecFn, PyModuleDef, Py_mod_exec};

/// Deliberate simplification documented at the module level: a handle id,
/// not a real object pointer, travels across the "C ABI" boundary.
#[must_use]
pub fn handle_as_ptr(id: HandleId) -> *mut c_void {
    id as usize as *mut c_void
}

#[must_use]
pub fn ptr_as_handle(ptr: *mut c_void) -> HandleId {
    ptr as usize as HandleId
}

fn system_error(message: impl Into<String>) -> PyException {
    PyException::new(ExcType::SystemError, message.into())
}

/// # Safety
/// `def.slots` must point at an array terminated by an entry with
/// `slot == 0`, as every [`PyModuleDef`] produced by `spec.rs` consumers is
/// required to be.
unsafe fn exec_slots(def: &PyModuleDef) -> Vec<PyModExecFn> {
    let mut out = Vec::new();
    if def.slots.is_null() {
        return out;
    }
    let mut cursor = def.slots;
    loop {
        let entry = &*cursor;
        if entry.slot == 0 && entry.value.is_null() {
            break;
        }
        if entry.slot == Py_mod_exec {
            // SAFETY: the extension is required to have stored a function
            // pointer of this exact signature in `value` for a `Py_mod_exec`
            // slot.
            let f: PyModExecFn = std::mem::transmute(entry.value);
            out.push(f);
        }
        cursor = cursor.add(1);
    }
    out
}

/// Step 1 of §6: allocates the module object itself and binds its `__name__`.
/// `name` is already interned (the caller is responsible for turning the
/// def's raw `name` C string into a `StringId` via its interner).
fn create_module(
    heap: &mut DynHeap,
    handles: &mut HandleTable,
    layout_module: LayoutId,
    name: StringId,
) -> Result<HandleId, PyException> {
    let name_value = Value::Heap(name.index() as u32);
    let obj = heap
        .allocate(ObjectFormat::ObjectInstance, layout_module, HeapPayload::Slots(vec![name_value]))
        .ok_or_else(|| PyException::new(ExcType::MemoryError, None))?;
    Ok(handles.new_reference(obj))
}

/// Runs the full protocol: create the module object, allocate its optional
/// per-module state buffer into the handle cache, then run each
/// `Py_mod_exec` thunk in order. The first thunk that leaves an exception
/// pending aborts the sequence; a thunk that returns nonzero without
/// raising is reported as `SystemError`, matching the reference runtime's
/// "a module execution function must either set an exception or return 0"
/// contract.
///
/// # Safety
/// `def` must describe a validly laid-out `methods`/`slots` array (each
/// terminated per their documented sentinel), and every `Py_mod_exec`
/// function pointer it contains must be safe to call with a module handle
/// smuggled as its argument, per `handle_as_ptr`.
pub unsafe fn initialize_module(
    def: &PyModuleDef,
    heap: &mut DynHeap,
    handles: &mut HandleTable,
    exc_state: &mut ExceptionState,
    layout_module: LayoutId,
    mut intern: impl FnMut(&str) -> StringId,
) -> Result<HandleId, PyException> {
    let name = CStr::from_ptr(def.name)
        .to_str()
        .map_err(|_| system_error("module name is not valid UTF-8"))?;
    let name_id = intern(name);

    let module_handle = create_module(heap, handles, layout_module, name_id)?;

    if def.size > 0 {
        let buffer = vec![0u8; def.size as usize];
        handles.get_mut(module_handle).set_cache(buffer);
    }

    for exec_fn in exec_slots(def) {
        let rc = exec_fn(handle_as_ptr(module_handle));
        if exc_state.is_pending() {
            let exc = exc_state.take_pending().expect("is_pending was just checked");
            handles.dispose(module_handle);
            return Err(exc);
        }
        if rc != 0 {
            handles.dispose(module_handle);
            return Err(system_error("Py_mod_exec slot returned nonzero without setting an exception"));
        }
    }

    Ok(module_handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::raw::c_int;

    use pyrt_core::intern::InternerBuilder;
    use pyrt_core::resource::NoLimitTracker;

    const LAYOUT_MODULE: LayoutId = 1;

    unsafe extern "C" fn exec_ok(_module: *mut c_void) -> c_int {
        0
    }

    unsafe extern "C" fn exec_sets_exception(module: *mut c_void) -> c_int {
        // The handle smuggled in isn't usable from here without the live
        // exception state, so this stand-in just signals failure the other
        // legal way: returning nonzero with no exception set. Exercised by
        // `nonzero_without_exception_is_system_error`.
        let _ = module;
        1
    }

    #[test]
    fn handle_round_trips_through_pointer_smuggling() {
        let id: HandleId = 42;
        assert_eq!(ptr_as_handle(handle_as_ptr(id)), id);
    }

    #[test]
    fn successful_exec_slot_returns_module_handle() {
        let mut heap = DynHeap::new(Box::new(NoLimitTracker));
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();
        let mut interner = InternerBuilder::new();

        let name = CString::new("demo").unwrap();
        let mut slots = vec![
            crate::spec::PyModuleDefSlot { slot: Py_mod_exec, value: exec_ok as *mut c_void },
            crate::spec::PyModuleDefSlot { slot: 0, value: std::ptr::null_mut() },
        ];
        let def = PyModuleDef {
            name: name.as_ptr(),
            doc: std::ptr::null(),
            size: 0,
            methods: std::ptr::null_mut(),
            slots: slots.as_mut_ptr(),
        };

        let result = unsafe {
            initialize_module(&def, &mut heap, &mut handles, &mut exc, LAYOUT_MODULE, |s| interner.intern(s))
        };
        assert!(result.is_ok());
    }

    #[test]
    fn nonzero_without_exception_is_system_error() {
        let mut heap = DynHeap::new(Box::new(NoLimitTracker));
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();
        let mut interner = InternerBuilder::new();

        let name = CString::new("demo").unwrap();
        let mut slots = vec![
            crate::spec::PyModuleDefSlot { slot: Py_mod_exec, value: exec_sets_exception as *mut c_void },
            crate::spec::PyModuleDefSlot { slot: 0, value: std::ptr::null_mut() },
        ];
        let def = PyModuleDef {
            name: name.as_ptr(),
            doc: std::ptr::null(),
            size: 16,
            methods: std::ptr::null_mut(),
            slots: slots.as_mut_ptr(),
        };

        let result = unsafe {
            initialize_module(&def, &mut heap, &mut handles, &mut exc, LAYOUT_MODULE, |s| interner.intern(s))
        };
        let err = result.unwrap_err();
        assert_eq!(err.exc_type, ExcType::SystemError);
    }
}
