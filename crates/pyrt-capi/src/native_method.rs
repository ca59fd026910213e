//! Adapts a [`crate::spec::PyMethodDef`] entry into something
//! [`pyrt_core::trampoline::invoke`] can call: a raw `extern "C"` function
//! pointer, typed per calling convention, wrapped to implement
//! [`pyrt_core::trampoline::NativeCallable`].
//!
//! The five raw signatures below mirror the §4.F table directly; which one
//! a given [`ExtensionMethod`] holds is determined once, at registration
//! time, by [`RawEntry::from_def`] reading the def's `METH_*` flags — the
//! same derivation `Convention::from_flags` performs on the managed side,
//! kept separate here because the C-ABI signature and the managed
//! `NativeArgs` shape are related but not identical types.

use std::os::raw::{c_int, c_void};

use pyrt_core::error::ExceptionState;
use pyrt_core::handle::{HandleId, HandleTable};
use pyrt_core::resource::DynHeap;
use pyrt_core::tagged::Value;
use pyrt_core::trampoline::{MethFlags, NativeArgs, NativeCallable};

use crate::module_init::{handle_as_ptr, ptr_as_handle};
use crate::spec::PyMethodDef;

type NoArgsFn = unsafe extern "C" fn(slf: *mut c_void) -> *mut c_void;
type OneArgFn = unsafe extern "C" fn(slf: *mut c_void, arg: *mut c_void) -> *mut c_void;
type VarArgsFn = unsafe extern "C" fn(slf: *mut c_void, args: *mut c_void) -> *mut c_void;
type KeywordsFn = unsafe extern "C" fn(slf: *mut c_void, args: *mut c_void, kwargs: *mut c_void) -> *mut c_void;
type FastCallFn = unsafe extern "C" fn(slf: *mut c_void, argv: *const *mut c_void, nargs: isize, kwnames: *mut c_void) -> *mut c_void;

/// One of the five raw calling shapes a `PyMethodDef` entry's `pfunc`
/// actually has, disambiguated by its declared `METH_*` flags.
pub enum RawEntry {
    NoArgs(NoArgsFn),
    OneArg(OneArgFn),
    VarArgs(VarArgsFn),
    Keywords(KeywordsFn),
    FastCall(FastCallFn),
}

impl RawEntry {
    /// # Safety
    /// `def.pfunc` must actually have the C signature implied by
    /// `def.flags`, as guaranteed by whoever populated the `PyMethodDef`
    /// array (the extension author, in a real C ABI).
    pub unsafe fn from_def(def: &PyMethodDef) -> Option<Self> {
        let flags = MethFlags::from_bits_truncate(def.flags as u32);
        let base = flags & (MethFlags::VARARGS | MethFlags::KEYWORDS | MethFlags::NOARGS | MethFlags::O | MethFlags::FASTCALL);
        if base == MethFlags::NOARGS {
            Some(RawEntry::NoArgs(std::mem::transmute::<*mut c_void, NoArgsFn>(def.pfunc)))
        } else if base == MethFlags::O {
            Some(RawEntry::OneArg(std::mem::transmute::<*mut c_void, OneArgFn>(def.pfunc)))
        } else if base == MethFlags::VARARGS {
            Some(RawEntry::VarArgs(std::mem::transmute::<*mut c_void, VarArgsFn>(def.pfunc)))
        } else if base == MethFlags::VARARGS | MethFlags::KEYWORDS {
            Some(RawEntry::Keywords(std::mem::transmute::<*mut c_void, KeywordsFn>(def.pfunc)))
        } else if base == MethFlags::FASTCALL || base == MethFlags::FASTCALL | MethFlags::KEYWORDS {
            Some(RawEntry::FastCall(std::mem::transmute::<*mut c_void, FastCallFn>(def.pfunc)))
        } else {
            None
        }
    }
}

/// A registered extension method: its declared flags plus the disambiguated
/// raw entry point.
pub struct ExtensionMethod {
    flags: MethFlags,
    entry: RawEntry,
}

impl ExtensionMethod {
    /// # Safety
    /// See [`RawEntry::from_def`].
    pub unsafe fn from_def(def: &PyMethodDef) -> Option<Self> {
        let flags = MethFlags::from_bits_truncate(def.flags as u32);
        RawEntry::from_def(def).map(|entry| Self { flags, entry })
    }
}

/// Converts a handle-carrying [`Value`] to the smuggled-pointer
/// representation a raw entry point expects, and back. `Value::SmallInt`
/// and other non-heap values have no handle to smuggle, so callers must
/// only invoke this on values already wrapped by the trampoline (every
/// value `NativeArgs` carries is, by the time it reaches here).
fn value_to_ptr(value: Value, handles: &mut HandleTable) -> *mut c_void {
    match value {
        Value::Heap(id) => handle_as_ptr(handles.new_reference(id)),
        _ => std::ptr::null_mut(),
    }
}

fn ptr_to_value(ptr: *mut c_void, handles: &HandleTable) -> Option<Value> {
    if ptr.is_null() {
        return None;
    }
    let handle = ptr_as_handle(ptr);
    Some(Value::Heap(handles.get(handle).referent()))
}

impl NativeCallable for ExtensionMethod {
    fn flags(&self) -> MethFlags {
        self.flags
    }

    fn call(&self, args: NativeArgs, _heap: &mut DynHeap, handles: &mut HandleTable, exc_state: &mut ExceptionState) -> Option<HandleId> {
        let result_ptr = match (&self.entry, args) {
            (RawEntry::NoArgs(f), NativeArgs::NoArgs { slf }) => {
                let slf_ptr = value_to_ptr(slf, handles);
                unsafe { f(slf_ptr) }
            }
            (RawEntry::OneArg(f), NativeArgs::OneArg { slf, arg }) => {
                let slf_ptr = value_to_ptr(slf, handles);
                let arg_ptr = value_to_ptr(arg, handles);
                unsafe { f(slf_ptr, arg_ptr) }
            }
            (RawEntry::VarArgs(f), NativeArgs::VarArgs { slf, args }) => {
                let slf_ptr = value_to_ptr(slf, handles);
                let args_ptr = value_to_ptr(args, handles);
                unsafe { f(slf_ptr, args_ptr) }
            }
            (RawEntry::Keywords(f), NativeArgs::Keywords { slf, args, kwargs }) => {
                let slf_ptr = value_to_ptr(slf, handles);
                let args_ptr = value_to_ptr(args, handles);
                let kwargs_ptr = kwargs.map_or(std::ptr::null_mut(), |k| value_to_ptr(k, handles));
                unsafe { f(slf_ptr, args_ptr, kwargs_ptr) }
            }
            (RawEntry::FastCall(f), NativeArgs::FastCall { slf, argv, nargs, kwnames }) => {
                let slf_ptr = value_to_ptr(slf, handles);
                let argv_ptrs: Vec<*mut c_void> = argv.iter().map(|&v| value_to_ptr(v, handles)).collect();
                let kwnames_ptr = kwnames.map_or(std::ptr::null_mut(), |k| value_to_ptr(k, handles));
                unsafe { f(slf_ptr, argv_ptrs.as_ptr(), nargs as isize, kwnames_ptr) }
            }
            _ => {
                exc_state.set_pending(pyrt_core::error::PyException::new(
                    pyrt_core::error::ExcType::SystemError,
                    "native entry point does not match its declared calling convention".to_owned(),
                ));
                return None;
            }
        };

        if exc_state.is_pending() {
            return None;
        }
        match ptr_to_value(result_ptr, handles) {
            Some(Value::Heap(id)) => Some(handles.new_reference(id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrt_core::heap::{HeapPayload, ObjectFormat};
    use pyrt_core::resource::NoLimitTracker;
    use crate::spec::METH_O;

    unsafe extern "C" fn identity(_slf: *mut c_void, arg: *mut c_void) -> *mut c_void {
        arg
    }

    #[test]
    fn one_arg_raw_entry_round_trips_handle() {
        let mut heap = DynHeap::new(Box::new(NoLimitTracker));
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();

        let obj = heap.allocate(ObjectFormat::DataInstance, 1, HeapPayload::Bytes(vec![])).unwrap();
        let def = PyMethodDef {
            name: std::ptr::null(),
            pfunc: identity as *mut c_void,
            flags: METH_O,
            doc: std::ptr::null(),
        };
        let method = unsafe { ExtensionMethod::from_def(&def) }.unwrap();

        let args = NativeArgs::OneArg { slf: Value::Heap(obj), arg: Value::Heap(obj) };
        let result = method.call(args, &mut heap, &mut handles, &mut exc);
        assert!(result.is_some());
        assert_eq!(handles.get(result.unwrap()).referent(), obj);
    }
}
