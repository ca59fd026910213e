//! The raw slot-table / module-definition ABI shapes a C extension links
//! against (§6). These are `#[repr(C)]` precisely so an extension built in
//! C (or any other language agreeing on the same layout) loads without
//! translation — this is the one boundary in the workspace where raw
//! pointers are the idiomatic shape, the same way a Python C-API binding
//! crate represents its `PyObject*`/`PyTypeObject` surface.
//!
//! The numeric slot ids below are this crate's own numbering, not a claim
//! of binary compatibility with any particular existing C extension ABI
//! (out of scope — only the architectural shape is).

#![allow(non_upper_case_globals)]

use std::os::raw::{c_char, c_int};

pub const Py_TPFLAGS_BASETYPE: u32 = 1 << 0;
pub const Py_TPFLAGS_HEAPTYPE: u32 = 1 << 1;
pub const Py_TPFLAGS_HAVE_GC: u32 = 1 << 2;
pub const Py_TPFLAGS_HAVE_FINALIZE: u32 = 1 << 3;

pub const Py_tp_new: c_int = 1;
pub const Py_tp_init: c_int = 2;
pub const Py_tp_dealloc: c_int = 3;
pub const Py_tp_alloc: c_int = 4;
pub const Py_tp_free: c_int = 5;
pub const Py_tp_repr: c_int = 6;
pub const Py_tp_str: c_int = 7;
pub const Py_tp_hash: c_int = 8;
pub const Py_tp_call: c_int = 9;
pub const Py_tp_getattro: c_int = 10;
pub const Py_tp_getattr: c_int = 11;
pub const Py_tp_setattro: c_int = 12;
pub const Py_tp_setattr: c_int = 13;
pub const Py_tp_richcompare: c_int = 14;
pub const Py_tp_iter: c_int = 15;
pub const Py_tp_iternext: c_int = 16;
pub const Py_tp_descr_get: c_int = 17;
pub const Py_tp_descr_set: c_int = 18;
pub const Py_tp_del: c_int = 19;
pub const Py_tp_finalize: c_int = 20;
pub const Py_tp_traverse: c_int = 21;
pub const Py_tp_clear: c_int = 22;
pub const Py_tp_methods: c_int = 23;
pub const Py_tp_members: c_int = 24;
pub const Py_tp_getset: c_int = 25;
pub const Py_tp_base: c_int = 26;

/// Number/sequence/mapping/async sub-slot ranges (§4.G: each slot within a
/// group inherits individually unless shadowed by a sibling in its group).
pub const Py_nb_range_start: c_int = 100;
pub const Py_sq_range_start: c_int = 200;
pub const Py_mp_range_start: c_int = 300;
pub const Py_am_range_start: c_int = 400;

#[repr(C)]
pub struct PyTypeSlot {
    pub slot: c_int,
    pub pfunc: *mut std::ffi::c_void,
}

#[repr(C)]
pub struct PyTypeSpec {
    pub name: *const c_char,
    pub basicsize: c_int,
    pub itemsize: c_int,
    pub flags: u32,
    /// Terminated by an entry with `slot == 0`.
    pub slots: *mut PyTypeSlot,
}

/// `PyObject` header (§6): refcounts are tracked in the handle table, not
/// here — this field is read-only informational bookkeeping an extension
/// may inspect but never mutate directly.
#[repr(C)]
pub struct PyObjectHeader {
    pub refcount: isize,
    pub type_ptr: *mut std::ffi::c_void,
}

pub const METH_VARARGS: c_int = 0x0001;
pub const METH_KEYWORDS: c_int = 0x0002;
pub const METH_NOARGS: c_int = 0x0004;
pub const METH_O: c_int = 0x0008;
pub const METH_FASTCALL: c_int = 0x0010;
pub const METH_CLASS: c_int = 0x0020;
pub const METH_STATIC: c_int = 0x0040;
pub const METH_COEXIST: c_int = 0x0080;

#[repr(C)]
pub struct PyMethodDef {
    pub name: *const c_char,
    pub pfunc: *mut std::ffi::c_void,
    pub flags: c_int,
    pub doc: *const c_char,
}

pub const T_BOOL: c_int = 0;
pub const T_BYTE: c_int = 1;
pub const T_SHORT: c_int = 2;
pub const T_INT: c_int = 3;
pub const T_LONG: c_int = 4;
pub const T_FLOAT: c_int = 5;
pub const T_DOUBLE: c_int = 6;
pub const T_STRING: c_int = 7;
pub const T_OBJECT: c_int = 8;
pub const T_OBJECT_EX: c_int = 9;

pub const READONLY: c_int = 1;

#[repr(C)]
pub struct PyMemberDef {
    pub name: *const c_char,
    pub type_code: c_int,
    pub offset: isize,
    pub flags: c_int,
    pub doc: *const c_char,
}

#[repr(C)]
pub struct PyGetSetDef {
    pub name: *const c_char,
    pub getter: *mut std::ffi::c_void,
    /// Null for a read-only attribute.
    pub setter: *mut std::ffi::c_void,
    pub doc: *const c_char,
}

pub const Py_mod_exec: c_int = 1;

#[repr(C)]
pub struct PyModuleDefSlot {
    pub slot: c_int,
    pub value: *mut std::ffi::c_void,
}

/// `Py_mod_exec` thunk signature: takes the module handle (smuggled across
/// the ABI as a pointer-sized integer, see `module_init::handle_as_ptr`)
/// and returns 0 on success.
pub type PyModExecFn = unsafe extern "C" fn(module: *mut std::ffi::c_void) -> c_int;

#[repr(C)]
pub struct PyModuleDef {
    pub name: *const c_char,
    pub doc: *const c_char,
    /// Bytes to allocate into the module's handle cache slot, or <= 0 for
    /// none (§6 step 2).
    pub size: isize,
    /// Terminated by an entry with `name` null.
    pub methods: *mut PyMethodDef,
    /// Terminated by an entry with `slot == 0 && value` null.
    pub slots: *mut PyModuleDefSlot,
}
