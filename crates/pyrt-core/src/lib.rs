//! Object model, managed heap, and C-extension interop layer for a Python 3
//! runtime: the eight subsystems a bytecode interpreter, compiler, and
//! builtin-type library are built on top of, not a full interpreter by
//! itself.

pub mod error;
pub mod handle;
pub mod heap;
pub mod intern;
pub mod layout;
pub mod module;
pub mod resource;
pub mod slots;
pub mod tagged;
pub mod trampoline;
pub mod types;

pub use crate::{
    error::{ExcType, ExceptionState, FatalError, PyException},
    handle::{check_function_result, Handle, HandleId, HandleTable},
    heap::{Heap, HeapId, Roots, WeakCallback, WeakRefId},
    intern::{InternerBuilder, Interns, StringId},
    layout::{AttrLocation, AttrSlot, Layout, LayoutId, LayoutTable, TypeId},
    module::{CacheSite, CellOwner, DeleteError, Module, ValueCell},
    resource::{BoundedTracker, DynHeap, NoLimitTracker, ResourceTracker},
    slots::{
        build_type_from_slots, resolve_slots, tp_free_is_inheritable, GetSetDef, MemberDef, MemberTypeCode, MethodDef, Slot, SlotId,
        SlotKey, SlotTable,
    },
    tagged::{ErrorSentinel, SmallString, Value},
    trampoline::{invoke, MethFlags, NativeArgs, NativeCallable, RawCall},
    types::{NativeTypeData, Type, TypeFlags, TypeTable},
};
