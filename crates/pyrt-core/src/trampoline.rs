//! Trampolines (component F): argument marshaling between the managed call
//! surface and native callables built from a slot table.
//!
//! Six calling conventions (§4.F). Each is an adapter from the interpreter's
//! call-shape (positional, kw-tuple, explode) to the native function's
//! expected argument layout; arity/flag validation happens before the
//! native callable is ever invoked (invariant 7 depends on this: a native
//! callee never observes a partially-marshaled call).

use bitflags::bitflags;

use crate::error::{ExcType, ExceptionState, PyException};
use crate::handle::{check_function_result, HandleId, HandleTable};
use crate::heap::{HeapPayload, ObjectFormat};
use crate::intern::StringId;
use crate::layout::LayoutId;
use crate::resource::DynHeap;
use crate::tagged::Value;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethFlags: u32 {
        const VARARGS  = 1 << 0;
        const KEYWORDS = 1 << 1;
        const NOARGS   = 1 << 2;
        const O        = 1 << 3;
        const FASTCALL = 1 << 4;
        const CLASS    = 1 << 5;
        const STATIC   = 1 << 6;
        const COEXIST  = 1 << 7;
    }
}

/// The calling convention implied by a method's declared [`MethFlags`],
/// independent of which of the three call shapes the caller used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    NoArgs,
    OneArg,
    VarArgs,
    Keywords,
    FastCall,
}

impl Convention {
    /// Derives the convention from the declared `METH_*` flags, the table
    /// used by the slot-table builder to reject unmarshalable combinations
    /// up front (§4.G step 1).
    pub fn from_flags(flags: MethFlags) -> Result<Self, PyException> {
        let base = flags & (MethFlags::VARARGS | MethFlags::KEYWORDS | MethFlags::NOARGS | MethFlags::O | MethFlags::FASTCALL);
        match base {
            f if f == MethFlags::NOARGS => Ok(Convention::NoArgs),
            f if f == MethFlags::O => Ok(Convention::OneArg),
            f if f == MethFlags::VARARGS => Ok(Convention::VarArgs),
            f if f == MethFlags::VARARGS | MethFlags::KEYWORDS => Ok(Convention::Keywords),
            f if f == MethFlags::FASTCALL => Ok(Convention::FastCall),
            f if f == MethFlags::FASTCALL | MethFlags::KEYWORDS => Ok(Convention::FastCall),
            _ => Err(PyException::new(ExcType::SystemError, "unsupported combination of METH_* flags".to_owned())),
        }
    }
}

/// A call as decomposed by the interpreter, independent of which of the
/// three call-shape opcodes (`CALL`, `CALL_KW`, `CALL_EX`) produced it; by
/// the time it reaches a trampoline the shape no longer matters, only the
/// resulting (positional, keyword) split does.
pub struct RawCall {
    pub slf: Value,
    pub positional: Vec<Value>,
    pub keywords: Vec<(StringId, Value)>,
}

/// The shape in which a native callable actually receives its arguments,
/// mirroring the five C signatures in the §4.F table (`Method` is `NoArgs`/
/// `OneArg`/etc. with `slf` already bound from the instance, not a distinct
/// variant).
pub enum NativeArgs {
    NoArgs { slf: Value },
    OneArg { slf: Value, arg: Value },
    VarArgs { slf: Value, args: Value },
    Keywords { slf: Value, args: Value, kwargs: Option<Value> },
    /// `argv` holds positional args followed by keyword values; `nargs` is
    /// the positional-only count a callee must use to find where the
    /// keyword values start (the five-argument FastCall C signature passes
    /// `nargs` separately from `argv`'s total length for exactly this
    /// reason).
    FastCall { slf: Value, argv: Vec<Value>, nargs: usize, kwnames: Option<Value> },
}

/// A native function installed from a slot table's methods array. Mirrors
/// a real extension function: it reports failure by returning `None` and
/// leaving an exception pending on `exc_state`, never by returning `Err`.
pub trait NativeCallable {
    fn flags(&self) -> MethFlags;

    fn call(&self, args: NativeArgs, heap: &mut DynHeap, handles: &mut HandleTable, exc_state: &mut ExceptionState) -> Option<HandleId>;
}

fn type_error(message: impl Into<String>) -> PyException {
    PyException::new(ExcType::TypeError, message.into())
}

fn out_of_memory() -> PyException {
    PyException::new(ExcType::MemoryError, None)
}

/// Builds a tuple heap object (object-array format) out of already-wrapped
/// values, as the `VarArgs`/`Keywords`/`FastCall` conventions need to box
/// positional args or keyword names into one.
fn build_tuple(heap: &mut DynHeap, layout_tuple: LayoutId, items: Vec<Value>) -> Result<Value, PyException> {
    let id = heap.allocate(ObjectFormat::ObjectArray, layout_tuple, HeapPayload::Slots(items)).ok_or_else(out_of_memory)?;
    Ok(Value::Heap(id))
}

/// Builds a dict heap object (an object-array of alternating key/value
/// slots, the simplest representation this layer needs — dict's own method
/// bodies are out of scope here) out of keyword arguments.
fn build_kwargs_dict(
    heap: &mut DynHeap,
    layout_dict: LayoutId,
    interns_get: &impl Fn(StringId) -> Value,
    keywords: &[(StringId, Value)],
) -> Result<Value, PyException> {
    let mut slots = Vec::with_capacity(keywords.len() * 2);
    for &(name, value) in keywords {
        slots.push(interns_get(name));
        slots.push(value);
    }
    build_tuple(heap, layout_dict, slots)
}

/// Arity/flag validation for each convention, run before any marshaling or
/// native invocation (§4.F step 1). Positional count includes `self`.
fn validate_arity(convention: Convention, call: &RawCall) -> Result<(), PyException> {
    match convention {
        Convention::NoArgs => {
            if call.positional.len() != 1 {
                return Err(type_error("takes no arguments"));
            }
            if !call.keywords.is_empty() {
                return Err(type_error("takes no keyword arguments"));
            }
        }
        Convention::OneArg => {
            if call.positional.len() != 2 {
                return Err(type_error("takes exactly one argument"));
            }
            if !call.keywords.is_empty() {
                return Err(type_error("takes no keyword arguments"));
            }
        }
        Convention::VarArgs => {
            if !call.keywords.is_empty() {
                return Err(type_error("takes no keyword arguments"));
            }
        }
        Convention::Keywords | Convention::FastCall => {}
    }
    Ok(())
}

/// Marshals a validated [`RawCall`] into the [`NativeArgs`] shape a given
/// convention expects, allocating a tuple/dict only when that convention
/// requires one (§4.F step 2).
fn marshal(
    convention: Convention,
    call: RawCall,
    heap: &mut DynHeap,
    layout_tuple: LayoutId,
    layout_dict: LayoutId,
    interns_get: &impl Fn(StringId) -> Value,
) -> Result<NativeArgs, PyException> {
    match convention {
        Convention::NoArgs => Ok(NativeArgs::NoArgs { slf: call.slf }),
        Convention::OneArg => {
            let arg = call.positional.into_iter().nth(1).expect("validated: exactly 2 positional");
            Ok(NativeArgs::OneArg { slf: call.slf, arg })
        }
        Convention::VarArgs => {
            let rest: Vec<Value> = call.positional.into_iter().skip(1).collect();
            let tuple = build_tuple(heap, layout_tuple, rest)?;
            Ok(NativeArgs::VarArgs { slf: call.slf, args: tuple })
        }
        Convention::Keywords => {
            let rest: Vec<Value> = call.positional.into_iter().skip(1).collect();
            let tuple = build_tuple(heap, layout_tuple, rest)?;
            let kwargs = if call.keywords.is_empty() {
                None
            } else {
                Some(build_kwargs_dict(heap, layout_dict, interns_get, &call.keywords)?)
            };
            Ok(NativeArgs::Keywords { slf: call.slf, args: tuple, kwargs })
        }
        Convention::FastCall => {
            let mut argv: Vec<Value> = call.positional.into_iter().skip(1).collect();
            let nargs = argv.len();
            let kwnames_values: Vec<Value> = call.keywords.iter().map(|&(name, _)| interns_get(name)).collect();
            argv.extend(call.keywords.iter().map(|&(_, v)| v));
            let kwnames = if kwnames_values.is_empty() { None } else { Some(build_tuple(heap, layout_tuple, kwnames_values)?) };
            Ok(NativeArgs::FastCall { slf: call.slf, argv, nargs, kwnames })
        }
    }
}

/// Every `Value::Heap` visible to the native side during this call. Members
/// of a freshly built tuple/dict are not wrapped individually: the callee
/// is handed the container as a first-class argument, and the container
/// itself is wrapped here.
fn visible_heap_values(args: &NativeArgs) -> Vec<Value> {
    match args {
        NativeArgs::NoArgs { slf } => vec![*slf],
        NativeArgs::OneArg { slf, arg } => vec![*slf, *arg],
        NativeArgs::VarArgs { slf, args } => vec![*slf, *args],
        NativeArgs::Keywords { slf, args, kwargs } => {
            let mut v = vec![*slf, *args];
            if let Some(k) = kwargs {
                v.push(*k);
            }
            v
        }
        NativeArgs::FastCall { slf, argv, kwnames, .. } => {
            let mut v = vec![*slf];
            v.extend(argv.iter().copied());
            if let Some(k) = kwnames {
                v.push(*k);
            }
            v
        }
    }
}

/// Runs the full trampoline pipeline (§4.F steps 1-5) for one call.
/// `layout_tuple`/`layout_dict` are the `LayoutId`s the slot-table builder
/// registered for the tuple/dict built-ins; `interns_get` resolves a
/// keyword's `StringId` to the string `Value` a dict/kwnames tuple stores.
#[allow(clippy::too_many_arguments)]
pub fn invoke(
    callable: &dyn NativeCallable,
    call: RawCall,
    heap: &mut DynHeap,
    handles: &mut HandleTable,
    exc_state: &mut ExceptionState,
    layout_tuple: LayoutId,
    layout_dict: LayoutId,
    interns_get: impl Fn(StringId) -> Value,
) -> Result<Value, PyException> {
    let convention = Convention::from_flags(callable.flags())?;
    validate_arity(convention, &call)?;
    let native_args = marshal(convention, call, heap, layout_tuple, layout_dict, &interns_get)?;

    let mut wrapped = Vec::new();
    for value in visible_heap_values(&native_args) {
        if let Value::Heap(id) = value {
            wrapped.push(handles.new_reference(id));
        }
    }

    let result = callable.call(native_args, heap, handles, exc_state);

    for id in &wrapped {
        handles.dispose(*id);
    }

    let handle = check_function_result(result, exc_state)?;
    let referent = handles.get(handle).referent();
    Ok(Value::Heap(referent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;
    use crate::tagged::LAYOUT_SMALL_INT;

    fn heap() -> DynHeap {
        DynHeap::new(Box::new(NoLimitTracker))
    }

    fn string_value(id: StringId) -> Value {
        Value::Heap(id.index() as u32)
    }

    struct Echo;

    impl NativeCallable for Echo {
        fn flags(&self) -> MethFlags {
            MethFlags::O
        }

        fn call(&self, args: NativeArgs, _heap: &mut DynHeap, handles: &mut HandleTable, _exc: &mut ExceptionState) -> Option<HandleId> {
            match args {
                NativeArgs::OneArg { arg: Value::Heap(id), .. } => Some(handles.new_reference(id)),
                _ => None,
            }
        }
    }

    struct AlwaysFails;

    impl NativeCallable for AlwaysFails {
        fn flags(&self) -> MethFlags {
            MethFlags::NOARGS
        }

        fn call(&self, _args: NativeArgs, _heap: &mut DynHeap, _handles: &mut HandleTable, exc: &mut ExceptionState) -> Option<HandleId> {
            exc.set_pending(PyException::new(ExcType::ValueError, "boom".to_owned()));
            None
        }
    }

    #[test]
    fn one_arg_convention_rejects_wrong_arity() {
        let mut h = heap();
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();
        let obj = h.allocate(ObjectFormat::DataInstance, LAYOUT_SMALL_INT, HeapPayload::Bytes(vec![])).unwrap();
        let call = RawCall { slf: Value::Heap(obj), positional: vec![Value::Heap(obj)], keywords: vec![] };
        let result = invoke(&Echo, call, &mut h, &mut handles, &mut exc, 10, 11, string_value);
        assert!(result.is_err());
    }

    #[test]
    fn one_arg_call_round_trips_handle_refcount() {
        let mut h = heap();
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();
        let slf = h.allocate(ObjectFormat::DataInstance, LAYOUT_SMALL_INT, HeapPayload::Bytes(vec![])).unwrap();
        let arg = h.allocate(ObjectFormat::DataInstance, LAYOUT_SMALL_INT, HeapPayload::Bytes(vec![])).unwrap();
        let pre_existing = handles.new_reference(arg);
        assert_eq!(handles.get(pre_existing).refcount(), 1);

        let call = RawCall { slf: Value::Heap(slf), positional: vec![Value::Heap(slf), Value::Heap(arg)], keywords: vec![] };
        let result = invoke(&Echo, call, &mut h, &mut handles, &mut exc, 10, 11, string_value).unwrap();
        assert_eq!(result, Value::Heap(arg));
        assert_eq!(handles.get(pre_existing).refcount(), 1);
    }

    #[test]
    fn failing_native_call_surfaces_pending_exception() {
        let mut h = heap();
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();
        let slf = h.allocate(ObjectFormat::DataInstance, LAYOUT_SMALL_INT, HeapPayload::Bytes(vec![])).unwrap();
        let call = RawCall { slf: Value::Heap(slf), positional: vec![Value::Heap(slf)], keywords: vec![] };
        let err = invoke(&AlwaysFails, call, &mut h, &mut handles, &mut exc, 10, 11, string_value).unwrap_err();
        assert_eq!(err.exc_type, ExcType::ValueError);
    }

    struct CheckFastCall;

    impl NativeCallable for CheckFastCall {
        fn flags(&self) -> MethFlags {
            MethFlags::FASTCALL | MethFlags::KEYWORDS
        }

        fn call(&self, args: NativeArgs, heap: &mut DynHeap, handles: &mut HandleTable, _exc: &mut ExceptionState) -> Option<HandleId> {
            match args {
                NativeArgs::FastCall { argv, nargs, kwnames: Some(Value::Heap(id)), .. } => {
                    assert_eq!(argv.len(), 3);
                    assert_eq!(nargs, 2);
                    assert_eq!(heap.get(id).slots().len(), 1);
                    let referent = heap.allocate(ObjectFormat::DataInstance, LAYOUT_SMALL_INT, HeapPayload::Bytes(vec![]))?;
                    Some(handles.new_reference(referent))
                }
                _ => None,
            }
        }
    }

    #[test]
    fn fastcall_with_keywords_marshals_trailing_names() {
        let mut h = heap();
        let mut handles = HandleTable::new();
        let mut exc = ExceptionState::new();
        let slf = h.allocate(ObjectFormat::DataInstance, LAYOUT_SMALL_INT, HeapPayload::Bytes(vec![])).unwrap();

        let call = RawCall {
            slf: Value::Heap(slf),
            positional: vec![Value::Heap(slf), Value::SmallInt(1), Value::SmallInt(2)],
            keywords: vec![(StringId::from_raw(9), Value::SmallInt(3))],
        };
        let result = invoke(&CheckFastCall, call, &mut h, &mut handles, &mut exc, 10, 11, string_value);
        assert!(result.is_ok());
    }
}
