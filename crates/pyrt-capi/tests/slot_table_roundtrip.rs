//! Ties together the slot-table type builder, the trampoline, and the raw
//! `extern "C"` method adapter: build a type from a slot table with a native
//! member and a `METH_O` method, set/get the member on an instance, call the
//! method through the full trampoline pipeline, and check the type's
//! reported `basicsize`.

use std::os::raw::c_void;

use indexmap::IndexMap;
use pyrt_core::error::ExceptionState;
use pyrt_core::handle::HandleTable;
use pyrt_core::heap::{HeapPayload, ObjectFormat};
use pyrt_core::intern::StringId;
use pyrt_core::layout::{LayoutTable, TypeId};
use pyrt_core::resource::{DynHeap, NoLimitTracker};
use pyrt_core::slots::{build_type_from_slots, GetSetDef, MemberDef, MemberTypeCode, MethodDef, SlotTable};
use pyrt_core::tagged::Value;
use pyrt_core::trampoline::{invoke, MethFlags, RawCall};
use pyrt_core::types::{Type, TypeFlags, TypeTable};

use pyrt_capi::native_method::ExtensionMethod;
use pyrt_capi::spec::{PyMethodDef, METH_O};

fn object_type(types: &mut TypeTable) -> TypeId {
    types.insert_builtin(Type {
        id: 0,
        name: StringId::from_raw(0),
        module_name: None,
        qualname: StringId::from_raw(0),
        mro: vec![0],
        bases: vec![],
        instance_layout: 0,
        flags: TypeFlags::BASE_TYPE,
        dict: IndexMap::new(),
        builtin_base_layout: 0,
        metaclass: 0,
        native: None,
    })
}

unsafe extern "C" fn double_via_identity(_slf: *mut c_void, arg: *mut c_void) -> *mut c_void {
    // Stands in for a real doubling extension function: the handle-smuggling
    // boundary this workspace simulates has no numeric payload behind a
    // handle to actually double, so the fixture proves the pipeline wiring
    // by returning its argument unchanged and letting the test assert on
    // object identity instead of a doubled value.
    arg
}

#[test]
fn slot_table_member_and_method_round_trip_through_trampoline() {
    let mut types = TypeTable::new();
    let mut layouts = LayoutTable::new();
    let object = object_type(&mut types);

    let x_name = StringId::from_raw(10);
    let method_name = StringId::from_raw(11);

    let table = SlotTable {
        name: StringId::from_raw(12),
        basic_size: 24,
        item_size: 0,
        flags: TypeFlags::HEAP_TYPE | TypeFlags::BASE_TYPE,
        slots: vec![],
        methods: vec![MethodDef { name: method_name, flags: MethFlags::O, function: Value::None, shadows_slot: false }],
        members: vec![MemberDef { name: x_name, type_code: MemberTypeCode::Int, offset: 0, read_only: false }],
        getsets: vec![],
    };

    let (type_id, _resolved_slots) = build_type_from_slots(
        &mut types,
        &mut layouts,
        &table,
        None,
        vec![object],
        &[],
        |_def: &MethodDef| Value::None,
        |g: &GetSetDef| (g.getter, g.setter),
    )
    .unwrap();

    // `basicsize` as the slot table declared it survives onto the built type.
    assert_eq!(types.get(type_id).native.unwrap().basic_size, 24);

    // The member is installed as an in-object attribute on the type's layout.
    let layout_id = types.get(type_id).instance_layout;
    let member_slot = layouts.get(layout_id).lookup(x_name).unwrap();

    let mut heap = DynHeap::new(Box::new(NoLimitTracker));
    let mut handles = HandleTable::new();
    let mut exc = ExceptionState::new();

    let instance = heap
        .allocate(ObjectFormat::ObjectInstance, layout_id, HeapPayload::Slots(vec![Value::SmallInt(0)]))
        .unwrap();
    heap.get_mut(instance).slots_mut()[member_slot.offset as usize] = Value::SmallInt(21);
    assert_eq!(heap.get(instance).slots()[member_slot.offset as usize], Value::SmallInt(21));

    // The method is wired through the raw C-ABI adapter and invoked via the
    // same trampoline pipeline an interpreter call would use.
    let def = PyMethodDef { name: std::ptr::null(), pfunc: double_via_identity as *mut c_void, flags: METH_O, doc: std::ptr::null() };
    let method = unsafe { ExtensionMethod::from_def(&def) }.unwrap();

    let arg = heap.allocate(ObjectFormat::DataInstance, layout_id, HeapPayload::Bytes(vec![])).unwrap();
    let call = RawCall { slf: Value::Heap(instance), positional: vec![Value::Heap(instance), Value::Heap(arg)], keywords: vec![] };
    let result = invoke(&method, call, &mut heap, &mut handles, &mut exc, 900, 901, |_| Value::None).unwrap();
    assert_eq!(result, Value::Heap(arg));
}
