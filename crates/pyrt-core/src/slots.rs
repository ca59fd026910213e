//! Slot-table type builder (component G): turns an extension's descriptor
//! table into a [`crate::types::Type`] with members, getsets, and methods
//! installed the way the embedding surface's slot-inheritance rules
//! require.

use indexmap::IndexMap;

use crate::error::{ExcType, PyException};
use crate::intern::StringId;
use crate::layout::{LayoutTable, TypeId};
use crate::tagged::Value;
use crate::trampoline::MethFlags;
use crate::types::{NativeTypeData, Type, TypeFlags, TypeTable};

/// One `Py_tp_*`/`Py_nb_*`/`Py_sq_*`/`Py_mp_*`/`Py_am_*` slot id. The id
/// namespace is flat and partitioned by range the way `PyType_Slot.slot`
/// is in the embedding surface (§6); only the groups inheritance actually
/// distinguishes are named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    TpNew,
    TpInit,
    TpDealloc,
    TpAlloc,
    TpFree,
    TpRepr,
    TpStr,
    TpHash,
    TpCall,
    TpGetattro,
    TpGetattr,
    TpSetattro,
    TpSetattr,
    TpRichcompare,
    TpIter,
    TpIternext,
    TpDescrGet,
    TpDescrSet,
    TpDel,
    TpFinalize,
    TpTraverse,
    TpClear,
    /// Catch-all for the number/sequence/mapping/async sub-slot groups: the
    /// group tag decides how inheritance shadowing behaves, the `u16`
    /// distinguishes individual slots within a group for storage purposes
    /// only (this crate does not implement arithmetic/protocol dispatch).
    NumberProtocol(u16),
    SequenceProtocol(u16),
    MappingProtocol(u16),
    AsyncProtocol(u16),
}

impl SlotId {
    /// The "dunder group" this slot belongs to for shadowing purposes
    /// (§4.G step 3): defining any slot in a subclass's same group
    /// suppresses inheritance of every slot in that group from the base,
    /// except the two explicitly-paired groups handled separately
    /// (`tp_richcompare`+`tp_hash`).
    fn group(self) -> SlotGroup {
        match self {
            SlotId::TpGetattro | SlotId::TpGetattr => SlotGroup::Getattr,
            SlotId::TpSetattro | SlotId::TpSetattr => SlotGroup::Setattr,
            SlotId::NumberProtocol(_) => SlotGroup::Number,
            SlotId::SequenceProtocol(_) => SlotGroup::Sequence,
            SlotId::MappingProtocol(_) => SlotGroup::Mapping,
            SlotId::AsyncProtocol(_) => SlotGroup::Async,
            other => SlotGroup::Singleton(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SlotGroup {
    Getattr,
    Setattr,
    Number,
    Sequence,
    Mapping,
    Async,
    Singleton(SlotId),
}

/// A positive slot id from a real extension that this builder doesn't
/// recognize is silently ignored (§4.G step 6); `pfunc` stands in for an
/// opaque native function pointer, which this crate never calls directly
/// (only the trampoline layer invokes native code, and only through
/// [`crate::trampoline::NativeCallable`]).
pub struct Slot {
    pub id: SlotId,
    pub pfunc: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberTypeCode {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Read-only; a null field reads as `None`.
    String,
    /// `T_OBJECT`: a null field reads as `None`.
    Object,
    /// `T_OBJECT_EX`: a null field raises `AttributeError` on read.
    ObjectEx,
}

pub struct MemberDef {
    pub name: StringId,
    pub type_code: MemberTypeCode,
    pub offset: u16,
    pub read_only: bool,
}

pub struct GetSetDef {
    pub name: StringId,
    pub getter: Value,
    pub setter: Option<Value>,
}

pub struct MethodDef {
    pub name: StringId,
    pub flags: MethFlags,
    pub function: Value,
    /// Set when `name` shadows a slot the same table also defines
    /// (`__add__`, `__new__`, …): by default such entries are dropped
    /// (§4.G step 5) unless `METH_COEXIST` is set.
    pub shadows_slot: bool,
}

pub struct SlotTable {
    pub name: StringId,
    pub basic_size: u32,
    pub item_size: u32,
    pub flags: TypeFlags,
    pub slots: Vec<Slot>,
    pub methods: Vec<MethodDef>,
    pub members: Vec<MemberDef>,
    pub getsets: Vec<GetSetDef>,
}

fn slot_error(id: i64) -> Option<PyException> {
    if id < 0 {
        Some(PyException::new(ExcType::RuntimeError, format!("negative slot id {id} is invalid")))
    } else {
        None
    }
}

/// Validates a methods table entry before installation (§4.G step 6): a
/// method declaring both `METH_CLASS` and `METH_STATIC` is a `ValueError`.
fn validate_method(def: &MethodDef) -> Result<(), PyException> {
    if def.flags.contains(MethFlags::CLASS) && def.flags.contains(MethFlags::STATIC) {
        return Err(PyException::new(ExcType::ValueError, "method cannot be both a classmethod and a staticmethod".to_owned()));
    }
    Ok(())
}

/// Looks up a named slot's own definition within one table (not inherited).
fn own_slot(table: &SlotTable, id: SlotId) -> Option<Value> {
    table.slots.iter().find(|s| s.id == id).and_then(|s| s.pfunc)
}

/// Whether `table` defines *any* slot sharing `group`'s shadowing class,
/// which per §4.G step 3 suppresses inheriting every slot in that group
/// from a base even if this table only overrides one of them.
fn table_defines_group(table: &SlotTable, group: SlotGroup) -> bool {
    table.slots.iter().any(|s| s.id.group() == group)
}

/// Computes the resolved slot set for a new type (§4.G step 3). `bases`
/// must be given most-derived-first is not required here: each base's own
/// already-resolved slots (from when *it* was built) are consulted in the
/// order given, and the first one found wins.
pub fn resolve_slots(table: &SlotTable, base_slot_sets: &[&IndexMap<SlotKey, Value>]) -> Result<IndexMap<SlotKey, Value>, PyException> {
    for slot in &table.slots {
        if let Some(id) = negative_id_of(slot) {
            if let Some(err) = slot_error(id) {
                return Err(err);
            }
        }
    }

    let mut resolved = IndexMap::new();

    let recognized: Vec<SlotId> = ALL_TRACKED_SLOTS.to_vec();
    for &id in &recognized {
        if let Some(pfunc) = own_slot(table, id) {
            resolved.insert(SlotKey(id), pfunc);
            continue;
        }
        if table_defines_group(table, id.group()) {
            // A sibling slot in the same shadowing group is defined locally;
            // this slot's inheritance is suppressed.
            continue;
        }
        for base in base_slot_sets {
            if let Some(&v) = base.get(&SlotKey(id)) {
                resolved.insert(SlotKey(id), v);
                break;
            }
        }
    }

    // tp_richcompare + tp_hash inherit together: if the subclass defines
    // either, neither is inherited from a base.
    let defines_compare_or_hash = own_slot(table, SlotId::TpRichcompare).is_some() || own_slot(table, SlotId::TpHash).is_some();
    if defines_compare_or_hash {
        resolved.shift_remove(&SlotKey(SlotId::TpRichcompare));
        resolved.shift_remove(&SlotKey(SlotId::TpHash));
        if let Some(v) = own_slot(table, SlotId::TpRichcompare) {
            resolved.insert(SlotKey(SlotId::TpRichcompare), v);
        }
        if let Some(v) = own_slot(table, SlotId::TpHash) {
            resolved.insert(SlotKey(SlotId::TpHash), v);
        }
    }

    // tp_finalize is inherited regardless of HAVE_FINALIZE on the subclass.
    if own_slot(table, SlotId::TpFinalize).is_none() {
        for base in base_slot_sets {
            if let Some(&v) = base.get(&SlotKey(SlotId::TpFinalize)) {
                resolved.insert(SlotKey(SlotId::TpFinalize), v);
                break;
            }
        }
    }

    Ok(resolved)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey(SlotId);

const ALL_TRACKED_SLOTS: &[SlotId] = &[
    SlotId::TpNew,
    SlotId::TpInit,
    SlotId::TpDealloc,
    SlotId::TpAlloc,
    SlotId::TpFree,
    SlotId::TpRepr,
    SlotId::TpStr,
    SlotId::TpCall,
    SlotId::TpGetattro,
    SlotId::TpGetattr,
    SlotId::TpSetattro,
    SlotId::TpSetattr,
    SlotId::TpIter,
    SlotId::TpIternext,
    SlotId::TpDescrGet,
    SlotId::TpDescrSet,
    SlotId::TpDel,
    SlotId::TpTraverse,
    SlotId::TpClear,
];

fn negative_id_of(slot: &Slot) -> Option<i64> {
    match slot.id {
        SlotId::NumberProtocol(n) | SlotId::SequenceProtocol(n) | SlotId::MappingProtocol(n) | SlotId::AsyncProtocol(n) => {
            if n >= 0x8000 {
                Some(n as i64 - 0x1_0000)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `tp_free`'s inheritance depends on both sides agreeing on `HAVE_GC`
/// (§4.G step 3); otherwise the appropriate default is installed by the
/// caller instead of the inherited value.
#[must_use]
pub fn tp_free_is_inheritable(base_flags: TypeFlags, subclass_flags: TypeFlags) -> bool {
    base_flags.contains(TypeFlags::HAVE_GC) == subclass_flags.contains(TypeFlags::HAVE_GC)
}

/// Builds a new [`Type`] from a slot table (§4.G), installing members as
/// in-object attributes, getsets as data descriptors, and methods as
/// function-valued dict entries (the actual function objects and their
/// trampoline wiring are the caller's job — this builder only decides
/// *which* slot/method table entries survive and at what offsets).
#[allow(clippy::too_many_arguments)]
pub fn build_type_from_slots(
    types: &mut TypeTable,
    layouts: &mut LayoutTable,
    table: &SlotTable,
    module_name: Option<StringId>,
    bases: Vec<TypeId>,
    base_slot_sets: &[&IndexMap<SlotKey, Value>],
    function_values: impl Fn(&MethodDef) -> Value,
    getset_values: impl Fn(&GetSetDef) -> (Value, Option<Value>),
) -> Result<(TypeId, IndexMap<SlotKey, Value>), PyException> {
    for &base in &bases {
        if !types.get(base).flags.contains(TypeFlags::BASE_TYPE) {
            return Err(PyException::new(ExcType::TypeError, "base type is not an acceptable base type".to_owned()));
        }
    }

    for def in &table.methods {
        validate_method(def)?;
    }

    let resolved_slots = resolve_slots(table, base_slot_sets)?;

    // `Layout` assigns its own sequential in-object offsets (there is no raw
    // struct memory behind it to respect a `MemberDef.offset` byte offset
    // against); only read-only-ness is real attribute-level information this
    // builder must not drop.
    let member_names: Vec<(StringId, bool)> = table.members.iter().map(|m| (m.name, m.read_only)).collect();
    let builtin_base_layout = bases.first().map(|&b| types.get(b).instance_layout).unwrap_or(0);
    let instance_layout = layouts.new_root(0, &member_names);

    let mut dict = IndexMap::new();
    for getset in &table.getsets {
        let (getter, setter) = getset_values(getset);
        dict.insert(getset.name, getter);
        if let Some(setter) = setter {
            dict.insert(getset.name, setter);
        }
    }

    // Slot-named dunder methods in the methods table are ignored unless
    // COEXIST is set (§4.G step 5): a coexisting entry wins at the Python
    // name level while the slot keeps the slot-table's own value (already
    // captured in `resolved_slots` above, independent of `dict`).
    for def in &table.methods {
        if def.shadows_slot && !def.flags.contains(MethFlags::COEXIST) {
            continue;
        }
        dict.insert(def.name, function_values(def));
    }

    let native = NativeTypeData { basic_size: table.basic_size, item_size: table.item_size };

    let id = types.new_type(
        table.name,
        table.name,
        module_name,
        bases,
        None,
        dict,
        table.flags,
        instance_layout,
        builtin_base_layout,
        layouts,
    )?;
    types.get_mut(id).native = Some(native);
    layouts.get(instance_layout);

    Ok((id, resolved_slots))
}
