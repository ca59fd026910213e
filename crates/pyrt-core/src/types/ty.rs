//! Type objects (component D).

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::error::{ExcType, PyException};
use crate::intern::StringId;
use crate::layout::{LayoutId, LayoutTable, TypeId};
use crate::tagged::Value;
use crate::types::mro::{c3_linearize, resolve_metaclass};

bitflags! {
    /// `subclass-of-X` bits propagate from bases via OR; `HEAP_TYPE`/`BASE_TYPE`
    /// and friends are set directly on the new type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        const SUBCLASS_INT    = 1 << 0;
        const SUBCLASS_STR    = 1 << 1;
        const SUBCLASS_LIST   = 1 << 2;
        const SUBCLASS_DICT   = 1 << 3;
        const SUBCLASS_TUPLE  = 1 << 4;
        const SUBCLASS_BYTES  = 1 << 5;
        /// Created dynamically (by a `class` statement or `type(...)` call)
        /// rather than baked in by the runtime at startup.
        const HEAP_TYPE       = 1 << 6;
        /// May be subclassed (the slot-table builder rejects bases lacking
        /// this flag — §4.G step 2).
        const BASE_TYPE       = 1 << 7;
        const HAVE_GC         = 1 << 8;
        const HAVE_FINALIZE   = 1 << 9;
    }
}

/// Native (C-extension) fields for a type built from a slot table (§4.G).
/// `None` for ordinary managed classes.
#[derive(Debug, Clone)]
pub struct NativeTypeData {
    pub basic_size: u32,
    pub item_size: u32,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub id: TypeId,
    pub name: StringId,
    pub module_name: Option<StringId>,
    pub qualname: StringId,
    /// Most derived to `object`, computed by C3 linearization.
    pub mro: Vec<TypeId>,
    pub bases: Vec<TypeId>,
    pub instance_layout: LayoutId,
    pub flags: TypeFlags,
    /// name -> descriptor/function/value, in declaration order.
    pub dict: IndexMap<StringId, Value>,
    pub builtin_base_layout: LayoutId,
    pub metaclass: TypeId,
    pub native: Option<NativeTypeData>,
}

impl Type {
    #[must_use]
    pub fn is_subtype_of(&self, other: TypeId) -> bool {
        self.mro.contains(&other)
    }
}

/// Owns every `Type`. Types live as long as any instance or reference
/// exists; in this crate that just means "as long as something holds its
/// `TypeId`" — an embedder building a long-lived runtime would additionally
/// root live types the same way it roots heap objects.
#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<Type>,
}

impl TypeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id as usize]
    }

    #[must_use]
    pub fn is_subtype(&self, child: TypeId, ancestor: TypeId) -> bool {
        self.get(child).is_subtype_of(ancestor)
    }

    /// Inserts a type whose MRO/flags/layout are already fully computed
    /// (used to bootstrap `object` and other builtin roots that have no
    /// bases to linearize).
    pub fn insert_builtin(&mut self, ty: Type) -> TypeId {
        let id = self.types.len() as TypeId;
        let mut ty = ty;
        ty.id = id;
        self.types.push(ty);
        id
    }

    /// `new_type(name, bases, dict, flags)` (§4.D). Computes the MRO via
    /// C3 linearization, propagates subclass-of-X flags from bases, and
    /// resolves the metaclass (for class-statement builds where
    /// `explicit_metaclass` may be given).
    #[allow(clippy::too_many_arguments)]
    pub fn new_type(
        &mut self,
        name: StringId,
        qualname: StringId,
        module_name: Option<StringId>,
        bases: Vec<TypeId>,
        explicit_metaclass: Option<TypeId>,
        dict: IndexMap<StringId, Value>,
        own_flags: TypeFlags,
        instance_layout: LayoutId,
        builtin_base_layout: LayoutId,
        layouts: &LayoutTable,
    ) -> Result<TypeId, PyException> {
        let _ = layouts;
        let base_mros: Vec<Vec<TypeId>> = bases.iter().map(|&b| self.get(b).mro.clone()).collect();
        let reserved_id = self.types.len() as TypeId;
        let mro = c3_linearize(reserved_id, &bases, &base_mros)?;

        let mut flags = own_flags;
        for &b in &bases {
            flags |= self.get(b).flags & (TypeFlags::SUBCLASS_INT
                | TypeFlags::SUBCLASS_STR
                | TypeFlags::SUBCLASS_LIST
                | TypeFlags::SUBCLASS_DICT
                | TypeFlags::SUBCLASS_TUPLE
                | TypeFlags::SUBCLASS_BYTES);
        }

        let base_metaclasses: Vec<TypeId> = bases.iter().map(|&b| self.get(b).metaclass).collect();
        let metaclass = resolve_metaclass(explicit_metaclass, &base_metaclasses, |a, b| self.is_subtype(a, b))?;

        let ty = Type {
            id: reserved_id,
            name,
            module_name,
            qualname,
            mro,
            bases,
            instance_layout,
            flags,
            dict,
            builtin_base_layout,
            metaclass,
            native: None,
        };
        self.types.push(ty);
        Ok(reserved_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutTable;

    fn make_object(table: &mut TypeTable) -> TypeId {
        table.insert_builtin(Type {
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

    #[test]
    fn new_type_inherits_subclass_flags() {
        let mut types = TypeTable::new();
        let layouts = LayoutTable::new();
        let object = make_object(&mut types);
        types.get_mut(object).flags |= TypeFlags::SUBCLASS_INT;

        let child = types
            .new_type(
                StringId::from_raw(1),
                StringId::from_raw(1),
                None,
                vec![object],
                None,
                IndexMap::new(),
                TypeFlags::HEAP_TYPE,
                0,
                0,
                &layouts,
            )
            .unwrap();

        assert!(types.get(child).flags.contains(TypeFlags::SUBCLASS_INT));
        assert!(types.get(child).flags.contains(TypeFlags::HEAP_TYPE));
        assert_eq!(*types.get(child).mro.last().unwrap(), object);
    }
}
