//! Layout system (component C): the hidden-class DAG that gives O(1)
//! amortized attribute lookup.
//!
//! A [`Layout`] describes one instance shape. Layouts form a persistent DAG:
//! adding attribute `n` to `L` always reaches the same `L'` no matter how
//! many times or from how many instances it's taken (L1/L2 below), and
//! in-object attribute offsets never move once assigned so that inline
//! caches which saw an earlier (non-tombstoned) layout stay valid (L3).
//!
//! Per the design notes, edge maps are small linearly-scanned arrays keyed
//! by interned-name identity rather than hash maps — real programs produce
//! only a handful of distinct successor shapes per layout.

use crate::intern::StringId;

pub type LayoutId = u32;
pub type TypeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrLocation {
    InObject,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    pub offset: u16,
    pub location: AttrLocation,
    /// `false` for slot-table members declared read-only (`READONLY`) or
    /// immutable-by-construction fields.
    pub mutable: bool,
    pub read_only: bool,
    /// In-object attributes are tombstoned rather than physically removed
    /// on delete, so their offset stays reserved (L3). Tombstoned entries
    /// are skipped by lookup and iteration but still occupy a slot.
    pub tombstoned: bool,
}

impl AttributeInfo {
    #[must_use]
    fn new_in_object(offset: u16, read_only: bool) -> Self {
        Self { offset, location: AttrLocation::InObject, mutable: !read_only, read_only, tombstoned: false }
    }

    #[must_use]
    fn new_overflow(offset: u16) -> Self {
        Self { offset, location: AttrLocation::Overflow, mutable: true, read_only: false, tombstoned: false }
    }
}

/// Result of a successful attribute lookup: where to find the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSlot {
    pub offset: u16,
    pub location: AttrLocation,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub id: LayoutId,
    pub owning_type: TypeId,
    in_object: Vec<(StringId, AttributeInfo)>,
    overflow: Vec<(StringId, AttributeInfo)>,
    additions: Vec<(StringId, LayoutId)>,
    deletions: Vec<(StringId, LayoutId)>,
}

impl Layout {
    /// Number of in-object attribute slots, tombstoned or not — this is the
    /// instance's fixed allocation size contribution from attributes (plus
    /// one more slot if `has_overflow_slot` is true).
    #[must_use]
    pub fn in_object_count(&self) -> usize {
        self.in_object.len()
    }

    #[must_use]
    pub fn has_overflow_slot(&self) -> bool {
        !self.overflow.is_empty()
    }

    /// Attribute lookup (§4.C step 1-3): in-object first, then overflow,
    /// skipping tombstoned entries.
    #[must_use]
    pub fn lookup(&self, name: StringId) -> Option<AttrSlot> {
        for (n, info) in &self.in_object {
            if *n == name && !info.tombstoned {
                return Some(AttrSlot { offset: info.offset, location: info.location, read_only: info.read_only });
            }
        }
        for (n, info) in &self.overflow {
            if *n == name {
                return Some(AttrSlot { offset: info.offset, location: info.location, read_only: info.read_only });
            }
        }
        None
    }

    /// Attribute names currently visible (skips tombstoned in-object
    /// slots), in declaration order: in-object then overflow.
    pub fn attribute_names(&self) -> impl Iterator<Item = StringId> + '_ {
        self.in_object
            .iter()
            .filter(|(_, info)| !info.tombstoned)
            .chain(self.overflow.iter())
            .map(|(n, _)| *n)
    }
}

/// Owns every [`Layout`] ever created; layouts are immortal (L4) and
/// referenced everywhere else by [`LayoutId`].
#[derive(Debug, Default)]
pub struct LayoutTable {
    layouts: Vec<Layout>,
}

impl LayoutTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: LayoutId) -> &Layout {
        &self.layouts[id as usize]
    }

    /// Creates a fresh root layout (e.g. the builtin base's root, or a new
    /// type's instance layout per §4.D) with a fixed set of in-object
    /// attributes declared up front (native members from a slot table, each
    /// paired with whether it's read-only) and no overflow attributes yet.
    pub fn new_root(&mut self, owning_type: TypeId, fixed_in_object: &[(StringId, bool)]) -> LayoutId {
        let id = self.layouts.len() as LayoutId;
        let in_object = fixed_in_object
            .iter()
            .enumerate()
            .map(|(i, &(name, read_only))| (name, AttributeInfo::new_in_object(i as u16, read_only)))
            .collect();
        self.layouts.push(Layout { id, owning_type, in_object, overflow: Vec::new(), additions: Vec::new(), deletions: Vec::new() });
        id
    }

    /// §4.C attribute set transition: `L' = L.additions[n]` if present,
    /// otherwise a new layout with `n` appended to the overflow list.
    /// Guarantees L1 (DAG sharing) and L2.
    pub fn add_attribute(&mut self, layout_id: LayoutId, name: StringId) -> LayoutId {
        if let Some(&(_, existing)) = self.get(layout_id).additions.iter().find(|(n, _)| *n == name) {
            return existing;
        }
        let base = self.get(layout_id).clone();
        let overflow_offset = base.overflow.len() as u16;
        let mut new_overflow = base.overflow.clone();
        new_overflow.push((name, AttributeInfo::new_overflow(overflow_offset)));

        let new_id = self.layouts.len() as LayoutId;
        self.layouts.push(Layout {
            id: new_id,
            owning_type: base.owning_type,
            in_object: base.in_object.clone(),
            overflow: new_overflow,
            additions: Vec::new(),
            deletions: Vec::new(),
        });
        self.layouts[layout_id as usize].additions.push((name, new_id));
        new_id
    }

    /// §4.C attribute delete transition. In-object attributes are
    /// tombstoned in place (offsets preserved, L3); overflow attributes are
    /// compacted (subsequent entries shift down by one offset).
    pub fn delete_attribute(&mut self, layout_id: LayoutId, name: StringId) -> Option<LayoutId> {
        if let Some(&(_, existing)) = self.get(layout_id).deletions.iter().find(|(n, _)| *n == name) {
            return Some(existing);
        }
        let base = self.get(layout_id).clone();

        if let Some(pos) = base.in_object.iter().position(|(n, info)| *n == name && !info.tombstoned) {
            let mut new_in_object = base.in_object.clone();
            new_in_object[pos].1.tombstoned = true;
            let new_id = self.layouts.len() as LayoutId;
            self.layouts.push(Layout {
                id: new_id,
                owning_type: base.owning_type,
                in_object: new_in_object,
                overflow: base.overflow.clone(),
                additions: Vec::new(),
                deletions: Vec::new(),
            });
            self.layouts[layout_id as usize].deletions.push((name, new_id));
            return Some(new_id);
        }

        if let Some(pos) = base.overflow.iter().position(|(n, _)| *n == name) {
            let mut new_overflow = base.overflow.clone();
            new_overflow.remove(pos);
            for (_, info) in new_overflow.iter_mut().skip(pos) {
                info.offset -= 1;
            }
            let new_id = self.layouts.len() as LayoutId;
            self.layouts.push(Layout {
                id: new_id,
                owning_type: base.owning_type,
                in_object: base.in_object.clone(),
                overflow: new_overflow,
                additions: Vec::new(),
                deletions: Vec::new(),
            });
            self.layouts[layout_id as usize].deletions.push((name, new_id));
            return Some(new_id);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism_same_sequence_same_layout() {
        let mut table = LayoutTable::new();
        let root = table.new_root(0, &[]);
        let x = StringId::from_raw(1);
        let y = StringId::from_raw(2);

        let l1 = table.add_attribute(root, x);
        let l1b = table.add_attribute(l1, y);

        let l2 = table.add_attribute(root, x);
        let l2b = table.add_attribute(l2, y);

        assert_eq!(l1, l2);
        assert_eq!(l1b, l2b);
    }

    #[test]
    fn dag_sharing_repeat_add_is_identity() {
        let mut table = LayoutTable::new();
        let root = table.new_root(0, &[]);
        let x = StringId::from_raw(1);
        let once = table.add_attribute(root, x);
        let twice = table.add_attribute(once, x);
        assert_eq!(once, twice);
    }

    #[test]
    fn add_then_delete_round_trips() {
        let mut table = LayoutTable::new();
        let root = table.new_root(0, &[]);
        let x = StringId::from_raw(1);
        let added = table.add_attribute(root, x);
        let deleted = table.delete_attribute(added, x).unwrap();
        assert!(table.get(deleted).lookup(x).is_none());
        let root_names: Vec<_> = table.get(root).attribute_names().collect();
        let deleted_names: Vec<_> = table.get(deleted).attribute_names().collect();
        assert_eq!(root_names, deleted_names);
    }

    #[test]
    fn in_object_delete_tombstones_not_removes() {
        let mut table = LayoutTable::new();
        let x = StringId::from_raw(1);
        let root = table.new_root(0, &[(x, false)]);
        let deleted = table.delete_attribute(root, x).unwrap();
        assert!(table.get(deleted).lookup(x).is_none());
        assert_eq!(table.get(deleted).in_object_count(), 1);
    }

    #[test]
    fn read_only_in_object_member_reports_read_only_on_lookup() {
        let mut table = LayoutTable::new();
        let x = StringId::from_raw(1);
        let y = StringId::from_raw(2);
        let root = table.new_root(0, &[(x, true), (y, false)]);
        assert!(table.get(root).lookup(x).unwrap().read_only);
        assert!(!table.get(root).lookup(y).unwrap().read_only);
    }

    #[test]
    fn overflow_delete_compacts_offsets() {
        let mut table = LayoutTable::new();
        let root = table.new_root(0, &[]);
        let a = StringId::from_raw(1);
        let b = StringId::from_raw(2);
        let with_a = table.add_attribute(root, a);
        let with_ab = table.add_attribute(with_a, b);
        let removed_a = table.delete_attribute(with_ab, a).unwrap();
        let slot = table.get(removed_a).lookup(b).unwrap();
        assert_eq!(slot.offset, 0);
    }
}
