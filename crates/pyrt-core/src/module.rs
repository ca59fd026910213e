//! Module globals + inline-cache invalidation (component H).
//!
//! A module dict maps `name -> ValueCell`. Reads and writes go through the
//! cell so that a function's cached reference to a name sees writes to it
//! atomically; the interesting part is the invalidation protocol that keeps
//! caches coherent when a module starts (or stops) shadowing a name that
//! used to fall through to the builtins module.
//!
//! `Module` never stores a pointer back to its builtins module (every other
//! multi-object structure in this crate — [`crate::layout::LayoutTable`],
//! [`crate::types::TypeTable`] — resolves cross-references by id through an
//! owning table rather than a self-reference, and modules are no different:
//! the embedder's module registry owns both and passes the builtins module
//! in explicitly to the handful of operations that need it).

use ahash::AHashMap;

use crate::intern::StringId;
use crate::tagged::Value;

/// Identifies one cache site: which function's cache slot, and which index
/// within it (a function may cache more than one global load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheSite {
    pub function: u32,
    pub cache_index: u32,
}

/// A one-slot mutable box, optionally shadowing the builtins module's cell
/// of the same name, with a list of cache sites that currently hold a
/// direct reference to it.
#[derive(Debug, Default)]
pub struct ValueCell {
    /// `None` means `placeholder` (§3 ValueCell): the name is reserved to
    /// shadow a builtins entry but no value has been assigned here yet, so
    /// lookups still fall through to builtins.
    value: Option<Value>,
    dependents: Vec<CacheSite>,
}

impl ValueCell {
    #[must_use]
    pub fn placeholder() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(value: Value) -> Self {
        Self { value: Some(value), dependents: Vec::new() }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.value.is_none()
    }

    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.value
    }

    pub fn attach_dependent(&mut self, site: CacheSite) {
        if !self.dependents.contains(&site) {
            self.dependents.push(site);
        }
    }

    /// Invalidation: tells every attached cache site to drop this cell
    /// (§4.H), then clears the dependent list — a cache site that sees its
    /// slot nulled re-resolves on its next lookup, reattaching if still
    /// relevant.
    fn invalidate(&mut self, on_invalidate: &mut dyn FnMut(CacheSite)) {
        for &site in &self.dependents {
            on_invalidate(site);
        }
        self.dependents.clear();
    }
}

/// A name-keyed mapping of `str -> ValueCell`.
#[derive(Debug, Default)]
pub struct Module {
    name: StringId,
    cells: AHashMap<StringId, ValueCell>,
    /// Declaration order, so iteration/`len` can skip placeholders in a
    /// stable order rather than hash-map order.
    order: Vec<StringId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOwner {
    Own,
    Builtins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteError {
    NotFound,
}

impl Module {
    #[must_use]
    pub fn new(name: StringId) -> Self {
        Self { name, cells: AHashMap::new(), order: Vec::new() }
    }

    #[must_use]
    pub fn module_name(&self) -> StringId {
        self.name
    }

    /// A plain read: this module's own real cell if present, else falls
    /// through to `builtins` (pass `None` for the builtins module itself).
    #[must_use]
    pub fn get(&self, name: StringId, builtins: Option<&Module>) -> Option<Value> {
        match self.cells.get(&name) {
            Some(cell) if !cell.is_placeholder() => cell.get(),
            _ => builtins.and_then(|b| b.get(name, None)),
        }
    }

    /// Resolves a global load for cache attachment: which module's cell
    /// `name` currently binds to, so the caller can store that reference in
    /// a function's cache slot and link the cache site onto it via
    /// [`Module::attach_dependent`]/[`Module::attach_dependent_on_builtins`].
    #[must_use]
    pub fn resolve_for_cache(&self, name: StringId, builtins: Option<&Module>) -> Option<CellOwner> {
        match self.cells.get(&name) {
            Some(cell) if !cell.is_placeholder() => Some(CellOwner::Own),
            _ if builtins.is_some_and(|b| b.cells.contains_key(&name)) => Some(CellOwner::Builtins),
            _ => None,
        }
    }

    fn cell_entry(&mut self, name: StringId) -> &mut ValueCell {
        if !self.cells.contains_key(&name) {
            self.order.push(name);
        }
        self.cells.entry(name).or_insert_with(ValueCell::placeholder)
    }

    pub fn attach_dependent(&mut self, name: StringId, site: CacheSite) {
        self.cell_entry(name).attach_dependent(site);
    }

    pub fn attach_dependent_on_builtins(builtins: &mut Module, name: StringId, site: CacheSite) {
        builtins.cell_entry(name).attach_dependent(site);
    }

    /// `module.name = value` (§4.H). Implements the three-way distinction:
    /// - name absent or a placeholder here, and `builtins` has a real cell
    ///   of the same name: this is a shadowing write. `builtins`'s own
    ///   dependents (the cache sites that previously resolved through to
    ///   it) are invalidated, not this module's.
    /// - name already holds a real value here: replace in place, no
    ///   invalidation (existing cache sites still see the same cell).
    /// - neither holds the name: a fresh real cell, nothing to invalidate.
    ///
    /// Returns the number of dependent cache sites invalidated (scenario S2
    /// observes this count).
    pub fn set(&mut self, name: StringId, value: Value, builtins: Option<&mut Module>, mut on_invalidate: impl FnMut(CacheSite)) -> usize {
        let was_placeholder_or_absent = match self.cells.get(&name) {
            Some(cell) => cell.is_placeholder(),
            None => true,
        };
        let shadows_builtins = was_placeholder_or_absent && builtins.as_ref().is_some_and(|b| b.cells.contains_key(&name));

        self.cell_entry(name).value = Some(value);

        if !shadows_builtins {
            return 0;
        }
        let Some(builtins) = builtins else { return 0 };
        let Some(builtins_cell) = builtins.cells.get_mut(&name) else { return 0 };
        let invalidated = builtins_cell.dependents.len();
        builtins_cell.invalidate(&mut on_invalidate);
        invalidated
    }

    /// `del module.name` (§4.H): invalidates this cell's own dependents,
    /// then removes it entirely (not tombstoned — a later `set` creates a
    /// fresh cell with an empty dependent list).
    pub fn delete(&mut self, name: StringId, mut on_invalidate: impl FnMut(CacheSite)) -> Result<(), DeleteError> {
        let Some(mut cell) = self.cells.remove(&name) else {
            return Err(DeleteError::NotFound);
        };
        cell.invalidate(&mut on_invalidate);
        self.order.retain(|&n| n != name);
        Ok(())
    }

    /// Names currently visible (skips placeholders), in insertion order —
    /// the iteration contract `len`/key iteration both rely on.
    pub fn names(&self) -> impl Iterator<Item = StringId> + '_ {
        self.order.iter().copied().filter(move |n| self.cells.get(n).is_some_and(|c| !c.is_placeholder()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: u32) -> StringId {
        StringId::from_raw(n)
    }

    #[test]
    fn plain_write_then_read() {
        let mut m = Module::new(name(0));
        m.set(name(1), Value::SmallInt(7), None, |_| {});
        assert_eq!(m.get(name(1), None), Some(Value::SmallInt(7)));
    }

    #[test]
    fn read_falls_through_to_builtins() {
        let mut builtins = Module::new(name(0));
        builtins.set(name(10), Value::SmallInt(3), None, |_| {});
        let m = Module::new(name(1));
        assert_eq!(m.get(name(10), Some(&builtins)), Some(Value::SmallInt(3)));
    }

    #[test]
    fn shadowing_write_invalidates_builtins_dependents_only() {
        let mut builtins = Module::new(name(0));
        builtins.set(name(10), Value::SmallInt(3), None, |_| {});
        let mut m = Module::new(name(1));

        let site = CacheSite { function: 1, cache_index: 0 };
        let owner = m.resolve_for_cache(name(10), Some(&builtins)).unwrap();
        assert_eq!(owner, CellOwner::Builtins);
        Module::attach_dependent_on_builtins(&mut builtins, name(10), site);

        let mut invalidated = Vec::new();
        let count = m.set(name(10), Value::SmallInt(99), Some(&mut builtins), |s| invalidated.push(s));
        assert_eq!(count, 1);
        assert_eq!(invalidated, vec![site]);
        assert_eq!(m.get(name(10), Some(&builtins)), Some(Value::SmallInt(99)));
    }

    #[test]
    fn write_to_existing_real_value_does_not_invalidate() {
        let mut m = Module::new(name(0));
        m.set(name(1), Value::SmallInt(1), None, |_| {});
        let site = CacheSite { function: 1, cache_index: 0 };
        m.attach_dependent(name(1), site);

        let mut invalidated = Vec::new();
        let count = m.set(name(1), Value::SmallInt(2), None, |s| invalidated.push(s));
        assert_eq!(count, 0);
        assert!(invalidated.is_empty());
    }

    #[test]
    fn delete_invalidates_own_dependents() {
        let mut m = Module::new(name(0));
        m.set(name(1), Value::SmallInt(1), None, |_| {});
        let site = CacheSite { function: 1, cache_index: 0 };
        m.attach_dependent(name(1), site);

        let mut invalidated = Vec::new();
        m.delete(name(1), |s| invalidated.push(s)).unwrap();
        assert_eq!(invalidated, vec![site]);
        assert_eq!(m.get(name(1), None), None);
    }

    #[test]
    fn placeholders_are_skipped_by_len_and_iteration() {
        let mut builtins = Module::new(name(0));
        builtins.set(name(10), Value::SmallInt(3), None, |_| {});
        let mut m = Module::new(name(1));
        m.set(name(5), Value::SmallInt(1), None, |_| {});
        Module::attach_dependent_on_builtins(&mut builtins, name(10), CacheSite { function: 2, cache_index: 0 });
        // merely resolving through builtins without a real local cell must
        // not create a visible (non-placeholder) entry for `name(10)`.
        assert!(m.resolve_for_cache(name(10), Some(&builtins)).is_some());

        assert_eq!(m.len(), 1);
        assert_eq!(m.names().collect::<Vec<_>>(), vec![name(5)]);
    }

    #[test]
    fn end_to_end_builtins_shadow_scenario() {
        // Mirrors S2: f = lambda: len([1,2,3]); f() -> 3; M.len = ...; f() -> 99; del M.len; f() -> 3.
        let mut builtins = Module::new(name(0));
        builtins.set(name(100), Value::SmallInt(3), None, |_| {});
        let mut m = Module::new(name(1));

        let site = CacheSite { function: 7, cache_index: 0 };
        let mut total_invalidations = 0;

        let owner = m.resolve_for_cache(name(100), Some(&builtins)).unwrap();
        assert_eq!(owner, CellOwner::Builtins);
        Module::attach_dependent_on_builtins(&mut builtins, name(100), site);
        assert_eq!(m.get(name(100), Some(&builtins)), Some(Value::SmallInt(3)));

        total_invalidations += m.set(name(100), Value::SmallInt(99), Some(&mut builtins), |_| {});
        assert_eq!(m.get(name(100), Some(&builtins)), Some(Value::SmallInt(99)));

        let owner = m.resolve_for_cache(name(100), Some(&builtins)).unwrap();
        assert_eq!(owner, CellOwner::Own);
        m.attach_dependent(name(100), site);

        m.delete(name(100), |_| {}).unwrap();
        total_invalidations += 1;
        assert_eq!(m.get(name(100), Some(&builtins)), Some(Value::SmallInt(3)));

        assert_eq!(total_invalidations, 2);
    }
}
