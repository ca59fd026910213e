//! String interning.
//!
//! Attribute names, identifiers, and dict keys are interned so that layout
//! edge maps and cache sites can compare names by identity (a `u32`
//! equality check) instead of hashing or comparing bytes. This is what lets
//! the layout add/delete edge maps stay small linear-scanned arrays (see
//! `layout.rs`) rather than string-keyed hash maps.

use ahash::AHashMap;

/// Identity of an interned string. Two names are the same attribute iff
/// their `StringId`s are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Constructs a `StringId` from a raw index already known to be
    /// interned (e.g. a well-known attribute name baked in at a fixed
    /// index, or in tests). Callers are responsible for the index actually
    /// being valid in whatever `Interns` table they use it with.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Accumulates strings during startup/compilation; produces a read-only
/// [`Interns`] table once building is done.
#[derive(Debug, Default)]
pub struct InternerBuilder {
    strings: Vec<String>,
    ids: AHashMap<String, StringId>,
}

impl InternerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.ids.insert(s.to_owned(), id);
        id
    }

    #[must_use]
    pub fn finish(self) -> Interns {
        Interns { strings: self.strings }
    }
}

/// Read-only view used at execution time for lookups by id.
#[derive(Debug, Default)]
pub struct Interns {
    strings: Vec<String>,
}

impl Interns {
    #[must_use]
    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }
}
