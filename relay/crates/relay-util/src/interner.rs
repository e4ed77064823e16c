//! Per-runtime string interning.
//!
//! Each runtime context owns one [`StringTable`]. Built-in names (event types
//! and the like) are interned when the runtime activates and released when it
//! tears down, so there is no process-wide table to leak into.
//!
//! # Performance Characteristics
//!
//! - **Interning (hit)**: O(1) - hash lookup only
//! - **Interning (miss)**: O(1) - hash insert + allocation
//! - **Lookup by atom**: O(1) - vector index

use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Interned string identifier, valid for the table that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    /// Raw index into the issuing table
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Deduplicating string table
#[derive(Debug, Default)]
pub struct StringTable {
    index: FxHashMap<Arc<str>, Atom>,
    strings: Vec<Arc<str>>,
}

impl StringTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `value`, returning the existing atom when already present
    pub fn intern(&mut self, value: &str) -> Atom {
        if let Some(&atom) = self.index.get(value) {
            return atom;
        }

        let atom = Atom(self.strings.len() as u32);
        let shared: Arc<str> = Arc::from(value);
        self.strings.push(Arc::clone(&shared));
        self.index.insert(shared, atom);
        atom
    }

    /// Look up an already interned string without inserting
    pub fn lookup(&self, value: &str) -> Option<Atom> {
        self.index.get(value).copied()
    }

    /// Resolve an atom back to its string
    pub fn get(&self, atom: Atom) -> Option<&str> {
        self.strings.get(atom.0 as usize).map(|s| &**s)
    }

    /// Number of distinct strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Release every string, returning how many were held
    pub fn clear(&mut self) -> usize {
        let released = self.strings.len();
        self.index.clear();
        self.strings.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut table = StringTable::new();
        let a = table.intern("click");
        let b = table.intern("load");
        let c = table.intern("click");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(b), Some("load"));
    }

    #[test]
    fn test_lookup_does_not_insert() {
        let mut table = StringTable::new();
        assert!(table.lookup("error").is_none());
        assert!(table.is_empty());
        let atom = table.intern("error");
        assert_eq!(table.lookup("error"), Some(atom));
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut table = StringTable::new();
        table.intern("a");
        table.intern("b");
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert!(table.lookup("a").is_none());
    }
}
