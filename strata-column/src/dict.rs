use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use strata_error::strata_panic;

use crate::FixedType;

/// Renumbering map produced by a dictionary merge: local id → global id for
/// every id that changed.
pub type TranslationTable = HashMap<u32, u32>;

/// A bidirectional string ↔ integer mapping backing dictionary-encoded
/// (factor) columns.
#[derive(Debug, Default, Clone)]
pub struct Dictionary {
    by_id: HashMap<u32, String>,
    by_value: HashMap<String, u32>,
    next_id: u32,
    modified: bool,
}

impl Dictionary {
    /// An empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// The id for `value`, if present.
    pub fn lookup(&self, value: &str) -> Option<u32> {
        self.by_value.get(value).copied()
    }

    /// The string behind `id`, if present.
    pub fn dereference(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Intern `value`, returning its id (existing or fresh). Fatal when the
    /// id space above `max_id` would be needed.
    pub fn insert(&mut self, value: &str, max_id: u32) -> u32 {
        if let Some(id) = self.lookup(value) {
            return id;
        }
        if self.next_id > max_id {
            strata_panic!("dictionary id space exhausted at {}", self.next_id);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(id, value.to_string());
        self.by_value.insert(value.to_string(), id);
        self.modified = true;
        id
    }

    /// Fold `local` into this dictionary. Returns the translation table for
    /// every local id whose global id differs — values already known
    /// globally keep their global id, new values are assigned fresh ones.
    pub fn integrate(&mut self, local: &Dictionary) -> TranslationTable {
        let mut entries: Vec<(u32, &String)> =
            local.by_id.iter().map(|(&id, value)| (id, value)).collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut table = TranslationTable::new();
        for (local_id, value) in entries {
            let global_id = match self.by_value.get(value) {
                Some(&id) => id,
                None => self.insert(value, u32::MAX),
            };
            if global_id != local_id {
                table.insert(local_id, global_id);
            }
        }
        table
    }

    /// Lexicographic comparison of two interned values. Fatal on an unknown
    /// id.
    pub fn compare(&self, first: u32, second: u32) -> std::cmp::Ordering {
        let Some(a) = self.dereference(first) else {
            strata_panic!("unknown dictionary id {}", first);
        };
        let Some(b) = self.dereference(second) else {
            strata_panic!("unknown dictionary id {}", second);
        };
        a.cmp(b)
    }

    /// Number of interned values.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Whether the dictionary changed since construction/load.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Iterate `(id, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.by_id.iter().map(|(&id, value)| (id, value.as_str()))
    }
}

/// An owning read guard over a named dictionary, held for the lifetime of a
/// scan. Keeps the dictionary's lock read-acquired until dropped, so a merge
/// cannot renumber ids out from under an in-flight scan.
pub struct DictionaryReadGuard {
    // declaration order is load-bearing: the guard must drop before the
    // handle that keeps the lock it borrows from alive
    guard: RwLockReadGuard<'static, Dictionary>,
    _handle: Arc<RwLock<Dictionary>>,
}

impl DictionaryReadGuard {
    fn acquire(handle: Arc<RwLock<Dictionary>>) -> Self {
        let guard = handle.read();
        // SAFETY: the guard borrows the lock inside `handle`; the Arc'd lock
        // never moves and `_handle` outlives `guard` by field order, so the
        // 'static lifetime cannot be observed dangling.
        let guard = unsafe {
            std::mem::transmute::<RwLockReadGuard<'_, Dictionary>, RwLockReadGuard<'static, Dictionary>>(
                guard,
            )
        };
        DictionaryReadGuard {
            guard,
            _handle: handle,
        }
    }
}

impl std::ops::Deref for DictionaryReadGuard {
    type Target = Dictionary;

    fn deref(&self) -> &Dictionary {
        &self.guard
    }
}

impl std::fmt::Debug for DictionaryReadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DictionaryReadGuard").field(&*self.guard).finish()
    }
}

/// An explicitly owned registry of named dictionaries.
///
/// Each name maps to one dictionary behind a read/write lock: many scans
/// read concurrently while a merge is globally serialized. Components that
/// need dictionary access receive a registry reference; there is no
/// process-wide instance.
#[derive(Debug, Default)]
pub struct DictionaryRegistry {
    dicts: RwLock<HashMap<String, Arc<RwLock<Dictionary>>>>,
}

impl DictionaryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, name: &str) -> Arc<RwLock<Dictionary>> {
        if let Some(dict) = self.dicts.read().get(name) {
            return dict.clone();
        }
        self.dicts
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Acquire read access to the named dictionary. The guard must be held
    /// for the entire scan that dereferences ids from it.
    pub fn read(&self, name: &str) -> DictionaryReadGuard {
        DictionaryReadGuard::acquire(self.handle(name))
    }

    /// Run `f` with exclusive access to the named dictionary.
    pub fn with_write<R>(&self, name: &str, f: impl FnOnce(&mut Dictionary) -> R) -> R {
        let handle = self.handle(name);
        let mut dict = handle.write();
        f(&mut dict)
    }

    /// Merge a thread-local dictionary into the named global one and return
    /// the translation table for renumbered ids. Serialized against every
    /// reader; callers must not hold a read guard on the same name.
    pub fn merge_local(&self, name: &str, local: &Dictionary) -> TranslationTable {
        self.with_write(name, |dict| dict.integrate(local))
    }
}

/// A dictionary-encoded value: a fixed-size id plus the contract for
/// rewriting ids after a dictionary merge.
pub trait DictType: FixedType {
    /// Name of the dictionary this type's ids live in.
    const DICTIONARY: &'static str;

    /// Rewrite this value's id through a merge translation table.
    fn translate(&mut self, table: &TranslationTable);
}

/// The stock dictionary-encoded value: a bare 32-bit id in the `"factor"`
/// dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Factor(pub u32);

impl FixedType for Factor {
    const SIZE: usize = size_of::<u32>();

    fn write_to(&self, buf: &mut [u8]) {
        self.0.write_to(buf);
    }

    fn read_from(buf: &[u8]) -> Self {
        Factor(u32::read_from(buf))
    }
}

impl DictType for Factor {
    const DICTIONARY: &'static str = "factor";

    fn translate(&mut self, table: &TranslationTable) {
        if let Some(&id) = table.get(&self.0) {
            self.0 = id;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn intern_and_lookup() {
        let mut dict = Dictionary::new();
        let red = dict.insert("red", u32::MAX);
        let blue = dict.insert("blue", u32::MAX);
        assert_ne!(red, blue);
        assert_eq!(dict.insert("red", u32::MAX), red);
        assert_eq!(dict.lookup("blue"), Some(blue));
        assert_eq!(dict.dereference(red), Some("red"));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn integrate_renumbers_collisions() {
        let mut global = Dictionary::new();
        global.insert("red", u32::MAX); // id 0
        global.insert("blue", u32::MAX); // id 1

        let mut local = Dictionary::new();
        local.insert("blue", u32::MAX); // local 0, global 1
        local.insert("green", u32::MAX); // local 1, global 2 (fresh)

        let table = global.integrate(&local);
        assert_eq!(table.get(&0), Some(&1));
        assert_eq!(table.get(&1), Some(&2));
        assert_eq!(global.dereference(2), Some("green"));
    }

    #[test]
    fn integrate_is_a_noop_for_identical_ids() {
        let mut global = Dictionary::new();
        global.insert("only", u32::MAX); // id 0

        let mut local = Dictionary::new();
        local.insert("only", u32::MAX); // also id 0

        assert!(global.integrate(&local).is_empty());
    }

    #[test]
    fn compare_is_lexicographic() {
        let mut dict = Dictionary::new();
        let apple = dict.insert("apple", u32::MAX);
        let pear = dict.insert("pear", u32::MAX);
        assert_eq!(dict.compare(apple, pear), std::cmp::Ordering::Less);
        assert_eq!(dict.compare(pear, pear), std::cmp::Ordering::Equal);
    }

    #[test]
    fn registry_readers_share_writers_exclude() {
        let registry = DictionaryRegistry::new();
        registry.with_write("factor", |dict| {
            dict.insert("a", u32::MAX);
        });

        let guard_one = registry.read("factor");
        let guard_two = registry.read("factor");
        assert_eq!(guard_one.len(), 1);
        assert_eq!(guard_two.lookup("a"), Some(0));
        drop(guard_one);
        drop(guard_two);

        let mut local = Dictionary::new();
        local.insert("b", u32::MAX);
        let table = registry.merge_local("factor", &local);
        assert_eq!(table.get(&0), Some(&1));
    }

    #[test]
    #[should_panic(expected = "id space exhausted")]
    fn id_exhaustion_is_fatal() {
        let mut dict = Dictionary::new();
        dict.insert("one", 0);
        dict.insert("two", 0);
    }
}
