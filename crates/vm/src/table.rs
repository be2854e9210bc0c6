//! Open-addressing hash table keyed by interned strings.
//!
//! Keys are compared by handle identity; interning guarantees that equal
//! content means an equal handle. Deleted entries leave a tombstone (empty key,
//! `true` value) so probe sequences for other keys keep going past them; a
//! never-used slot is an empty key with a `nil` value.

#[cfg(test)]
mod test;

use crate::gc::{ObjRef, Trace, Tracer};
use crate::value::Val;

/// Tables at or below this capacity first try a plain scan for the key.
const SMALL_TABLE_THRESHOLD: usize = 8;

const MIN_CAPACITY: usize = 8;

/// A string key with its hash carried alongside, so the table never has to
/// look into the heap while probing.
#[derive(Debug, Clone, Copy)]
pub struct Key {
    pub obj: ObjRef,
    pub hash: u64,
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.obj == other.obj
    }
}

impl Eq for Key {}

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<Key>,
    value: Val,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        value: Val::Nil,
    };

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !self.value.is_nil()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Table {
    /// Occupied slots, tombstones included
    count: usize,
    tombstones: usize,
    entries: Vec<Entry>,
}

fn find_entry(entries: &[Entry], key: Key) -> usize {
    let capacity = entries.len();
    if capacity <= SMALL_TABLE_THRESHOLD {
        if let Some(idx) = entries.iter().position(|e| e.key == Some(key)) {
            return idx;
        }
    }

    let mask = capacity - 1;
    let mut index = key.hash as usize & mask;
    let mut tombstone = None;
    loop {
        let entry = &entries[index];
        match entry.key {
            Some(k) if k == key => return index,
            Some(_) => {}
            None if entry.value.is_nil() => return tombstone.unwrap_or(index),
            None => {
                tombstone.get_or_insert(index);
            }
        }
        index = (index + 1) & mask;
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    pub(crate) fn allocated_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    pub fn get(&self, key: Key) -> Option<Val> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[find_entry(&self.entries, key)];
        entry.key.map(|_| entry.value)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite. Returns `true` if the key was not present.
    pub fn set(&mut self, key: Key, value: Val) -> bool {
        if (self.count + 1) * 4 > self.capacity() * 3 {
            let capacity = (self.capacity() * 2).max(MIN_CAPACITY);
            self.adjust_capacity(capacity);
        }

        let idx = find_entry(&self.entries, key);
        let entry = &mut self.entries[idx];
        let is_new = entry.key.is_none();
        if entry.is_tombstone() {
            // the slot is already counted
            self.tombstones -= 1;
        } else if is_new {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new
    }

    /// Remove `key`, leaving a tombstone. Returns `true` if it was present.
    pub fn delete(&mut self, key: Key) -> bool {
        if self.count == 0 {
            return false;
        }
        let idx = find_entry(&self.entries, key);
        let entry = &mut self.entries[idx];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Val::Bool(true);
        self.tombstones += 1;
        true
    }

    /// Copy every entry of `self` into `to`.
    pub fn add_all(&self, to: &mut Table) {
        for (key, value) in self.iter() {
            to.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, Val)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|key| (key, e.value)))
    }

    /// Find a key by content rather than by handle. `resolve` maps a key's
    /// handle to its text.
    pub fn find_string<'h>(
        &self,
        chars: &str,
        hash: u64,
        resolve: impl Fn(ObjRef) -> Option<&'h str>,
    ) -> Option<Key> {
        if self.count == 0 {
            return None;
        }

        let mask = self.capacity() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                // Stop at an empty non-tombstone entry.
                None if entry.value.is_nil() => return None,
                None => {}
                Some(key) => {
                    if key.hash == hash && resolve(key.obj) == Some(chars) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Delete every entry whose key is not marked. Used on weak tables.
    pub fn remove_unmarked(&mut self, is_marked: impl Fn(ObjRef) -> bool) -> usize {
        let mut removed = 0;
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !is_marked(key.obj) {
                    entry.key = None;
                    entry.value = Val::Bool(true);
                    removed += 1;
                }
            }
        }
        self.tombstones += removed;
        removed
    }

    pub(crate) fn references(&self, out: &mut Vec<Val>) {
        for (key, value) in self.iter() {
            out.push(Val::Obj(key.obj));
            out.push(value);
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        debug_assert!(capacity.is_power_of_two());
        let mut entries = vec![Entry::EMPTY; capacity];
        self.count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let dest = find_entry(&entries, key);
                entries[dest] = *entry;
                self.count += 1;
            }
        }
        self.tombstones = 0;
        self.entries = entries;
    }

    #[cfg(test)]
    fn tombstone_slots(&self) -> usize {
        self.entries.iter().filter(|e| e.is_tombstone()).count()
    }
}

impl Trace for Table {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for (key, value) in self.iter() {
            tracer.mark_object(key.obj);
            value.trace(tracer);
        }
    }
}
