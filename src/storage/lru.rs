//! Recency-ordered map
//!
//! Hash map from key to slot index plus a doubly linked list threaded through
//! a slab of slots. Head is the most recently used entry, tail the least.
//! Lookup, promotion, insertion and eviction are all O(1).

use std::collections::HashMap;

/// Sentinel for "no slot"
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<V> {
    /// `None` while the slot sits on the free list
    entry: Option<(String, V)>,
    prev: usize,
    next: usize,
}

/// Map with least-recently-used ordering
#[derive(Debug)]
pub struct LruMap<V> {
    index: HashMap<String, usize>,
    slots: Vec<Slot<V>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<V> Default for LruMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LruMap<V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key` and promote it to most recently used
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        self.slots[idx].entry.as_ref().map(|(_, v)| v)
    }

    /// Look up `key` without touching recency
    #[cfg(test)]
    pub fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].entry.as_ref().map(|(_, v)| v)
    }

    /// Insert or overwrite, making `key` the most recently used entry.
    /// Returns the previous value if the key was present.
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            self.promote(idx);
            let (_, old) = self.slots[idx].entry.replace((key, value))?;
            return Some(old);
        }

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx].entry = Some((key.clone(), value));
                idx
            }
            None => {
                self.slots.push(Slot {
                    entry: Some((key.clone(), value)),
                    prev: NIL,
                    next: NIL,
                });
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.release(idx).map(|(_, v)| v)
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(String, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        let entry = self.release(idx)?;
        self.index.remove(&entry.0);
        Some(entry)
    }

    /// Key that `pop_lru` would evict next
    pub fn peek_lru(&self) -> Option<&str> {
        if self.tail == NIL {
            return None;
        }
        self.slots[self.tail].entry.as_ref().map(|(k, _)| k.as_str())
    }

    /// Entries from least to most recently used
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            map: self,
            cursor: self.tail,
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn release(&mut self, idx: usize) -> Option<(String, V)> {
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].entry.take()
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head == NIL {
            self.tail = idx;
        } else {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
    }
}

/// Iterator from the least to the most recently used entry
pub struct Iter<'a, V> {
    map: &'a LruMap<V>,
    cursor: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let slot = &self.map.slots[self.cursor];
        self.cursor = slot.prev;
        slot.entry.as_ref().map(|(k, v)| (k.as_str(), v))
    }
}
