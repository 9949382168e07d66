//! pool::lru — O(1) cache index: a map plus a doubly-linked list threaded
//! through it by key, `head` = MRU and `tail` = LRU (§3 "LRU node", §4.4).
//!
//! Unlike a typical cache, `put` never evicts on its own — capacity is a
//! soft limit enforced externally via `compact`, so the buffer pool can
//! apply its own "never evict a dirty or locked page" policy instead of a
//! blind LRU eviction baked into the index.

use std::collections::HashMap;
use std::sync::Arc;

use crate::page::Page;

struct Entry {
    page: Arc<Page>,
    prev: Option<u64>,
    next: Option<u64>,
}

pub struct LruIndex {
    capacity: usize,
    map: HashMap<u64, Entry>,
    head: Option<u64>,
    tail: Option<u64>,
}

impl LruIndex {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, map: HashMap::with_capacity(capacity.max(1)), head: None, tail: None }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fetch and promote to MRU.
    pub fn get(&mut self, key: u64) -> Option<Arc<Page>> {
        if !self.map.contains_key(&key) {
            return None;
        }
        self.detach(key);
        self.attach_front(key);
        self.map.get(&key).map(|e| e.page.clone())
    }

    /// Insert or replace, promoting to MRU. Never evicts: callers that care
    /// about the soft capacity call `compact` themselves.
    pub fn put(&mut self, key: u64, page: Arc<Page>) {
        if self.map.contains_key(&key) {
            if let Some(e) = self.map.get_mut(&key) {
                e.page = page;
            }
            self.detach(key);
            self.attach_front(key);
            return;
        }
        self.map.insert(key, Entry { page, prev: None, next: None });
        self.attach_front(key);
    }

    pub fn remove(&mut self, key: u64) -> Option<Arc<Page>> {
        if !self.map.contains_key(&key) {
            return None;
        }
        self.detach(key);
        self.map.remove(&key).map(|e| e.page)
    }

    /// Walk from LRU to MRU, invoking `f` on every entry. Used by flush,
    /// which must see every cached page regardless of capacity.
    pub fn for_each<F: FnMut(u64, &Arc<Page>)>(&self, mut f: F) {
        let mut cursor = self.tail;
        while let Some(key) = cursor {
            let entry = &self.map[&key];
            f(key, &entry.page);
            cursor = entry.prev;
        }
    }

    /// Walk from LRU towards MRU while `len() > capacity`, removing any
    /// entry for which `can_evict` returns true. Entries that refuse
    /// eviction (e.g. still dirty) are left in place and the walk
    /// continues past them towards the next candidate.
    pub fn compact<F: FnMut(&Arc<Page>) -> bool>(&mut self, mut can_evict: F) -> usize {
        let mut evicted = 0;
        let mut cursor = self.tail;
        while self.map.len() > self.capacity {
            let key = match cursor {
                Some(k) => k,
                None => break,
            };
            let prev = self.map.get(&key).and_then(|e| e.prev);
            if can_evict(&self.map[&key].page) {
                self.detach(key);
                self.map.remove(&key);
                evicted += 1;
            }
            cursor = prev;
        }
        evicted
    }

    fn detach(&mut self, key: u64) {
        let (prev, next) = match self.map.get(&key) {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        if self.head == Some(key) {
            self.head = next;
        }
        if self.tail == Some(key) {
            self.tail = prev;
        }
        if let Some(p) = prev {
            if let Some(pe) = self.map.get_mut(&p) {
                pe.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(ne) = self.map.get_mut(&n) {
                ne.prev = prev;
            }
        }
        if let Some(e) = self.map.get_mut(&key) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, key: u64) {
        if self.head == Some(key) {
            return;
        }
        if let Some(e) = self.map.get_mut(&key) {
            e.prev = None;
            e.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(he) = self.map.get_mut(&old_head) {
                he.prev = Some(key);
            }
        }
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }
}
