//! Adaptive replacement cache.
//!
//! Four LRU lists: `t1` holds entries seen once, `t2` entries seen at least
//! twice, and the ghost lists `b1`/`b2` remember keys recently evicted from
//! each. Ghost hits shift the target size `p` of `t1`, so the cache adapts
//! between recency and frequency. Total resident entries never exceed
//! `capacity`.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

pub struct ArcCache<K: Hash + Eq, V> {
    capacity: usize,
    p: usize,
    t1: LruCache<K, V>,
    t2: LruCache<K, V>,
    b1: LruCache<K, ()>,
    b2: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone, V> ArcCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            p: 0,
            t1: LruCache::unbounded(),
            t2: LruCache::unbounded(),
            b1: LruCache::unbounded(),
            b2: LruCache::unbounded(),
        }
    }

    /// Look up a resident entry, promoting it to the frequent list.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(value) = self.t1.pop(key) {
            self.t2.put(key.clone(), value);
            return self.t2.peek(key);
        }
        self.t2.get(key)
    }

    /// Look up without touching recency or frequency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.t1.peek(key).or_else(|| self.t2.peek(key))
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.t1.contains(&key) {
            self.t1.pop(&key);
            self.t2.put(key, value);
            return;
        }
        if self.t2.contains(&key) {
            self.t2.put(key, value);
            return;
        }

        if self.b1.contains(&key) {
            let (b1, b2) = (self.b1.len(), self.b2.len());
            let delta = if b2 > b1 { b2 / b1 } else { 1 };
            self.p = (self.p + delta).min(self.capacity);
            self.b1.pop(&key);
            if self.len() >= self.capacity {
                self.replace(false);
            }
            self.t2.put(key, value);
            return;
        }

        if self.b2.contains(&key) {
            let (b1, b2) = (self.b1.len(), self.b2.len());
            let delta = if b1 > b2 { b1 / b2 } else { 1 };
            self.p = self.p.saturating_sub(delta);
            self.b2.pop(&key);
            if self.len() >= self.capacity {
                self.replace(true);
            }
            self.t2.put(key, value);
            return;
        }

        // Complete miss. Keep |t1| + |b1| <= c and the directory within 2c.
        let c = self.capacity;
        if self.t1.len() + self.b1.len() >= c {
            if self.t1.len() < c {
                self.b1.pop_lru();
                if self.len() >= c {
                    self.replace(false);
                }
            } else {
                self.t1.pop_lru();
            }
        } else {
            let directory = self.len() + self.b1.len() + self.b2.len();
            if directory >= c {
                if directory >= 2 * c {
                    self.b2.pop_lru();
                }
                if self.len() >= c {
                    self.replace(false);
                }
            }
        }
        self.t1.put(key, value);
    }

    /// Evict one resident entry into the matching ghost list. Falls back to
    /// the other list when the preferred one is empty.
    fn replace(&mut self, b2_contains_key: bool) {
        let t1 = self.t1.len();
        let prefer_t1 = t1 > 0 && (t1 > self.p || (t1 == self.p && b2_contains_key));
        if prefer_t1 || self.t2.is_empty() {
            if let Some((key, _)) = self.t1.pop_lru() {
                self.b1.put(key, ());
            }
        } else if let Some((key, _)) = self.t2.pop_lru() {
            self.b2.put(key, ());
        }
    }

    pub fn len(&self) -> usize {
        self.t1.len() + self.t2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(n: usize) -> ArcCache<&'static str, u32> {
        ArcCache::new(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn hit_and_miss() {
        let mut c = cache(4);
        assert!(c.get(&"a").is_none());
        c.put("a", 1);
        assert_eq!(c.get(&"a"), Some(&1));
        assert_eq!(c.peek(&"a"), Some(&1));
    }

    fn assert_bounded<K: Hash + Eq + Clone, V>(c: &ArcCache<K, V>) {
        let cap = c.capacity;
        assert!(c.len() <= cap, "{} resident, capacity {cap}", c.len());
        assert!(c.t1.len() + c.b1.len() <= cap);
        assert!(c.len() + c.b1.len() + c.b2.len() <= 2 * cap);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut c = ArcCache::new(NonZeroUsize::new(8).unwrap());
        for i in 0..100u32 {
            c.put(i, i);
            if i % 3 == 0 {
                c.get(&(i / 2));
            }
            assert_bounded(&c);
        }
    }

    #[test]
    fn recency_list_full_of_ghost_target_stays_bounded() {
        let mut c = ArcCache::new(NonZeroUsize::new(2).unwrap());
        for key in [1u32, 2, 3, 1, 4, 2] {
            c.put(key, key);
            assert_bounded(&c);
        }
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn mixed_workload_stays_bounded() {
        for cap in [1usize, 2, 4, 16] {
            let mut c = ArcCache::new(NonZeroUsize::new(cap).unwrap());
            let mut seed: u64 = 0x9e37_79b9_7f4a_7c15 ^ cap as u64;
            for _ in 0..50_000 {
                seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let key = (seed >> 33) as usize % (cap * 3);
                if (seed >> 20) & 1 == 0 {
                    c.get(&key);
                } else {
                    c.put(key, key);
                }
                assert_bounded(&c);
                if let Some(v) = c.peek(&key) {
                    assert_eq!(*v, key);
                }
            }
        }
    }

    #[test]
    fn frequent_entries_survive_a_scan() {
        let mut c = cache(4);
        c.put("hot1", 1);
        c.put("hot2", 2);
        c.get(&"hot1");
        c.get(&"hot2");

        for key in ["s1", "s2", "s3", "s4", "s5", "s6"] {
            c.put(key, 0);
        }

        assert_eq!(c.peek(&"hot1"), Some(&1));
        assert_eq!(c.peek(&"hot2"), Some(&2));
        assert!(c.peek(&"s1").is_none());
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn ghost_hit_readmits_as_frequent() {
        let mut c = cache(2);
        c.put("a", 1);
        c.get(&"a");
        c.put("b", 2);
        c.put("c", 3); // evicts b into b1
        assert!(c.peek(&"b").is_none());
        assert!(c.b1.contains(&"b"));

        c.put("b", 10);
        assert_eq!(c.peek(&"b"), Some(&10));
        assert!(c.t2.contains(&"b"));
        assert!(c.peek(&"a").is_none());
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn overwrite_keeps_single_entry() {
        let mut c = cache(2);
        c.put("a", 1);
        c.put("a", 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"a"), Some(&2));
    }
}
