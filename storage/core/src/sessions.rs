use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

/// A map from `K` to weakly-held `V`s: `set` stores a link without keeping
/// it alive, `get` returns it only while something else still holds it.
/// Dead entries accumulate until `scrub_threshold` insertions have
/// happened, then a full sweep clears them — mirroring the original's
/// `WeakMap`.
pub struct WeakMap<K, V> {
    map: Mutex<HashMap<K, Weak<V>>>,
    scrub_threshold: u32,
    dirtiness: Mutex<u32>,
}

impl<K, V> WeakMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(scrub_threshold: u32) -> Self {
        WeakMap {
            map: Mutex::new(HashMap::new()),
            scrub_threshold,
            dirtiness: Mutex::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut map = self.map.lock().unwrap();
        match map.get(key).and_then(Weak::upgrade) {
            Some(link) => Some(link),
            None => {
                map.remove(key);
                None
            }
        }
    }

    pub fn set(&self, key: K, link: &Arc<V>) {
        self.map.lock().unwrap().insert(key, Arc::downgrade(link));
        let mut dirtiness = self.dirtiness.lock().unwrap();
        *dirtiness += 1;
        if *dirtiness >= self.scrub_threshold {
            self.scrub_locked();
            *dirtiness = 0;
        }
    }

    pub fn clear(&self, key: &K) {
        self.map.lock().unwrap().remove(key);
    }

    pub fn scrub(&self) -> usize {
        self.scrub_locked()
    }

    fn scrub_locked(&self) -> usize {
        let mut map = self.map.lock().unwrap();
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }

    pub fn live_count(&self) -> usize {
        self.map
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl<K: Eq + Hash + Clone, V> Default for WeakMap<K, V> {
    fn default() -> Self {
        // 10000/sizeof(KeyType) in the original; a fixed default is good
        // enough when K isn't statically sized the same way in Rust.
        WeakMap::new(500)
    }
}

/// An unordered collection of weakly-held values with the same scrub
/// discipline as [`WeakMap`] — used for iterating "every live X" (e.g. the
/// router's open forwarded assets) without keeping them alive.
pub struct WeakSet<V> {
    items: Mutex<Vec<Weak<V>>>,
    scrub_threshold: u32,
    dirtiness: Mutex<u32>,
}

impl<V> WeakSet<V> {
    pub fn new(scrub_threshold: u32) -> Self {
        WeakSet {
            items: Mutex::new(Vec::new()),
            scrub_threshold,
            dirtiness: Mutex::new(0),
        }
    }

    pub fn insert(&self, link: &Arc<V>) {
        self.items.lock().unwrap().push(Arc::downgrade(link));
        let mut dirtiness = self.dirtiness.lock().unwrap();
        *dirtiness += 1;
        if *dirtiness >= self.scrub_threshold {
            self.scrub_locked();
            *dirtiness = 0;
        }
    }

    pub fn scrub(&self) -> usize {
        self.scrub_locked()
    }

    fn scrub_locked(&self) -> usize {
        let mut items = self.items.lock().unwrap();
        items.retain(|w| w.strong_count() > 0);
        items.len()
    }

    /// Snapshot of every currently-live member.
    pub fn live(&self) -> Vec<Arc<V>> {
        self.items.lock().unwrap().iter().filter_map(Weak::upgrade).collect()
    }
}

impl<V> Default for WeakSet<V> {
    fn default() -> Self {
        WeakSet::new(2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_map_drops_entry_once_last_arc_is_gone() {
        let map: WeakMap<String, i32> = WeakMap::new(10);
        let value = Arc::new(42);
        map.set("a".to_string(), &value);
        assert_eq!(map.get(&"a".to_string()).map(|v| *v), Some(42));
        drop(value);
        assert_eq!(map.get(&"a".to_string()), None);
    }

    #[test]
    fn weak_set_live_only_returns_alive_members() {
        let set: WeakSet<i32> = WeakSet::new(10);
        let a = Arc::new(1);
        let b = Arc::new(2);
        set.insert(&a);
        set.insert(&b);
        drop(b);
        assert_eq!(set.live(), vec![a]);
    }
}
