//! A thread-safe hashmap guarded by a single reader-writer lock.
//!
//! # Examples
//! ```
//! use std::ops::ControlFlow;
//! use rwsafe::ConcurrentMap;
//!
//! let map = ConcurrentMap::new();
//! map.put("foo", 1);
//! assert!(map.put_if_new("bar", 2));
//! assert!(!map.put_if_new("bar", 3));
//!
//! map.range_change(|_, v| {
//!     *v *= 10;
//!     ControlFlow::Continue(())
//! });
//!
//! assert_eq!(map.get("foo"), Some(10));
//! assert_eq!(map.delete("bar"), Some(20));
//! assert_eq!(map.get("bar"), None);
//! ```
use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash, RandomState},
    ops::ControlFlow,
    sync::Arc,
};

use hashbrown::{hash_table::Entry, HashTable};

use crate::lock::Locked;

struct Inner<K, V, S> {
    table: Locked<HashTable<(K, V)>>,
    hasher: S,
}

/// A thread-safe hashmap guarded by a single reader-writer lock.
///
/// Lookups, snapshots and [`range`](Self::range) take shared access; every
/// mutation takes exclusive access. Values are handed out as clones, so no
/// caller ever holds a live reference into the table once a call returns.
///
/// Cloning a `ConcurrentMap` yields another handle to the *same* map.
///
/// # Traversals
///
/// [`range`](Self::range) holds shared access for the whole traversal. Its
/// callback may call any read-only method on the same map, but must not call a
/// mutating one. [`range_change`](Self::range_change) holds exclusive access
/// and its callback must not call back into the same map at all. Debug builds
/// panic on such re-entry; release builds deadlock.
///
/// # Examples
/// ```
/// use std::thread;
/// use rwsafe::ConcurrentMap;
///
/// let map = ConcurrentMap::new();
///
/// let handles: Vec<_> = (0..4)
///     .map(|i| {
///         let map = map.clone();
///         thread::spawn(move || map.put_if_new("winner", i))
///     })
///     .collect();
///
/// let wins = handles
///     .into_iter()
///     .map(|h| h.join().unwrap())
///     .filter(|&won| won)
///     .count();
/// assert_eq!(wins, 1);
/// ```
pub struct ConcurrentMap<K, V, S = RandomState> {
    inner: Arc<Inner<K, V, S>>,
}

impl<K, V, S> Clone for ConcurrentMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ConcurrentMap<K, V, RandomState>
where
    K: Eq + Hash,
{
    /// Creates an empty `ConcurrentMap` with the default hasher.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Creates an empty `ConcurrentMap` with the default hasher and space for at least `capacity`
    /// entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> Default for ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Creates an empty `ConcurrentMap` with the provided hasher `S`.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    /// Creates an empty `ConcurrentMap` with the provided hasher `S` and space for at least
    /// `capacity` entries.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Locked::new(HashTable::with_capacity(capacity)),
                hasher,
            }),
        }
    }

    #[inline]
    fn hash_u64<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.inner.hasher.hash_one(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: K, value: V) {
        let hash = self.hash_u64(&key);
        let replaced = {
            let mut table = self.inner.table.write();
            match table.entry(hash, |(k, _)| k == &key, |(k, _)| self.hash_u64(k)) {
                Entry::Occupied(mut entry) => {
                    Some(std::mem::replace(&mut entry.get_mut().1, value))
                }
                Entry::Vacant(entry) => {
                    entry.insert((key, value));
                    None
                }
            }
        };
        // The old value is dropped outside the lock.
        drop(replaced);
    }

    /// Stores `value` under `key` only if `key` is absent. Returns `true` if the value was
    /// stored.
    ///
    /// The check and the insert happen under one exclusive acquisition, so of several threads
    /// racing on the same key exactly one wins.
    ///
    /// # Example
    /// ```
    /// use rwsafe::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// assert!(map.put_if_new("foo", 1));
    /// assert!(!map.put_if_new("foo", 2));
    /// assert_eq!(map.get("foo"), Some(1));
    /// ```
    pub fn put_if_new(&self, key: K, value: V) -> bool {
        let hash = self.hash_u64(&key);
        let mut table = self.inner.table.write();
        match table.entry(hash, |(k, _)| k == &key, |(k, _)| self.hash_u64(k)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert((key, value));
                true
            }
        }
    }

    /// Returns a copy of the value stored under `key`, or `None` if the key is absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let hash = self.hash_u64(key);
        let table = self.inner.table.read();
        table
            .find(hash, |(k, _)| key.eq(k.borrow()))
            .map(|(_, v)| v.clone())
    }

    /// Returns `true` if the map holds an entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_u64(key);
        self.inner
            .table
            .read()
            .find(hash, |(k, _)| key.eq(k.borrow()))
            .is_some()
    }

    /// Removes the entry for `key` and returns its value, or `None` if the key was absent.
    pub fn delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_u64(key);
        let mut table = self.inner.table.write();
        match table.find_entry(hash, |(k, _)| key.eq(k.borrow())) {
            Ok(entry) => {
                let ((_, value), _) = entry.remove();
                Some(value)
            }
            Err(_) => None,
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let old = {
            let mut table = self.inner.table.write();
            std::mem::take(&mut *table)
        };
        tracing::trace!(dropped = old.len(), "cleared map");
        drop(old);
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.table.read().len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.table.read().is_empty()
    }

    /// Returns the keys present at the moment of the call, in no particular order.
    ///
    /// The result is a snapshot: other threads may add or remove keys as soon as this returns.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let table = self.inner.table.read();
        table.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Returns a copy of every entry present at the moment of the call, in no particular order.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let table = self.inner.table.read();
        table.iter().cloned().collect()
    }

    /// Calls `visit` once per entry, in no particular order, while holding shared access.
    /// Returning [`ControlFlow::Break`] stops the traversal.
    ///
    /// `visit` may call read-only methods on this map (including a nested `range`), but must not
    /// mutate it.
    ///
    /// # Example
    /// ```
    /// use std::ops::ControlFlow;
    /// use rwsafe::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.put("a", 1);
    /// map.put("b", 2);
    ///
    /// let mut sum = 0;
    /// map.range(|_, v| {
    ///     sum += v;
    ///     ControlFlow::Continue(())
    /// });
    /// assert_eq!(sum, 3);
    /// ```
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        let table = self.inner.table.read();
        for (k, v) in table.iter() {
            if visit(k, v).is_break() {
                break;
            }
        }
    }

    /// Calls `visit` once per entry, in no particular order, while holding exclusive access. The
    /// value `visit` leaves behind becomes the entry's new value. Returning
    /// [`ControlFlow::Break`] stops the traversal after the current entry.
    ///
    /// `visit` must not call any method on this map.
    pub fn range_change<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &mut V) -> ControlFlow<()>,
    {
        let mut table = self.inner.table.write();
        let mut visited = 0usize;
        let mut stopped = false;
        for (k, v) in table.iter_mut() {
            visited += 1;
            if visit(&*k, v).is_break() {
                stopped = true;
                break;
            }
        }
        tracing::trace!(visited, stopped, "range_change finished");
    }
}

impl<K, V, S> std::fmt::Debug for ConcurrentMap<K, V, S>
where
    K: std::fmt::Debug,
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table.read();
        f.debug_map()
            .entries(table.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
        v.sort();
        v
    }

    #[test]
    fn test_put_overwrites() {
        let map = ConcurrentMap::with_capacity(8);
        map.put(1, "one");
        map.put(1, "uno");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some("uno"));
    }

    #[test]
    fn test_put_if_new() {
        let map = ConcurrentMap::new();
        assert!(map.put_if_new("k", 1));
        assert!(!map.put_if_new("k", 2));
        assert_eq!(map.get("k"), Some(1));
    }

    #[test]
    fn test_delete_absent() {
        let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
        assert_eq!(map.delete("missing"), None);
    }

    #[test]
    fn test_delete_distinguishes_zero_value() {
        let map = ConcurrentMap::new();
        map.put("zero", 0);
        assert_eq!(map.delete("zero"), Some(0));
        assert_eq!(map.delete("zero"), None);
    }

    #[test]
    fn test_borrowed_lookup() {
        let map = ConcurrentMap::new();
        map.put(String::from("foo"), 1);
        assert_eq!(map.get("foo"), Some(1));
        assert!(map.contains_key("foo"));
        assert_eq!(map.delete("foo"), Some(1));
    }

    #[test]
    fn test_clear() {
        let map = ConcurrentMap::new();
        map.put("foo", 1);
        map.put("bar", 2);
        map.clear();
        assert!(map.is_empty());
        assert!(map.keys().is_empty());
        map.put("foo", 3);
        assert_eq!(map.get("foo"), Some(3));
    }

    #[test]
    fn test_keys_and_snapshot_are_independent() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        map.put("b", 2);

        let mut keys = map.keys();
        let snapshot = map.snapshot();
        keys.push("c");
        map.delete("a");

        assert_eq!(sorted(keys), vec!["a", "b", "c"]);
        assert_eq!(sorted(snapshot), vec![("a", 1), ("b", 2)]);
        assert_eq!(map.keys(), vec!["b"]);
    }

    #[test]
    fn test_range_visits_every_entry() {
        let map = ConcurrentMap::new();
        for i in 0..10 {
            map.put(i, i * 2);
        }
        let mut seen = Vec::new();
        map.range(|k, v| {
            assert_eq!(*v, k * 2);
            seen.push(*k);
            ControlFlow::Continue(())
        });
        assert_eq!(sorted(seen), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_stops_early() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        map.put("b", 2);
        map.put("c", 3);
        let mut visits = 0;
        map.range(|_, _| {
            visits += 1;
            ControlFlow::Break(())
        });
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_range_allows_nested_reads() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        map.put("b", 2);
        let mut pairs = 0;
        map.range(|k, v| {
            assert_eq!(map.get(k), Some(*v));
            assert_eq!(map.len(), 2);
            map.range(|_, _| {
                pairs += 1;
                ControlFlow::Continue(())
            });
            ControlFlow::Continue(())
        });
        assert_eq!(pairs, 4);
    }

    #[test]
    fn test_range_change() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        map.put("b", 2);
        let mut visits = 0;
        map.range_change(|_, v| {
            visits += 1;
            *v *= 10;
            ControlFlow::Continue(())
        });
        assert_eq!(visits, 2);
        assert_eq!(sorted(map.snapshot()), vec![("a", 10), ("b", 20)]);
    }

    #[test]
    fn test_range_change_stops_after_updating_current() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        map.put("b", 1);
        map.put("c", 1);
        map.range_change(|_, v| {
            *v = 5;
            ControlFlow::Break(())
        });
        let mut values: Vec<_> = map.snapshot().into_iter().map(|(_, v)| v).collect();
        values.sort();
        assert_eq!(values, vec![1, 1, 5]);
    }

    #[test]
    fn test_debug() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        assert_eq!(format!("{map:?}"), r#"{"a": 1}"#);
    }

    #[test]
    fn test_default_with_hasher() {
        let map: ConcurrentMap<u8, u8, std::hash::BuildHasherDefault<std::hash::DefaultHasher>> =
            ConcurrentMap::default();
        map.put(1, 2);
        assert_eq!(map.get(&1), Some(2));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_mutation_inside_range_panics_in_debug() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            map.range(|k, _| {
                map.delete(k);
                ControlFlow::Continue(())
            });
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");

        // The lock was released during unwinding and is not poisoned.
        assert_eq!(map.get("a"), Some(1));
        map.put("b", 2);
        assert_eq!(map.len(), 2);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_read_inside_range_change_panics_in_debug() {
        let map = ConcurrentMap::new();
        map.put("a", 1);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            map.range_change(|k, _| {
                let _ = map.contains_key(k);
                ControlFlow::Continue(())
            });
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
        assert_eq!(map.get("a"), Some(1));
    }

    #[test]
    fn test_other_map_inside_range_change() {
        let source = ConcurrentMap::new();
        let sink = ConcurrentMap::new();
        source.put("a", 1);
        source.range_change(|k, v| {
            sink.put(*k, *v);
            *v += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(sink.get("a"), Some(1));
        assert_eq!(source.get("a"), Some(2));
    }
}
