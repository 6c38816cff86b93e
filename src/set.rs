//! A thread-safe hash set guarded by a single reader-writer lock.
use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash, RandomState},
    ops::ControlFlow,
    sync::Arc,
};

use hashbrown::{hash_table::Entry, HashTable};

use crate::lock::Locked;

struct Inner<T, S> {
    table: Locked<HashTable<T>>,
    hasher: S,
}

/// A thread-safe hash set guarded by a single reader-writer lock.
///
/// Membership tests, snapshots and [`range`](Self::range) take shared access;
/// [`add`](Self::add), [`delete`](Self::delete) and [`clear`](Self::clear) take
/// exclusive access. Cloning a `ConcurrentSet` yields another handle to the
/// *same* set.
///
/// # Examples
/// ```
/// use rwsafe::ConcurrentSet;
///
/// let set = ConcurrentSet::new();
/// set.add("x");
/// set.add("x");
/// assert_eq!(set.snapshot(), vec!["x"]);
/// assert!(set.delete("x"));
/// assert!(!set.delete("x"));
/// ```
pub struct ConcurrentSet<T, S = RandomState> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for ConcurrentSet<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ConcurrentSet<T, RandomState>
where
    T: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<T, S> Default for ConcurrentSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T, S> ConcurrentSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Locked::new(HashTable::with_capacity(capacity)),
                hasher,
            }),
        }
    }

    #[inline]
    fn hash_u64<Q: Hash + ?Sized>(&self, value: &Q) -> u64 {
        self.inner.hasher.hash_one(value)
    }

    /// Adds `value` to the set. Adding a value that is already present does nothing.
    pub fn add(&self, value: T) {
        let hash = self.hash_u64(&value);
        let mut table = self.inner.table.write();
        if let Entry::Vacant(entry) = table.entry(hash, |v| v == &value, |v| self.hash_u64(v)) {
            entry.insert(value);
        }
    }

    /// Removes `value` from the set. Returns `true` if it was present.
    pub fn delete<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_u64(value);
        let removed = {
            let mut table = self.inner.table.write();
            table
                .find_entry(hash, |v| value.eq(v.borrow()))
                .ok()
                .map(|entry| entry.remove().0)
        };
        removed.is_some()
    }

    /// Returns `true` if `value` is in the set.
    pub fn has<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_u64(value);
        self.inner
            .table
            .read()
            .find(hash, |v| value.eq(v.borrow()))
            .is_some()
    }

    /// Removes every member.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.inner.table.write());
        tracing::trace!(dropped = old.len(), "cleared set");
    }

    pub fn len(&self) -> usize {
        self.inner.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.read().is_empty()
    }

    /// Returns the members present at the moment of the call, in no particular order.
    ///
    /// The result is a snapshot: other threads may add or remove members as soon as this
    /// returns.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.table.read().iter().cloned().collect()
    }

    /// Calls `visit` once per member, in no particular order, while holding shared access.
    /// Returning [`ControlFlow::Break`] stops the traversal.
    ///
    /// `visit` may call read-only methods on this set (including a nested `range`), but must not
    /// add, delete or clear.
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        let table = self.inner.table.read();
        for value in table.iter() {
            if visit(value).is_break() {
                break;
            }
        }
    }
}

impl<T, S> std::fmt::Debug for ConcurrentSet<T, S>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table.read();
        f.debug_set().entries(table.iter()).finish()
    }
}
