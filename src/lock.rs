//! The single reader-writer lock guarding a container's table.
//!
//! A thread's first shared acquisition queues behind any parked writer, so a
//! steady stream of readers cannot starve writers. A shared acquisition nested
//! inside one the same thread already holds is recursive instead: it skips the
//! writer queue, so read-only calls made from inside a traversal cannot
//! self-deadlock.

use crossbeam_utils::CachePadded;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::reentrancy::{self, Access, Held};

/// A table behind one cache-padded [`parking_lot::RwLock`].
pub(crate) struct Locked<T> {
    data: CachePadded<RwLock<T>>,
}

/// Shared access to a [`Locked`] table.
pub(crate) struct Reader<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    _held: Held,
}

/// Exclusive access to a [`Locked`] table.
pub(crate) struct Writer<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _held: Held,
}

impl<T> Locked<T> {
    pub fn new(table: T) -> Self {
        Self {
            data: CachePadded::new(RwLock::new(table)),
        }
    }

    /// Identity of this lock, used to recognise re-entry by the same thread.
    #[inline]
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Blocks until shared access is available.
    pub fn read(&self) -> Reader<'_, T> {
        let held = reentrancy::enter(self.id(), Access::Shared);
        let guard = if held.is_nested() {
            self.data.read_recursive()
        } else {
            self.data.read()
        };
        Reader {
            guard,
            _held: held,
        }
    }

    /// Blocks until exclusive access is available.
    pub fn write(&self) -> Writer<'_, T> {
        let held = reentrancy::enter(self.id(), Access::Exclusive);
        Writer {
            guard: self.data.write(),
            _held: held,
        }
    }
}

impl<T> std::ops::Deref for Reader<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::Deref for Writer<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for Writer<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
