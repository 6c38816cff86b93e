//! Per-thread tracking of held container locks.
//!
//! Every thread keeps a small registry of the container locks it currently
//! holds and in which mode. The lock layer uses it to tell a thread's first
//! shared acquisition (which must queue behind parked writers) from a nested
//! one (which must not, or it would wait on a writer that waits on itself).
//!
//! Debug builds also use it to fail fast: anything that would need exclusive
//! access to a lock this thread already holds, or any access to a lock it
//! holds exclusively, panics instead of deadlocking. Release builds skip that
//! check and deadlock.

use core::marker::PhantomData;
use std::cell::RefCell;

/// The mode in which a container lock is held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    Shared,
    Exclusive,
}

thread_local! {
    static HELD: RefCell<Vec<(usize, Access)>> = const { RefCell::new(Vec::new()) };
}

/// Registers that the current thread is about to take the lock identified by
/// `id` in mode `access`. The registration lasts until the returned guard is
/// dropped.
///
/// # Panics
///
/// In debug builds, panics if the acquisition would self-deadlock.
#[inline]
pub(crate) fn enter(id: usize, access: Access) -> Held {
    // `try_with` fails only during thread-local teardown; nothing is tracked then.
    let (already, registered) = HELD
        .try_with(|held| {
            let mut held = held.borrow_mut();
            let already = held.iter().find(|(h, _)| *h == id).map(|&(_, mode)| mode);
            if cfg!(debug_assertions) && already.is_some_and(|mode| would_deadlock(mode, access)) {
                return (already, false);
            }
            held.push((id, access));
            (already, true)
        })
        .unwrap_or((None, false));

    #[cfg(debug_assertions)]
    {
        if let Some(held) = already.filter(|&mode| would_deadlock(mode, access)) {
            tracing::error!(
                container = id,
                held = ?held,
                requested = ?access,
                "reentrant lock acquisition"
            );
            panic!(
                "reentrancy detected: {access:?} access requested while this thread holds \
                 {held:?} access to the same container"
            );
        }
    }

    Held {
        id,
        access,
        nested: already.is_some(),
        registered,
        _nosend: PhantomData,
    }
}

/// Only shared-inside-shared can be taken again by the holding thread.
#[inline]
fn would_deadlock(held: Access, requested: Access) -> bool {
    held == Access::Exclusive || requested == Access::Exclusive
}

/// RAII registration returned by [`enter`]. Tied to the thread that created it.
pub(crate) struct Held {
    id: usize,
    access: Access,
    nested: bool,
    registered: bool,
    _nosend: PhantomData<*const ()>,
}

impl Held {
    /// Whether this thread already held the same lock when it entered.
    #[inline]
    pub(crate) fn is_nested(&self) -> bool {
        self.nested
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        if !self.registered {
            return;
        }
        let entry = (self.id, self.access);
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&e| e == entry) {
                held.remove(pos);
            }
        });
    }
}
