//! Thread-safe hash containers guarded by a single reader-writer lock.
//!
//! [`ConcurrentMap`] and [`ConcurrentSet`] wrap an ordinary
//! [`hashbrown::HashTable`] in one [`parking_lot::RwLock`] per instance.
//! Lookups and traversals take shared access, mutations take exclusive access,
//! and every read that returns data returns an owned copy.
//!
//! # Locking rules
//!
//! - Callers block until the lock is available. There are no timeouts.
//! - A waiting writer blocks new readers, so readers cannot starve writers.
//! - `range` holds shared access for the whole traversal. Its callback may
//!   read the same container again, including through a nested `range`, but
//!   must not mutate it.
//! - `ConcurrentMap::range_change` holds exclusive access for the whole
//!   traversal. Its callback must not touch the same container at all.
//! - A callback that never returns holds the lock forever and blocks every
//!   other caller of that container.
//! - Distinct containers have distinct locks and never block each other.
//!
//! Breaking these rules deadlocks the calling thread. Debug builds detect the
//! re-entry and panic instead.
//!
//! # Examples
//! ```
//! use std::{ops::ControlFlow, thread};
//! use rwsafe::{ConcurrentMap, ConcurrentSet};
//!
//! let seen = ConcurrentSet::new();
//! let counts = ConcurrentMap::new();
//!
//! thread::scope(|s| {
//!     for word in ["a", "b", "a"] {
//!         let (seen, counts) = (&seen, &counts);
//!         s.spawn(move || {
//!             seen.add(word);
//!             counts.put_if_new(word, 0);
//!         });
//!     }
//! });
//!
//! let mut total = 0;
//! seen.range(|word| {
//!     total += counts.get(word).map_or(0, |_| 1);
//!     ControlFlow::Continue(())
//! });
//! assert_eq!(total, 2);
//! ```

mod lock;
pub mod map;
mod reentrancy;
pub mod set;

pub use map::ConcurrentMap;
pub use set::ConcurrentSet;
