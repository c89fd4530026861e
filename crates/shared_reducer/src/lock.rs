//! Exclusive access to the reconciliation state with reentrancy detection.
//!
//! Every dispatch and every inbound message runs to completion while
//! holding the lock. A second entry from the thread that already holds it
//! (a generator or synchronous sync callback calling `dispatch`) fails with
//! [`SyncError::ReentrantDispatch`] instead of deadlocking. Entries from
//! other threads wait their turn.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

pub(crate) struct DispatchLock<S> {
    owner: Mutex<Option<ThreadId>>,
    state: Mutex<S>,
}

impl<S> DispatchLock<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            owner: Mutex::new(None),
            state: Mutex::new(state),
        }
    }

    /// Acquires the lock, failing fast on reentry from the owning thread.
    pub(crate) fn enter(&self) -> SyncResult<DispatchGuard<'_, S>> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            return Err(SyncError::ReentrantDispatch);
        }

        let state = self.state.lock();
        *self.owner.lock() = Some(me);
        Ok(DispatchGuard {
            owner: &self.owner,
            state,
        })
    }
}

/// Released on drop, including during unwinding.
pub(crate) struct DispatchGuard<'a, S> {
    owner: &'a Mutex<Option<ThreadId>>,
    state: MutexGuard<'a, S>,
}

impl<S> Deref for DispatchGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

impl<S> DerefMut for DispatchGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.state
    }
}

impl<S> Drop for DispatchGuard<'_, S> {
    fn drop(&mut self) {
        // Cleared before `state` is unlocked so the next owner never sees a stale id.
        *self.owner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Arc;

    #[test]
    fn reentry_fails_fast() {
        let lock = DispatchLock::new(0u32);
        let mut guard = lock.enter().unwrap();
        *guard += 1;
        assert!(matches!(lock.enter(), Err(SyncError::ReentrantDispatch)));
        drop(guard);

        assert_eq!(*lock.enter().unwrap(), 1);
    }

    #[test]
    fn released_when_holder_panics() {
        let lock = DispatchLock::new(());
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.enter().unwrap();
            panic!("generator failed");
        }));
        assert!(result.is_err());
        assert!(lock.enter().is_ok());
    }

    #[test]
    fn other_threads_wait_instead_of_failing() {
        let lock = Arc::new(DispatchLock::new(Vec::new()));
        let guard = lock.enter().unwrap();

        let worker = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                let mut state = lock.enter().expect("other thread must wait, not fail");
                state.push("worker");
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(guard);
        worker.join().unwrap();

        assert_eq!(*lock.enter().unwrap(), vec!["worker"]);
    }
}
