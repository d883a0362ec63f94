//! Poison-tolerant lock access.
//!
//! Options and asset bookkeeping are plain data; a panic in another thread
//! leaves them readable, so a poisoned lock is logged and recovered.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    poisoned: PoisonError<G>,
    owner: &'static str,
    op: &'static str,
    kind: &'static str,
) -> G {
    warn!(
        target = "speed_optimizer::util::lock",
        owner,
        op,
        lock_kind = kind,
        "recovered poisoned lock"
    );
    poisoned.into_inner()
}

pub(crate) fn read_guard<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, op, "rwlock.read"))
}

pub(crate) fn write_guard<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, op, "rwlock.write"))
}

pub(crate) fn exclusive<'a, T>(
    lock: &'a Mutex<T>,
    owner: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, op, "mutex"))
}
