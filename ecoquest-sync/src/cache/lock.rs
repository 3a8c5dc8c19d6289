//! Lock helpers that keep working after a holder panicked
//!
//! Slots only hold immutable `Arc<CacheEntry>` values, so a guard taken from
//! a poisoned lock still sees whole entries.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recovered<G>(result: LockResult<G>, source: &'static str, op: &'static str, kind: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(source, op, kind, "Lock poisoned by a panicked holder, continuing");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(lock: &'a RwLock<T>, source: &'static str, op: &'static str) -> RwLockReadGuard<'a, T> {
    recovered(lock.read(), source, op, "read")
}

pub(crate) fn rw_write<'a, T>(lock: &'a RwLock<T>, source: &'static str, op: &'static str) -> RwLockWriteGuard<'a, T> {
    recovered(lock.write(), source, op, "write")
}

pub(crate) fn mutex_lock<'a, T>(lock: &'a Mutex<T>, source: &'static str, op: &'static str) -> MutexGuard<'a, T> {
    recovered(lock.lock(), source, op, "mutex")
}
