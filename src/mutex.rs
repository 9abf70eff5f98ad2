//! The cooperative mutex (spec.md §4.6), grounded directly on
//! `original_source/lock.cpp`'s four operations (`coro_lock_init`,
//! `coro_lock_lock`, `coro_lock_unlock`, `coro_lock_release`). The
//! original busy-loops a coroutine across repeated
//! `coro_schedule_uthread` calls while a lock is held by someone else;
//! here that collapses to a single park (FIFO wait queue, one publish of
//! `Notify::LockWait`, one `switch_out`) plus a scheduler-side handoff
//! when the owner unlocks, since the scheduler already knows how to wake
//! a specific parked uthread.

use std::collections::VecDeque;

use crate::error::{InvalidArgument, Result};
use crate::event::Notify;
use crate::ids::{LockId, Tid};
use crate::runtime::{current_tid_checked, with_current};

/// A `coro_lock` (spec.md §3): at most one owner, a FIFO of everyone
/// currently parked in `mutex_lock` waiting for it.
pub(crate) struct CoroLock {
    pub(crate) owner: Option<Tid>,
    pub(crate) wait: VecDeque<Tid>,
}

impl CoroLock {
    fn new() -> Self {
        CoroLock { owner: None, wait: VecDeque::new() }
    }
}

/// Creates a new, unheld lock.
pub fn mutex_init() -> LockId {
    with_current(|rt| rt.locks.insert(CoroLock::new()))
}

/// Acquires `lock_id`, parking the current uthread if it is already held
/// by someone else. Returns `InvalidArgument::RecursiveLock` if the
/// caller already owns it (spec.md §4.6: no recursive lock).
pub fn mutex_lock(lock_id: LockId) -> Result<()> {
    let tid = current_tid_checked("mutex_lock")?;
    let acquired = with_current(|rt| -> Result<bool> {
        let lock = rt.locks.get_mut(lock_id).ok_or(InvalidArgument::BadLock(lock_id))?;
        if lock.owner == Some(tid) {
            return Err(InvalidArgument::RecursiveLock(lock_id).into());
        }
        if lock.owner.is_none() {
            lock.owner = Some(tid);
            return Ok(true);
        }
        lock.wait.push_back(tid);
        rt.curev = Notify::LockWait(lock_id);
        Ok(false)
    })?;
    if !acquired {
        crate::context::switch_out();
    }
    Ok(())
}

/// Releases `lock_id`, which the caller must currently own
/// (`InvalidArgument::NotOwner` otherwise), handing it off to the FIFO
/// head of anyone parked waiting for it. The unlocking uthread itself
/// suspends once so the handoff is visible to the scheduler before
/// either uthread runs again; `scheduler::dispatch`'s `Notify::Unlock`
/// arm re-enqueues it unconditionally afterwards.
pub fn mutex_unlock(lock_id: LockId) -> Result<()> {
    let tid = current_tid_checked("mutex_unlock")?;
    with_current(|rt| -> Result<()> {
        let lock = rt.locks.get(lock_id).ok_or(InvalidArgument::BadLock(lock_id))?;
        if lock.owner != Some(tid) {
            return Err(InvalidArgument::NotOwner(lock_id).into());
        }
        rt.curev = Notify::Unlock(lock_id);
        Ok(())
    })?;
    crate::context::switch_out();
    Ok(())
}

/// Destroys a lock that is not currently held
/// (`InvalidArgument::StillHeld` otherwise).
pub fn mutex_release(lock_id: LockId) -> Result<()> {
    with_current(|rt| -> Result<()> {
        let lock = rt.locks.get(lock_id).ok_or(InvalidArgument::BadLock(lock_id))?;
        if lock.owner.is_some() {
            return Err(InvalidArgument::StillHeld(lock_id).into());
        }
        rt.locks.remove(lock_id);
        Ok(())
    })
}

/// Clears `lock_id`'s owner, hands it to the FIFO head of `wait` if one
/// is parked, and wakes that new owner. Called by
/// `crate::scheduler::dispatch` after a `Notify::Unlock`, i.e. only ever
/// after the unlocking uthread itself has already suspended — so there
/// is no risk of the new owner running before the old one has actually
/// let go.
pub(crate) fn handoff_lock(lock_id: LockId) {
    let next = with_current(|rt| {
        let lock = match rt.locks.get_mut(lock_id) {
            Some(lock) => lock,
            None => return None,
        };
        lock.owner = None;
        let next = lock.wait.pop_front();
        lock.owner = next;
        next
    });
    if let Some(tid) = next {
        crate::scheduler::wake(tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{run_with, Runtime};
    use crate::runtime::RuntimeConfig;

    #[test]
    fn new_lock_is_unheld() {
        let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
        run_with(&mut rt, || {
            let id = mutex_init();
            with_current(|rt| assert_eq!(rt.locks.get(id).unwrap().owner, None));
        });
    }

    #[test]
    fn release_while_held_is_rejected() {
        let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
        run_with(&mut rt, || {
            let id = mutex_init();
            with_current(|rt| rt.locks.get_mut(id).unwrap().owner = Some(Tid::new(1)));
            assert!(matches!(
                mutex_release(id),
                Err(crate::error::Error::InvalidArgument(InvalidArgument::StillHeld(_)))
            ));
        });
    }
}
