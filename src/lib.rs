// Copyright 2015-2016 Dawid Ciężarkiewicz <dpc@dpc.pw>
// See LICENSE-MPL2 file for more information.

//! `fibrio` is a single-threaded, stackful coroutine runtime with an
//! integrated non-blocking socket I/O event loop and a cooperative mutex.
//!
//! A process calls [`start`] once with an entry closure; everything else
//! — more coroutines, sockets, locks — is spawned or opened from inside
//! that closure or one of its descendants via the free functions below.
//! There is exactly one OS thread involved: `start` does not return until
//! every uthread it transitively spawned has exited (spec.md §4.3's
//! termination condition), driving its own cooperative scheduler and I/O
//! reactor loop the whole time.
//!
//! ```no_run
//! fibrio::start(|| {
//!     let child = fibrio::spawn(|| 41 + 1).unwrap();
//!     let result: i32 = fibrio::join(child).unwrap();
//!     assert_eq!(result, 42);
//! }).unwrap();
//! ```

mod context;
mod error;
mod event;
mod ids;
mod idmap;
mod mutex;
mod reactor;
mod runtime;
mod scheduler;
mod socket;
mod stack;
mod status;
mod uthread;

use std::any::Any;
use std::rc::Rc;

use crate::error::LifecycleError;
use crate::event::{ExitStatus, Notify};
use crate::runtime::{current_tid_checked, with_current};
use crate::status::Status;
use crate::uthread::Slot;

pub use crate::error::{Error, InvalidArgument, LifecycleError as JoinError, ResourceError, Result, TransportError};
pub use crate::ids::{LockId, SockId, Tid};
pub use crate::runtime::RuntimeConfig;

pub use crate::mutex::{mutex_init, mutex_lock, mutex_release, mutex_unlock};
pub use crate::socket::{accept, close, connect, listen, local_addr, read, set_hwm, set_lwm, write};

/// Runs `entry` as the first uthread of a fresh runtime with the default
/// [`RuntimeConfig`], blocking the calling OS thread until it and every
/// uthread it transitively spawns has exited (spec.md §6's
/// `Runtime::start`).
pub fn start<F>(entry: F) -> Result<()>
where
    F: FnOnce() + 'static,
{
    crate::runtime::start(RuntimeConfig::default(), entry)
}

/// As [`start`], with an explicit [`RuntimeConfig`].
pub fn start_with_config<F>(config: RuntimeConfig, entry: F) -> Result<()>
where
    F: FnOnce() + 'static,
{
    crate::runtime::start(config, entry)
}

/// Spawns `f` as a new uthread, runnable as soon as the scheduler next
/// drains its staging queues (spec.md §4.3: newly spawned uthreads rank
/// behind reactor wakes and yields in the same round). Must be called
/// from inside a running uthread.
pub fn spawn<F, T>(f: F) -> Result<Tid>
where
    F: FnOnce() -> T + 'static,
    T: 'static,
{
    current_tid_checked("spawn")?;
    crate::scheduler::spawn_uthread(Box::new(move |tid| {
        let value = f();
        with_current(|rt| {
            if let Some(u) = rt.ths.get_mut(tid).and_then(Slot::live_mut) {
                u.return_value = Some(Rc::new(value) as Rc<dyn Any>);
            }
        });
        ExitStatus::Finished
    }))
}

/// Voluntarily suspends the current uthread, re-enqueuing it at the tail
/// of the runnable FIFO behind anything the reactor or a lock handoff
/// already made runnable this round (spec.md §4.3).
pub fn yield_now() -> Result<()> {
    current_tid_checked("yield_now")?;
    with_current(|rt| rt.curev = Notify::None);
    crate::context::switch_out();
    Ok(())
}

/// The currently running uthread's id, or [`Tid::INVALID`] if called
/// outside of one.
pub fn current() -> Tid {
    crate::runtime::current_tid()
}

/// Waits for `target` to exit and returns the value its entry closure
/// returned, downcast to `T`. Supports more than one caller joining the
/// same target: each gets an independent clone (`T: Clone`), whether they
/// parked before the target finished or called `join` afterwards
/// (spec.md §4.7's late-join contract). Fails with
/// [`JoinError::JoinNonexistent`] if `target` never existed or has
/// already been fully reclaimed by an earlier late join, with
/// [`JoinError::JoinedAbnormally`] if it panicked, and with
/// [`JoinError::JoinTypeMismatch`] if it returned a value of a different
/// type.
pub fn join<T: Clone + 'static>(target: Tid) -> Result<T> {
    let self_tid = current_tid_checked("join")?;

    let already_finished = with_current(|rt| -> Result<Option<(ExitStatus, Option<Rc<dyn Any>>)>> {
        match rt.ths.get(target) {
            None => Err(LifecycleError::JoinNonexistent(target).into()),
            Some(Slot::Zombie(z)) => Ok(Some((z.exit_status.clone(), z.return_value.clone()))),
            Some(Slot::Live(_)) => Ok(None),
        }
    })?;

    let (exit, return_value) = match already_finished {
        Some((exit, rv)) => {
            // A genuinely late join: consume the zombie now, freeing its
            // id for reuse. A second late join on the same `target`
            // correctly falls into the `None` arm above.
            with_current(|rt| rt.ths.remove(target));
            (exit, rv)
        }
        None => {
            with_current(|rt| {
                if let Some(u) = rt.ths.get_mut(target).and_then(Slot::live_mut) {
                    u.joiners.push(self_tid);
                }
                if let Some(u) = rt.ths.get_mut(self_tid).and_then(Slot::live_mut) {
                    u.pending_join = Some(target);
                    u.status.insert(Status::WAIT_JOIN);
                }
                rt.curev = Notify::JoinWait(target);
            });
            crate::context::switch_out();
            with_current(|rt| {
                let u = rt
                    .ths
                    .get_mut(self_tid)
                    .and_then(Slot::live_mut)
                    .expect("the joiner itself must still be a live uthread");
                let exit = u.join_result.take().expect("resumed from join() without a published result");
                let rv = u.join_return_value.take().expect("resumed from join() without a published return value");
                (exit, rv)
            })
        }
    };

    match exit {
        ExitStatus::Panicked(reason) => Err(LifecycleError::JoinedAbnormally { tid: target, reason }.into()),
        ExitStatus::Finished => {
            let rv = return_value.ok_or(LifecycleError::JoinTypeMismatch(target))?;
            rv.downcast_ref::<T>().cloned().ok_or_else(|| LifecycleError::JoinTypeMismatch(target).into())
        }
    }
}

/// Stashes `data` as the current uthread's private data, overwriting
/// whatever was there before.
pub fn set_private_data<T: 'static>(data: T) -> Result<()> {
    let tid = current_tid_checked("set_private_data")?;
    with_current(|rt| {
        if let Some(u) = rt.ths.get_mut(tid).and_then(Slot::live_mut) {
            u.private_data = Some(Box::new(data));
        }
    });
    Ok(())
}

/// Reads back the current uthread's private data, if any was set and is
/// of type `T`.
pub fn private_data<T: Clone + 'static>() -> Result<Option<T>> {
    let tid = current_tid_checked("private_data")?;
    Ok(with_current(|rt| {
        rt.ths
            .get(tid)
            .and_then(Slot::live)
            .and_then(|u| u.private_data.as_ref())
            .and_then(|d| d.downcast_ref::<T>())
            .cloned()
    }))
}

/// Sets the cooperative `STOP` signal on every currently live uthread.
/// Non-blocking: it is up to each uthread to observe [`should_stop`] and
/// exit on its own (spec.md §5/§6).
pub fn stop() {
    crate::runtime::request_stop();
}

/// Whether the current uthread has been asked to stop.
pub fn should_stop() -> bool {
    with_current(|rt| {
        rt.self_tid
            .and_then(|tid| rt.ths.get(tid))
            .and_then(Slot::live)
            .map(|u| u.status.contains(Status::STOP))
            .unwrap_or(false)
    })
}
