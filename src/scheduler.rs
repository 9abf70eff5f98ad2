//! The scheduler (spec.md §4.3): one runnable FIFO drained each round from
//! three staging queues in a fixed tie-break order
//! (`reactor_wakes → yielded → newly_spawned`), a context switch per
//! runnable uthread, and a dispatch on whatever that uthread published as
//! its suspension reason. Grounded on the teacher's `FifoScheduler`/
//! `FifoSchedulerThread` (`lib.rs`'s `spawned`/`ready` queues and
//! `thread.rs`'s `tick`), collapsed from a scheduler-as-coroutine (the
//! teacher runs its own scheduler on a dedicated fiber, switched to from
//! `Handler::ready`) down to a plain function, since nothing here needs a
//! saved context of its own.

use std::any::Any;
use std::rc::Rc;

use log::trace;

use crate::context::{Fiber, Suspend};
use crate::error::Result;
use crate::event::{ExitStatus, Notify};
use crate::ids::Tid;
use crate::runtime::with_current;
use crate::status::Status;
use crate::uthread::{BoxedEntry, Slot, Uthread, Zombie};

/// Allocates a `Tid`, builds a not-yet-started `Fiber` over a freshly
/// acquired stack, and stages it in `newly_spawned` (spec.md §4.3's
/// lowest-priority queue: a freshly spawned uthread never preempts
/// something the reactor or a voluntary yield already made runnable this
/// round). Two-phase `reserve`/`fill` on `ths` because the entry
/// trampoline needs to know its own `Tid` (to look itself up on its first
/// resume) before the `Uthread` that owns it can exist.
pub(crate) fn spawn_uthread(entry: BoxedEntry) -> Result<Tid> {
    with_current(|rt| -> Result<Tid> {
        let tid = rt.ths.reserve();
        let stack = rt.stacks.acquire()?;
        let fiber = Fiber::new(stack, Box::new(move || entry(tid)));
        rt.ths.fill(tid, Slot::Live(Uthread::new(tid, fiber)));
        rt.newly_spawned.push_back(tid);
        trace!("spawned {tid}");
        Ok(tid)
    })
}

/// Clears whatever this uthread was parked on and stages it onto
/// `reactor_wakes`, the highest-priority queue (spec.md §4.3): a wake is
/// always reactor- or handoff-driven, so it always takes precedence over
/// anything merely yielded or newly spawned this round. Idempotent if
/// called on a uthread that is not actually parked (e.g. a duplicate
/// readiness notification); a no-op if `tid` no longer names a live
/// uthread.
pub(crate) fn wake(tid: Tid) {
    with_current(|rt| {
        if let Some(u) = rt.ths.get_mut(tid).and_then(Slot::live_mut) {
            u.pending_sock = None;
            u.pending_join = None;
            u.status.remove(Status::WAIT_CONNECT | Status::WAIT_ACCEPT | Status::WAIT_JOIN);
            rt.reactor_wakes.push_back(tid);
        }
    });
}

/// Drains the three staging queues into `runnable` in spec.md §4.3's
/// fixed tie-break order, each queue emptied completely before the next
/// is considered, so e.g. every reactor wake staged this round runs
/// before any merely-yielded uthread even if the yield was staged
/// earlier in wall-clock terms.
fn drain_staging() {
    with_current(|rt| {
        rt.runnable.extend(rt.reactor_wakes.drain(..));
        rt.runnable.extend(rt.yielded.drain(..));
        rt.runnable.extend(rt.newly_spawned.drain(..));
    });
}

/// Drives the scheduler until `Runtime::is_quiescent` (spec.md §4.3 point
/// 3: no live uthread remains — a `Zombie` kept around for a late join
/// that never comes does not count, and never blocks shutdown). Each
/// round drains the staging queues, runs every resulting runnable
/// uthread to its next suspension, and — only once nothing at all is
/// runnable — blocks in the I/O pump so a socket readiness event or a
/// lock handoff can produce the next round's work.
pub(crate) fn run() {
    loop {
        drain_staging();
        if with_current(|rt| rt.runnable.is_empty()) {
            if with_current(|rt| rt.is_quiescent()) {
                return;
            }
            crate::reactor::pump();
            continue;
        }
        while let Some(tid) = with_current(|rt| rt.runnable.pop_front()) {
            resume_and_dispatch(tid);
        }
    }
}

/// Checks a uthread's fiber out for the duration of one context switch
/// (so a re-entrant `with_current` call from inside the resumed fiber's
/// own code — e.g. `crate::current()` — never aliases this function's
/// own borrow of the `Uthread`), resumes it, and either dispatches its
/// published suspension reason or reclaims it if it finished.
fn resume_and_dispatch(tid: Tid) {
    let fiber = with_current(|rt| {
        rt.ths.get_mut(tid).and_then(Slot::live_mut).and_then(|u| u.fiber.take())
    });
    let mut fiber = match fiber {
        Some(f) => f,
        // Already reclaimed or never existed: a stale id that slipped
        // into a staging queue (e.g. a wake raced a join's removal).
        None => return,
    };

    with_current(|rt| rt.self_tid = Some(tid));
    let suspend = fiber.switch_in();
    with_current(|rt| rt.self_tid = None);

    match suspend {
        Suspend::Parked => {
            let notify = with_current(|rt| {
                if let Some(u) = rt.ths.get_mut(tid).and_then(Slot::live_mut) {
                    u.fiber = Some(fiber);
                }
                std::mem::take(&mut rt.curev)
            });
            dispatch(tid, notify);
        }
        Suspend::Finished(exit) => finish_uthread(tid, fiber, exit),
    }
}

/// Acts on whatever a parked uthread published as its reason for
/// suspending (spec.md §3/§4.4's `curev`). Most variants are no-ops here:
/// the parking itself (registering on a socket's wait queue, a lock's
/// FIFO, or a target's `joiners` list) already happened synchronously,
/// before the switch out, inside `socket.rs`/`mutex.rs`/`join()`. The two
/// exceptions are a plain voluntary yield, which re-enqueues immediately,
/// and an unlock, which additionally hands the lock to its new owner.
fn dispatch(tid: Tid, notify: Notify) {
    match notify {
        Notify::None => with_current(|rt| rt.yielded.push_back(tid)),
        Notify::Unlock(lock_id) => {
            crate::mutex::handoff_lock(lock_id);
            with_current(|rt| rt.yielded.push_back(tid));
        }
        Notify::SockRead(_)
        | Notify::SockWrite(_)
        | Notify::SockConnect(_)
        | Notify::SockAccept(_)
        | Notify::JoinWait(_)
        | Notify::LockWait(_) => {
            // Parked on a wait queue already; `wake()` is the only thing
            // that moves this uthread again.
        }
        Notify::EndThread => {
            // Unreachable in practice: a finished entry closure suspends
            // via `Suspend::Finished`, never by publishing `curev` and
            // parking, so `dispatch` never actually observes this.
        }
    }
}

/// Reclaims a finished uthread's stack, hands its result to every joiner
/// already parked on it (each gets an independent clone per spec.md's
/// multi-joiner support), and retires the registry slot to a `Zombie` at
/// the same id so exactly one later, late `join()` can still resolve it
/// (spec.md §4.7).
fn finish_uthread(tid: Tid, fiber: Fiber, exit: ExitStatus) {
    let stack = fiber.into_stack_handle();
    with_current(|rt| rt.stacks.release(stack));

    let (joiners, return_value): (Vec<Tid>, Option<Rc<dyn Any>>) = with_current(|rt| {
        match rt.ths.get_mut(tid).and_then(Slot::live_mut) {
            Some(u) => (std::mem::take(&mut u.joiners), u.return_value.take()),
            None => (Vec::new(), None),
        }
    });

    with_current(|rt| {
        if let Some(slot) = rt.ths.get_mut(tid) {
            *slot = Slot::Zombie(Zombie { exit_status: exit.clone(), return_value: return_value.clone() });
        }
    });

    for joiner in joiners {
        with_current(|rt| {
            if let Some(u) = rt.ths.get_mut(joiner).and_then(Slot::live_mut) {
                u.join_result = Some(exit.clone());
                u.join_return_value = Some(return_value.clone());
            }
        });
        wake(joiner);
    }

    trace!("{tid} finished: {exit:?}");
}
