//! The stackful context-switch wrapper (spec.md §4.4, §9): "save current
//! execution frame, resume another." Built on the `context` crate the
//! teacher already depends on for its own coroutines, with the
//! thread-local "frame stack" pattern `corona`'s `coroutine.rs` uses so a
//! `switch_out()` called from deep inside arbitrarily-nested user code can
//! find its way back to whoever most recently resumed it, without having
//! to thread a reference through every call on the way down.
//!
//! Every uthread holds two saved contexts per spec.md §3/§4.4: its own,
//! and the "switcher context" of whoever is to be resumed when it next
//! suspends (always the scheduler, for a user coroutine, since the
//! scheduler is the only thing that ever calls `switch_in`). `Fiber`
//! models the former; `FRAMES` models the latter, kept per-OS-thread
//! rather than per-fiber since this runtime only ever runs on one thread
//! at a time and the "current frame to return to" is always exactly the
//! most recent `switch_in` call still on the native call stack.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use context::{Context, Transfer};

use crate::event::ExitStatus;
use crate::stack::StackHandle;

thread_local! {
    /// The stack of "who resumed me" contexts, one per currently
    /// in-flight `switch_in` call on this OS thread's native stack.
    /// `switch_out` pops the top to resume it, then pushes back whatever
    /// it gets resumed with next, mirroring spec.md §4.4's per-uthread
    /// "switcher context" but kept centrally since only one fiber is ever
    /// actually running here.
    static FRAMES: RefCell<Vec<Context>> = RefCell::new(Vec::new());
}

type BoxedEntry = Box<dyn FnOnce() -> ExitStatus>;

/// A suspended or not-yet-started coroutine's saved execution context,
/// paired with the entry closure until its first resume. `stack` is kept
/// alive here (owning a checked-out slot from `crate::stack::StackPool`)
/// for exactly as long as the fiber might still be resumed; dropping a
/// `Fiber` before it has run to completion releases the stack slot.
pub(crate) struct Fiber {
    context: Option<Context>,
    /// Consumed by the very first `switch_in`; carries the entry closure
    /// across to the new stack as the first resume's data payload. `None`
    /// after the first switch-in, including for every subsequent one.
    pending_entry: Option<Box<TrampolineArgs>>,
    stack: StackHandle,
}

/// What a fiber handed back the last time it suspended or finished.
pub(crate) enum Suspend {
    /// The fiber called `switch_out()` voluntarily from inside its entry
    /// closure (i.e. mid-coroutine, not yet finished).
    Parked,
    /// The fiber's entry closure ran to completion (or panicked).
    Finished(ExitStatus),
}

struct TrampolineArgs {
    entry: BoxedEntry,
}

impl Fiber {
    /// Builds a not-yet-started fiber over `stack`, whose first
    /// `switch_in` will run `entry` to completion (catching panics, per
    /// spec.md §9's "stackful contexts" note: a panic in one coroutine
    /// must not unwind into the scheduler's own stack).
    pub(crate) fn new(stack: StackHandle, entry: BoxedEntry) -> Self {
        let context = unsafe { Context::new(stack.as_ref(), trampoline) };
        let pending_entry = Some(Box::new(TrampolineArgs { entry }));
        Fiber { context: Some(context), pending_entry, stack }
    }

    /// Reclaims the underlying stack handle once this fiber has finished,
    /// so `crate::stack::StackPool::release` can return it to its
    /// region's free list (spec.md §4.1).
    pub(crate) fn into_stack_handle(self) -> StackHandle {
        self.stack
    }

    /// Resumes this fiber: saves the caller's own continuation onto
    /// `FRAMES`, switches into the fiber's saved context, and blocks until
    /// the fiber suspends or finishes. Only ever called by
    /// `scheduler::resume_and_dispatch`, which is the sole "switcher"
    /// spec.md §4.4 describes. The very first call additionally carries
    /// the entry closure across as the resume's data payload, which is
    /// how the not-yet-started trampoline gets hold of it.
    pub(crate) fn switch_in(&mut self) -> Suspend {
        let context = self.context.take().expect("switch_in on a fiber with no saved context");
        let data = match self.pending_entry.take() {
            Some(args) => Box::into_raw(args) as usize,
            None => 0,
        };
        let transfer = unsafe { context.resume(data) };
        let suspend = decode(transfer.data);
        self.context = Some(transfer.context);
        suspend
    }
}

fn decode(data: usize) -> Suspend {
    if data == 0 {
        return Suspend::Parked;
    }
    let boxed = unsafe { Box::from_raw(data as *mut ExitStatus) };
    Suspend::Finished(*boxed)
}

fn encode_finished(exit: ExitStatus) -> usize {
    Box::into_raw(Box::new(exit)) as usize
}

/// Suspends the currently running fiber, returning control to whoever
/// most recently called `switch_in` (on this OS thread). Resumes in place
/// when the scheduler next calls `switch_in` on this same fiber again.
/// Panics if called outside of any fiber (there is nothing to switch out
/// of): every public blocking operation in this crate checks
/// `current_tid_checked` first, so this should be unreachable from
/// outside a uthread in practice.
pub(crate) fn switch_out() {
    let caller = FRAMES.with(|f| f.borrow_mut().pop()).expect("switch_out() outside of a fiber");
    let transfer = unsafe { caller.resume(0) };
    FRAMES.with(|f| f.borrow_mut().push(transfer.context));
}

extern "C" fn trampoline(t: Transfer) -> ! {
    FRAMES.with(|f| f.borrow_mut().push(t.context));

    let args = unsafe { Box::from_raw(t.data as *mut TrampolineArgs) };
    let exit = match panic::catch_unwind(AssertUnwindSafe(args.entry)) {
        Ok(exit) => exit,
        Err(payload) => ExitStatus::Panicked(panic_message(payload)),
    };

    let caller = FRAMES.with(|f| f.borrow_mut().pop()).expect("trampoline frame vanished");
    let _ = unsafe { caller.resume(encode_finished(exit)) };
    unreachable!("a finished fiber must never be resumed again")
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "coroutine panicked with a non-string payload".to_string()
    }
}
