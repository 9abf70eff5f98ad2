//! The uthread data model (spec.md §3): `internal.h`'s `uthread_` struct,
//! re-expressed as a Rust type on top of `crate::context::Fiber`. A few
//! fields the source carries (`entry`, `data`, its own raw `ctx`/`cs`
//! pointers) collapse away here: a Rust closure already captures its
//! argument, and `Fiber` already owns the two saved contexts spec.md §4.4
//! describes, so there is nothing left for `Uthread` itself to store but
//! the fiber handle and the scheduling metadata around it.

use std::any::Any;
use std::rc::Rc;

use crate::context::Fiber;
use crate::event::ExitStatus;
use crate::ids::{SockId, Tid};
use crate::status::Status;

/// A boxed coroutine entry. Takes its own `Tid` so the trampoline can
/// publish `END_THREAD_NOTIFY` under the right id without `Uthread`
/// having to hand out a back-reference to itself.
pub(crate) type BoxedEntry = Box<dyn FnOnce(Tid) -> ExitStatus>;

/// A live, suspended-or-runnable coroutine (spec.md §3's `uthread_`).
pub(crate) struct Uthread {
    pub(crate) tid: Tid,
    /// Checked out via `Option::take` for the duration of
    /// `scheduler::resume_and_dispatch`'s `switch_in` call, so a
    /// re-entrant `with_current` lookup from inside the resumed fiber's
    /// own code (e.g. to read `self.tid`) never aliases the scheduler's
    /// own borrow of this `Uthread`.
    pub(crate) fiber: Option<Fiber>,
    pub(crate) status: Status,
    /// The uthread this one is waiting to join, if any (spec.md §3's
    /// `pending`). Set by `join()` when it parks, cleared uniformly by
    /// `crate::scheduler::wake` on resumption.
    pub(crate) pending_join: Option<Tid>,
    /// The socket this one is blocked on, if any. Set by
    /// `crate::socket::mark_pending` when an operation parks, cleared
    /// uniformly by `crate::scheduler::wake` on resumption.
    pub(crate) pending_sock: Option<SockId>,
    /// Every uthread currently parked in `join(self.tid)`, FIFO order
    /// (spec.md's Open Question: more than one joiner is supported).
    pub(crate) joiners: Vec<Tid>,
    /// Set by `scheduler::finish_uthread` the moment this uthread's
    /// `END_THREAD_NOTIFY` is dispatched, for whichever joiner it wakes;
    /// consumed by `join()` on resumption. Paired with
    /// `join_return_value` so a joiner that was already parked when its
    /// target finished never has to go back and read the target's
    /// (possibly since-removed) zombie slot to get its value.
    pub(crate) join_result: Option<ExitStatus>,
    /// The target's stashed return value, copied here alongside
    /// `join_result` at wake time. `Some(None)` only if the target
    /// panicked before stashing a value.
    pub(crate) join_return_value: Option<Option<Rc<dyn Any>>>,
    /// Stashed by the entry closure itself (via `crate::runtime::with_current`)
    /// just before it returns, so `join::<T>` has something to downcast.
    /// Only ever `Some` when `join_result` is `Some(ExitStatus::Finished)`.
    /// `Rc`, not `Box`: `crate::scheduler::finish_uthread` hands an
    /// independent copy of this value to every joiner parked at exit time,
    /// plus one more kept in the `Zombie` for a still-later late join.
    pub(crate) return_value: Option<Rc<dyn Any>>,
    /// Per-uthread data set via `set_private_data`/read via `private_data`.
    pub(crate) private_data: Option<Box<dyn Any>>,
}

impl Uthread {
    pub(crate) fn new(tid: Tid, fiber: Fiber) -> Self {
        Uthread {
            tid,
            fiber: Some(fiber),
            status: Status::empty(),
            pending_join: None,
            pending_sock: None,
            joiners: Vec::new(),
            join_result: None,
            join_return_value: None,
            return_value: None,
            private_data: None,
        }
    }
}

/// A finished uthread retained at its own id so exactly the still-pending
/// late joiners can observe its outcome (spec.md §4.7's "if target already
/// exited, return its status"). Removed from the registry entirely the
/// first time a `join()` actually consumes it.
pub(crate) struct Zombie {
    pub(crate) exit_status: ExitStatus,
    pub(crate) return_value: Option<Rc<dyn Any>>,
}

/// A registry entry: either a still-running uthread, or the retained
/// result of one that already finished and is waiting on a late join.
pub(crate) enum Slot {
    Live(Uthread),
    Zombie(Zombie),
}

impl Slot {
    pub(crate) fn live(&self) -> Option<&Uthread> {
        match self {
            Slot::Live(u) => Some(u),
            Slot::Zombie(_) => None,
        }
    }

    pub(crate) fn live_mut(&mut self) -> Option<&mut Uthread> {
        match self {
            Slot::Live(u) => Some(u),
            Slot::Zombie(_) => None,
        }
    }
}

/// Panics with a consistent message for every "called outside of a
/// running uthread" site (spec.md's blocking operations all require a
/// current uthread; `runtime::current_tid_checked` is the actual guard,
/// this just names the call site uniformly in error text).
pub(crate) fn not_in_uthread(op: &'static str) -> crate::error::Error {
    crate::error::InvalidArgument::NotInUthread(op).into()
}
