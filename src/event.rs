//! The suspension-reason event a coroutine publishes into
//! `Runtime::curev` before switching out (spec.md §3/§4.4), and the
//! enum the source's `coro_event_` tagged union collapses to once it's
//! expressed as a proper Rust type instead of a `{int event; union {...}}`.

use crate::ids::{LockId, SockId, Tid};

/// What a uthread was doing when it last suspended. Read exactly once by
/// the scheduler immediately after the context switch that follows
/// publishing it (spec.md §3's `curev` invariant).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Notify {
    /// Voluntary yield: re-enqueue at the tail of the runnable FIFO.
    None,
    /// Parked on a socket's `readqueue`.
    SockRead(SockId),
    /// Parked on a socket's `writequeue`.
    SockWrite(SockId),
    /// Parked on a socket's `eventqueue` awaiting connect completion.
    SockConnect(SockId),
    /// Parked on a listening socket's `eventqueue` awaiting accept.
    SockAccept(SockId),
    /// The entry function returned or panicked; see `ExitStatus`.
    EndThread,
    /// Released a lock; the scheduler must hand it off to the FIFO head of
    /// `wait`, if any, then re-enqueue the unlocker itself.
    Unlock(LockId),
    /// Parked waiting for `target` to publish `EndThread`. A no-op for the
    /// scheduler's own dispatch: the parking already happened synchronously
    /// in `join()` before the switch out. Present so a suspension always has
    /// a named reason, matching spec.md §4.7.
    JoinWait(Tid),
    /// Parked waiting for a lock currently held by someone else. Likewise a
    /// scheduler-dispatch no-op; the parking happened synchronously in
    /// `mutex_lock()`.
    LockWait(LockId),
}

impl Default for Notify {
    fn default() -> Self {
        Notify::None
    }
}

/// How a uthread's entry function concluded.
#[derive(Clone, Debug)]
pub enum ExitStatus {
    /// The entry function ran to completion and returned a value.
    Finished,
    /// The entry function panicked; the message is the panic payload if it
    /// was a `&str` or `String`.
    Panicked(String),
}
