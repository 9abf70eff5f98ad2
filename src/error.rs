//! The error taxonomy spec.md §7 asks for (Invalid-argument, Transport,
//! Resource-exhaustion, Lifecycle), expressed with `thiserror` the way the
//! rest of the retrieval pack builds structured library errors rather than
//! by hand-writing `Display`/`Error` impls the way the teacher's own
//! `io::Result<()>`-only convention would have left unextended.

use std::io;

use thiserror::Error;

use crate::ids::{LockId, SockId, Tid};

/// The crate's single result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, one variant per spec.md §7 taxonomy kind.
#[derive(Debug, Error)]
pub enum Error {
    /// A bad id or a call made in a state the operation forbids.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    /// A socket-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Allocation failed under resource pressure.
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// A uthread/lock lifecycle contract was violated.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Invalid-argument errors (spec.md §7): bad tid, bad lockid, bad fd,
/// unlock-by-non-owner, release of a held lock.
#[derive(Debug, Error)]
pub enum InvalidArgument {
    /// No socket is registered under this id.
    #[error("no such socket: {0}")]
    BadSock(SockId),
    /// No lock is registered under this id.
    #[error("no such lock: {0}")]
    BadLock(LockId),
    /// `mutex_unlock` called by a uthread that is not the current owner.
    #[error("lock {0} unlock attempted by non-owner")]
    NotOwner(LockId),
    /// `mutex_release` called while the lock is still held.
    #[error("lock {0} release attempted while held")]
    StillHeld(LockId),
    /// `mutex_lock` called re-entrantly by the lock's own current owner.
    #[error("lock {0} re-locked by its own owner")]
    RecursiveLock(LockId),
    /// A blocking operation was attempted from outside any running uthread
    /// (e.g. before `start()`, or from the scheduler's own control flow).
    #[error("{0} called outside of a running uthread")]
    NotInUthread(&'static str),
}

/// Transport errors (spec.md §7): connect-refused, reset, write-after-close.
/// A clean EOF is not an error in this crate's contract — `read` reports it
/// as `Ok(0)`, per spec.md §4.5's sticky-EOF read contract — so there is no
/// variant for it here. Once raised, a transport error becomes the
/// socket's sticky terminal status.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection or is refusing to accept more data;
    /// the underlying `io::Error`, if one was reported.
    #[error("connection reset: {0}")]
    Reset(#[source] io::Error),
    /// The peer's connect attempt was refused.
    #[error("connection refused: {0}")]
    ConnectRefused(#[source] io::Error),
    /// Write attempted on a socket that is already closed or sticky-errored.
    #[error("write attempted after close")]
    WriteAfterClose,
    /// Any other I/O failure surfaced by the reactor.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Resource-exhaustion errors (spec.md §7): stack allocation failure, fd
/// registration failure.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The stack pool could not grow (the underlying guard-paged mmap
    /// allocation failed).
    #[error("failed to allocate a coroutine stack: {0}")]
    StackAllocation(#[source] io::Error),
    /// The reactor refused to register interest for a file descriptor.
    #[error("failed to register fd with the reactor: {0}")]
    Registration(#[source] io::Error),
}

/// Lifecycle errors (spec.md §7): join on a nonexistent tid, double-close,
/// and the two join-specific failure modes this crate's typed `join<T>`
/// adds on top of the source's untyped join.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `join(tid)` where `tid` never existed, or has already been fully
    /// reclaimed by an earlier late join.
    #[error("join() on a tid that does not exist: {0}")]
    JoinNonexistent(Tid),
    /// The joined uthread panicked instead of returning a value.
    #[error("uthread {tid} exited abnormally: {reason}")]
    JoinedAbnormally {
        /// The uthread that was joined.
        tid: Tid,
        /// The panic payload, if any, as text.
        reason: String,
    },
    /// The joined uthread returned a value, but not of the type `join::<T>`
    /// was asked to downcast to.
    #[error("uthread {0} join() type mismatch")]
    JoinTypeMismatch(Tid),
    /// `close(sock)` called on a socket that was already closed.
    #[error("double close on socket: {0}")]
    DoubleClose(SockId),
}
