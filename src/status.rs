//! The status bitset carried by both `uthread` and `coro_sock` in the
//! source (`internal.h`'s `WAIT_CONNECT`/`WAIT_ACCEPT`/... `#define`s).
//! `bitflags` is the idiomatic replacement for a C bit-macro set, the same
//! way `mio`'s own `Interest`/`Ready` types are built on it.

use bitflags::bitflags;

bitflags! {
    /// Bits shared by `Uthread::status` and `CoroSock::status`. Not every
    /// bit is meaningful on both: a socket never carries `WAIT_JOIN`/`STOP`
    /// (those describe a uthread's own wait), and a uthread never carries
    /// `SOCK_EOF`/`SOCK_ERROR` (those describe a socket's own sticky
    /// terminal condition). `internal.h`'s plain `READ`/`WRITE` readiness
    /// bits (0x1/0x2) are not carried here: this crate's `in_buf`/`out_buf`
    /// occupancy is already the single source of truth for "can a read or
    /// write currently proceed synchronously," and mirroring it into a
    /// second bit invites the two to drift.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub(crate) struct Status: u32 {
        /// A coroutine is parked waiting for a connect to complete.
        const WAIT_CONNECT = 0x4;
        /// A coroutine is parked waiting for an accept to complete.
        const WAIT_ACCEPT = 0x8;
        /// Sticky: peer closed the connection.
        const SOCK_EOF = 0x10;
        /// Sticky: the socket suffered a transport error.
        const SOCK_ERROR = 0x20;
        /// A coroutine is parked on `join(tid)`.
        const WAIT_JOIN = 0x100;
        /// Host-requested cooperative shutdown signal (spec.md §5/§6).
        const STOP = 0x1000;
    }
}

impl Status {
    /// Either sticky terminal condition (source's `TEST_EOF`/`TEST_ERROR`
    /// combined): once set, every subsequent operation on the socket must
    /// observe it immediately instead of suspending.
    pub(crate) fn is_sticky_failure(self) -> bool {
        self.intersects(Status::SOCK_EOF | Status::SOCK_ERROR)
    }
}
