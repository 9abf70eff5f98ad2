//! The socket watcher (spec.md §4.5): `internal.h`'s `coro_sock_` —
//! a wrapped TCP stream or listener, a pair of buffers with a high/low
//! water mark, and the three wait queues (`readqueue`, `writequeue`,
//! `eventqueue`) a coroutine parks on. `bytes::BytesMut` replaces the
//! source's hand-rolled ring buffer, the same way the rest of the
//! retrieval pack reaches for `bytes` instead of a raw `Vec<u8>` splice.
//!
//! Reads and writes never touch the raw fd directly: `read`/`write` only
//! ever move bytes into or out of `in_buf`/`out_buf`, parking if the
//! buffer can't currently satisfy the call. The actual non-blocking
//! syscalls happen in `crate::reactor`, which fills `in_buf` when the fd
//! is readable and drains `out_buf` when it is writable — this is the
//! "socket watcher" / "I/O pump" split spec.md draws between the two
//! modules.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use bytes::{Buf, BufMut, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};

use crate::error::{InvalidArgument, Result, TransportError};
use crate::event::Notify;
use crate::ids::{SockId, Tid};
use crate::runtime::{current_tid_checked, with_current, Runtime};
use crate::status::Status;
use crate::uthread::Slot;

/// Records `sock_id` as the socket the current uthread is about to park on
/// (spec.md §3's `pending_sock`), mirroring how `join()` records
/// `pending_join`, and raises `wait_bit` on that uthread's own status.
/// Both are cleared uniformly by `crate::scheduler::wake`.
fn mark_pending(rt: &mut Runtime, tid: Tid, sock_id: SockId, wait_bit: Status) {
    if let Some(u) = rt.ths.get_mut(tid).and_then(Slot::live_mut) {
        u.pending_sock = Some(sock_id);
        u.status.insert(wait_bit);
    }
}

/// Default high/low water marks (spec.md §4.5 leaves the exact numbers
/// unspecified; these match the teacher's own default buffer sizing in
/// `thread.rs`'s read/write paths).
const DEFAULT_HWM: usize = 64 * 1024;
const DEFAULT_LWM: usize = 16 * 1024;

pub(crate) enum SockKind {
    Listener {
        listener: TcpListener,
        backlog: VecDeque<TcpStream>,
        accept_wait: VecDeque<Tid>,
    },
    Stream {
        stream: TcpStream,
        in_buf: BytesMut,
        out_buf: BytesMut,
        hwm: usize,
        lwm: usize,
        read_wait: VecDeque<Tid>,
        write_wait: VecDeque<Tid>,
        connect_wait: VecDeque<Tid>,
        /// Still waiting on the initial connect to complete.
        connecting: bool,
        /// Whether `READABLE` interest is currently registered. Dropped
        /// once `in_buf` hits `hwm` so a peer that keeps sending doesn't
        /// cause the reactor to spin on an ignored readiness event;
        /// restored by `resume_reads` once `read` drains below `lwm`.
        read_interest: bool,
        /// Whether `WRITABLE` interest is currently registered. Dropped
        /// once `out_buf` drains to empty, for the same reason; restored
        /// by `interest_writable` the next time `write` queues data.
        write_interest: bool,
    },
}

pub(crate) struct CoroSock {
    pub(crate) status: Status,
    pub(crate) token: Token,
    pub(crate) kind: SockKind,
}

/// A `mio::Token` is derived directly from a `SockId`'s dense index
/// rather than tracked in a second table: since both are dense and
/// released in lockstep (`close` deregisters and removes in the same
/// call), the index alone round-trips.
pub(crate) fn token_for(id: SockId) -> Token {
    Token(id.index())
}

pub(crate) fn sock_id_from_token(token: Token) -> SockId {
    SockId::new((token.0 + 1) as u32)
}

fn stream_sock(stream: TcpStream, token: Token) -> CoroSock {
    CoroSock {
        status: Status::empty(),
        token,
        kind: SockKind::Stream {
            stream,
            in_buf: BytesMut::new(),
            out_buf: BytesMut::new(),
            hwm: DEFAULT_HWM,
            lwm: DEFAULT_LWM,
            read_wait: VecDeque::new(),
            write_wait: VecDeque::new(),
            connect_wait: VecDeque::new(),
            connecting: true,
            read_interest: true,
            write_interest: true,
        },
    }
}

/// Opens a non-blocking connect to `addr` (spec.md §4.5's connect
/// contract), parking the caller until the reactor observes it complete.
/// A refused or otherwise failed connect is reported as
/// `TransportError::ConnectRefused` and leaves the socket in its sticky
/// error state.
pub fn connect(addr: SocketAddr) -> Result<SockId> {
    let tid = current_tid_checked("connect")?;
    let sock_id = with_current(|rt| -> Result<SockId> {
        let stream = TcpStream::connect(addr).map_err(TransportError::ConnectRefused)?;
        let sock_id = rt.socks.reserve();
        let token = token_for(sock_id);
        crate::reactor::register(rt, token, &stream, Interest::READABLE | Interest::WRITABLE)?;
        rt.socks.fill(sock_id, stream_sock(stream, token));
        Ok(sock_id)
    })?;

    with_current(|rt| {
        let sock = rt.socks.get_mut(sock_id).expect("just inserted");
        if let SockKind::Stream { connect_wait, .. } = &mut sock.kind {
            connect_wait.push_back(tid);
        }
        mark_pending(rt, tid, sock_id, Status::WAIT_CONNECT);
        rt.curev = Notify::SockConnect(sock_id);
    });
    crate::context::switch_out();

    with_current(|rt| {
        let sock = rt.socks.get(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
        if sock.status.is_sticky_failure() {
            Err(TransportError::ConnectRefused(io::Error::new(io::ErrorKind::ConnectionRefused, "connect failed")).into())
        } else {
            Ok(sock_id)
        }
    })
}

/// Binds a listening socket (spec.md §4.5's listen contract).
pub fn listen(addr: SocketAddr) -> Result<SockId> {
    with_current(|rt| -> Result<SockId> {
        let listener = TcpListener::bind(addr).map_err(TransportError::Io)?;
        let sock_id = rt.socks.reserve();
        let token = token_for(sock_id);
        crate::reactor::register(rt, token, &listener, Interest::READABLE)?;
        rt.socks.fill(
            sock_id,
            CoroSock {
                status: Status::empty(),
                token,
                kind: SockKind::Listener { listener, backlog: VecDeque::new(), accept_wait: VecDeque::new() },
            },
        );
        Ok(sock_id)
    })
}

/// Accepts the next pending connection on a listening socket (spec.md
/// §4.5's accept contract), parking if none is queued yet.
pub fn accept(sock_id: SockId) -> Result<SockId> {
    let tid = current_tid_checked("accept")?;
    loop {
        let backlogged = with_current(|rt| -> Result<Option<TcpStream>> {
            let sock = rt.socks.get_mut(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
            match &mut sock.kind {
                SockKind::Listener { backlog, .. } => Ok(backlog.pop_front()),
                SockKind::Stream { .. } => Err(InvalidArgument::BadSock(sock_id).into()),
            }
        })?;

        if let Some(stream) = backlogged {
            return with_current(|rt| -> Result<SockId> {
                let new_id = rt.socks.reserve();
                let token = token_for(new_id);
                crate::reactor::register(rt, token, &stream, Interest::READABLE | Interest::WRITABLE)?;
                let mut sock = stream_sock(stream, token);
                if let SockKind::Stream { connecting, .. } = &mut sock.kind {
                    *connecting = false;
                }
                rt.socks.fill(new_id, sock);
                Ok(new_id)
            });
        }

        with_current(|rt| {
            if let Some(sock) = rt.socks.get_mut(sock_id) {
                if let SockKind::Listener { accept_wait, .. } = &mut sock.kind {
                    accept_wait.push_back(tid);
                }
            }
            mark_pending(rt, tid, sock_id, Status::WAIT_ACCEPT);
            rt.curev = Notify::SockAccept(sock_id);
        });
        crate::context::switch_out();
    }
}

/// Reads up to `buf.len()` bytes, parking if `in_buf` is currently empty
/// and the socket hasn't hit a sticky EOF/error. A sticky EOF with
/// nothing left buffered surfaces once, as `Ok(0)`; any further read
/// keeps returning `Ok(0)` without parking (spec.md §4.5's "sticky EOF").
pub fn read(sock_id: SockId, buf: &mut [u8]) -> Result<usize> {
    let tid = current_tid_checked("read")?;
    loop {
        let outcome = with_current(|rt| -> Result<Option<usize>> {
            let sock = rt.socks.get_mut(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
            let (in_buf, lwm) = match &mut sock.kind {
                SockKind::Stream { in_buf, lwm, .. } => (in_buf, *lwm),
                SockKind::Listener { .. } => return Err(InvalidArgument::BadSock(sock_id).into()),
            };
            if !in_buf.is_empty() {
                let n = buf.len().min(in_buf.len());
                in_buf.copy_to_slice(&mut buf[..n]);
                if in_buf.len() < lwm {
                    crate::reactor::resume_reads(rt, sock_id);
                }
                return Ok(Some(n));
            }
            if sock.status.intersects(Status::SOCK_ERROR) {
                return Err(TransportError::Reset(io::Error::new(io::ErrorKind::ConnectionReset, "socket error")).into());
            }
            if sock.status.intersects(Status::SOCK_EOF) {
                return Ok(Some(0));
            }
            Ok(None)
        })?;

        if let Some(n) = outcome {
            return Ok(n);
        }

        with_current(|rt| {
            if let Some(sock) = rt.socks.get_mut(sock_id) {
                if let SockKind::Stream { read_wait, .. } = &mut sock.kind {
                    read_wait.push_back(tid);
                }
            }
            // No dedicated wait bit for a blocked read/write: unlike
            // connect/accept/join, `internal.h` never gave those their own
            // status bit, only the readqueue/writequeue parking itself.
            mark_pending(rt, tid, sock_id, Status::empty());
            rt.curev = Notify::SockRead(sock_id);
        });
        crate::context::switch_out();
    }
}

/// Queues `data` for writing, parking if `out_buf` is already at its high
/// water mark (spec.md §4.5's backpressure contract) until the reactor
/// has drained it below the low water mark. Writing after a sticky
/// EOF/error, or to an already-closed socket, is
/// `TransportError::WriteAfterClose`.
pub fn write(sock_id: SockId, data: &[u8]) -> Result<()> {
    let tid = current_tid_checked("write")?;
    let mut offset = 0;
    while offset < data.len() {
        let queued = with_current(|rt| -> Result<bool> {
            let sock = rt.socks.get_mut(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
            if sock.status.is_sticky_failure() {
                return Err(TransportError::WriteAfterClose.into());
            }
            let (out_buf, hwm) = match &mut sock.kind {
                SockKind::Stream { out_buf, hwm, .. } => (out_buf, *hwm),
                SockKind::Listener { .. } => return Err(InvalidArgument::BadSock(sock_id).into()),
            };
            if out_buf.len() >= hwm {
                return Ok(false);
            }
            let room = hwm - out_buf.len();
            let take = room.min(data.len() - offset);
            out_buf.put_slice(&data[offset..offset + take]);
            offset += take;
            crate::reactor::interest_writable(rt, sock_id);
            Ok(true)
        })?;

        if queued {
            continue;
        }

        with_current(|rt| {
            if let Some(sock) = rt.socks.get_mut(sock_id) {
                if let SockKind::Stream { write_wait, .. } = &mut sock.kind {
                    write_wait.push_back(tid);
                }
            }
            mark_pending(rt, tid, sock_id, Status::empty());
            rt.curev = Notify::SockWrite(sock_id);
        });
        crate::context::switch_out();
    }
    Ok(())
}

/// Closes a socket, deregistering it from the reactor and releasing its
/// id. Double-close is `LifecycleError::DoubleClose`.
pub fn close(sock_id: SockId) -> Result<()> {
    with_current(|rt| -> Result<()> {
        if rt.socks.get(sock_id).is_none() {
            return Err(crate::error::LifecycleError::DoubleClose(sock_id).into());
        }
        crate::reactor::deregister(rt, sock_id)?;
        rt.socks.remove(sock_id);
        Ok(())
    })
}

/// Overrides the high water mark for a stream socket's buffers.
pub fn set_hwm(sock_id: SockId, bytes: usize) -> Result<()> {
    with_current(|rt| -> Result<()> {
        let sock = rt.socks.get_mut(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
        match &mut sock.kind {
            SockKind::Stream { hwm, .. } => {
                *hwm = bytes;
                Ok(())
            }
            SockKind::Listener { .. } => Err(InvalidArgument::BadSock(sock_id).into()),
        }
    })
}

/// Overrides the low water mark for a stream socket's buffers.
pub fn set_lwm(sock_id: SockId, bytes: usize) -> Result<()> {
    with_current(|rt| -> Result<()> {
        let sock = rt.socks.get_mut(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
        match &mut sock.kind {
            SockKind::Stream { lwm, .. } => {
                *lwm = bytes;
                Ok(())
            }
            SockKind::Listener { .. } => Err(InvalidArgument::BadSock(sock_id).into()),
        }
    })
}

/// The socket's locally bound address.
pub fn local_addr(sock_id: SockId) -> Result<SocketAddr> {
    with_current(|rt| -> Result<SocketAddr> {
        let sock = rt.socks.get(sock_id).ok_or(InvalidArgument::BadSock(sock_id))?;
        let addr = match &sock.kind {
            SockKind::Listener { listener, .. } => listener.local_addr(),
            SockKind::Stream { stream, .. } => stream.local_addr(),
        };
        addr.map_err(|e| TransportError::Io(e).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_sock_id() {
        let id = SockId::new(5);
        assert_eq!(sock_id_from_token(token_for(id)), id);
    }
}
