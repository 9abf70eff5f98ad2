//! The non-blocking I/O pump (spec.md §4.3's reactor bridge): one
//! `mio::Poll::poll` per scheduler round whenever nothing is runnable,
//! translating readiness events into buffer fills/drains and waking
//! whichever uthreads were parked on the affected socket. Grounded on the
//! teacher's `Handler::ready` in `thread.rs`, rewritten against `mio` 0.8's
//! `Poll`/`Events` API directly rather than the teacher's
//! `mio::channel`-routed `Message` dispatch, since there is no second OS
//! thread here to hand a readiness notification across.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use bytes::{Buf, BufMut};
use log::warn;
use mio::{Interest, Token};

use crate::error::{ResourceError, Result, TransportError};
use crate::ids::SockId;
use crate::runtime::{with_current, Runtime};
use crate::socket::{sock_id_from_token, SockKind};
use crate::status::Status;

enum WaitKind {
    Read,
    Write,
    Connect,
}

/// Blocks for at most `Runtime::poll_timeout_cap` waiting for readiness,
/// then dispatches every event observed. Called by
/// `crate::scheduler::run` only when nothing at all is runnable.
pub(crate) fn pump() {
    with_current(|rt| {
        let timeout = rt.poll_timeout_cap();
        match rt.poll.poll(&mut rt.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => warn!("mio poll failed: {e}"),
        }

        // A clean peer close (FIN) reports `is_read_closed()` alongside
        // `is_readable()`; that is spec.md §4.5's sticky-EOF path, not an
        // error, and must run `fill_in_buf` so a zero-length read sets
        // `SOCK_EOF` instead of being discarded. `is_write_closed()` means
        // the peer has stopped accepting our writes, which this crate does
        // treat as a genuine failure.
        let ready: Vec<(Token, bool, bool, bool)> = rt
            .events
            .iter()
            .map(|ev| {
                let errored = ev.is_error() || ev.is_write_closed();
                (ev.token(), ev.is_readable(), ev.is_writable(), errored)
            })
            .collect();

        for (token, readable, writable, errored) in ready {
            let sock_id = sock_id_from_token(token);
            if errored {
                fail_socket(rt, sock_id);
                continue;
            }
            if readable {
                handle_readable(rt, sock_id);
            }
            if writable {
                handle_writable(rt, sock_id);
            }
        }
    });
}

/// Registers `source` for `interest` under `token`. Used by `socket.rs`
/// at `connect`/`listen`/`accept` time.
pub(crate) fn register<S: mio::event::Source>(
    rt: &mut Runtime,
    token: Token,
    source: &mut S,
    interest: Interest,
) -> Result<()> {
    rt.poll.registry().register(source, token, interest).map_err(|e| ResourceError::Registration(e).into())
}

/// Deregisters `sock_id`'s source entirely. Used by `socket::close`.
pub(crate) fn deregister(rt: &mut Runtime, sock_id: SockId) -> Result<()> {
    let sock = match rt.socks.get_mut(sock_id) {
        Some(s) => s,
        None => return Ok(()),
    };
    let result = match &mut sock.kind {
        SockKind::Listener { listener, .. } => rt.poll.registry().deregister(listener),
        SockKind::Stream { stream, .. } => rt.poll.registry().deregister(stream),
    };
    match result {
        Ok(()) => Ok(()),
        // Already gone (e.g. the fd was already closed by the OS side);
        // not worth failing `close()` over.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ResourceError::Registration(e).into()),
    }
}

fn handle_readable(rt: &mut Runtime, sock_id: SockId) {
    let is_listener = matches!(rt.socks.get(sock_id).map(|s| &s.kind), Some(SockKind::Listener { .. }));
    if is_listener {
        accept_connections(rt, sock_id);
    } else {
        fill_in_buf(rt, sock_id);
    }
}

fn handle_writable(rt: &mut Runtime, sock_id: SockId) {
    let still_connecting =
        matches!(rt.socks.get(sock_id).map(|s| &s.kind), Some(SockKind::Stream { connecting: true, .. }));
    if still_connecting {
        resolve_connect(rt, sock_id);
    } else {
        drain_out_buf(rt, sock_id);
    }
}

fn accept_connections(rt: &mut Runtime, sock_id: SockId) {
    loop {
        let accepted = {
            let sock = match rt.socks.get_mut(sock_id) {
                Some(s) => s,
                None => return,
            };
            let listener = match &mut sock.kind {
                SockKind::Listener { listener, .. } => listener,
                SockKind::Stream { .. } => return,
            };
            match listener.accept() {
                Ok((stream, _addr)) => Some(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                Err(e) => {
                    warn!("accept failed: {e}");
                    None
                }
            }
        };
        let stream = match accepted {
            Some(s) => s,
            None => break,
        };
        let waiter = match rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
            Some(SockKind::Listener { backlog, accept_wait, .. }) => {
                backlog.push_back(stream);
                accept_wait.pop_front()
            }
            _ => None,
        };
        if let Some(tid) = waiter {
            crate::scheduler::wake(tid);
        }
    }
}

fn fill_in_buf(rt: &mut Runtime, sock_id: SockId) {
    let mut chunk = [0u8; 4096];
    let mut hit_eof = false;
    let mut io_err = None;

    loop {
        let sock = match rt.socks.get_mut(sock_id) {
            Some(s) => s,
            None => return,
        };
        let (stream, in_buf, hwm) = match &mut sock.kind {
            SockKind::Stream { stream, in_buf, hwm, .. } => (stream, in_buf, *hwm),
            SockKind::Listener { .. } => return,
        };
        if in_buf.len() >= hwm {
            break;
        }
        let want = chunk.len().min(hwm - in_buf.len());
        match stream.read(&mut chunk[..want]) {
            Ok(0) => {
                hit_eof = true;
                break;
            }
            Ok(n) => in_buf.put_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                io_err = Some(e);
                break;
            }
        }
    }

    if let Some(e) = io_err {
        fail_socket_with(rt, sock_id, TransportError::Reset(e));
        return;
    }

    if hit_eof {
        if let Some(sock) = rt.socks.get_mut(sock_id) {
            sock.status.insert(Status::SOCK_EOF);
        }
    }

    let has_data = matches!(
        rt.socks.get(sock_id).map(|s| &s.kind),
        Some(SockKind::Stream { in_buf, .. }) if !in_buf.is_empty()
    );
    if hit_eof || has_data {
        wake_waiters(rt, sock_id, WaitKind::Read);
    }

    let at_hwm = matches!(
        rt.socks.get(sock_id).map(|s| &s.kind),
        Some(SockKind::Stream { in_buf, hwm, .. }) if in_buf.len() >= *hwm
    );
    if at_hwm {
        pause_reads(rt, sock_id);
    }
}

fn drain_out_buf(rt: &mut Runtime, sock_id: SockId) {
    loop {
        let sock = match rt.socks.get_mut(sock_id) {
            Some(s) => s,
            None => return,
        };
        let (stream, out_buf) = match &mut sock.kind {
            SockKind::Stream { stream, out_buf, .. } => (stream, out_buf),
            SockKind::Listener { .. } => return,
        };
        if out_buf.is_empty() {
            break;
        }
        match stream.write(out_buf) {
            Ok(0) => break,
            Ok(n) => out_buf.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                fail_socket_with(rt, sock_id, TransportError::Reset(e));
                return;
            }
        }
    }

    let now_empty = matches!(
        rt.socks.get(sock_id).map(|s| &s.kind),
        Some(SockKind::Stream { out_buf, .. }) if out_buf.is_empty()
    );
    wake_waiters(rt, sock_id, WaitKind::Write);
    if now_empty {
        pause_writes(rt, sock_id);
    }
}

fn resolve_connect(rt: &mut Runtime, sock_id: SockId) {
    let outcome = match rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        Some(SockKind::Stream { stream, connecting, .. }) if *connecting => {
            *connecting = false;
            stream.take_error()
        }
        _ => return,
    };
    match outcome {
        Ok(None) => {}
        Ok(Some(e)) | Err(e) => {
            fail_socket_with(rt, sock_id, TransportError::ConnectRefused(e));
            return;
        }
    }
    wake_waiters(rt, sock_id, WaitKind::Connect);
}

fn fail_socket(rt: &mut Runtime, sock_id: SockId) {
    fail_socket_with(
        rt,
        sock_id,
        TransportError::Reset(io::Error::new(io::ErrorKind::Other, "socket error reported by reactor")),
    );
}

/// Marks `sock_id` with the sticky error status and wakes everything
/// parked on it — readers, writers, connecters, and (for a listener)
/// accepters alike — since none of them will ever see that readiness
/// again (spec.md §4.5's sticky-error contract).
fn fail_socket_with(rt: &mut Runtime, sock_id: SockId, err: TransportError) {
    warn!("socket {sock_id} failed: {err}");
    if let Some(sock) = rt.socks.get_mut(sock_id) {
        sock.status.insert(Status::SOCK_ERROR);
    }
    wake_waiters(rt, sock_id, WaitKind::Read);
    wake_waiters(rt, sock_id, WaitKind::Write);
    wake_waiters(rt, sock_id, WaitKind::Connect);
    let accepters: VecDeque<_> = match rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        Some(SockKind::Listener { accept_wait, .. }) => std::mem::take(accept_wait),
        _ => VecDeque::new(),
    };
    for tid in accepters {
        crate::scheduler::wake(tid);
    }
}

fn wake_waiters(rt: &mut Runtime, sock_id: SockId, kind: WaitKind) {
    let waiters = match rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        Some(SockKind::Stream { read_wait, write_wait, connect_wait, .. }) => match kind {
            WaitKind::Read => std::mem::take(read_wait),
            WaitKind::Write => std::mem::take(write_wait),
            WaitKind::Connect => std::mem::take(connect_wait),
        },
        _ => VecDeque::new(),
    };
    for tid in waiters {
        crate::scheduler::wake(tid);
    }
}

fn reregister_interest(rt: &mut Runtime, sock_id: SockId) {
    let sock = match rt.socks.get_mut(sock_id) {
        Some(s) => s,
        None => return,
    };
    let token = sock.token;
    let (stream, read_interest, write_interest) = match &mut sock.kind {
        SockKind::Stream { stream, read_interest, write_interest, .. } => (stream, *read_interest, *write_interest),
        SockKind::Listener { .. } => return,
    };
    // Always keep at least `READABLE` registered, even with nothing
    // queued to write, so a peer disconnect or error is still observed
    // while idle; only drop it once `in_buf` has actually hit `hwm`.
    let interest = if write_interest {
        if read_interest {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::WRITABLE
        }
    } else {
        Interest::READABLE
    };
    if let Err(e) = rt.poll.registry().reregister(stream, token, interest) {
        warn!("failed to reregister socket {sock_id}: {e}");
    }
}

fn pause_reads(rt: &mut Runtime, sock_id: SockId) {
    if let Some(SockKind::Stream { read_interest, .. }) = rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        *read_interest = false;
    }
    reregister_interest(rt, sock_id);
}

/// Restores `READABLE` interest once a consumer's `read` has drained
/// `in_buf` below `lwm`. A no-op if reads were never paused.
pub(crate) fn resume_reads(rt: &mut Runtime, sock_id: SockId) {
    let was_paused = match rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        Some(SockKind::Stream { read_interest, .. }) if !*read_interest => {
            *read_interest = true;
            true
        }
        _ => false,
    };
    if was_paused {
        reregister_interest(rt, sock_id);
    }
}

fn pause_writes(rt: &mut Runtime, sock_id: SockId) {
    if let Some(SockKind::Stream { write_interest, .. }) = rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        *write_interest = false;
    }
    reregister_interest(rt, sock_id);
}

/// Restores `WRITABLE` interest once `write` has queued fresh data onto
/// an `out_buf` that had previously drained to empty.
pub(crate) fn interest_writable(rt: &mut Runtime, sock_id: SockId) {
    let was_paused = match rt.socks.get_mut(sock_id).map(|s| &mut s.kind) {
        Some(SockKind::Stream { write_interest, .. }) if !*write_interest => {
            *write_interest = true;
            true
        }
        _ => false,
    };
    if was_paused {
        reregister_interest(rt, sock_id);
    }
}
