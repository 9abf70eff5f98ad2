//! The global context (spec.md §3's singleton `global_context`), expressed
//! as an explicit, non-global `Runtime` handle installed into a
//! thread-local for the duration of `start()` — mirroring the teacher's
//! own `tl_coroutine_current()` pattern (a thread-local raw pointer to
//! "whatever is currently executing"), collapsed from the teacher's
//! `HandlerShared`/`HandlerThreadShared` multi-thread split down to one
//! struct, since this runtime never shards state across a second OS
//! thread. Per spec.md §9's design note, there is deliberately no
//! language-level global constructor: callers must go through
//! `crate::start`.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use log::debug;
use mio::{Events, Poll};

use crate::error::Result;
use crate::event::{ExitStatus, Notify};
use crate::ids::{LockId, SockId, Tid};
use crate::idmap::IdMap;
use crate::mutex::CoroLock;
use crate::socket::CoroSock;
use crate::stack::StackPool;
use crate::status::Status;
use crate::uthread::Slot;

/// Builds a `Runtime`. Mirrors the teacher's own `Config` (stack size,
/// panic-catching) without the multithreading-only knobs (`thread_num`,
/// `scheduler`, `event_loop_config`) that have no counterpart once
/// scheduling is single-threaded and FIFO-only by contract.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    stack_size: usize,
    poll_timeout_cap: Duration,
    mio_events_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            // The teacher defaults to 2MiB; matched here since nothing
            // about this spec's workloads calls for a smaller default.
            stack_size: 2 * 1024 * 1024,
            // Spec.md §4.3 asks for "a timeout equal to the nearest
            // pending deadline (infinite if none)"; this crate carries no
            // deadline heap (timers are an explicit non-goal, spec.md
            // §5), so the pump instead wakes on this cap even with
            // nothing to do, which is enough to notice a `stop()` signal
            // or a shutdown race without ever busy-spinning.
            poll_timeout_cap: Duration::from_millis(250),
            mio_events_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Overrides the per-coroutine stack size in bytes. Should be a
    /// multiple of the page size; see `context::stack::ProtectedFixedSizeStack`.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Overrides the I/O pump's maximum per-round block time.
    pub fn with_poll_timeout_cap(mut self, cap: Duration) -> Self {
        self.poll_timeout_cap = cap;
        self
    }

    /// Overrides the capacity of the per-round `mio::Events` buffer.
    pub fn with_mio_events_capacity(mut self, capacity: usize) -> Self {
        self.mio_events_capacity = capacity;
        self
    }
}

/// The process-wide (well, OS-thread-wide) runtime state spec.md §3 calls
/// `global_context`. Mutated only by the currently running coroutine or
/// the scheduler itself; because execution is serial there is no locking
/// (spec.md §5).
pub(crate) struct Runtime {
    pub(crate) config: RuntimeConfig,

    pub(crate) ths: IdMap<Tid, Slot>,
    pub(crate) socks: IdMap<SockId, CoroSock>,
    pub(crate) locks: IdMap<LockId, CoroLock>,

    /// The single runnable FIFO the scheduler pops from (spec.md §4.3).
    pub(crate) runnable: VecDeque<Tid>,
    /// Staging queue for reactor-driven wakes and lock handoffs and join
    /// completions, drained into `runnable` ahead of `yielded` and
    /// `newly_spawned` each round per spec.md §4.3's tie-break order.
    pub(crate) reactor_wakes: VecDeque<Tid>,
    /// Staging queue for voluntary yields.
    pub(crate) yielded: VecDeque<Tid>,
    /// Staging queue for uthreads spawned this round.
    pub(crate) newly_spawned: VecDeque<Tid>,

    /// The currently executing uthread, if any (`None` while the
    /// scheduler or I/O pump's own code runs).
    pub(crate) self_tid: Option<Tid>,
    /// The single-slot "last suspension reason published" spec.md §3/§4.4
    /// describes: written only by the currently running coroutine,
    /// read only by the scheduler immediately after the next switch.
    pub(crate) curev: Notify,

    pub(crate) stacks: StackPool,
    pub(crate) poll: Poll,
    pub(crate) events: Events,
}

impl Runtime {
    pub(crate) fn new(config: RuntimeConfig) -> Result<Self> {
        let poll = Poll::new().map_err(crate::error::ResourceError::Registration)?;
        let events = Events::with_capacity(config.mio_events_capacity);
        Ok(Runtime {
            stacks: StackPool::new(config.stack_size),
            config,
            ths: IdMap::new(),
            socks: IdMap::new(),
            locks: IdMap::new(),
            runnable: VecDeque::new(),
            reactor_wakes: VecDeque::new(),
            yielded: VecDeque::new(),
            newly_spawned: VecDeque::new(),
            self_tid: None,
            curev: Notify::None,
            poll,
            events,
        })
    }

    pub(crate) fn poll_timeout_cap(&self) -> Duration {
        self.config.poll_timeout_cap
    }

    /// Spec.md §4.3 point 3: the scheduler terminates once no live uthread
    /// remains. A `Slot::Zombie` retained for a late join that never comes
    /// (including the root entry uthread, which has no joiner at all) must
    /// not block shutdown — nothing will ever run again to join it, so
    /// counting it here would mean `start()` never returns.
    pub(crate) fn is_quiescent(&self) -> bool {
        !self.ths.iter().any(|slot| matches!(slot, Slot::Live(_)))
    }
}

thread_local! {
    static CURRENT: Cell<*mut Runtime> = Cell::new(std::ptr::null_mut());
}

/// Installs `rt` as the thread-local current runtime for the duration of
/// `f`, restoring whatever was installed before (`null` at the top
/// level) once `f` returns. This is `start()`'s only entry point into the
/// thread-local; nothing else ever writes `CURRENT`.
pub(crate) fn run_with<R>(rt: &mut Runtime, f: impl FnOnce() -> R) -> R {
    let ptr = rt as *mut Runtime;
    let previous = CURRENT.with(|c| c.replace(ptr));
    let result = f();
    CURRENT.with(|c| c.set(previous));
    result
}

/// Borrows the current runtime for the duration of `f`. Panics if called
/// outside of `run_with` (i.e. outside of `crate::start`'s dynamic
/// extent) — every public API function in this crate calls this only
/// after first establishing it is running inside a uthread, so in
/// practice this should never actually panic for well-behaved callers.
///
/// Must never be called with a live borrow held across a
/// `crate::context::switch_out()` call: the fiber that gets resumed next
/// may itself call back into `with_current`, which would alias this
/// borrow. Every call site in this crate takes care to drop its borrow
/// (by returning out of the closure) before suspending.
pub(crate) fn with_current<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    let ptr = CURRENT.with(|c| c.get());
    assert!(!ptr.is_null(), "fibrio API called outside of a running Runtime");
    let rt = unsafe { &mut *ptr };
    f(rt)
}

/// The currently running uthread's id, or `Tid::INVALID` outside of one.
pub(crate) fn current_tid() -> Tid {
    with_current(|rt| rt.self_tid.unwrap_or(Tid::INVALID))
}

/// The currently running uthread's id, or an error naming `op` if called
/// outside of any uthread (spec.md's blocking operations all require
/// this).
pub(crate) fn current_tid_checked(op: &'static str) -> Result<Tid> {
    with_current(|rt| rt.self_tid.ok_or_else(|| crate::uthread::not_in_uthread(op)))
}

/// Sets the `STOP` status bit (spec.md §5) on every currently live
/// uthread. This is a pure signal: it does not itself wake or force any
/// uthread to exit, it only marks the bit for `crate::should_stop` to
/// observe the next time each uthread checks (or is next resumed, if it
/// checks at the top of its own loop). Mirrors spec.md §6's Runtime-level
/// `stop` operation, which is documented as non-blocking.
pub(crate) fn request_stop() {
    with_current(|rt| {
        for slot in rt.ths.iter_mut() {
            if let Slot::Live(u) = slot {
                u.status.insert(Status::STOP);
            }
        }
    });
    debug!("stop requested");
}

/// Runs `entry` to completion as the first uthread of a fresh `Runtime`
/// (spec.md §6's `Runtime::start`), driving the scheduler loop until
/// every uthread (the entry one, and anything it transitively spawned)
/// has exited — a finished uthread with no joiner left to claim it stays
/// behind as a `Zombie` but no longer holds up this return.
pub(crate) fn start(config: RuntimeConfig, entry: impl FnOnce() + 'static) -> Result<()> {
    let mut rt = Runtime::new(config)?;
    run_with(&mut rt, || -> Result<()> {
        crate::scheduler::spawn_uthread(Box::new(move |_tid| {
            entry();
            ExitStatus::Finished
        }))?;
        crate::scheduler::run();
        Ok(())
    })
}
