//! The main-thread executor and its reentrant event loop.
//!
//! Exactly one OS thread — the executor thread — ever touches interpreter
//! state. The state `S` is constructed *on* that thread and does not need to
//! be `Send`, so interpreter internals built on `Rc` are pinned there by the
//! type system rather than by convention.
//!
//! Foreign threads interact in two ways:
//!
//! - [`Executor::submit`] wraps work as a closure, queues it, and blocks the
//!   calling thread until the executor has run it, returning the result.
//! - [`Executor::post`] (and [`LoopSender::post`]) queues work without
//!   blocking. This is how interrupts and input deliveries reach a turn that
//!   is already running.
//!
//! Work items receive a [`TurnCtx`]. An item that must wait for external
//! input calls [`TurnCtx::run_loop`], which keeps pumping the same FIFO queue
//! — serving new submissions and posted items — until one of them calls
//! [`TurnCtx::break_loop`]. Loops nest; each break unwinds exactly one level.
//! Queue order is strict FIFO: the innermost active loop executes whatever
//! item is next, regardless of which thread enqueued it.

use std::{
    cell::{Cell, RefCell},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, trace, warn};

/// A queued unit of work.
pub type Work<S> = Box<dyn FnOnce(&mut TurnCtx<'_, S>) + Send + 'static>;

enum Msg<S> {
    Run {
        work: Work<S>,
        cancel: Option<CancellationToken>,
    },
    Shutdown,
}

/// Cooperative cancellation for submitted work.
///
/// Cancellation is honored only for items that have not started; once an item
/// is running it completes (or is interrupted through the session's own
/// mechanism). There is no forced termination.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token cancelled. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Failure to obtain a result from submitted work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The item's cancellation token fired before the item started.
    Cancelled,
    /// The executor shut down before (or while) the item ran.
    Shutdown,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "work item was cancelled before it started"),
            Self::Shutdown => write!(f, "executor is shut down"),
        }
    }
}

impl std::error::Error for ExecError {}

/// Value carried out of a loop by [`TurnCtx::break_loop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopValue {
    /// Break with no payload (debug prompt resumption).
    Unit,
    /// A delivered line of text (read-line and subprocess input).
    Text(String),
    /// End of input, or the executor is shutting down.
    Eof,
}

#[derive(Default)]
struct LoopFrame {
    brk: Option<LoopValue>,
}

struct LoopCtx<S> {
    tx: Sender<Msg<S>>,
    rx: Receiver<Msg<S>>,
    frames: RefCell<Vec<LoopFrame>>,
    quitting: Cell<bool>,
}

/// Execution context handed to every work item.
///
/// Holding a `TurnCtx` proves the code is on the executor thread, which is
/// what makes [`TurnCtx::submit_immediate`] safe to run in place.
pub struct TurnCtx<'e, S> {
    /// The executor-owned state. Never leaves the executor thread.
    pub state: &'e mut S,
    lp: &'e LoopCtx<S>,
}

impl<S> TurnCtx<'_, S> {
    /// Runs nested work synchronously, in place.
    ///
    /// This is the executor-thread fast path of submission: since the caller
    /// is already the executor thread, queueing (and then blocking on the
    /// queue) would deadlock, so the work runs immediately instead.
    pub fn submit_immediate<R>(&mut self, work: impl FnOnce(&mut TurnCtx<'_, S>) -> R) -> R {
        work(self)
    }

    /// Queues work without blocking; it runs after everything already queued.
    pub fn post(&self, work: impl FnOnce(&mut TurnCtx<'_, S>) + Send + 'static) {
        let _ = self.lp.tx.send(Msg::Run {
            work: Box::new(work),
            cancel: None,
        });
    }

    /// A clonable, `Send` handle for posting from helper threads.
    pub fn sender(&self) -> LoopSender<S> {
        LoopSender(self.lp.tx.clone())
    }

    /// Number of nested loops currently active.
    pub fn loop_depth(&self) -> usize {
        self.lp.frames.borrow().len()
    }

    /// Pumps the queue until a posted item calls [`Self::break_loop`],
    /// returning the break value.
    ///
    /// While blocked here the executor still serves every queued item — new
    /// remote submissions, interrupts, input deliveries — so a turn can wait
    /// for its caller without starving the rest of the service. Returns
    /// [`LoopValue::Eof`] if the executor shuts down mid-wait.
    pub fn run_loop(&mut self) -> LoopValue {
        let depth = {
            let mut frames = self.lp.frames.borrow_mut();
            frames.push(LoopFrame::default());
            frames.len()
        };
        trace!(depth, "entering nested loop");
        loop {
            {
                let mut frames = self.lp.frames.borrow_mut();
                debug_assert_eq!(frames.len(), depth, "inner loops must unwind before their parent");
                if let Some(frame) = frames.last_mut() {
                    if let Some(value) = frame.brk.take() {
                        frames.pop();
                        trace!(depth, "leaving nested loop");
                        return value;
                    }
                }
            }
            if self.lp.quitting.get() {
                self.lp.frames.borrow_mut().pop();
                return LoopValue::Eof;
            }
            match self.lp.rx.recv() {
                Ok(Msg::Run { work, cancel }) => {
                    if cancel.is_some_and(|token| token.is_cancelled()) {
                        debug!("dropping cancelled work item inside nested loop");
                        continue;
                    }
                    work(self);
                }
                Ok(Msg::Shutdown) | Err(_) => {
                    self.lp.quitting.set(true);
                    self.lp.frames.borrow_mut().pop();
                    return LoopValue::Eof;
                }
            }
        }
    }

    /// Delivers `value` to the innermost active loop. The loop returns it
    /// once the current item finishes.
    ///
    /// A break with no active loop is ignored (the wait it targeted has
    /// already ended).
    pub fn break_loop(&self, value: LoopValue) {
        let mut frames = self.lp.frames.borrow_mut();
        if let Some(frame) = frames.last_mut() {
            frame.brk = Some(value);
        } else {
            warn!("break_loop with no active loop frame");
        }
    }
}

/// Handle for posting work from arbitrary threads (subprocess readers,
/// transport callbacks).
pub struct LoopSender<S>(Sender<Msg<S>>);

impl<S> Clone for LoopSender<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S> LoopSender<S> {
    /// Queues work without blocking. Silently dropped after shutdown.
    pub fn post(&self, work: impl FnOnce(&mut TurnCtx<'_, S>) + Send + 'static) {
        let _ = self.0.send(Msg::Run {
            work: Box::new(work),
            cancel: None,
        });
    }
}

/// Owns the executor thread and the submission side of its queue.
///
/// Dropping the executor shuts the thread down: queued-but-unstarted items
/// are abandoned and their submitters observe [`ExecError::Shutdown`].
pub struct Executor<S: 'static> {
    tx: Sender<Msg<S>>,
    handle: Option<JoinHandle<()>>,
}

impl<S> Executor<S> {
    /// Spawns the executor thread and builds the state on it.
    ///
    /// `init` runs on the new thread, so `S` itself does not need to be
    /// `Send` — only the initializer does.
    pub fn spawn<F>(init: F) -> Self
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let thread_tx = tx.clone();
        let handle = std::thread::spawn(move || thread_main(thread_tx, rx, init));
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Submits work and blocks the calling thread until it completes,
    /// returning the work's result.
    pub fn submit<R, F>(&self, work: F) -> Result<R, ExecError>
    where
        R: Send + 'static,
        F: FnOnce(&mut TurnCtx<'_, S>) -> R + Send + 'static,
    {
        self.submit_cancellable(work, None)
    }

    /// Like [`Self::submit`], with a token honored while the item is queued.
    pub fn submit_cancellable<R, F>(&self, work: F, cancel: Option<CancellationToken>) -> Result<R, ExecError>
    where
        R: Send + 'static,
        F: FnOnce(&mut TurnCtx<'_, S>) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        let probe = cancel.clone();
        let work: Work<S> = Box::new(move |ctx| {
            let _ = reply_tx.send(work(ctx));
        });
        if self.tx.send(Msg::Run { work, cancel }).is_err() {
            return Err(ExecError::Shutdown);
        }
        match reply_rx.recv() {
            Ok(result) => Ok(result),
            Err(_) => {
                if probe.is_some_and(|token| token.is_cancelled()) {
                    Err(ExecError::Cancelled)
                } else {
                    Err(ExecError::Shutdown)
                }
            }
        }
    }

    /// Queues work without blocking the calling thread.
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce(&mut TurnCtx<'_, S>) + Send + 'static,
    {
        let _ = self.tx.send(Msg::Run {
            work: Box::new(work),
            cancel: None,
        });
    }

    /// A clonable posting handle independent of the executor's lifetime.
    pub fn sender(&self) -> LoopSender<S> {
        LoopSender(self.tx.clone())
    }
}

impl<S> Drop for Executor<S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("executor thread panicked during shutdown");
            }
        }
    }
}

fn thread_main<S, F>(tx: Sender<Msg<S>>, rx: Receiver<Msg<S>>, init: F)
where
    F: FnOnce() -> S,
{
    let mut state = init();
    let lp = LoopCtx {
        tx,
        rx,
        frames: RefCell::new(Vec::new()),
        quitting: Cell::new(false),
    };
    debug!("executor thread started");
    while !lp.quitting.get() {
        match lp.rx.recv() {
            Ok(Msg::Run { work, cancel }) => {
                if cancel.is_some_and(|token| token.is_cancelled()) {
                    debug!("dropping cancelled work item");
                    continue;
                }
                let mut ctx = TurnCtx {
                    state: &mut state,
                    lp: &lp,
                };
                work(&mut ctx);
            }
            Ok(Msg::Shutdown) | Err(_) => break,
        }
    }
    debug!("executor thread stopped");
}
