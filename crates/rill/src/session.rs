//! The session: one interpreter, one executor thread, many callers.
//!
//! [`Session`] is the concurrency boundary of the crate. It is `Send + Sync`
//! and cheap to share, while everything it guards — environments, the
//! debugger, output routing, stored handles — lives in [`SessionCore`] on
//! the executor thread and is never touched from anywhere else.
//!
//! A turn is one submission of code. While a turn waits (for a line of
//! input, at a debugger stop, for a child process) the executor keeps
//! serving the queue through a nested loop, so other callers' requests run
//! *inside* the wait and the session never wedges.

use std::{
    cell::RefCell,
    fmt,
    io::Write as _,
    process::{Command, Stdio},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, warn};

use crate::debugger::{DebugCommand, Debugger};
use crate::env::Env;
use crate::events::{AsyncEvent, EventQueue, ExceptionCause};
use crate::executor::{
    CancellationToken, ExecError, Executor, LoopSender, LoopValue, TurnCtx,
};
use crate::handles::{Handle, HandleStore, StaleHandleError};
use crate::interp::{DEFAULT_MAX_DEPTH, EvalError, Evaluator, Host};
use crate::output::{OutputHandler, OutputKind, OutputRouter};
use crate::parse::{SourcePosition, parse_program};
use crate::state::{ReplState, StateCell, StateGuard};
use crate::value::Value;

// ==== requests and results ====

/// One submission of code to the session.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub code: String,
    /// Identifier reported in positions and breakpoints for this code.
    pub source_file_id: String,
    /// Added to every line number this code reports.
    pub line_offset: u32,
    /// Print the value of each visible expression, REPL style.
    pub with_echo: bool,
    /// REPL turns announce busy/prompt/exception events; non-REPL turns
    /// report faults on their own stderr instead.
    pub is_repl: bool,
    /// Let the debugger stop this turn at breakpoints and step targets.
    pub is_debug: bool,
    /// Drop any step command left over from an earlier debugger stop.
    pub reset_debug_command: bool,
}

impl TurnRequest {
    /// A console turn: echoing, event-announcing, debugger-aware.
    pub fn repl(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_file_id: "<console>".to_owned(),
            line_offset: 0,
            with_echo: true,
            is_repl: true,
            is_debug: false,
            reset_debug_command: true,
        }
    }

    /// A quiet turn: no echo, no session events, faults on stderr.
    pub fn script(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_file_id: "<script>".to_owned(),
            line_offset: 0,
            with_echo: false,
            is_repl: false,
            is_debug: false,
            reset_debug_command: false,
        }
    }

    pub fn with_source(mut self, file_id: impl Into<String>, line_offset: u32) -> Self {
        self.source_file_id = file_id.into();
        self.line_offset = line_offset;
        self
    }

    pub fn with_echo(mut self, with_echo: bool) -> Self {
        self.with_echo = with_echo;
        self
    }

    pub fn with_debug(mut self, is_debug: bool) -> Self {
        self.is_debug = is_debug;
        self
    }
}

/// A chunk produced by a turn, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TurnOutput {
    Output { kind: OutputKind, text: String },
    /// The turn ended early with this fault.
    Fault { message: String },
}

/// A variable visible in the global environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub type_name: String,
    pub repr: String,
}

/// Failure of a session request, as seen by the remote caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The request's cancellation token fired before it started.
    Cancelled,
    /// The session shut down before the request completed.
    Shutdown,
    /// Parsing or evaluation failed.
    Fault { message: String },
    /// The request named a disposed or never-allocated handle.
    StaleHandle(Handle),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "request was cancelled before it started"),
            Self::Shutdown => write!(f, "session is shut down"),
            Self::Fault { message } => write!(f, "{message}"),
            Self::StaleHandle(handle) => {
                write!(f, "handle {handle} is disposed or was never allocated")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ExecError> for SessionError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Cancelled => Self::Cancelled,
            ExecError::Shutdown => Self::Shutdown,
        }
    }
}

impl From<EvalError> for SessionError {
    fn from(err: EvalError) -> Self {
        Self::Fault {
            message: err.to_string(),
        }
    }
}

impl From<StaleHandleError> for SessionError {
    fn from(err: StaleHandleError) -> Self {
        Self::StaleHandle(err.handle)
    }
}

// ==== shared flags ====

/// State visible to every thread: routing flags and the event channel.
pub(crate) struct SessionShared {
    pub(crate) state: StateCell,
    /// Cooperative interrupt, polled at statement checkpoints.
    pub(crate) interrupt: AtomicBool,
    /// A pause was requested while the session was busy.
    pub(crate) pause_requested: AtomicBool,
    /// A child process is currently consuming caller-supplied input.
    pub(crate) subprocess_active: AtomicBool,
    pub(crate) events: EventQueue,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: StateCell::new(),
            interrupt: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            subprocess_active: AtomicBool::new(false),
            events: EventQueue::new(),
        }
    }
}

// ==== executor-thread state ====

/// Everything the executor thread owns. Deliberately not `Send`: it is
/// built on the executor thread and never leaves it.
pub struct SessionCore {
    global: Env,
    debugger: Debugger,
    router: OutputRouter,
    handles: HandleStore<Value>,
    shared: Arc<SessionShared>,
    max_depth: usize,
    /// Whether the running turn lets the debugger stop it.
    is_debug_turn: bool,
    /// How many debugger stops are live on the loop stack.
    debug_stops: usize,
    pending_debug_command: Option<DebugCommand>,
    /// Set when an interrupt targets the child process being fed input.
    subprocess_interrupt: bool,
    system_exit: Option<f64>,
}

impl SessionCore {
    fn new(shared: Arc<SessionShared>, max_depth: usize) -> Self {
        Self {
            global: Env::global(),
            debugger: Debugger::new(),
            router: OutputRouter::new(Box::new(|text, kind| {
                debug!(?kind, text, "output with no turn handler");
            })),
            handles: HandleStore::new(),
            shared,
            max_depth,
            is_debug_turn: false,
            debug_stops: 0,
            pending_debug_command: None,
            subprocess_interrupt: false,
            system_exit: None,
        }
    }
}

// ==== the evaluator's view of a running turn ====

impl Host for TurnCtx<'_, SessionCore> {
    fn write(&mut self, kind: OutputKind, text: &str) {
        self.state.router.write(text, kind);
    }

    fn read_line(&mut self, prompt: &str) -> Result<String, EvalError> {
        // readline only makes sense while code is actually running.
        if self.state.shared.state.load() != ReplState::Busy {
            return Ok(String::new());
        }
        self.state.shared.events.push(AsyncEvent::RequestReadLine {
            prompt: prompt.to_owned(),
        });
        let delivered = {
            let shared = Arc::clone(&self.state.shared);
            let _guard = StateGuard::enter(&shared.state, ReplState::ReadLine);
            self.run_loop()
        };
        self.state.shared.events.push(AsyncEvent::Busy);
        if self.state.shared.interrupt.swap(false, Ordering::AcqRel) {
            return Err(EvalError::Interrupted);
        }
        match delivered {
            LoopValue::Text(line) => Ok(line),
            LoopValue::Unit => Ok(String::new()),
            LoopValue::Eof => Err(EvalError::Interrupted),
        }
    }

    fn statement(&mut self, pos: &SourcePosition, depth: usize) -> Result<(), EvalError> {
        if self.state.shared.interrupt.swap(false, Ordering::AcqRel) {
            return Err(EvalError::Interrupted);
        }
        self.state.debugger.set_top_position(pos.clone());
        if self.state.is_debug_turn {
            let paused = self
                .state
                .shared
                .pause_requested
                .swap(false, Ordering::AcqRel);
            if paused || self.state.debugger.should_stop(pos, depth) {
                self.debug_stop(depth)?;
            }
        }
        Ok(())
    }

    fn enter_call(&mut self, name: &str, pos: &SourcePosition) {
        self.state
            .debugger
            .enter_call(Some(name.to_owned()), pos.clone());
    }

    fn exit_call(&mut self) {
        self.state.debugger.exit_call();
    }

    fn run_system(&mut self, command: &str, feed_input: bool) -> Result<f64, EvalError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(if feed_input {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EvalError::message(format!("cannot run command: {err}")))?;

        self.state.subprocess_interrupt = false;

        if feed_input {
            let mut stdin = child.stdin.take();
            let shared = Arc::clone(&self.state.shared);
            shared.subprocess_active.store(true, Ordering::Release);
            {
                let _guard = StateGuard::enter(&shared.state, ReplState::SubprocessInput);
                loop {
                    match self.run_loop() {
                        LoopValue::Text(line) => {
                            let Some(pipe) = stdin.as_mut() else { break };
                            if writeln!(pipe, "{line}").is_err() {
                                break;
                            }
                        }
                        LoopValue::Unit | LoopValue::Eof => break,
                    }
                    if self.state.subprocess_interrupt {
                        break;
                    }
                }
            }
            shared.subprocess_active.store(false, Ordering::Release);
            // Closing stdin lets the child observe end of input.
            drop(stdin);
        }

        if self.state.subprocess_interrupt {
            let _ = child.kill();
        }

        // Stream output from reader threads, addressed to the handler that
        // is current right now so late chunks cannot leak into later turns.
        let handler_id = self.state.router.current_id();
        let sender = self.sender();
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(sender.clone(), handler_id, OutputKind::Stdout, pipe));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(sender.clone(), handler_id, OutputKind::Stderr, pipe));
        }
        {
            let shared = Arc::clone(&self.state.shared);
            let _guard = StateGuard::enter(&shared.state, ReplState::ChildProcess);
            std::thread::spawn(move || {
                for reader in readers {
                    let _ = reader.join();
                }
                let code = match child.wait() {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                sender.post(move |ctx: &mut TurnCtx<'_, SessionCore>| {
                    ctx.state.system_exit = Some(f64::from(code));
                    ctx.break_loop(LoopValue::Unit);
                });
            });
            self.run_loop();
        }

        let code = self.state.system_exit.take().unwrap_or(-1.0);
        if std::mem::take(&mut self.state.subprocess_interrupt) {
            return Err(EvalError::Interrupted);
        }
        Ok(code)
    }
}

impl TurnCtx<'_, SessionCore> {
    /// Parks the turn at a debugger stop until a debug command resumes it.
    fn debug_stop(&mut self, depth: usize) -> Result<(), EvalError> {
        let stack = self.state.debugger.capture_stack();
        self.state.shared.events.push(AsyncEvent::DebugPrompt {
            changed: true,
            stack,
        });
        self.state.debug_stops += 1;
        let resumed = {
            let shared = Arc::clone(&self.state.shared);
            let _guard = StateGuard::enter(&shared.state, ReplState::DebugPrompt);
            self.run_loop()
        };
        self.state.debug_stops -= 1;
        self.state.shared.events.push(AsyncEvent::Busy);
        let command = self
            .state
            .pending_debug_command
            .take()
            .unwrap_or(DebugCommand::Continue);
        self.state.debugger.resume_with(command, depth);
        if matches!(resumed, LoopValue::Eof) || command == DebugCommand::Stop {
            return Err(EvalError::Interrupted);
        }
        Ok(())
    }
}

fn spawn_reader<R>(
    sender: LoopSender<SessionCore>,
    handler_id: u64,
    kind: OutputKind,
    mut pipe: R,
) -> std::thread::JoinHandle<()>
where
    R: std::io::Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    sender.post(move |ctx: &mut TurnCtx<'_, SessionCore>| {
                        ctx.state.router.write_to(handler_id, &text, kind);
                    });
                }
            }
        }
    })
}

// ==== the turn pipeline ====

fn exception_cause(err: &EvalError) -> ExceptionCause {
    match err {
        EvalError::Interrupted => ExceptionCause::Interrupted,
        EvalError::Error(info) => match &info.package_not_found {
            Some(package) => ExceptionCause::PackageNotFound {
                message: info.message.clone(),
                package: package.clone(),
            },
            None => ExceptionCause::Error {
                message: info.message.clone(),
            },
        },
    }
}

/// Runs one turn against the session. Returns the fault message if the turn
/// ended early.
///
/// The shape is fixed regardless of outcome: handler pushed and popped,
/// busy state entered and restored, and — for REPL turns — a final prompt
/// (or re-announced debug prompt) event even when parsing or evaluation
/// faulted.
fn run_turn(
    ctx: &mut TurnCtx<'_, SessionCore>,
    req: &TurnRequest,
    handler: OutputHandler,
) -> Option<String> {
    let shared = Arc::clone(&ctx.state.shared);
    let handler_id = ctx.state.router.push(handler);
    let state_guard = StateGuard::enter(&shared.state, ReplState::Busy);
    if req.is_repl {
        shared.events.push(AsyncEvent::Busy);
        shared.pause_requested.store(false, Ordering::Release);
        ctx.state.debugger.clear_error_stack();
        if req.reset_debug_command {
            ctx.state.debugger.reset_command();
        }
    }
    let prev_debug = std::mem::replace(&mut ctx.state.is_debug_turn, req.is_debug);

    let mut fault = None;
    match parse_program(&req.code, &req.source_file_id, req.line_offset) {
        Err(err) => {
            let message = err.to_string();
            if req.is_repl {
                shared.events.push(AsyncEvent::Exception {
                    cause: ExceptionCause::Error {
                        message: message.clone(),
                    },
                    stack: Vec::new(),
                });
            } else {
                ctx.state
                    .router
                    .write_to(handler_id, &format!("\n{message}\n"), OutputKind::Stderr);
            }
            fault = Some(message);
        }
        Ok(exprs) => {
            let stack_base = ctx.state.debugger.depth();
            ctx.state.debugger.enter_call(
                None,
                SourcePosition {
                    file_id: req.source_file_id.clone(),
                    line: req.line_offset + 1,
                },
            );
            let env = ctx.state.global.clone();
            let max_depth = ctx.state.max_depth;
            for expr in &exprs {
                let result = Evaluator::with_max_depth(ctx, max_depth).eval_top(&env, expr);
                match result {
                    Ok((value, visible)) => {
                        if req.with_echo && visible {
                            let echoed = format!("{}\n", value.echo_repr());
                            ctx.state
                                .router
                                .write_to(handler_id, &echoed, OutputKind::Stdout);
                        }
                    }
                    Err(err) => {
                        let stack = match err {
                            EvalError::Interrupted => Vec::new(),
                            EvalError::Error(_) => ctx.state.debugger.capture_stack(),
                        };
                        ctx.state.debugger.record_error_stack(stack.clone());
                        let message = err.to_string();
                        if req.is_repl {
                            shared.events.push(AsyncEvent::Exception {
                                cause: exception_cause(&err),
                                stack,
                            });
                        } else {
                            ctx.state.router.write_to(
                                handler_id,
                                &format!("\n{message}\n"),
                                OutputKind::Stderr,
                            );
                        }
                        fault = Some(message);
                        break;
                    }
                }
            }
            // A fault leaves its frames on the stack; drop everything this
            // turn pushed in one go.
            ctx.state.debugger.truncate_stack(stack_base);
        }
    }

    ctx.state.is_debug_turn = prev_debug;
    ctx.state.router.pop(handler_id);
    drop(state_guard);
    if req.is_repl {
        if ctx.state.debug_stops > 0 {
            shared.events.push(AsyncEvent::DebugPrompt {
                changed: false,
                stack: ctx.state.debugger.capture_stack(),
            });
        } else {
            shared.events.push(AsyncEvent::Prompt);
        }
    }
    fault
}

/// Evaluates code without a turn: no events, no echo, output to the base
/// handler. Backs the inspection and mutation requests.
fn eval_silent(ctx: &mut TurnCtx<'_, SessionCore>, code: &str) -> Result<Value, EvalError> {
    let exprs = parse_program(code, "<request>", 0)
        .map_err(|err| EvalError::message(err.to_string()))?;
    let env = ctx.state.global.clone();
    let max_depth = ctx.state.max_depth;
    let stack_base = ctx.state.debugger.depth();
    let mut last = Value::Null;
    let mut fault = None;
    for expr in &exprs {
        let result = Evaluator::with_max_depth(ctx, max_depth).eval_top(&env, expr);
        match result {
            Ok((value, _)) => last = value,
            Err(err) => {
                fault = Some(err);
                break;
            }
        }
    }
    ctx.state.debugger.truncate_stack(stack_base);
    match fault {
        Some(err) => Err(err),
        None => Ok(last),
    }
}

// ==== the public handle ====

/// Builds a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    max_depth: Option<usize>,
    startup: Option<String>,
}

impl SessionBuilder {
    /// Maximum interpreter call depth before a turn faults.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Code evaluated quietly before the first prompt.
    pub fn startup(mut self, code: impl Into<String>) -> Self {
        self.startup = Some(code.into());
        self
    }

    pub fn build(self) -> Session {
        let shared = Arc::new(SessionShared::new());
        let core_shared = Arc::clone(&shared);
        let max_depth = self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let executor = Executor::spawn(move || SessionCore::new(core_shared, max_depth));
        let startup = self.startup;
        // The session reports busy until this first item has run.
        executor.post(move |ctx| {
            if let Some(code) = startup {
                if let Err(err) = eval_silent(ctx, &code) {
                    warn!(%err, "startup code failed");
                }
            }
            ctx.state.shared.state.store(ReplState::Prompt);
            ctx.state.shared.events.push(AsyncEvent::Prompt);
        });
        Session { shared, executor }
    }
}

/// A shareable handle to one interpreter session.
pub struct Session {
    shared: Arc<SessionShared>,
    executor: Executor<SessionCore>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    // ==== turns ====

    /// Runs a turn and returns everything it emitted, in order. Blocks the
    /// calling thread until the turn completes.
    pub fn execute_turn(&self, request: TurnRequest) -> Result<Vec<TurnOutput>, SessionError> {
        self.execute_turn_cancellable(request, None)
    }

    /// Like [`Self::execute_turn`]; the token cancels the turn while it is
    /// still queued (a started turn is stopped with [`Self::interrupt`]).
    pub fn execute_turn_cancellable(
        &self,
        request: TurnRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<TurnOutput>, SessionError> {
        self.executor
            .submit_cancellable(
                move |ctx| {
                    let outputs = Rc::new(RefCell::new(Vec::new()));
                    let sink = Rc::clone(&outputs);
                    let handler: OutputHandler = Box::new(move |text, kind| {
                        sink.borrow_mut().push(TurnOutput::Output {
                            kind,
                            text: text.to_owned(),
                        });
                    });
                    let fault = run_turn(ctx, &request, handler);
                    if let Some(message) = fault {
                        outputs.borrow_mut().push(TurnOutput::Fault { message });
                    }
                    Rc::try_unwrap(outputs)
                        .map(RefCell::into_inner)
                        .unwrap_or_default()
                },
                cancel,
            )
            .map_err(SessionError::from)
    }

    /// Runs a turn, sending each chunk through `sink` as it is produced.
    /// Blocks until the turn completes; a trailing [`TurnOutput::Fault`]
    /// reports early termination.
    pub fn execute_turn_streamed(
        &self,
        request: TurnRequest,
        sink: Sender<TurnOutput>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), SessionError> {
        self.executor
            .submit_cancellable(
                move |ctx| {
                    let chunk_sink = sink.clone();
                    let handler: OutputHandler = Box::new(move |text, kind| {
                        let _ = chunk_sink.send(TurnOutput::Output {
                            kind,
                            text: text.to_owned(),
                        });
                    });
                    if let Some(message) = run_turn(ctx, &request, handler) {
                        let _ = sink.send(TurnOutput::Fault { message });
                    }
                },
                cancel,
            )
            .map_err(SessionError::from)
    }

    // ==== input ====

    /// Delivers a line to code waiting in `readline()` or to a child
    /// process consuming input. Ignored when nothing is waiting.
    pub fn send_line(&self, line: impl Into<String>) {
        let mut line = line.into();
        self.executor.post(move |ctx| {
            match ctx.state.shared.state.load() {
                ReplState::ReadLine => {
                    // readline takes a single line; drop anything after the
                    // first newline.
                    if let Some(end) = line.find('\n') {
                        line.truncate(end);
                    }
                    ctx.break_loop(LoopValue::Text(line));
                }
                ReplState::SubprocessInput => {
                    if !line.is_empty() {
                        ctx.break_loop(LoopValue::Text(line));
                    }
                }
                _ => debug!("discarding input line; session is not reading"),
            }
        });
    }

    /// Ends the current input wait: `readline()` observes an empty line, a
    /// child process observes end of input.
    pub fn send_eof(&self) {
        self.executor.post(|ctx| match ctx.state.shared.state.load() {
            ReplState::ReadLine => ctx.break_loop(LoopValue::Text(String::new())),
            ReplState::SubprocessInput => ctx.break_loop(LoopValue::Eof),
            _ => debug!("discarding eof; session is not reading"),
        });
    }

    /// Requests an interrupt, routed by what the session is doing:
    /// evaluation stops at its next statement, a pending `readline()`
    /// returns interrupted, a child process being fed input is killed.
    /// Ignored while the session is idle.
    pub fn interrupt(&self) {
        match self.shared.state.load() {
            ReplState::Busy => self.shared.interrupt.store(true, Ordering::Release),
            ReplState::ReadLine => self.executor.post(|ctx| {
                // Re-check on the executor thread: the wait may already be
                // over by the time this item runs.
                if ctx.state.shared.state.load() == ReplState::ReadLine {
                    ctx.state.shared.interrupt.store(true, Ordering::Release);
                    ctx.break_loop(LoopValue::Text(String::new()));
                }
            }),
            ReplState::SubprocessInput => self.executor.post(|ctx| {
                if ctx.state.shared.state.load() == ReplState::SubprocessInput
                    && ctx.state.shared.subprocess_active.load(Ordering::Acquire)
                {
                    ctx.state.subprocess_interrupt = true;
                    ctx.break_loop(LoopValue::Eof);
                }
            }),
            ReplState::Prompt | ReplState::DebugPrompt | ReplState::ChildProcess => {}
        }
    }

    // ==== events and state ====

    /// Blocks until the next session event, or `None` after shutdown.
    pub fn next_async_event(&self) -> Option<AsyncEvent> {
        self.shared.events.pull()
    }

    /// A snapshot of the session state. Eventually consistent: the state
    /// may change between this read and anything done with it.
    pub fn state(&self) -> ReplState {
        self.shared.state.load()
    }

    /// Whether the session is doing anything other than sitting at a
    /// prompt.
    pub fn is_busy(&self) -> bool {
        !matches!(
            self.shared.state.load(),
            ReplState::Prompt | ReplState::DebugPrompt
        )
    }

    // ==== debugging ====

    /// Resumes the turn parked at a debugger stop with `command`.
    /// [`DebugCommand::Pause`] is also accepted while the session is busy,
    /// stopping the running debug turn at its next statement.
    pub fn send_debug_command(&self, command: DebugCommand) {
        if command == DebugCommand::Pause && self.shared.state.load() == ReplState::Busy {
            self.shared.pause_requested.store(true, Ordering::Release);
            return;
        }
        self.executor.post(move |ctx| {
            match ctx.state.shared.state.load() {
                ReplState::DebugPrompt => {
                    ctx.state.pending_debug_command = Some(command);
                    ctx.break_loop(LoopValue::Unit);
                }
                ReplState::Busy if command == DebugCommand::Pause => {
                    ctx.state
                        .shared
                        .pause_requested
                        .store(true, Ordering::Release);
                }
                _ => debug!(?command, "debug command ignored; no stop active"),
            }
        });
    }

    pub fn set_breakpoint(&self, file_id: impl Into<String>, line: u32) {
        let file_id = file_id.into();
        self.executor
            .post(move |ctx| ctx.state.debugger.set_breakpoint(file_id, line));
    }

    pub fn remove_breakpoint(&self, file_id: impl Into<String>, line: u32) {
        let file_id = file_id.into();
        self.executor
            .post(move |ctx| ctx.state.debugger.remove_breakpoint(&file_id, line));
    }

    pub fn mute_breakpoints(&self, muted: bool) {
        self.executor
            .post(move |ctx| ctx.state.debugger.set_muted(muted));
    }

    /// The call stack recorded at the most recent uncaught fault,
    /// innermost frame last. Empty if the last turn succeeded or was
    /// interrupted.
    pub fn last_error_stack(&self) -> Result<Vec<crate::events::StackFrame>, SessionError> {
        self.executor
            .submit(|ctx| ctx.state.debugger.capture_error_stack())
            .map_err(SessionError::from)
    }

    // ==== inspection and mutation ====

    /// Evaluates an expression and pins its value under a fresh handle.
    pub fn copy_to_handle(&self, code: impl Into<String>) -> Result<Handle, SessionError> {
        let code = code.into();
        self.executor.submit(move |ctx| {
            let value = eval_silent(ctx, &code).map_err(SessionError::from)?;
            Ok(ctx.state.handles.allocate(value))
        })?
    }

    /// REPL-style rendering of a pinned value.
    pub fn handle_repr(&self, handle: Handle) -> Result<String, SessionError> {
        self.executor.submit(move |ctx| {
            ctx.state
                .handles
                .get(handle)
                .map(Value::echo_repr)
                .map_err(SessionError::from)
        })?
    }

    /// Frees pinned values. Stale handles are ignored.
    pub fn dispose_handles(&self, handles: Vec<Handle>) {
        self.executor.post(move |ctx| {
            for handle in handles {
                ctx.state.handles.dispose(handle);
            }
        });
    }

    /// Evaluates an expression and returns its REPL-style rendering.
    pub fn evaluate_as_text(&self, code: impl Into<String>) -> Result<String, SessionError> {
        let code = code.into();
        self.executor.submit(move |ctx| {
            eval_silent(ctx, &code)
                .map(|value| value.echo_repr())
                .map_err(SessionError::from)
        })?
    }

    /// Every variable in the global environment, sorted by name.
    pub fn list_variables(&self) -> Result<Vec<VariableInfo>, SessionError> {
        self.executor
            .submit(|ctx| {
                ctx.state
                    .global
                    .names()
                    .into_iter()
                    .filter_map(|name| {
                        ctx.state.global.get(&name).map(|value| VariableInfo {
                            name,
                            type_name: value.type_name().to_owned(),
                            repr: value.echo_repr(),
                        })
                    })
                    .collect()
            })
            .map_err(SessionError::from)
    }

    /// Evaluates an expression and binds the result in the global
    /// environment, announcing the change as an event.
    pub fn set_value(
        &self,
        name: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<(), SessionError> {
        let name = name.into();
        let code = code.into();
        self.executor.submit(move |ctx| {
            let value = eval_silent(ctx, &code).map_err(SessionError::from)?;
            ctx.state.global.set(name.clone(), value);
            ctx.state
                .shared
                .events
                .push(AsyncEvent::ValueChanged { name });
            Ok(())
        })?
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Close the event channel first so a push blocked on a full queue
        // cannot stall the executor join below.
        self.shared.events.close();
    }
}
