//! The tree-walking evaluator and its host seam.
//!
//! Evaluation never talks to the concurrency core directly: everything that
//! leaves the interpreter — output, blocking reads, cooperative interrupt and
//! debugger checkpoints, child processes — goes through the [`Host`] trait.
//! The session implements `Host` on top of the executor's reentrant loop;
//! tests implement it with plain buffers.

use std::{collections::VecDeque, fmt, rc::Rc};

use crate::{
    env::Env,
    output::OutputKind,
    parse::{BinOp, Expr, ExprKind, SourcePosition, UnOp},
    value::{Function, Value},
};

/// Default recursion depth limit for user function calls.
pub const DEFAULT_MAX_DEPTH: usize = 200;

/// Packages that `library()` accepts. Everything else raises the
/// package-not-found condition that the turn pipeline reports specially.
const BASE_PACKAGES: &[&str] = &[
    "base",
    "compiler",
    "datasets",
    "graphics",
    "grDevices",
    "methods",
    "stats",
    "utils",
];

/// Structured cause of a runtime fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Condition message, without any "Error:" prefix.
    pub message: String,
    /// Set when the fault is a missing-package condition; carries the name.
    pub package_not_found: Option<String>,
}

impl ErrorInfo {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            package_not_found: None,
        }
    }
}

/// Error type for evaluation, separating ordinary faults from interrupts.
///
/// `Interrupted` is a sibling of `Error`, not a kind of it: the turn pipeline
/// reports it with a fixed message and no stack, and the debugger does not
/// capture anything for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A fault raised by interpreter code (`stop()`, type errors, ...).
    Error(ErrorInfo),
    /// A cooperative interrupt observed at a safe point.
    Interrupted,
}

impl EvalError {
    pub(crate) fn message(message: impl Into<String>) -> Self {
        Self::Error(ErrorInfo::new(message))
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(info) => write!(f, "Error: {}", info.message),
            Self::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for EvalError {}

/// The seam between evaluation and the outside world.
///
/// The executor-backed implementation blocks inside `read_line` and
/// `run_system` while keeping the service responsive; `statement` is the
/// cooperative checkpoint where interrupts and debugger stops land.
pub trait Host {
    /// Routes a chunk of emitted text to the active output handler.
    fn write(&mut self, kind: OutputKind, text: &str);

    /// Blocks until the remote caller supplies a line of input.
    fn read_line(&mut self, prompt: &str) -> Result<String, EvalError>;

    /// Statement checkpoint: polls the interrupt flag and gives the debugger
    /// a chance to pause. Called before every statement and loop iteration.
    fn statement(&mut self, pos: &SourcePosition, depth: usize) -> Result<(), EvalError>;

    /// Pushes a frame on the debugger's call stack.
    fn enter_call(&mut self, name: &str, pos: &SourcePosition);

    /// Pops the most recent call-stack frame.
    fn exit_call(&mut self);

    /// Runs a child process, routing its output through the handler that is
    /// current right now. `feed_input` requests caller-supplied stdin lines.
    fn run_system(&mut self, command: &str, feed_input: bool) -> Result<f64, EvalError>;
}

/// A `Host` backed by plain buffers, for tests and headless evaluation.
///
/// Read lines are served from a scripted queue; an exhausted queue reads as
/// empty input, the same as EOF from a real caller.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    pub stdout: String,
    pub stderr: String,
    pub lines: VecDeque<String>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Host for ScriptedHost {
    fn write(&mut self, kind: OutputKind, text: &str) {
        match kind {
            OutputKind::Stdout => self.stdout.push_str(text),
            OutputKind::Stderr => self.stderr.push_str(text),
        }
    }

    fn read_line(&mut self, _prompt: &str) -> Result<String, EvalError> {
        Ok(self.lines.pop_front().unwrap_or_default())
    }

    fn statement(&mut self, _pos: &SourcePosition, _depth: usize) -> Result<(), EvalError> {
        Ok(())
    }

    fn enter_call(&mut self, _name: &str, _pos: &SourcePosition) {}

    fn exit_call(&mut self) {}

    fn run_system(&mut self, _command: &str, _feed_input: bool) -> Result<f64, EvalError> {
        Err(EvalError::message("system() is not available in this host"))
    }
}

/// Evaluates expressions against an environment, tracking R-style result
/// visibility and the call depth used for step conditions.
pub struct Evaluator<'h> {
    host: &'h mut dyn Host,
    depth: usize,
    visible: bool,
    max_depth: usize,
}

impl<'h> Evaluator<'h> {
    pub fn new(host: &'h mut dyn Host) -> Self {
        Self::with_max_depth(host, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(host: &'h mut dyn Host, max_depth: usize) -> Self {
        Self {
            host,
            depth: 0,
            visible: true,
            max_depth,
        }
    }

    /// Evaluates one top-level expression, returning the value and whether it
    /// should be echoed (R visibility).
    pub fn eval_top(&mut self, env: &Env, expr: &Expr) -> Result<(Value, bool), EvalError> {
        self.host.statement(&expr.pos, self.depth)?;
        self.visible = true;
        let value = self.eval(env, expr)?;
        Ok((value, self.visible))
    }

    fn eval(&mut self, env: &Env, expr: &Expr) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::Number(n) => {
                self.visible = true;
                Ok(Value::Number(*n))
            }
            ExprKind::Str(s) => {
                self.visible = true;
                Ok(Value::Str(s.clone()))
            }
            ExprKind::Logical(b) => {
                self.visible = true;
                Ok(Value::Logical(*b))
            }
            ExprKind::Null => {
                self.visible = true;
                Ok(Value::Null)
            }
            ExprKind::Ident(name) => {
                self.visible = true;
                env.get(name)
                    .ok_or_else(|| EvalError::message(format!("object '{name}' not found")))
            }
            ExprKind::Assign { target, value } => {
                let value = self.eval(env, value)?;
                env.set(target.clone(), value.clone());
                self.visible = false;
                Ok(value)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(env, operand)?;
                self.visible = true;
                match op {
                    UnOp::Neg => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(EvalError::message(format!(
                            "invalid argument to unary operator: {}",
                            other.type_name()
                        ))),
                    },
                    UnOp::Not => value
                        .as_condition()
                        .map(|b| Value::Logical(!b))
                        .ok_or_else(|| EvalError::message("invalid argument type to '!'")),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(env, *op, lhs, rhs),
            ExprKind::Block(body) => {
                let mut last = Value::Null;
                self.visible = true;
                for stmt in body {
                    self.host.statement(&stmt.pos, self.depth)?;
                    self.visible = true;
                    last = self.eval(env, stmt)?;
                }
                Ok(last)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.eval_condition(env, cond)?;
                if cond {
                    self.visible = true;
                    self.eval(env, then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.visible = true;
                    self.eval(env, else_branch)
                } else {
                    self.visible = false;
                    Ok(Value::Null)
                }
            }
            ExprKind::While { cond, body } => {
                loop {
                    // The loop head is a checkpoint even when the body is
                    // empty, so `while (TRUE) {}` stays interruptible.
                    self.host.statement(&expr.pos, self.depth)?;
                    if !self.eval_condition(env, cond)? {
                        break;
                    }
                    self.eval(env, body)?;
                }
                self.visible = false;
                Ok(Value::Null)
            }
            ExprKind::Function { params, body } => {
                self.visible = true;
                Ok(Value::Function(Rc::new(Function {
                    params: params.clone(),
                    body: (**body).clone(),
                    env: env.clone(),
                })))
            }
            ExprKind::Call { callee, args } => self.eval_call(env, expr, callee, args),
        }
    }

    fn eval_condition(&mut self, env: &Env, cond: &Expr) -> Result<bool, EvalError> {
        self.eval(env, cond)?
            .as_condition()
            .ok_or_else(|| EvalError::message("argument is not interpretable as logical"))
    }

    fn eval_binary(&mut self, env: &Env, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Value, EvalError> {
        // `&&` and `||` short-circuit; everything else is strict.
        if matches!(op, BinOp::And | BinOp::Or) {
            let lhs = self.eval_condition(env, lhs)?;
            let result = match (op, lhs) {
                (BinOp::And, false) => false,
                (BinOp::Or, true) => true,
                _ => self.eval_condition(env, rhs)?,
            };
            self.visible = true;
            return Ok(Value::Logical(result));
        }

        let lhs = self.eval(env, lhs)?;
        let rhs = self.eval(env, rhs)?;
        self.visible = true;
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
                    return Err(EvalError::message("non-numeric argument to binary operator"));
                };
                let n = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    _ => a / b,
                };
                Ok(Value::Number(n))
            }
            BinOp::Eq => Ok(Value::Logical(lhs == rhs)),
            BinOp::Ne => Ok(Value::Logical(lhs != rhs)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (&lhs, &rhs) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                let Some(ordering) = ordering else {
                    return Err(EvalError::message(format!(
                        "comparison ({}) is possible only for numeric or character types",
                        op.symbol()
                    )));
                };
                let result = match op {
                    BinOp::Lt => ordering == std::cmp::Ordering::Less,
                    BinOp::Le => ordering != std::cmp::Ordering::Greater,
                    BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                    _ => ordering != std::cmp::Ordering::Less,
                };
                Ok(Value::Logical(result))
            }
            BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled above"),
        }
    }

    fn eval_call(&mut self, env: &Env, call: &Expr, callee: &Expr, args: &[Expr]) -> Result<Value, EvalError> {
        // `library(utils)` takes the package name as a bare symbol.
        if let ExprKind::Ident(name) = &callee.kind {
            if name == "library" && env.get(name).is_none() {
                return self.builtin_library(args);
            }
        }

        let function = match &callee.kind {
            ExprKind::Ident(name) => match env.get(name) {
                Some(Value::Function(f)) => Some((name.clone(), f)),
                Some(other) => {
                    return Err(EvalError::message(format!(
                        "attempt to apply non-function ({})",
                        other.type_name()
                    )));
                }
                None => None,
            },
            _ => match self.eval(env, callee)? {
                Value::Function(f) => Some(("<anonymous>".to_owned(), f)),
                other => {
                    return Err(EvalError::message(format!(
                        "attempt to apply non-function ({})",
                        other.type_name()
                    )));
                }
            },
        };

        if let Some((name, function)) = function {
            return self.call_function(&name, &function, env, call, args);
        }

        // Unbound symbol: try the builtin table.
        let ExprKind::Ident(name) = &callee.kind else {
            unreachable!("non-ident callees resolved above");
        };
        self.call_builtin(env, name, call, args)
            .ok_or_else(|| EvalError::message(format!("could not find function \"{name}\"")))?
    }

    fn call_function(
        &mut self,
        name: &str,
        function: &Rc<Function>,
        env: &Env,
        call: &Expr,
        args: &[Expr],
    ) -> Result<Value, EvalError> {
        if args.len() > function.params.len() {
            return Err(EvalError::message(format!("unused argument in call to \"{name}\"")));
        }
        if args.len() < function.params.len() {
            let missing = &function.params[args.len()];
            return Err(EvalError::message(format!(
                "argument \"{missing}\" is missing, with no default"
            )));
        }
        if self.depth >= self.max_depth {
            return Err(EvalError::message("evaluation nested too deeply: infinite recursion?"));
        }

        let mut bound = Vec::with_capacity(args.len());
        for arg in args {
            bound.push(self.eval(env, arg)?);
        }
        let frame = Env::child(&function.env);
        for (param, value) in function.params.iter().zip(bound) {
            frame.set(param.clone(), value);
        }

        self.host.enter_call(name, &call.pos);
        self.depth += 1;
        let result = self.eval(&frame, &function.body);
        self.depth -= 1;
        self.host.exit_call();
        self.visible = true;
        result
    }

    /// Dispatches a builtin by name. `None` means "no such builtin", which
    /// the caller turns into a could-not-find-function fault.
    fn call_builtin(
        &mut self,
        env: &Env,
        name: &str,
        call: &Expr,
        args: &[Expr],
    ) -> Option<Result<Value, EvalError>> {
        match name {
            "print" => Some(self.builtin_print(env, args)),
            "cat" => Some(self.builtin_cat(env, args)),
            "readline" => Some(self.builtin_readline(env, args)),
            "invisible" => Some(self.builtin_invisible(env, args)),
            "paste" => Some(self.builtin_paste(env, args)),
            "nchar" => Some(self.builtin_nchar(env, args)),
            "stop" => Some(self.builtin_stop(env, args)),
            "system" => Some(self.builtin_system(env, args)),
            "Sys.sleep" => Some(self.builtin_sleep(env, call, args)),
            _ => None,
        }
    }

    fn eval_args(&mut self, env: &Env, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|arg| self.eval(env, arg)).collect()
    }

    fn builtin_print(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let [arg] = args else {
            return Err(EvalError::message("print() expects exactly one argument"));
        };
        let value = self.eval(env, arg)?;
        let text = format!("{}\n", value.echo_repr());
        self.host.write(OutputKind::Stdout, &text);
        self.visible = false;
        Ok(value)
    }

    fn builtin_cat(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let values = self.eval_args(env, args)?;
        let text = values.iter().map(Value::cat_repr).collect::<Vec<_>>().join(" ");
        self.host.write(OutputKind::Stdout, &text);
        self.visible = false;
        Ok(Value::Null)
    }

    fn builtin_readline(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let prompt = match args {
            [] => String::new(),
            [arg] => match self.eval(env, arg)? {
                Value::Str(s) => s,
                other => other.cat_repr(),
            },
            _ => return Err(EvalError::message("readline() expects at most one argument")),
        };
        let line = self.host.read_line(&prompt)?;
        self.visible = true;
        Ok(Value::Str(line))
    }

    fn builtin_invisible(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let value = match args {
            [] => Value::Null,
            [arg] => self.eval(env, arg)?,
            _ => return Err(EvalError::message("invisible() expects at most one argument")),
        };
        self.visible = false;
        Ok(value)
    }

    fn builtin_paste(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let values = self.eval_args(env, args)?;
        let text = values.iter().map(Value::cat_repr).collect::<Vec<_>>().join(" ");
        self.visible = true;
        Ok(Value::Str(text))
    }

    fn builtin_nchar(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let [arg] = args else {
            return Err(EvalError::message("nchar() expects exactly one argument"));
        };
        let value = self.eval(env, arg)?;
        let len = match value {
            Value::Str(s) => s.chars().count(),
            other => other.cat_repr().chars().count(),
        };
        self.visible = true;
        Ok(Value::Number(len as f64))
    }

    fn builtin_stop(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let message = match args {
            [] => String::new(),
            [arg] => match self.eval(env, arg)? {
                Value::Str(s) => s,
                other => other.cat_repr(),
            },
            _ => return Err(EvalError::message("stop() expects at most one argument")),
        };
        Err(EvalError::message(message))
    }

    fn builtin_library(&mut self, args: &[Expr]) -> Result<Value, EvalError> {
        let name = match args {
            [arg] => match &arg.kind {
                ExprKind::Ident(name) => name.clone(),
                ExprKind::Str(name) => name.clone(),
                _ => return Err(EvalError::message("library() expects a package name")),
            },
            _ => return Err(EvalError::message("library() expects exactly one argument")),
        };
        if BASE_PACKAGES.contains(&name.as_str()) {
            self.visible = false;
            Ok(Value::Null)
        } else {
            Err(EvalError::Error(ErrorInfo {
                message: format!("there is no package called '{name}'"),
                package_not_found: Some(name),
            }))
        }
    }

    fn builtin_system(&mut self, env: &Env, args: &[Expr]) -> Result<Value, EvalError> {
        let (command, feed_input) = match args {
            [cmd] => (self.eval(env, cmd)?, false),
            [cmd, feed] => {
                let command = self.eval(env, cmd)?;
                let feed = self
                    .eval(env, feed)?
                    .as_condition()
                    .ok_or_else(|| EvalError::message("system(): 'input' must be logical"))?;
                (command, feed)
            }
            _ => return Err(EvalError::message("system() expects one or two arguments")),
        };
        let Value::Str(command) = command else {
            return Err(EvalError::message("system(): 'command' must be a string"));
        };
        let status = self.host.run_system(&command, feed_input)?;
        self.visible = false;
        Ok(Value::Number(status))
    }

    fn builtin_sleep(&mut self, env: &Env, call: &Expr, args: &[Expr]) -> Result<Value, EvalError> {
        let [arg] = args else {
            return Err(EvalError::message("Sys.sleep() expects exactly one argument"));
        };
        let Value::Number(seconds) = self.eval(env, arg)? else {
            return Err(EvalError::message("Sys.sleep(): 'time' must be numeric"));
        };
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs_f64(seconds.max(0.0));
        // Sleep in short slices so the statement checkpoint keeps the sleep
        // interruptible, as R's Sys.sleep is.
        while std::time::Instant::now() < deadline {
            self.host.statement(&call.pos, self.depth)?;
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        self.visible = false;
        Ok(Value::Null)
    }
}
