#![doc = include_str!("../../../README.md")]

mod debugger;
mod env;
mod events;
mod executor;
mod handles;
mod interp;
mod output;
mod parse;
mod session;
mod state;
mod value;

pub use crate::{
    debugger::{DebugCommand, Debugger},
    env::Env,
    events::{AsyncEvent, EventQueue, ExceptionCause, StackFrame},
    executor::{CancellationToken, ExecError, Executor, LoopSender, LoopValue, TurnCtx, Work},
    handles::{Handle, HandleStore, StaleHandleError},
    interp::{DEFAULT_MAX_DEPTH, ErrorInfo, EvalError, Evaluator, Host, ScriptedHost},
    output::{BASE_HANDLER_ID, HandlerId, OutputHandler, OutputKind, OutputRouter},
    parse::{BinOp, Expr, ExprKind, ParseError, SourcePosition, UnOp, parse_program},
    session::{
        Session, SessionBuilder, SessionError, TurnOutput, TurnRequest, VariableInfo,
    },
    state::{ReplState, StateCell, StateGuard},
    value::{Function, Value, format_number},
};
