//! Runtime values and R-style rendering.
//!
//! Values are deliberately not `Send`: functions capture their defining
//! environment through `Rc`, which pins every value to the executor thread.
//! Results that cross threads are rendered to strings first.

use std::{fmt, rc::Rc};

use crate::{env::Env, parse::Expr};

/// A user-defined function: parameter names, body, and the defining
/// environment (lexical scoping).
#[derive(Debug)]
pub struct Function {
    pub params: Vec<String>,
    pub body: Expr,
    pub env: Env,
}

/// A rill runtime value. All scalars, in the R sense of length-one vectors.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Logical(bool),
    Number(f64),
    Str(String),
    Function(Rc<Function>),
}

impl Value {
    /// The R class-like name used in error messages and variable listings.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Logical(_) => "logical",
            Self::Number(_) => "numeric",
            Self::Str(_) => "character",
            Self::Function(_) => "function",
        }
    }

    /// Truthiness for `if`/`while` conditions. `NULL` and non-scalar uses are
    /// errors at the call site, so this only answers for logicals and numbers.
    pub fn as_condition(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Renders the value the way the R console echoes it: scalars prefixed
    /// with their index (`[1] 2`), strings quoted, `NULL` bare.
    pub fn echo_repr(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Function(f) => {
                let params = f.params.join(", ");
                format!("function({params})")
            }
            other => format!("[1] {other}"),
        }
    }

    /// Renders the value as `cat` would: bare text, no index prefix, no
    /// string quoting.
    pub fn cat_repr(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Logical(b) => logical_text(*b).to_owned(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.clone(),
            Self::Function(_) => self.echo_repr(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Logical(b) => write!(f, "{}", logical_text(*b)),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Function(func) => write!(f, "function({})", func.params.join(", ")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Logical(a), Self::Logical(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn logical_text(b: bool) -> &'static str {
    if b { "TRUE" } else { "FALSE" }
}

/// Formats a number with R's default 7 significant digits, dropping the
/// decimal point for whole values (`2`, not `2.0`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Inf" } else { "-Inf" }.to_owned();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        return format!("{n:.0}");
    }
    let mut text = format!("{n:.6e}");
    // Round-trip through scientific notation to get 7 significant digits,
    // then strip trailing zeros for compact display.
    if let Ok(rounded) = text.parse::<f64>() {
        text = format!("{rounded}");
    }
    text
}
