//! Evaluator behavior against a scripted host: arithmetic, visibility,
//! builtins, closures, and fault conditions.

use pretty_assertions::assert_eq;
use rill::{Env, EvalError, Evaluator, ScriptedHost, Value, parse_program};

/// Evaluates a program and returns the last expression's value and
/// visibility, plus the host that collected its output.
fn eval_last(code: &str) -> ((Value, bool), ScriptedHost) {
    eval_last_with(code, ScriptedHost::new())
}

fn eval_last_with(code: &str, mut host: ScriptedHost) -> ((Value, bool), ScriptedHost) {
    let env = Env::global();
    let exprs = parse_program(code, "<test>", 0).expect("program should parse");
    let mut last = (Value::Null, false);
    for expr in &exprs {
        last = Evaluator::new(&mut host)
            .eval_top(&env, expr)
            .expect("program should evaluate");
    }
    (last, host)
}

/// Evaluates a program and returns the fault that ends it.
fn eval_err(code: &str) -> EvalError {
    let mut host = ScriptedHost::new();
    let env = Env::global();
    let exprs = parse_program(code, "<test>", 0).expect("program should parse");
    for expr in &exprs {
        if let Err(err) = Evaluator::new(&mut host).eval_top(&env, expr) {
            return err;
        }
    }
    panic!("program should fault: {code}");
}

// =============================================================================
// Arithmetic and operators
// =============================================================================

/// Multiplication binds tighter than addition.
#[test]
fn arithmetic_precedence() {
    let ((value, visible), _) = eval_last("1 + 2 * 3");
    assert_eq!(value, Value::Number(7.0));
    assert!(visible, "a bare expression is visible");
}

/// Comparison yields a logical scalar.
#[test]
fn comparison_yields_logical() {
    let ((value, _), _) = eval_last("2 <= 3");
    assert_eq!(value, Value::Logical(true));
}

/// Unary minus applies to numbers.
#[test]
fn unary_minus() {
    let ((value, _), _) = eval_last("-(1 + 2)");
    assert_eq!(value, Value::Number(-3.0));
}

/// `||` short-circuits: the right side never runs.
#[test]
fn or_short_circuits() {
    let ((value, _), _) = eval_last("TRUE || stop(\"never reached\")");
    assert_eq!(value, Value::Logical(true));
}

/// `&&` short-circuits on a false left side.
#[test]
fn and_short_circuits() {
    let ((value, _), _) = eval_last("FALSE && stop(\"never reached\")");
    assert_eq!(value, Value::Logical(false));
}

/// Adding a string is a type fault.
#[test]
fn adding_string_faults() {
    let err = eval_err("1 + \"two\"");
    assert_eq!(err.to_string(), "Error: non-numeric argument to binary operator");
}

// =============================================================================
// Assignment and visibility
// =============================================================================

/// Assignment binds the name and is invisible; the name then resolves.
#[test]
fn assignment_is_invisible() {
    let ((value, visible), _) = eval_last("x <- 42\nx");
    assert_eq!(value, Value::Number(42.0));
    assert!(visible);

    let mut host = ScriptedHost::new();
    let env = Env::global();
    let exprs = parse_program("x <- 42", "<test>", 0).expect("parse");
    let (_, visible) = Evaluator::new(&mut host)
        .eval_top(&env, &exprs[0])
        .expect("eval");
    assert!(!visible, "an assignment must not echo");
}

/// An unknown name is a fault naming the object.
#[test]
fn missing_object_faults() {
    let err = eval_err("no_such_thing");
    assert_eq!(err.to_string(), "Error: object 'no_such_thing' not found");
}

/// `invisible()` suppresses the echo of its argument.
#[test]
fn invisible_suppresses_echo() {
    let ((value, visible), _) = eval_last("invisible(7)");
    assert_eq!(value, Value::Number(7.0));
    assert!(!visible);
}

// =============================================================================
// Control flow
// =============================================================================

/// `if`/`else` picks a branch; the chosen branch's value is the result.
#[test]
fn if_else_branches() {
    let ((value, _), _) = eval_last("if (1 < 2) \"yes\" else \"no\"");
    assert_eq!(value, Value::Str("yes".to_owned()));
}

/// A `while` loop runs until its condition turns false.
#[test]
fn while_loop_accumulates() {
    let ((value, _), _) = eval_last("i <- 0\ntotal <- 0\nwhile (i < 5) {\n  i <- i + 1\n  total <- total + i\n}\ntotal");
    assert_eq!(value, Value::Number(15.0));
}

/// A NULL condition is a fault, not silently false.
#[test]
fn null_condition_faults() {
    let err = eval_err("if (NULL) 1");
    assert_eq!(err.to_string(), "Error: argument is not interpretable as logical");
}

// =============================================================================
// Functions
// =============================================================================

/// Calls bind positional arguments and return the body's value.
#[test]
fn function_call_returns_body_value() {
    let ((value, _), _) = eval_last("add <- function(a, b) a + b\nadd(2, 3)");
    assert_eq!(value, Value::Number(5.0));
}

/// Closures see the environment they were defined in.
#[test]
fn closures_capture_environment() {
    let ((value, _), _) = eval_last("y <- 10\naddy <- function(x) x + y\naddy(5)");
    assert_eq!(value, Value::Number(15.0));
}

/// Recursion works through the global binding.
#[test]
fn recursion() {
    let code = "fib <- function(n) if (n < 2) n else fib(n - 1) + fib(n - 2)\nfib(10)";
    let ((value, _), _) = eval_last(code);
    assert_eq!(value, Value::Number(55.0));
}

/// Unbounded recursion hits the depth guard instead of overflowing.
#[test]
fn runaway_recursion_faults() {
    let err = eval_err("f <- function() f()\nf()");
    assert_eq!(
        err.to_string(),
        "Error: evaluation nested too deeply: infinite recursion?"
    );
}

/// Too few arguments names the missing parameter.
#[test]
fn missing_argument_faults() {
    let err = eval_err("f <- function(a, b) a\nf(1)");
    assert_eq!(err.to_string(), "Error: argument \"b\" is missing, with no default");
}

/// Calling a non-function reports its type.
#[test]
fn calling_a_number_faults() {
    let err = eval_err("x <- 3\nx(1)");
    assert!(
        err.to_string().contains("attempt to apply non-function"),
        "got: {err}"
    );
}

// =============================================================================
// Builtins
// =============================================================================

/// `print` writes the echo form to stdout and returns invisibly.
#[test]
fn print_writes_echo_form() {
    let ((value, visible), host) = eval_last("print(2 + 2)");
    assert_eq!(host.stdout, "[1] 4\n");
    assert_eq!(value, Value::Number(4.0));
    assert!(!visible);
}

/// `cat` writes bare text with no trailing newline.
#[test]
fn cat_writes_bare_text() {
    let ((_, visible), host) = eval_last("cat(\"a\", 1, TRUE)");
    assert_eq!(host.stdout, "a 1 TRUE");
    assert!(!visible);
}

/// `readline` consumes the host's scripted lines.
#[test]
fn readline_consumes_scripted_lines() {
    let host = ScriptedHost::with_lines(["Ada"]);
    let ((value, _), _) = eval_last_with("readline(\"name: \")", host);
    assert_eq!(value, Value::Str("Ada".to_owned()));
}

/// `paste` joins rendered values with spaces.
#[test]
fn paste_joins_values() {
    let ((value, _), _) = eval_last("paste(\"x =\", 42)");
    assert_eq!(value, Value::Str("x = 42".to_owned()));
}

/// `nchar` counts characters, not bytes.
#[test]
fn nchar_counts_characters() {
    let ((value, _), _) = eval_last("nchar(\"héllo\")");
    assert_eq!(value, Value::Number(5.0));
}

/// `stop` faults with exactly the given message.
#[test]
fn stop_raises_message() {
    let err = eval_err("stop(\"boom\")");
    assert_eq!(err.to_string(), "Error: boom");
}

/// Loading a base package succeeds quietly.
#[test]
fn library_base_package() {
    let ((value, visible), _) = eval_last("library(stats)");
    assert_eq!(value, Value::Null);
    assert!(!visible);
}

/// Loading an unknown package carries the package name in the fault.
#[test]
fn library_missing_package() {
    let err = eval_err("library(ggplot2)");
    let EvalError::Error(info) = err else {
        panic!("expected an error fault");
    };
    assert_eq!(info.message, "there is no package called 'ggplot2'");
    assert_eq!(info.package_not_found.as_deref(), Some("ggplot2"));
}

/// The scripted host has no child processes.
#[test]
fn system_unavailable_in_scripted_host() {
    let err = eval_err("system(\"echo hi\")");
    assert_eq!(err.to_string(), "Error: system() is not available in this host");
}

/// Number rendering: whole values drop the point, others keep 7
/// significant digits.
#[test]
fn number_rendering() {
    let ((value, _), _) = eval_last("10 / 4");
    assert_eq!(value.echo_repr(), "[1] 2.5");
    let ((value, _), _) = eval_last("10 / 5");
    assert_eq!(value.echo_repr(), "[1] 2");
    let ((value, _), _) = eval_last("1 / 3");
    assert_eq!(value.echo_repr(), "[1] 0.3333333");
}
