//! Parser coverage: statement splitting, precedence, positions, and the
//! faults a malformed turn reports before anything evaluates.

use pretty_assertions::assert_eq;
use rill::{BinOp, Expr, ExprKind, parse_program};

fn parse(code: &str) -> Vec<Expr> {
    parse_program(code, "<test>", 0).expect("program should parse")
}

fn parse_one(code: &str) -> Expr {
    let mut exprs = parse(code);
    assert_eq!(exprs.len(), 1, "expected exactly one expression");
    exprs.remove(0)
}

// =============================================================================
// Statements and lines
// =============================================================================

/// Newlines split top-level statements; semicolons do too.
#[test]
fn newlines_and_semicolons_split_statements() {
    assert_eq!(parse("1\n2\n3").len(), 3);
    assert_eq!(parse("1; 2; 3").len(), 3);
}

/// Inside parentheses a newline is just whitespace.
#[test]
fn newline_inside_parens_continues_expression() {
    let expr = parse_one("(1 +\n 2)");
    assert!(matches!(expr.kind, ExprKind::Binary { op: BinOp::Add, .. }));
}

/// Comments run to end of line and produce nothing.
#[test]
fn comments_are_ignored() {
    let exprs = parse("# leading comment\nx <- 1 # trailing\n# only comments follow");
    assert_eq!(exprs.len(), 1);
}

/// Positions are 1-based and shifted by the caller's line offset.
#[test]
fn positions_carry_line_offset() {
    let exprs = parse_program("a\nb", "chunk-7", 10).expect("parse");
    assert_eq!(exprs[0].pos.line, 11);
    assert_eq!(exprs[1].pos.line, 12);
    assert_eq!(exprs[0].pos.file_id, "chunk-7");
}

// =============================================================================
// Precedence and operators
// =============================================================================

/// `*` binds tighter than `+`.
#[test]
fn multiplication_binds_tighter() {
    let expr = parse_one("1 + 2 * 3");
    let ExprKind::Binary { op, rhs, .. } = expr.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinOp::Add);
    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
}

/// `<-` is assignment, `<=` and `<` are comparisons; the lexer keeps them
/// apart.
#[test]
fn arrow_versus_comparison() {
    assert!(matches!(parse_one("x <- 1").kind, ExprKind::Assign { .. }));
    assert!(matches!(
        parse_one("x <= 1").kind,
        ExprKind::Binary { op: BinOp::Le, .. }
    ));
    assert!(matches!(
        parse_one("x < -1").kind,
        ExprKind::Binary { op: BinOp::Lt, .. }
    ));
}

/// Assignment is right-associative.
#[test]
fn assignment_chains_to_the_right() {
    let expr = parse_one("a <- b <- 1");
    let ExprKind::Assign { target, value } = expr.kind else {
        panic!("expected an assignment");
    };
    assert_eq!(target, "a");
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

/// Only a plain name can be assigned to.
#[test]
fn assignment_to_call_is_an_error() {
    let err = parse_program("f(x) <- 1", "<test>", 0).expect_err("should not parse");
    assert!(
        err.to_string().contains("invalid assignment target"),
        "got: {err}"
    );
}

// =============================================================================
// Literals and names
// =============================================================================

/// Dots are ordinary identifier characters, as in `Sys.sleep`.
#[test]
fn dotted_identifiers() {
    let expr = parse_one("Sys.sleep(1)");
    let ExprKind::Call { callee, .. } = expr.kind else {
        panic!("expected a call");
    };
    assert_eq!(callee.kind, ExprKind::Ident("Sys.sleep".to_owned()));
}

/// String escapes resolve in the lexer.
#[test]
fn string_escapes() {
    let expr = parse_one(r#""line\nbreak \"quoted\" tab\t""#);
    assert_eq!(
        expr.kind,
        ExprKind::Str("line\nbreak \"quoted\" tab\t".to_owned())
    );
}

/// `TRUE`, `FALSE`, and `NULL` are keywords, not names.
#[test]
fn literal_keywords() {
    assert_eq!(parse_one("TRUE").kind, ExprKind::Logical(true));
    assert_eq!(parse_one("FALSE").kind, ExprKind::Logical(false));
    assert_eq!(parse_one("NULL").kind, ExprKind::Null);
}

// =============================================================================
// Compound forms
// =============================================================================

/// `else` may follow the closing brace on the same statement.
#[test]
fn if_else_with_braces() {
    let expr = parse_one("if (x) {\n 1\n} else {\n 2\n}");
    let ExprKind::If { else_branch, .. } = expr.kind else {
        panic!("expected an if expression");
    };
    assert!(else_branch.is_some());
}

/// A function literal records its parameters in order.
#[test]
fn function_literal_params() {
    let expr = parse_one("function(a, b, c) a");
    let ExprKind::Function { params, .. } = expr.kind else {
        panic!("expected a function literal");
    };
    assert_eq!(params, vec!["a", "b", "c"]);
}

/// A while loop wraps its braced body in a block.
#[test]
fn while_with_block_body() {
    let expr = parse_one("while (i < 3) {\n i <- i + 1\n}");
    let ExprKind::While { body, .. } = expr.kind else {
        panic!("expected a while loop");
    };
    assert!(matches!(body.kind, ExprKind::Block(_)));
}

// =============================================================================
// Faults
// =============================================================================

/// An unterminated string reports a parse error with its position.
#[test]
fn unterminated_string_faults() {
    let err = parse_program("x <- \"oops", "<test>", 0).expect_err("should not parse");
    assert!(err.to_string().starts_with("parse error at <test>:1"), "got: {err}");
}

/// A dangling operator faults instead of producing a partial tree.
#[test]
fn dangling_operator_faults() {
    assert!(parse_program("1 +", "<test>", 0).is_err());
}

/// An unclosed call faults.
#[test]
fn unclosed_call_faults() {
    assert!(parse_program("f(1, 2", "<test>", 0).is_err());
}
