//! Return-path completeness
//!
//! A `return(...)` always returns. An `if` always returns when both of its
//! branches do, and any other control-flow builtin carrying a block always
//! returns when some statement of that block does.

use crate::parser::{Expr, ExprKind};

/// Builtins whose block argument is inspected by the analysis
const BLOCK_BUILTINS: &[&str] = &["block", "repeat"];

/// A call with a block, no arguments and no labels: `then(){...}`
pub fn is_block_envelope(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call(call) => {
            !call.is_binding
                && !call.is_method_call
                && call.args.is_empty()
                && call.template_args.is_empty()
                && !call.has_named_args()
                && call.body.is_some()
        }
        _ => false,
    }
}

fn branch_always_returns(branch: &Expr) -> bool {
    if is_block_envelope(branch) {
        if let ExprKind::Call(call) = &branch.kind {
            return block_always_returns(call.body.as_deref().unwrap_or(&[]));
        }
    }
    statement_always_returns(branch)
}

/// Whether executing `stmt` is guaranteed to leave the enclosing definition
pub fn statement_always_returns(stmt: &Expr) -> bool {
    let ExprKind::Call(call) = &stmt.kind else {
        return false;
    };
    if call.is_binding || call.is_method_call {
        return false;
    }
    if call.name == "return" {
        return true;
    }
    if call.name == "if" && call.args.len() == 3 {
        return branch_always_returns(&call.args[1]) && branch_always_returns(&call.args[2]);
    }
    if BLOCK_BUILTINS.contains(&call.name.as_str()) {
        if let Some(body) = &call.body {
            return block_always_returns(body);
        }
    }
    false
}

/// Whether some statement of `stmts` always returns
pub fn block_always_returns(stmts: &[Expr]) -> bool {
    stmts.iter().any(statement_always_returns)
}

fn visit_returns(expr: &Expr, with_value_only: bool) -> bool {
    let ExprKind::Call(call) = &expr.kind else {
        return false;
    };
    if !call.is_binding && !call.is_method_call && call.name == "return" {
        if !with_value_only || !call.args.is_empty() {
            return true;
        }
    }
    call.args.iter().any(|arg| visit_returns(arg, with_value_only))
        || call
            .body
            .as_ref()
            .is_some_and(|body| body.iter().any(|s| visit_returns(s, with_value_only)))
}

/// Whether any `return`, however nested, appears in `stmts`
pub fn contains_return(stmts: &[Expr]) -> bool {
    stmts.iter().any(|s| visit_returns(s, false))
}

/// Whether any `return(value)`, however nested, appears in `stmts`
pub fn contains_value_return(stmts: &[Expr]) -> bool {
    stmts.iter().any(|s| visit_returns(s, true))
}
