//! Unary operations of the expression algebra.

use crate::{
    error::EngineResult,
    expr::{collapse, Expr},
    solver::{SmtSolver, Term},
};

fn un_op(
    solver: &SmtSolver,
    val: &Expr,
    concrete32: fn(i32) -> i32,
    concrete64: fn(i64) -> i64,
    symbolic: fn(&SmtSolver, &Term) -> Term,
) -> EngineResult<Expr> {
    match val {
        Expr::C32(v) => Ok(Expr::C32(concrete32(*v))),
        Expr::C64(v) => Ok(Expr::C64(concrete64(*v))),
        _ => {
            let term = symbolic(solver, &val.to_term(solver));
            collapse(solver, val.width(), term)
        }
    }
}

/// Two's-complement negation.
pub fn neg(solver: &SmtSolver, val: &Expr) -> EngineResult<Expr> {
    un_op(
        solver,
        val,
        i32::wrapping_neg,
        i64::wrapping_neg,
        SmtSolver::bv_neg,
    )
}

/// Bitwise complement.
pub fn not(solver: &SmtSolver, val: &Expr) -> EngineResult<Expr> {
    un_op(solver, val, |v| !v, |v| !v, SmtSolver::bv_not)
}
