//! Conditional select.

use duet_ir::CondCode;

use crate::{
    error::EngineResult,
    expr::{cmp, collapse, same_width, Expr, Pred},
    solver::SmtSolver,
};

/// `movcond`: compare `(c1, c2)` under `cond` and select `v1` or `v2`.
///
/// A concrete (or probe-collapsed) condition selects directly, preserving
/// the chosen operand's mode; otherwise the result is a symbolic `ite`,
/// probed like every other operation.
pub fn movcond(
    solver: &SmtSolver,
    cond: CondCode,
    c1: &Expr,
    c2: &Expr,
    v1: &Expr,
    v2: &Expr,
) -> EngineResult<Expr> {
    same_width(c1, c2)?;
    let width = same_width(v1, v2)?;

    match cmp::compare(solver, cond, c1, c2)? {
        Pred::Concrete(true) => Ok(v1.clone()),
        Pred::Concrete(false) => Ok(v2.clone()),
        Pred::Symbolic(pred) => {
            let term = solver.bv_ite(&pred, &v1.to_term(solver), &v2.to_term(solver));
            collapse(solver, width, term)
        }
    }
}
