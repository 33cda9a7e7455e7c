//! Comparison operations, producing dual-mode predicates.

use duet_ir::CondCode;

use crate::{
    error::EngineResult,
    expr::{self, collapse_pred, same_width, Expr, Pred},
    solver::{BoolTerm, SmtSolver, Term},
};

pub(crate) fn cmp_op(
    solver: &SmtSolver,
    lhs: &Expr,
    rhs: &Expr,
    concrete32: fn(i32, i32) -> bool,
    concrete64: fn(i64, i64) -> bool,
    symbolic: fn(&SmtSolver, &Term, &Term) -> BoolTerm,
) -> EngineResult<Pred> {
    same_width(lhs, rhs)?;
    match (lhs, rhs) {
        (Expr::C32(a), Expr::C32(b)) => Ok(Pred::Concrete(concrete32(*a, *b))),
        (Expr::C64(a), Expr::C64(b)) => Ok(Pred::Concrete(concrete64(*a, *b))),
        _ => {
            let term = symbolic(solver, &lhs.to_term(solver), &rhs.to_term(solver));
            collapse_pred(solver, term)
        }
    }
}

macro_rules! define_cmp_op {
    ($(#[$doc:meta])* $name:ident, $c32:expr, $c64:expr, $sym:ident) => {
        $(#[$doc])*
        pub fn $name(solver: &SmtSolver, lhs: &Expr, rhs: &Expr) -> EngineResult<Pred> {
            cmp_op(solver, lhs, rhs, $c32, $c64, SmtSolver::$sym)
        }
    };
}

define_cmp_op!(
    /// Equality.
    eq,
    |a, b| a == b,
    |a, b| a == b,
    bv_eq
);
define_cmp_op!(
    /// Inequality.
    ne,
    |a, b| a != b,
    |a, b| a != b,
    bv_ne
);
define_cmp_op!(
    /// Signed less-than.
    slt,
    |a, b| a < b,
    |a, b| a < b,
    bv_slt
);
define_cmp_op!(
    /// Signed less-or-equal.
    sle,
    |a, b| a <= b,
    |a, b| a <= b,
    bv_sle
);
define_cmp_op!(
    /// Signed greater-or-equal.
    sge,
    |a, b| a >= b,
    |a, b| a >= b,
    bv_sge
);
define_cmp_op!(
    /// Signed greater-than.
    sgt,
    |a, b| a > b,
    |a, b| a > b,
    bv_sgt
);
define_cmp_op!(
    /// Unsigned less-than.
    ult,
    |a, b| (a as u32) < (b as u32),
    |a, b| (a as u64) < (b as u64),
    bv_ult
);
define_cmp_op!(
    /// Unsigned less-or-equal.
    ule,
    |a, b| (a as u32) <= (b as u32),
    |a, b| (a as u64) <= (b as u64),
    bv_ule
);
define_cmp_op!(
    /// Unsigned greater-or-equal.
    uge,
    |a, b| (a as u32) >= (b as u32),
    |a, b| (a as u64) >= (b as u64),
    bv_uge
);
define_cmp_op!(
    /// Unsigned greater-than.
    ugt,
    |a, b| (a as u32) > (b as u32),
    |a, b| (a as u64) > (b as u64),
    bv_ugt
);

/// Evaluate a condition code over two operands.
///
/// This is the single source of truth for `setcond`, `movcond` and `brcond`:
/// the test conditions and-then-compare against zero, and `Never`/`Always`
/// never touch the solver.
pub fn compare(
    solver: &SmtSolver,
    cond: CondCode,
    lhs: &Expr,
    rhs: &Expr,
) -> EngineResult<Pred> {
    match cond {
        CondCode::Never => Ok(Pred::Concrete(false)),
        CondCode::Always => Ok(Pred::Concrete(true)),
        CondCode::Eq => eq(solver, lhs, rhs),
        CondCode::Ne => ne(solver, lhs, rhs),
        CondCode::Lt => slt(solver, lhs, rhs),
        CondCode::Le => sle(solver, lhs, rhs),
        CondCode::Ge => sge(solver, lhs, rhs),
        CondCode::Gt => sgt(solver, lhs, rhs),
        CondCode::Ltu => ult(solver, lhs, rhs),
        CondCode::Leu => ule(solver, lhs, rhs),
        CondCode::Geu => uge(solver, lhs, rhs),
        CondCode::Gtu => ugt(solver, lhs, rhs),
        CondCode::TstEq => {
            let masked = expr::and(solver, lhs, rhs)?;
            eq(solver, &masked, &Expr::concrete(lhs.width(), 0))
        }
        CondCode::TstNe => {
            let masked = expr::and(solver, lhs, rhs)?;
            ne(solver, &masked, &Expr::concrete(lhs.width(), 0))
        }
    }
}
