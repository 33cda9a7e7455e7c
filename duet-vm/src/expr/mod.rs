//! Dual-mode expression algebra.
//!
//! An [`Expr`] is either a concrete 32/64-bit integer or a symbolic term of
//! matching width; a [`Pred`] is its boolean counterpart. Every operation
//! follows the same discipline: assert operand widths, take the concrete
//! fast path when possible (with the signedness the operation demands),
//! otherwise lift constants into solver terms and build the symbolic result,
//! then probe it: a term the constraints force to a single model collapses
//! back to concrete on the spot.

use duet_ir::Width;

use crate::{
    error::{EngineError, EngineResult},
    solver::{BoolTerm, SmtSolver, Term},
};

mod binop;
mod cmp;
mod ldst;
mod mov;
mod unop;
mod wide;

pub use binop::{add, and, andc, div, eqv, mul, nand, nor, or, orc, sar, shl, shr, sub, xor};
pub use cmp::{compare, eq, ne, sge, sgt, sle, slt, uge, ugt, ule, ult};
pub use ldst::{ld_part, st_part};
pub use mov::movcond;
pub use unop::{neg, not};
pub use wide::{add2, muls2, sub2};

/// A dual-mode value: concrete integer or symbolic term of a declared width.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Concrete 32-bit value.
    C32(i32),
    /// Concrete 64-bit value.
    C64(i64),
    /// Symbolic 32-bit term.
    S32(Term),
    /// Symbolic 64-bit term.
    S64(Term),
}

impl Expr {
    /// Build a concrete expression of the given width; the payload is
    /// truncated to fit.
    pub fn concrete(width: Width, value: i64) -> Expr {
        match width {
            Width::W32 => Expr::C32(value as i32),
            Width::W64 => Expr::C64(value),
        }
    }

    /// Wrap a symbolic term of the given width.
    pub fn symbolic(width: Width, term: Term) -> Expr {
        match width {
            Width::W32 => Expr::S32(term),
            Width::W64 => Expr::S64(term),
        }
    }

    /// Declared width.
    pub fn width(&self) -> Width {
        match self {
            Expr::C32(_) | Expr::S32(_) => Width::W32,
            Expr::C64(_) | Expr::S64(_) => Width::W64,
        }
    }

    /// Whether the expression is concrete.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Expr::C32(_) | Expr::C64(_))
    }

    /// Concrete payload, sign-extended to 64 bits.
    pub fn concrete_value(&self) -> Option<i64> {
        match self {
            Expr::C32(v) => Some(i64::from(*v)),
            Expr::C64(v) => Some(*v),
            _ => None,
        }
    }

    /// The symbolic term, lifting a concrete payload into a constant.
    pub fn to_term(&self, solver: &SmtSolver) -> Term {
        match self {
            Expr::C32(v) => solver.value(Width::W32, i64::from(*v)),
            Expr::C64(v) => solver.value(Width::W64, *v),
            Expr::S32(term) | Expr::S64(term) => term.clone(),
        }
    }

    /// Assert the declared width; mixing widths is a programmer error
    /// upstream and fatal here.
    pub fn expect_width(&self, width: Width) -> EngineResult<()> {
        if self.width() != width {
            return Err(EngineError::TypeMismatch {
                expected: width,
                got: self.width(),
            });
        }
        Ok(())
    }
}

/// A dual-mode predicate.
#[derive(Debug, Clone)]
pub enum Pred {
    /// Concrete boolean.
    Concrete(bool),
    /// Symbolic boolean term.
    Symbolic(BoolTerm),
}

impl Pred {
    /// Whether the predicate is concrete.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Pred::Concrete(_))
    }

    /// Concrete payload, if any.
    pub fn concrete_value(&self) -> Option<bool> {
        match self {
            Pred::Concrete(val) => Some(*val),
            Pred::Symbolic(_) => None,
        }
    }
}

/// Check that two operands share a width and return it.
pub(crate) fn same_width(lhs: &Expr, rhs: &Expr) -> EngineResult<Width> {
    rhs.expect_width(lhs.width())?;
    Ok(lhs.width())
}

/// Probe a freshly built symbolic term and collapse it if the constraint set
/// forces a unique value.
pub(crate) fn collapse(solver: &SmtSolver, width: Width, term: Term) -> EngineResult<Expr> {
    match width {
        Width::W32 => Ok(match solver.probe_bv32(&term)? {
            Some(raw) => Expr::C32(raw as i32),
            None => Expr::S32(term),
        }),
        Width::W64 => Ok(match solver.probe_bv64(&term)? {
            Some(raw) => Expr::C64(raw as i64),
            None => Expr::S64(term),
        }),
    }
}

/// Probe a freshly built symbolic predicate.
pub(crate) fn collapse_pred(solver: &SmtSolver, term: BoolTerm) -> EngineResult<Pred> {
    Ok(match solver.probe_bool(&term)? {
        Some(val) => Pred::Concrete(val),
        None => Pred::Symbolic(term),
    })
}
