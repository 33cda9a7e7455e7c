//! Binary operations of the expression algebra.
//!
//! Shift counts follow the solver's bit-vector semantics: counts at or above
//! the operand width shift everything out (arithmetic right shifts fill with
//! the sign). Signed division by zero follows the bit-vector theory as well,
//! so the concrete fast path and a later probe collapse always agree.

use crate::{
    error::EngineResult,
    expr::{collapse, same_width, Expr},
    solver::{SmtSolver, Term},
};

pub(crate) fn bin_op(
    solver: &SmtSolver,
    lhs: &Expr,
    rhs: &Expr,
    concrete32: fn(i32, i32) -> i32,
    concrete64: fn(i64, i64) -> i64,
    symbolic: fn(&SmtSolver, &Term, &Term) -> Term,
) -> EngineResult<Expr> {
    let width = same_width(lhs, rhs)?;
    match (lhs, rhs) {
        (Expr::C32(a), Expr::C32(b)) => Ok(Expr::C32(concrete32(*a, *b))),
        (Expr::C64(a), Expr::C64(b)) => Ok(Expr::C64(concrete64(*a, *b))),
        _ => {
            let term = symbolic(solver, &lhs.to_term(solver), &rhs.to_term(solver));
            collapse(solver, width, term)
        }
    }
}

macro_rules! define_bin_op {
    ($(#[$doc:meta])* $name:ident, $c32:expr, $c64:expr, $sym:ident) => {
        $(#[$doc])*
        pub fn $name(solver: &SmtSolver, lhs: &Expr, rhs: &Expr) -> EngineResult<Expr> {
            bin_op(solver, lhs, rhs, $c32, $c64, SmtSolver::$sym)
        }
    };
}

define_bin_op!(
    /// Wrapping addition.
    add,
    i32::wrapping_add,
    i64::wrapping_add,
    bv_add
);
define_bin_op!(
    /// Wrapping subtraction.
    sub,
    i32::wrapping_sub,
    i64::wrapping_sub,
    bv_sub
);
define_bin_op!(
    /// Wrapping multiplication.
    mul,
    i32::wrapping_mul,
    i64::wrapping_mul,
    bv_mul
);
define_bin_op!(
    /// Signed division.
    div,
    div32,
    div64,
    bv_div
);
define_bin_op!(
    /// Bitwise and.
    and,
    |a, b| a & b,
    |a, b| a & b,
    bv_and
);
define_bin_op!(
    /// Bitwise or.
    or,
    |a, b| a | b,
    |a, b| a | b,
    bv_or
);
define_bin_op!(
    /// Bitwise exclusive-or.
    xor,
    |a, b| a ^ b,
    |a, b| a ^ b,
    bv_xor
);
define_bin_op!(
    /// `a & !b`.
    andc,
    |a, b| a & !b,
    |a, b| a & !b,
    bv_andc
);
define_bin_op!(
    /// `a | !b`.
    orc,
    |a, b| a | !b,
    |a, b| a | !b,
    bv_orc
);
define_bin_op!(
    /// `!(a & b)`.
    nand,
    |a, b| !(a & b),
    |a, b| !(a & b),
    bv_nand
);
define_bin_op!(
    /// `!(a | b)`.
    nor,
    |a, b| !(a | b),
    |a, b| !(a | b),
    bv_nor
);
define_bin_op!(
    /// `!(a ^ b)`.
    eqv,
    |a, b| !(a ^ b),
    |a, b| !(a ^ b),
    bv_eqv
);
define_bin_op!(
    /// Logical shift left.
    shl,
    shl32,
    shl64,
    bv_shl
);
define_bin_op!(
    /// Logical shift right.
    shr,
    shr32,
    shr64,
    bv_shr
);
define_bin_op!(
    /// Arithmetic shift right.
    sar,
    sar32,
    sar64,
    bv_sar
);

fn div32(a: i32, b: i32) -> i32 {
    if b == 0 {
        if a < 0 {
            1
        } else {
            -1
        }
    } else {
        a.wrapping_div(b)
    }
}

fn div64(a: i64, b: i64) -> i64 {
    if b == 0 {
        if a < 0 {
            1
        } else {
            -1
        }
    } else {
        a.wrapping_div(b)
    }
}

fn shl32(a: i32, b: i32) -> i32 {
    if (b as u32) >= 32 {
        0
    } else {
        a.wrapping_shl(b as u32)
    }
}

fn shl64(a: i64, b: i64) -> i64 {
    if (b as u64) >= 64 {
        0
    } else {
        a.wrapping_shl(b as u32)
    }
}

fn shr32(a: i32, b: i32) -> i32 {
    if (b as u32) >= 32 {
        0
    } else {
        ((a as u32) >> (b as u32)) as i32
    }
}

fn shr64(a: i64, b: i64) -> i64 {
    if (b as u64) >= 64 {
        0
    } else {
        ((a as u64) >> (b as u64)) as i64
    }
}

fn sar32(a: i32, b: i32) -> i32 {
    if (b as u32) >= 32 {
        a >> 31
    } else {
        a >> (b as u32)
    }
}

fn sar64(a: i64, b: i64) -> i64 {
    if (b as u64) >= 64 {
        a >> 63
    } else {
        a >> (b as u64)
    }
}
