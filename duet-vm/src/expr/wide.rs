//! Wide (two-output) operations.

use duet_ir::Width;

use crate::{
    error::EngineResult,
    expr::{collapse, same_width, Expr},
    solver::SmtSolver,
};

/// Double-word addition: `(lo, hi) = (a_hi:a_lo) + (b_hi:b_lo)` with the
/// carry from the low halves propagated into the high halves.
pub fn add2(
    solver: &SmtSolver,
    a_lo: &Expr,
    a_hi: &Expr,
    b_lo: &Expr,
    b_hi: &Expr,
) -> EngineResult<(Expr, Expr)> {
    let width = quad_width(a_lo, a_hi, b_lo, b_hi)?;

    if let (Some(al), Some(ah), Some(bl), Some(bh)) = (
        a_lo.concrete_value(),
        a_hi.concrete_value(),
        b_lo.concrete_value(),
        b_hi.concrete_value(),
    ) {
        let (lo, hi) = match width {
            Width::W32 => {
                let (lo, carry) = (al as u32).overflowing_add(bl as u32);
                let hi = (ah as u32).wrapping_add(bh as u32).wrapping_add(carry as u32);
                (i64::from(lo as i32), i64::from(hi as i32))
            }
            Width::W64 => {
                let (lo, carry) = (al as u64).overflowing_add(bl as u64);
                let hi = (ah as u64).wrapping_add(bh as u64).wrapping_add(u64::from(carry));
                (lo as i64, hi as i64)
            }
        };
        return Ok((Expr::concrete(width, lo), Expr::concrete(width, hi)));
    }

    let (lo, hi) = solver.bv_add2(
        width,
        &a_lo.to_term(solver),
        &a_hi.to_term(solver),
        &b_lo.to_term(solver),
        &b_hi.to_term(solver),
    );
    Ok((collapse(solver, width, lo)?, collapse(solver, width, hi)?))
}

/// Double-word subtraction with borrow propagation.
pub fn sub2(
    solver: &SmtSolver,
    a_lo: &Expr,
    a_hi: &Expr,
    b_lo: &Expr,
    b_hi: &Expr,
) -> EngineResult<(Expr, Expr)> {
    let width = quad_width(a_lo, a_hi, b_lo, b_hi)?;

    if let (Some(al), Some(ah), Some(bl), Some(bh)) = (
        a_lo.concrete_value(),
        a_hi.concrete_value(),
        b_lo.concrete_value(),
        b_hi.concrete_value(),
    ) {
        let (lo, hi) = match width {
            Width::W32 => {
                let (lo, borrow) = (al as u32).overflowing_sub(bl as u32);
                let hi = (ah as u32).wrapping_sub(bh as u32).wrapping_sub(borrow as u32);
                (i64::from(lo as i32), i64::from(hi as i32))
            }
            Width::W64 => {
                let (lo, borrow) = (al as u64).overflowing_sub(bl as u64);
                let hi = (ah as u64).wrapping_sub(bh as u64).wrapping_sub(u64::from(borrow));
                (lo as i64, hi as i64)
            }
        };
        return Ok((Expr::concrete(width, lo), Expr::concrete(width, hi)));
    }

    let (lo, hi) = solver.bv_sub2(
        width,
        &a_lo.to_term(solver),
        &a_hi.to_term(solver),
        &b_lo.to_term(solver),
        &b_hi.to_term(solver),
    );
    Ok((collapse(solver, width, lo)?, collapse(solver, width, hi)?))
}

/// Signed widening multiplication: the low output is the N-bit product, the
/// high output is the arithmetic shift right by N of the 2N-bit signed
/// product.
pub fn muls2(solver: &SmtSolver, a: &Expr, b: &Expr) -> EngineResult<(Expr, Expr)> {
    let width = same_width(a, b)?;

    if let (Some(av), Some(bv)) = (a.concrete_value(), b.concrete_value()) {
        let (lo, hi) = match width {
            Width::W32 => {
                let product = i64::from(av as i32) * i64::from(bv as i32);
                (i64::from(product as i32), i64::from((product >> 32) as i32))
            }
            Width::W64 => {
                let product = i128::from(av) * i128::from(bv);
                (product as i64, (product >> 64) as i64)
            }
        };
        return Ok((Expr::concrete(width, lo), Expr::concrete(width, hi)));
    }

    let (lo, hi) = solver.bv_muls2(width, &a.to_term(solver), &b.to_term(solver));
    Ok((collapse(solver, width, lo)?, collapse(solver, width, hi)?))
}

fn quad_width(a_lo: &Expr, a_hi: &Expr, b_lo: &Expr, b_hi: &Expr) -> EngineResult<Width> {
    let width = same_width(a_lo, a_hi)?;
    same_width(b_lo, b_hi)?;
    same_width(a_lo, b_lo)?;
    Ok(width)
}
