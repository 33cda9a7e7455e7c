//! Partial-word load/store surgery.
//!
//! `ld_part` reads the low `n` bits of an expression and zero- or
//! sign-extends them to the full width; `st_part` replaces the low `n` bits
//! of a destination with the low `n` bits of a source while preserving the
//! higher bits. CPU-state partial accessors and guest sub-word accesses are
//! both built from these two.

use duet_ir::Width;

use crate::{
    error::{EngineError, EngineResult},
    expr::{collapse, same_width, Expr},
    solver::SmtSolver,
};

fn check_part(width: Width, n: u32) -> EngineResult<()> {
    // a "partial" access of the full width would be a plain move
    if n == 0 || n >= width.bits() || !matches!(n, 8 | 16 | 32) {
        return Err(EngineError::TypeMismatch {
            expected: width,
            got: width,
        });
    }
    Ok(())
}

/// Extract the low `n` bits of `val` and extend them to its width.
pub fn ld_part(solver: &SmtSolver, val: &Expr, n: u32, signed: bool) -> EngineResult<Expr> {
    let width = val.width();
    check_part(width, n)?;

    match val {
        Expr::C32(v) => Ok(Expr::C32(concrete_ld32(*v, n, signed))),
        Expr::C64(v) => Ok(Expr::C64(concrete_ld64(*v, n, signed))),
        _ => {
            let term = solver.bv_ld_part(width, n, signed, &val.to_term(solver));
            collapse(solver, width, term)
        }
    }
}

/// Replace the low `n` bits of `dst` with the low `n` bits of `src`.
pub fn st_part(solver: &SmtSolver, src: &Expr, dst: &Expr, n: u32) -> EngineResult<Expr> {
    let width = same_width(src, dst)?;
    check_part(width, n)?;

    match (src, dst) {
        (Expr::C32(s), Expr::C32(d)) => Ok(Expr::C32(concrete_st32(*s, *d, n))),
        (Expr::C64(s), Expr::C64(d)) => Ok(Expr::C64(concrete_st64(*s, *d, n))),
        _ => {
            let term = solver.bv_st_part(width, n, &src.to_term(solver), &dst.to_term(solver));
            collapse(solver, width, term)
        }
    }
}

fn concrete_ld32(val: i32, n: u32, signed: bool) -> i32 {
    match (n, signed) {
        (8, false) => i32::from(val as u8),
        (8, true) => i32::from(val as i8),
        (16, false) => i32::from(val as u16),
        (16, true) => i32::from(val as i16),
        _ => unreachable!("validated partial width"),
    }
}

fn concrete_ld64(val: i64, n: u32, signed: bool) -> i64 {
    match (n, signed) {
        (8, false) => i64::from(val as u8),
        (8, true) => i64::from(val as i8),
        (16, false) => i64::from(val as u16),
        (16, true) => i64::from(val as i16),
        (32, false) => i64::from(val as u32),
        (32, true) => i64::from(val as i32),
        _ => unreachable!("validated partial width"),
    }
}

fn concrete_st32(src: i32, dst: i32, n: u32) -> i32 {
    let mask = (1i64 << n) - 1;
    (((dst as i64) & !mask) | ((src as i64) & mask)) as i32
}

fn concrete_st64(src: i64, dst: i64, n: u32) -> i64 {
    let mask = ((1i128 << n) - 1) as i64;
    (dst & !mask) | (src & mask)
}
