//! Binary and wide arithmetic transfer functions.

use duet_ir::{BinAluOp, Temp};

use crate::{
    error::EngineResult,
    expr,
    interpreter::StepCtx,
};

pub(super) fn bin_op(
    ctx: &mut StepCtx<'_>,
    op: BinAluOp,
    res: &Temp,
    a: &Temp,
    b: &Temp,
) -> EngineResult<()> {
    let lhs = ctx.get_var(a)?;
    let rhs = ctx.get_var(b)?;
    let solver = ctx.state.solver();
    let result = match op {
        BinAluOp::Add => expr::add(solver, &lhs, &rhs)?,
        BinAluOp::Sub => expr::sub(solver, &lhs, &rhs)?,
        BinAluOp::Mul => expr::mul(solver, &lhs, &rhs)?,
        BinAluOp::Div => expr::div(solver, &lhs, &rhs)?,
        BinAluOp::And => expr::and(solver, &lhs, &rhs)?,
        BinAluOp::Or => expr::or(solver, &lhs, &rhs)?,
        BinAluOp::Xor => expr::xor(solver, &lhs, &rhs)?,
        BinAluOp::Andc => expr::andc(solver, &lhs, &rhs)?,
        BinAluOp::Orc => expr::orc(solver, &lhs, &rhs)?,
        BinAluOp::Nand => expr::nand(solver, &lhs, &rhs)?,
        BinAluOp::Nor => expr::nor(solver, &lhs, &rhs)?,
        BinAluOp::Eqv => expr::eqv(solver, &lhs, &rhs)?,
        BinAluOp::Shl => expr::shl(solver, &lhs, &rhs)?,
        BinAluOp::Shr => expr::shr(solver, &lhs, &rhs)?,
        BinAluOp::Sar => expr::sar(solver, &lhs, &rhs)?,
    };
    ctx.put_var(res, result)
}

#[allow(clippy::too_many_arguments)]
pub(super) fn add2(
    ctx: &mut StepCtx<'_>,
    res_lo: &Temp,
    res_hi: &Temp,
    a_lo: &Temp,
    a_hi: &Temp,
    b_lo: &Temp,
    b_hi: &Temp,
) -> EngineResult<()> {
    let a_lo = ctx.get_var(a_lo)?;
    let a_hi = ctx.get_var(a_hi)?;
    let b_lo = ctx.get_var(b_lo)?;
    let b_hi = ctx.get_var(b_hi)?;
    let (lo, hi) = expr::add2(ctx.state.solver(), &a_lo, &a_hi, &b_lo, &b_hi)?;
    ctx.put_var(res_lo, lo)?;
    ctx.put_var(res_hi, hi)
}

#[allow(clippy::too_many_arguments)]
pub(super) fn sub2(
    ctx: &mut StepCtx<'_>,
    res_lo: &Temp,
    res_hi: &Temp,
    a_lo: &Temp,
    a_hi: &Temp,
    b_lo: &Temp,
    b_hi: &Temp,
) -> EngineResult<()> {
    let a_lo = ctx.get_var(a_lo)?;
    let a_hi = ctx.get_var(a_hi)?;
    let b_lo = ctx.get_var(b_lo)?;
    let b_hi = ctx.get_var(b_hi)?;
    let (lo, hi) = expr::sub2(ctx.state.solver(), &a_lo, &a_hi, &b_lo, &b_hi)?;
    ctx.put_var(res_lo, lo)?;
    ctx.put_var(res_hi, hi)
}

pub(super) fn muls2(
    ctx: &mut StepCtx<'_>,
    res_lo: &Temp,
    res_hi: &Temp,
    a: &Temp,
    b: &Temp,
) -> EngineResult<()> {
    let lhs = ctx.get_var(a)?;
    let rhs = ctx.get_var(b)?;
    let (lo, hi) = expr::muls2(ctx.state.solver(), &lhs, &rhs)?;
    ctx.put_var(res_lo, lo)?;
    ctx.put_var(res_hi, hi)
}
