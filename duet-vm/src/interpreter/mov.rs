//! Moves, extensions, unary ops and condition-encoded selects.

use duet_ir::{CondCode, ExtKind, Temp, UnAluOp, Width};

use crate::{
    error::EngineResult,
    expr::{self, Expr, Pred},
    interpreter::StepCtx,
};

pub(super) fn mov(ctx: &mut StepCtx<'_>, res: &Temp, val: &Temp) -> EngineResult<()> {
    let value = ctx.get_var(val)?;
    ctx.put_var(res, value)
}

pub(super) fn ext(
    ctx: &mut StepCtx<'_>,
    _width: Width,
    kind: ExtKind,
    res: &Temp,
    val: &Temp,
) -> EngineResult<()> {
    let value = ctx.get_var(val)?;
    let (bits, signed) = match kind {
        ExtKind::S8 => (8, true),
        ExtKind::U8 => (8, false),
        ExtKind::S16 => (16, true),
        ExtKind::U16 => (16, false),
        ExtKind::S32 => (32, true),
        ExtKind::U32 => (32, false),
    };
    let extended = expr::ld_part(ctx.state.solver(), &value, bits, signed)?;
    ctx.put_var(res, extended)
}

pub(super) fn un_op(
    ctx: &mut StepCtx<'_>,
    op: UnAluOp,
    res: &Temp,
    val: &Temp,
) -> EngineResult<()> {
    let value = ctx.get_var(val)?;
    let result = match op {
        UnAluOp::Neg => expr::neg(ctx.state.solver(), &value)?,
        UnAluOp::Not => expr::not(ctx.state.solver(), &value)?,
    };
    ctx.put_var(res, result)
}

pub(super) fn setcond(
    ctx: &mut StepCtx<'_>,
    cond: CondCode,
    res: &Temp,
    a: &Temp,
    b: &Temp,
) -> EngineResult<()> {
    let lhs = ctx.get_var(a)?;
    let rhs = ctx.get_var(b)?;
    let width = res.width();
    let solver = ctx.state.solver();

    let result = match expr::compare(solver, cond, &lhs, &rhs)? {
        Pred::Concrete(holds) => Expr::concrete(width, i64::from(holds)),
        Pred::Symbolic(pred) => {
            let one = solver.value(width, 1);
            let zero = solver.value(width, 0);
            expr::collapse(solver, width, solver.bv_ite(&pred, &one, &zero))?
        }
    };
    ctx.put_var(res, result)
}

#[allow(clippy::too_many_arguments)]
pub(super) fn movcond(
    ctx: &mut StepCtx<'_>,
    cond: CondCode,
    res: &Temp,
    c1: &Temp,
    c2: &Temp,
    v1: &Temp,
    v2: &Temp,
) -> EngineResult<()> {
    let c1 = ctx.get_var(c1)?;
    let c2 = ctx.get_var(c2)?;
    let v1 = ctx.get_var(v1)?;
    let v2 = ctx.get_var(v2)?;
    let result = expr::movcond(ctx.state.solver(), cond, &c1, &c2, &v1, &v2)?;
    ctx.put_var(res, result)
}
