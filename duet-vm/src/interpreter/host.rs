//! CPU-state load/store transfer functions.
//!
//! The env map is addressed by `base + offset`, which must resolve to a
//! concrete host address inside the envelope around the CPU-state region.
//! Partial accesses are synthesized from whole-word get/put through the
//! expression algebra so symbolic cells are never split.

use duet_ir::{EnvLdKind, EnvStKind, Temp, Width};

use crate::{
    error::EngineResult,
    expr,
    interpreter::StepCtx,
};

pub(super) fn env_ld(
    ctx: &mut StepCtx<'_>,
    width: Width,
    kind: EnvLdKind,
    res: &Temp,
    addr: &Temp,
    offset: i64,
) -> EngineResult<()> {
    let base = ctx.get_var(addr)?;
    let index = ctx.state.env_index(ctx.cpu, &base, offset)?;
    let cell = ctx.state.env_get(ctx.cpu, index, width)?;

    let value = match kind {
        EnvLdKind::Full => cell,
        EnvLdKind::U8 => expr::ld_part(ctx.state.solver(), &cell, 8, false)?,
        EnvLdKind::S8 => expr::ld_part(ctx.state.solver(), &cell, 8, true)?,
        EnvLdKind::U16 => expr::ld_part(ctx.state.solver(), &cell, 16, false)?,
        EnvLdKind::S16 => expr::ld_part(ctx.state.solver(), &cell, 16, true)?,
        EnvLdKind::U32 => expr::ld_part(ctx.state.solver(), &cell, 32, false)?,
        EnvLdKind::S32 => expr::ld_part(ctx.state.solver(), &cell, 32, true)?,
    };
    ctx.put_var(res, value)
}

pub(super) fn env_st(
    ctx: &mut StepCtx<'_>,
    width: Width,
    kind: EnvStKind,
    val: &Temp,
    addr: &Temp,
    offset: i64,
) -> EngineResult<()> {
    let value = ctx.get_var(val)?;
    let base = ctx.get_var(addr)?;
    let index = ctx.state.env_index(ctx.cpu, &base, offset)?;

    let cell = match kind {
        EnvStKind::Full => value,
        EnvStKind::B8 | EnvStKind::B16 | EnvStKind::B32 => {
            let bits = match kind {
                EnvStKind::B8 => 8,
                EnvStKind::B16 => 16,
                _ => 32,
            };
            let old = ctx.state.env_get(ctx.cpu, index, width)?;
            expr::st_part(ctx.state.solver(), &value, &old, bits)?
        }
    };
    ctx.state.env_put(index, cell);
    Ok(())
}
