//! Guest memory transfer functions.
//!
//! A concrete address reads/writes the mem map with concrete fallback. A
//! symbolic address must be provably inside the blob; the load then resolves
//! into the blob array. Symbolic stores have no memory model and are fatal.

use duet_ir::{MemFlags, Temp, Width};

use crate::{
    error::{EngineError, EngineResult},
    expr::{self, Expr},
    interpreter::StepCtx,
};

pub(super) fn guest_ld(
    ctx: &mut StepCtx<'_>,
    width: Width,
    res: &Temp,
    addr: &Temp,
    flags: MemFlags,
) -> EngineResult<()> {
    let addr = ctx.get_var(addr)?;
    addr.expect_width(Width::W64)?;
    ctx.state.check_guest_access(flags, &addr)?;

    let cell = match addr.concrete_value() {
        Some(vaddr) => ctx.state.mem_get(ctx.cpu, vaddr as u64, width)?,
        None => {
            let term = addr.to_term(ctx.state.solver());
            ctx.state.mem_get_symbolic(&term, width)?
        }
    };

    let value = extend_loaded(ctx, width, flags, cell)?;
    ctx.put_var(res, value)
}

pub(super) fn guest_st(
    ctx: &mut StepCtx<'_>,
    width: Width,
    val: &Temp,
    addr: &Temp,
    flags: MemFlags,
) -> EngineResult<()> {
    let addr = ctx.get_var(addr)?;
    addr.expect_width(Width::W64)?;
    ctx.state.check_guest_access(flags, &addr)?;

    let Some(vaddr) = addr.concrete_value() else {
        return Err(EngineError::SymbolicGuestStore);
    };
    let vaddr = vaddr as u64;

    let value = ctx.get_var(val)?;
    let cell = if flags.size.bits() == width.bits() {
        value
    } else {
        // a narrow store replaces only its own lane of the existing cell
        let old = ctx.state.mem_get(ctx.cpu, vaddr, width)?;
        expr::st_part(ctx.state.solver(), &value, &old, flags.size.bits())?
    };
    ctx.state.mem_put(vaddr, cell);
    Ok(())
}

/// Narrow-access extension on the load side: a sub-word access keeps the low
/// bits of the whole-word cell, zero- or sign-extended per the flags.
fn extend_loaded(
    ctx: &StepCtx<'_>,
    width: Width,
    flags: MemFlags,
    cell: Expr,
) -> EngineResult<Expr> {
    if flags.size.bits() == width.bits() {
        return Ok(cell);
    }
    expr::ld_part(
        ctx.state.solver(),
        &cell,
        flags.size.bits(),
        flags.signed,
    )
}
