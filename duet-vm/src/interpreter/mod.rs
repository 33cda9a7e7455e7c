//! Per-opcode transfer functions.
//!
//! Each handler reads its operand temporaries into dual-mode expressions,
//! invokes the corresponding expression-algebra operation and writes the
//! result back through the machine state. Control flow (labels, branches,
//! block exits) and the branch/coverage handling stay with the session; the
//! handlers here are pure state transformers.

use duet_ir::{HostReg, Inst, Temp, Width};
use hashbrown::HashMap;

use crate::{
    error::{EngineError, EngineResult},
    expr::Expr,
    state::{CpuState, MachineState},
};

mod arith;
mod call;
mod guest;
mod host;
mod mov;

#[cfg(test)]
mod tests;

/// Storage for TB/EBB-scoped temporaries.
///
/// One store lives for exactly one block walk, which satisfies both scopes
/// for a post-hoc interpreter. Reading a slot no instruction has written is
/// fatal: the lowered stream never does it, so tolerating it would only
/// mask parser bugs.
#[derive(Debug, Default)]
pub struct TempStore {
    slots: HashMap<usize, Expr>,
}

impl TempStore {
    /// Empty store for a fresh block walk.
    pub fn new() -> Self {
        TempStore {
            slots: HashMap::new(),
        }
    }

    fn get(&self, index: usize) -> EngineResult<Expr> {
        self.slots
            .get(&index)
            .cloned()
            .ok_or(EngineError::UninitTemp(index))
    }

    fn set(&mut self, index: usize, value: Expr) {
        self.slots.insert(index, value);
    }
}

/// Everything a transfer function needs: the concrete CPU view, the
/// concolic store and the block-local temporaries.
pub struct StepCtx<'a> {
    /// Concrete machine state, read-only.
    pub cpu: &'a dyn CpuState,
    /// Concolic store.
    pub state: &'a mut MachineState,
    /// Block-local temporaries of the current walk.
    pub temps: &'a mut TempStore,
}

impl StepCtx<'_> {
    fn fixed_reg(&self, reg: HostReg) -> EngineResult<i64> {
        self.cpu
            .fixed_reg(reg)
            .map(|value| value as i64)
            .ok_or(EngineError::UnknownFixedReg(reg.0))
    }

    /// Read a temporary into an expression.
    pub fn get_var(&self, temp: &Temp) -> EngineResult<Expr> {
        let value = match temp {
            Temp::Const { width, value } => Expr::concrete(*width, *value),
            Temp::Fixed { width, reg } => Expr::concrete(*width, self.fixed_reg(*reg)?),
            Temp::GlobalDirect {
                width,
                base,
                offset,
            } => {
                let addr = (self.fixed_reg(*base)?.wrapping_add(*offset)) as u64;
                self.state.env_get(self.cpu, addr, *width)?
            }
            Temp::GlobalIndirect {
                width,
                base,
                offset1,
                offset2,
            } => {
                let addr = self.resolve_indirect(*base, *offset1, *offset2)?;
                self.state.env_get(self.cpu, addr, *width)?
            }
            Temp::TbLocal { index, .. } | Temp::EbbLocal { index, .. } => {
                self.temps.get(*index)?
            }
        };
        value.expect_width(temp.width())?;
        Ok(value)
    }

    /// Write an expression back to a temporary.
    pub fn put_var(&mut self, temp: &Temp, value: Expr) -> EngineResult<()> {
        value.expect_width(temp.width())?;
        match temp {
            Temp::Const { .. } => {
                return Err(EngineError::Session("store to a constant temporary"))
            }
            Temp::Fixed { .. } => {
                return Err(EngineError::Session(
                    "store to a fixed host register is not modeled",
                ))
            }
            Temp::GlobalDirect { base, offset, .. } => {
                let addr = (self.fixed_reg(*base)?.wrapping_add(*offset)) as u64;
                self.state.env_put(addr, value);
            }
            Temp::GlobalIndirect {
                base,
                offset1,
                offset2,
                ..
            } => {
                let addr = self.resolve_indirect(*base, *offset1, *offset2)?;
                self.state.env_put(addr, value);
            }
            Temp::TbLocal { index, .. } | Temp::EbbLocal { index, .. } => {
                self.temps.set(*index, value);
            }
        }
        Ok(())
    }

    /// Chase the pointer field of an indirect global.
    fn resolve_indirect(&self, base: HostReg, offset1: i64, offset2: i64) -> EngineResult<u64> {
        let ptr_addr = (self.fixed_reg(base)?.wrapping_add(offset1)) as u64;
        let ptr = self.state.env_get(self.cpu, ptr_addr, Width::W64)?;
        let ptr = ptr
            .concrete_value()
            .ok_or(EngineError::SymbolicHostAddress)?;
        Ok(ptr.wrapping_add(offset2) as u64)
    }
}

/// Execute one non-control-flow instruction.
///
/// The caller (the session walk) owns `insn_start`, labels, branches and
/// block exits; handing one of those in here is a programmer error upstream
/// and reports as a session error.
pub fn step(ctx: &mut StepCtx<'_>, inst: &Inst) -> EngineResult<()> {
    match inst {
        Inst::Mov { res, val, .. } => mov::mov(ctx, res, val),
        Inst::Ext {
            width,
            kind,
            res,
            val,
        } => mov::ext(ctx, *width, *kind, res, val),
        Inst::UnOp { op, res, val, .. } => mov::un_op(ctx, *op, res, val),
        Inst::BinOp { op, res, a, b, .. } => arith::bin_op(ctx, *op, res, a, b),
        Inst::Setcond {
            cond, res, a, b, ..
        } => mov::setcond(ctx, *cond, res, a, b),
        Inst::Movcond {
            cond,
            res,
            c1,
            c2,
            v1,
            v2,
            ..
        } => mov::movcond(ctx, *cond, res, c1, c2, v1, v2),
        Inst::EnvLd {
            width,
            kind,
            res,
            addr,
            offset,
        } => host::env_ld(ctx, *width, *kind, res, addr, *offset),
        Inst::EnvSt {
            width,
            kind,
            val,
            addr,
            offset,
        } => host::env_st(ctx, *width, *kind, val, addr, *offset),
        Inst::GuestLd {
            width,
            res,
            addr,
            flags,
        } => guest::guest_ld(ctx, *width, res, addr, *flags),
        Inst::GuestSt {
            width,
            val,
            addr,
            flags,
        } => guest::guest_st(ctx, *width, val, addr, *flags),
        Inst::Add2 {
            res_lo,
            res_hi,
            a_lo,
            a_hi,
            b_lo,
            b_hi,
            ..
        } => arith::add2(ctx, res_lo, res_hi, a_lo, a_hi, b_lo, b_hi),
        Inst::Sub2 {
            res_lo,
            res_hi,
            a_lo,
            a_hi,
            b_lo,
            b_hi,
            ..
        } => arith::sub2(ctx, res_lo, res_hi, a_lo, a_hi, b_lo, b_hi),
        Inst::Muls2 {
            res_lo,
            res_hi,
            a,
            b,
            ..
        } => arith::muls2(ctx, res_lo, res_hi, a, b),
        Inst::Call(call) => call::call(ctx, call),
        Inst::ExitTb { .. } | Inst::GotoTb { .. } | Inst::GotoPtr { .. } => Ok(()),
        Inst::InsnStart { .. } | Inst::SetLabel { .. } | Inst::Br { .. } | Inst::Brcond { .. } => {
            Err(EngineError::Session("control-flow instruction in step"))
        }
    }
}
