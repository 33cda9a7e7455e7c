use core::fmt;

use crate::{
    call::CallOp,
    cond::CondCode,
    memop::MemFlags,
    temp::{Label, Temp, Width},
};

/// Unary ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnAluOp {
    /// Two's-complement negation.
    Neg,
    /// Bitwise complement.
    Not,
}

/// Binary ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinAluOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Signed division.
    Div,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive-or.
    Xor,
    /// `a & !b`.
    Andc,
    /// `a | !b`.
    Orc,
    /// `!(a & b)`.
    Nand,
    /// `!(a | b)`.
    Nor,
    /// `!(a ^ b)`.
    Eqv,
    /// Logical shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
}

/// Kind of a sign/zero extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtKind {
    /// Sign-extend the low 8 bits.
    S8,
    /// Zero-extend the low 8 bits.
    U8,
    /// Sign-extend the low 16 bits.
    S16,
    /// Zero-extend the low 16 bits.
    U16,
    /// Sign-extend the low 32 bits (64-bit only).
    S32,
    /// Zero-extend the low 32 bits (64-bit only).
    U32,
}

/// Kind of a CPU-state load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvLdKind {
    /// Zero-extended byte.
    U8,
    /// Sign-extended byte.
    S8,
    /// Zero-extended halfword.
    U16,
    /// Sign-extended halfword.
    S16,
    /// Zero-extended word (64-bit only).
    U32,
    /// Sign-extended word (64-bit only).
    S32,
    /// Full-width load.
    Full,
}

/// Kind of a CPU-state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStKind {
    /// Store the low byte.
    B8,
    /// Store the low halfword.
    B16,
    /// Store the low word (64-bit only).
    B32,
    /// Full-width store.
    Full,
}

/// A normalized instruction of a translation block.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// Start-of-guest-instruction marker carrying the guest program counter.
    InsnStart {
        /// Guest program counter of the instruction that follows.
        pc: u64,
    },
    /// Leave the translation block.
    ExitTb {
        /// Exit index handed back to the dispatch loop.
        idx: u64,
    },
    /// Direct jump to a chained translation block.
    GotoTb {
        /// Jump slot index.
        idx: u64,
    },
    /// Indirect jump through a host pointer.
    GotoPtr {
        /// Temporary holding the host pointer.
        ptr: Temp,
    },
    /// Definition site of a label.
    SetLabel {
        /// The label being defined.
        label: Label,
    },
    /// Unconditional branch within the block.
    Br {
        /// Branch target.
        label: Label,
    },
    /// Register-to-register move.
    Mov {
        /// Operand width.
        width: Width,
        /// Destination.
        res: Temp,
        /// Source.
        val: Temp,
    },
    /// Sign/zero extension of a sub-word quantity.
    Ext {
        /// Operand width.
        width: Width,
        /// Extension kind.
        kind: ExtKind,
        /// Destination.
        res: Temp,
        /// Source.
        val: Temp,
    },
    /// Unary ALU operation.
    UnOp {
        /// Operation.
        op: UnAluOp,
        /// Operand width.
        width: Width,
        /// Destination.
        res: Temp,
        /// Operand.
        val: Temp,
    },
    /// Binary ALU operation.
    BinOp {
        /// Operation.
        op: BinAluOp,
        /// Operand width.
        width: Width,
        /// Destination.
        res: Temp,
        /// Left operand.
        a: Temp,
        /// Right operand.
        b: Temp,
    },
    /// Load from the CPU-state region.
    EnvLd {
        /// Destination width.
        width: Width,
        /// Load kind.
        kind: EnvLdKind,
        /// Destination.
        res: Temp,
        /// Host base address temporary.
        addr: Temp,
        /// Byte offset added to the base.
        offset: i64,
    },
    /// Store to the CPU-state region.
    EnvSt {
        /// Source width.
        width: Width,
        /// Store kind.
        kind: EnvStKind,
        /// Value to store.
        val: Temp,
        /// Host base address temporary.
        addr: Temp,
        /// Byte offset added to the base.
        offset: i64,
    },
    /// Guest memory load.
    GuestLd {
        /// Destination width.
        width: Width,
        /// Destination.
        res: Temp,
        /// Guest virtual address temporary.
        addr: Temp,
        /// Validated access flags.
        flags: MemFlags,
    },
    /// Guest memory store.
    GuestSt {
        /// Source width.
        width: Width,
        /// Value to store.
        val: Temp,
        /// Guest virtual address temporary.
        addr: Temp,
        /// Validated access flags.
        flags: MemFlags,
    },
    /// Comparison into a register (1 on true, 0 on false).
    Setcond {
        /// Operand width.
        width: Width,
        /// Condition code.
        cond: CondCode,
        /// Destination.
        res: Temp,
        /// Left operand.
        a: Temp,
        /// Right operand.
        b: Temp,
    },
    /// Conditional select.
    Movcond {
        /// Operand width.
        width: Width,
        /// Condition code.
        cond: CondCode,
        /// Destination.
        res: Temp,
        /// Left comparison operand.
        c1: Temp,
        /// Right comparison operand.
        c2: Temp,
        /// Value selected when the condition holds.
        v1: Temp,
        /// Value selected otherwise.
        v2: Temp,
    },
    /// Conditional branch.
    Brcond {
        /// Operand width.
        width: Width,
        /// Condition code.
        cond: CondCode,
        /// Left operand.
        a: Temp,
        /// Right operand.
        b: Temp,
        /// Branch target when the condition holds.
        label: Label,
    },
    /// Double-word addition with carry propagation.
    Add2 {
        /// Half width.
        width: Width,
        /// Low destination half.
        res_lo: Temp,
        /// High destination half.
        res_hi: Temp,
        /// Low half of the left operand.
        a_lo: Temp,
        /// High half of the left operand.
        a_hi: Temp,
        /// Low half of the right operand.
        b_lo: Temp,
        /// High half of the right operand.
        b_hi: Temp,
    },
    /// Double-word subtraction with borrow propagation.
    Sub2 {
        /// Half width.
        width: Width,
        /// Low destination half.
        res_lo: Temp,
        /// High destination half.
        res_hi: Temp,
        /// Low half of the left operand.
        a_lo: Temp,
        /// High half of the left operand.
        a_hi: Temp,
        /// Low half of the right operand.
        b_lo: Temp,
        /// High half of the right operand.
        b_hi: Temp,
    },
    /// Signed widening multiplication.
    Muls2 {
        /// Operand width.
        width: Width,
        /// Low half of the product.
        res_lo: Temp,
        /// High half of the product.
        res_hi: Temp,
        /// Left operand.
        a: Temp,
        /// Right operand.
        b: Temp,
    },
    /// Helper call, encoded as a high-level intent.
    Call(CallOp),
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::InsnStart { pc } => write!(f, "---- {pc:#x} ----"),
            Inst::ExitTb { idx } => write!(f, "exit_tb {idx}"),
            Inst::GotoTb { idx } => write!(f, "goto_tb {idx}"),
            Inst::GotoPtr { ptr } => write!(f, "goto_ptr {ptr}"),
            Inst::SetLabel { label } => write!(f, "{label}:"),
            Inst::Br { label } => write!(f, "br {label}"),
            Inst::Mov { res, val, .. } => write!(f, "mov {res} <- {val}"),
            Inst::Ext {
                kind, res, val, ..
            } => write!(f, "ext{kind:?} {res} <- {val}"),
            Inst::UnOp { op, res, val, .. } => write!(f, "{op:?} {res} <- {val}"),
            Inst::BinOp { op, res, a, b, .. } => {
                write!(f, "{op:?} {res} <- {a}, {b}")
            }
            Inst::EnvLd {
                kind,
                res,
                addr,
                offset,
                ..
            } => write!(f, "ld{kind:?} {res} <- env[{addr}+{offset:#x}]"),
            Inst::EnvSt {
                kind,
                val,
                addr,
                offset,
                ..
            } => write!(f, "st{kind:?} env[{addr}+{offset:#x}] <- {val}"),
            Inst::GuestLd {
                res, addr, flags, ..
            } => write!(f, "guest_ld.{flags} {res} <- [{addr}]"),
            Inst::GuestSt {
                val, addr, flags, ..
            } => write!(f, "guest_st.{flags} [{addr}] <- {val}"),
            Inst::Setcond {
                cond, res, a, b, ..
            } => write!(f, "setcond.{cond} {res} <- {a}, {b}"),
            Inst::Movcond {
                cond,
                res,
                c1,
                c2,
                v1,
                v2,
                ..
            } => write!(f, "movcond.{cond} {res} <- ({c1}, {c2}) ? {v1} : {v2}"),
            Inst::Brcond {
                cond, a, b, label, ..
            } => write!(f, "brcond.{cond} {a}, {b} -> {label}"),
            Inst::Add2 {
                res_lo,
                res_hi,
                a_lo,
                a_hi,
                b_lo,
                b_hi,
                ..
            } => write!(
                f,
                "add2 {res_hi}:{res_lo} <- {a_hi}:{a_lo}, {b_hi}:{b_lo}"
            ),
            Inst::Sub2 {
                res_lo,
                res_hi,
                a_lo,
                a_hi,
                b_lo,
                b_hi,
                ..
            } => write!(
                f,
                "sub2 {res_hi}:{res_lo} <- {a_hi}:{a_lo}, {b_hi}:{b_lo}"
            ),
            Inst::Muls2 {
                res_lo,
                res_hi,
                a,
                b,
                ..
            } => write!(f, "muls2 {res_hi}:{res_lo} <- {a}, {b}"),
            Inst::Call(call) => write!(f, "{call}"),
        }
    }
}
