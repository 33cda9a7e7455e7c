//! The front-end's untyped view of a lowered block.
//!
//! These records mirror what the emulator's optimizer hands over: an ordered
//! operation stream whose operands are still raw discriminated payloads. The
//! [`parse_block`](crate::parse_block) pass normalizes them into the typed
//! model once; nothing downstream of the parser touches this module again.

/// Scalar/vector type tag of a raw temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawType {
    /// 32-bit scalar.
    I32,
    /// 64-bit scalar.
    I64,
    /// 128-bit scalar, lowered as two 64-bit halves.
    I128,
    /// 64-bit vector (unsupported).
    V64,
    /// 128-bit vector (unsupported).
    V128,
    /// 256-bit vector (unsupported).
    V256,
}

/// Scope of a block-local raw temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawScope {
    /// Lives for the whole translation block.
    Tb,
    /// Lives for one extended basic block.
    Ebb,
}

/// An unparsed temporary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTemp {
    /// Immediate constant.
    Const {
        /// Value type.
        ty: RawType,
        /// Immediate payload.
        value: i64,
    },
    /// Fixed host register.
    Fixed {
        /// Value type.
        ty: RawType,
        /// Host register number.
        reg: u8,
    },
    /// CPU-state field, optionally reached through a pointer field.
    Global {
        /// Value type.
        ty: RawType,
        /// Base host register holding the CPU-state pointer.
        base: u8,
        /// Byte offset of the field (or of the pointer field).
        offset: i64,
        /// Extra offset applied after the pointer load, for indirect fields.
        indirect_offset: Option<i64>,
    },
    /// Block-local temporary.
    Local {
        /// Part type of this record.
        ty: RawType,
        /// Type of the whole value this record is a part of.
        base_ty: RawType,
        /// Half index within a 128-bit pair (0 = low, 1 = high).
        sub_index: u8,
        /// Scope of the temporary.
        scope: RawScope,
        /// Slot index within the block's temporary table.
        index: usize,
    },
}

/// An unparsed label reference.
///
/// `present` marks that the label has a definition site; `pending_relocs`
/// counts back-end relocations that have not been applied yet. A frozen
/// block must have every label present with zero pending relocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLabel {
    /// Label identifier.
    pub id: u16,
    /// Whether the label has a definition site.
    pub present: bool,
    /// Number of unapplied relocations.
    pub pending_relocs: u32,
}

impl RawLabel {
    /// A label that is defined and fully relocated.
    pub fn resolved(id: u16) -> Self {
        RawLabel {
            id,
            present: true,
            pending_relocs: 0,
        }
    }
}

/// A raw operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawArg {
    /// Temporary operand.
    Temp(RawTemp),
    /// Label operand.
    Label(RawLabel),
    /// Immediate operand (exit index, program counter, ...).
    Imm(u64),
    /// Condition-code operand.
    Cond(u32),
    /// Guest memory-operation flag word.
    MemOp(u32),
}

/// A raw operation of the lowered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOp {
    /// An ordinary opcode with positional operands.
    Op {
        /// Opcode tag.
        opc: RawOpcode,
        /// Positional operands; destinations first, as the front-end emits
        /// them.
        args: Vec<RawArg>,
    },
    /// A helper call, described by its helper-info descriptor.
    Call {
        /// Helper name from the descriptor.
        helper: String,
        /// Output temporaries.
        outs: Vec<RawTemp>,
        /// Input temporaries.
        ins: Vec<RawTemp>,
    },
}

/// Opcode tags of the lowered stream.
///
/// The list covers the operations the engine interprets plus the tags it
/// must recognize in order to reject them with a precise parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum RawOpcode {
    // markers and control flow
    InsnStart,
    ExitTb,
    GotoTb,
    GotoPtr,
    SetLabel,
    Br,

    // moves and extensions
    MovI32,
    MovI64,
    Ext8sI32,
    Ext8uI32,
    Ext16sI32,
    Ext16uI32,
    Ext8sI64,
    Ext8uI64,
    Ext16sI64,
    Ext16uI64,
    Ext32sI64,
    Ext32uI64,

    // unary
    NegI32,
    NegI64,
    NotI32,
    NotI64,

    // CPU-state loads/stores
    Ld8uI32,
    Ld8sI32,
    Ld16uI32,
    Ld16sI32,
    LdI32,
    St8I32,
    St16I32,
    StI32,
    Ld8uI64,
    Ld8sI64,
    Ld16uI64,
    Ld16sI64,
    Ld32uI64,
    Ld32sI64,
    LdI64,
    St8I64,
    St16I64,
    St32I64,
    StI64,

    // guest memory
    QemuLdI32,
    QemuLdI64,
    QemuStI32,
    QemuStI64,

    // arithmetic
    AddI32,
    AddI64,
    SubI32,
    SubI64,
    MulI32,
    MulI64,
    DivI32,
    DivI64,

    // bitwise
    AndI32,
    AndI64,
    OrI32,
    OrI64,
    XorI32,
    XorI64,
    AndcI32,
    AndcI64,
    OrcI32,
    OrcI64,
    NandI32,
    NandI64,
    NorI32,
    NorI64,
    EqvI32,
    EqvI64,

    // shifts
    ShlI32,
    ShlI64,
    ShrI32,
    ShrI64,
    SarI32,
    SarI64,

    // condition-encoded
    SetcondI32,
    SetcondI64,
    MovcondI32,
    MovcondI64,
    BrcondI32,
    BrcondI64,

    // wide
    Add2I32,
    Add2I64,
    Sub2I32,
    Sub2I64,
    Muls2I32,
    Muls2I64,

    // recognized but unsupported
    MulshI32,
    MulshI64,
    MuluhI32,
    MuluhI64,
    Mulu2I32,
    Mulu2I64,
    DivuI32,
    DivuI64,
    RemI32,
    RemI64,
    RemuI32,
    RemuI64,
    RotlI32,
    RotlI64,
    RotrI32,
    RotrI64,
    Setcond2I32,
    QemuLdA32,
    QemuStA32,
    QemuLdI128,
    QemuStI128,
    PluginCb,
    PluginMemCb,
}
