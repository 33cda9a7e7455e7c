use crate::raw::{RawOpcode, RawType};

/// Failure while normalizing a lowered block.
///
/// Every variant is fatal to the engine: the front-end handed over a stream
/// the interpreter has no sound model for, and dropping the block would
/// silently lose coverage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A vector-typed operand appeared in the stream.
    #[error("vector operand of type {0:?} in lowered stream")]
    VectorOperand(RawType),
    /// A temporary record violated the front-end's own invariants.
    #[error("malformed temporary: {0}")]
    MalformedTemp(String),
    /// A label is referenced but has no definition site.
    #[error("label {0} has no definition site")]
    UndefinedLabel(u16),
    /// A label still has unapplied relocations.
    #[error("label {0} has pending relocations")]
    PendingRelocation(u16),
    /// An opcode the engine recognizes but does not support.
    #[error("unsupported opcode {0:?}")]
    UnsupportedOpcode(RawOpcode),
    /// Wrong number of operands for an opcode.
    #[error("bad operand count for {opc:?}: expected {expected}, got {got}")]
    BadArity {
        /// The offending opcode.
        opc: RawOpcode,
        /// Number of operands the opcode takes.
        expected: usize,
        /// Number of operands present.
        got: usize,
    },
    /// An operand of the wrong kind (e.g. a label where a temp is expected).
    #[error("operand kind mismatch for {0:?}")]
    BadOperand(RawOpcode),
    /// An operand whose declared width does not fit the opcode.
    #[error("operand width mismatch for {0:?}")]
    WidthMismatch(RawOpcode),
    /// An unknown condition-code encoding.
    #[error("invalid condition code {0:#x}")]
    InvalidCond(u32),
    /// A big-endian guest access.
    #[error("big-endian guest memory access is not supported")]
    BigEndian,
    /// An atomic guest access.
    #[error("atomic guest memory access is not supported")]
    Atomic,
}
