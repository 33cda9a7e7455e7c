//! Engine error taxonomy.
//!
//! Everything here is fatal to the running session: errors unwind to the
//! session boundary, which flushes the trace sink before handing the failure
//! to the embedder. The two deliberately non-fatal conditions, a solver
//! `unknown` on a speculative probe and an unmatched helper at parse time,
//! are not errors and never appear in this enum.

use duet_ir::{ParseError, Width};

/// Fatal engine failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The front-end handed over a stream the engine cannot model.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The expression algebra received operands of the wrong declared width.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Width the operation demands.
        expected: Width,
        /// Width the operand declared.
        got: Width,
    },

    /// A host address could not be resolved to a concrete value.
    #[error("symbolic address on host memory")]
    SymbolicHostAddress,

    /// A concrete host address fell outside the CPU-state envelope.
    #[error("host memory offset out of bound: {0:#x}")]
    HostAddressOutOfBound(i64),

    /// A concrete guest access violated its alignment requirement.
    #[error("unaligned guest memory access: address {addr:#x}, alignment {align}")]
    UnalignedGuestAccess {
        /// Accessed guest address.
        addr: u64,
        /// Required alignment in bytes.
        align: u64,
    },

    /// A symbolic guest offset could not be proven in bounds and aligned.
    #[error("symbolic guest access failed validation: {0}")]
    SymbolicGuestAccess(&'static str),

    /// Symbolic guest stores have no memory model yet.
    #[error("guest store through a symbolic address is not supported")]
    SymbolicGuestStore,

    /// The solver failed on a query that must be decidable on this path.
    #[error("solver failure: {0}")]
    Solver(&'static str),

    /// The translation-block cache is full.
    #[error("translation-block cache is at capacity")]
    CacheCapacity,

    /// A block executed before its IR was handed over.
    #[error("no cached IR for translation block {0:#x}")]
    UnknownBlock(u64),

    /// A block-local temporary was read before any write.
    #[error("read of uninitialized block-local temporary %{0}")]
    UninitTemp(usize),

    /// A fixed host register the emulator does not expose.
    #[error("fixed host register #{0} has no concrete value")]
    UnknownFixedReg(u8),

    /// An unmatched helper call was reached while tracing.
    #[error("unmatched helper reached while tracing: {0}")]
    UnknownHelper(String),

    /// The session state machine was driven out of order.
    #[error("session error: {0}")]
    Session(&'static str),

    /// The persisted coverage database is malformed.
    #[error("corrupted coverage database: {0}")]
    CorruptedCoverage(&'static str),

    /// Seed or trace persistence failed; the fuzzing loop depends on
    /// durability.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
