use core::fmt;

use crate::temp::Temp;

/// High-level intent of a helper call.
///
/// The lowered stream identifies helpers by their descriptor name; the parser
/// maps the names it knows into intents the interpreter can execute. The
/// table is extensible: add an arm to [`CallIntent::from_helper`] when the
/// host emulator exports a new helper the engine must understand. Unmatched
/// names are tolerated at parse time and fatal only when reached while
/// tracing.
#[derive(Debug, Clone, PartialEq)]
pub enum CallIntent {
    /// Translation-cache lookup for an indirect block exit; the result feeds
    /// the following `goto_ptr` and carries no guest-visible state.
    LookupTbPtr {
        /// Destination temporary for the host pointer.
        res: Temp,
    },
    /// A helper the engine has no model for.
    Unknown,
}

impl CallIntent {
    /// Map a helper descriptor to an intent.
    ///
    /// `outs` are the call's output temporaries, already normalized.
    pub fn from_helper(helper: &str, outs: &[Temp], _ins: &[Temp]) -> CallIntent {
        match (helper, outs) {
            ("lookup_tb_ptr", [res]) => CallIntent::LookupTbPtr { res: *res },
            _ => CallIntent::Unknown,
        }
    }
}

/// A parsed helper call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOp {
    /// Execution intent.
    pub intent: CallIntent,
    /// Helper name, kept for diagnostics.
    pub helper: String,
}

impl fmt::Display for CallOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.intent {
            CallIntent::LookupTbPtr { res } => {
                write!(f, "call {} -> {res}", self.helper)
            }
            CallIntent::Unknown => write!(f, "call {} [unknown]", self.helper),
        }
    }
}
