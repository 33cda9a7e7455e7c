//! Helper-call transfer functions.

use duet_ir::{CallIntent, CallOp, Width};

use crate::{
    error::{EngineError, EngineResult},
    expr::Expr,
    interpreter::StepCtx,
};

/// Execute a helper call through its intent.
///
/// Unknown helpers are tolerated by the parser so unexplored paths can keep
/// their blocks; actually reaching one while tracing is fatal.
pub(super) fn call(ctx: &mut StepCtx<'_>, call: &CallOp) -> EngineResult<()> {
    match &call.intent {
        CallIntent::LookupTbPtr { res } => {
            // the result only feeds the following goto_ptr, which the walk
            // treats as a block-exit marker
            ctx.put_var(res, Expr::concrete(Width::W64, 0))
        }
        CallIntent::Unknown => Err(EngineError::UnknownHelper(call.helper.clone())),
    }
}
