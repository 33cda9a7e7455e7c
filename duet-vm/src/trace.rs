//! Optional textual IR trace.
//!
//! Enabled by pointing `QCE_TRACE` at a file path. The sink mirrors what the
//! engine sees: lowered blocks as they are cached, block executions, every
//! interpreted instruction while tracing, and each symbolic predicate with
//! its evaluated direction. Write failures on an already-open sink are
//! swallowed; the trace is diagnostic output, not engine state.

use std::{
    fs::File,
    io::Write,
    path::Path,
};

use duet_ir::{BlockId, Inst};

use crate::error::EngineResult;

#[derive(Debug, Default)]
pub(crate) struct TraceSink {
    file: Option<File>,
}

impl TraceSink {
    /// A sink writing to `path`, or a disabled one when `path` is `None`.
    pub fn open(path: Option<&Path>) -> EngineResult<Self> {
        let file = match path {
            Some(path) => Some(File::create(path)?),
            None => None,
        };
        Ok(TraceSink { file })
    }

    pub fn block_lowered(&mut self, id: BlockId, insts: &[Inst]) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "\n[TB: {id:#x}]");
            for inst in insts {
                let _ = writeln!(file, "  {inst}");
            }
        }
    }

    pub fn block_executed(&mut self, id: BlockId) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "-> TB: {id:#x}");
        }
    }

    pub fn session_started(&mut self, addr: u64, size: u64) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(
                file,
                "==== tracing started with addr {addr:#x} and size {size} ===="
            );
        }
    }

    pub fn session_ended(&mut self) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "\n-------- END OF SESSION --------\n");
            let _ = file.flush();
        }
    }

    pub fn inst(&mut self, inst: &Inst) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{inst}");
        }
    }

    pub fn predicate(&mut self, pc: u64, actual: bool, text: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(
                file,
                "**** predicate {pc:016x} [{}]: {text}",
                if actual { "T" } else { "F" }
            );
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = &mut self.file {
            let _ = file.flush();
        }
    }
}
