//! Engine lifecycle and the inbound emulator contract.
//!
//! The engine is a process-wide handle: initialized once at emulator start,
//! destroyed at shutdown, with the session as an optional sub-component. The
//! emulator feeds it optimized IR (`on_ir_optimized`), executed blocks
//! (`on_block_executed`) and the tracing window (`trace_start` /
//! `trace_stop`). Everything else (coverage persistence, seed emission, the
//! text trace) flows out through the filesystem.

use std::{
    cell::RefCell,
    path::PathBuf,
};

use duet_ir::{raw::RawOp, BlockId};
use tracing::debug;

use crate::{
    cache::BlockCache,
    checks,
    consts::{CHECK_ENV, COVERAGE_FILE, TRACE_ENV},
    coverage::CoverageDb,
    error::{EngineError, EngineResult},
    session::{Session, TracingMode},
    state::CpuState,
    trace::TraceSink,
};

/// Env offsets of the guest registers the harness protocol uses.
///
/// Offsets are relative to the CPU-state base and opaque to the engine; the
/// defaults match a 64-bit x86 CPU-state layout with sixteen 8-byte general
/// registers followed by the program counter, and the System V argument
/// order (`rdi`, `rsi`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessLayout {
    /// Offset of the guest program counter global.
    pub pc_offset: i64,
    /// Offset of the first argument register (blob address).
    pub arg0_offset: i64,
    /// Offset of the second argument register (blob size).
    pub arg1_offset: i64,
}

impl Default for HarnessLayout {
    fn default() -> Self {
        HarnessLayout {
            pc_offset: 16 * 8,
            arg0_offset: 7 * 8,
            arg1_offset: 6 * 8,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParams {
    /// Directory receiving seeds and the coverage database.
    pub output_dir: PathBuf,
    /// Harness register layout.
    pub harness: HarnessLayout,
}

impl Default for EngineParams {
    fn default() -> Self {
        EngineParams {
            output_dir: PathBuf::from("duet-out"),
            harness: HarnessLayout::default(),
        }
    }
}

/// The concolic engine.
#[derive(Debug)]
pub struct Engine {
    params: EngineParams,
    cache: BlockCache,
    coverage: CoverageDb,
    trace: TraceSink,
    session: Option<Session>,
    next_session_id: u64,
}

impl Engine {
    /// Initialize the engine: load the persisted coverage database (an
    /// absent file is an empty one) and open the `QCE_TRACE` sink if
    /// requested.
    pub fn init(params: EngineParams) -> EngineResult<Engine> {
        std::fs::create_dir_all(&params.output_dir)?;
        let coverage = CoverageDb::load(&params.output_dir.join(COVERAGE_FILE))?;
        let trace_path = std::env::var_os(TRACE_ENV).map(PathBuf::from);
        let trace = TraceSink::open(trace_path.as_deref())?;

        debug!(traces = coverage.trace_count(), "engine initialized");
        Ok(Engine {
            params,
            cache: BlockCache::new(),
            coverage,
            trace,
            session: None,
            next_session_id: 0,
        })
    }

    /// Tear the engine down. Shutting down while a session is actively
    /// tracing loses coverage and is an error.
    pub fn destroy(mut self) -> EngineResult<()> {
        match &self.session {
            None => {
                return Err(EngineError::Session(
                    "shutdown with no session ever executed",
                ))
            }
            Some(session) if session.mode() != TracingMode::NotStarted => {
                return Err(EngineError::Session(
                    "shutdown while an active session is tracing",
                ))
            }
            Some(_) => {}
        }
        self.trace.flush();
        debug!("engine destroyed");
        Ok(())
    }

    /// Create the session container for the loaded snapshot.
    pub fn session_init(&mut self) -> EngineResult<()> {
        if self.session.is_some() {
            return Err(EngineError::Session("re-creating a session"));
        }
        self.session = Some(Session::new());
        debug!("session created");
        Ok(())
    }

    /// The current session, if one was created.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The in-memory coverage database.
    pub fn coverage(&self) -> &CoverageDb {
        &self.coverage
    }

    /// Begin tracing at the next block that loads `(addr, size)` into the
    /// argument registers.
    pub fn trace_start(&mut self, addr: u64, size: u64) -> EngineResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(EngineError::Session("no active session is running"))?;
        let id = self.next_session_id;
        self.next_session_id += 1;
        session.start(id, addr, size)?;
        self.trace.session_started(addr, size);
        Ok(())
    }

    /// Stop tracing: fold the session's coverage into the database, persist
    /// it, and reset the session to idle.
    pub fn trace_stop(&mut self) -> EngineResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(EngineError::Session("no session to reload"))?;
        session.reload(&mut self.coverage)?;
        self.trace.session_ended();
        self.coverage
            .save(&self.params.output_dir.join(COVERAGE_FILE))?;
        Ok(())
    }

    /// Receive an already-optimized block from the front-end and parse it
    /// into the cache.
    pub fn on_ir_optimized(&mut self, id: BlockId, ops: &[RawOp]) -> EngineResult<()> {
        let block = self.cache.insert(id, ops)?;
        self.trace.block_lowered(id, block.insts());
        Ok(())
    }

    /// Walk the cached IR of a block the emulator just dispatched.
    pub fn on_block_executed(&mut self, id: BlockId, cpu: &dyn CpuState) -> EngineResult<()> {
        let block = self.cache.get(id)?;
        self.trace.block_executed(id);

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.observe_block(cpu, block, &self.params.harness)? {
            return Ok(());
        }

        // the internal check suite runs on the first traced block and exits
        if std::env::var_os(CHECK_ENV).is_some_and(|v| v == "1") {
            checks::run_all();
            std::process::exit(0);
        }

        session.walk_block(
            cpu,
            block,
            &self.coverage,
            &self.params.output_dir,
            &mut self.trace,
        )
    }
}

thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

/// The process-wide engine handle.
///
/// The engine runs on the emulator's execution thread only, so the handle is
/// thread-local by construction; a second thread sees no engine rather than
/// a torn one.
pub mod global {
    use super::{Engine, EngineParams, ENGINE};
    use crate::error::{EngineError, EngineResult};

    /// Initialize the process-wide engine.
    pub fn init(params: EngineParams) -> EngineResult<()> {
        ENGINE.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_some() {
                return Err(EngineError::Session("engine is already initialized"));
            }
            *slot = Some(Engine::init(params)?);
            Ok(())
        })
    }

    /// Destroy the process-wide engine.
    pub fn destroy() -> EngineResult<()> {
        ENGINE.with(|cell| {
            let engine = cell
                .borrow_mut()
                .take()
                .ok_or(EngineError::Session("engine is not initialized"))?;
            engine.destroy()
        })
    }

    /// Run a closure against the engine.
    pub fn with<T>(f: impl FnOnce(&mut Engine) -> EngineResult<T>) -> EngineResult<T> {
        ENGINE.with(|cell| {
            let mut slot = cell.borrow_mut();
            let engine = slot
                .as_mut()
                .ok_or(EngineError::Session("engine is not initialized"))?;
            f(engine)
        })
    }
}
