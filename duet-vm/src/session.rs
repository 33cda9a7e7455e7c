//! Session controller: the state machine over one harness run.
//!
//! A session moves `NotStarted → Kicked → Capturing → Running`. `Kicked`
//! waits for the block that jumps into the harness entry (detected by the
//! end-of-block add into the guest-PC global). `Capturing` confirms that the
//! calling-convention argument registers carry `(blob_addr, blob_size)` and
//! installs the symbolic globals in their place. `Running` walks every
//! executed block instruction by instruction, evaluating branch predicates,
//! recording coverage and emitting seeds for uncovered flips.

use std::path::{Path, PathBuf};

use duet_ir::{BinAluOp, CondCode, Inst, IrBlock, Label, Temp, Width};
use tracing::{debug, error};

use crate::{
    consts::BLOB_SIZE_MAX,
    coverage::{cov_flip, cov_item, CoverageDb, PathHasher},
    engine::HarnessLayout,
    error::{EngineError, EngineResult},
    expr::{self, Expr, Pred},
    interpreter::{self, StepCtx, TempStore},
    state::{CpuState, MachineState},
    trace::TraceSink,
};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingMode {
    /// No tracing requested.
    NotStarted,
    /// `trace_start` arrived; waiting for the jump into the harness.
    Kicked,
    /// The jump was seen; waiting to confirm the argument registers.
    Capturing,
    /// Dual-mode emulation in progress.
    Running,
}

/// One harness run under the concolic engine.
#[derive(Debug)]
pub struct Session {
    mode: TracingMode,
    id: u64,
    blob_addr: u64,
    blob_size: u64,
    blob_content: Vec<u8>,
    state: Option<MachineState>,
    trace: Vec<u64>,
    hasher: PathHasher,
    seed_count: u64,
}

impl Session {
    /// Fresh idle session.
    pub fn new() -> Self {
        Session {
            mode: TracingMode::NotStarted,
            id: 0,
            blob_addr: 0,
            blob_size: 0,
            blob_content: Vec::new(),
            state: None,
            trace: Vec::new(),
            hasher: PathHasher::new(),
            seed_count: 0,
        }
    }

    /// Current lifecycle mode.
    pub fn mode(&self) -> TracingMode {
        self.mode
    }

    /// Identity used in seed paths.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Coverage vector recorded so far.
    pub fn coverage(&self) -> &[u64] {
        &self.trace
    }

    /// Number of seeds emitted so far.
    pub fn seed_count(&self) -> u64 {
        self.seed_count
    }

    /// Begin tracing: the next block that loads `(addr, size)` into the
    /// argument registers starts the harness.
    pub fn start(&mut self, id: u64, addr: u64, size: u64) -> EngineResult<()> {
        if self.mode != TracingMode::NotStarted {
            return Err(EngineError::Session("the current session is already tracing"));
        }
        self.mode = TracingMode::Kicked;
        self.id = id;
        self.blob_addr = addr;
        self.blob_size = size;
        self.blob_content.clear();
        self.state = Some(MachineState::new());
        self.trace.clear();
        self.hasher = PathHasher::new();
        self.seed_count = 0;
        debug!(addr, size, "tracing started");
        Ok(())
    }

    /// Finish the run: fold the coverage vector into the database and reset
    /// to idle. The machine state (and with it the solver scope) is dropped
    /// here regardless of how the run went.
    pub fn reload(&mut self, coverage: &mut CoverageDb) -> EngineResult<()> {
        if self.mode == TracingMode::NotStarted {
            return Err(EngineError::Session("the current session is not tracing"));
        }
        coverage.absorb_trace(&self.trace);

        self.state = None;
        self.blob_addr = 0;
        self.blob_size = 0;
        self.blob_content.clear();
        self.trace.clear();
        self.hasher = PathHasher::new();
        self.mode = TracingMode::NotStarted;
        debug!("session reloaded");
        Ok(())
    }

    /// React to an executed block according to the current mode. Returns
    /// `true` when the block should be walked symbolically.
    pub fn observe_block(
        &mut self,
        cpu: &dyn CpuState,
        block: &IrBlock,
        harness: &HarnessLayout,
    ) -> EngineResult<bool> {
        match self.mode {
            TracingMode::NotStarted => Ok(false),
            TracingMode::Kicked => {
                self.look_for_needle(block, harness);
                Ok(false)
            }
            TracingMode::Capturing => {
                if !self.confirm_capture(cpu, harness)? {
                    return Ok(false);
                }
                self.install_symbolic_inputs(cpu, harness)?;
                self.mode = TracingMode::Running;
                debug!("target function confirmed, start tracing");
                Ok(true)
            }
            TracingMode::Running => Ok(true),
        }
    }

    /// Look backwards for the end-of-block add into the guest-PC global
    /// that marks the jump into the harness.
    fn look_for_needle(&mut self, block: &IrBlock, harness: &HarnessLayout) {
        for inst in block.insts().iter().rev() {
            match inst {
                Inst::InsnStart { .. } => break,
                Inst::BinOp {
                    op: BinAluOp::Add,
                    width: Width::W64,
                    res:
                        Temp::GlobalDirect {
                            offset, ..
                        },
                    ..
                } if *offset == harness.pc_offset => {
                    self.mode = TracingMode::Capturing;
                    debug!("about to jump to the target function");
                    return;
                }
                _ => {}
            }
        }
        // report instead of failing: a later block may still carry the jump
        error!(block = block.id(), "failed to find the needle after kickstart");
    }

    /// Check that the argument registers hold the advertised blob address
    /// and size. A mismatch is reported and the session keeps waiting.
    fn confirm_capture(
        &mut self,
        cpu: &dyn CpuState,
        harness: &HarnessLayout,
    ) -> EngineResult<bool> {
        let arg0 = cpu.host_read_u64((cpu.env_base() as i64 + harness.arg0_offset) as u64);
        let arg1 = cpu.host_read_u64((cpu.env_base() as i64 + harness.arg1_offset) as u64);
        if arg0 != self.blob_addr || arg1 != self.blob_size {
            error!(arg0, arg1, "session value mismatch");
            return Ok(false);
        }
        Ok(true)
    }

    /// Replace the argument registers with the symbolic `addr`/`size`
    /// globals and snapshot the concrete blob for later concretization.
    fn install_symbolic_inputs(
        &mut self,
        cpu: &dyn CpuState,
        harness: &HarnessLayout,
    ) -> EngineResult<()> {
        let state = self
            .state
            .as_mut()
            .ok_or(EngineError::Session("no machine state while capturing"))?;

        let addr_term = state.solver().blob_addr().clone();
        let size_term = state.solver().blob_size().clone();
        state.env_put(
            (cpu.env_base() as i64 + harness.arg0_offset) as u64,
            Expr::symbolic(Width::W64, addr_term),
        );
        state.env_put(
            (cpu.env_base() as i64 + harness.arg1_offset) as u64,
            Expr::symbolic(Width::W64, size_term),
        );

        let len = self.blob_size.min(BLOB_SIZE_MAX);
        self.blob_content = (0..len)
            .map(|k| cpu.guest_read_u8(self.blob_addr + k))
            .collect();
        Ok(())
    }

    /// Dual-mode emulation of one cached block.
    pub fn walk_block(
        &mut self,
        cpu: &dyn CpuState,
        block: &IrBlock,
        coverage: &CoverageDb,
        output_dir: &Path,
        sink: &mut TraceSink,
    ) -> EngineResult<()> {
        let mut temps = TempStore::new();
        let mut last_pc = 0u64;
        let mut cursor = 0usize;

        while cursor < block.insts().len() {
            let inst = &block.insts()[cursor];
            sink.inst(inst);
            tracing::trace!(%inst, "walk");

            match inst {
                Inst::InsnStart { pc } => last_pc = *pc,
                Inst::SetLabel { .. } => {}
                Inst::Br { label } => {
                    cursor = self.jump_target(block, *label)?;
                    continue;
                }
                Inst::Brcond {
                    cond, a, b, label, ..
                } => {
                    let taken = self.brcond(
                        cpu, &mut temps, *cond, a, b, last_pc, coverage, output_dir, sink,
                    )?;
                    if taken {
                        cursor = self.jump_target(block, *label)?;
                        continue;
                    }
                }
                _ => {
                    let state = self
                        .state
                        .as_mut()
                        .ok_or(EngineError::Session("no machine state while running"))?;
                    let mut ctx = StepCtx {
                        cpu,
                        state,
                        temps: &mut temps,
                    };
                    interpreter::step(&mut ctx, inst)?;
                }
            }
            cursor += 1;
        }
        Ok(())
    }

    fn jump_target(&self, block: &IrBlock, label: Label) -> EngineResult<usize> {
        block
            .label_target(label)
            .ok_or(EngineError::Session("branch to an unmapped label"))
    }

    /// Evaluate a conditional branch.
    ///
    /// A concrete predicate just picks the edge. A symbolic one is
    /// concretized under the current blob, recorded in the coverage vector,
    /// possibly solved for a flip seed, and asserted as a path constraint.
    #[allow(clippy::too_many_arguments)]
    fn brcond(
        &mut self,
        cpu: &dyn CpuState,
        temps: &mut TempStore,
        cond: CondCode,
        a: &Temp,
        b: &Temp,
        last_pc: u64,
        coverage: &CoverageDb,
        output_dir: &Path,
        sink: &mut TraceSink,
    ) -> EngineResult<bool> {
        let state = self
            .state
            .as_mut()
            .ok_or(EngineError::Session("no machine state while running"))?;

        let pred = {
            let mut ctx = StepCtx {
                cpu,
                state: &mut *state,
                temps,
            };
            let lhs = ctx.get_var(a)?;
            let rhs = ctx.get_var(b)?;
            expr::compare(ctx.state.solver(), cond, &lhs, &rhs)?
        };
        let term = match pred {
            Pred::Concrete(taken) => return Ok(taken),
            Pred::Symbolic(term) => term,
        };

        // the actual direction under the current input
        let actual = state.solver().concretize_bool(
            self.blob_addr,
            self.blob_size,
            &self.blob_content,
            &term,
        )?;

        sink.predicate(last_pc, actual, &term.to_string());
        debug!(pc = last_pc, actual, "symbolic predicate");

        // register the path-side coverage and derive the flip-side hash
        let item = cov_item(last_pc, actual);
        let flip_hash = self.hasher.digest_with(cov_flip(item));
        self.trace.push(item);
        self.hasher.update(item);

        if coverage.should_solve(&self.trace, flip_hash) {
            let flip = if actual {
                state.solver().bool_not(&term)
            } else {
                term.clone()
            };
            let blob = state.solver().solve_for(&flip)?;

            // seeds land in <output_dir>/<session_id>/seeds/<n>
            let dir: PathBuf = output_dir.join(self.id.to_string()).join("seeds");
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join(self.seed_count.to_string()), &blob)?;
            debug!(seed = self.seed_count, len = blob.len(), "seed persisted");
            self.seed_count += 1;
        }

        state.assert_path(&term, actual);
        Ok(actual)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
