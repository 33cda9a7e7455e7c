//! The concolic machine state.
//!
//! Two sparse cell maps back the state: the env map shadows the emulator's
//! CPU-state region (keyed by host address) and the mem map shadows guest
//! memory (keyed by guest virtual address). Both hold only the cells the
//! interpreter has touched; an untouched cell reads through to the
//! emulator's concrete value via [`CpuState`]. Cells are stored at 32/64-bit
//! granularity so symbolic values are never split into bytes accidentally;
//! sub-word accesses are synthesized by the expression algebra on top of
//! whole-word get/put.

use std::collections::BTreeMap;

use duet_ir::{HostReg, MemFlags, Width};

use crate::{
    consts::{BLOB_SIZE_MAX, ENV_WINDOW},
    error::{EngineError, EngineResult},
    expr::Expr,
    solver::{BoolTerm, Prove, SmtSolver, Term},
};

/// The emulator's view of concrete machine state.
///
/// Offsets and addresses are opaque to the engine; it only ever reads
/// through this trait, never writes. The multi-byte readers default to
/// little-endian assembly of byte reads, matching the only guest byte order
/// the engine supports.
pub trait CpuState {
    /// Host address of the CPU-state region.
    fn env_base(&self) -> u64;

    /// Current value of a fixed host register, if the emulator pins one.
    fn fixed_reg(&self, reg: HostReg) -> Option<u64>;

    /// One byte of host memory inside the CPU-state envelope.
    fn host_read_u8(&self, addr: u64) -> u8;

    /// One byte of guest memory.
    fn guest_read_u8(&self, vaddr: u64) -> u8;

    /// Little-endian halfword of host memory.
    fn host_read_u16(&self, addr: u64) -> u16 {
        u16::from_le_bytes([self.host_read_u8(addr), self.host_read_u8(addr + 1)])
    }

    /// Little-endian word of host memory.
    fn host_read_u32(&self, addr: u64) -> u32 {
        u32::from_le_bytes([
            self.host_read_u8(addr),
            self.host_read_u8(addr + 1),
            self.host_read_u8(addr + 2),
            self.host_read_u8(addr + 3),
        ])
    }

    /// Little-endian doubleword of host memory.
    fn host_read_u64(&self, addr: u64) -> u64 {
        u64::from(self.host_read_u32(addr)) | (u64::from(self.host_read_u32(addr + 4)) << 32)
    }

    /// Little-endian halfword of guest memory.
    fn guest_read_u16(&self, vaddr: u64) -> u16 {
        u16::from_le_bytes([self.guest_read_u8(vaddr), self.guest_read_u8(vaddr + 1)])
    }

    /// Little-endian word of guest memory.
    fn guest_read_u32(&self, vaddr: u64) -> u32 {
        u32::from_le_bytes([
            self.guest_read_u8(vaddr),
            self.guest_read_u8(vaddr + 1),
            self.guest_read_u8(vaddr + 2),
            self.guest_read_u8(vaddr + 3),
        ])
    }

    /// Little-endian doubleword of guest memory.
    fn guest_read_u64(&self, vaddr: u64) -> u64 {
        u64::from(self.guest_read_u32(vaddr)) | (u64::from(self.guest_read_u32(vaddr + 4)) << 32)
    }
}

/// Which side of the machine a cell map shadows.
#[derive(Clone, Copy)]
enum Side {
    Env,
    Mem,
}

/// The dual-mode store of one session.
#[derive(Debug)]
pub struct MachineState {
    solver: SmtSolver,
    env: BTreeMap<u64, Expr>,
    mem: BTreeMap<u64, Expr>,
}

impl MachineState {
    /// Fresh state over a fresh solver context.
    pub fn new() -> Self {
        MachineState {
            solver: SmtSolver::new(),
            env: BTreeMap::new(),
            mem: BTreeMap::new(),
        }
    }

    /// The session's solver handle.
    pub fn solver(&self) -> &SmtSolver {
        &self.solver
    }

    /// Add one side of an evaluated branch predicate to the constraint set.
    pub fn assert_path(&self, pred: &BoolTerm, holds: bool) {
        if holds {
            self.solver.assert(pred);
        } else {
            self.solver.assert(&self.solver.bool_not(pred));
        }
    }

    // -- env side ------------------------------------------------------------

    /// Resolve `base + offset` into a concrete host address inside the
    /// CPU-state envelope.
    pub fn env_index(&self, cpu: &dyn CpuState, base: &Expr, offset: i64) -> EngineResult<u64> {
        base.expect_width(Width::W64)?;
        let base = base
            .concrete_value()
            .ok_or(EngineError::SymbolicHostAddress)?;
        let addr = base.wrapping_add(offset) as u64;

        let diff = addr.wrapping_sub(cpu.env_base()) as i64;
        if diff <= -(ENV_WINDOW as i64) || diff >= ENV_WINDOW as i64 {
            return Err(EngineError::HostAddressOutOfBound(diff));
        }
        Ok(addr)
    }

    /// Whole-word read of the CPU-state region.
    pub fn env_get(&self, cpu: &dyn CpuState, addr: u64, width: Width) -> EngineResult<Expr> {
        self.cell_get(Side::Env, cpu, addr, width)
    }

    /// Whole-word write of the CPU-state region.
    pub fn env_put(&mut self, addr: u64, value: Expr) {
        self.cell_put(Side::Env, addr, value)
    }

    // -- mem side ------------------------------------------------------------

    /// Validate a guest access against its flags.
    ///
    /// Concrete addresses get an arithmetic alignment check. For symbolic
    /// addresses the path constraints must prove the blob-relative offset
    /// non-negative, below `BLOB_SIZE_MAX` and aligned; anything the solver
    /// cannot prove is fatal.
    pub fn check_guest_access(&self, flags: MemFlags, addr: &Expr) -> EngineResult<()> {
        let align = flags.align_bytes();
        match addr.concrete_value() {
            Some(concrete) => {
                let concrete = concrete as u64;
                if concrete % align != 0 {
                    return Err(EngineError::UnalignedGuestAccess {
                        addr: concrete,
                        align,
                    });
                }
            }
            None => {
                let solver = &self.solver;
                let offset = solver.bv_sub(&addr.to_term(solver), solver.blob_addr());
                let zero = solver.value(Width::W64, 0);

                self.require_proved(
                    solver.bv_uge(&offset, &zero),
                    "offset below the blob base",
                )?;
                self.require_proved(
                    solver.bv_ult(&offset, &solver.value(Width::W64, BLOB_SIZE_MAX as i64)),
                    "offset beyond the blob bound",
                )?;
                if align != 1 {
                    let rem = solver.bv_urem(&offset, &solver.value(Width::W64, align as i64));
                    self.require_proved(
                        solver.bv_eq(&rem, &zero),
                        "misaligned symbolic offset",
                    )?;
                }
            }
        }
        Ok(())
    }

    fn require_proved(&self, prop: BoolTerm, claim: &'static str) -> EngineResult<()> {
        match self.solver.prove(&prop) {
            Prove::Proved => Ok(()),
            Prove::Refuted => Err(EngineError::SymbolicGuestAccess(claim)),
            Prove::Unknown => Err(EngineError::Solver("unknown on a guest access proof")),
        }
    }

    /// Whole-word read of guest memory at a concrete address.
    pub fn mem_get(&self, cpu: &dyn CpuState, vaddr: u64, width: Width) -> EngineResult<Expr> {
        self.cell_get(Side::Mem, cpu, vaddr, width)
    }

    /// Whole-word write of guest memory at a concrete address.
    pub fn mem_put(&mut self, vaddr: u64, value: Expr) {
        self.cell_put(Side::Mem, vaddr, value)
    }

    /// Guest read through a symbolic address: a whole word is assembled
    /// little-endian from the blob array at `addr - blob_addr` and probed.
    /// Sub-word extraction and extension happen afterwards in the transfer
    /// function, exactly as for concrete reads.
    pub fn mem_get_symbolic(&self, addr: &Term, width: Width) -> EngineResult<Expr> {
        let solver = &self.solver;
        let offset = solver.bv_sub(addr, solver.blob_addr());

        let mut assembled: Option<Term> = None;
        for k in 0..width.bytes() {
            let index = solver.bv_add(&offset, &solver.value(Width::W64, k as i64));
            let byte = solver.blob_byte(&index)?;
            assembled = Some(match assembled {
                // later bytes are more significant
                Some(low) => solver.concat(&byte, &low),
                None => byte,
            });
        }
        let term = assembled.ok_or(EngineError::Solver("zero-sized guest access"))?;
        crate::expr::collapse(solver, width, term)
    }

    // -- cell plumbing -------------------------------------------------------

    fn fallback32(&self, side: Side, cpu: &dyn CpuState, addr: u64) -> Expr {
        match side {
            Side::Env => Expr::C32(cpu.host_read_u32(addr) as i32),
            Side::Mem => Expr::C32(cpu.guest_read_u32(addr) as i32),
        }
    }

    fn fallback64(&self, side: Side, cpu: &dyn CpuState, addr: u64) -> Expr {
        match side {
            Side::Env => Expr::C64(cpu.host_read_u64(addr) as i64),
            Side::Mem => Expr::C64(cpu.guest_read_u64(addr) as i64),
        }
    }

    fn map(&self, side: Side) -> &BTreeMap<u64, Expr> {
        match side {
            Side::Env => &self.env,
            Side::Mem => &self.mem,
        }
    }

    fn map_mut(&mut self, side: Side) -> &mut BTreeMap<u64, Expr> {
        match side {
            Side::Env => &mut self.env,
            Side::Mem => &mut self.mem,
        }
    }

    fn cell_get(
        &self,
        side: Side,
        cpu: &dyn CpuState,
        addr: u64,
        width: Width,
    ) -> EngineResult<Expr> {
        match width {
            Width::W32 => Ok(self.get32(side, cpu, addr)),
            Width::W64 => Ok(self.get64(side, cpu, addr)),
        }
    }

    fn get32(&self, side: Side, cpu: &dyn CpuState, addr: u64) -> Expr {
        let map = self.map(side);
        if let Some(cell) = map.get(&addr) {
            return match cell.width() {
                Width::W32 => cell.clone(),
                Width::W64 => narrow_low(&self.solver, cell),
            };
        }
        // a doubleword cell four bytes below covers this word
        if let Some(cell) = map.get(&addr.wrapping_sub(4)) {
            if cell.width() == Width::W64 {
                return narrow_high(&self.solver, cell);
            }
        }
        self.fallback32(side, cpu, addr)
    }

    fn get64(&self, side: Side, cpu: &dyn CpuState, addr: u64) -> Expr {
        if let Some(cell) = self.map(side).get(&addr) {
            if cell.width() == Width::W64 {
                return cell.clone();
            }
        }
        if self.has_overlap(side, addr) {
            let low = self.get32(side, cpu, addr);
            let high = self.get32(side, cpu, addr + 4);
            join_halves(&self.solver, &high, &low)
        } else {
            self.fallback64(side, cpu, addr)
        }
    }

    fn has_overlap(&self, side: Side, addr: u64) -> bool {
        let from = addr.saturating_sub(7);
        self.map(side)
            .range(from..addr + 8)
            .any(|(base, cell)| base + cell.width().bytes() > addr)
    }

    fn cell_put(&mut self, side: Side, addr: u64, value: Expr) {
        match value.width() {
            Width::W32 => {
                // split a covering doubleword so its other half survives
                if let Some(cell) = self.map(side).get(&addr).cloned() {
                    if cell.width() == Width::W64 {
                        let high = narrow_high(&self.solver, &cell);
                        self.map_mut(side).insert(addr + 4, high);
                    }
                }
                if let Some(cell) = self.map(side).get(&addr.wrapping_sub(4)).cloned() {
                    if cell.width() == Width::W64 {
                        let low = narrow_low(&self.solver, &cell);
                        self.map_mut(side).insert(addr.wrapping_sub(4), low);
                    }
                }
                self.map_mut(side).insert(addr, value);
            }
            Width::W64 => {
                // the new doubleword shadows any word in its upper half
                self.map_mut(side).remove(&(addr + 4));
                if let Some(cell) = self.map(side).get(&addr.wrapping_sub(4)).cloned() {
                    if cell.width() == Width::W64 {
                        let low = narrow_low(&self.solver, &cell);
                        self.map_mut(side).insert(addr.wrapping_sub(4), low);
                    }
                }
                self.map_mut(side).insert(addr, value);
            }
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

fn narrow_low(solver: &SmtSolver, cell: &Expr) -> Expr {
    match cell {
        Expr::C64(v) => Expr::C32(*v as i32),
        Expr::S64(term) => Expr::S32(solver.extract_low(term)),
        other => other.clone(),
    }
}

fn narrow_high(solver: &SmtSolver, cell: &Expr) -> Expr {
    match cell {
        Expr::C64(v) => Expr::C32((*v >> 32) as i32),
        Expr::S64(term) => Expr::S32(solver.extract_high(term)),
        other => other.clone(),
    }
}

fn join_halves(solver: &SmtSolver, high: &Expr, low: &Expr) -> Expr {
    match (high, low) {
        (Expr::C32(h), Expr::C32(l)) => {
            Expr::C64((((*h as u32 as u64) << 32) | (*l as u32 as u64)) as i64)
        }
        _ => Expr::S64(solver.concat(&high.to_term(solver), &low.to_term(solver))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_ir::{MemAlign, MemSize};

    /// A flat stand-in for the emulator's CPU-state region and guest memory.
    pub(crate) struct TestCpu {
        pub env_base: u64,
        pub env: Vec<u8>,
        pub guest_base: u64,
        pub guest: Vec<u8>,
    }

    impl TestCpu {
        pub fn new() -> Self {
            TestCpu {
                env_base: 0x7f00_0000_0000,
                env: vec![0; 0x1000],
                guest_base: 0x5000,
                guest: vec![0; 0x1000],
            }
        }
    }

    impl CpuState for TestCpu {
        fn env_base(&self) -> u64 {
            self.env_base
        }

        fn fixed_reg(&self, _reg: duet_ir::HostReg) -> Option<u64> {
            Some(self.env_base)
        }

        fn host_read_u8(&self, addr: u64) -> u8 {
            self.env
                .get(addr.wrapping_sub(self.env_base) as usize)
                .copied()
                .unwrap_or(0)
        }

        fn guest_read_u8(&self, vaddr: u64) -> u8 {
            self.guest
                .get(vaddr.wrapping_sub(self.guest_base) as usize)
                .copied()
                .unwrap_or(0)
        }
    }

    fn flags(size: MemSize, align: MemAlign) -> MemFlags {
        MemFlags {
            size,
            signed: false,
            align,
        }
    }

    #[test]
    fn store_load_round_trip_both_widths() {
        let cpu = TestCpu::new();
        let mut state = MachineState::new();
        let addr = cpu.env_base + 0x40;

        state.env_put(addr, Expr::C64(0x1122_3344_5566_7788));
        let got = state.env_get(&cpu, addr, Width::W64).unwrap();
        assert_eq!(got.concrete_value(), Some(0x1122_3344_5566_7788));

        state.mem_put(0x6000, Expr::C32(-5));
        let got = state.mem_get(&cpu, 0x6000, Width::W32).unwrap();
        assert_eq!(got.concrete_value(), Some(-5));
    }

    #[test]
    fn untouched_cells_fall_back_to_concrete_state() {
        let mut cpu = TestCpu::new();
        cpu.env[0x10..0x18].copy_from_slice(&0xdead_beefu64.to_le_bytes());
        cpu.guest[0x20..0x24].copy_from_slice(&0xc0ffeeu32.to_le_bytes());

        let state = MachineState::new();
        let got = state
            .env_get(&cpu, cpu.env_base + 0x10, Width::W64)
            .unwrap();
        assert_eq!(got.concrete_value(), Some(0xdead_beef));

        let got = state
            .mem_get(&cpu, cpu.guest_base + 0x20, Width::W32)
            .unwrap();
        assert_eq!(got.concrete_value(), Some(0xc0ffee));
    }

    #[test]
    fn disjoint_windows_do_not_perturb_each_other() {
        let cpu = TestCpu::new();
        let mut state = MachineState::new();

        state.mem_put(0x6000, Expr::C64(0x1111_1111_1111_1111));
        state.mem_put(0x6008, Expr::C64(0x2222_2222_2222_2222));
        assert_eq!(
            state
                .mem_get(&cpu, 0x6000, Width::W64)
                .unwrap()
                .concrete_value(),
            Some(0x1111_1111_1111_1111)
        );
        assert_eq!(
            state
                .mem_get(&cpu, 0x6008, Width::W64)
                .unwrap()
                .concrete_value(),
            Some(0x2222_2222_2222_2222)
        );
    }

    #[test]
    fn word_read_of_a_doubleword_cell_takes_the_right_half() {
        let cpu = TestCpu::new();
        let mut state = MachineState::new();
        let addr = cpu.env_base + 0x80;

        state.env_put(addr, Expr::C64(0x1122_3344_5566_7788));
        let low = state.env_get(&cpu, addr, Width::W32).unwrap();
        assert_eq!(low.concrete_value(), Some(0x5566_7788));
        let high = state.env_get(&cpu, addr + 4, Width::W32).unwrap();
        assert_eq!(high.concrete_value(), Some(0x1122_3344));
    }

    #[test]
    fn word_write_into_a_doubleword_cell_preserves_the_other_half() {
        let cpu = TestCpu::new();
        let mut state = MachineState::new();
        let addr = cpu.env_base + 0x80;

        state.env_put(addr, Expr::C64(0x1122_3344_5566_7788u64 as i64));
        state.env_put(addr, Expr::C32(0x9999_0000u32 as i32));
        let whole = state.env_get(&cpu, addr, Width::W64).unwrap();
        assert_eq!(
            whole.concrete_value(),
            Some(0x1122_3344_9999_0000u64 as i64)
        );
    }

    #[test]
    fn symbolic_cells_survive_width_changes() {
        let cpu = TestCpu::new();
        let mut state = MachineState::new();
        let addr = cpu.env_base + 0x100;

        let x = state.solver().fresh_var(Width::W64);
        state.env_put(addr, Expr::S64(x.clone()));
        state
            .solver()
            .assert(&state.solver().bv_eq(&x, &state.solver().value(Width::W64, 0xabcd_1234)));

        let low = state.env_get(&cpu, addr, Width::W32).unwrap();
        // the probe on read does not run; force it through the solver
        match low {
            Expr::C32(v) => assert_eq!(v, 0xabcd_1234u32 as i32),
            Expr::S32(term) => {
                assert_eq!(state.solver().probe_bv32(&term).unwrap(), Some(0xabcd_1234));
            }
            other => panic!("unexpected width: {other:?}"),
        }
    }

    #[test]
    fn env_index_rejects_out_of_envelope_addresses() {
        let cpu = TestCpu::new();
        let state = MachineState::new();
        let base = Expr::C64(cpu.env_base as i64);

        assert!(state.env_index(&cpu, &base, 0x100).is_ok());
        assert!(matches!(
            state.env_index(&cpu, &base, crate::consts::ENV_WINDOW as i64),
            Err(EngineError::HostAddressOutOfBound(_))
        ));
        assert!(matches!(
            state.env_index(&cpu, &base, -(crate::consts::ENV_WINDOW as i64)),
            Err(EngineError::HostAddressOutOfBound(_))
        ));
    }

    #[test]
    fn env_index_rejects_symbolic_addresses() {
        let cpu = TestCpu::new();
        let state = MachineState::new();
        let base = Expr::S64(state.solver().fresh_var(Width::W64));
        assert!(matches!(
            state.env_index(&cpu, &base, 0),
            Err(EngineError::SymbolicHostAddress)
        ));
    }

    #[test]
    fn concrete_unaligned_access_is_fatal() {
        let state = MachineState::new();
        let addr = Expr::C64(0x6001);
        assert!(matches!(
            state.check_guest_access(flags(MemSize::S32, MemAlign::Natural), &addr),
            Err(EngineError::UnalignedGuestAccess { .. })
        ));
        assert!(state
            .check_guest_access(flags(MemSize::S32, MemAlign::None), &addr)
            .is_ok());
    }

    #[test]
    fn symbolic_access_requires_provable_bounds() {
        let state = MachineState::new();
        let solver = state.solver();

        // addr = blob_addr + 2: offset provably in range
        let addr = Expr::S64(solver.bv_add(solver.blob_addr(), &solver.value(Width::W64, 2)));
        assert!(state
            .check_guest_access(flags(MemSize::S8, MemAlign::None), &addr)
            .is_ok());

        // addr = blob_addr + BLOB_SIZE_MAX: provably out of range
        let addr = Expr::S64(solver.bv_add(
            solver.blob_addr(),
            &solver.value(Width::W64, BLOB_SIZE_MAX as i64),
        ));
        assert!(matches!(
            state.check_guest_access(flags(MemSize::S8, MemAlign::None), &addr),
            Err(EngineError::SymbolicGuestAccess(_))
        ));

        // a free symbolic address proves nothing
        let addr = Expr::S64(solver.fresh_var(Width::W64));
        assert!(state
            .check_guest_access(flags(MemSize::S8, MemAlign::None), &addr)
            .is_err());
    }

    #[test]
    fn symbolic_guest_load_reads_the_blob_little_endian() {
        let state = MachineState::new();
        let solver = state.solver();

        let addr = solver.bv_add(solver.blob_addr(), &solver.value(Width::W64, 2));
        let loaded = state.mem_get_symbolic(&addr, Width::W32).unwrap();

        // under blob "ABCDEF" the word at offset 2 is 'C' 'D' 'E' 'F'
        let expected = u32::from_le_bytes(*b"CDEF");
        let pred = solver.bv_eq(
            &loaded.to_term(solver),
            &solver.value(Width::W32, i64::from(expected)),
        );
        assert!(solver
            .concretize_bool(0x5000, 6, b"ABCDEF", &pred)
            .unwrap());
    }
}
