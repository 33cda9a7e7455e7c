#![allow(clippy::unwrap_used)]

use duet_ir::{
    BinAluOp, CallIntent, CallOp, CondCode, ExtKind, HostReg, Inst, MemAlign, MemFlags, MemSize,
    Temp, UnAluOp, Width,
};
use test_case::test_case;

use super::*;
use crate::{error::EngineError, state::MachineState};

const ENV_BASE: u64 = 0x7f00_0000_0000;

struct StubCpu {
    env: Vec<u8>,
}

impl StubCpu {
    fn new() -> Self {
        StubCpu {
            env: vec![0; 0x1000],
        }
    }
}

impl CpuState for StubCpu {
    fn env_base(&self) -> u64 {
        ENV_BASE
    }

    fn fixed_reg(&self, _reg: HostReg) -> Option<u64> {
        Some(ENV_BASE)
    }

    fn host_read_u8(&self, addr: u64) -> u8 {
        self.env
            .get(addr.wrapping_sub(ENV_BASE) as usize)
            .copied()
            .unwrap_or(0)
    }

    fn guest_read_u8(&self, _vaddr: u64) -> u8 {
        0
    }
}

fn c64(value: i64) -> Temp {
    Temp::Const {
        width: Width::W64,
        value,
    }
}

fn local(index: usize) -> Temp {
    Temp::EbbLocal {
        width: Width::W64,
        index,
    }
}

/// Run instructions against fresh state and read back one local.
fn run_and_read(insts: &[Inst], result: usize) -> EngineResult<i64> {
    let cpu = StubCpu::new();
    let mut state = MachineState::new();
    let mut temps = TempStore::new();
    let mut ctx = StepCtx {
        cpu: &cpu,
        state: &mut state,
        temps: &mut temps,
    };
    for inst in insts {
        step(&mut ctx, inst)?;
    }
    Ok(ctx.get_var(&local(result))?.concrete_value().unwrap())
}

#[test_case(BinAluOp::Add, 7, 5 => 12; "add")]
#[test_case(BinAluOp::Sub, 5, 7 => -2; "sub")]
#[test_case(BinAluOp::Mul, -3, 4 => -12; "mul")]
#[test_case(BinAluOp::Div, 7, -2 => -3; "sdiv")]
#[test_case(BinAluOp::And, 0b1100, 0b1010 => 0b1000; "and")]
#[test_case(BinAluOp::Or, 0b1100, 0b1010 => 0b1110; "or")]
#[test_case(BinAluOp::Xor, 0b1100, 0b1010 => 0b0110; "xor")]
#[test_case(BinAluOp::Andc, 0b1100, 0b1010 => 0b0100; "andc")]
#[test_case(BinAluOp::Orc, 0, -1 => 0; "orc")]
#[test_case(BinAluOp::Nand, 1, 2 => -1; "nand")]
#[test_case(BinAluOp::Nor, 0, 0 => -1; "nor")]
#[test_case(BinAluOp::Eqv, 5, 5 => -1; "eqv")]
#[test_case(BinAluOp::Shl, 1, 4 => 16; "shl")]
#[test_case(BinAluOp::Shr, -1, 60 => 15; "shr")]
#[test_case(BinAluOp::Sar, -16, 2 => -4; "sar")]
fn binary_alu(op: BinAluOp, a: i64, b: i64) -> i64 {
    run_and_read(
        &[Inst::BinOp {
            op,
            width: Width::W64,
            res: local(0),
            a: c64(a),
            b: c64(b),
        }],
        0,
    )
    .unwrap()
}

#[test_case(ExtKind::U8, 0x1ff => 0xff; "zero extend byte")]
#[test_case(ExtKind::S8, 0x1ff => -1; "sign extend byte")]
#[test_case(ExtKind::U16, 0x1_ffff => 0xffff; "zero extend halfword")]
#[test_case(ExtKind::S32, 0xffff_ffff => -1; "sign extend word")]
fn extensions(kind: ExtKind, value: i64) -> i64 {
    run_and_read(
        &[Inst::Ext {
            width: Width::W64,
            kind,
            res: local(0),
            val: c64(value),
        }],
        0,
    )
    .unwrap()
}

#[test_case(UnAluOp::Neg, 5 => -5; "neg")]
#[test_case(UnAluOp::Not, 0 => -1; "not")]
fn unary_alu(op: UnAluOp, value: i64) -> i64 {
    run_and_read(
        &[Inst::UnOp {
            op,
            width: Width::W64,
            res: local(0),
            val: c64(value),
        }],
        0,
    )
    .unwrap()
}

#[test_case(CondCode::Ltu, -1, 1 => 0; "unsigned wraps")]
#[test_case(CondCode::Lt, -1, 1 => 1; "signed does not")]
#[test_case(CondCode::TstNe, 0b1100, 0b0100 => 1; "test bits")]
fn setcond_writes_flag(cond: CondCode, a: i64, b: i64) -> i64 {
    run_and_read(
        &[Inst::Setcond {
            width: Width::W64,
            cond,
            res: local(0),
            a: c64(a),
            b: c64(b),
        }],
        0,
    )
    .unwrap()
}

#[test]
fn movcond_selects() {
    let picked = run_and_read(
        &[Inst::Movcond {
            width: Width::W64,
            cond: CondCode::Gt,
            res: local(0),
            c1: c64(3),
            c2: c64(2),
            v1: c64(111),
            v2: c64(222),
        }],
        0,
    )
    .unwrap();
    assert_eq!(picked, 111);
}

#[test]
fn wide_ops_write_both_destinations() {
    let insts = [Inst::Muls2 {
        width: Width::W64,
        res_lo: local(0),
        res_hi: local(1),
        a: c64(i64::MAX),
        b: c64(i64::MAX),
    }];
    assert_eq!(run_and_read(&insts, 0).unwrap(), 1);
    let insts = [
        insts[0].clone(),
        Inst::Mov {
            width: Width::W64,
            res: local(2),
            val: local(1),
        },
    ];
    assert_eq!(run_and_read(&insts, 2).unwrap(), 4611686018427387903);
}

#[test]
fn mov_through_env_round_trips() {
    // store through a CPU-state global, then read it back
    let global = Temp::GlobalDirect {
        width: Width::W64,
        base: HostReg(14),
        offset: 0x40,
    };
    let insts = [
        Inst::Mov {
            width: Width::W64,
            res: global,
            val: c64(0x1234),
        },
        Inst::Mov {
            width: Width::W64,
            res: local(0),
            val: global,
        },
    ];
    assert_eq!(run_and_read(&insts, 0).unwrap(), 0x1234);
}

fn mem_flags(size: MemSize, signed: bool) -> MemFlags {
    MemFlags {
        size,
        signed,
        align: MemAlign::None,
    }
}

#[test]
fn guest_store_load_round_trips() {
    // byte store into an untouched cell, read back unsigned and signed
    let insts = [
        Inst::GuestSt {
            width: Width::W64,
            val: c64(0x1aa),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S8, false),
        },
        Inst::GuestLd {
            width: Width::W64,
            res: local(0),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S8, false),
        },
        Inst::GuestLd {
            width: Width::W64,
            res: local(1),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S8, true),
        },
    ];
    assert_eq!(run_and_read(&insts, 0).unwrap(), 0xaa);
    assert_eq!(run_and_read(&insts, 1).unwrap(), i64::from(0xaau8 as i8));
}

#[test]
fn narrow_guest_store_preserves_surrounding_bytes() {
    // plant a full doubleword, overwrite one byte lane, read the whole cell
    let insts = [
        Inst::GuestSt {
            width: Width::W64,
            val: c64(0x1122_3344_5566_7788),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S64, false),
        },
        Inst::GuestSt {
            width: Width::W64,
            val: c64(0xaa),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S8, false),
        },
        Inst::GuestLd {
            width: Width::W64,
            res: local(0),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S64, false),
        },
    ];
    assert_eq!(run_and_read(&insts, 0).unwrap(), 0x1122_3344_5566_77aa);

    // same shape one lane up: a halfword store into the middle of the cell
    let insts = [
        insts[0].clone(),
        Inst::GuestSt {
            width: Width::W64,
            val: c64(0xbbcc),
            addr: c64(0x6000),
            flags: mem_flags(MemSize::S16, false),
        },
        insts[2].clone(),
    ];
    assert_eq!(run_and_read(&insts, 0).unwrap(), 0x1122_3344_5566_bbcc);
}

#[test]
fn uninitialized_local_is_fatal() {
    let result = run_and_read(
        &[Inst::Mov {
            width: Width::W64,
            res: local(0),
            val: local(9),
        }],
        0,
    );
    assert!(matches!(result, Err(EngineError::UninitTemp(9))));
}

#[test]
fn unknown_helper_is_fatal_when_reached() {
    let result = run_and_read(
        &[Inst::Call(CallOp {
            intent: CallIntent::Unknown,
            helper: "syscall".to_owned(),
        })],
        0,
    );
    assert!(matches!(result, Err(EngineError::UnknownHelper(_))));
}

#[test]
fn block_exit_markers_are_inert() {
    let insts = [
        Inst::Mov {
            width: Width::W64,
            res: local(0),
            val: c64(9),
        },
        Inst::GotoTb { idx: 1 },
        Inst::ExitTb { idx: 0 },
    ];
    assert_eq!(run_and_read(&insts, 0).unwrap(), 9);
}
