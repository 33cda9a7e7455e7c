use std::collections::BTreeMap;

use crate::{
    block::{BlockId, IrBlock},
    call::{CallIntent, CallOp},
    cond::CondCode,
    error::ParseError,
    inst::{BinAluOp, EnvLdKind, EnvStKind, ExtKind, Inst, UnAluOp},
    memop::{MemFlags, MemSize},
    raw::{RawArg, RawLabel, RawOp, RawOpcode, RawTemp, RawType},
    temp::{HostReg, Label, Temp, Width},
};

/// Normalize a raw operation stream into a frozen [`IrBlock`].
///
/// This is the only place raw discriminators are consulted. The pass
/// validates temporaries, decodes memory-operation flags, checks label
/// integrity and rejects every opcode the interpreter has no model for.
pub fn parse_block(id: BlockId, ops: &[RawOp]) -> Result<IrBlock, ParseError> {
    let mut insts = Vec::with_capacity(ops.len());
    let mut labels = BTreeMap::new();
    let mut referenced = Vec::new();

    for op in ops {
        let inst = match op {
            RawOp::Call { helper, outs, ins } => parse_call(helper, outs, ins)?,
            RawOp::Op { opc, args } => parse_op(*opc, args, insts.len(), &mut labels, &mut referenced)?,
        };
        insts.push(inst);
    }

    for id in referenced {
        if !labels.contains_key(&id) {
            return Err(ParseError::UndefinedLabel(id));
        }
    }

    Ok(IrBlock::new(id, insts, labels))
}

fn parse_call(helper: &str, outs: &[RawTemp], ins: &[RawTemp]) -> Result<Inst, ParseError> {
    let outs = outs.iter().map(parse_temp).collect::<Result<Vec<_>, _>>()?;
    let ins = ins.iter().map(parse_temp).collect::<Result<Vec<_>, _>>()?;
    Ok(Inst::Call(CallOp {
        intent: CallIntent::from_helper(helper, &outs, &ins),
        helper: helper.to_owned(),
    }))
}

fn parse_op(
    opc: RawOpcode,
    args: &[RawArg],
    index: usize,
    labels: &mut BTreeMap<u16, usize>,
    referenced: &mut Vec<u16>,
) -> Result<Inst, ParseError> {
    use RawOpcode as O;

    let mut r = ArgReader { opc, args, at: 0 };

    let inst = match opc {
        O::InsnStart => Inst::InsnStart { pc: r.imm()? },
        O::ExitTb => Inst::ExitTb { idx: r.imm()? },
        O::GotoTb => Inst::GotoTb { idx: r.imm()? },
        O::GotoPtr => {
            let ptr = r.temp_of(Width::W64)?;
            Inst::GotoPtr { ptr }
        }
        O::SetLabel => {
            let label = r.label()?;
            labels.insert(label.0, index);
            Inst::SetLabel { label }
        }
        O::Br => {
            let label = r.label()?;
            referenced.push(label.0);
            Inst::Br { label }
        }

        O::MovI32 | O::MovI64 => {
            let width = opcode_width(opc);
            let res = r.temp_of(width)?;
            let val = r.temp_of(width)?;
            Inst::Mov { width, res, val }
        }

        O::Ext8sI32 | O::Ext8uI32 | O::Ext16sI32 | O::Ext16uI32 | O::Ext8sI64 | O::Ext8uI64
        | O::Ext16sI64 | O::Ext16uI64 | O::Ext32sI64 | O::Ext32uI64 => {
            let width = opcode_width(opc);
            let kind = match opc {
                O::Ext8sI32 | O::Ext8sI64 => ExtKind::S8,
                O::Ext8uI32 | O::Ext8uI64 => ExtKind::U8,
                O::Ext16sI32 | O::Ext16sI64 => ExtKind::S16,
                O::Ext16uI32 | O::Ext16uI64 => ExtKind::U16,
                O::Ext32sI64 => ExtKind::S32,
                _ => ExtKind::U32,
            };
            let res = r.temp_of(width)?;
            let val = r.temp_of(width)?;
            Inst::Ext {
                width,
                kind,
                res,
                val,
            }
        }

        O::NegI32 | O::NegI64 | O::NotI32 | O::NotI64 => {
            let width = opcode_width(opc);
            let op = match opc {
                O::NegI32 | O::NegI64 => UnAluOp::Neg,
                _ => UnAluOp::Not,
            };
            let res = r.temp_of(width)?;
            let val = r.temp_of(width)?;
            Inst::UnOp {
                op,
                width,
                res,
                val,
            }
        }

        O::Ld8uI32 | O::Ld8sI32 | O::Ld16uI32 | O::Ld16sI32 | O::LdI32 | O::Ld8uI64
        | O::Ld8sI64 | O::Ld16uI64 | O::Ld16sI64 | O::Ld32uI64 | O::Ld32sI64 | O::LdI64 => {
            let width = opcode_width(opc);
            let kind = match opc {
                O::Ld8uI32 | O::Ld8uI64 => EnvLdKind::U8,
                O::Ld8sI32 | O::Ld8sI64 => EnvLdKind::S8,
                O::Ld16uI32 | O::Ld16uI64 => EnvLdKind::U16,
                O::Ld16sI32 | O::Ld16sI64 => EnvLdKind::S16,
                O::Ld32uI64 => EnvLdKind::U32,
                O::Ld32sI64 => EnvLdKind::S32,
                _ => EnvLdKind::Full,
            };
            let res = r.temp_of(width)?;
            let addr = r.temp_of(Width::W64)?;
            let offset = r.imm()? as i64;
            Inst::EnvLd {
                width,
                kind,
                res,
                addr,
                offset,
            }
        }

        O::St8I32 | O::St16I32 | O::StI32 | O::St8I64 | O::St16I64 | O::St32I64 | O::StI64 => {
            let width = opcode_width(opc);
            let kind = match opc {
                O::St8I32 | O::St8I64 => EnvStKind::B8,
                O::St16I32 | O::St16I64 => EnvStKind::B16,
                O::St32I64 => EnvStKind::B32,
                _ => EnvStKind::Full,
            };
            let val = r.temp_of(width)?;
            let addr = r.temp_of(Width::W64)?;
            let offset = r.imm()? as i64;
            Inst::EnvSt {
                width,
                kind,
                val,
                addr,
                offset,
            }
        }

        O::QemuLdI32 | O::QemuLdI64 => {
            let width = opcode_width(opc);
            let res = r.temp_of(width)?;
            let addr = r.temp_of(Width::W64)?;
            let flags = MemFlags::from_raw(r.memop()?)?;
            check_guest_width(opc, width, flags.size)?;
            Inst::GuestLd {
                width,
                res,
                addr,
                flags,
            }
        }
        O::QemuStI32 | O::QemuStI64 => {
            let width = opcode_width(opc);
            let val = r.temp_of(width)?;
            let addr = r.temp_of(Width::W64)?;
            let flags = MemFlags::from_raw(r.memop()?)?;
            check_guest_width(opc, width, flags.size)?;
            Inst::GuestSt {
                width,
                val,
                addr,
                flags,
            }
        }

        O::AddI32 | O::AddI64 | O::SubI32 | O::SubI64 | O::MulI32 | O::MulI64 | O::DivI32
        | O::DivI64 | O::AndI32 | O::AndI64 | O::OrI32 | O::OrI64 | O::XorI32 | O::XorI64
        | O::AndcI32 | O::AndcI64 | O::OrcI32 | O::OrcI64 | O::NandI32 | O::NandI64
        | O::NorI32 | O::NorI64 | O::EqvI32 | O::EqvI64 | O::ShlI32 | O::ShlI64 | O::ShrI32
        | O::ShrI64 | O::SarI32 | O::SarI64 => {
            let width = opcode_width(opc);
            let op = bin_alu_op(opc);
            let res = r.temp_of(width)?;
            let a = r.temp_of(width)?;
            let b = r.temp_of(width)?;
            Inst::BinOp {
                op,
                width,
                res,
                a,
                b,
            }
        }

        O::SetcondI32 | O::SetcondI64 => {
            let width = opcode_width(opc);
            let res = r.temp_of(width)?;
            let a = r.temp_of(width)?;
            let b = r.temp_of(width)?;
            let cond = CondCode::try_from(r.cond()?)?;
            Inst::Setcond {
                width,
                cond,
                res,
                a,
                b,
            }
        }
        O::MovcondI32 | O::MovcondI64 => {
            let width = opcode_width(opc);
            let res = r.temp_of(width)?;
            let c1 = r.temp_of(width)?;
            let c2 = r.temp_of(width)?;
            let v1 = r.temp_of(width)?;
            let v2 = r.temp_of(width)?;
            let cond = CondCode::try_from(r.cond()?)?;
            Inst::Movcond {
                width,
                cond,
                res,
                c1,
                c2,
                v1,
                v2,
            }
        }
        O::BrcondI32 | O::BrcondI64 => {
            let width = opcode_width(opc);
            let a = r.temp_of(width)?;
            let b = r.temp_of(width)?;
            let cond = CondCode::try_from(r.cond()?)?;
            let label = r.label()?;
            referenced.push(label.0);
            Inst::Brcond {
                width,
                cond,
                a,
                b,
                label,
            }
        }

        O::Add2I32 | O::Add2I64 | O::Sub2I32 | O::Sub2I64 => {
            let width = opcode_width(opc);
            let res_lo = r.temp_of(width)?;
            let res_hi = r.temp_of(width)?;
            let a_lo = r.temp_of(width)?;
            let a_hi = r.temp_of(width)?;
            let b_lo = r.temp_of(width)?;
            let b_hi = r.temp_of(width)?;
            match opc {
                O::Add2I32 | O::Add2I64 => Inst::Add2 {
                    width,
                    res_lo,
                    res_hi,
                    a_lo,
                    a_hi,
                    b_lo,
                    b_hi,
                },
                _ => Inst::Sub2 {
                    width,
                    res_lo,
                    res_hi,
                    a_lo,
                    a_hi,
                    b_lo,
                    b_hi,
                },
            }
        }
        O::Muls2I32 | O::Muls2I64 => {
            let width = opcode_width(opc);
            let res_lo = r.temp_of(width)?;
            let res_hi = r.temp_of(width)?;
            let a = r.temp_of(width)?;
            let b = r.temp_of(width)?;
            Inst::Muls2 {
                width,
                res_lo,
                res_hi,
                a,
                b,
            }
        }

        O::MulshI32 | O::MulshI64 | O::MuluhI32 | O::MuluhI64 | O::Mulu2I32 | O::Mulu2I64
        | O::DivuI32 | O::DivuI64 | O::RemI32 | O::RemI64 | O::RemuI32 | O::RemuI64
        | O::RotlI32 | O::RotlI64 | O::RotrI32 | O::RotrI64 | O::Setcond2I32 | O::QemuLdA32
        | O::QemuStA32 | O::QemuLdI128 | O::QemuStI128 | O::PluginCb | O::PluginMemCb => {
            return Err(ParseError::UnsupportedOpcode(opc))
        }
    };

    r.finish()?;
    Ok(inst)
}

/// Operand width implied by an opcode's `I32`/`I64` suffix.
fn opcode_width(opc: RawOpcode) -> Width {
    use RawOpcode as O;
    match opc {
        O::MovI32 | O::Ext8sI32 | O::Ext8uI32 | O::Ext16sI32 | O::Ext16uI32 | O::NegI32
        | O::NotI32 | O::Ld8uI32 | O::Ld8sI32 | O::Ld16uI32 | O::Ld16sI32 | O::LdI32
        | O::St8I32 | O::St16I32 | O::StI32 | O::QemuLdI32 | O::QemuStI32 | O::AddI32
        | O::SubI32 | O::MulI32 | O::DivI32 | O::AndI32 | O::OrI32 | O::XorI32 | O::AndcI32
        | O::OrcI32 | O::NandI32 | O::NorI32 | O::EqvI32 | O::ShlI32 | O::ShrI32 | O::SarI32
        | O::SetcondI32 | O::MovcondI32 | O::BrcondI32 | O::Add2I32 | O::Sub2I32
        | O::Muls2I32 => Width::W32,
        _ => Width::W64,
    }
}

fn bin_alu_op(opc: RawOpcode) -> BinAluOp {
    use RawOpcode as O;
    match opc {
        O::AddI32 | O::AddI64 => BinAluOp::Add,
        O::SubI32 | O::SubI64 => BinAluOp::Sub,
        O::MulI32 | O::MulI64 => BinAluOp::Mul,
        O::DivI32 | O::DivI64 => BinAluOp::Div,
        O::AndI32 | O::AndI64 => BinAluOp::And,
        O::OrI32 | O::OrI64 => BinAluOp::Or,
        O::XorI32 | O::XorI64 => BinAluOp::Xor,
        O::AndcI32 | O::AndcI64 => BinAluOp::Andc,
        O::OrcI32 | O::OrcI64 => BinAluOp::Orc,
        O::NandI32 | O::NandI64 => BinAluOp::Nand,
        O::NorI32 | O::NorI64 => BinAluOp::Nor,
        O::EqvI32 | O::EqvI64 => BinAluOp::Eqv,
        O::ShlI32 | O::ShlI64 => BinAluOp::Shl,
        O::ShrI32 | O::ShrI64 => BinAluOp::Shr,
        O::SarI32 | O::SarI64 => BinAluOp::Sar,
        _ => unreachable!("not a binary ALU opcode: {opc:?}"),
    }
}

/// A 64-bit guest access cannot feed a 32-bit destination and vice versa.
fn check_guest_width(opc: RawOpcode, width: Width, size: MemSize) -> Result<(), ParseError> {
    if size.bits() > width.bits() {
        return Err(ParseError::WidthMismatch(opc));
    }
    Ok(())
}

/// Normalize one raw temporary record.
pub(crate) fn parse_temp(raw: &RawTemp) -> Result<Temp, ParseError> {
    match raw {
        RawTemp::Const { ty, value } => Ok(Temp::Const {
            width: scalar_width(*ty)?,
            value: *value,
        }),
        RawTemp::Fixed { ty, reg } => Ok(Temp::Fixed {
            width: scalar_width(*ty)?,
            reg: HostReg(*reg),
        }),
        RawTemp::Global {
            ty,
            base,
            offset,
            indirect_offset,
        } => {
            let width = scalar_width(*ty)?;
            let base = HostReg(*base);
            Ok(match indirect_offset {
                None => Temp::GlobalDirect {
                    width,
                    base,
                    offset: *offset,
                },
                Some(offset2) => Temp::GlobalIndirect {
                    width,
                    base,
                    offset1: *offset,
                    offset2: *offset2,
                },
            })
        }
        RawTemp::Local {
            ty,
            base_ty,
            sub_index,
            scope,
            index,
        } => {
            reject_vector(*base_ty)?;
            // 128-bit values are lowered as paired 64-bit halves
            match base_ty {
                RawType::I128 => {
                    if *ty != RawType::I64 || *sub_index > 1 {
                        return Err(ParseError::MalformedTemp(format!(
                            "bad 128-bit half: part {ty:?}, sub-index {sub_index}"
                        )));
                    }
                }
                _ => {
                    if ty != base_ty || *sub_index != 0 {
                        return Err(ParseError::MalformedTemp(format!(
                            "part type {ty:?} disagrees with base type {base_ty:?}"
                        )));
                    }
                }
            }
            let width = scalar_width(*ty)?;
            Ok(match scope {
                crate::raw::RawScope::Tb => Temp::TbLocal {
                    width,
                    index: *index,
                },
                crate::raw::RawScope::Ebb => Temp::EbbLocal {
                    width,
                    index: *index,
                },
            })
        }
    }
}

fn reject_vector(ty: RawType) -> Result<(), ParseError> {
    match ty {
        RawType::V64 | RawType::V128 | RawType::V256 => Err(ParseError::VectorOperand(ty)),
        _ => Ok(()),
    }
}

fn scalar_width(ty: RawType) -> Result<Width, ParseError> {
    match ty {
        RawType::I32 => Ok(Width::W32),
        RawType::I64 => Ok(Width::W64),
        RawType::I128 => Err(ParseError::MalformedTemp(
            "128-bit record outside a paired half".to_owned(),
        )),
        RawType::V64 | RawType::V128 | RawType::V256 => Err(ParseError::VectorOperand(ty)),
    }
}

struct ArgReader<'a> {
    opc: RawOpcode,
    args: &'a [RawArg],
    at: usize,
}

impl<'a> ArgReader<'a> {
    fn next(&mut self) -> Result<&'a RawArg, ParseError> {
        let arg = self.args.get(self.at).ok_or(ParseError::BadArity {
            opc: self.opc,
            expected: self.at + 1,
            got: self.args.len(),
        })?;
        self.at += 1;
        Ok(arg)
    }

    fn temp(&mut self) -> Result<Temp, ParseError> {
        match self.next()? {
            RawArg::Temp(raw) => parse_temp(raw),
            _ => Err(ParseError::BadOperand(self.opc)),
        }
    }

    fn temp_of(&mut self, width: Width) -> Result<Temp, ParseError> {
        let temp = self.temp()?;
        if temp.width() != width {
            return Err(ParseError::WidthMismatch(self.opc));
        }
        Ok(temp)
    }

    fn label(&mut self) -> Result<Label, ParseError> {
        match self.next()? {
            RawArg::Label(raw) => parse_label(raw),
            _ => Err(ParseError::BadOperand(self.opc)),
        }
    }

    fn imm(&mut self) -> Result<u64, ParseError> {
        match self.next()? {
            RawArg::Imm(v) => Ok(*v),
            _ => Err(ParseError::BadOperand(self.opc)),
        }
    }

    fn cond(&mut self) -> Result<u32, ParseError> {
        match self.next()? {
            RawArg::Cond(v) => Ok(*v),
            _ => Err(ParseError::BadOperand(self.opc)),
        }
    }

    fn memop(&mut self) -> Result<u32, ParseError> {
        match self.next()? {
            RawArg::MemOp(v) => Ok(*v),
            _ => Err(ParseError::BadOperand(self.opc)),
        }
    }

    fn finish(&self) -> Result<(), ParseError> {
        if self.at != self.args.len() {
            return Err(ParseError::BadArity {
                opc: self.opc,
                expected: self.at,
                got: self.args.len(),
            });
        }
        Ok(())
    }
}

fn parse_label(raw: &RawLabel) -> Result<Label, ParseError> {
    if !raw.present {
        return Err(ParseError::UndefinedLabel(raw.id));
    }
    if raw.pending_relocs != 0 {
        return Err(ParseError::PendingRelocation(raw.id));
    }
    Ok(Label(raw.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawScope;

    fn c64(value: i64) -> RawArg {
        RawArg::Temp(RawTemp::Const {
            ty: RawType::I64,
            value,
        })
    }

    fn local64(index: usize) -> RawArg {
        RawArg::Temp(RawTemp::Local {
            ty: RawType::I64,
            base_ty: RawType::I64,
            sub_index: 0,
            scope: RawScope::Ebb,
            index,
        })
    }

    #[test]
    fn parses_straight_line_block() {
        let ops = vec![
            RawOp::Op {
                opc: RawOpcode::InsnStart,
                args: vec![RawArg::Imm(0x40_1000)],
            },
            RawOp::Op {
                opc: RawOpcode::AddI64,
                args: vec![local64(3), c64(1), c64(2)],
            },
            RawOp::Op {
                opc: RawOpcode::ExitTb,
                args: vec![RawArg::Imm(0)],
            },
        ];
        let block = parse_block(7, &ops).unwrap();
        assert_eq!(block.id(), 7);
        assert_eq!(block.insts().len(), 3);
        assert!(matches!(
            block.insts()[1],
            Inst::BinOp {
                op: BinAluOp::Add,
                width: Width::W64,
                ..
            }
        ));
    }

    #[test]
    fn label_map_resolves_branch_targets() {
        let ops = vec![
            RawOp::Op {
                opc: RawOpcode::BrcondI64,
                args: vec![
                    local64(0),
                    c64(0),
                    RawArg::Cond(CondCode::Eq as u32),
                    RawArg::Label(RawLabel::resolved(1)),
                ],
            },
            RawOp::Op {
                opc: RawOpcode::MovI64,
                args: vec![local64(1), c64(5)],
            },
            RawOp::Op {
                opc: RawOpcode::SetLabel,
                args: vec![RawArg::Label(RawLabel::resolved(1))],
            },
        ];
        let block = parse_block(1, &ops).unwrap();
        assert_eq!(block.label_target(Label(1)), Some(2));
        assert_eq!(block.label_target(Label(9)), None);
    }

    #[test]
    fn missing_label_definition_is_fatal() {
        let ops = vec![RawOp::Op {
            opc: RawOpcode::Br,
            args: vec![RawArg::Label(RawLabel::resolved(4))],
        }];
        assert_eq!(parse_block(1, &ops), Err(ParseError::UndefinedLabel(4)));
    }

    #[test]
    fn pending_relocation_is_fatal() {
        let ops = vec![RawOp::Op {
            opc: RawOpcode::SetLabel,
            args: vec![RawArg::Label(RawLabel {
                id: 2,
                present: true,
                pending_relocs: 1,
            })],
        }];
        assert_eq!(parse_block(1, &ops), Err(ParseError::PendingRelocation(2)));
    }

    #[test]
    fn unsupported_opcode_is_fatal() {
        let ops = vec![RawOp::Op {
            opc: RawOpcode::MulshI64,
            args: vec![local64(0), c64(1), c64(2)],
        }];
        assert_eq!(
            parse_block(1, &ops),
            Err(ParseError::UnsupportedOpcode(RawOpcode::MulshI64))
        );
    }

    #[test]
    fn vector_operand_is_fatal() {
        let ops = vec![RawOp::Op {
            opc: RawOpcode::MovI64,
            args: vec![
                local64(0),
                RawArg::Temp(RawTemp::Const {
                    ty: RawType::V128,
                    value: 0,
                }),
            ],
        }];
        assert_eq!(
            parse_block(1, &ops),
            Err(ParseError::VectorOperand(RawType::V128))
        );
    }

    #[test]
    fn width_mismatch_is_fatal() {
        let ops = vec![RawOp::Op {
            opc: RawOpcode::AddI32,
            args: vec![local64(0), c64(1), c64(2)],
        }];
        assert_eq!(
            parse_block(1, &ops),
            Err(ParseError::WidthMismatch(RawOpcode::AddI32))
        );
    }

    #[test]
    fn guest_access_wider_than_destination_is_fatal() {
        let ops = vec![RawOp::Op {
            opc: RawOpcode::QemuLdI32,
            args: vec![
                RawArg::Temp(RawTemp::Local {
                    ty: RawType::I32,
                    base_ty: RawType::I32,
                    sub_index: 0,
                    scope: RawScope::Ebb,
                    index: 0,
                }),
                local64(1),
                RawArg::MemOp(0b11), // 64-bit access
            ],
        }];
        assert_eq!(
            parse_block(1, &ops),
            Err(ParseError::WidthMismatch(RawOpcode::QemuLdI32))
        );
    }

    #[test]
    fn paired_128_bit_halves_are_accepted() {
        let half = |sub_index| {
            RawArg::Temp(RawTemp::Local {
                ty: RawType::I64,
                base_ty: RawType::I128,
                sub_index,
                scope: RawScope::Tb,
                index: 10 + sub_index as usize,
            })
        };
        let ops = vec![RawOp::Op {
            opc: RawOpcode::Muls2I64,
            args: vec![half(0), half(1), c64(3), c64(5)],
        }];
        let block = parse_block(1, &ops).unwrap();
        assert!(matches!(block.insts()[0], Inst::Muls2 { .. }));
    }

    #[test]
    fn unknown_helper_parses_to_unknown_intent() {
        let ops = vec![RawOp::Call {
            helper: "syscall".to_owned(),
            outs: vec![],
            ins: vec![],
        }];
        let block = parse_block(1, &ops).unwrap();
        match &block.insts()[0] {
            Inst::Call(call) => assert_eq!(call.intent, CallIntent::Unknown),
            other => panic!("expected call, got {other:?}"),
        }
    }
}
