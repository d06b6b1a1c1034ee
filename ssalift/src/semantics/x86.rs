//! Reference x86-64 handlers
//!
//! Covers integer ALU operations with flags, register moves, a couple of
//! SSE register operations and all direct, conditional and indirect jumps.
//! Memory operands are not modelled.

use crate::block::BlockBuilder;
use crate::error::{LiftError, LiftResult};
use crate::facet::{Facet, RegClass};
use crate::instr::{Cond, Instr, Opcode, Operand};
use crate::ir::{BinOp, CastOp, CmpPred, Type, UnaryOp, ValueId};
use crate::reg::{Flag, Reg};

use super::HandlerTable;

pub(super) fn install(table: &mut HandlerTable) {
    table.register(Opcode::Nop, nop);
    table.register(Opcode::Mov, mov);
    table.register(Opcode::Add, add);
    table.register(Opcode::Sub, sub);
    table.register(Opcode::And, and);
    table.register(Opcode::Or, or);
    table.register(Opcode::Xor, xor);
    table.register(Opcode::Cmp, cmp);
    table.register(Opcode::Test, test);
    table.register(Opcode::Inc, inc);
    table.register(Opcode::Dec, dec);
    table.register(Opcode::Movq, movq);
    table.register(Opcode::Pxor, pxor);
    table.register(Opcode::Jmp, jmp);
    for opcode in Opcode::ALL {
        if opcode.condition().is_some() {
            table.register(opcode, jcc);
        }
    }
    table.register(Opcode::JmpInd, jmp_ind);
    table.register(Opcode::Ret, ret);
}

// ============================================================================
// Operands
// ============================================================================

fn operand(instr: &Instr, index: usize) -> LiftResult<Operand> {
    instr
        .operands
        .get(index)
        .copied()
        .ok_or_else(|| LiftError::invalid_operands(instr, format!("missing operand {}", index + 1)))
}

fn gp_dest(instr: &Instr) -> LiftResult<(Reg, Facet)> {
    match operand(instr, 0)? {
        Operand::Reg { reg, facet } if reg.class == RegClass::Gp && reg.class.has_facet(facet) => {
            Ok((reg, facet))
        }
        _ => Err(LiftError::invalid_operands(
            instr,
            "destination must be a general purpose register",
        )),
    }
}

fn vec_operand(instr: &Instr, index: usize) -> LiftResult<Reg> {
    match operand(instr, index)? {
        Operand::Reg { reg, .. } if reg.class == RegClass::Vec => Ok(reg),
        _ => Err(LiftError::invalid_operands(
            instr,
            format!("operand {} must be a vector register", index + 1),
        )),
    }
}

/// Value of a source operand, sized like `facet`; immediates are sign-extended
fn source(bb: &mut BlockBuilder<'_>, instr: &Instr, index: usize, facet: Facet) -> LiftResult<ValueId> {
    match operand(instr, index)? {
        Operand::Reg { reg, facet: src } => {
            if !reg.class.has_facet(src) {
                return Err(LiftError::invalid_operands(instr, format!("{reg} has no {src} view")));
            }
            if src.ty() != facet.ty() {
                return Err(LiftError::invalid_operands(
                    instr,
                    format!("operand size mismatch ({facet} and {src})"),
                ));
            }
            Ok(bb.reg(reg, src))
        }
        Operand::Imm { imm } => Ok(bb.constant(facet.ty(), imm as i128 as u128)),
    }
}

/// Write a GP register facet with x86 semantics: 32-bit writes clear the
/// upper half, 8/16-bit writes merge into the old value.
fn write_gp(bb: &mut BlockBuilder<'_>, reg: Reg, facet: Facet, value: ValueId) {
    match facet {
        Facet::I64 => bb.set_reg(reg, Facet::I64, value, true),
        Facet::I32 => {
            let wide = bb.cast(CastOp::ZExt, value, Type::I64);
            bb.set_reg(reg, Facet::I64, wide, true);
            bb.set_reg(reg, Facet::I32, value, false);
        }
        _ => {
            let (mask, shift) = match facet {
                Facet::I16 => (0xffffu128, 0),
                Facet::I8H => (0xff00, 8),
                _ => (0xff, 0),
            };
            let full = bb.reg(reg, Facet::I64);
            let keep_mask = bb.constant(Type::I64, !mask);
            let kept = bb.binary(BinOp::And, full, keep_mask);
            let mut part = bb.cast(CastOp::ZExt, value, Type::I64);
            if shift != 0 {
                let amount = bb.constant(Type::I64, shift);
                part = bb.binary(BinOp::Shl, part, amount);
            }
            let merged = bb.binary(BinOp::Or, kept, part);
            bb.set_reg(reg, Facet::I64, merged, true);
            bb.set_reg(reg, facet, value, false);
        }
    }
}

fn direct_target(instr: &Instr) -> LiftResult<u64> {
    match operand(instr, 0)? {
        Operand::Imm { imm } => Ok(imm as u64),
        Operand::Reg { .. } => Err(LiftError::invalid_operands(
            instr,
            "direct jump needs an immediate target",
        )),
    }
}

// ============================================================================
// Flags
// ============================================================================

fn zero_of(bb: &mut BlockBuilder<'_>, value: ValueId) -> ValueId {
    let ty = bb.ir().ty(value);
    bb.constant(ty, 0)
}

fn is_negative(bb: &mut BlockBuilder<'_>, value: ValueId) -> ValueId {
    let zero = zero_of(bb, value);
    bb.icmp(CmpPred::Slt, value, zero)
}

/// ZF, SF and PF of a result
fn set_result_flags(bb: &mut BlockBuilder<'_>, result: ValueId) {
    let zero = zero_of(bb, result);
    let zf = bb.icmp(CmpPred::Eq, result, zero);
    bb.set_flag(Flag::Zf, zf);
    let sf = is_negative(bb, result);
    bb.set_flag(Flag::Sf, sf);

    // PF: even number of set bits in the low byte
    let low = if bb.ir().ty(result) == Type::I8 {
        result
    } else {
        bb.cast(CastOp::Trunc, result, Type::I8)
    };
    let count = bb.unary(UnaryOp::Ctpop, low);
    let one = bb.constant(Type::I8, 1);
    let odd = bb.binary(BinOp::And, count, one);
    let zero = bb.constant(Type::I8, 0);
    let pf = bb.icmp(CmpPred::Eq, odd, zero);
    bb.set_flag(Flag::Pf, pf);
}

fn set_aux_flag(bb: &mut BlockBuilder<'_>, lhs: ValueId, rhs: ValueId, result: ValueId) {
    let x = bb.binary(BinOp::Xor, lhs, rhs);
    let x = bb.binary(BinOp::Xor, x, result);
    let ty = bb.ir().ty(result);
    let bit = bb.constant(ty, 0x10);
    let masked = bb.binary(BinOp::And, x, bit);
    let zero = zero_of(bb, result);
    let af = bb.icmp(CmpPred::Ne, masked, zero);
    bb.set_flag(Flag::Af, af);
}

fn set_add_flags(bb: &mut BlockBuilder<'_>, lhs: ValueId, rhs: ValueId, result: ValueId, carry: bool) {
    set_result_flags(bb, result);
    set_aux_flag(bb, lhs, rhs, result);
    if carry {
        let cf = bb.icmp(CmpPred::Ult, result, lhs);
        bb.set_flag(Flag::Cf, cf);
    }
    let a = bb.binary(BinOp::Xor, lhs, result);
    let b = bb.binary(BinOp::Xor, rhs, result);
    let both = bb.binary(BinOp::And, a, b);
    let of = is_negative(bb, both);
    bb.set_flag(Flag::Of, of);
}

fn set_sub_flags(bb: &mut BlockBuilder<'_>, lhs: ValueId, rhs: ValueId, result: ValueId, carry: bool) {
    set_result_flags(bb, result);
    set_aux_flag(bb, lhs, rhs, result);
    if carry {
        let cf = bb.icmp(CmpPred::Ult, lhs, rhs);
        bb.set_flag(Flag::Cf, cf);
    }
    let a = bb.binary(BinOp::Xor, lhs, rhs);
    let b = bb.binary(BinOp::Xor, lhs, result);
    let both = bb.binary(BinOp::And, a, b);
    let of = is_negative(bb, both);
    bb.set_flag(Flag::Of, of);
}

fn set_logic_flags(bb: &mut BlockBuilder<'_>, result: ValueId) {
    set_result_flags(bb, result);
    let clear = bb.ir().const_bool(false);
    bb.set_flag(Flag::Cf, clear);
    bb.set_flag(Flag::Of, clear);
    let af = bb.ir().undef(Type::I1);
    bb.set_flag(Flag::Af, af);
}

fn condition(bb: &mut BlockBuilder<'_>, cond: Cond) -> ValueId {
    let (base, negate) = cond.split();
    let value = match base {
        Cond::O => bb.flag(Flag::Of),
        Cond::C => bb.flag(Flag::Cf),
        Cond::Z => bb.flag(Flag::Zf),
        Cond::S => bb.flag(Flag::Sf),
        Cond::P => bb.flag(Flag::Pf),
        Cond::Be => {
            let cf = bb.flag(Flag::Cf);
            let zf = bb.flag(Flag::Zf);
            bb.binary(BinOp::Or, cf, zf)
        }
        Cond::L => {
            let sf = bb.flag(Flag::Sf);
            let of = bb.flag(Flag::Of);
            bb.binary(BinOp::Xor, sf, of)
        }
        Cond::Le => {
            let sf = bb.flag(Flag::Sf);
            let of = bb.flag(Flag::Of);
            let less = bb.binary(BinOp::Xor, sf, of);
            let zf = bb.flag(Flag::Zf);
            bb.binary(BinOp::Or, zf, less)
        }
        negated => unreachable!("{negated:?} is not a base condition"),
    };
    if negate {
        bb.unary(UnaryOp::Not, value)
    } else {
        value
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn nop(_: &mut BlockBuilder<'_>, _: &Instr) -> LiftResult<()> {
    Ok(())
}

fn mov(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    let (reg, facet) = gp_dest(instr)?;
    let value = source(bb, instr, 1, facet)?;
    write_gp(bb, reg, facet, value);
    Ok(())
}

#[derive(Clone, Copy)]
enum Flags {
    Add,
    Sub,
    Logic,
}

fn alu(bb: &mut BlockBuilder<'_>, instr: &Instr, op: BinOp, flags: Flags, writeback: bool) -> LiftResult<()> {
    let (reg, facet) = gp_dest(instr)?;
    let lhs = bb.reg(reg, facet);
    let rhs = source(bb, instr, 1, facet)?;
    let result = bb.binary(op, lhs, rhs);
    match flags {
        Flags::Add => set_add_flags(bb, lhs, rhs, result, true),
        Flags::Sub => set_sub_flags(bb, lhs, rhs, result, true),
        Flags::Logic => set_logic_flags(bb, result),
    }
    if writeback {
        write_gp(bb, reg, facet, result);
    }
    Ok(())
}

fn add(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::Add, Flags::Add, true)
}

fn sub(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::Sub, Flags::Sub, true)
}

fn and(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::And, Flags::Logic, true)
}

fn or(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::Or, Flags::Logic, true)
}

fn xor(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::Xor, Flags::Logic, true)
}

fn cmp(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::Sub, Flags::Sub, false)
}

fn test(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    alu(bb, instr, BinOp::And, Flags::Logic, false)
}

/// inc/dec: like add/sub with 1, but CF is preserved
fn step(bb: &mut BlockBuilder<'_>, instr: &Instr, op: BinOp) -> LiftResult<()> {
    let (reg, facet) = gp_dest(instr)?;
    let lhs = bb.reg(reg, facet);
    let one = bb.constant(facet.ty(), 1);
    let result = bb.binary(op, lhs, one);
    match op {
        BinOp::Add => set_add_flags(bb, lhs, one, result, false),
        _ => set_sub_flags(bb, lhs, one, result, false),
    }
    write_gp(bb, reg, facet, result);
    Ok(())
}

fn inc(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    step(bb, instr, BinOp::Add)
}

fn dec(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    step(bb, instr, BinOp::Sub)
}

/// movq: 64-bit move between GP and vector registers; vector destinations
/// have their upper half cleared
fn movq(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    let low = match operand(instr, 1)? {
        Operand::Reg { reg, .. } if reg.class == RegClass::Vec => {
            let full = bb.reg(reg, Facet::I128);
            bb.cast(CastOp::Trunc, full, Type::I64)
        }
        Operand::Reg { reg, facet: Facet::I64 } if reg.class == RegClass::Gp => {
            bb.reg(reg, Facet::I64)
        }
        _ => {
            return Err(LiftError::invalid_operands(
                instr,
                "source must be a vector or 64-bit general purpose register",
            ));
        }
    };

    match operand(instr, 0)? {
        Operand::Reg { reg, .. } if reg.class == RegClass::Vec => {
            let wide = bb.cast(CastOp::ZExt, low, Type::I128);
            bb.set_reg(reg, Facet::I128, wide, true);
        }
        Operand::Reg { reg, facet: Facet::I64 } if reg.class == RegClass::Gp => {
            write_gp(bb, reg, Facet::I64, low);
        }
        _ => {
            return Err(LiftError::invalid_operands(
                instr,
                "destination must be a vector or 64-bit general purpose register",
            ));
        }
    }
    Ok(())
}

fn pxor(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    let dest = vec_operand(instr, 0)?;
    let src = vec_operand(instr, 1)?;
    let lhs = bb.reg(dest, Facet::I128);
    let rhs = bb.reg(src, Facet::I128);
    let result = bb.binary(BinOp::Xor, lhs, rhs);
    bb.set_reg(dest, Facet::I128, result, true);
    Ok(())
}

/// Point the next-PC value at `target` under `cond`
fn branch_to(bb: &mut BlockBuilder<'_>, cond: ValueId, target: ValueId) {
    let rip = bb.reg(Reg::IP, Facet::I64);
    let next = bb.select(cond, target, rip);
    bb.set_next_pc(next);
}

fn jmp(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    let target = direct_target(instr)?;
    let target = bb.constant(Type::I64, target as u128);
    let always = bb.ir().const_bool(true);
    branch_to(bb, always, target);
    Ok(())
}

fn jcc(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    let cond = instr
        .opcode
        .condition()
        .ok_or_else(|| LiftError::invalid_operands(instr, "not a conditional jump"))?;
    let target = direct_target(instr)?;
    let taken = condition(bb, cond);
    let target = bb.constant(Type::I64, target as u128);
    branch_to(bb, taken, target);
    Ok(())
}

fn jmp_ind(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
    let target = match operand(instr, 0)? {
        Operand::Reg { reg, facet: Facet::I64 } if reg.class == RegClass::Gp => bb.reg(reg, Facet::I64),
        _ => {
            return Err(LiftError::invalid_operands(
                instr,
                "indirect jump needs a 64-bit general purpose register",
            ));
        }
    };
    let unknown = bb.ir().undef(Type::I1);
    branch_to(bb, unknown, target);
    Ok(())
}

/// The return address lives in memory, which is not modelled
fn ret(bb: &mut BlockBuilder<'_>, _: &Instr) -> LiftResult<()> {
    let target = bb.ir().undef(Type::I64);
    let unknown = bb.ir().undef(Type::I1);
    branch_to(bb, unknown, target);
    Ok(())
}
