//! Register file
//!
//! Per-block map from (register, facet) to the SSA value currently held in
//! that facet, plus one value per status flag. Overlapping views of the same
//! register are modelled explicitly: each register keeps a small list of
//! facet values, and a read of a facet that is not present is synthesized
//! from the native facet (which is itself rebuilt from any other facet if it
//! was invalidated). Synthesized conversions are emitted into the block the
//! register file belongs to and cached.

use std::collections::HashMap;

use crate::facet::{Facet, RegClass};
use crate::ir::{BinOp, CastOp, IrBlockId, IrFunction, Type, ValueId};
use crate::reg::{Flag, Reg};

/// A register facet or a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Reg(Reg, Facet),
    Flag(Flag),
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Reg(reg, facet) => write!(f, "{reg}:{facet}"),
            Slot::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// Register state of one basic block
#[derive(Debug, Clone)]
pub struct RegFile {
    /// Block that synthesized conversions are appended to
    block: IrBlockId,
    regs: HashMap<Reg, Vec<(Facet, ValueId)>>,
    flags: [Option<ValueId>; Flag::COUNT],
}

impl RegFile {
    pub fn new(block: IrBlockId) -> Self {
        Self {
            block,
            regs: HashMap::new(),
            flags: [None; Flag::COUNT],
        }
    }

    pub fn block(&self) -> IrBlockId {
        self.block
    }

    /// Cached value of a facet, without synthesizing
    pub fn peek(&self, reg: Reg, facet: Facet) -> Option<ValueId> {
        self.regs
            .get(&reg)?
            .iter()
            .find(|(f, _)| *f == facet)
            .map(|(_, v)| *v)
    }

    pub fn peek_flag(&self, flag: Flag) -> Option<ValueId> {
        self.flags[flag.index()]
    }

    /// Current value of a facet
    pub fn read(&mut self, ir: &mut IrFunction, reg: Reg, facet: Facet) -> ValueId {
        assert!(reg.class.has_facet(facet), "{reg} has no {facet} facet");
        if let Some(value) = self.peek(reg, facet) {
            return value;
        }

        let native_facet = reg.class.native_facet();
        let native = match self.peek(reg, native_facet) {
            Some(value) => value,
            None => {
                // Facets still cached side by side are views of the same bits;
                // rebuild from the most recent one.
                let value = match self.regs.get(&reg).and_then(|facets| facets.last()) {
                    Some(&(from, value)) => widen(ir, self.block, reg.class, from, value),
                    None => ir.undef(native_facet.ty()),
                };
                self.cache(reg, native_facet, value);
                value
            }
        };
        if facet == native_facet {
            return native;
        }

        let value = narrow(ir, self.block, native, facet);
        self.cache(reg, facet, value);
        value
    }

    /// Set a facet. An exclusive write invalidates every other facet of the register.
    pub fn write(&mut self, reg: Reg, facet: Facet, value: ValueId, exclusive: bool) {
        assert!(reg.class.has_facet(facet), "{reg} has no {facet} facet");
        let facets = self.regs.entry(reg).or_default();
        if exclusive {
            facets.clear();
        } else {
            facets.retain(|(f, _)| *f != facet);
        }
        facets.push((facet, value));
    }

    pub fn read_flag(&mut self, ir: &mut IrFunction, flag: Flag) -> ValueId {
        match self.flags[flag.index()] {
            Some(value) => value,
            None => {
                let value = ir.undef(Type::I1);
                self.flags[flag.index()] = Some(value);
                value
            }
        }
    }

    pub fn write_flag(&mut self, flag: Flag, value: ValueId) {
        self.flags[flag.index()] = Some(value);
    }

    pub fn read_slot(&mut self, ir: &mut IrFunction, slot: Slot) -> ValueId {
        match slot {
            Slot::Reg(reg, facet) => self.read(ir, reg, facet),
            Slot::Flag(flag) => self.read_flag(ir, flag),
        }
    }

    fn cache(&mut self, reg: Reg, facet: Facet, value: ValueId) {
        self.regs.entry(reg).or_default().push((facet, value));
    }
}

/// Rebuild the native facet from another facet
fn widen(ir: &mut IrFunction, block: IrBlockId, class: RegClass, from: Facet, value: ValueId) -> ValueId {
    let native = class.native_facet().ty();
    match from {
        Facet::I8H => {
            let wide = ir.cast(block, CastOp::ZExt, value, native);
            let eight = ir.const_int(native, 8);
            ir.binary(block, BinOp::Shl, wide, eight)
        }
        Facet::F32 | Facet::F64 => {
            let int_ty = Type::int_of_width(from.ty().bits()).unwrap_or(Type::I64);
            let bits = ir.cast(block, CastOp::Bitcast, value, int_ty);
            ir.cast(block, CastOp::ZExt, bits, native)
        }
        _ if from.ty().is_vector() => ir.cast(block, CastOp::Bitcast, value, native),
        _ if from.ty() == native => value,
        _ => ir.cast(block, CastOp::ZExt, value, native),
    }
}

/// Derive a facet from the native facet
fn narrow(ir: &mut IrFunction, block: IrBlockId, native: ValueId, facet: Facet) -> ValueId {
    let to = facet.ty();
    match facet {
        Facet::I8H => {
            let eight = ir.const_int(ir.ty(native), 8);
            let shifted = ir.binary(block, BinOp::LShr, native, eight);
            ir.cast(block, CastOp::Trunc, shifted, to)
        }
        Facet::F32 | Facet::F64 => {
            let int_ty = Type::int_of_width(to.bits()).unwrap_or(Type::I64);
            let bits = ir.cast(block, CastOp::Trunc, native, int_ty);
            ir.cast(block, CastOp::Bitcast, bits, to)
        }
        _ if to.is_vector() => ir.cast(block, CastOp::Bitcast, native, to),
        _ => ir.cast(block, CastOp::Trunc, native, to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, ValueKind};

    fn setup() -> (IrFunction, RegFile) {
        let mut ir = IrFunction::new("test");
        let block = ir.add_block(0x1000);
        (ir, RegFile::new(block))
    }

    #[test]
    fn test_read_after_write() {
        let (mut ir, mut rf) = setup();
        let v = ir.const_int(Type::I64, 42);
        rf.write(Reg::gp(0), Facet::I64, v, true);
        assert_eq!(rf.read(&mut ir, Reg::gp(0), Facet::I64), v);
    }

    #[test]
    fn test_narrow_facet_synthesized_and_cached() {
        let (mut ir, mut rf) = setup();
        let v = ir.phi(rf.block(), Type::I64);
        rf.write(Reg::gp(1), Facet::I64, v, true);

        let low = rf.read(&mut ir, Reg::gp(1), Facet::I32);
        assert_eq!(ir.ty(low), Type::I32);
        assert!(matches!(ir.inst(low), Some(Inst::Cast { op: CastOp::Trunc, .. })));
        assert_eq!(rf.read(&mut ir, Reg::gp(1), Facet::I32), low);
        assert_eq!(ir.block(rf.block()).insts.len(), 1);
    }

    #[test]
    fn test_high_byte_of_constant() {
        let (mut ir, mut rf) = setup();
        let v = ir.const_int(Type::I64, 0xbeef);
        rf.write(Reg::gp(0), Facet::I64, v, true);
        let ah = rf.read(&mut ir, Reg::gp(0), Facet::I8H);
        assert_eq!(ir.as_const(ah), Some(0xbe));
    }

    #[test]
    fn test_exclusive_write_invalidates_other_facets() {
        let (mut ir, mut rf) = setup();
        let a = ir.const_int(Type::I64, 1);
        let b = ir.const_int(Type::I32, 2);
        rf.write(Reg::gp(0), Facet::I64, a, false);
        rf.write(Reg::gp(0), Facet::I32, b, false);
        assert_eq!(rf.peek(Reg::gp(0), Facet::I64), Some(a));

        let c = ir.const_int(Type::I64, 0x1_0000_0003);
        rf.write(Reg::gp(0), Facet::I64, c, true);
        assert_eq!(rf.peek(Reg::gp(0), Facet::I32), None);
        let low = rf.read(&mut ir, Reg::gp(0), Facet::I32);
        assert_eq!(ir.as_const(low), Some(3));
    }

    #[test]
    fn test_native_rebuilt_from_narrow_facet() {
        let (mut ir, mut rf) = setup();
        let v = ir.const_int(Type::I32, 0xffff_ffff);
        rf.write(Reg::gp(2), Facet::I32, v, true);
        let full = rf.read(&mut ir, Reg::gp(2), Facet::I64);
        assert_eq!(ir.as_const(full), Some(0xffff_ffff));
    }

    #[test]
    fn test_native_rebuilt_from_last_written_facet() {
        let (mut ir, mut rf) = setup();
        let wide = ir.const_int(Type::I32, 0x1234_5678);
        rf.write(Reg::gp(2), Facet::I32, wide, true);
        let low = ir.const_int(Type::I16, 0xabcd);
        rf.write(Reg::gp(2), Facet::I16, low, false);
        let full = rf.read(&mut ir, Reg::gp(2), Facet::I64);
        assert_eq!(ir.as_const(full), Some(0xabcd));
    }

    #[test]
    fn test_vector_facets() {
        let (mut ir, mut rf) = setup();
        let v = ir.phi(rf.block(), Type::F64);
        rf.write(Reg::vec(0), Facet::F64, v, true);

        let full = rf.read(&mut ir, Reg::vec(0), Facet::I128);
        assert_eq!(ir.ty(full), Type::I128);
        let packed = rf.read(&mut ir, Reg::vec(0), Facet::V2F64);
        assert_eq!(ir.ty(packed), Type::V2F64);
        assert_eq!(rf.read(&mut ir, Reg::vec(0), Facet::F64), v);
    }

    #[test]
    fn test_unwritten_register_is_undef() {
        let (mut ir, mut rf) = setup();
        let v = rf.read(&mut ir, Reg::gp(3), Facet::I16);
        assert_eq!(ir.ty(v), Type::I16);
        let full = rf.peek(Reg::gp(3), Facet::I64).unwrap();
        assert!(matches!(ir.value(full).kind, ValueKind::Undef));

        let flag = rf.read_flag(&mut ir, Flag::Zf);
        assert!(ir.is_undef(flag));
        assert_eq!(rf.read_flag(&mut ir, Flag::Zf), flag);
    }

    #[test]
    #[should_panic(expected = "has no f64 facet")]
    fn test_invalid_facet() {
        let (mut ir, mut rf) = setup();
        let v = ir.const_int(Type::F64, 0);
        rf.write(Reg::gp(0), Facet::F64, v, true);
    }
}
