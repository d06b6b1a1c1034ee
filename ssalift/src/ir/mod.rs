//! SSA Intermediate Representation
//!
//! The IR container the lifter emits into. All values of one function live
//! in a single arena (`IrFunction`) and are referenced by `ValueId`, so a
//! block can name values defined in any other block (phi inputs from
//! predecessors, values from dominating blocks) without ownership links
//! between blocks.
//!
//! Instruction builders fold constants eagerly. Select is the exception:
//! terminator resolution inspects the select that describes the next
//! program counter, so it is always emitted as written.

mod format;

pub use format::format_function;

use serde::Serialize;

/// Handle to a value in an `IrFunction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ValueId(u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a block in an `IrFunction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IrBlockId(u32);

impl IrBlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    V16I8,
    V8I16,
    V4I32,
    V2I64,
    V4F32,
    V2F64,
}

impl Type {
    pub fn bits(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::I1 => 1,
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 | Type::F32 => 32,
            Type::I64 | Type::F64 => 64,
            Type::I128
            | Type::V16I8
            | Type::V8I16
            | Type::V4I32
            | Type::V2I64
            | Type::V4F32
            | Type::V2F64 => 128,
        }
    }

    /// Scalar integer type (including `i1`)
    pub fn is_int(self) -> bool {
        matches!(
            self,
            Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::I128
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_vector(self) -> bool {
        !self.is_int() && !self.is_float() && self != Type::Void
    }

    /// Integer type of the same width
    pub fn int_of_width(bits: u32) -> Option<Type> {
        match bits {
            1 => Some(Type::I1),
            8 => Some(Type::I8),
            16 => Some(Type::I16),
            32 => Some(Type::I32),
            64 => Some(Type::I64),
            128 => Some(Type::I128),
            _ => None,
        }
    }

    /// Mask of the bits a constant of this type may occupy
    pub fn mask(self) -> u128 {
        match self.bits() {
            bits if bits >= 128 => u128::MAX,
            bits => (1u128 << bits) - 1,
        }
    }

    /// Sign-extend a bit pattern of this type
    pub fn sext(self, bits: u128) -> i128 {
        let width = self.bits();
        if width == 0 || width >= 128 {
            return bits as i128;
        }
        let shift = 128 - width;
        ((bits << shift) as i128) >> shift
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::I128 => "i128",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::V16I8 => "<16 x i8>",
            Type::V8I16 => "<8 x i16>",
            Type::V4I32 => "<4 x i32>",
            Type::V2I64 => "<2 x i64>",
            Type::V4F32 => "<4 x f32>",
            Type::V2F64 => "<2 x f64>",
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    /// Bitwise not
    Not,
    /// Population count
    Ctpop,
}

/// Integer comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Slt,
    Sle,
}

/// Conversions between types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CastOp {
    Trunc,
    ZExt,
    Bitcast,
}

/// Non-terminating instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inst {
    /// Separator between source instructions, no effect
    Nop,
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        op: UnaryOp,
        value: ValueId,
    },
    /// Integer comparison producing `i1`
    ICmp {
        pred: CmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// `cond ? then_value : else_value`; any non-zero integer condition selects `then_value`
    Select {
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    },
    Cast {
        op: CastOp,
        value: ValueId,
    },
}

/// One phi input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Incoming {
    pub value: ValueId,
    pub block: IrBlockId,
}

/// What a value is
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Bit pattern, masked to the width of the type
    Const(u128),
    Undef,
    Inst { block: IrBlockId, inst: Inst },
    Phi { block: IrBlockId, incoming: Vec<Incoming> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueData {
    pub ty: Type,
    pub kind: ValueKind,
}

/// Block terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    Br(IrBlockId),
    CondBr {
        cond: ValueId,
        then_block: IrBlockId,
        else_block: IrBlockId,
    },
}

/// IR block: phis first, then instructions, then an optional terminator
#[derive(Debug, Clone, Serialize)]
pub struct IrBlock {
    /// Guest address of the first instruction
    pub address: u64,
    pub phis: Vec<ValueId>,
    pub insts: Vec<ValueId>,
    /// `None` while under construction, and for blocks whose exit could not be resolved
    pub terminator: Option<Terminator>,
}

impl IrBlock {
    pub fn label(&self) -> String {
        format!("bb_{:x}", self.address)
    }
}

/// A function's IR: value arena plus blocks
#[derive(Debug, Clone, Serialize)]
pub struct IrFunction {
    pub name: String,
    values: Vec<ValueData>,
    blocks: Vec<IrBlock>,
}

impl IrFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn add_block(&mut self, address: u64) -> IrBlockId {
        let id = IrBlockId(self.blocks.len() as u32);
        self.blocks.push(IrBlock {
            address,
            phis: Vec::new(),
            insts: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn block(&self, id: IrBlockId) -> &IrBlock {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[IrBlock] {
        &self.blocks
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn ty(&self, id: ValueId) -> Type {
        self.values[id.index()].ty
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Constant value of `id`, if it is one
    pub fn as_const(&self, id: ValueId) -> Option<u128> {
        match self.value(id).kind {
            ValueKind::Const(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn is_undef(&self, id: ValueId) -> bool {
        matches!(self.value(id).kind, ValueKind::Undef)
    }

    /// Instruction that defines `id`, if any
    pub fn inst(&self, id: ValueId) -> Option<&Inst> {
        match &self.value(id).kind {
            ValueKind::Inst { inst, .. } => Some(inst),
            _ => None,
        }
    }

    /// `(cond, then_value, else_value)` if `id` is a select
    pub fn select_parts(&self, id: ValueId) -> Option<(ValueId, ValueId, ValueId)> {
        match self.inst(id)? {
            Inst::Select {
                cond,
                then_value,
                else_value,
            } => Some((*cond, *then_value, *else_value)),
            _ => None,
        }
    }

    fn alloc(&mut self, ty: Type, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { ty, kind });
        id
    }

    fn push_inst(&mut self, block: IrBlockId, ty: Type, inst: Inst) -> ValueId {
        let id = self.alloc(ty, ValueKind::Inst { block, inst });
        self.blocks[block.index()].insts.push(id);
        id
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    pub fn const_int(&mut self, ty: Type, bits: u128) -> ValueId {
        self.alloc(ty, ValueKind::Const(bits & ty.mask()))
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.const_int(Type::I1, value as u128)
    }

    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.alloc(ty, ValueKind::Undef)
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    pub fn nop(&mut self, block: IrBlockId) -> ValueId {
        self.push_inst(block, Type::Void, Inst::Nop)
    }

    pub fn binary(&mut self, block: IrBlockId, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.ty(lhs);
        assert_eq!(ty, self.ty(rhs), "{op:?} operand types differ");

        if let (Some(a), Some(b)) = (self.as_const(lhs), self.as_const(rhs))
            && let Some(bits) = fold_binary(ty, op, a, b)
        {
            return self.const_int(ty, bits);
        }
        if lhs == rhs && matches!(op, BinOp::Xor | BinOp::Sub) {
            return self.const_int(ty, 0);
        }

        self.push_inst(block, ty, Inst::Binary { op, lhs, rhs })
    }

    pub fn unary(&mut self, block: IrBlockId, op: UnaryOp, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        if ty.is_int()
            && let Some(a) = self.as_const(value)
        {
            let bits = match op {
                UnaryOp::Not => !a,
                UnaryOp::Ctpop => a.count_ones() as u128,
            };
            return self.const_int(ty, bits);
        }
        self.push_inst(block, ty, Inst::Unary { op, value })
    }

    pub fn icmp(&mut self, block: IrBlockId, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.ty(lhs);
        assert_eq!(ty, self.ty(rhs), "icmp operand types differ");
        assert!(ty.is_int(), "icmp on non-integer type {ty}");

        if let (Some(a), Some(b)) = (self.as_const(lhs), self.as_const(rhs)) {
            let result = match pred {
                CmpPred::Eq => a == b,
                CmpPred::Ne => a != b,
                CmpPred::Ult => a < b,
                CmpPred::Ule => a <= b,
                CmpPred::Slt => ty.sext(a) < ty.sext(b),
                CmpPred::Sle => ty.sext(a) <= ty.sext(b),
            };
            return self.const_bool(result);
        }

        self.push_inst(block, Type::I1, Inst::ICmp { pred, lhs, rhs })
    }

    pub fn select(
        &mut self,
        block: IrBlockId,
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    ) -> ValueId {
        let ty = self.ty(then_value);
        assert_eq!(ty, self.ty(else_value), "select arm types differ");
        assert!(self.ty(cond).is_int(), "select condition must be an integer");
        self.push_inst(
            block,
            ty,
            Inst::Select {
                cond,
                then_value,
                else_value,
            },
        )
    }

    pub fn cast(&mut self, block: IrBlockId, op: CastOp, value: ValueId, to: Type) -> ValueId {
        let from = self.ty(value);
        match op {
            CastOp::Trunc => assert!(
                from.is_int() && to.is_int() && to.bits() < from.bits(),
                "invalid trunc {from} to {to}"
            ),
            CastOp::ZExt => assert!(
                from.is_int() && to.is_int() && to.bits() > from.bits(),
                "invalid zext {from} to {to}"
            ),
            CastOp::Bitcast => assert_eq!(from.bits(), to.bits(), "invalid bitcast {from} to {to}"),
        }

        if let Some(a) = self.as_const(value) {
            return self.const_int(to, a);
        }
        if from == to {
            return value;
        }

        self.push_inst(block, to, Inst::Cast { op, value })
    }

    // ------------------------------------------------------------------
    // Phis and terminators
    // ------------------------------------------------------------------

    /// New phi with no inputs at the head of `block`
    pub fn phi(&mut self, block: IrBlockId, ty: Type) -> ValueId {
        let id = self.alloc(
            ty,
            ValueKind::Phi {
                block,
                incoming: Vec::new(),
            },
        );
        self.blocks[block.index()].phis.push(id);
        id
    }

    pub fn add_incoming(&mut self, phi: ValueId, value: ValueId, from: IrBlockId) {
        let value_ty = self.ty(value);
        let data = &mut self.values[phi.index()];
        assert_eq!(data.ty, value_ty, "phi input type differs from phi type");
        match &mut data.kind {
            ValueKind::Phi { incoming, .. } => incoming.push(Incoming { value, block: from }),
            _ => panic!("add_incoming on a value that is not a phi"),
        }
    }

    /// Inputs of a phi (empty for anything else)
    pub fn incoming(&self, phi: ValueId) -> &[Incoming] {
        match &self.value(phi).kind {
            ValueKind::Phi { incoming, .. } => incoming,
            _ => &[],
        }
    }

    pub fn set_terminator(&mut self, block: IrBlockId, terminator: Terminator) {
        let slot = &mut self.blocks[block.index()].terminator;
        assert!(slot.is_none(), "block already has a terminator");
        *slot = Some(terminator);
    }
}

fn fold_binary(ty: Type, op: BinOp, a: u128, b: u128) -> Option<u128> {
    if !ty.is_int() {
        return match op {
            BinOp::And => Some(a & b),
            BinOp::Or => Some(a | b),
            BinOp::Xor => Some(a ^ b),
            _ => None,
        };
    }
    let bits = ty.bits() as u128;
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl if b < bits => a << b,
        BinOp::LShr if b < bits => a >> b,
        BinOp::Shl | BinOp::LShr => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func() -> (IrFunction, IrBlockId) {
        let mut f = IrFunction::new("test");
        let b = f.add_block(0x1000);
        (f, b)
    }

    #[test]
    fn test_constant_folding() {
        let (mut f, b) = func();
        let x = f.const_int(Type::I8, 0xff);
        let one = f.const_int(Type::I8, 1);
        let sum = f.binary(b, BinOp::Add, x, one);
        assert_eq!(f.as_const(sum), Some(0));

        let lt = f.icmp(b, CmpPred::Slt, x, one);
        assert_eq!(f.as_const(lt), Some(1));
        let ult = f.icmp(b, CmpPred::Ult, x, one);
        assert_eq!(f.as_const(ult), Some(0));

        assert!(f.block(b).insts.is_empty());
    }

    #[test]
    fn test_self_xor_folds_to_zero() {
        let (mut f, b) = func();
        let p = f.phi(b, Type::I32);
        let zero = f.binary(b, BinOp::Xor, p, p);
        assert_eq!(f.as_const(zero), Some(0));
        assert_eq!(f.ty(zero), Type::I32);
    }

    #[test]
    fn test_select_is_never_folded() {
        let (mut f, b) = func();
        let c = f.const_bool(false);
        let v = f.const_int(Type::I64, 0x1004);
        let sel = f.select(b, c, v, v);
        assert_eq!(f.select_parts(sel), Some((c, v, v)));
        assert_eq!(f.block(b).insts, vec![sel]);
    }

    #[test]
    fn test_casts() {
        let (mut f, b) = func();
        let c = f.const_int(Type::I64, 0x1234_5678_9abc);
        let t = f.cast(b, CastOp::Trunc, c, Type::I16);
        assert_eq!(f.as_const(t), Some(0x9abc));

        let p = f.phi(b, Type::I64);
        let z = f.cast(b, CastOp::ZExt, p, Type::I128);
        assert_eq!(f.ty(z), Type::I128);
        assert_eq!(f.block(b).insts, vec![z]);
    }

    #[test]
    #[should_panic(expected = "invalid trunc")]
    fn test_trunc_must_narrow() {
        let (mut f, b) = func();
        let p = f.phi(b, Type::I32);
        f.cast(b, CastOp::Trunc, p, Type::I64);
    }

    #[test]
    fn test_phi_inputs() {
        let (mut f, b) = func();
        let other = f.add_block(0x2000);
        let p = f.phi(b, Type::I1);
        let t = f.const_bool(true);
        f.add_incoming(p, t, other);
        assert_eq!(f.incoming(p), &[Incoming { value: t, block: other }]);
        assert_eq!(f.block(b).phis, vec![p]);
    }

    #[test]
    fn test_sext() {
        assert_eq!(Type::I8.sext(0x80), -128);
        assert_eq!(Type::I8.sext(0x7f), 127);
        assert_eq!(Type::I128.sext(u128::MAX), -1);
    }
}
