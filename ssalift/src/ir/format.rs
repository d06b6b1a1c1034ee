//! IR text formatting

use super::{
    BinOp, CastOp, CmpPred, Inst, IrFunction, Terminator, Type, UnaryOp, ValueId, ValueKind,
};

/// Format a function to text
pub fn format_function(func: &IrFunction) -> String {
    let mut out = String::new();
    out.push_str(&format!("function {} {{\n", func.name));

    for block in func.blocks() {
        out.push_str(&format!("{}:\n", block.label()));

        for &phi in &block.phis {
            out.push_str(&format!("  {}\n", format_phi(func, phi)));
        }
        for &inst in &block.insts {
            out.push_str(&format!("  {}\n", format_inst(func, inst)));
        }

        match &block.terminator {
            Some(term) => out.push_str(&format!("  {}\n", format_terminator(func, term))),
            None => out.push_str("  ; unresolved exit\n"),
        }
    }

    out.push_str("}\n");
    out
}

fn format_phi(func: &IrFunction, id: ValueId) -> String {
    let ty = func.ty(id);
    let incoming = func.incoming(id);
    if incoming.is_empty() {
        return format!("%{} = phi {}", id.index(), ty);
    }
    let inputs: Vec<_> = incoming
        .iter()
        .map(|inc| {
            format!(
                "[{}, {}]",
                format_operand(func, inc.value),
                func.block(inc.block).label()
            )
        })
        .collect();
    format!("%{} = phi {} {}", id.index(), ty, inputs.join(", "))
}

fn format_inst(func: &IrFunction, id: ValueId) -> String {
    let Some(inst) = func.inst(id) else {
        return format!("; %{} is not an instruction", id.index());
    };
    let dest = id.index();
    let ty = func.ty(id);
    let op = |v: ValueId| format_operand(func, v);

    match inst {
        Inst::Nop => "nop".to_string(),
        Inst::Binary { op: bin, lhs, rhs } => {
            format!("%{} = {} {} {}, {}", dest, format_binop(*bin), ty, op(*lhs), op(*rhs))
        }
        Inst::Unary { op: un, value } => {
            format!("%{} = {} {} {}", dest, format_unaryop(*un), ty, op(*value))
        }
        Inst::ICmp { pred, lhs, rhs } => format!(
            "%{} = icmp {} {} {}, {}",
            dest,
            format_pred(*pred),
            func.ty(*lhs),
            op(*lhs),
            op(*rhs)
        ),
        Inst::Select {
            cond,
            then_value,
            else_value,
        } => format!(
            "%{} = select {} {}, {} {}, {}",
            dest,
            func.ty(*cond),
            op(*cond),
            ty,
            op(*then_value),
            op(*else_value)
        ),
        Inst::Cast { op: cast, value } => format!(
            "%{} = {} {} {} to {}",
            dest,
            format_castop(*cast),
            func.ty(*value),
            op(*value),
            ty
        ),
    }
}

fn format_terminator(func: &IrFunction, term: &Terminator) -> String {
    match term {
        Terminator::Br(target) => format!("br {}", func.block(*target).label()),
        Terminator::CondBr {
            cond,
            then_block,
            else_block,
        } => format!(
            "condbr {}, {}, {}",
            format_operand(func, *cond),
            func.block(*then_block).label(),
            func.block(*else_block).label()
        ),
    }
}

/// Format an operand: constants inline, everything else by id
fn format_operand(func: &IrFunction, id: ValueId) -> String {
    let data = func.value(id);
    match data.kind {
        ValueKind::Const(bits) => format_constant(data.ty, bits),
        ValueKind::Undef => "undef".to_string(),
        _ => format!("%{}", id.index()),
    }
}

fn format_constant(ty: Type, bits: u128) -> String {
    match ty {
        Type::I1 => (if bits != 0 { "true" } else { "false" }).to_string(),
        ty if ty.is_int() && ty.bits() <= 64 => bits.to_string(),
        _ => format!("{:#x}", bits),
    }
}

fn format_binop(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::LShr => "lshr",
    }
}

fn format_unaryop(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Not => "not",
        UnaryOp::Ctpop => "ctpop",
    }
}

fn format_pred(pred: CmpPred) -> &'static str {
    match pred {
        CmpPred::Eq => "eq",
        CmpPred::Ne => "ne",
        CmpPred::Ult => "ult",
        CmpPred::Ule => "ule",
        CmpPred::Slt => "slt",
        CmpPred::Sle => "sle",
    }
}

fn format_castop(op: CastOp) -> &'static str {
    match op {
        CastOp::Trunc => "trunc",
        CastOp::ZExt => "zext",
        CastOp::Bitcast => "bitcast",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_loop() {
        let mut f = IrFunction::new("count");
        let head = f.add_block(0x1000);
        let exit = f.add_block(0x1008);

        let counter = f.phi(head, Type::I64);
        f.nop(head);
        let one = f.const_int(Type::I64, 1);
        let next = f.binary(head, BinOp::Sub, counter, one);
        let zero = f.const_int(Type::I64, 0);
        let done = f.icmp(head, CmpPred::Eq, next, zero);
        f.set_terminator(
            head,
            Terminator::CondBr {
                cond: done,
                then_block: exit,
                else_block: head,
            },
        );
        f.add_incoming(counter, next, head);

        insta::assert_snapshot!(format_function(&f), @r"
        function count {
        bb_1000:
          %0 = phi i64 [%3, bb_1000]
          nop
          %3 = sub i64 %0, 1
          %5 = icmp eq i64 %3, 0
          condbr %5, bb_1008, bb_1000
        bb_1008:
          ; unresolved exit
        }
        ");
    }

    #[test]
    fn test_format_constants() {
        assert_eq!(format_constant(Type::I1, 1), "true");
        assert_eq!(format_constant(Type::I32, 7), "7");
        assert_eq!(format_constant(Type::I128, 255), "0xff");
    }
}
