//! Decoded instruction records
//!
//! The decoder is not part of this crate; it hands over one `Instr` per
//! native instruction. Operands are opaque to the block layer and are only
//! interpreted by the semantic handler registered for the opcode.

use serde::{Deserialize, Serialize};

use crate::facet::Facet;
use crate::reg::Reg;

/// Instruction opcodes known to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    Nop,
    Mov,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Cmp,
    Test,
    Inc,
    Dec,
    Movq,
    Pxor,
    Jmp,
    Jo,
    Jno,
    Jc,
    Jnc,
    Jz,
    Jnz,
    Jbe,
    Ja,
    Js,
    Jns,
    Jp,
    Jnp,
    Jl,
    Jge,
    Jle,
    Jg,
    JmpInd,
    Ret,
    Cpuid,
    Syscall,
}

impl Opcode {
    pub const COUNT: usize = 34;

    pub const ALL: [Opcode; Opcode::COUNT] = [
        Opcode::Nop,
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Cmp,
        Opcode::Test,
        Opcode::Inc,
        Opcode::Dec,
        Opcode::Movq,
        Opcode::Pxor,
        Opcode::Jmp,
        Opcode::Jo,
        Opcode::Jno,
        Opcode::Jc,
        Opcode::Jnc,
        Opcode::Jz,
        Opcode::Jnz,
        Opcode::Jbe,
        Opcode::Ja,
        Opcode::Js,
        Opcode::Jns,
        Opcode::Jp,
        Opcode::Jnp,
        Opcode::Jl,
        Opcode::Jge,
        Opcode::Jle,
        Opcode::Jg,
        Opcode::JmpInd,
        Opcode::Ret,
        Opcode::Cpuid,
        Opcode::Syscall,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Condition tested by a conditional jump
    pub fn condition(self) -> Option<Cond> {
        Some(match self {
            Opcode::Jo => Cond::O,
            Opcode::Jno => Cond::No,
            Opcode::Jc => Cond::C,
            Opcode::Jnc => Cond::Nc,
            Opcode::Jz => Cond::Z,
            Opcode::Jnz => Cond::Nz,
            Opcode::Jbe => Cond::Be,
            Opcode::Ja => Cond::A,
            Opcode::Js => Cond::S,
            Opcode::Jns => Cond::Ns,
            Opcode::Jp => Cond::P,
            Opcode::Jnp => Cond::Np,
            Opcode::Jl => Cond::L,
            Opcode::Jge => Cond::Ge,
            Opcode::Jle => Cond::Le,
            Opcode::Jg => Cond::G,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Mov => "mov",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Cmp => "cmp",
            Opcode::Test => "test",
            Opcode::Inc => "inc",
            Opcode::Dec => "dec",
            Opcode::Movq => "movq",
            Opcode::Pxor => "pxor",
            Opcode::Jmp => "jmp",
            Opcode::Jo => "jo",
            Opcode::Jno => "jno",
            Opcode::Jc => "jc",
            Opcode::Jnc => "jnc",
            Opcode::Jz => "jz",
            Opcode::Jnz => "jnz",
            Opcode::Jbe => "jbe",
            Opcode::Ja => "ja",
            Opcode::Js => "js",
            Opcode::Jns => "jns",
            Opcode::Jp => "jp",
            Opcode::Jnp => "jnp",
            Opcode::Jl => "jl",
            Opcode::Jge => "jge",
            Opcode::Jle => "jle",
            Opcode::Jg => "jg",
            Opcode::JmpInd => "jmp_ind",
            Opcode::Ret => "ret",
            Opcode::Cpuid => "cpuid",
            Opcode::Syscall => "syscall",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition codes of `jcc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    O,
    No,
    C,
    Nc,
    Z,
    Nz,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

impl Cond {
    /// The condition with the opposite outcome, and whether `self` is that negation
    pub fn split(self) -> (Cond, bool) {
        match self {
            Cond::No => (Cond::O, true),
            Cond::Nc => (Cond::C, true),
            Cond::Nz => (Cond::Z, true),
            Cond::A => (Cond::Be, true),
            Cond::Ns => (Cond::S, true),
            Cond::Np => (Cond::P, true),
            Cond::Ge => (Cond::L, true),
            Cond::G => (Cond::Le, true),
            positive => (positive, false),
        }
    }
}

/// Instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// A register viewed through one facet
    Reg { reg: Reg, facet: Facet },
    /// Immediate, or absolute target address for direct jumps
    Imm { imm: i64 },
}

impl Operand {
    pub fn reg(reg: Reg, facet: Facet) -> Self {
        Operand::Reg { reg, facet }
    }

    pub fn imm(imm: i64) -> Self {
        Operand::Imm { imm }
    }
}

/// How control leaves an instruction, as far as the decoder can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Continues with the next instruction
    FallThrough,
    /// Always continues at the target
    Jump(u64),
    /// Continues at the target or the next instruction
    CondJump(u64),
    /// Target computed at run time
    Indirect,
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    pub opcode: Opcode,
    pub address: u64,
    pub length: u64,
    #[serde(default)]
    pub operands: Vec<Operand>,
}

impl Instr {
    pub fn new(opcode: Opcode, address: u64, length: u64, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            address,
            length,
            operands,
        }
    }

    /// Address of the following instruction
    pub fn end(&self) -> u64 {
        self.address.wrapping_add(self.length)
    }

    pub fn control_flow(&self) -> ControlFlow {
        let target = || match self.operands.first() {
            Some(Operand::Imm { imm }) => Some(*imm as u64),
            _ => None,
        };
        match self.opcode {
            Opcode::Jmp => target().map_or(ControlFlow::Indirect, ControlFlow::Jump),
            op if op.condition().is_some() => {
                target().map_or(ControlFlow::Indirect, ControlFlow::CondJump)
            }
            Opcode::JmpInd | Opcode::Ret => ControlFlow::Indirect,
            _ => ControlFlow::FallThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_is_complete() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.index(), i, "{op} out of order");
        }
    }

    #[test]
    fn test_control_flow() {
        let jz = Instr::new(Opcode::Jz, 0x10, 2, vec![Operand::imm(0x40)]);
        assert_eq!(jz.control_flow(), ControlFlow::CondJump(0x40));
        assert_eq!(jz.end(), 0x12);

        let jmp = Instr::new(Opcode::Jmp, 0x10, 5, vec![Operand::imm(0x8)]);
        assert_eq!(jmp.control_flow(), ControlFlow::Jump(0x8));

        let ret = Instr::new(Opcode::Ret, 0x10, 1, vec![]);
        assert_eq!(ret.control_flow(), ControlFlow::Indirect);

        let add = Instr::new(
            Opcode::Add,
            0x10,
            3,
            vec![Operand::reg(Reg::gp(0), Facet::I64), Operand::imm(1)],
        );
        assert_eq!(add.control_flow(), ControlFlow::FallThrough);
    }

    #[test]
    fn test_condition_split() {
        assert_eq!(Cond::Nz.split(), (Cond::Z, true));
        assert_eq!(Cond::Le.split(), (Cond::Le, false));
        assert_eq!(Opcode::Jg.condition(), Some(Cond::G));
        assert_eq!(Opcode::Jmp.condition(), None);
    }
}
