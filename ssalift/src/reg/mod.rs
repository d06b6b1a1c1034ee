//! Register and flag identities

use serde::{Deserialize, Serialize};

use crate::facet::RegClass;

/// Number of general purpose registers
pub const GP_COUNT: u8 = 16;
/// Number of vector registers
pub const VEC_COUNT: u8 = 16;

const GP_NAMES: [&str; GP_COUNT as usize] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

/// A register identity (class + index within the class)
///
/// Serialized as its assembler name (`rax`, `xmm3`, `rip`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reg {
    pub class: RegClass,
    pub index: u8,
}

impl Reg {
    /// The instruction pointer pseudo-register
    pub const IP: Reg = Reg {
        class: RegClass::Ip,
        index: 0,
    };

    pub fn gp(index: u8) -> Self {
        assert!(index < GP_COUNT, "no general purpose register {index}");
        Self {
            class: RegClass::Gp,
            index,
        }
    }

    pub fn vec(index: u8) -> Self {
        assert!(index < VEC_COUNT, "no vector register {index}");
        Self {
            class: RegClass::Vec,
            index,
        }
    }

    /// All registers that carry state across blocks, GP first then vector
    pub fn architectural() -> impl Iterator<Item = Reg> {
        (0..GP_COUNT).map(Reg::gp).chain((0..VEC_COUNT).map(Reg::vec))
    }

    /// Look up a register by assembler name
    pub fn from_name(name: &str) -> Option<Reg> {
        let name = name.to_ascii_lowercase();
        if name == "rip" {
            return Some(Reg::IP);
        }
        if let Some(index) = GP_NAMES.iter().position(|n| *n == name) {
            return Some(Reg::gp(index as u8));
        }
        let index: u8 = name.strip_prefix("xmm")?.parse().ok()?;
        (index < VEC_COUNT).then(|| Reg::vec(index))
    }

    pub fn name(&self) -> String {
        match self.class {
            RegClass::Gp => GP_NAMES[self.index as usize].to_string(),
            RegClass::Vec => format!("xmm{}", self.index),
            RegClass::Ip => "rip".to_string(),
        }
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for Reg {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Reg::from_name(&name).ok_or_else(|| format!("unknown register `{name}`"))
    }
}

impl From<Reg> for String {
    fn from(reg: Reg) -> Self {
        reg.name()
    }
}

/// Status flag bits tracked by the register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Zf,
    Sf,
    Pf,
    Cf,
    Of,
    Af,
}

impl Flag {
    pub const COUNT: usize = 6;

    pub const ALL: [Flag; Flag::COUNT] = [Flag::Zf, Flag::Sf, Flag::Pf, Flag::Cf, Flag::Of, Flag::Af];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Zf => "zf",
            Flag::Sf => "sf",
            Flag::Pf => "pf",
            Flag::Cf => "cf",
            Flag::Of => "of",
            Flag::Af => "af",
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!(Reg::from_name("rax"), Some(Reg::gp(0)));
        assert_eq!(Reg::from_name("R15"), Some(Reg::gp(15)));
        assert_eq!(Reg::from_name("xmm7"), Some(Reg::vec(7)));
        assert_eq!(Reg::from_name("rip"), Some(Reg::IP));
        assert_eq!(Reg::from_name("xmm16"), None);
        assert_eq!(Reg::from_name("eax"), None);
        assert_eq!(Reg::gp(4).name(), "rsp");
    }

    #[test]
    fn test_architectural_registers() {
        let regs: Vec<_> = Reg::architectural().collect();
        assert_eq!(regs.len(), (GP_COUNT + VEC_COUNT) as usize);
        assert!(!regs.contains(&Reg::IP));
    }

    #[test]
    fn test_flag_indices() {
        for (i, flag) in Flag::ALL.iter().enumerate() {
            assert_eq!(flag.index(), i);
        }
    }
}
