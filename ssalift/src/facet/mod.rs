//! Register facets
//!
//! A facet is one width/interpretation view of a register: the low 32 bits
//! of a general purpose register, the packed-double view of a vector
//! register, and so on. Every register class has a *native* facet covering
//! the whole register; all other facets are derived from it on demand by
//! the register file.

use serde::{Deserialize, Serialize};

use crate::ir::Type;

/// Register class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegClass {
    /// General purpose 64-bit registers
    Gp,
    /// 128-bit vector registers
    Vec,
    /// Instruction pointer pseudo-register
    Ip,
}

impl RegClass {
    /// Facet covering the whole register
    pub fn native_facet(self) -> Facet {
        match self {
            RegClass::Gp | RegClass::Ip => Facet::I64,
            RegClass::Vec => Facet::I128,
        }
    }

    /// All valid facets of this class, native facet first
    pub fn facets(self) -> &'static [Facet] {
        match self {
            RegClass::Gp => GP_FACETS,
            RegClass::Vec => VEC_FACETS,
            RegClass::Ip => IP_FACETS,
        }
    }

    /// Whether `facet` is a valid view of this class
    pub fn has_facet(self, facet: Facet) -> bool {
        self.facets().contains(&facet)
    }
}

const GP_FACETS: &[Facet] = &[Facet::I64, Facet::I32, Facet::I16, Facet::I8, Facet::I8H];

const VEC_FACETS: &[Facet] = &[
    Facet::I128,
    Facet::V16I8,
    Facet::V8I16,
    Facet::V4I32,
    Facet::V2I64,
    Facet::V4F32,
    Facet::V2F64,
    Facet::F32,
    Facet::F64,
];

const IP_FACETS: &[Facet] = &[Facet::I64];

/// A register view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facet {
    I64,
    I32,
    I16,
    I8,
    /// Bits 8..16 (`ah`, `bh`, ...)
    I8H,
    I128,
    V16I8,
    V8I16,
    V4I32,
    V2I64,
    V4F32,
    V2F64,
    F32,
    F64,
}

impl Facet {
    /// IR type of a value held in this facet
    pub fn ty(self) -> Type {
        match self {
            Facet::I64 => Type::I64,
            Facet::I32 => Type::I32,
            Facet::I16 => Type::I16,
            Facet::I8 | Facet::I8H => Type::I8,
            Facet::I128 => Type::I128,
            Facet::V16I8 => Type::V16I8,
            Facet::V8I16 => Type::V8I16,
            Facet::V4I32 => Type::V4I32,
            Facet::V2I64 => Type::V2I64,
            Facet::V4F32 => Type::V4F32,
            Facet::V2F64 => Type::V2F64,
            Facet::F32 => Type::F32,
            Facet::F64 => Type::F64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Facet::I64 => "i64",
            Facet::I32 => "i32",
            Facet::I16 => "i16",
            Facet::I8 => "i8",
            Facet::I8H => "i8h",
            Facet::I128 => "i128",
            Facet::V16I8 => "v16i8",
            Facet::V8I16 => "v8i16",
            Facet::V4I32 => "v4i32",
            Facet::V2I64 => "v2i64",
            Facet::V4F32 => "v4f32",
            Facet::V2F64 => "v2f64",
            Facet::F32 => "f32",
            Facet::F64 => "f64",
        }
    }
}

impl std::fmt::Display for Facet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_facet_listed_first() {
        for class in [RegClass::Gp, RegClass::Vec, RegClass::Ip] {
            assert_eq!(class.facets()[0], class.native_facet());
        }
    }

    #[test]
    fn test_facet_types() {
        assert_eq!(Facet::I8H.ty(), Type::I8);
        assert_eq!(Facet::V2F64.ty(), Type::V2F64);
        assert_eq!(Facet::I128.ty().bits(), 128);
    }

    #[test]
    fn test_class_membership() {
        assert!(RegClass::Gp.has_facet(Facet::I8H));
        assert!(!RegClass::Gp.has_facet(Facet::F64));
        assert!(RegClass::Vec.has_facet(Facet::F64));
        assert!(!RegClass::Ip.has_facet(Facet::I32));
    }
}
