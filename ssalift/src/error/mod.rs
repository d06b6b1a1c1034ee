//! Error types

use thiserror::Error;

use crate::instr::{Instr, Opcode};

/// Result type alias
pub type LiftResult<T> = std::result::Result<T, LiftError>;

/// Lifting error
///
/// Only conditions caused by the input are reported here. Misuse of the
/// block protocol (terminating twice, backfilling before every block is
/// terminated, ...) is a bug in the caller and panics instead.
#[derive(Debug, Error)]
pub enum LiftError {
    /// No semantic handler is registered for the opcode
    #[error("Could not handle instruction at {address:#x} ({opcode})")]
    UnsupportedInstruction { address: u64, opcode: Opcode },

    /// The handler does not accept these operands
    #[error("Invalid operands for {opcode} at {address:#x}: {message}")]
    InvalidOperands {
        address: u64,
        opcode: Opcode,
        message: String,
    },

    #[error("Duplicate block at {address:#x}")]
    DuplicateBlock { address: u64 },

    #[error("Empty block at {address:#x}")]
    EmptyBlock { address: u64 },

    /// Control flow leaves the set of blocks handed to the driver
    #[error("Instruction at {from:#x} continues at {target:#x}, which is not a block of the function")]
    UnknownTarget { from: u64, target: u64 },

    /// An exit could not be resolved and the configuration rejects partial functions
    #[error("Unresolved control transfer at {address:#x}")]
    UnresolvedControlTransfer { address: u64 },
}

impl LiftError {
    pub fn unsupported(instr: &Instr) -> Self {
        Self::UnsupportedInstruction {
            address: instr.address,
            opcode: instr.opcode,
        }
    }

    pub fn invalid_operands(instr: &Instr, message: impl Into<String>) -> Self {
        Self::InvalidOperands {
            address: instr.address,
            opcode: instr.opcode,
            message: message.into(),
        }
    }

    /// Guest address the error refers to
    pub fn address(&self) -> u64 {
        match self {
            Self::UnsupportedInstruction { address, .. }
            | Self::InvalidOperands { address, .. }
            | Self::DuplicateBlock { address }
            | Self::EmptyBlock { address }
            | Self::UnresolvedControlTransfer { address } => *address,
            Self::UnknownTarget { from, .. } => *from,
        }
    }
}
