//! SSA Lifter Library
//!
//! Translates decoded machine-code basic blocks into an SSA intermediate
//! representation, tracking register state per block and joining it across
//! control-flow edges with phi nodes.

pub mod block;
pub mod error;
pub mod facet;
pub mod function;
pub mod instr;
pub mod ir;
pub mod reg;
pub mod regfile;
pub mod semantics;
pub mod trace;

pub use block::{BasicBlock, BlockBuilder, BlockExit, BlockId};
pub use error::{LiftError, LiftResult};
pub use facet::{Facet, RegClass};
pub use function::{FunctionBuilder, LiftConfig, LiftedFunction, Lifter, SealedFunction};
pub use instr::{Instr, Opcode, Operand};
pub use ir::IrFunction;
pub use reg::{Flag, Reg};
pub use semantics::{Handler, HandlerTable};
pub use trace::{DecodedBlock, DecodedFunction, TraceError};
