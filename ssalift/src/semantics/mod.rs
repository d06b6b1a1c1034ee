//! Instruction semantics
//!
//! Semantic handlers are looked up by opcode in a fixed table. A missing
//! entry is a hard error for the instruction (and with it the function):
//! there is no safe default meaning for an instruction nobody described.

mod x86;

use crate::block::BlockBuilder;
use crate::error::LiftResult;
use crate::instr::{Instr, Opcode};

/// Semantic handler: reads and writes the block's registers, appends IR,
/// and sets the next-PC value for control-flow instructions.
pub type Handler = fn(&mut BlockBuilder<'_>, &Instr) -> LiftResult<()>;

/// Opcode → handler table
#[derive(Clone)]
pub struct HandlerTable {
    handlers: [Option<Handler>; Opcode::COUNT],
}

impl HandlerTable {
    /// Table without any handlers
    pub fn empty() -> Self {
        Self {
            handlers: [None; Opcode::COUNT],
        }
    }

    pub fn register(&mut self, opcode: Opcode, handler: Handler) {
        self.handlers[opcode.index()] = Some(handler);
    }

    /// Builder-style `register`
    pub fn with(mut self, opcode: Opcode, handler: Handler) -> Self {
        self.register(opcode, handler);
        self
    }

    pub fn get(&self, opcode: Opcode) -> Option<Handler> {
        self.handlers[opcode.index()]
    }

    pub fn supports(&self, opcode: Opcode) -> bool {
        self.handlers[opcode.index()].is_some()
    }
}

/// The reference x86-64 handlers
impl Default for HandlerTable {
    fn default() -> Self {
        let mut table = Self::empty();
        x86::install(&mut table);
        table
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(Opcode::ALL.iter().filter(|op| self.supports(**op)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = HandlerTable::default();
        assert!(table.supports(Opcode::Add));
        assert!(table.supports(Opcode::Jnz));
        assert!(table.supports(Opcode::Ret));
        assert!(!table.supports(Opcode::Cpuid));
        assert!(!table.supports(Opcode::Syscall));
    }

    #[test]
    fn test_register_overrides() {
        let mut table = HandlerTable::empty();
        assert!(table.get(Opcode::Nop).is_none());
        table.register(Opcode::Nop, |_, _| Ok(()));
        assert!(table.supports(Opcode::Nop));
        assert!(!table.supports(Opcode::Mov));
    }
}
