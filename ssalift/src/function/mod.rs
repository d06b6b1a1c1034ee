//! Function-level lifting
//!
//! `FunctionBuilder` owns the IR arena and the block table during phase 1.
//! `seal()` checks that every block is terminated and hands out a
//! `SealedFunction`, the only type that can backfill phis, so phase 2 cannot
//! start while a predecessor is still being translated.

use std::collections::HashMap;

use tracing::{debug, debug_span, warn};

use crate::block::{self, BasicBlock, BlockExit, BlockId};
use crate::error::{LiftError, LiftResult};
use crate::instr::{ControlFlow, Instr};
use crate::ir::{format_function, IrFunction};
use crate::semantics::HandlerTable;
use crate::trace::DecodedFunction;

/// Lifting options
#[derive(Debug, Clone)]
pub struct LiftConfig {
    /// Emit a nop before each instruction's IR
    pub emit_separators: bool,
    /// Fail instead of returning a partial function when an exit is unresolved
    pub reject_unresolved: bool,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            emit_separators: true,
            reject_unresolved: false,
        }
    }
}

impl LiftConfig {
    pub fn emit_separators(mut self, enabled: bool) -> Self {
        self.emit_separators = enabled;
        self
    }

    pub fn reject_unresolved(mut self, enabled: bool) -> Self {
        self.reject_unresolved = enabled;
        self
    }
}

/// Phase 1: blocks are created, translated and terminated
pub struct FunctionBuilder {
    config: LiftConfig,
    ir: IrFunction,
    blocks: Vec<BasicBlock>,
    by_address: HashMap<u64, BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, config: &LiftConfig) -> Self {
        Self {
            config: config.clone(),
            ir: IrFunction::new(name),
            blocks: Vec::new(),
            by_address: HashMap::new(),
        }
    }

    /// Create the block starting at `address`
    pub fn add_block(&mut self, address: u64) -> BlockId {
        assert!(
            !self.by_address.contains_key(&address),
            "block at {address:#x} added twice"
        );
        let id = BlockId(self.blocks.len() as u32);
        let ir_block = self.ir.add_block(address);
        self.blocks.push(BasicBlock::new(id, address, ir_block));
        self.by_address.insert(address, id);
        id
    }

    pub fn block_at(&self, address: u64) -> Option<BlockId> {
        self.by_address.get(&address).copied()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn ir(&self) -> &IrFunction {
        &self.ir
    }

    pub fn add_phis(&mut self, id: BlockId) {
        self.blocks[id.index()].add_phis(&mut self.ir);
    }

    pub fn add_instruction(
        &mut self,
        id: BlockId,
        instr: &Instr,
        handlers: &HandlerTable,
    ) -> LiftResult<()> {
        self.blocks[id.index()].add_instruction(&mut self.ir, instr, handlers, &self.config)
    }

    pub fn register_edges(&mut self, id: BlockId, branch: Option<BlockId>, fallthrough: Option<BlockId>) {
        block::register_edges(&mut self.blocks, id, branch, fallthrough);
    }

    pub fn terminate(&mut self, id: BlockId) {
        self.blocks[id.index()].terminate(&mut self.ir);
    }

    /// End phase 1
    ///
    /// # Panics
    /// If any block is not terminated yet.
    pub fn seal(self) -> SealedFunction {
        for block in &self.blocks {
            assert!(
                block.is_terminated(),
                "function sealed before block {:#x} was terminated",
                block.address()
            );
        }
        SealedFunction {
            ir: self.ir,
            blocks: self.blocks,
            by_address: self.by_address,
        }
    }
}

/// Phase 2: every block is terminated, entry phis can be filled
pub struct SealedFunction {
    ir: IrFunction,
    blocks: Vec<BasicBlock>,
    by_address: HashMap<u64, BlockId>,
}

impl SealedFunction {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn ir(&self) -> &IrFunction {
        &self.ir
    }

    pub fn fill_phis(&mut self, id: BlockId) {
        block::fill_phis(&mut self.blocks, &mut self.ir, id);
    }

    /// Fill every block that has not been filled yet
    pub fn fill_all_phis(mut self) -> LiftedFunction {
        for i in 0..self.blocks.len() {
            if !self.blocks[i].phis_filled() {
                self.fill_phis(BlockId(i as u32));
            }
        }
        let unresolved = self
            .blocks
            .iter()
            .filter(|b| b.exit() == Some(BlockExit::Unresolved))
            .map(BasicBlock::id)
            .collect();
        LiftedFunction {
            ir: self.ir,
            blocks: self.blocks,
            by_address: self.by_address,
            unresolved,
        }
    }
}

/// Result of lifting one function
#[derive(Debug)]
pub struct LiftedFunction {
    ir: IrFunction,
    blocks: Vec<BasicBlock>,
    by_address: HashMap<u64, BlockId>,
    unresolved: Vec<BlockId>,
}

impl LiftedFunction {
    pub fn ir(&self) -> &IrFunction {
        &self.ir
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_at(&self, address: u64) -> Option<&BasicBlock> {
        self.by_address.get(&address).map(|id| self.block(*id))
    }

    /// Blocks without an IR terminator
    pub fn unresolved(&self) -> &[BlockId] {
        &self.unresolved
    }

    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Textual IR
    pub fn format(&self) -> String {
        format_function(&self.ir)
    }
}

/// Runs the full two-phase protocol over a decoded function
#[derive(Debug, Clone, Default)]
pub struct Lifter {
    config: LiftConfig,
    handlers: HandlerTable,
}

impl Lifter {
    pub fn new(config: LiftConfig) -> Self {
        Self {
            config,
            handlers: HandlerTable::default(),
        }
    }

    pub fn with_handlers(config: LiftConfig, handlers: HandlerTable) -> Self {
        Self { config, handlers }
    }

    pub fn config(&self) -> &LiftConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn lift(&self, func: &DecodedFunction) -> LiftResult<LiftedFunction> {
        let _span = debug_span!("lift", function = %func.name).entered();
        let mut builder = FunctionBuilder::new(&func.name, &self.config);

        for decoded in &func.blocks {
            if builder.block_at(decoded.address).is_some() {
                return Err(LiftError::DuplicateBlock { address: decoded.address });
            }
            if decoded.instrs.is_empty() {
                return Err(LiftError::EmptyBlock { address: decoded.address });
            }
            builder.add_block(decoded.address);
        }

        // Every edge is known before any block is translated.
        for (i, decoded) in func.blocks.iter().enumerate() {
            let Some(last) = decoded.instrs.last() else {
                continue;
            };
            let resolve = |target: u64| {
                builder.block_at(target).ok_or(LiftError::UnknownTarget {
                    from: last.address,
                    target,
                })
            };
            let (branch, fallthrough) = match last.control_flow() {
                ControlFlow::FallThrough => (None, Some(resolve(last.end())?)),
                ControlFlow::Jump(target) => (Some(resolve(target)?), None),
                ControlFlow::CondJump(target) => (Some(resolve(target)?), Some(resolve(last.end())?)),
                ControlFlow::Indirect => (None, None),
            };
            builder.register_edges(BlockId(i as u32), branch, fallthrough);
        }

        for (i, decoded) in func.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            builder.add_phis(id);
            for instr in &decoded.instrs {
                builder.add_instruction(id, instr, &self.handlers)?;
            }
            builder.terminate(id);
        }

        let lifted = builder.seal().fill_all_phis();
        debug!(
            "lifted {}: {} blocks, {} values",
            func.name,
            lifted.blocks.len(),
            lifted.ir.value_count()
        );

        if let Some(&id) = lifted.unresolved.first() {
            let address = lifted.block(id).address();
            if self.config.reject_unresolved {
                return Err(LiftError::UnresolvedControlTransfer { address });
            }
            warn!(
                "{}: {} block(s) with unresolved exits, first at {address:#x}",
                func.name,
                lifted.unresolved.len()
            );
        }
        Ok(lifted)
    }
}
