//! Basic blocks
//!
//! A `BasicBlock` is translated in two phases:
//!
//! 1. `add_phis`, one `add_instruction` per decoded instruction, and
//!    `terminate`, with `register_edges` called once for every block before
//!    its terminator is resolved.
//! 2. `fill_phis`, only once every block of the function has completed
//!    phase 1, because a predecessor may come later in program order.
//!
//! Blocks never own each other. Edges and predecessor lists are `BlockId`s
//! into the function's block table, which is why edge registration and
//! backfill are free functions over that table rather than methods.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LiftError, LiftResult};
use crate::facet::Facet;
use crate::function::LiftConfig;
use crate::instr::Instr;
use crate::ir::{
    BinOp, CastOp, CmpPred, IrBlockId, IrFunction, Terminator, Type, UnaryOp, ValueId,
};
use crate::reg::{Flag, Reg};
use crate::regfile::{RegFile, Slot};
use crate::semantics::HandlerTable;

/// Index of a block in its function's block table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Id of the `index`-th block added to a function
    pub fn from_index(index: usize) -> Self {
        BlockId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outgoing edge: target block and its IR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Successor {
    pub block: BlockId,
    pub ir_block: IrBlockId,
}

/// How control leaves a terminated block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExit {
    /// Unconditional transfer
    Jump(BlockId),
    /// `taken` if `cond` is true, `fallthrough` otherwise
    Branch {
        cond: ValueId,
        taken: BlockId,
        fallthrough: BlockId,
    },
    /// The target could not be determined at lift time (indirect jump,
    /// return). No IR terminator is emitted; consumers must treat the block
    /// as an exit of the lifted region.
    Unresolved,
}

/// A basic block under translation
#[derive(Debug, Clone)]
pub struct BasicBlock {
    id: BlockId,
    address: u64,
    ir_block: IrBlockId,
    preds: Vec<BlockId>,
    branch: Option<Successor>,
    fallthrough: Option<Successor>,
    edges_registered: bool,
    regfile: RegFile,
    /// Where control continues after the last translated instruction
    next_pc: Option<ValueId>,
    /// Entry phi per register facet and flag, in creation order
    phis: Vec<(Slot, ValueId)>,
    phis_added: bool,
    phis_filled: bool,
    instr_count: usize,
    exit: Option<BlockExit>,
}

impl BasicBlock {
    pub fn new(id: BlockId, address: u64, ir_block: IrBlockId) -> Self {
        Self {
            id,
            address,
            ir_block,
            preds: Vec::new(),
            branch: None,
            fallthrough: None,
            edges_registered: false,
            regfile: RegFile::new(ir_block),
            next_pc: None,
            phis: Vec::new(),
            phis_added: false,
            phis_filled: false,
            instr_count: 0,
            exit: None,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn ir_block(&self) -> IrBlockId {
        self.ir_block
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.preds
    }

    pub fn branch(&self) -> Option<BlockId> {
        self.branch.map(|s| s.block)
    }

    pub fn fallthrough(&self) -> Option<BlockId> {
        self.fallthrough.map(|s| s.block)
    }

    /// Registered successors, branch first
    pub fn successors(&self) -> impl Iterator<Item = BlockId> {
        self.branch().into_iter().chain(self.fallthrough())
    }

    pub fn regfile(&self) -> &RegFile {
        &self.regfile
    }

    pub fn next_pc(&self) -> Option<ValueId> {
        self.next_pc
    }

    pub fn phis(&self) -> &[(Slot, ValueId)] {
        &self.phis
    }

    /// Entry phi of a register facet or flag
    pub fn phi(&self, slot: Slot) -> Option<ValueId> {
        self.phis.iter().find(|(s, _)| *s == slot).map(|(_, phi)| *phi)
    }

    pub fn instr_count(&self) -> usize {
        self.instr_count
    }

    pub fn exit(&self) -> Option<BlockExit> {
        self.exit
    }

    pub fn is_terminated(&self) -> bool {
        self.exit.is_some()
    }

    pub fn phis_filled(&self) -> bool {
        self.phis_filled
    }

    /// Create an empty phi for every register facet and flag and make it the
    /// block's entry state.
    ///
    /// Predecessors reached through back edges are not known yet, so every
    /// facet gets a phi; the facet writes are not exclusive, so other facets
    /// of the same register still compose from them.
    pub fn add_phis(&mut self, ir: &mut IrFunction) {
        assert!(!self.phis_added, "phis of block {:#x} added twice", self.address);
        assert_eq!(self.instr_count, 0, "phis must precede instructions");

        for reg in Reg::architectural() {
            for &facet in reg.class.facets() {
                let phi = ir.phi(self.ir_block, facet.ty());
                self.regfile.write(reg, facet, phi, false);
                self.phis.push((Slot::Reg(reg, facet), phi));
            }
        }
        for flag in Flag::ALL {
            let phi = ir.phi(self.ir_block, Type::I1);
            self.regfile.write_flag(flag, phi);
            self.phis.push((Slot::Flag(flag), phi));
        }

        self.phis_added = true;
        debug!("block {:#x}: added {} entry phis", self.address, self.phis.len());
    }

    /// Translate one instruction
    pub fn add_instruction(
        &mut self,
        ir: &mut IrFunction,
        instr: &Instr,
        handlers: &HandlerTable,
        config: &LiftConfig,
    ) -> LiftResult<()> {
        assert!(self.phis_added, "instruction added to block {:#x} before its phis", self.address);
        assert!(self.exit.is_none(), "instruction added to terminated block {:#x}", self.address);

        let rip = ir.const_int(Type::I64, instr.end() as u128);
        self.regfile.write(Reg::IP, Facet::I64, rip, true);

        if config.emit_separators {
            ir.nop(self.ir_block);
        }

        // Continue with the next instruction unless the handler says otherwise.
        let no_branch = ir.const_bool(false);
        self.next_pc = Some(ir.select(self.ir_block, no_branch, rip, rip));
        self.instr_count += 1;

        let Some(handler) = handlers.get(instr.opcode) else {
            warn!("no handler for {} at {:#x}", instr.opcode, instr.address);
            return Err(LiftError::unsupported(instr));
        };
        debug!("lifting {} at {:#x}", instr.opcode, instr.address);

        let mut builder = BlockBuilder { block: self, ir };
        handler(&mut builder, instr)
    }

    /// Emit the terminator described by the next-PC value
    pub fn terminate(&mut self, ir: &mut IrFunction) {
        assert!(self.exit.is_none(), "block {:#x} terminated twice", self.address);

        let exit = match self.next_pc {
            None => self.jump(ir, self.fallthrough, "fall-through"),
            Some(next_pc) => match ir.select_parts(next_pc) {
                Some((cond, _, _)) if ir.is_undef(cond) => BlockExit::Unresolved,
                Some((cond, _, _)) => match ir.as_const(cond) {
                    Some(0) => self.jump(ir, self.fallthrough, "fall-through"),
                    Some(_) => self.jump(ir, self.branch, "branch"),
                    None => {
                        let (Some(taken), Some(fallthrough)) = (self.branch, self.fallthrough) else {
                            panic!("conditional exit of block {:#x} needs two successors", self.address);
                        };
                        ir.set_terminator(
                            self.ir_block,
                            Terminator::CondBr {
                                cond,
                                then_block: taken.ir_block,
                                else_block: fallthrough.ir_block,
                            },
                        );
                        BlockExit::Branch {
                            cond,
                            taken: taken.block,
                            fallthrough: fallthrough.block,
                        }
                    }
                },
                None => BlockExit::Unresolved,
            },
        };

        if exit == BlockExit::Unresolved {
            warn!("block {:#x}: exit left unresolved", self.address);
        } else {
            debug!(?exit, "block {:#x} terminated", self.address);
        }
        self.exit = Some(exit);
    }

    fn jump(&self, ir: &mut IrFunction, target: Option<Successor>, kind: &str) -> BlockExit {
        let Some(target) = target else {
            panic!("block {:#x} has no {kind} successor", self.address);
        };
        ir.set_terminator(self.ir_block, Terminator::Br(target.ir_block));
        BlockExit::Jump(target.block)
    }
}

/// Record `branch` and `fallthrough` as successors of `from`, and `from` as
/// their predecessor. Must be called exactly once per block, before the
/// block is terminated.
pub(crate) fn register_edges(
    blocks: &mut [BasicBlock],
    from: BlockId,
    branch: Option<BlockId>,
    fallthrough: Option<BlockId>,
) {
    let source = &mut blocks[from.index()];
    assert!(!source.edges_registered, "edges of block {:#x} registered twice", source.address);
    assert!(source.exit.is_none(), "edges of block {:#x} registered after termination", source.address);
    source.edges_registered = true;

    let mut link = |target: BlockId| {
        let block = &mut blocks[target.index()];
        block.preds.push(from);
        Successor {
            block: target,
            ir_block: block.ir_block,
        }
    };
    let branch = branch.map(&mut link);
    let fallthrough = fallthrough.map(&mut link);

    let source = &mut blocks[from.index()];
    source.branch = branch;
    source.fallthrough = fallthrough;
}

/// Give every entry phi of block `id` one input per predecessor edge, read
/// from the predecessor's final register state.
pub(crate) fn fill_phis(blocks: &mut [BasicBlock], ir: &mut IrFunction, id: BlockId) {
    let block = &blocks[id.index()];
    assert!(!block.phis_filled, "phis of block {:#x} filled twice", block.address);
    let address = block.address;
    let preds = block.preds.clone();
    let phis = block.phis.clone();

    for pred in preds {
        let pred_block = &mut blocks[pred.index()];
        assert!(
            pred_block.is_terminated(),
            "phis of block {address:#x} filled before predecessor {:#x} was terminated",
            pred_block.address
        );
        let from = pred_block.ir_block;
        for &(slot, phi) in &phis {
            let value = pred_block.regfile.read_slot(ir, slot);
            ir.add_incoming(phi, value, from);
        }
    }

    blocks[id.index()].phis_filled = true;
}

/// A block and the IR arena, as seen by a semantic handler
pub struct BlockBuilder<'a> {
    block: &'a mut BasicBlock,
    ir: &'a mut IrFunction,
}

impl<'a> BlockBuilder<'a> {
    pub fn block(&self) -> &BasicBlock {
        self.block
    }

    pub fn ir(&mut self) -> &mut IrFunction {
        self.ir
    }

    pub fn reg(&mut self, reg: Reg, facet: Facet) -> ValueId {
        self.block.regfile.read(self.ir, reg, facet)
    }

    pub fn set_reg(&mut self, reg: Reg, facet: Facet, value: ValueId, exclusive: bool) {
        self.block.regfile.write(reg, facet, value, exclusive);
    }

    pub fn flag(&mut self, flag: Flag) -> ValueId {
        self.block.regfile.read_flag(self.ir, flag)
    }

    pub fn set_flag(&mut self, flag: Flag, value: ValueId) {
        self.block.regfile.write_flag(flag, value);
    }

    pub fn next_pc(&self) -> Option<ValueId> {
        self.block.next_pc
    }

    /// Replace the next-PC value; control-flow handlers store a select here
    pub fn set_next_pc(&mut self, value: ValueId) {
        self.block.next_pc = Some(value);
    }

    pub fn constant(&mut self, ty: Type, bits: u128) -> ValueId {
        self.ir.const_int(ty, bits)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.ir.binary(self.block.ir_block, op, lhs, rhs)
    }

    pub fn unary(&mut self, op: UnaryOp, value: ValueId) -> ValueId {
        self.ir.unary(self.block.ir_block, op, value)
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.ir.icmp(self.block.ir_block, pred, lhs, rhs)
    }

    pub fn select(&mut self, cond: ValueId, then_value: ValueId, else_value: ValueId) -> ValueId {
        self.ir.select(self.block.ir_block, cond, then_value, else_value)
    }

    pub fn cast(&mut self, op: CastOp, value: ValueId, to: Type) -> ValueId {
        self.ir.cast(self.block.ir_block, op, value, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Opcode;
    use crate::ir::ValueKind;
    use crate::semantics::Handler;

    fn table() -> (IrFunction, Vec<BasicBlock>) {
        let mut ir = IrFunction::new("test");
        let blocks = (0..3u32)
            .map(|i| {
                let address = 0x1000 + 0x10 * i as u64;
                BasicBlock::new(BlockId(i), address, ir.add_block(address))
            })
            .collect();
        (ir, blocks)
    }

    fn ok(_: &mut BlockBuilder<'_>, _: &Instr) -> LiftResult<()> {
        Ok(())
    }

    fn handlers(op: Opcode, handler: Handler) -> HandlerTable {
        HandlerTable::empty().with(op, handler)
    }

    #[test]
    fn test_add_phis_covers_every_facet() {
        let (mut ir, mut blocks) = table();
        blocks[0].add_phis(&mut ir);

        let expected = 16 * 5 + 16 * 9 + Flag::COUNT;
        assert_eq!(blocks[0].phis().len(), expected);
        assert_eq!(ir.block(blocks[0].ir_block()).phis.len(), expected);

        let slot = Slot::Reg(Reg::gp(3), Facet::I8H);
        let phi = blocks[0].phi(slot).unwrap();
        assert_eq!(blocks[0].regfile().peek(Reg::gp(3), Facet::I8H), Some(phi));
        assert_eq!(ir.ty(phi), Type::I8);
        assert!(ir.incoming(phi).is_empty());
    }

    #[test]
    fn test_pc_written_before_handler_runs() {
        fn check_pc(bb: &mut BlockBuilder<'_>, instr: &Instr) -> LiftResult<()> {
            let pc = bb.reg(Reg::IP, Facet::I64);
            assert_eq!(bb.ir().as_const(pc), Some(instr.end() as u128));
            Ok(())
        }

        let (mut ir, mut blocks) = table();
        blocks[0].add_phis(&mut ir);
        let instr = Instr::new(Opcode::Nop, 0x1000, 3, vec![]);
        blocks[0]
            .add_instruction(&mut ir, &instr, &handlers(Opcode::Nop, check_pc), &LiftConfig::default())
            .unwrap();

        let pc = blocks[0].regfile().peek(Reg::IP, Facet::I64).unwrap();
        assert_eq!(ir.as_const(pc), Some(0x1003));
        let (cond, then_value, else_value) = ir.select_parts(blocks[0].next_pc().unwrap()).unwrap();
        assert_eq!(ir.as_const(cond), Some(0));
        assert_eq!((then_value, else_value), (pc, pc));
    }

    #[test]
    fn test_separator_emitted_per_instruction() {
        let (mut ir, mut blocks) = table();
        blocks[0].add_phis(&mut ir);
        let nop_table = handlers(Opcode::Nop, ok);
        for (i, address) in [0x1000u64, 0x1001].into_iter().enumerate() {
            let instr = Instr::new(Opcode::Nop, address, 1, vec![]);
            blocks[0].add_instruction(&mut ir, &instr, &nop_table, &LiftConfig::default()).unwrap();
            assert_eq!(blocks[0].instr_count(), i + 1);
        }
        let nops = ir
            .block(blocks[0].ir_block())
            .insts
            .iter()
            .filter(|v| matches!(ir.value(**v).kind, ValueKind::Inst { inst: crate::ir::Inst::Nop, .. }))
            .count();
        assert_eq!(nops, 2);

        let (mut ir, mut blocks) = table();
        blocks[0].add_phis(&mut ir);
        let instr = Instr::new(Opcode::Nop, 0x1000, 1, vec![]);
        let config = LiftConfig::default().emit_separators(false);
        blocks[0].add_instruction(&mut ir, &instr, &nop_table, &config).unwrap();
        assert_eq!(ir.block(blocks[0].ir_block()).insts.len(), 1);
    }

    #[test]
    fn test_unhandled_opcode_fails() {
        let (mut ir, mut blocks) = table();
        blocks[0].add_phis(&mut ir);
        let instr = Instr::new(Opcode::Cpuid, 0x1000, 2, vec![]);
        let err = blocks[0]
            .add_instruction(&mut ir, &instr, &HandlerTable::empty(), &LiftConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            LiftError::UnsupportedInstruction { address: 0x1000, opcode: Opcode::Cpuid }
        ));
    }

    #[test]
    fn test_edge_predecessor_duality() {
        let (_, mut blocks) = table();
        register_edges(&mut blocks, BlockId(0), Some(BlockId(2)), Some(BlockId(1)));
        register_edges(&mut blocks, BlockId(1), None, Some(BlockId(2)));
        register_edges(&mut blocks, BlockId(2), Some(BlockId(2)), None);

        assert_eq!(blocks[0].successors().collect::<Vec<_>>(), vec![BlockId(2), BlockId(1)]);
        assert_eq!(blocks[1].predecessors(), &[BlockId(0)]);
        assert_eq!(blocks[2].predecessors(), &[BlockId(0), BlockId(1), BlockId(2)]);
        for a in &blocks {
            for b in &blocks {
                let edges = a.successors().filter(|s| *s == b.id()).count();
                let preds = b.predecessors().iter().filter(|p| **p == a.id()).count();
                assert_eq!(edges, preds);
            }
        }
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_double_edge_registration_panics() {
        let (_, mut blocks) = table();
        register_edges(&mut blocks, BlockId(0), None, Some(BlockId(1)));
        register_edges(&mut blocks, BlockId(0), None, Some(BlockId(1)));
    }

    #[test]
    fn test_empty_block_falls_through() {
        let (mut ir, mut blocks) = table();
        register_edges(&mut blocks, BlockId(0), None, Some(BlockId(1)));
        blocks[0].add_phis(&mut ir);
        blocks[0].terminate(&mut ir);
        assert_eq!(blocks[0].exit(), Some(BlockExit::Jump(BlockId(1))));
        assert_eq!(
            ir.block(blocks[0].ir_block()).terminator,
            Some(Terminator::Br(blocks[1].ir_block()))
        );
    }

    #[test]
    #[should_panic(expected = "has no branch successor")]
    fn test_taken_branch_requires_successor() {
        fn always(bb: &mut BlockBuilder<'_>, _: &Instr) -> LiftResult<()> {
            let t = bb.ir().const_bool(true);
            let target = bb.constant(Type::I64, 0x2000);
            let rip = bb.reg(Reg::IP, Facet::I64);
            let next = bb.select(t, target, rip);
            bb.set_next_pc(next);
            Ok(())
        }

        let (mut ir, mut blocks) = table();
        register_edges(&mut blocks, BlockId(0), None, Some(BlockId(1)));
        blocks[0].add_phis(&mut ir);
        let instr = Instr::new(Opcode::Jmp, 0x1000, 5, vec![]);
        blocks[0]
            .add_instruction(&mut ir, &instr, &handlers(Opcode::Jmp, always), &LiftConfig::default())
            .unwrap();
        blocks[0].terminate(&mut ir);
    }

    #[test]
    #[should_panic(expected = "before predecessor 0x1000 was terminated")]
    fn test_fill_phis_requires_terminated_predecessors() {
        let (mut ir, mut blocks) = table();
        register_edges(&mut blocks, BlockId(0), None, Some(BlockId(1)));
        blocks[0].add_phis(&mut ir);
        blocks[1].add_phis(&mut ir);
        fill_phis(&mut blocks, &mut ir, BlockId(1));
    }

    #[test]
    fn test_fill_phis_reads_predecessor_state() {
        let (mut ir, mut blocks) = table();
        register_edges(&mut blocks, BlockId(0), None, Some(BlockId(1)));
        register_edges(&mut blocks, BlockId(1), None, Some(BlockId(2)));
        for i in 0..2 {
            blocks[i].add_phis(&mut ir);
            blocks[i].terminate(&mut ir);
        }
        fill_phis(&mut blocks, &mut ir, BlockId(1));

        for &(slot, phi) in blocks[1].phis() {
            let incoming = ir.incoming(phi);
            assert_eq!(incoming.len(), 1);
            assert_eq!(incoming[0].block, blocks[0].ir_block());
            assert_eq!(Some(incoming[0].value), blocks[0].phi(slot));
        }
        assert!(blocks[1].phis_filled());
    }
}
