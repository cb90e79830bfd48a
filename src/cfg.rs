//! Basic blocks and control-flow-graph construction.
//!
//! [`build_function`] takes ownership of a linear instruction stream in which
//! allocas occupy a contiguous prefix, and partitions it into basic blocks:
//! the alloca prefix becomes the entry block (closed by an unconditional jump
//! into the body), a new block starts at every labelled instruction and after
//! every terminator, label fall-throughs get an explicit synthesized goto,
//! and predecessor/successor edges are wired from the terminators. Label
//! ownership migrates from the first instruction of each block onto the
//! block itself.

use std::ops::{Index, IndexMut};

use arrayvec::ArrayVec;
use if_chain::if_chain;
use log::debug;
use smallvec::SmallVec;

use crate::types::IdxVec;
use crate::types::ir::{
  BlockId, FunctionCtx, InstId, InstKind, LabelTarget, Ty, ValueId, ValueKind,
};
use crate::{Error, Result};

/// A basic block: an intrusive list of instructions, the block's label, and
/// the CFG edges. `preds` and `succs` are mutual, and the position of a
/// predecessor in `preds` is the slot order expected by any φ in this block.
#[derive(Debug)]
pub struct BasicBlock {
  /// The label addressing this block.
  pub label: ValueId,
  /// The blocks that can transfer control here.
  pub preds: SmallVec<[BlockId; 4]>,
  /// The blocks this block can transfer control to. A terminator has at most
  /// two targets.
  pub succs: ArrayVec<BlockId, 2>,
  first: Option<InstId>,
  last: Option<InstId>,
  len: usize,
}

impl BasicBlock {
  fn new(label: ValueId) -> Self {
    BasicBlock { label, preds: SmallVec::new(), succs: ArrayVec::new(), first: None, last: None, len: 0 }
  }

  /// The first instruction of the block.
  #[must_use] pub fn first(&self) -> Option<InstId> { self.first }

  /// The last instruction of the block.
  #[must_use] pub fn last(&self) -> Option<InstId> { self.last }

  /// The number of instructions currently in the block.
  #[must_use] pub fn len(&self) -> usize { self.len }

  /// Whether the block holds no instructions.
  #[must_use] pub fn is_empty(&self) -> bool { self.len == 0 }
}

/// A function in CFG form: the value arena, the blocks, and the designated
/// entry block, which contains only allocas followed by an unconditional
/// jump.
#[derive(Debug)]
pub struct Function {
  /// The function's name.
  pub name: String,
  /// The function's type.
  pub ty: Ty,
  /// The arena owning every value, instruction, and use of this function.
  pub ctx: FunctionCtx,
  /// The blocks, entry first.
  pub blocks: IdxVec<BlockId, BasicBlock>,
  /// The entry block.
  pub entry: BlockId,
}

impl Index<BlockId> for Function {
  type Output = BasicBlock;
  fn index(&self, index: BlockId) -> &BasicBlock { &self.blocks[index] }
}
impl IndexMut<BlockId> for Function {
  fn index_mut(&mut self, index: BlockId) -> &mut BasicBlock { &mut self.blocks[index] }
}

impl Function {
  /// Iterate over the instructions of block `b`, front to back.
  pub fn insts(&self, b: BlockId) -> impl Iterator<Item = InstId> + '_ {
    let mut cur = self.blocks[b].first;
    std::iter::from_fn(move || {
      let i = cur?;
      cur = self.ctx.insts[i].next;
      Some(i)
    })
  }

  /// The block's terminator, i.e. its last instruction when that is a
  /// goto, branch, or return.
  #[must_use] pub fn terminator(&self, b: BlockId) -> Option<InstId> {
    let last = self.blocks[b].last?;
    self.ctx.insts[last].is_terminator().then_some(last)
  }

  /// Append `inst` to the end of block `b`.
  pub fn push_back(&mut self, b: BlockId, inst: InstId) {
    let block = &mut self.blocks[b];
    let old_last = block.last;
    block.last = Some(inst);
    if block.first.is_none() { block.first = Some(inst) }
    block.len += 1;
    let node = &mut self.ctx.insts[inst];
    node.block = Some(b);
    node.prev = old_last;
    node.next = None;
    if let Some(p) = old_last { self.ctx.insts[p].next = Some(inst) }
  }

  /// Prepend `inst` to the front of block `b` (used for φ insertion).
  pub fn push_front(&mut self, b: BlockId, inst: InstId) {
    let block = &mut self.blocks[b];
    let old_first = block.first;
    block.first = Some(inst);
    if block.last.is_none() { block.last = Some(inst) }
    block.len += 1;
    let node = &mut self.ctx.insts[inst];
    node.block = Some(b);
    node.prev = None;
    node.next = old_first;
    if let Some(n) = old_first { self.ctx.insts[n].prev = Some(inst) }
  }

  /// Insert `inst` immediately before `at`, which must be placed in a block.
  pub fn insert_before(&mut self, at: InstId, inst: InstId) {
    let b = self.ctx.insts[at].block.expect("insertion point is not in a block");
    let prev = self.ctx.insts[at].prev;
    {
      let node = &mut self.ctx.insts[inst];
      node.block = Some(b);
      node.prev = prev;
      node.next = Some(at);
    }
    self.ctx.insts[at].prev = Some(inst);
    match prev {
      Some(p) => self.ctx.insts[p].next = Some(inst),
      None => self.blocks[b].first = Some(inst),
    }
    self.blocks[b].len += 1;
  }

  /// Remove `inst` from its block and detach all of its uses. The arena slot
  /// stays behind but is no longer reachable from any block or user list.
  pub fn erase(&mut self, inst: InstId) {
    let b = self.ctx.insts[inst].block.expect("erasing an instruction not in a block");
    let (prev, next) = {
      let node = &self.ctx.insts[inst];
      (node.prev, node.next)
    };
    match prev {
      Some(p) => self.ctx.insts[p].next = next,
      None => self.blocks[b].first = next,
    }
    match next {
      Some(n) => self.ctx.insts[n].prev = prev,
      None => self.blocks[b].last = prev,
    }
    self.blocks[b].len -= 1;
    let node = &mut self.ctx.insts[inst];
    node.prev = None;
    node.next = None;
    node.block = None;
    self.ctx.detach_inst_uses(inst);
  }

  /// The block a label addresses. Errors if the label was never placed.
  pub(crate) fn label_block(&self, label: ValueId) -> Result<BlockId> {
    match self.ctx.values[label].label_target() {
      Some(LabelTarget::Block(b)) => Ok(b),
      _ => Err(Error::control_flow("branch to a label that addresses no block")),
    }
  }

  /// The φ instructions at the head of block `b`.
  pub fn phis(&self, b: BlockId) -> impl Iterator<Item = InstId> + '_ {
    self.insts(b).take_while(|&i| matches!(self.ctx.insts[i].kind, InstKind::Phi { .. }))
  }
}

/// Partition a linear instruction stream into a [`Function`], taking
/// ownership of the codes. The caller retains no references into the stream.
pub fn build_function(
  name: impl Into<String>, ty: Ty, ctx: FunctionCtx, codes: Vec<InstId>,
) -> Result<Function> {
  let name = name.into();
  debug!("building CFG for '{}' from {} codes", name, codes.len());

  let mut func = Function {
    name,
    ty,
    ctx,
    blocks: IdxVec::new(),
    entry: BlockId(0),
  };
  let entry_label = func.ctx.alloc_label();
  let entry = func.blocks.push(BasicBlock::new(entry_label));
  func.entry = entry;
  func.ctx.values[entry_label].kind = ValueKind::Label(LabelTarget::Block(entry));

  // Split off the alloca prefix.
  let first_body = codes.iter()
    .position(|&c| !matches!(func.ctx.insts[c].kind, InstKind::Alloca { .. }))
    .unwrap_or(codes.len());
  for (i, &c) in codes.iter().enumerate() {
    if_chain! {
      if i > first_body;
      if matches!(func.ctx.insts[c].kind, InstKind::Alloca { .. });
      then {
        return Err(Error::control_flow("alloca after the first non-alloca instruction"))
      }
    }
  }
  for &c in &codes[..first_body] {
    func.push_back(entry, c);
  }

  if first_body < codes.len() {
    // Make sure the first body instruction is labelled, then close the entry
    // block with a jump to it.
    let first_label = match func.ctx.insts[codes[first_body]].label {
      Some(l) => l,
      None => {
        let l = func.ctx.alloc_label();
        func.ctx.values[l].kind = ValueKind::Label(LabelTarget::Inst(codes[first_body]));
        func.ctx.insts[codes[first_body]].label = Some(l);
        l
      }
    };
    let goto = func.ctx.push_inst_with(|ctx, id| InstKind::Goto {
      target: ctx.add_use(id, 1, first_label),
    });
    func.push_back(entry, goto);
  }

  // Partition: a labelled instruction always starts a block; an instruction
  // after a terminator starts an (unlabelled, unreachable) block; a label
  // fall-through gets an explicit goto.
  let mut cur: Option<BlockId> = None;
  for &inst in &codes[first_body..] {
    if let Some(label) = func.ctx.insts[inst].label {
      if let Some(b) = cur {
        let goto = func.ctx.push_inst_with(|ctx, id| InstKind::Goto {
          target: ctx.add_use(id, 1, label),
        });
        func.push_back(b, goto);
      }
      let b = func.blocks.push(BasicBlock::new(label));
      // Label ownership moves from the instruction onto the block.
      func.ctx.insts[inst].label = None;
      func.ctx.values[label].kind = ValueKind::Label(LabelTarget::Block(b));
      cur = Some(b);
    } else if cur.is_none() {
      let label = func.ctx.alloc_label();
      let b = func.blocks.push(BasicBlock::new(label));
      func.ctx.values[label].kind = ValueKind::Label(LabelTarget::Block(b));
      cur = Some(b);
    }
    let b = cur.expect("current block exists");
    func.push_back(b, inst);
    if func.ctx.insts[inst].is_terminator() {
      cur = None;
    }
  }

  // Wire the edges off each block's terminator.
  for b in func.blocks.keys() {
    let Some(term) = func.blocks[b].last else { continue };
    let targets: ArrayVec<ValueId, 2> = match func.ctx.insts[term].kind {
      InstKind::Goto { target } =>
        [func.ctx.uses[target].value].into_iter().collect(),
      InstKind::Branch { then_label, else_label, .. } =>
        [func.ctx.uses[then_label].value, func.ctx.uses[else_label].value].into_iter().collect(),
      _ => ArrayVec::new(),
    };
    for label in targets {
      let s = func.label_block(label)?;
      func.blocks[b].succs.push(s);
      func.blocks[s].preds.push(b);
    }
  }

  debug!("built {} blocks for '{}'", func.blocks.len(), func.name);
  Ok(func)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::TyKind;

  #[test]
  fn alloca_must_prefix_the_stream() {
    let mut ctx = FunctionCtx::new();
    let nope = ctx.push_inst_with(|_, _| InstKind::Nope);
    let dest = ctx.alloc_variable(TyKind::int(32));
    let alloca = ctx.push_inst_with(|ctx, id| InstKind::Alloca {
      dest: ctx.add_use(id, 0, dest),
      size: 4,
    });
    let ty = TyKind::func(TyKind::int(32), vec![]);
    let err = build_function("f", ty, ctx, vec![nope, alloca]).unwrap_err();
    assert!(matches!(err, Error::InvalidControlFlow { .. }));
  }
}
