//! Memory-to-register promotion: classical SSA construction.
//!
//! Each iteration selects promotable entry-block allocas, deletes the ones
//! that are never loaded, places φ nodes at the iterated dominance frontier
//! of each remaining candidate's store blocks, and renames loads and stores
//! to SSA values in a walk over the dominator tree. The pass repeats until an
//! iteration changes nothing; promoting one slot can expose another (an
//! address held in a store-only slot stops being taken once that slot dies).

use std::collections::HashMap;

use log::debug;

use crate::Result;
use crate::cfg::Function;
use crate::dominator::{DomFrontiers, NodeId};
use crate::opt::FunctionPass;
use crate::types::ir::{BlockId, InstId, InstKind, RESULT_SLOT, ValueId, ValueKind};

/// The memory-to-register pass.
#[derive(Debug, Default)]
pub struct Mem2Reg;

impl FunctionPass for Mem2Reg {
  fn run(&mut self, func: &mut Function) -> Result<()> {
    let mut round = 0u32;
    while promote_once(func)? {
      round += 1;
      debug!("mem2reg: '{}' changed in round {round}", func.name);
    }
    Ok(())
  }
}

/// Is every use of the slot's address a load source or a store destination?
/// A store of the address itself (the address being taken) disqualifies the
/// slot, as does any other appearance.
fn is_promotable(func: &Function, addr: ValueId) -> bool {
  func.ctx.users(addr).all(|u| {
    let user = func.ctx.uses[u].user;
    let slot = func.ctx.uses[u].slot;
    match func.ctx.insts[user].kind {
      InstKind::Alloca { .. } => slot == RESULT_SLOT,
      InstKind::Load { .. } => slot == 1,
      InstKind::Store { .. } => slot == 2,
      _ => false,
    }
  })
}

fn has_load(func: &Function, addr: ValueId) -> bool {
  func.ctx.users(addr)
    .any(|u| matches!(func.ctx.insts[func.ctx.uses[u].user].kind, InstKind::Load { .. }))
}

/// The blocks containing a store to `addr`.
fn store_blocks(func: &Function, addr: ValueId) -> Vec<BlockId> {
  func.ctx.users(addr)
    .filter(|&u| {
      func.ctx.uses[u].slot == 2
        && matches!(func.ctx.insts[func.ctx.uses[u].user].kind, InstKind::Store { .. })
    })
    .filter_map(|u| func.ctx.insts[func.ctx.uses[u].user].block)
    .collect()
}

fn promote_once(func: &mut Function) -> Result<bool> {
  let df = DomFrontiers::new(func);
  let allocas: Vec<InstId> = func.insts(func.entry)
    .filter(|&i| matches!(func.ctx.insts[i].kind, InstKind::Alloca { .. }))
    .collect();

  // One stack of "current value" per candidate, keyed by the slot address.
  let mut stacks: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
  // φ instruction -> the candidate it merges.
  let mut phi_of: HashMap<InstId, ValueId> = HashMap::new();
  let mut removed_any = false;

  for alloca in allocas {
    let addr = func.ctx.operand(alloca, RESULT_SLOT).expect("alloca has a destination");
    if !is_promotable(func, addr) { continue }

    if !has_load(func, addr) {
      // Dead slot: nothing observes it, so the stores go with it.
      let stores: Vec<InstId> = func.ctx.users(addr)
        .map(|u| func.ctx.uses[u].user)
        .filter(|&i| matches!(func.ctx.insts[i].kind, InstKind::Store { .. }))
        .collect();
      for s in stores { func.erase(s) }
      func.erase(alloca);
      removed_any = true;
      continue
    }

    let allocated = match &func.ctx.values[addr].kind {
      ValueKind::Variable { allocated } => allocated.clone(),
      _ => unreachable!("alloca destination is a variable"),
    };
    for b in df.iterated(store_blocks(func, addr)) {
      let preds: Vec<BlockId> = func[b].preds.to_vec();
      let phi = func.ctx.new_phi(allocated.clone(), &preds, addr);
      func.push_front(b, phi);
      phi_of.insert(phi, addr);
    }
    let undef = func.ctx.alloc_undef(allocated);
    stacks.insert(addr, vec![undef]);
  }

  if stacks.is_empty() {
    return Ok(removed_any)
  }
  debug!("mem2reg: renaming {} candidates in '{}'", stacks.len(), func.name);
  rename(func, &df, &mut stacks, &phi_of);
  Ok(true)
}

/// The dominator-tree renaming walk, with an explicit enter/exit stack in
/// place of recursion. `temp_map` carries erased-load replacements for the
/// whole walk; the per-candidate stacks are pushed on enter and popped on
/// exit.
fn rename(
  func: &mut Function,
  df: &DomFrontiers,
  stacks: &mut HashMap<ValueId, Vec<ValueId>>,
  phi_of: &HashMap<InstId, ValueId>,
) {
  enum Frame {
    Enter(NodeId),
    Exit(HashMap<ValueId, usize>),
  }
  let tree = df.tree();
  let mut temp_map: HashMap<ValueId, ValueId> = HashMap::new();
  let mut work = vec![Frame::Enter(tree.root())];
  while let Some(frame) = work.pop() {
    match frame {
      Frame::Enter(n) => {
        let pushed = rename_block(func, tree.nodes[n].block, stacks, phi_of, &mut temp_map);
        work.push(Frame::Exit(pushed));
        for &c in tree.nodes[n].children.iter().rev() {
          work.push(Frame::Enter(c));
        }
      }
      Frame::Exit(pushed) => {
        for (addr, count) in pushed {
          let stack = stacks.get_mut(&addr).expect("popping a known candidate");
          stack.truncate(stack.len() - count);
        }
      }
    }
  }
}

/// Rewrite the operand at `slot` through the temporary-rename map.
fn rewrite_slot(
  func: &mut Function, inst: InstId, slot: u32, temp_map: &HashMap<ValueId, ValueId>,
) {
  let Some(v) = func.ctx.operand(inst, slot) else { return };
  if let Some(&nv) = temp_map.get(&v) {
    func.ctx.set_operand(inst, slot, nv);
  }
}

fn rename_block(
  func: &mut Function,
  b: BlockId,
  stacks: &mut HashMap<ValueId, Vec<ValueId>>,
  phi_of: &HashMap<InstId, ValueId>,
  temp_map: &mut HashMap<ValueId, ValueId>,
) -> HashMap<ValueId, usize> {
  let mut pushed: HashMap<ValueId, usize> = HashMap::new();
  let insts: Vec<InstId> = func.insts(b).collect();
  for inst in insts {
    match func.ctx.insts[inst].kind {
      InstKind::Phi { result, .. } => {
        if let Some(&addr) = phi_of.get(&inst) {
          let value = func.ctx.uses[result].value;
          stacks.get_mut(&addr).expect("φ of a known candidate").push(value);
          *pushed.entry(addr).or_insert(0) += 1;
        } else {
          // A φ from an earlier promotion round: an ordinary instruction.
          let arity = match &func.ctx.insts[inst].kind {
            InstKind::Phi { srcs, .. } => srcs.len(),
            _ => unreachable!(),
          };
          for slot in 1..=arity as u32 {
            rewrite_slot(func, inst, slot, temp_map);
          }
        }
      }
      InstKind::Load { addr, result } => {
        rewrite_slot(func, inst, 1, temp_map);
        let addr_v = func.ctx.uses[addr].value;
        if let Some(stack) = stacks.get(&addr_v) {
          let top = *stack.last().expect("candidate stack is never empty");
          let result_v = func.ctx.uses[result].value;
          temp_map.insert(result_v, top);
          func.erase(inst);
        }
      }
      InstKind::Store { addr, .. } => {
        rewrite_slot(func, inst, 1, temp_map);
        let addr_v = func.ctx.uses[addr].value;
        if stacks.contains_key(&addr_v) {
          let stored = func.ctx.operand(inst, 1).expect("store has a value");
          stacks.get_mut(&addr_v).expect("known candidate").push(stored);
          *pushed.entry(addr_v).or_insert(0) += 1;
          func.erase(inst);
        }
      }
      InstKind::Alloca { dest, .. } => {
        let dest_v = func.ctx.uses[dest].value;
        if stacks.contains_key(&dest_v) {
          func.erase(inst);
        }
      }
      InstKind::Binary { .. } | InstKind::Unary { .. } | InstKind::Branch { .. }
      | InstKind::Ret { .. } | InstKind::Copy { .. } => {
        for slot in 1..4 {
          rewrite_slot(func, inst, slot, temp_map);
        }
      }
      InstKind::Goto { .. } | InstKind::Nope | InstKind::FuncDef { .. } => {}
    }
  }

  // Patch the φs of every CFG successor: this block's slot gets the current
  // top of the candidate's stack, at every position this block occupies in
  // the successor's predecessor list.
  let succs: Vec<BlockId> = func[b].succs.to_vec();
  for s in succs {
    let phis: Vec<InstId> = func.phis(s).collect();
    for phi in phis {
      let Some(&addr) = phi_of.get(&phi) else { continue };
      let Some(stack) = stacks.get(&addr) else { continue };
      let top = *stack.last().expect("candidate stack is never empty");
      let positions: Vec<u32> = func[s].preds.iter().enumerate()
        .filter(|&(_, &p)| p == b)
        .map(|(k, _)| 1 + u32::try_from(k).expect("φ arity overflow"))
        .collect();
      for slot in positions {
        func.ctx.set_operand(phi, slot, top);
      }
    }
  }
  pushed
}
