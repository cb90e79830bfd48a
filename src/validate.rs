//! Structural invariant checking.
//!
//! [`validate_function`] verifies the invariants every pass must preserve:
//! the use-list bijection, the mutuality of predecessor/successor edges, and
//! terminator placement. A violation is reported as
//! [`Error::InternalInvariant`]; it indicates a bug in the IR core, and the
//! offending IR should be kept around for diagnosis.

use std::collections::HashMap;

use bit_vec::BitVec;

use crate::cfg::Function;
use crate::types::Idx;
use crate::types::ir::{InstId, InstKind, LabelTarget, UseId};
use crate::{Error, Result};

fn fail(msg: impl Into<String>) -> Result<()> {
  Err(Error::internal(msg))
}

/// Check the universal structural invariants of a function in CFG form.
pub fn validate_function(f: &Function) -> Result<()> {
  validate_uses(f)?;
  validate_edges(f)?;
  validate_terminators(f)?;
  Ok(())
}

/// Every operand slot of every placed instruction holds a use that points
/// back at exactly that slot, the referenced value's user list contains that
/// use exactly once, and no user list contains anything else.
fn validate_uses(f: &Function) -> Result<()> {
  let mut placed: HashMap<UseId, (InstId, u32)> = HashMap::new();
  for b in f.blocks.keys() {
    for inst in f.insts(b) {
      let mut slot = 0u32;
      let mut seen = 0usize;
      let uses = f.ctx.insts[inst].uses();
      while seen < uses.len() {
        if let Some(u) = f.ctx.insts[inst].use_at(slot) {
          seen += 1;
          let record = &f.ctx.uses[u];
          if record.user != inst || record.slot != slot {
            return fail(format!(
              "use {u:?} does not point back at its operand slot ({inst:?}, slot {slot})"))
          }
          if placed.insert(u, (inst, slot)).is_some() {
            return fail(format!("use {u:?} appears in more than one operand slot"))
          }
        }
        slot += 1;
      }
    }
  }

  let mut listed = 0usize;
  for v in f.ctx.values.keys() {
    let mut count = 0usize;
    for u in f.ctx.users(v) {
      count += 1;
      match placed.get(&u) {
        None => return fail(format!(
          "user list of {v:?} contains a use not held by any placed instruction")),
        Some(&(inst, slot)) => {
          if f.ctx.uses[u].value != v {
            return fail(format!("use {u:?} is listed under the wrong value"))
          }
          if f.ctx.insts[inst].use_at(slot) != Some(u) {
            return fail(format!("operand slot ({inst:?}, {slot}) lost its use"))
          }
        }
      }
    }
    if count != f.ctx.user_count(v) {
      return fail(format!("user list of {v:?} disagrees with its recorded length"))
    }
    listed += count;
  }
  if listed != placed.len() {
    return fail("operand slots and user lists disagree in total size")
  }
  Ok(())
}

/// `A ∈ B.preds` exactly as often as `B ∈ A.succs`, and every block label
/// addresses its block.
fn validate_edges(f: &Function) -> Result<()> {
  for b in f.blocks.keys() {
    if f.ctx.values[f[b].label].label_target() != Some(LabelTarget::Block(b)) {
      return fail(format!("label of {b:?} does not address it"))
    }
    for &s in &f[b].succs {
      let fwd = f[b].succs.iter().filter(|&&x| x == s).count();
      let back = f[s].preds.iter().filter(|&&x| x == b).count();
      if fwd != back {
        return fail(format!("edge {b:?} -> {s:?} is not mutual"))
      }
    }
    for &p in &f[b].preds {
      let back = f[b].preds.iter().filter(|&&x| x == p).count();
      let fwd = f[p].succs.iter().filter(|&&x| x == b).count();
      if fwd != back {
        return fail(format!("edge {p:?} -> {b:?} is not mutual"))
      }
    }
  }
  Ok(())
}

fn reachable(f: &Function) -> BitVec {
  let mut visited = BitVec::from_elem(f.blocks.len(), false);
  let mut stack = vec![f.entry];
  visited.set(f.entry.into_usize(), true);
  while let Some(b) = stack.pop() {
    for &s in &f[b].succs {
      if !visited[s.into_usize()] {
        visited.set(s.into_usize(), true);
        stack.push(s);
      }
    }
  }
  visited
}

/// Every reachable block ends with exactly one goto, branch, or return, and
/// none occurs earlier. The single exception is a block with no successors
/// ending in the builder's trailing `nope` (a function that falls off its
/// end).
fn validate_terminators(f: &Function) -> Result<()> {
  let reach = reachable(f);
  for b in f.blocks.keys() {
    if !reach[b.into_usize()] { continue }
    let Some(last) = f[b].last() else {
      if f[b].succs.is_empty() { continue }
      return fail(format!("{b:?} has successors but no instructions"))
    };
    for inst in f.insts(b) {
      let is_term = f.ctx.insts[inst].is_terminator();
      if inst == last {
        if !is_term && !f[b].succs.is_empty() {
          return fail(format!("{b:?} has successors but no terminator"))
        }
      } else if is_term {
        return fail(format!("{b:?} has a terminator before its last instruction"))
      }
    }
    let term_count = f.insts(b).filter(|&i| f.ctx.insts[i].is_terminator()).count();
    if term_count > 1 {
      return fail(format!("{b:?} has more than one terminator"))
    }
  }
  Ok(())
}

/// Check the SSA-form properties that hold after mem2reg: every φ's arity
/// matches its block's predecessor count and its recorded predecessors agree
/// with the block's, and every temporary has at most one defining use.
pub fn validate_ssa(f: &Function) -> Result<()> {
  for b in f.blocks.keys() {
    for inst in f.insts(b) {
      if let InstKind::Phi { ref srcs, ref preds, .. } = f.ctx.insts[inst].kind {
        if srcs.len() != f[b].preds.len() || preds[..] != f[b].preds[..] {
          return fail(format!("φ in {b:?} disagrees with the block's predecessors"))
        }
      }
    }
  }
  for v in f.ctx.values.keys() {
    let defs = f.ctx.users(v)
      .filter(|&u| f.ctx.uses[u].slot == crate::types::ir::RESULT_SLOT)
      .count();
    if defs > 1 {
      return fail(format!("{v:?} has {defs} defining instructions"))
    }
  }
  Ok(())
}
