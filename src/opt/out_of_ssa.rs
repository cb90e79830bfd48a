//! φ elimination: lower every φ node to copies in its predecessors.
//!
//! For a φ at the head of block `B` with sources `v_0 … v_{m-1}` matching
//! predecessors `P_0 … P_{m-1}`, an assignment `dest ← v_k` is inserted
//! immediately before the terminator of each `P_k`, and the φ is erased.
//! This lowering is only correct when each predecessor has a single
//! successor; the pass rejects critical edges instead of assuming they were
//! split.

use log::debug;

use crate::cfg::Function;
use crate::opt::FunctionPass;
use crate::types::ir::{InstKind, RESULT_SLOT};
use crate::{Error, Result};

/// The φ-lowering pass.
#[derive(Debug, Default)]
pub struct OutOfSsa;

impl FunctionPass for OutOfSsa {
  fn run(&mut self, func: &mut Function) -> Result<()> {
    let mut lowered = 0usize;
    for b in func.blocks.keys() {
      let phis: Vec<_> = func.phis(b).collect();
      for phi in phis {
        let (result_v, pairs) = match &func.ctx.insts[phi].kind {
          InstKind::Phi { result, srcs, preds } => (
            func.ctx.uses[*result].value,
            preds.iter().copied()
              .zip(srcs.iter().map(|&u| func.ctx.uses[u].value))
              .collect::<Vec<_>>(),
          ),
          _ => unreachable!("phis() yields φ instructions"),
        };
        for (pred, src) in pairs {
          if func[pred].succs.len() != 1 {
            return Err(Error::control_flow(
              "φ elimination requires predecessors with a single successor (critical edge)"))
          }
          let term = func.terminator(pred).ok_or_else(|| Error::control_flow(
            "φ predecessor has no terminator"))?;
          let copy = func.ctx.push_inst_with(|ctx, id| InstKind::Copy {
            src: ctx.add_use(id, 1, src),
            result: ctx.add_use(id, RESULT_SLOT, result_v),
          });
          func.insert_before(term, copy);
        }
        func.erase(phi);
        lowered += 1;
      }
    }
    debug!("out-of-ssa: lowered {lowered} φs in '{}'", func.name);
    Ok(())
  }
}
