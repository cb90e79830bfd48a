//! The textual IR dump, the sole external wire format.
//!
//! Variables and temporaries render as `%<id>`, constants by their literal,
//! undef as `undef`, labels as `Label.<id>`. Ids are assigned by a per-dump
//! allocator in first-seen order, so the rendering of a function is stable
//! regardless of how many values its arena accumulated along the way.

use std::collections::HashMap;
use std::fmt::Write as _;

use bit_set::BitSet;
use itertools::Itertools;

use crate::build_ir::Module;
use crate::cfg::Function;
use crate::types::Idx;
use crate::types::ir::{FunctionCtx, InstId, InstKind, ValueId, ValueKind};

/// Per-dump id assignment. A fresh allocator is used for every function
/// printed; the core itself assigns no ids.
#[derive(Debug, Default)]
struct IdAlloc {
  ids: HashMap<ValueId, usize>,
}

impl IdAlloc {
  fn id(&mut self, v: ValueId) -> usize {
    let next = self.ids.len();
    *self.ids.entry(v).or_insert(next)
  }

  fn render(&mut self, ctx: &FunctionCtx, v: ValueId) -> String {
    match &ctx.values[v].kind {
      ValueKind::Constant { literal } => literal.to_string(),
      ValueKind::Undef => "undef".into(),
      ValueKind::Label(_) => format!("Label.{}", self.id(v)),
      _ => format!("%{}", self.id(v)),
    }
  }
}

fn render_inst(ctx: &FunctionCtx, inst: InstId, ids: &mut IdAlloc, out: &mut String) {
  if let Some(label) = ctx.insts[inst].label {
    let _ = writeln!(out, "{}:", ids.render(ctx, label));
  }
  let operand = |ids: &mut IdAlloc, u| ids.render(ctx, ctx.uses[u].value);
  match ctx.insts[inst].kind {
    InstKind::Binary { op, lhs, rhs, result } => {
      let (r, l, rh) = (operand(ids, result), operand(ids, lhs), operand(ids, rhs));
      let _ = write!(out, "  {r} = {l} {op} {rh};");
    }
    InstKind::Unary { op, operand: x, result } => {
      let (r, x) = (operand(ids, result), operand(ids, x));
      let _ = write!(out, "  {r} = {op}{x};");
    }
    InstKind::Goto { target } => {
      let t = operand(ids, target);
      let _ = write!(out, "  goto {t};");
    }
    InstKind::Branch { cond, then_label, else_label } => {
      let (c, t, e) = (operand(ids, cond), operand(ids, then_label), operand(ids, else_label));
      let _ = write!(out, "  if {c} goto {t} else {e};");
    }
    InstKind::Alloca { dest, size } => {
      let d = operand(ids, dest);
      let _ = write!(out, "  {d} = alloca size {size};");
    }
    InstKind::Load { addr, result } => {
      let (r, a) = (operand(ids, result), operand(ids, addr));
      let _ = write!(out, "  {r} = load {a};");
    }
    InstKind::Store { value, addr } => {
      let (v, a) = (operand(ids, value), operand(ids, addr));
      let _ = write!(out, "  store {v} to {a};");
    }
    InstKind::Phi { result, ref srcs, .. } => {
      let r = operand(ids, result);
      let args = srcs.iter().map(|&u| operand(ids, u)).join(", ");
      let _ = write!(out, "  {r} = phi( {args} );");
    }
    InstKind::Copy { src, result } => {
      let (r, s) = (operand(ids, result), operand(ids, src));
      let _ = write!(out, "  {r} = {s};");
    }
    InstKind::Ret { value } => {
      let v = operand(ids, value);
      let _ = write!(out, "  return {v};");
    }
    InstKind::Nope => { let _ = write!(out, "  nope;"); }
    InstKind::FuncDef { func } => {
      let f = operand(ids, func);
      let _ = write!(out, "  define {f};");
    }
  }
}

/// Render a linear code list against its context, one instruction per line,
/// label lines interleaved.
#[must_use] pub fn codes_to_string(ctx: &FunctionCtx, codes: &[InstId]) -> String {
  let mut ids = IdAlloc::default();
  let mut out = String::new();
  for (i, &inst) in codes.iter().enumerate() {
    render_inst(ctx, inst, &mut ids, &mut out);
    if i + 1 != codes.len() { out.push('\n') }
  }
  out
}

/// Render a lowered module: each function definition prints as `@name:`
/// followed by its linear body.
#[must_use] pub fn module_to_string(m: &Module) -> String {
  let mut ids = IdAlloc::default();
  let mut out = String::new();
  for (i, &inst) in m.codes.iter().enumerate() {
    if let InstKind::FuncDef { func } = m.ctx.insts[inst].kind {
      let v = m.ctx.uses[func].value;
      let ValueKind::Function(fid) = m.ctx.values[v].kind else {
        unreachable!("function definition names a function value")
      };
      let f = &m.funcs[fid];
      let _ = write!(out, "@{}:", f.name);
      let body = codes_to_string(&f.ctx, &f.codes);
      if !body.is_empty() {
        out.push('\n');
        out.push_str(&body);
      }
    } else {
      render_inst(&m.ctx, inst, &mut ids, &mut out);
    }
    if i + 1 != m.codes.len() { out.push('\n') }
  }
  out
}

/// Render a function in CFG form: the function name, then every reachable
/// block in DFS preorder, each with a `; pred:` comment listing its
/// predecessors.
#[must_use] pub fn function_to_string(f: &Function) -> String {
  let mut ids = IdAlloc::default();
  let mut out = String::new();
  let _ = writeln!(out, "Function {}", f.name);

  let mut visited = BitSet::new();
  let mut stack = vec![f.entry];
  while let Some(b) = stack.pop() {
    if !visited.insert(b.into_usize()) { continue }
    let block = &f[b];
    let _ = write!(out, "{}:          ; pred: ", ids.render(&f.ctx, block.label));
    if !block.preds.is_empty() {
      let preds = block.preds.iter()
        .map(|&p| ids.render(&f.ctx, f[p].label))
        .join(", ");
      let _ = write!(out, "{preds};");
    }
    out.push('\n');
    for inst in f.insts(b) {
      render_inst(&f.ctx, inst, &mut ids, &mut out);
      out.push('\n');
    }
    for &s in block.succs.iter().rev() {
      if !visited.contains(s.into_usize()) {
        stack.push(s);
      }
    }
  }
  out
}
