//! Single-threaded, append-only emission of three-address instructions.
//!
//! The builder owns the [`FunctionCtx`] it allocates against and produces a
//! linear instruction stream. Labels are threaded through a one-slot pending
//! register: [`CodeBuilder::append_label`] attaches the label to the next
//! emitted instruction, two labels in a row are reconciled by a synthesized
//! goto, and a trailing label forces a final `nope`. Alloca instructions
//! accumulate in a separate list and are prepended at [`CodeBuilder::finish`],
//! which is what guarantees the "entry contains only allocas" shape the CFG
//! builder relies on.

use log::trace;

use crate::types::{Binop, Unop};
use crate::types::ir::{
  FuncId, FunctionCtx, InstId, InstKind, LabelTarget, RESULT_SLOT, Ty, TyKind, ValueId, ValueKind,
};
use crate::{Error, Result};

/// Emits a growing linear list of type-checked instructions.
#[derive(Debug, Default)]
pub struct CodeBuilder {
  ctx: FunctionCtx,
  allocas: Vec<InstId>,
  codes: Vec<InstId>,
  pending_label: Option<ValueId>,
}

impl CodeBuilder {
  /// Construct a builder with a fresh [`FunctionCtx`].
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The context the builder allocates against.
  #[must_use] pub fn ctx(&self) -> &FunctionCtx { &self.ctx }

  /// Mutable access to the context, for value allocation.
  pub fn ctx_mut(&mut self) -> &mut FunctionCtx { &mut self.ctx }

  /// Allocate a constant value.
  pub fn constant(&mut self, literal: &str, ty: Ty) -> ValueId {
    self.ctx.alloc_constant(literal, ty)
  }

  /// Allocate a fresh unattached label.
  pub fn label(&mut self) -> ValueId { self.ctx.alloc_label() }

  /// Allocate a typed undefined value.
  pub fn undef(&mut self, ty: Ty) -> ValueId { self.ctx.alloc_undef(ty) }

  /// Allocate a parameter value.
  pub fn parameter(&mut self, index: u32, ty: Ty) -> ValueId {
    self.ctx.alloc_parameter(index, ty)
  }

  fn typed(&self, v: ValueId) -> Result<Ty> {
    self.ctx.value_ty(v).cloned()
      .ok_or_else(|| Error::type_mismatch("a label cannot be used as an operand"))
  }

  fn append(&mut self, inst: InstId) {
    if let Some(label) = self.pending_label.take() {
      self.ctx.values[label].kind = ValueKind::Label(LabelTarget::Inst(inst));
      self.ctx.insts[inst].label = Some(label);
    }
    self.codes.push(inst);
  }

  /// Emit `result = lhs op rhs`. Operand types must agree; comparisons
  /// produce `Int(1)` and arithmetic preserves the operand type.
  pub fn append_binary(&mut self, op: Binop, lhs: ValueId, rhs: ValueId) -> Result<ValueId> {
    let lty = self.typed(lhs)?;
    let rty = self.typed(rhs)?;
    if lty != rty {
      return Err(Error::type_mismatch(
        format!("operands of '{op}' must have the same type")))
    }
    let result_ty = if op.is_comparison() { TyKind::int(1) } else { lty };
    let result = self.ctx.alloc_temporary(result_ty);
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Binary {
      op,
      lhs: ctx.add_use(id, 1, lhs),
      rhs: ctx.add_use(id, 2, rhs),
      result: ctx.add_use(id, RESULT_SLOT, result),
    });
    self.append(inst);
    Ok(result)
  }

  /// Emit `result = -operand`.
  pub fn append_neg(&mut self, operand: ValueId) -> Result<ValueId> {
    let ty = self.typed(operand)?;
    let result = self.ctx.alloc_temporary(ty);
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Unary {
      op: Unop::Neg,
      operand: ctx.add_use(id, 1, operand),
      result: ctx.add_use(id, RESULT_SLOT, result),
    });
    self.append(inst);
    Ok(result)
  }

  /// Emit an unconditional jump to `label`.
  pub fn append_goto(&mut self, label: ValueId) -> InstId {
    debug_assert!(self.ctx.values[label].is_label());
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Goto {
      target: ctx.add_use(id, 1, label),
    });
    self.append(inst);
    inst
  }

  /// Emit a two-way branch. The condition must have type `Int(1)`.
  pub fn append_condition_branch(
    &mut self, cond: ValueId, then_label: ValueId, else_label: ValueId,
  ) -> Result<InstId> {
    if *self.typed(cond)? != TyKind::Int(1) {
      return Err(Error::type_mismatch("a branch condition must have type Int(1)"))
    }
    debug_assert!(self.ctx.values[then_label].is_label());
    debug_assert!(self.ctx.values[else_label].is_label());
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Branch {
      cond: ctx.add_use(id, 1, cond),
      then_label: ctx.add_use(id, 2, then_label),
      else_label: ctx.add_use(id, 3, else_label),
    });
    self.append(inst);
    Ok(inst)
  }

  /// Attach `label` to the next emitted instruction. If a label is already
  /// pending, the two are reconciled by emitting a goto from the first to
  /// the second.
  pub fn append_label(&mut self, label: ValueId) {
    if self.pending_label.is_some() {
      self.append_goto(label);
    }
    self.pending_label = Some(label);
  }

  /// Emit a `nope` placeholder.
  pub fn append_nope(&mut self) -> InstId {
    let inst = self.ctx.push_inst_with(|_, _| InstKind::Nope);
    self.append(inst);
    inst
  }

  /// Reserve `size` bytes of stack for a value of type `allocated` and
  /// return the slot's address value. Allocas are held back and prepended
  /// to the stream at [`CodeBuilder::finish`].
  pub fn append_alloca(&mut self, allocated: Ty, size: u32) -> ValueId {
    let dest = self.ctx.alloc_variable(allocated);
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Alloca {
      dest: ctx.add_use(id, RESULT_SLOT, dest),
      size,
    });
    self.allocas.push(inst);
    dest
  }

  /// Emit `result = load addr`. The address must have pointer type; the
  /// result is a temporary of the pointee type.
  pub fn append_load(&mut self, addr: ValueId) -> Result<ValueId> {
    let aim = self.typed(addr)?.aim().cloned()
      .ok_or_else(|| Error::type_mismatch("load requires a pointer-typed address"))?;
    let result = self.ctx.alloc_temporary(aim);
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Load {
      addr: ctx.add_use(id, 1, addr),
      result: ctx.add_use(id, RESULT_SLOT, result),
    });
    self.append(inst);
    Ok(result)
  }

  /// Emit `store value to addr`. The address type must be pointer to the
  /// stored value's type.
  pub fn append_store(&mut self, value: ValueId, addr: ValueId) -> Result<InstId> {
    let vty = self.typed(value)?;
    let aim = self.typed(addr)?.aim().cloned()
      .ok_or_else(|| Error::type_mismatch("store requires a pointer-typed address"))?;
    if aim != vty {
      return Err(Error::type_mismatch("store destination does not point at the stored type"))
    }
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Store {
      value: ctx.add_use(id, 1, value),
      addr: ctx.add_use(id, 2, addr),
    });
    self.append(inst);
    Ok(inst)
  }

  /// Emit `return value`.
  pub fn append_return(&mut self, value: ValueId) -> InstId {
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::Ret {
      value: ctx.add_use(id, 1, value),
    });
    self.append(inst);
    inst
  }

  /// Emit a function-definition marker for a module-level stream.
  pub fn append_function(&mut self, func: ValueId) -> InstId {
    debug_assert!(matches!(self.ctx.values[func].kind, ValueKind::Function(_)));
    let inst = self.ctx.push_inst_with(|ctx, id| InstKind::FuncDef {
      func: ctx.add_use(id, 1, func),
    });
    self.append(inst);
    inst
  }

  /// Allocate a value naming a module-level function.
  pub fn function_value(&mut self, func: FuncId, ty: Ty) -> ValueId {
    self.ctx.alloc_function(func, ty)
  }

  /// Close the stream: a trailing label is resolved to a `nope`, and the
  /// accumulated allocas are prepended so that they form a contiguous prefix.
  /// Returns the context and the finished linear code list.
  pub fn finish(mut self) -> (FunctionCtx, Vec<InstId>) {
    if self.pending_label.is_some() {
      self.append_nope();
    }
    let mut codes = self.allocas;
    trace!("builder finished: {} allocas + {} codes", codes.len(), self.codes.len());
    codes.extend_from_slice(&self.codes);
    (self.ctx, codes)
  }
}
