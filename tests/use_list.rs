//! Emission and use-def bookkeeping: every operand slot of every emitted
//! instruction is mirrored by exactly one use on the referenced value, and
//! rewriting operands moves those uses without disturbing the rest.

mod common;

use ccir::code_builder::CodeBuilder;
use ccir::types::Binop;
use ccir::types::ir::{InstKind, RESULT_SLOT, TyKind};

#[test]
fn binary_operation_tracks_uses() {
  let mut b = CodeBuilder::new();
  let left = b.ctx_mut().alloc_temporary(TyKind::int(8));
  let right = b.ctx_mut().alloc_temporary(TyKind::int(8));
  let result = b.append_binary(Binop::Add, left, right).unwrap();
  let (ctx, codes) = b.finish();
  assert_eq!(codes.len(), 1);
  let add = codes[0];

  assert!(matches!(ctx.insts[add].kind, InstKind::Binary { op: Binop::Add, .. }));
  assert_eq!(ctx.operand(add, 1), Some(left));
  assert_eq!(ctx.operand(add, 2), Some(right));
  assert_eq!(ctx.operand(add, RESULT_SLOT), Some(result));

  for v in [left, right, result] {
    assert_eq!(ctx.user_count(v), 1);
    let u = ctx.users(v).next().unwrap();
    assert_eq!(ctx.uses[u].user, add);
  }
  assert_eq!(ctx.def_of(result), Some(add));
}

#[test]
fn set_operand_moves_the_use() {
  let mut b = CodeBuilder::new();
  let left = b.ctx_mut().alloc_temporary(TyKind::int(8));
  let right = b.ctx_mut().alloc_temporary(TyKind::int(8));
  let result = b.append_binary(Binop::Add, left, right).unwrap();
  let (mut ctx, codes) = b.finish();
  let add = codes[0];

  let left2 = ctx.alloc_temporary(TyKind::int(8));
  assert_eq!(ctx.user_count(left2), 0);
  ctx.set_operand(add, 1, left2);

  assert_eq!(ctx.operand(add, 1), Some(left2));
  assert_eq!(ctx.user_count(left), 0);
  assert_eq!(ctx.user_count(left2), 1);
  assert_eq!(ctx.uses[ctx.users(left2).next().unwrap()].user, add);
  // the other slots are untouched
  assert_eq!(ctx.user_count(right), 1);
  assert_eq!(ctx.user_count(result), 1);
  assert_eq!(ctx.def_of(result), Some(add));
}

#[test]
#[should_panic(expected = "use replacement changes operand type")]
fn set_operand_rejects_a_type_change() {
  let mut b = CodeBuilder::new();
  let left = b.ctx_mut().alloc_temporary(TyKind::int(8));
  let right = b.ctx_mut().alloc_temporary(TyKind::int(8));
  b.append_binary(Binop::Add, left, right).unwrap();
  let (mut ctx, codes) = b.finish();

  let wider = ctx.alloc_temporary(TyKind::int(16));
  ctx.set_operand(codes[0], 1, wider);
}

#[test]
fn goto_and_branch_track_label_uses() {
  let mut b = CodeBuilder::new();
  let cond = b.ctx_mut().alloc_temporary(TyKind::int(1));
  let t = b.label();
  let e = b.label();
  let branch = b.append_condition_branch(cond, t, e).unwrap();
  let target = b.label();
  let goto = b.append_goto(target);
  b.append_label(t);
  b.append_nope();
  b.append_label(e);
  b.append_nope();
  b.append_label(target);
  let (mut ctx, _) = b.finish();

  for v in [t, e] {
    assert_eq!(ctx.user_count(v), 1);
    assert_eq!(ctx.uses[ctx.users(v).next().unwrap()].user, branch);
  }
  assert_eq!(ctx.user_count(cond), 1);
  assert_eq!(ctx.user_count(target), 1);

  let other = ctx.alloc_label();
  ctx.set_operand(goto, 1, other);
  assert_eq!(ctx.user_count(target), 0);
  assert_eq!(ctx.user_count(other), 1);
}

#[test]
fn load_store_track_uses() {
  let mut b = CodeBuilder::new();
  let addr = b.append_alloca(TyKind::int(32), 4);
  let value = b.constant("7", TyKind::int(32));
  b.append_store(value, addr).unwrap();
  let loaded = b.append_load(addr).unwrap();
  let (ctx, codes) = b.finish();

  // alloca is prepended at finish
  assert!(matches!(ctx.insts[codes[0]].kind, InstKind::Alloca { .. }));
  // one use from the alloca dest, one from the store, one from the load
  assert_eq!(ctx.user_count(addr), 3);
  assert_eq!(ctx.user_count(value), 1);
  assert_eq!(ctx.user_count(loaded), 1);
  assert_eq!(ctx.def_of(loaded), Some(codes[2]));
}

#[test]
fn replace_all_uses_rewrites_every_slot() {
  let mut b = CodeBuilder::new();
  let a = b.ctx_mut().alloc_temporary(TyKind::int(32));
  let sq = b.append_binary(Binop::Mul, a, a).unwrap();
  b.append_binary(Binop::Add, sq, a).unwrap();
  let (mut ctx, codes) = b.finish();

  assert_eq!(ctx.user_count(a), 3);
  let a2 = ctx.alloc_temporary(TyKind::int(32));
  ctx.replace_all_uses_with(a, a2);
  assert_eq!(ctx.user_count(a), 0);
  assert_eq!(ctx.user_count(a2), 3);
  assert_eq!(ctx.operand(codes[0], 1), Some(a2));
  assert_eq!(ctx.operand(codes[0], 2), Some(a2));
  assert_eq!(ctx.operand(codes[1], 2), Some(a2));
}

#[test]
fn builder_rejects_mismatched_operands() {
  let mut b = CodeBuilder::new();
  let narrow = b.ctx_mut().alloc_temporary(TyKind::int(8));
  let wide = b.ctx_mut().alloc_temporary(TyKind::int(32));
  assert!(b.append_binary(Binop::Add, narrow, wide).is_err());
  assert!(b.append_binary(Binop::Ne, narrow, wide).is_err());

  // branch conditions must be Int(1)
  let t = b.label();
  let e = b.label();
  assert!(b.append_condition_branch(wide, t, e).is_err());

  // stores must match the pointee
  let addr = b.append_alloca(TyKind::int(32), 4);
  assert!(b.append_store(narrow, addr).is_err());
  // and loads need a pointer
  assert!(b.append_load(narrow).is_err());
}

#[test]
fn undef_values_are_typed_and_tracked() {
  let mut b = CodeBuilder::new();
  let u = b.undef(TyKind::int(32));
  let addr = b.append_alloca(TyKind::int(32), 4);
  b.append_store(u, addr).unwrap();
  let (ctx, _) = b.finish();
  assert_eq!(**ctx.value_ty(u).unwrap(), TyKind::Int(32));
  assert_eq!(ctx.user_count(u), 1);
}

#[test]
fn comparisons_produce_bool() {
  let mut b = CodeBuilder::new();
  let x = b.ctx_mut().alloc_temporary(TyKind::int(32));
  let y = b.ctx_mut().alloc_temporary(TyKind::int(32));
  let cmp = b.append_binary(Binop::Lt, x, y).unwrap();
  let sum = b.append_binary(Binop::Add, x, y).unwrap();
  let ctx = b.ctx();
  assert_eq!(**ctx.value_ty(cmp).unwrap(), TyKind::Int(1));
  assert_eq!(**ctx.value_ty(sum).unwrap(), TyKind::Int(32));
}
