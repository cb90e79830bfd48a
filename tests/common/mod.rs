//! Helpers shared by the integration tests.
#![allow(dead_code)]

use ccir::build_ir;
use ccir::cfg::Function;
use ccir::types::ast::Node;
use ccir::types::ir::{self, InstKind};
use ccir::types::ty::{self, Declarator};
use ccir::types::Span;

/// The IR `int` type.
pub fn int32() -> ir::Ty { ir::TyKind::int(32) }

/// The IR type of a `() -> int` function.
pub fn fn_int() -> ir::Ty { ir::TyKind::func(int32(), vec![]) }

/// A front-end `int` declarator.
pub fn int_decl(name: &str) -> Declarator {
  Declarator::new(Some(ty::TyKind::int()), name, Span::default())
}

/// A front-end declarator of a function returning `int` with the given
/// parameters.
pub fn fn_decl(name: &str, params: Vec<Declarator>) -> Declarator {
  Declarator::new(
    Some(ty::TyKind::func(Some(ty::TyKind::int()), params)),
    name,
    Span::default(),
  )
}

/// Lower a single-function translation unit and build its CFG.
pub fn lower_single(ast: &Node) -> Function {
  let module = build_ir::lower(ast).expect("lowering succeeds");
  let mut funcs = module.build().expect("CFG construction succeeds");
  assert_eq!(funcs.len(), 1, "expected exactly one defined function");
  funcs.pop().expect("one function")
}

/// Count the instructions of every block matching `pred`.
pub fn count_insts(f: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
  f.blocks.keys()
    .flat_map(|b| f.insts(b).collect::<Vec<_>>())
    .filter(|&i| pred(&f.ctx.insts[i].kind))
    .count()
}
