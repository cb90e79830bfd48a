//! Memory-to-register promotion and φ elimination: promotion shapes, the
//! fixpoint behavior, and the SSA properties that must hold afterwards.

mod common;

use ccir::cfg::{self, Function};
use ccir::code_builder::CodeBuilder;
use ccir::opt::{FunctionPass, Mem2Reg, OutOfSsa};
use ccir::types::ast::Node;
use ccir::types::ir::{InstKind, TyKind};
use ccir::types::Span;
use ccir::types::ty;
use ccir::validate;
use ccir::write;
use ccir::Error;
use common::{count_insts, fn_decl, fn_int, int32, int_decl, lower_single};

fn promoted(ast: &Node) -> Function {
  let mut f = lower_single(ast);
  Mem2Reg.run(&mut f).unwrap();
  validate::validate_function(&f).unwrap();
  validate::validate_ssa(&f).unwrap();
  f
}

fn no_memory_traffic(f: &Function) {
  assert_eq!(count_insts(f, |k| matches!(k, InstKind::Alloca { .. })), 0, "no allocas");
  assert_eq!(count_insts(f, |k| matches!(k, InstKind::Load { .. })), 0, "no loads");
  assert_eq!(count_insts(f, |k| matches!(k, InstKind::Store { .. })), 0, "no stores");
}

#[test]
fn straight_line_slot_becomes_the_constant() {
  // int f() { int a; a = 1; return a; }
  let ast = Node::function_declaration(fn_decl("f", vec![]), Some(Node::compound(vec![
    Node::variable_declaration(int_decl("a"), None),
    Node::assign(Node::ident("a"), Node::integer("1")),
    Node::ret(Node::ident("a")),
  ])));
  let f = promoted(&ast);
  no_memory_traffic(&f);
  assert_eq!(write::function_to_string(&f),
    "Function f\n\
     Label.0:          ; pred: \n\
     \x20 goto Label.1;\n\
     Label.1:          ; pred: Label.0;\n\
     \x20 return 1;\n");
}

#[test]
fn join_gets_a_phi() {
  // int f(int c) { int a; if (c) a = 1; else a = 2; return a; }
  let ast = Node::function_declaration(
    fn_decl("f", vec![int_decl("c")]),
    Some(Node::compound(vec![
      Node::variable_declaration(int_decl("a"), None),
      Node::if_else(
        Node::ident("c"),
        Node::assign(Node::ident("a"), Node::integer("1")),
        Some(Node::assign(Node::ident("a"), Node::integer("2"))),
      ),
      Node::ret(Node::ident("a")),
    ])),
  );
  let f = promoted(&ast);
  no_memory_traffic(&f);
  assert_eq!(count_insts(&f, |k| matches!(k, InstKind::Phi { .. })), 1, "one join φ");

  // the join block starts with φ(1, 2) and returns it
  let head = f[f.entry].succs[0];
  let join = f[f[head].succs[0]].succs[0];
  let phis: Vec<_> = f.phis(join).collect();
  assert_eq!(phis.len(), 1);
  let phi = phis[0];
  let InstKind::Phi { ref srcs, ref preds, result } = f.ctx.insts[phi].kind else {
    panic!("join starts with a φ")
  };
  assert_eq!(srcs.len(), 2);
  assert_eq!(&preds[..], &f[join].preds[..]);
  let render = write::function_to_string(&f);
  assert!(render.contains("= phi( 1, 2 );"), "φ merges the two constants: {render}");

  // the return consumes the φ result directly
  let ret = f[join].last().unwrap();
  let InstKind::Ret { value } = f.ctx.insts[ret].kind else { panic!("join returns") };
  assert_eq!(f.ctx.uses[value].value, f.ctx.uses[result].value);
}

#[test]
fn loop_variable_gets_a_phi_at_the_head() {
  // int f(int c) { while (c) c = c - 1; return c; }
  let ast = Node::function_declaration(
    fn_decl("f", vec![int_decl("c")]),
    Some(Node::compound(vec![
      Node::while_loop(
        Node::ident("c"),
        Node::assign(Node::ident("c"), Node::sub(Node::ident("c"), Node::integer("1"))),
      ),
      Node::ret(Node::ident("c")),
    ])),
  );
  let f = promoted(&ast);
  no_memory_traffic(&f);
  let render = write::function_to_string(&f);
  assert!(render.contains("phi("), "loop head carries a φ: {render}");
  // the φ merges the incoming parameter with the decremented value
  assert_eq!(count_insts(&f, |k| matches!(k, InstKind::Phi { .. })), 1);
}

#[test]
fn uninitialized_paths_merge_undef() {
  // int f(int c) { int a; if (c) a = 1; return a; }
  let ast = Node::function_declaration(
    fn_decl("f", vec![int_decl("c")]),
    Some(Node::compound(vec![
      Node::variable_declaration(int_decl("a"), None),
      Node::if_else(Node::ident("c"),
        Node::assign(Node::ident("a"), Node::integer("1")), None),
      Node::ret(Node::ident("a")),
    ])),
  );
  let f = promoted(&ast);
  let render = write::function_to_string(&f);
  assert!(render.contains("undef"), "the untaken path contributes undef: {render}");
}

#[test]
fn store_only_slots_are_deleted() {
  // int f() { int a; a = 1; a = 2; return 0; }
  let ast = Node::function_declaration(fn_decl("f", vec![]), Some(Node::compound(vec![
    Node::variable_declaration(int_decl("a"), None),
    Node::assign(Node::ident("a"), Node::integer("1")),
    Node::assign(Node::ident("a"), Node::integer("2")),
    Node::ret(Node::integer("0")),
  ])));
  let f = promoted(&ast);
  no_memory_traffic(&f);
  assert_eq!(count_insts(&f, |k| matches!(k, InstKind::Phi { .. })), 0);
}

#[test]
fn address_taken_slots_are_kept_until_the_taker_dies() {
  // int f() { int a; int *p; p = &a; return 1; }
  // p is store-only and dies in round one; that frees a, which dies next.
  let ptr_decl = ty::Declarator::new(
    Some(ty::TyKind::ptr(ty::TyKind::int())), "p", Span::default());
  let ast = Node::function_declaration(fn_decl("f", vec![]), Some(Node::compound(vec![
    Node::variable_declaration(int_decl("a"), None),
    Node::variable_declaration(ptr_decl, None),
    Node::assign(Node::ident("p"), Node::get_address(Node::ident("a"))),
    Node::ret(Node::integer("1")),
  ])));
  let f = promoted(&ast);
  no_memory_traffic(&f);
}

#[test]
fn address_taken_and_loaded_slots_stay_in_memory() {
  // int f(int *q) { int a; q = &a; a = 1; return a; }
  // a's address escapes into a live slot, and a is loaded, so a stays.
  let ptr_decl = ty::Declarator::new(
    Some(ty::TyKind::ptr(ty::TyKind::int())), "q", Span::default());
  let ast = Node::function_declaration(
    fn_decl("f", vec![ptr_decl.clone()]),
    Some(Node::compound(vec![
      Node::variable_declaration(int_decl("a"), None),
      Node::assign(Node::ident("q"), Node::get_address(Node::ident("a"))),
      Node::assign(Node::ident("a"), Node::integer("1")),
      Node::ret(Node::ident("a")),
    ])),
  );
  let f = promoted(&ast);
  // q's spill slot promotes and its store dies with it, which un-takes a's
  // address; the fixpoint then promotes a as well, leaving no memory traffic.
  no_memory_traffic(&f);
}

#[test]
fn self_loop_phi() {
  // for (i = 0; ; i = i + 1) i = 2; the loop head is its own predecessor
  let ast = Node::function_declaration(fn_decl("f", vec![]), Some(Node::compound(vec![
    Node::variable_declaration(int_decl("i"), None),
    Node::for_loop(
      Node::assign(Node::ident("i"), Node::integer("0")),
      Node::empty(),
      Node::assign(Node::ident("i"), Node::add(Node::ident("i"), Node::integer("1"))),
      Node::assign(Node::ident("i"), Node::integer("2")),
    ),
    Node::ret(Node::integer("0")),
  ])));
  let f = promoted(&ast);
  let render = write::function_to_string(&f);
  assert!(render.contains("phi( 0, "), "the head φ merges the init value: {render}");
}

#[test]
fn out_of_ssa_lowers_phis_to_copies() {
  let ast = Node::function_declaration(
    fn_decl("f", vec![int_decl("c")]),
    Some(Node::compound(vec![
      Node::variable_declaration(int_decl("a"), None),
      Node::if_else(
        Node::ident("c"),
        Node::assign(Node::ident("a"), Node::integer("1")),
        Some(Node::assign(Node::ident("a"), Node::integer("2"))),
      ),
      Node::ret(Node::ident("a")),
    ])),
  );
  let mut f = promoted(&ast);
  OutOfSsa.run(&mut f).unwrap();
  validate::validate_function(&f).unwrap();

  assert_eq!(count_insts(&f, |k| matches!(k, InstKind::Phi { .. })), 0, "no φ remains");
  assert_eq!(count_insts(&f, |k| matches!(k, InstKind::Copy { .. })), 2,
    "one copy per predecessor");

  // each copy sits immediately before its block's terminator
  let head = f[f.entry].succs[0];
  for &arm in &f[head].succs {
    let insts: Vec<_> = f.insts(arm).collect();
    let copy = insts[insts.len() - 2];
    assert!(matches!(f.ctx.insts[copy].kind, InstKind::Copy { .. }));
    let render = write::function_to_string(&f);
    assert!(render.contains("= 1;") && render.contains("= 2;"),
      "copies carry the φ sources: {render}");
  }
}

#[test]
fn out_of_ssa_rejects_critical_edges() {
  // A: branch {B, C}; B: store then goto C; C: load. The A->C edge is
  // critical, so after promotion the φ at C cannot be lowered.
  let mut b = CodeBuilder::new();
  let a_slot = b.append_alloca(int32(), 4);
  let l_b = b.label();
  let l_c = b.label();
  let zero = b.constant("0", int32());
  b.append_store(zero, a_slot).unwrap();
  let cond = b.constant("0", TyKind::int(1));
  b.append_condition_branch(cond, l_b, l_c).unwrap();
  b.append_label(l_b);
  let one = b.constant("1", int32());
  b.append_store(one, a_slot).unwrap();
  b.append_goto(l_c);
  b.append_label(l_c);
  let v = b.append_load(a_slot).unwrap();
  b.append_return(v);
  let (ctx, codes) = b.finish();
  let mut f = cfg::build_function("f", fn_int(), ctx, codes).unwrap();

  Mem2Reg.run(&mut f).unwrap();
  assert_eq!(count_insts(&f, |k| matches!(k, InstKind::Phi { .. })), 1);
  let err = OutOfSsa.run(&mut f).unwrap_err();
  assert!(matches!(err, Error::InvalidControlFlow { .. }));
}

#[test]
fn promotion_is_a_fixpoint() {
  // running the pass twice changes nothing further
  let ast = Node::function_declaration(
    fn_decl("f", vec![int_decl("c")]),
    Some(Node::compound(vec![
      Node::variable_declaration(int_decl("a"), None),
      Node::if_else(
        Node::ident("c"),
        Node::assign(Node::ident("a"), Node::integer("1")),
        Some(Node::assign(Node::ident("a"), Node::integer("2"))),
      ),
      Node::ret(Node::ident("a")),
    ])),
  );
  let mut f = promoted(&ast);
  let before = write::function_to_string(&f);
  Mem2Reg.run(&mut f).unwrap();
  assert_eq!(before, write::function_to_string(&f));
}
