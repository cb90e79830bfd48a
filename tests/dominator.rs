//! Dominator-tree and dominance-frontier properties: hand-built shapes,
//! and randomized graphs checked against the delete-a-node reachability
//! oracle.

mod common;

use std::collections::HashSet;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use ccir::cfg::{self, Function};
use ccir::code_builder::CodeBuilder;
use ccir::dominator::{DomFrontiers, DominatorTree};
use ccir::types::ast::Node;
use ccir::types::ir::BlockId;
use ccir::validate;
use common::{fn_decl, fn_int, int32, int_decl, lower_single};

fn diamond() -> Function {
  // if (c) a = 1; else a = 2; return a;
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
  lower_single(&ast)
}

fn while_loop() -> Function {
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
  lower_single(&ast)
}

#[test]
fn diamond_dominators() {
  let f = diamond();
  let tree = DominatorTree::build(&f);
  let entry = f.entry;
  let head = f[entry].succs[0];
  let then = f[head].succs[0];
  let els = f[head].succs[1];
  let join = f[then].succs[0];

  // the branch head dominates everything below it; neither arm dominates
  // the join
  assert!(tree.dominates(entry, join));
  assert!(tree.strictly_dominates(head, join));
  assert!(tree.dominates(head, head));
  assert!(!tree.strictly_dominates(head, head));
  assert!(!tree.dominates(then, join));
  assert!(!tree.dominates(els, join));
  assert!(!tree.dominates(then, els));

  let root = tree.root();
  assert_eq!(tree.nodes[root].block, entry);
  assert_eq!(tree.nodes[root].level, 0);
  let head_node = tree.node(head).unwrap();
  assert_eq!(tree.nodes[head_node].level, 1);
  assert_eq!(tree.nodes[head_node].children.len(), 3, "then, else, join");
  let join_node = tree.node(join).unwrap();
  assert_eq!(tree.nodes[join_node].parent, Some(head_node));
}

#[test]
fn diamond_frontiers() {
  let f = diamond();
  let df = DomFrontiers::new(&f);
  let head = f[f.entry].succs[0];
  let then = f[head].succs[0];
  let els = f[head].succs[1];
  let join = f[then].succs[0];

  assert_eq!(df.frontier(then).collect::<Vec<_>>(), vec![join]);
  assert_eq!(df.frontier(els).collect::<Vec<_>>(), vec![join]);
  assert_eq!(df.frontier(head).count(), 0);
  assert_eq!(df.frontier(join).count(), 0);
  assert_eq!(df.iterated([then, els]), vec![join]);
}

#[test]
fn loop_head_is_in_its_own_frontier() {
  let f = while_loop();
  let df = DomFrontiers::new(&f);
  // entry -> pre -> cond -> {body, end}; body -> cond
  let pre = f[f.entry].succs[0];
  let cond = f[pre].succs[0];
  let body = f[cond].succs[0];

  assert_eq!(df.frontier(body).collect::<Vec<_>>(), vec![cond]);
  assert_eq!(df.frontier(cond).collect::<Vec<_>>(), vec![cond]);
  assert_eq!(df.iterated([body]), vec![cond]);
}

/// Blocks reachable from the entry when `skip` is treated as deleted.
fn reachable_without(f: &Function, skip: Option<BlockId>) -> HashSet<BlockId> {
  let mut seen = HashSet::new();
  if skip == Some(f.entry) { return seen }
  let mut stack = vec![f.entry];
  seen.insert(f.entry);
  while let Some(b) = stack.pop() {
    for &s in &f[b].succs {
      if Some(s) != skip && seen.insert(s) {
        stack.push(s);
      }
    }
  }
  seen
}

/// Check the dominator tree and frontiers of `f` against brute force.
fn check_against_oracle(f: &Function) {
  let tree = DominatorTree::build(f);
  let df = DomFrontiers::new(f);
  let reach = reachable_without(f, None);

  for b in f.blocks.keys() {
    assert_eq!(tree.node(b).is_some(), reach.contains(&b), "tree covers reachable blocks");
  }
  for d in f.blocks.keys().filter(|b| reach.contains(b)) {
    let alive = reachable_without(f, Some(d));
    for b in f.blocks.keys().filter(|b| reach.contains(b)) {
      if b == d { continue }
      assert_eq!(
        tree.strictly_dominates(d, b),
        !alive.contains(&b),
        "{d:?} strictly dominates {b:?} iff deleting it kills {b:?}",
      );
    }
  }

  // DF soundness: b ∈ DF(n) iff n does not strictly dominate b and some
  // predecessor of b is dominated by n.
  for n in f.blocks.keys().filter(|b| reach.contains(b)) {
    let frontier: HashSet<BlockId> = df.frontier(n).collect();
    for b in f.blocks.keys().filter(|b| reach.contains(b)) {
      let expected = !tree.strictly_dominates(n, b)
        && f[b].preds.iter().any(|&p| tree.dominates(n, p));
      assert_eq!(frontier.contains(&b), expected, "DF({n:?}) membership of {b:?}");
    }
  }
}

/// Build a function whose CFG realizes a random connected digraph: node 0 is
/// jumped to from the entry, every later node is reachable through a random
/// spanning edge, and leftover terminator slots are filled with random
/// targets (self-loops and duplicate targets included).
fn random_function(n: usize, seed: u64) -> Function {
  let mut rng = SmallRng::seed_from_u64(seed);
  let mut out: Vec<Vec<usize>> = vec![vec![]; n];
  for k in 1..n {
    let candidates: Vec<usize> = (0..k).filter(|&j| out[j].len() < 2).collect();
    let j = candidates[rng.gen_range(0..candidates.len())];
    out[j].push(k);
  }
  for j in 0..n {
    while out[j].len() < 2 && rng.gen_bool(0.4) {
      out[j].push(rng.gen_range(0..n));
    }
  }

  let mut b = CodeBuilder::new();
  let labels: Vec<_> = (0..n).map(|_| b.label()).collect();
  let cond = b.constant("0", ccir::types::ir::TyKind::int(1));
  let ret = b.constant("0", int32());
  for (k, targets) in out.iter().enumerate() {
    b.append_label(labels[k]);
    match targets[..] {
      [] => { b.append_return(ret); }
      [t] => { b.append_goto(labels[t]); }
      [t, e] => { b.append_condition_branch(cond, labels[t], labels[e]).unwrap(); }
      _ => unreachable!("at most two successors"),
    }
  }
  let (ctx, codes) = b.finish();
  cfg::build_function("g", fn_int(), ctx, codes).unwrap()
}

#[test]
fn random_graphs_match_the_oracle() {
  for n in [2, 3, 5, 9, 17, 33, 64] {
    for seed in 0..4 {
      let f = random_function(n, seed ^ (n as u64) << 8);
      validate::validate_function(&f).unwrap();
      check_against_oracle(&f);
    }
  }
}

#[test]
fn hand_shapes_match_the_oracle() {
  check_against_oracle(&diamond());
  check_against_oracle(&while_loop());
}
