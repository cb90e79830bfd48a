//! Dominator-tree construction (Lengauer–Tarjan) and the dominance-frontier
//! service built on top of it.
//!
//! The CFG is numbered by an iterative DFS preorder from the entry block;
//! semi-dominators are computed over that numbering with a path-compressing
//! union-find, bucketed into immediate dominators, and fixed up in a final
//! forward pass. Blocks unreachable from the entry never enter the tree and
//! are skipped by every consumer.

use std::collections::HashMap;

use bit_set::BitSet;
use log::debug;

use crate::cfg::Function;
use crate::types::{Idx, IdxVec};
use crate::types::ir::BlockId;

crate::mk_id! {
  /// The id of a node of the [`DominatorTree`], in DFS preorder: the root is
  /// node 0, and every node's immediate dominator has a smaller id.
  NodeId,
}

/// One node of the dominator tree.
#[derive(Debug)]
pub struct DomNode {
  /// The block this node stands for.
  pub block: BlockId,
  /// The immediate dominator; `None` only for the root.
  pub parent: Option<NodeId>,
  /// The depth of the node (the root has level 0).
  pub level: u32,
  /// The nodes immediately dominated by this one.
  pub children: Vec<NodeId>,
}

/// The dominator tree of a function's CFG. The entry block is the root.
#[derive(Debug)]
pub struct DominatorTree {
  /// The nodes, in DFS preorder of the CFG.
  pub nodes: IdxVec<NodeId, DomNode>,
  node_of: HashMap<BlockId, NodeId>,
}

impl DominatorTree {
  /// The root node (the entry block).
  #[must_use] pub fn root(&self) -> NodeId { NodeId(0) }

  /// The tree node of `b`, or `None` if `b` is unreachable.
  #[must_use] pub fn node(&self, b: BlockId) -> Option<NodeId> {
    self.node_of.get(&b).copied()
  }

  /// Does `dom` dominate `n`? Climbs from `n` until the levels match, then
  /// compares identity. Unreachable blocks dominate nothing and are
  /// dominated by nothing.
  #[must_use] pub fn dominates(&self, dom: BlockId, n: BlockId) -> bool {
    let (Some(d), Some(mut x)) = (self.node(dom), self.node(n)) else { return false };
    while self.nodes[x].level > self.nodes[d].level {
      x = self.nodes[x].parent.expect("non-root node has a parent");
    }
    x == d
  }

  /// Does `dom` strictly dominate `n`?
  #[must_use] pub fn strictly_dominates(&self, dom: BlockId, n: BlockId) -> bool {
    dom != n && self.dominates(dom, n)
  }

  /// Build the dominator tree for `func` by the Lengauer–Tarjan algorithm.
  #[must_use] pub fn build(func: &Function) -> Self {
    let nblocks = func.blocks.len();
    let mut index_of: Vec<Option<u32>> = vec![None; nblocks];
    let mut order: Vec<BlockId> = vec![];
    let mut father: Vec<u32> = vec![];
    let mut preds: Vec<Vec<u32>> = vec![];

    // DFS preorder numbering, iteratively; `preds` collects predecessor
    // indices for tree and non-tree edges alike.
    let assign = |b: BlockId, order: &mut Vec<BlockId>, index_of: &mut Vec<Option<u32>>,
                  father: &mut Vec<u32>, preds: &mut Vec<Vec<u32>>| {
      let i = u32::try_from(order.len()).expect("block count overflow");
      index_of[b.into_usize()] = Some(i);
      order.push(b);
      father.push(0);
      preds.push(vec![]);
      i
    };
    assign(func.entry, &mut order, &mut index_of, &mut father, &mut preds);
    let mut stack: Vec<(BlockId, usize)> = vec![(func.entry, 0)];
    while let Some(&mut (b, ref mut pos)) = stack.last_mut() {
      let bi = index_of[b.into_usize()].expect("visited block is numbered");
      if let Some(&s) = func[b].succs.get(*pos) {
        *pos += 1;
        match index_of[s.into_usize()] {
          None => {
            let si = assign(s, &mut order, &mut index_of, &mut father, &mut preds);
            father[si as usize] = bi;
            preds[si as usize].push(bi);
            stack.push((s, 0));
          }
          Some(si) => preds[si as usize].push(bi),
        }
      } else {
        stack.pop();
      }
    }
    let n = order.len();
    debug!("dominator tree: {n} reachable of {nblocks} blocks");

    // Process indices n-1 down to 1: semi-dominators, buckets, and the
    // deferred immediate-dominator assignment.
    let mut sdom: Vec<u32> = (0..n as u32).collect();
    let mut idom: Vec<u32> = vec![0; n];
    let mut bucket: Vec<Vec<u32>> = vec![vec![]; n];
    let mut uf = UnionFind::new(n);
    for i in (1..n as u32).rev() {
      for p in preds[i as usize].clone() {
        let u = uf.eval(p, &sdom);
        if sdom[u as usize] < sdom[i as usize] {
          sdom[i as usize] = sdom[u as usize];
        }
      }
      bucket[sdom[i as usize] as usize].push(i);
      let f = father[i as usize];
      uf.link(i, f);
      for v in std::mem::take(&mut bucket[f as usize]) {
        let u = uf.eval(v, &sdom);
        idom[v as usize] = if sdom[u as usize] == sdom[v as usize] { f } else { u };
      }
    }
    for i in 1..n {
      if idom[i] != sdom[i] {
        idom[i] = idom[idom[i] as usize];
      }
    }

    // Materialize the tree; idom indices are always smaller, so levels can
    // be filled in a single forward pass.
    let mut nodes: IdxVec<NodeId, DomNode> = IdxVec::new();
    let mut node_of = HashMap::new();
    nodes.push(DomNode { block: order[0], parent: None, level: 0, children: vec![] });
    node_of.insert(order[0], NodeId(0));
    for i in 1..n {
      let parent = NodeId(idom[i]);
      let level = nodes[parent].level + 1;
      let id = nodes.push(DomNode { block: order[i], parent: Some(parent), level, children: vec![] });
      nodes[parent].children.push(id);
      node_of.insert(order[i], id);
    }
    DominatorTree { nodes, node_of }
  }
}

/// The union-find structure of Lengauer–Tarjan: `eval` returns the node of
/// minimum semi-dominator on the path to the forest root, compressing as it
/// goes.
struct UnionFind {
  parent: Vec<u32>,
  min_sdom: Vec<u32>,
}

impl UnionFind {
  fn new(n: usize) -> Self {
    UnionFind { parent: (0..n as u32).collect(), min_sdom: (0..n as u32).collect() }
  }

  fn link(&mut self, x: u32, y: u32) {
    self.parent[x as usize] = y;
  }

  fn eval(&mut self, x: u32, sdom: &[u32]) -> u32 {
    let mut path = vec![];
    let mut v = x;
    while self.parent[v as usize] != v {
      path.push(v);
      v = self.parent[v as usize];
    }
    // Compress from the top of the path down, so each node folds in its
    // (already updated) old parent's minimum.
    for &w in path.iter().rev() {
      let p = self.parent[w as usize];
      if sdom[self.min_sdom[p as usize] as usize] < sdom[self.min_sdom[w as usize] as usize] {
        self.min_sdom[w as usize] = self.min_sdom[p as usize];
      }
      self.parent[w as usize] = v;
    }
    self.min_sdom[x as usize]
  }
}

/// Per-block dominance frontiers and the iterated-frontier worklist, the
/// service the φ-placement phase of mem2reg consumes.
#[derive(Debug)]
pub struct DomFrontiers {
  tree: DominatorTree,
  df: IdxVec<NodeId, BitSet>,
}

impl DomFrontiers {
  /// Compute the dominance frontier of every reachable block of `func`.
  ///
  /// `DF(n)` collects the CFG successors of `n` that `n` does not strictly
  /// dominate, plus the frontier members of `n`'s dominator-tree children
  /// that `n` does not strictly dominate. The strictness matters: a loop
  /// header belongs to its own frontier.
  #[must_use] pub fn new(func: &Function) -> Self {
    let tree = DominatorTree::build(func);
    let mut df: IdxVec<NodeId, BitSet> =
      (0..tree.nodes.len()).map(|_| BitSet::new()).collect();

    // Children-first traversal of the dominator tree.
    let mut postorder: Vec<NodeId> = vec![];
    let mut stack = vec![(tree.root(), false)];
    while let Some((n, expanded)) = stack.pop() {
      if expanded {
        postorder.push(n);
      } else {
        stack.push((n, true));
        for &c in &tree.nodes[n].children {
          stack.push((c, false));
        }
      }
    }

    for n in postorder {
      let g = tree.nodes[n].block;
      let mut set = BitSet::new();
      for &s in &func[g].succs {
        if !tree.strictly_dominates(g, s) {
          set.insert(s.into_usize());
        }
      }
      for &c in &tree.nodes[n].children {
        for d in df[c].iter() {
          if !tree.strictly_dominates(g, BlockId::from_usize(d)) {
            set.insert(d);
          }
        }
      }
      df[n] = set;
    }
    DomFrontiers { tree, df }
  }

  /// The dominator tree the frontiers were computed over.
  #[must_use] pub fn tree(&self) -> &DominatorTree { &self.tree }

  /// The dominance frontier of `b`. Empty for unreachable blocks.
  pub fn frontier(&self, b: BlockId) -> impl Iterator<Item = BlockId> + '_ {
    self.tree.node(b).into_iter()
      .flat_map(|n| self.df[n].iter().map(BlockId::from_usize))
  }

  /// The iterated dominance frontier of a set of blocks: the least fixed
  /// point containing the frontier of every member, computed by worklist.
  #[must_use] pub fn iterated(&self, blocks: impl IntoIterator<Item = BlockId>) -> Vec<BlockId> {
    let mut result = BitSet::new();
    let mut work: Vec<BlockId> = blocks.into_iter().collect();
    while let Some(b) = work.pop() {
      for d in self.frontier(b) {
        if result.insert(d.into_usize()) {
          work.push(d);
        }
      }
    }
    result.iter().map(BlockId::from_usize).collect()
  }
}
