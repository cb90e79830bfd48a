//! The IR layer: types, values, use edges, and three-address instructions,
//! together with the per-function arena ([`FunctionCtx`]) that owns them all.
//!
//! Rather than reference-counted nodes with back-pointers, everything is held
//! in flat [`IdxVec`]s addressed by 32-bit ids. User lists and instruction
//! sequences are intrusive doubly linked lists keyed by those ids, which gives
//! O(1) operand rewriting and instruction insertion with stable identity.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::types::{Binop, IdxVec, Unop};

crate::mk_id! {
  /// The id of a [`Value`] within its [`FunctionCtx`].
  ValueId,
  /// The id of an [`Inst`] within its [`FunctionCtx`].
  InstId,
  /// The id of a [`Use`] record within its [`FunctionCtx`].
  UseId,
  /// The id of a basic block within a [`Function`](crate::cfg::Function).
  BlockId,
  /// The id of a function within a [`Module`](crate::build_ir::Module).
  FuncId,
}

/// The offset bound carried by a pointer type. Pointers produced by C array
/// decay remember the array extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetLimit {
  /// An ordinary pointer with no recorded bound.
  Unlimited,
  /// A pointer that may be offset by at most this many elements.
  Limited(u64),
}

/// An IR type. Types are immutable once constructed and compared structurally.
pub type Ty = Rc<TyKind>;

/// The type of an IR value.
#[derive(Debug, PartialEq, Eq)]
pub enum TyKind {
  /// An integer of the given width in bits. Comparison results have type
  /// `Int(1)`.
  Int(u32),
  /// A pointer to `aim`. `limit` records C-array decay bounds.
  Ptr {
    /// The pointee type.
    aim: Ty,
    /// The decay bound, if any.
    limit: OffsetLimit,
  },
  /// An array of `count` elements. A count of `-1` means the size is unknown,
  /// which is only permitted in parameter position.
  Array {
    /// The element type.
    elem: Ty,
    /// The element count, or `-1`.
    count: i64,
  },
  /// A function type.
  Func {
    /// The return type.
    ret: Ty,
    /// The parameter types, in order.
    params: Box<[Ty]>,
  },
}

impl TyKind {
  /// An integer type of the given bit width.
  #[must_use] pub fn int(bits: u32) -> Ty { Rc::new(TyKind::Int(bits)) }

  /// An unbounded pointer to `aim`.
  #[must_use] pub fn ptr(aim: Ty) -> Ty {
    Rc::new(TyKind::Ptr { aim, limit: OffsetLimit::Unlimited })
  }

  /// A pointer to `aim` with an explicit offset bound.
  #[must_use] pub fn ptr_limited(aim: Ty, limit: OffsetLimit) -> Ty {
    Rc::new(TyKind::Ptr { aim, limit })
  }

  /// An array of `count` elements of type `elem`.
  #[must_use] pub fn array(elem: Ty, count: i64) -> Ty {
    Rc::new(TyKind::Array { elem, count })
  }

  /// A function type.
  #[must_use] pub fn func(ret: Ty, params: impl Into<Box<[Ty]>>) -> Ty {
    Rc::new(TyKind::Func { ret, params: params.into() })
  }

  /// The pointee of a pointer type, if this is one.
  #[must_use] pub fn aim(&self) -> Option<&Ty> {
    if let TyKind::Ptr { aim, .. } = self { Some(aim) } else { None }
  }

  /// Is this an integer type?
  #[must_use] pub fn is_int(&self) -> bool { matches!(self, TyKind::Int(_)) }
}

/// Where a [`ValueKind::Label`] points. A label addresses an instruction while
/// the code list is still linear; once the CFG is built, ownership migrates to
/// the block that starts with that instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelTarget {
  /// Not yet attached to anything.
  Unset,
  /// The labelled instruction, in a linear code list.
  Inst(InstId),
  /// The labelled block, after CFG construction.
  Block(BlockId),
}

/// What a [`Value`] is.
#[derive(Debug)]
pub enum ValueKind {
  /// A stack slot produced by `alloca`. The value itself has pointer type;
  /// `allocated` is the pointee type.
  Variable {
    /// The type of the data stored in the slot.
    allocated: Ty,
  },
  /// A literal. The core never folds constants; they render by source text.
  Constant {
    /// The literal's source text.
    literal: Box<str>,
  },
  /// An SSA register. Its defining instruction is recoverable from the user
  /// list: a temporary has exactly one use in the result slot of exactly one
  /// instruction.
  Temporary,
  /// A function owned by the enclosing [`Module`](crate::build_ir::Module).
  Function(FuncId),
  /// A jump target.
  Label(LabelTarget),
  /// A typed "not yet defined" value, used as the initial stack entry for
  /// uninitialized slots during SSA renaming.
  Undef,
  /// A function argument, by position.
  Parameter {
    /// The zero-based argument index.
    index: u32,
  },
}

/// The head of a value's intrusive user list.
#[derive(Clone, Copy, Debug, Default)]
struct UseList {
  head: Option<UseId>,
  len: u32,
}

/// A value together with its type and user list.
#[derive(Debug)]
pub struct Value {
  /// What the value is.
  pub kind: ValueKind,
  /// The value's type. `None` only for labels.
  pub ty: Option<Ty>,
  users: UseList,
}

impl Value {
  /// Is this a label?
  #[must_use] pub fn is_label(&self) -> bool { matches!(self.kind, ValueKind::Label(_)) }

  /// The label's target, if this is a label.
  #[must_use] pub fn label_target(&self) -> Option<LabelTarget> {
    if let ValueKind::Label(t) = self.kind { Some(t) } else { None }
  }
}

/// One use-def edge: instruction `user` references `value` through operand
/// slot `slot`. Use records are nodes of the referenced value's intrusive
/// user list.
#[derive(Debug)]
pub struct Use {
  /// The instruction holding the operand.
  pub user: InstId,
  /// The operand slot index within `user`. See [`RESULT_SLOT`].
  pub slot: u32,
  /// The referenced value.
  pub value: ValueId,
  prev: Option<UseId>,
  next: Option<UseId>,
}

/// The slot index of an instruction's result operand. Real operands count
/// from 1; φ sources occupy slots `1..=n` matching predecessor order.
pub const RESULT_SLOT: u32 = 0;

/// A three-address instruction body. Operands are [`UseId`]s, so any of them
/// can be rewritten in O(1) without touching the instruction.
#[derive(Debug)]
pub enum InstKind {
  /// `result = lhs op rhs`
  Binary {
    /// The operator.
    op: Binop,
    /// Slot 1.
    lhs: UseId,
    /// Slot 2.
    rhs: UseId,
    /// Slot 0.
    result: UseId,
  },
  /// `result = op operand`
  Unary {
    /// The operator.
    op: Unop,
    /// Slot 1.
    operand: UseId,
    /// Slot 0.
    result: UseId,
  },
  /// An unconditional jump.
  Goto {
    /// Slot 1: the target label.
    target: UseId,
  },
  /// A two-way branch on an `Int(1)` condition.
  Branch {
    /// Slot 1: the condition.
    cond: UseId,
    /// Slot 2: the target when the condition is nonzero.
    then_label: UseId,
    /// Slot 3: the target when the condition is zero.
    else_label: UseId,
  },
  /// Reserves `size` bytes of stack and names the slot's address.
  Alloca {
    /// Slot 0: the produced [`ValueKind::Variable`].
    dest: UseId,
    /// The slot size in bytes.
    size: u32,
  },
  /// `result = load addr`
  Load {
    /// Slot 1: the source address.
    addr: UseId,
    /// Slot 0.
    result: UseId,
  },
  /// `store value to addr`
  Store {
    /// Slot 1: the stored value.
    value: UseId,
    /// Slot 2: the destination address.
    addr: UseId,
  },
  /// An SSA join. `srcs[k]` is the value flowing in from `preds[k]`, and
  /// `preds` matches the containing block's predecessor order.
  Phi {
    /// Slot 0.
    result: UseId,
    /// Slots `1..=n`: the joined values.
    srcs: SmallVec<[UseId; 2]>,
    /// The predecessor supplying each source.
    preds: SmallVec<[BlockId; 2]>,
  },
  /// `result = src`, the φ-lowering assignment emitted when leaving SSA.
  Copy {
    /// Slot 1.
    src: UseId,
    /// Slot 0.
    result: UseId,
  },
  /// Return a value from the enclosing function.
  Ret {
    /// Slot 1: the returned value.
    value: UseId,
  },
  /// A placeholder that does nothing; emitted for a trailing label.
  Nope,
  /// Marks the definition of a function in a module-level code stream.
  FuncDef {
    /// Slot 1: the [`ValueKind::Function`] value.
    func: UseId,
  },
}

/// An instruction node. Instructions form intrusive doubly linked lists:
/// within the growing linear stream emitted by the builder the links are
/// unset, and after CFG construction each instruction belongs to exactly one
/// block's list.
#[derive(Debug)]
pub struct Inst {
  /// The instruction body.
  pub kind: InstKind,
  /// The label addressing this instruction, while the code list is linear.
  /// CFG construction moves it onto the block.
  pub label: Option<ValueId>,
  /// The containing block, after CFG construction.
  pub block: Option<BlockId>,
  pub(crate) prev: Option<InstId>,
  pub(crate) next: Option<InstId>,
}

impl Inst {
  pub(crate) fn new(kind: InstKind) -> Self {
    Inst { kind, label: None, block: None, prev: None, next: None }
  }

  /// Is this one of the block-ending instructions (goto, branch, return)?
  #[must_use] pub fn is_terminator(&self) -> bool {
    matches!(self.kind, InstKind::Goto { .. } | InstKind::Branch { .. } | InstKind::Ret { .. })
  }

  /// The use occupying operand slot `slot`, if the slot exists.
  #[must_use] pub fn use_at(&self, slot: u32) -> Option<UseId> {
    match self.kind {
      InstKind::Binary { lhs, rhs, result, .. } =>
        [result, lhs, rhs].get(slot as usize).copied(),
      InstKind::Unary { operand, result, .. } =>
        [result, operand].get(slot as usize).copied(),
      InstKind::Goto { target } => (slot == 1).then_some(target),
      InstKind::Branch { cond, then_label, else_label } => match slot {
        1 => Some(cond),
        2 => Some(then_label),
        3 => Some(else_label),
        _ => None,
      },
      InstKind::Alloca { dest, .. } => (slot == RESULT_SLOT).then_some(dest),
      InstKind::Load { addr, result } => [result, addr].get(slot as usize).copied(),
      InstKind::Store { value, addr } => match slot {
        1 => Some(value),
        2 => Some(addr),
        _ => None,
      },
      InstKind::Phi { result, ref srcs, .. } => {
        if slot == RESULT_SLOT { Some(result) } else { srcs.get(slot as usize - 1).copied() }
      }
      InstKind::Copy { src, result } => [result, src].get(slot as usize).copied(),
      InstKind::Ret { value } => (slot == 1).then_some(value),
      InstKind::Nope => None,
      InstKind::FuncDef { func } => (slot == 1).then_some(func),
    }
  }

  /// Every use held by this instruction, result slot included.
  #[must_use] pub fn uses(&self) -> SmallVec<[UseId; 4]> {
    match self.kind {
      InstKind::Binary { lhs, rhs, result, .. } => SmallVec::from_slice(&[result, lhs, rhs]),
      InstKind::Unary { operand, result, .. } => SmallVec::from_slice(&[result, operand]),
      InstKind::Goto { target } => SmallVec::from_slice(&[target]),
      InstKind::Branch { cond, then_label, else_label } =>
        SmallVec::from_slice(&[cond, then_label, else_label]),
      InstKind::Alloca { dest, .. } => SmallVec::from_slice(&[dest]),
      InstKind::Load { addr, result } => SmallVec::from_slice(&[result, addr]),
      InstKind::Store { value, addr } => SmallVec::from_slice(&[value, addr]),
      InstKind::Phi { result, ref srcs, .. } => {
        let mut out = SmallVec::from_slice(&[result]);
        out.extend_from_slice(srcs);
        out
      }
      InstKind::Copy { src, result } => SmallVec::from_slice(&[result, src]),
      InstKind::Ret { value } => SmallVec::from_slice(&[value]),
      InstKind::Nope => SmallVec::new(),
      InstKind::FuncDef { func } => SmallVec::from_slice(&[func]),
    }
  }
}

/// The arena owning every value, instruction, and use record of one function
/// (or of the module-level code stream). Values outlive all instructions that
/// reference them; nothing is ever deallocated before the context itself.
#[derive(Debug, Default)]
pub struct FunctionCtx {
  /// All values allocated for this function.
  pub values: IdxVec<ValueId, Value>,
  /// All instructions, including erased ones (erasure detaches uses and
  /// unlinks the node but leaves the arena slot in place).
  pub insts: IdxVec<InstId, Inst>,
  /// All use records.
  pub uses: IdxVec<UseId, Use>,
}

impl FunctionCtx {
  /// Construct an empty context.
  #[must_use] pub fn new() -> Self { Self::default() }

  fn alloc_value(&mut self, kind: ValueKind, ty: Option<Ty>) -> ValueId {
    self.values.push(Value { kind, ty, users: UseList::default() })
  }

  /// Allocate a fresh SSA temporary of type `ty`.
  pub fn alloc_temporary(&mut self, ty: Ty) -> ValueId {
    self.alloc_value(ValueKind::Temporary, Some(ty))
  }

  /// Allocate a stack-slot address value. The value's own type is
  /// pointer-to-`allocated`.
  pub fn alloc_variable(&mut self, allocated: Ty) -> ValueId {
    let ty = TyKind::ptr(allocated.clone());
    self.alloc_value(ValueKind::Variable { allocated }, Some(ty))
  }

  /// Allocate a fresh unattached label.
  pub fn alloc_label(&mut self) -> ValueId {
    self.alloc_value(ValueKind::Label(LabelTarget::Unset), None)
  }

  /// Allocate a constant with the given source text and type.
  pub fn alloc_constant(&mut self, literal: &str, ty: Ty) -> ValueId {
    self.alloc_value(ValueKind::Constant { literal: literal.into() }, Some(ty))
  }

  /// Allocate a typed undefined value.
  pub fn alloc_undef(&mut self, ty: Ty) -> ValueId {
    self.alloc_value(ValueKind::Undef, Some(ty))
  }

  /// Allocate the value of the `index`th function parameter.
  pub fn alloc_parameter(&mut self, index: u32, ty: Ty) -> ValueId {
    self.alloc_value(ValueKind::Parameter { index }, Some(ty))
  }

  /// Allocate a value naming a module-level function.
  pub fn alloc_function(&mut self, func: FuncId, ty: Ty) -> ValueId {
    self.alloc_value(ValueKind::Function(func), Some(ty))
  }

  /// The type of a value, or `None` for labels.
  #[must_use] pub fn value_ty(&self, v: ValueId) -> Option<&Ty> {
    self.values[v].ty.as_ref()
  }

  /// The number of uses currently attached to `v`.
  #[must_use] pub fn user_count(&self, v: ValueId) -> usize {
    self.values[v].users.len as usize
  }

  /// Iterate over the uses attached to `v`. The context must not be mutated
  /// while iterating; passes that rewrite collect the ids first.
  pub fn users(&self, v: ValueId) -> impl Iterator<Item = UseId> + '_ {
    let mut cur = self.values[v].users.head;
    std::iter::from_fn(move || {
      let u = cur?;
      cur = self.uses[u].next;
      Some(u)
    })
  }

  /// The unique defining instruction of an SSA temporary: the user holding
  /// its result-slot use.
  #[must_use] pub fn def_of(&self, v: ValueId) -> Option<InstId> {
    self.users(v).find(|&u| self.uses[u].slot == RESULT_SLOT).map(|u| self.uses[u].user)
  }

  /// Create an instruction. The closure receives the reserved [`InstId`] so
  /// it can mint the instruction's uses via [`FunctionCtx::add_use`].
  pub(crate) fn push_inst_with(
    &mut self, f: impl FnOnce(&mut Self, InstId) -> InstKind,
  ) -> InstId {
    let id = self.insts.push(Inst::new(InstKind::Nope));
    let kind = f(self, id);
    self.insts[id].kind = kind;
    id
  }

  /// Mint a use of `value` at `(user, slot)` and attach it to the value's
  /// user list.
  pub(crate) fn add_use(&mut self, user: InstId, slot: u32, value: ValueId) -> UseId {
    let id = self.uses.push(Use { user, slot, value, prev: None, next: None });
    self.attach_use(id);
    id
  }

  fn attach_use(&mut self, u: UseId) {
    let v = self.uses[u].value;
    let head = self.values[v].users.head;
    self.uses[u].prev = None;
    self.uses[u].next = head;
    if let Some(h) = head { self.uses[h].prev = Some(u) }
    let list = &mut self.values[v].users;
    list.head = Some(u);
    list.len += 1;
  }

  fn detach_use(&mut self, u: UseId) {
    let Use { value, prev, next, .. } = self.uses[u];
    match prev {
      Some(p) => self.uses[p].next = next,
      None => self.values[value].users.head = next,
    }
    if let Some(n) = next { self.uses[n].prev = prev }
    self.uses[u].prev = None;
    self.uses[u].next = None;
    self.values[value].users.len -= 1;
  }

  /// The type an operand slot is declared to hold. For φ sources this is the
  /// φ result type (so the placement-time sentinel does not constrain later
  /// rewrites); for every other slot it is the type of the current occupant.
  fn slot_ty(&self, inst: InstId, slot: u32) -> Option<Ty> {
    if let InstKind::Phi { result, .. } = self.insts[inst].kind {
      if slot != RESULT_SLOT {
        return self.values[self.uses[result].value].ty.clone()
      }
    }
    let u = self.insts[inst].use_at(slot).expect("no such operand slot");
    self.values[self.uses[u].value].ty.clone()
  }

  /// Rewrite operand slot `slot` of `inst` to reference `value`, detaching
  /// the old use edge and attaching a new one.
  ///
  /// Panics if the replacement's type disagrees with the slot's declared
  /// type: any pipeline that would do so is miscompiling, and there is no
  /// way to continue.
  pub fn set_operand(&mut self, inst: InstId, slot: u32, value: ValueId) {
    let u = self.insts[inst].use_at(slot).expect("no such operand slot");
    let declared = self.slot_ty(inst, slot);
    match (&declared, &self.values[value].ty) {
      (Some(d), Some(n)) => assert!(d == n, "use replacement changes operand type"),
      (None, None) => {}
      _ => panic!("use replacement exchanges a label for a value"),
    }
    self.detach_use(u);
    self.uses[u].value = value;
    self.attach_use(u);
  }

  /// Re-point every use of `old` at `new`. Both must have the same type.
  pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
    if old == new { return }
    match (&self.values[old].ty, &self.values[new].ty) {
      (Some(a), Some(b)) => assert!(a == b, "use replacement changes operand type"),
      (None, None) => {}
      _ => panic!("use replacement exchanges a label for a value"),
    }
    let users: Vec<UseId> = self.users(old).collect();
    for u in users {
      self.detach_use(u);
      self.uses[u].value = new;
      self.attach_use(u);
    }
  }

  /// Detach every use held by `inst` from the referenced values' user lists.
  /// Called when an instruction is erased; the ids remain valid but inert.
  pub(crate) fn detach_inst_uses(&mut self, inst: InstId) {
    for u in self.insts[inst].uses() {
      self.detach_use(u);
    }
  }

  /// Create a φ with `preds.len()` sources, all initially referencing
  /// `sentinel`, and a fresh temporary of type `ty` as destination. The
  /// instruction is not yet placed in any block.
  pub(crate) fn new_phi(&mut self, ty: Ty, preds: &[BlockId], sentinel: ValueId) -> InstId {
    let result = self.alloc_temporary(ty);
    self.push_inst_with(|ctx, id| {
      let result = ctx.add_use(id, RESULT_SLOT, result);
      let srcs = preds.iter().enumerate()
        .map(|(k, _)| ctx.add_use(id, 1 + u32::try_from(k).expect("φ arity overflow"), sentinel))
        .collect();
      InstKind::Phi { result, srcs, preds: preds.iter().copied().collect() }
    })
  }

  /// The value occupying operand slot `slot` of `inst`.
  #[must_use] pub fn operand(&self, inst: InstId, slot: u32) -> Option<ValueId> {
    self.insts[inst].use_at(slot).map(|u| self.uses[u].value)
  }
}
