//! The typed AST consumed by the IR generator.
//!
//! The lexer and parser live outside this crate; this module is the interface
//! they produce. Nodes are a plain tagged enum with a source span, and the
//! constructor helpers exist so tests (and embedders without a parser) can
//! build trees directly.

use crate::types::{Binop, Span, Unop};
use crate::types::ty::Declarator;

/// The kind of a literal node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LitKind {
  /// An integer literal; the text is kept verbatim.
  Integer,
  /// An identifier reference.
  Identifier,
}

/// An AST node: a kind plus the source range it covers.
#[derive(Debug)]
pub struct Node {
  /// What the node is.
  pub kind: NodeKind,
  /// The source range of the node.
  pub span: Span,
}

/// The AST node kinds.
#[derive(Debug)]
pub enum NodeKind {
  /// An empty statement or an omitted expression (e.g. a `for` clause).
  Empty,
  /// A binary operation.
  Binary {
    /// The operator.
    op: Binop,
    /// The left operand.
    lhs: Box<Node>,
    /// The right operand.
    rhs: Box<Node>,
  },
  /// A unary operation.
  Unary {
    /// The operator.
    op: Unop,
    /// The operand.
    operand: Box<Node>,
  },
  /// An integer literal or identifier.
  Lit {
    /// Which kind of literal.
    kind: LitKind,
    /// The literal's source text.
    text: Box<str>,
  },
  /// `lhs = rhs`. The whole expression's value is the value of `rhs`.
  Assign {
    /// The assigned place; must be an identifier in this subset.
    target: Box<Node>,
    /// The assigned value.
    value: Box<Node>,
  },
  /// `&operand`.
  GetAddress {
    /// The lvalue whose address is taken.
    operand: Box<Node>,
  },
  /// `if (cond) then_stmt else else_stmt`.
  IfElse {
    /// The condition.
    cond: Box<Node>,
    /// The statement run when the condition is nonzero.
    then_stmt: Box<Node>,
    /// The optional else statement.
    else_stmt: Option<Box<Node>>,
  },
  /// `while (cond) body`.
  WhileLoop {
    /// The condition.
    cond: Box<Node>,
    /// The loop body.
    body: Box<Node>,
  },
  /// `do body while (cond);`.
  DoWhile {
    /// The loop body.
    body: Box<Node>,
    /// The condition.
    cond: Box<Node>,
  },
  /// `for (init; cond; step) body`. Omitted clauses are [`NodeKind::Empty`].
  ForLoop {
    /// The initializer clause.
    init: Box<Node>,
    /// The condition clause.
    cond: Box<Node>,
    /// The step clause.
    step: Box<Node>,
    /// The loop body.
    body: Box<Node>,
  },
  /// A braced statement list; opens a new variable scope.
  Compound(Vec<Node>),
  /// A single variable declaration with an optional initializer.
  VariableDeclaration {
    /// The declarator.
    decl: Declarator,
    /// The initializer expression, if written.
    init: Option<Box<Node>>,
  },
  /// A function declaration or definition.
  FunctionDeclaration {
    /// The declarator; its type is a [`TyKind::Func`](crate::types::ty::TyKind).
    decl: Declarator,
    /// The trailing K&R declaration list, as
    /// [`NodeKind::DeclarationStatement`] nodes.
    knr_decls: Vec<Node>,
    /// The body, if this is a definition.
    body: Option<Box<Node>>,
  },
  /// A declaration statement holding one or more declarations.
  DeclarationStatement(Vec<Node>),
  /// `return value;`.
  Return {
    /// The returned expression, if written.
    value: Option<Box<Node>>,
  },
}

impl Node {
  /// Construct a node covering `span`.
  #[must_use] pub fn new(kind: NodeKind, span: Span) -> Self { Node { kind, span } }

  fn mk(kind: NodeKind) -> Self { Node { kind, span: Span::default() } }

  /// An empty statement.
  #[must_use] pub fn empty() -> Self { Self::mk(NodeKind::Empty) }

  /// A binary operation node.
  #[must_use] pub fn binary(op: Binop, lhs: Node, rhs: Node) -> Self {
    Self::mk(NodeKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
  }

  /// `lhs + rhs`
  #[must_use] pub fn add(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Add, lhs, rhs) }

  /// `lhs - rhs`
  #[must_use] pub fn sub(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Sub, lhs, rhs) }

  /// `lhs * rhs`
  #[must_use] pub fn mul(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Mul, lhs, rhs) }

  /// `lhs / rhs`
  #[must_use] pub fn div(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Div, lhs, rhs) }

  /// `lhs == rhs`
  #[must_use] pub fn eq(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Eq, lhs, rhs) }

  /// `lhs != rhs`
  #[must_use] pub fn ne(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Ne, lhs, rhs) }

  /// `lhs < rhs`
  #[must_use] pub fn lt(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Lt, lhs, rhs) }

  /// `lhs <= rhs`
  #[must_use] pub fn le(lhs: Node, rhs: Node) -> Self { Self::binary(Binop::Le, lhs, rhs) }

  /// `-operand`
  #[must_use] pub fn neg(operand: Node) -> Self {
    Self::mk(NodeKind::Unary { op: Unop::Neg, operand: Box::new(operand) })
  }

  /// An integer literal.
  #[must_use] pub fn integer(text: &str) -> Self {
    Self::mk(NodeKind::Lit { kind: LitKind::Integer, text: text.into() })
  }

  /// An identifier reference.
  #[must_use] pub fn ident(text: &str) -> Self {
    Self::mk(NodeKind::Lit { kind: LitKind::Identifier, text: text.into() })
  }

  /// `target = value`
  #[must_use] pub fn assign(target: Node, value: Node) -> Self {
    Self::mk(NodeKind::Assign { target: Box::new(target), value: Box::new(value) })
  }

  /// `&operand`
  #[must_use] pub fn get_address(operand: Node) -> Self {
    Self::mk(NodeKind::GetAddress { operand: Box::new(operand) })
  }

  /// An `if`/`else` statement; pass `None` for a bare `if`.
  #[must_use] pub fn if_else(cond: Node, then_stmt: Node, else_stmt: Option<Node>) -> Self {
    Self::mk(NodeKind::IfElse {
      cond: Box::new(cond),
      then_stmt: Box::new(then_stmt),
      else_stmt: else_stmt.map(Box::new),
    })
  }

  /// A `while` loop.
  #[must_use] pub fn while_loop(cond: Node, body: Node) -> Self {
    Self::mk(NodeKind::WhileLoop { cond: Box::new(cond), body: Box::new(body) })
  }

  /// A `do`/`while` loop.
  #[must_use] pub fn do_while(body: Node, cond: Node) -> Self {
    Self::mk(NodeKind::DoWhile { body: Box::new(body), cond: Box::new(cond) })
  }

  /// A `for` loop.
  #[must_use] pub fn for_loop(init: Node, cond: Node, step: Node, body: Node) -> Self {
    Self::mk(NodeKind::ForLoop {
      init: Box::new(init),
      cond: Box::new(cond),
      step: Box::new(step),
      body: Box::new(body),
    })
  }

  /// A compound statement.
  #[must_use] pub fn compound(children: Vec<Node>) -> Self {
    Self::mk(NodeKind::Compound(children))
  }

  /// A variable declaration.
  #[must_use] pub fn variable_declaration(decl: Declarator, init: Option<Node>) -> Self {
    Self::mk(NodeKind::VariableDeclaration { decl, init: init.map(Box::new) })
  }

  /// A function declaration or definition without a K&R declaration list.
  #[must_use] pub fn function_declaration(decl: Declarator, body: Option<Node>) -> Self {
    Self::mk(NodeKind::FunctionDeclaration { decl, knr_decls: vec![], body: body.map(Box::new) })
  }

  /// A function declaration or definition with a K&R declaration list.
  #[must_use] pub fn function_declaration_knr(
    decl: Declarator, knr_decls: Vec<Node>, body: Option<Node>,
  ) -> Self {
    Self::mk(NodeKind::FunctionDeclaration { decl, knr_decls, body: body.map(Box::new) })
  }

  /// A declaration statement.
  #[must_use] pub fn declaration_statement(decls: Vec<Node>) -> Self {
    Self::mk(NodeKind::DeclarationStatement(decls))
  }

  /// A `return` statement.
  #[must_use] pub fn ret(value: Node) -> Self {
    Self::mk(NodeKind::Return { value: Some(Box::new(value)) })
  }
}
