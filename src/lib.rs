//! The intermediate-representation core of a small C-subset compiler: the
//! data structures, construction algorithms, and optimization passes that
//! convert a typed abstract syntax tree into a control-flow graph of
//! SSA-form three-address code.
//!
//! The pipeline, leaves first:
//!
//! * [`types::ty`] canonicalizes the front end's declarator types;
//! * [`types::ir`] defines typed values with tracked use-def edges and the
//!   three-address instruction set;
//! * [`code_builder`] emits a linear, label-threaded instruction stream;
//! * [`build_ir`] walks the AST and drives the builder;
//! * [`cfg`] partitions the stream into basic blocks with predecessor and
//!   successor edges;
//! * [`dominator`] builds the Lengauer–Tarjan dominator tree and the
//!   dominance-frontier service on top of it;
//! * [`opt::mem2reg`] promotes stack slots to SSA registers, and
//!   [`opt::out_of_ssa`] lowers φ nodes back to copies;
//! * [`write`] renders the textual IR dump and [`validate`] checks the
//!   structural invariants every pass must preserve.
//!
//! The whole pipeline is single threaded; each function's values live in an
//! arena owned by that function, addressed by 32-bit ids.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod types;
pub mod code_builder;
pub mod build_ir;
pub mod cfg;
pub mod dominator;
pub mod opt;
pub mod write;
pub mod validate;

use types::Span;

/// The error type for every fallible operation in the IR core. All errors are
/// fatal for the compilation unit; the core performs no partial-output
/// recovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Operand types disagree at instruction emission, or a value appears in a
  /// position its type category does not permit.
  #[error("type mismatch: {msg}")]
  TypeMismatch {
    /// A description of the disagreement.
    msg: String,
    /// The source range of the offending construct, when known.
    span: Option<Span>,
  },
  /// A declarator type that cannot be canonicalized: an array of functions,
  /// a function returning an array, a variable array without a size, and the
  /// like.
  #[error("invalid type: {msg}")]
  InvalidType {
    /// A description of the rejected type.
    msg: String,
    /// The source range of the offending construct, when known.
    span: Option<Span>,
  },
  /// A name lookup failed across all enclosing scopes.
  #[error("use of undeclared identifier '{name}'")]
  UndeclaredIdentifier {
    /// The name that failed to resolve.
    name: String,
    /// The source range of the reference.
    span: Span,
  },
  /// A declaration conflicts with an earlier one: a variable shadowed within
  /// one scope, a function redeclared at a different type, or two bodies for
  /// one function.
  #[error("redeclaration of '{name}': {msg}")]
  Redeclaration {
    /// The redeclared name.
    name: String,
    /// Which redeclaration rule was violated.
    msg: String,
    /// The source range of the later declaration.
    span: Span,
  },
  /// A parameter list or K&R declaration list that cannot be reconciled.
  #[error("malformed declarator: {msg}")]
  MalformedDeclarator {
    /// A description of the problem.
    msg: String,
    /// The source range of the offending declarator, when known.
    span: Option<Span>,
  },
  /// A structural invariant was broken while building or rewriting the CFG.
  #[error("invalid control flow: {msg}")]
  InvalidControlFlow {
    /// A description of the violation.
    msg: String,
  },
  /// An internal consistency check failed. This never fires on correct
  /// inputs; if it does, it indicates a bug in the IR core, and the offending
  /// IR should be preserved for diagnosis.
  #[error("internal invariant violated: {msg}")]
  InternalInvariant {
    /// A description of the violated invariant.
    msg: String,
  },
}

impl Error {
  pub(crate) fn type_mismatch(msg: impl Into<String>) -> Self {
    Error::TypeMismatch { msg: msg.into(), span: None }
  }

  pub(crate) fn invalid_type(msg: impl Into<String>) -> Self {
    Error::InvalidType { msg: msg.into(), span: None }
  }

  pub(crate) fn control_flow(msg: impl Into<String>) -> Self {
    Error::InvalidControlFlow { msg: msg.into() }
  }

  pub(crate) fn internal(msg: impl Into<String>) -> Self {
    Error::InternalInvariant { msg: msg.into() }
  }
}

/// The result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
