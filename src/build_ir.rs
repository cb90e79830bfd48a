//! Lowering of the typed AST into linear three-address code.
//!
//! A classical recursive descent with two traversal modes per expression:
//! `rvalue` produces a value of the expression's type (loading through an
//! lvalue where needed), `lvalue` produces the address of the named slot.
//! Control flow lowers to label-threaded code against the [`CodeBuilder`],
//! with every construct's labels created eagerly at its entry.
//!
//! The output is a [`Module`]: a module-level code stream holding global
//! declarations and function-definition markers, plus the per-function
//! linear code destined for [`build_function`](crate::cfg::build_function).

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use log::debug;

use crate::code_builder::CodeBuilder;
use crate::types::ast::{LitKind, Node, NodeKind};
use crate::types::ir::{self, FuncId, FunctionCtx, InstId, TyKind as IrTyKind, ValueId};
use crate::types::ty::{self, Declarator};
use crate::types::{IdxVec, Span};
use crate::{Error, Result};

/// One function's lowered form, before CFG construction.
#[derive(Debug)]
pub struct FuncIr {
  /// The function's name.
  pub name: String,
  /// The function's IR type.
  pub ty: ir::Ty,
  /// The arena owning the function's values and instructions.
  pub ctx: FunctionCtx,
  /// The linear code list; allocas form a contiguous prefix.
  pub codes: Vec<InstId>,
  /// The parameter values, in order.
  pub params: Vec<ValueId>,
  /// Whether a body has been provided. A prototype stays bodyless until a
  /// later definition promotes it.
  pub has_body: bool,
}

/// The result of lowering a translation unit.
#[derive(Debug)]
pub struct Module {
  /// The arena for the module-level stream.
  pub ctx: FunctionCtx,
  /// The module-level code: global declarations and function definitions.
  pub codes: Vec<InstId>,
  /// Every declared function, defined or not.
  pub funcs: IdxVec<FuncId, FuncIr>,
}

impl Module {
  /// Build every defined function into CFG form, consuming the module.
  pub fn build(self) -> Result<Vec<crate::cfg::Function>> {
    self.funcs.0.into_iter()
      .filter(|f| f.has_body)
      .map(|f| crate::cfg::build_function(f.name, f.ty, f.ctx, f.codes))
      .collect()
  }
}

/// Lower a translation unit to a [`Module`]. The root node must be a
/// function declaration, a declaration statement, or a compound node of
/// such declarations.
pub fn lower(ast: &Node) -> Result<Module> {
  let mut generator = Generator::default();
  let mut builder = CodeBuilder::new();
  generator.top_level(ast, &mut builder)?;
  let (ctx, codes) = builder.finish();
  debug!("lowered module: {} functions, {} module codes",
    generator.funcs.len(), codes.len());
  Ok(Module { ctx, codes, funcs: generator.funcs })
}

/// A name bound in some scope. A variable's declared type is recoverable
/// from its slot address, whose value type is pointer-to-it.
#[derive(Clone, Debug)]
enum Symbol {
  /// A variable's slot address.
  Var { addr: ValueId },
  /// A function: its normalized front-end type and its module slot.
  Func { ty: ty::Ty, id: FuncId },
}

/// One scope of the symbol tree.
#[derive(Debug)]
struct Scope {
  parent: Option<usize>,
  /// Set on the scope opened for a function body: variable lookup does not
  /// continue past it, because values of an enclosing context cannot be
  /// referenced from another function's arena.
  boundary: bool,
  symbols: HashMap<String, Symbol>,
}

#[derive(Debug)]
struct Scopes {
  arena: Vec<Scope>,
  current: usize,
}

impl Default for Scopes {
  fn default() -> Self {
    Scopes {
      arena: vec![Scope { parent: None, boundary: false, symbols: HashMap::new() }],
      current: 0,
    }
  }
}

impl Scopes {
  fn push(&mut self, boundary: bool) {
    let scope = Scope { parent: Some(self.current), boundary, symbols: HashMap::new() };
    self.arena.push(scope);
    self.current = self.arena.len() - 1;
  }

  fn pop(&mut self) {
    self.current = self.arena[self.current].parent.expect("popping the root scope");
  }

  /// Walk toward the root looking for `name`. Returns the symbol and whether
  /// a function boundary was crossed before finding it.
  fn lookup(&self, name: &str) -> Option<(&Symbol, bool)> {
    let mut crossed = false;
    let mut at = Some(self.current);
    while let Some(i) = at {
      let scope = &self.arena[i];
      if let Some(sym) = scope.symbols.get(name) {
        return Some((sym, crossed))
      }
      crossed |= scope.boundary;
      at = scope.parent;
    }
    None
  }

  fn declare(&mut self, name: &str, sym: Symbol, span: Span) -> Result<()> {
    match self.arena[self.current].symbols.entry(name.to_owned()) {
      Entry::Vacant(e) => { e.insert(sym); Ok(()) }
      Entry::Occupied(_) => Err(Error::Redeclaration {
        name: name.to_owned(),
        msg: "a name may be declared once per scope".into(),
        span,
      }),
    }
  }

  fn declare_at_root(&mut self, name: &str, sym: Symbol) {
    self.arena[0].symbols.insert(name.to_owned(), sym);
  }

  fn root_symbol(&self, name: &str) -> Option<&Symbol> {
    self.arena[0].symbols.get(name)
  }
}

#[derive(Debug, Default)]
struct Generator {
  scopes: Scopes,
  funcs: IdxVec<FuncId, FuncIr>,
  /// The IR return type of the function currently being lowered.
  current_ret: Option<ir::Ty>,
}

impl Generator {
  fn top_level(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    match &node.kind {
      NodeKind::FunctionDeclaration { .. } => self.function_declaration(node, builder),
      NodeKind::DeclarationStatement(_) => self.declaration_statement(node, builder),
      NodeKind::Compound(children) => {
        for child in children {
          match child.kind {
            NodeKind::FunctionDeclaration { .. } | NodeKind::DeclarationStatement(_)
            | NodeKind::VariableDeclaration { .. } => self.top_level(child, builder)?,
            _ => return Err(Error::MalformedDeclarator {
              msg: "a translation unit may only contain declarations".into(),
              span: Some(child.span),
            }),
          }
        }
        Ok(())
      }
      NodeKind::VariableDeclaration { .. } => self.variable_declaration(node, builder),
      _ => Err(Error::MalformedDeclarator {
        msg: "expected a function declaration or a declaration statement".into(),
        span: Some(node.span),
      }),
    }
  }

  /// Generate a node for its value.
  fn rvalue(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<ValueId> {
    match &node.kind {
      NodeKind::Binary { op, lhs, rhs } => {
        let lhs = self.rvalue(lhs, builder)?;
        let rhs = self.rvalue(rhs, builder)?;
        builder.append_binary(*op, lhs, rhs)
      }
      NodeKind::Unary { op: crate::types::Unop::Neg, operand } => {
        let operand = self.rvalue(operand, builder)?;
        builder.append_neg(operand)
      }
      NodeKind::Lit { kind: LitKind::Integer, text } =>
        Ok(builder.constant(text, IrTyKind::int(32))),
      NodeKind::Lit { kind: LitKind::Identifier, .. } => {
        let addr = self.lvalue(node, builder)?;
        builder.append_load(addr)
      }
      NodeKind::Assign { .. } => self.assign(node, builder),
      NodeKind::GetAddress { operand } => self.lvalue(operand, builder),
      NodeKind::Empty => Err(Error::TypeMismatch {
        msg: "expected an expression".into(),
        span: Some(node.span),
      }),
      _ => Err(Error::TypeMismatch {
        msg: "this construct is not an expression".into(),
        span: Some(node.span),
      }),
    }
  }

  /// Generate a node for its address.
  fn lvalue(&mut self, node: &Node, _builder: &mut CodeBuilder) -> Result<ValueId> {
    match &node.kind {
      NodeKind::Lit { kind: LitKind::Identifier, text } => {
        match self.scopes.lookup(text) {
          Some((Symbol::Var { addr }, false)) => Ok(*addr),
          // A variable in an enclosing function's arena, or a function name
          // in value position: not a usable lvalue here.
          _ => Err(Error::UndeclaredIdentifier { name: text.to_string(), span: node.span }),
        }
      }
      _ => Err(Error::TypeMismatch {
        msg: "this construct is not an lvalue".into(),
        span: Some(node.span),
      }),
    }
  }

  /// Generate a node for effect only.
  fn statement(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    match &node.kind {
      NodeKind::Empty => Ok(()),
      NodeKind::Binary { .. } | NodeKind::Unary { .. } | NodeKind::Lit { .. }
      | NodeKind::Assign { .. } | NodeKind::GetAddress { .. } => {
        self.rvalue(node, builder)?;
        Ok(())
      }
      NodeKind::IfElse { .. } => self.if_else(node, builder),
      NodeKind::WhileLoop { .. } => self.while_loop(node, builder),
      NodeKind::DoWhile { .. } => self.do_while(node, builder),
      NodeKind::ForLoop { .. } => self.for_loop(node, builder),
      NodeKind::Compound(children) => {
        self.scopes.push(false);
        let r = children.iter().try_for_each(|c| self.statement(c, builder));
        self.scopes.pop();
        r
      }
      NodeKind::DeclarationStatement(_) => self.declaration_statement(node, builder),
      NodeKind::VariableDeclaration { .. } => self.variable_declaration(node, builder),
      NodeKind::Return { .. } => self.return_statement(node, builder),
      NodeKind::FunctionDeclaration { .. } => Err(Error::MalformedDeclarator {
        msg: "function declarations may not nest inside a body".into(),
        span: Some(node.span),
      }),
    }
  }

  /// Evaluate a condition to `Int(1)`: a non-bool integer is compared
  /// against the constant 0.
  fn condition(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<ValueId> {
    let value = self.rvalue(node, builder)?;
    let ty = builder.ctx().value_ty(value)
      .ok_or_else(|| Error::type_mismatch("a label cannot be a condition"))?
      .clone();
    if *ty == IrTyKind::Int(1) {
      return Ok(value)
    }
    if ty.is_int() {
      let zero = builder.constant("0", ty);
      return builder.append_binary(crate::types::Binop::Ne, value, zero)
    }
    Err(Error::TypeMismatch {
      msg: "a condition must have integer type".into(),
      span: Some(node.span),
    })
  }

  fn assign(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<ValueId> {
    let NodeKind::Assign { target, value } = &node.kind else { unreachable!() };
    if !matches!(target.kind, NodeKind::Lit { kind: LitKind::Identifier, .. }) {
      return Err(Error::TypeMismatch {
        msg: "expected an identifier on the left of an assignment".into(),
        span: Some(target.span),
      })
    }
    let value = self.rvalue(value, builder)?;
    let addr = self.lvalue(target, builder)?;
    builder.append_store(value, addr)?;
    Ok(value)
  }

  fn if_else(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::IfElse { cond, then_stmt, else_stmt } = &node.kind else { unreachable!() };
    let cond = self.condition(cond, builder)?;
    let then_label = builder.label();
    let else_label = builder.label();
    let end_label = builder.label();
    builder.append_condition_branch(cond, then_label, else_label)?;
    builder.append_label(then_label);
    self.statement(then_stmt, builder)?;
    builder.append_goto(end_label);
    builder.append_label(else_label);
    if let Some(els) = else_stmt {
      self.statement(els, builder)?;
    }
    builder.append_goto(end_label);
    builder.append_label(end_label);
    Ok(())
  }

  fn while_loop(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::WhileLoop { cond, body } = &node.kind else { unreachable!() };
    let cond_label = builder.label();
    let body_label = builder.label();
    let end_label = builder.label();
    builder.append_label(cond_label);
    let cond = self.condition(cond, builder)?;
    builder.append_condition_branch(cond, body_label, end_label)?;
    builder.append_label(body_label);
    self.statement(body, builder)?;
    builder.append_goto(cond_label);
    builder.append_label(end_label);
    Ok(())
  }

  fn do_while(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::DoWhile { body, cond } = &node.kind else { unreachable!() };
    let top_label = builder.label();
    let end_label = builder.label();
    builder.append_label(top_label);
    self.statement(body, builder)?;
    let cond = self.condition(cond, builder)?;
    builder.append_condition_branch(cond, top_label, end_label)?;
    builder.append_label(end_label);
    Ok(())
  }

  fn for_loop(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::ForLoop { init, cond, step, body } = &node.kind else { unreachable!() };
    self.statement(init, builder)?;
    let cond_label = builder.label();
    let body_label = builder.label();
    let end_label = builder.label();
    builder.append_label(cond_label);
    let has_cond = !matches!(cond.kind, NodeKind::Empty);
    if has_cond {
      let cond = self.condition(cond, builder)?;
      builder.append_condition_branch(cond, body_label, end_label)?;
      builder.append_label(body_label);
    }
    self.statement(body, builder)?;
    self.statement(step, builder)?;
    builder.append_goto(cond_label);
    if has_cond {
      builder.append_label(end_label);
    }
    Ok(())
  }

  fn return_statement(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::Return { value } = &node.kind else { unreachable!() };
    let ret_ty = self.current_ret.clone().ok_or_else(|| Error::control_flow(
      "return outside of a function body"))?;
    let Some(value) = value else {
      return Err(Error::TypeMismatch {
        msg: "return requires a value".into(),
        span: Some(node.span),
      })
    };
    let value = self.rvalue(value, builder)?;
    match builder.ctx().value_ty(value) {
      Some(ty) if *ty == ret_ty => {}
      _ => return Err(Error::TypeMismatch {
        msg: "returned value does not match the function's return type".into(),
        span: Some(node.span),
      }),
    }
    builder.append_return(value);
    Ok(())
  }

  fn declaration_statement(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::DeclarationStatement(decls) = &node.kind else { unreachable!() };
    for decl in decls {
      match decl.kind {
        NodeKind::VariableDeclaration { .. } => self.variable_declaration(decl, builder)?,
        NodeKind::FunctionDeclaration { .. } => self.function_declaration(decl, builder)?,
        _ => return Err(Error::MalformedDeclarator {
          msg: "a declaration statement may only contain declarations".into(),
          span: Some(decl.span),
        }),
      }
    }
    Ok(())
  }

  fn variable_declaration(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::VariableDeclaration { decl, init } = &node.kind else { unreachable!() };
    let declared = decl.ty.as_ref().ok_or_else(|| Error::MalformedDeclarator {
      msg: format!("declaration of '{}' has no type", decl.name),
      span: Some(decl.span),
    })?;
    let normalized = ty::normalize_variable_declaration(declared)?;
    let ir_ty = ty::to_ir(&normalized)?;
    let size = ty::size_of(&normalized)?;
    let addr = builder.append_alloca(ir_ty, size);
    self.scopes.declare(&decl.name, Symbol::Var { addr }, decl.span)?;
    if let Some(init) = init {
      let value = self.rvalue(init, builder)?;
      builder.append_store(value, addr)?;
    }
    Ok(())
  }

  /// Register a function symbol, tolerating a redeclaration when the types
  /// agree and at most one declaration provides a body. A definition
  /// promotes an earlier prototype in place.
  fn declare_function(&mut self, decl: &Declarator, normalized: &ty::Ty, ir_ty: &ir::Ty)
    -> Result<FuncId>
  {
    match self.scopes.root_symbol(&decl.name) {
      None => {
        let id = self.funcs.push(FuncIr {
          name: decl.name.clone(),
          ty: ir_ty.clone(),
          ctx: FunctionCtx::new(),
          codes: vec![],
          params: vec![],
          has_body: false,
        });
        self.scopes.declare_at_root(&decl.name, Symbol::Func { ty: normalized.clone(), id });
        Ok(id)
      }
      Some(Symbol::Func { ty, id }) => {
        if ty != normalized {
          return Err(Error::Redeclaration {
            name: decl.name.clone(),
            msg: "a function may only be redeclared at the same type".into(),
            span: decl.span,
          })
        }
        Ok(*id)
      }
      Some(Symbol::Var { .. }) => Err(Error::Redeclaration {
        name: decl.name.clone(),
        msg: "the name is already bound to a variable".into(),
        span: decl.span,
      }),
    }
  }

  fn function_declaration(&mut self, node: &Node, builder: &mut CodeBuilder) -> Result<()> {
    let NodeKind::FunctionDeclaration { decl, knr_decls, body } = &node.kind else {
      unreachable!()
    };
    let declared = decl.ty.as_ref().ok_or_else(|| Error::MalformedDeclarator {
      msg: format!("declaration of '{}' has no type", decl.name),
      span: Some(decl.span),
    })?;

    // Reconcile the K&R declaration list, then canonicalize.
    let mut knr: Vec<Declarator> = vec![];
    for stmt in knr_decls {
      let NodeKind::DeclarationStatement(decls) = &stmt.kind else {
        return Err(Error::MalformedDeclarator {
          msg: "expected a declaration statement in a parameter declaration list".into(),
          span: Some(stmt.span),
        })
      };
      for d in decls {
        let NodeKind::VariableDeclaration { decl, .. } = &d.kind else {
          return Err(Error::MalformedDeclarator {
            msg: "expected a parameter declaration".into(),
            span: Some(d.span),
          })
        };
        knr.push(decl.clone());
      }
    }
    let promoted = ty::promote_parameters(declared, &knr)?;
    let normalized = ty::normalize_function_type(&promoted)?;
    let ir_ty = ty::to_ir(&normalized)?;

    let id = self.declare_function(decl, &normalized, &ir_ty)?;
    let Some(body) = body else { return Ok(()) };
    if self.funcs[id].has_body {
      return Err(Error::Redeclaration {
        name: decl.name.clone(),
        msg: "a function may only have one body".into(),
        span: decl.span,
      })
    }

    // Lower the body against a fresh builder. Each parameter is spilled to a
    // stack slot so that parameters participate uniformly in mem2reg.
    let ir::TyKind::Func { ref ret, .. } = *ir_ty else { unreachable!() };
    let ty::TyKind::Func { params: ref front_params, .. } = *normalized else { unreachable!() };
    self.scopes.push(true);
    let saved_ret = self.current_ret.replace(ret.clone());
    let mut body_builder = CodeBuilder::new();
    let result = self.lower_body(front_params, body, &mut body_builder);
    self.current_ret = saved_ret;
    self.scopes.pop();
    let params = result?;
    let (ctx, codes) = body_builder.finish();

    let func = &mut self.funcs[id];
    func.ctx = ctx;
    func.codes = codes;
    func.params = params;
    func.has_body = true;

    let fv = builder.function_value(id, ir_ty);
    builder.append_function(fv);
    Ok(())
  }

  fn lower_body(
    &mut self, params: &[Declarator], body: &Node, builder: &mut CodeBuilder,
  ) -> Result<Vec<ValueId>> {
    let mut values = Vec::with_capacity(params.len());
    for (index, p) in params.iter().enumerate() {
      if p.name.is_empty() {
        return Err(Error::MalformedDeclarator {
          msg: "a parameter of a function definition must be named".into(),
          span: Some(p.span),
        })
      }
      let pty = p.ty.as_ref().expect("normalized parameters are typed");
      let ir_pty = ty::to_ir(pty)?;
      let size = ty::size_of(pty)?;
      let value = builder.parameter(
        u32::try_from(index).expect("parameter count overflow"), ir_pty.clone());
      let addr = builder.append_alloca(ir_pty, size);
      builder.append_store(value, addr)?;
      self.scopes.declare(&p.name, Symbol::Var { addr }, p.span)?;
      values.push(value);
    }
    self.statement(body, builder)?;
    Ok(values)
  }
}
