//! The front end's type grammar and its normalization into canonical form.
//!
//! C declarator syntax permits non-canonical nestings (arrays of functions,
//! missing sizes, identifier-only K&R parameter lists, implicit `int`). The
//! functions here reduce a parsed type tree to a canonical form that the IR
//! generator can consume, or reject it with a typed error.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

use crate::types::Span;
use crate::types::ir::{self, OffsetLimit};
use crate::{Error, Result};

/// The element count of an array whose size was not written.
pub const ELEMENT_COUNT_UNKNOWN: i64 = -1;

/// A front-end type. Compared structurally; parameter names never participate
/// in equality.
pub type Ty = Rc<TyKind>;

/// The front-end type grammar.
#[derive(Debug)]
pub enum TyKind {
  /// A placeholder used by the parser while a declarator is under
  /// construction. Must never reach a normalized output.
  Building,
  /// The `int` type.
  Int,
  /// A pointer type.
  Ptr {
    /// The pointee type.
    aim: Ty,
    /// The decay bound, if any.
    limit: OffsetLimit,
  },
  /// An array type; `count` is [`ELEMENT_COUNT_UNKNOWN`] when the size was
  /// not written.
  Array {
    /// The element type.
    elem: Ty,
    /// The element count, or `-1`.
    count: i64,
  },
  /// A function type. `ret` is `None` for an implicit-`int` return; parameter
  /// declarators may be untyped in a K&R identifier list.
  Func {
    /// The return type, or `None` before implicit-`int` defaulting.
    ret: Option<Ty>,
    /// The parameters, in order.
    params: Vec<Declarator>,
  },
}

impl TyKind {
  /// The default type assigned where C89 implies `int`.
  #[must_use] pub fn default_type() -> Ty { Self::int() }

  /// The `int` type.
  #[must_use] pub fn int() -> Ty { Rc::new(TyKind::Int) }

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
  #[must_use] pub fn func(ret: Option<Ty>, params: Vec<Declarator>) -> Ty {
    Rc::new(TyKind::Func { ret, params })
  }
}

impl PartialEq for TyKind {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (TyKind::Building, TyKind::Building) | (TyKind::Int, TyKind::Int) => true,
      (TyKind::Ptr { aim: a, limit: la }, TyKind::Ptr { aim: b, limit: lb }) =>
        la == lb && a == b,
      (TyKind::Array { elem: a, count: ca }, TyKind::Array { elem: b, count: cb }) =>
        ca == cb && a == b,
      (TyKind::Func { ret: ra, params: pa }, TyKind::Func { ret: rb, params: pb }) =>
        ra == rb && pa == pb,
      _ => false,
    }
  }
}
impl Eq for TyKind {}

/// A declarator: an identifier bound to a type. In parameter position the
/// type may be missing (K&R identifier list) and the name may be empty
/// (abstract declarator in a prototype).
#[derive(Clone, Debug)]
pub struct Declarator {
  /// The declared type, if written.
  pub ty: Option<Ty>,
  /// The declared name; empty for abstract declarators.
  pub name: String,
  /// The source range of the declarator.
  pub span: Span,
}

impl Declarator {
  /// Construct a declarator.
  #[must_use] pub fn new(ty: Option<Ty>, name: impl Into<String>, span: Span) -> Self {
    Declarator { ty, name: name.into(), span }
  }
}

impl PartialEq for Declarator {
  fn eq(&self, other: &Self) -> bool { self.ty == other.ty }
}
impl Eq for Declarator {}

/// Normalize a type appearing in parameter position. Pointers recurse,
/// arrays may keep an unknown size, functions are canonicalized.
pub fn normalize_parameter_declaration(ty: &Ty) -> Result<Ty> {
  match **ty {
    TyKind::Building =>
      Err(Error::invalid_type("placeholder type in a declaration")),
    TyKind::Int => Ok(ty.clone()),
    TyKind::Ptr { ref aim, limit } =>
      Ok(TyKind::ptr_limited(normalize_parameter_declaration(aim)?, limit)),
    TyKind::Array { .. } => normalize_array(ty, false),
    TyKind::Func { .. } => normalize_function_type(ty),
  }
}

/// Normalize a type appearing in variable-declaration position. Identical to
/// parameter position except that the outermost array size must be concrete.
pub fn normalize_variable_declaration(ty: &Ty) -> Result<Ty> {
  if let TyKind::Array { count: ELEMENT_COUNT_UNKNOWN, .. } = **ty {
    return Err(Error::invalid_type(
      "definition of a variable with array type needs an explicit size"))
  }
  normalize_parameter_declaration(ty)
}

fn normalize_array(ty: &Ty, force_count: bool) -> Result<Ty> {
  let TyKind::Array { ref elem, count } = **ty else {
    return Err(Error::internal("normalize_array on a non-array type"))
  };
  if count == ELEMENT_COUNT_UNKNOWN && force_count {
    return Err(Error::invalid_type("size of array not specified"))
  }
  match **elem {
    // inner dimensions must always be sized
    TyKind::Array { .. } => Ok(TyKind::array(normalize_array(elem, true)?, count)),
    TyKind::Func { .. } =>
      Err(Error::invalid_type("element of an array cannot be a function")),
    _ => Ok(TyKind::array(normalize_parameter_declaration(elem)?, count)),
  }
}

/// Normalize a function type: default an implicit-`int` return, reject
/// array/function returns, and decay array and function parameters to
/// pointers (retaining a size-limited pointer when the array extent was
/// written).
pub fn normalize_function_type(ty: &Ty) -> Result<Ty> {
  let TyKind::Func { ref ret, ref params } = **ty else {
    return Err(Error::internal("normalize_function_type on a non-function type"))
  };
  let new_ret = match ret {
    None => TyKind::default_type(),
    Some(r) => match **r {
      TyKind::Array { .. } =>
        return Err(Error::invalid_type("a function cannot return an array")),
      TyKind::Func { .. } =>
        return Err(Error::invalid_type("a function cannot return a function")),
      _ => normalize_parameter_declaration(r)?,
    },
  };
  let mut new_params = Vec::with_capacity(params.len());
  for p in params {
    let Some(pty) = &p.ty else {
      return Err(Error::MalformedDeclarator {
        msg: format!("parameter '{}' has no type", p.name),
        span: Some(p.span),
      })
    };
    let decayed = match **pty {
      TyKind::Func { .. } => TyKind::ptr(normalize_function_type(pty)?),
      TyKind::Array { ref elem, count } => {
        let limit = if count == ELEMENT_COUNT_UNKNOWN {
          OffsetLimit::Unlimited
        } else {
          OffsetLimit::Limited(count.try_into().expect("negative array size"))
        };
        TyKind::ptr_limited(normalize_parameter_declaration(elem)?, limit)
      }
      _ => normalize_parameter_declaration(pty)?,
    };
    new_params.push(Declarator::new(Some(decayed), p.name.clone(), p.span));
  }
  Ok(TyKind::func(Some(new_ret), new_params))
}

/// Reconcile a function type's parameter list with an optional trailing K&R
/// declaration list, producing a fully typed parameter list.
///
/// Rules: the parameter list must be uniformly typed or uniformly untyped; a
/// typed prototype admits no declaration list; every declaration must name a
/// parameter from the list, and may do so at most once; parameters left
/// untyped default to `int`.
pub fn promote_parameters(ty: &Ty, decls: &[Declarator]) -> Result<Ty> {
  let TyKind::Func { ref ret, ref params } = **ty else {
    return Err(Error::internal("promote_parameters on a non-function type"))
  };

  let mut typed: Option<bool> = None;
  for p in params {
    let t = p.ty.is_some();
    match typed {
      Some(prev) if prev != t => return Err(Error::MalformedDeclarator {
        msg: "parameter list mixes typed and untyped parameters".into(),
        span: Some(p.span),
      }),
      _ => typed = Some(t),
    }
  }

  if typed.unwrap_or(false) {
    if let Some(d) = decls.first() {
      return Err(Error::MalformedDeclarator {
        msg: "old-style parameter declarations in a prototyped function definition".into(),
        span: Some(d.span),
      })
    }
    return Ok(ty.clone())
  }

  let mut new_params = params.clone();
  let mut by_name: HashMap<&str, usize> = HashMap::new();
  for (i, p) in params.iter().enumerate() {
    if p.name.is_empty() { continue }
    match by_name.entry(&p.name) {
      Entry::Vacant(e) => { e.insert(i); }
      Entry::Occupied(_) => return Err(Error::MalformedDeclarator {
        msg: format!("redefinition of parameter '{}'", p.name),
        span: Some(p.span),
      }),
    }
  }

  for d in decls {
    let Some(dty) = &d.ty else {
      return Err(Error::MalformedDeclarator {
        msg: "declaration in a parameter declaration list has no type".into(),
        span: Some(d.span),
      })
    };
    if d.name.is_empty() {
      return Err(Error::MalformedDeclarator {
        msg: "declaration does not declare a parameter".into(),
        span: Some(d.span),
      })
    }
    let Some(&i) = by_name.get(&*d.name) else {
      return Err(Error::MalformedDeclarator {
        msg: format!("parameter named '{}' is missing from the parameter list", d.name),
        span: Some(d.span),
      })
    };
    if new_params[i].ty.is_some() {
      return Err(Error::MalformedDeclarator {
        msg: format!("parameter '{}' declared more than once", d.name),
        span: Some(d.span),
      })
    }
    new_params[i].ty = Some(dty.clone());
  }

  for p in &mut new_params {
    if p.ty.is_none() { p.ty = Some(TyKind::default_type()) }
  }
  Ok(TyKind::func(ret.clone(), new_params))
}

/// The size in bytes of a value of this type. Only scalars have a size here.
pub fn size_of(ty: &Ty) -> Result<u32> {
  match **ty {
    TyKind::Int => Ok(4),
    TyKind::Ptr { .. } => Ok(8),
    _ => Err(Error::invalid_type("type has no scalar size")),
  }
}

/// Convert a normalized front-end type to its IR rendering. `int` maps to
/// `Int(32)`; the shape is otherwise preserved.
pub fn to_ir(ty: &Ty) -> Result<ir::Ty> {
  match **ty {
    TyKind::Building =>
      Err(Error::invalid_type("placeholder type reached IR conversion")),
    TyKind::Int => Ok(ir::TyKind::int(32)),
    TyKind::Ptr { ref aim, limit } => Ok(ir::TyKind::ptr_limited(to_ir(aim)?, limit)),
    TyKind::Array { ref elem, count } => Ok(ir::TyKind::array(to_ir(elem)?, count)),
    TyKind::Func { ref ret, ref params } => {
      let ret = ret.as_ref()
        .ok_or_else(|| Error::invalid_type("function type without a return type"))?;
      let mut ps = Vec::with_capacity(params.len());
      for p in params {
        let pty = p.ty.as_ref()
          .ok_or_else(|| Error::invalid_type("untyped parameter reached IR conversion"))?;
        ps.push(to_ir(pty)?);
      }
      Ok(ir::TyKind::func(to_ir(ret)?, ps))
    }
  }
}
