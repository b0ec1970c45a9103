//! Expression lowering and call resolution (typecheck.py `typecheck_expr`
//! and its `resolve_call_target`/`partition_implicit_args` helpers).

use std::rc::Rc;
use crate::symbol::{Symbol, intern};
use crate::types::ast;
use crate::types::entity::FuncTy;
use crate::types::ir::{
  self, Ty, TyKind, Expr, ExprKind, UnOp, BinOp, Local, Body, Function, intern_ty,
  bool_ty, void_ty, uninferred_ty, int_ty,
};
use crate::regex::ast::RegexAst;
use super::{FunctionState, typecheck_instr, unify_types_from_branches};
use super::control;
use super::pattern;
use super::assign::{find_unpack_fn, member_field_type};
use crate::diag::DiagnosticSink;

/// Neither primitive table (declare.rs's `primitive_ty`) nor the C-interop
/// family cover a plain value-level string; this crate represents one as a
/// byte slice, matching how `layout.rs` already treats `ArraySlice` as the
/// one variable-length aggregate the IR knows about.
pub(super) fn string_ty() -> Ty { intern_ty(TyKind::ArraySlice(int_ty(8, false))) }

/// Likewise for a bare `symbol` literal: the interner's id, exposed as an
/// unsigned 32-bit value rather than inventing a dedicated `TyKind` variant
/// for something that is, at the IR level, just an interned small integer.
fn symbol_ty() -> Ty { int_ty(32, false) }

/// Information needed to call a just-synthesized regex matcher function
/// (spec.md §6): its name, its declared return type, and which capture
/// groups it binds by name (for [`pattern`]'s destructuring of the result).
pub struct RegexMatcherInfo {
  pub name: Symbol,
  pub ret: Ty,
  pub group_names: Vec<Symbol>,
}

fn next_regex_fn_id() -> u32 {
  thread_local! { static COUNTER: std::cell::Cell<u32> = const { std::cell::Cell::new(0) }; }
  COUNTER.with(|c| { let v = c.get(); c.set(v + 1); v })
}

/// Compile a regex literal into a standalone matcher function and queue it
/// on `state.pending_regex_fns` (spec.md §3's "generated functions are
/// appended to the module once typechecking completes"). The generated
/// function's body is a single `return` of an `ExprKind::RegexMatch`,
/// which already carries the bool/`Option<Tuple>` shape spec.md §6
/// describes — there's nothing left for the wrapper to do but hand the
/// argument through.
pub fn synth_regex_matcher(state: &mut FunctionState, ast: &RegexAst) -> RegexMatcherInfo {
  let prog = crate::regex::compile::compile(ast);
  let group_count = ast.group_count();
  let mut named = Vec::new();
  ast.named_groups(&mut named);

  let ret = if group_count == 0 {
    bool_ty()
  } else {
    let positional_count = group_count - named.len();
    let positional: Vec<Ty> = (0..positional_count).map(|_| string_ty()).collect();
    let named_fields: Vec<(Symbol, Ty)> = named.iter().map(|n| (*n, string_ty())).collect();
    let tuple = crate::layout::make_tuple_ty(state.machine, positional, named_fields);
    intern_ty(TyKind::Option(tuple))
  };

  let name = intern(&format!("__regex_matcher_{}__", next_regex_fn_id()));
  let input_name = intern("input");
  let input_local = Local { id: 0, name: input_name, ty: string_ty() };
  let body_expr = Expr::new(ret.clone(), ExprKind::RegexMatch {
    program: Rc::new(prog),
    input: Box::new(Expr::new(string_ty(), ExprKind::LoadLocal(0))),
  });
  let func = Function {
    name,
    implicit_args: Vec::new(),
    args: vec![(input_name, string_ty())],
    ret: ret.clone(),
    body: Body { locals: vec![input_local], instrs: vec![ir::Instr::Return(Some(body_expr))] },
  };
  state.pending_regex_fns.push(func);
  RegexMatcherInfo { name, ret, group_names: named }
}

/// typecheck.py `typecheck_expr`: lower one `ast::Expr` node to a typed
/// IR `Expr`, dispatching every control-flow form to [`control`] and every
/// pattern-matching form to [`pattern`].
pub fn typecheck_expr(state: &mut FunctionState, e: &ast::Expr, sink: &mut impl DiagnosticSink) -> Expr {
  match e {
    ast::Expr::Literal(lit) => typecheck_literal(state, lit, sink),
    ast::Expr::Ident(name) => lookup_ident(state, *name).unwrap_or_else(|| {
      sink.report(state.error_here(format!("no symbol named '{name}' in scope")));
      state.error(&state.current_span(), format!("undefined symbol '{name}'"))
    }),
    ast::Expr::NewIdent { name, implicit: _ } => {
      let ty = uninferred_ty();
      let id = state.declare_local(*name, ty.clone());
      Expr::new(ty, ExprKind::LoadLocal(id))
    }
    ast::Expr::Tuple(t) => typecheck_tuple(state, t, sink),
    ast::Expr::Array(elems) => typecheck_array(state, elems, sink),
    ast::Expr::Member { base, name } => {
      let base_v = typecheck_expr(state, base, sink);
      typecheck_member(state, base_v, *name, sink)
    }
    ast::Expr::Index { base, index } => typecheck_index(state, base, index, sink),
    ast::Expr::Call { callee, args, trailing_block } =>
      typecheck_call(state, callee, args, trailing_block.as_deref(), sink),
    ast::Expr::Cast { expr, ty } => typecheck_cast(state, expr, ty, sink),
    ast::Expr::Unary { op, expr } => typecheck_unary(state, *op, expr, sink),
    ast::Expr::Binary { op, lhs, rhs } => typecheck_binary(state, *op, lhs, rhs, sink),
    ast::Expr::BinaryElse { lhs, rhs } => control::typecheck_binary_else(state, lhs, rhs, sink),
    ast::Expr::Where { stmts, expr } => control::typecheck_where(state, stmts, expr, sink),
    ast::Expr::If { cond, then_block, else_block } =>
      control::typecheck_if_expr(state, cond, then_block, else_block.as_deref(), sink),
    ast::Expr::IfCase { scrutinee, pattern: pat, then_block, else_block } =>
      pattern::typecheck_pattern_match_expr(state, scrutinee, pat, then_block, else_block.as_deref(), sink),
    ast::Expr::For { var, low, high, body } => control::typecheck_for(state, *var, low, high, body, true, sink),
    ast::Expr::While { cond, body } => control::typecheck_while(state, cond, body, true, sink),
    ast::Expr::TypeOf(ty) => typecheck_type_of(state, ty),
    ast::Expr::Allocate { ty, count } => typecheck_allocate(state, ty, count.as_deref(), sink),
  }
}

fn typecheck_literal(state: &mut FunctionState, lit: &ast::Literal, sink: &mut impl DiagnosticSink) -> Expr {
  match lit {
    ast::Literal::Int(n) => Expr::new(int_ty(32, true), ExprKind::LoadInt(*n)),
    ast::Literal::Float(f) => Expr::new(intern_ty(TyKind::Float { bits: 64 }), ExprKind::LoadFloat(*f)),
    ast::Literal::Str(s) => Expr::new(string_ty(), ExprKind::LoadString(s.clone().into_boxed_str())),
    ast::Literal::Bool(b) => Expr::new(bool_ty(), ExprKind::LoadBool(*b)),
    ast::Literal::Null => Expr::new(void_ty(), ExprKind::Null),
    ast::Literal::Symbol(s) => Expr::new(symbol_ty(), ExprKind::LoadSymbol(*s)),
    ast::Literal::Regex(ast) => {
      let info = synth_regex_matcher(state, ast);
      let fn_ty = intern_ty(TyKind::Function(ir::FunctionTy {
        ret: info.ret.clone(),
        args: vec![string_ty()],
        arg_names: vec![intern("input")],
      }));
      let _ = sink;
      Expr::new(fn_ty, ExprKind::LoadGlobal(info.name))
    }
  }
}

/// typecheck.py `lookup_variable`: local, then module-level global/
/// C-global, then a bare reference to a function (used as a function
/// pointer value rather than called outright).
fn lookup_ident(state: &mut FunctionState, name: Symbol) -> Option<Expr> {
  if let Some(e) = state.lookup_local(name) { return Some(e) }

  let ns = crate::types::entity::implicit_namespace();
  let mut filenames = state.module().namespaces.namespaces.get(&ns).cloned().unwrap_or_default();
  if !filenames.contains(&state.current) { filenames.push(state.current.clone()); }

  for fname in &filenames {
    let Some(m) = state.modules.get(fname) else { continue };
    if let Some(g) = m.globals.iter().find(|g| g.name == name) {
      return Some(Expr::new(g.ty.clone(), ExprKind::LoadGlobal(name)));
    }
    if let Some(g) = m.c_globals.iter().find(|g| g.name == name) {
      return Some(Expr::new(g.ty.clone(), ExprKind::LoadCGlobal(name)));
    }
  }

  if let Some((_, ft, _)) = super::lookup_function(state.modules, &filenames, name, &state.current) {
    let fn_ty = intern_ty(TyKind::Function(ir::FunctionTy {
      ret: ft.ret.clone(),
      args: ft.args.iter().map(|(_, t)| t.clone()).collect(),
      arg_names: ft.args.iter().map(|(n, _)| *n).collect(),
    }));
    return Some(Expr::new(fn_ty, ExprKind::LoadGlobal(name)));
  }
  None
}

fn typecheck_tuple(state: &mut FunctionState, t: &ast::TupleExpr, sink: &mut impl DiagnosticSink) -> Expr {
  let positional: Vec<Expr> = t.positional.iter().map(|e| typecheck_expr(state, e, sink)).collect();
  let mut named: Vec<(Symbol, Expr)> = t.named.iter().map(|(n, e)| (*n, typecheck_expr(state, e, sink))).collect();
  named.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

  let positional_tys = positional.iter().map(|e| e.ty.clone()).collect();
  let named_tys: Vec<(Symbol, Ty)> = named.iter().map(|(n, e)| (*n, e.ty.clone())).collect();
  let tuple_ty = crate::layout::make_tuple_ty(state.machine, positional_tys, named_tys);

  let mut values = positional;
  values.extend(named.into_iter().map(|(_, e)| e));
  Expr::new(tuple_ty, ExprKind::InitTuple(values))
}

fn typecheck_array(state: &mut FunctionState, elems: &[ast::Expr], sink: &mut impl DiagnosticSink) -> Expr {
  if elems.is_empty() {
    sink.report(state.error_here("empty array literal cannot be typed without an expected type"));
    return Expr::new(intern_ty(TyKind::ArraySlice(uninferred_ty())), ExprKind::MakeArrayLiteral(Vec::new()));
  }
  let mut lowered: Vec<Expr> = elems.iter().map(|e| typecheck_expr(state, e, sink)).collect();
  let elt_ty = lowered[0].ty.clone();
  for v in lowered.iter_mut().skip(1) {
    let coerced = typecheck_instr(&elt_ty, v.clone());
    match coerced {
      Some(c) => *v = c,
      None => sink.report(state.error_here("array literal elements must share a common type")),
    }
  }
  Expr::new(intern_ty(TyKind::ArraySlice(elt_ty)), ExprKind::MakeArrayLiteral(lowered))
}

/// typecheck.py `typecheck_member`/`dereference_pointer`'s member-access
/// branch: C aggregate fields, tuple named slots, sum-type common
/// members, and — for a pointer base — an implicit dereference, routed
/// through `__unpack__` first when the pointee is a sum type (spec.md
/// §4.7's dereferencing rule).
pub(super) fn typecheck_member(state: &mut FunctionState, base: Expr, name: Symbol, sink: &mut impl DiagnosticSink) -> Expr {
  match &*base.ty {
    TyKind::CStruct(_) | TyKind::CUnion(_) => {
      match member_field_type(&base.ty, name) {
        Some((ty, _)) => Expr::new(ty, ExprKind::LoadMember { base: Box::new(base), name }),
        None => {
          sink.report(state.error_here(format!("'{}' has no field '{name}'", crate::declare::Describe::describe(&base.ty))));
          state.error(&state.current_span(), "no such field")
        }
      }
    }
    TyKind::Tuple(t) => {
      match t.named.iter().find(|(n, _)| *n == name) {
        Some((_, ty)) => { let ty = ty.clone(); Expr::new(ty, ExprKind::LoadMember { base: Box::new(base), name }) }
        None => {
          sink.report(state.error_here(format!("tuple has no named field '{name}'")));
          state.error(&state.current_span(), "no such field")
        }
      }
    }
    TyKind::Sum(sum) => {
      let field_ty = {
        let b = sum.0.borrow();
        b.constructors.first().and_then(|c| {
          c.field_names.iter().position(|n| *n == Some(name)).map(|i| c.field_types[i].clone())
        })
      };
      match field_ty {
        Some(ty) => Expr::new(ty, ExprKind::LoadCommonMember { base: Box::new(base), name }),
        None => {
          sink.report(state.error_here(format!("'{}' has no common member '{name}'", crate::declare::Describe::describe(&base.ty))));
          state.error(&state.current_span(), "no such common member")
        }
      }
    }
    TyKind::Pointer(inner) => {
      let inner = inner.clone();
      if_chain::if_chain! {
        if let TyKind::Sum(_) = &*inner;
        if let Some(unpack) = find_unpack_fn(state, &inner);
        then {
          let call = Expr::new(inner.clone(), ExprKind::CallFunction { name: unpack, args: vec![base] });
          return typecheck_member(state, call, name, sink);
        }
      }
      let deref = Expr::new(inner, ExprKind::Deref(Box::new(base)));
      typecheck_member(state, deref, name, sink)
    }
    _ => {
      sink.report(state.error_here(format!("'{}' has no members", crate::declare::Describe::describe(&base.ty))));
      state.error(&state.current_span(), "no such field")
    }
  }
}

fn typecheck_index(state: &mut FunctionState, base: &ast::Expr, index: &ast::Expr, sink: &mut impl DiagnosticSink) -> Expr {
  let base_v = typecheck_expr(state, base, sink);
  let index_v = typecheck_expr(state, index, sink);
  if !matches!(&*index_v.ty, TyKind::Int { .. }) {
    sink.report(state.error_here("array index must be an integer"));
    return state.error(&state.current_span(), "non-integer array index");
  }
  let elt_ty = match &*base_v.ty {
    TyKind::ArraySlice(elt) => elt.clone(),
    TyKind::CArray(elt, _) => elt.clone(),
    _ => {
      sink.report(state.error_here(format!("'{}' cannot be indexed", crate::declare::Describe::describe(&base_v.ty))));
      return state.error(&state.current_span(), "not indexable");
    }
  };
  Expr::new(elt_ty, ExprKind::LoadArrayIndex { base: Box::new(base_v), index: Box::new(index_v) })
}

fn typecheck_cast(state: &mut FunctionState, expr: &ast::Expr, ty: &ast::TypeExpr, sink: &mut impl DiagnosticSink) -> Expr {
  let value = typecheck_expr(state, expr, sink);
  let target = crate::declare::resolve_type(ty, state.modules, &state.module().namespaces.namespaces, &state.current, state.machine);
  Expr::new(target, ExprKind::Cast(Box::new(value)))
}

fn typecheck_unary(state: &mut FunctionState, op: ast::UnaryOp, expr: &ast::Expr, sink: &mut impl DiagnosticSink) -> Expr {
  use ast::UnaryOp::*;
  match op {
    Plus => {
      let v = typecheck_expr(state, expr, sink);
      if !matches!(&*v.ty, TyKind::Int { .. } | TyKind::Float { .. }) {
        sink.report(state.error_here("unary '+' requires a numeric operand"));
      }
      v
    }
    Neg => {
      let v = typecheck_expr(state, expr, sink);
      if !matches!(&*v.ty, TyKind::Int { .. } | TyKind::Float { .. }) {
        sink.report(state.error_here("unary '-' requires a numeric operand"));
        return state.error(&state.current_span(), "non-numeric negation");
      }
      let ty = v.ty.clone();
      Expr::new(ty, ExprKind::Unary { op: UnOp::Neg, expr: Box::new(v) })
    }
    BitNot => {
      let v = typecheck_expr(state, expr, sink);
      if !matches!(&*v.ty, TyKind::Int { .. }) {
        sink.report(state.error_here("'~' requires an integer operand"));
        return state.error(&state.current_span(), "non-integer bitwise-not");
      }
      let ty = v.ty.clone();
      Expr::new(ty, ExprKind::Unary { op: UnOp::BitNot, expr: Box::new(v) })
    }
    Not => {
      let v = typecheck_expr(state, expr, sink);
      let v = typecheck_instr(&bool_ty(), v).unwrap_or_else(|| { sink.report(state.error_here("'not' requires a bool operand")); Expr::new(bool_ty(), ExprKind::LoadBool(false)) });
      Expr::new(bool_ty(), ExprKind::Unary { op: UnOp::Not, expr: Box::new(v) })
    }
    AddrOf => {
      let v = typecheck_expr(state, expr, sink);
      let ty = intern_ty(TyKind::Pointer(v.ty.clone()));
      Expr::new(ty, ExprKind::AddressOf(Box::new(v)))
    }
    Deref => {
      let v = typecheck_expr(state, expr, sink);
      let TyKind::Pointer(inner) = &*v.ty else {
        sink.report(state.error_here("cannot dereference a non-pointer value"));
        return state.error(&state.current_span(), "not a pointer");
      };
      let inner = inner.clone();
      if let TyKind::Sum(_) = &*inner {
        if let Some(unpack) = find_unpack_fn(state, &inner) {
          return Expr::new(inner, ExprKind::CallFunction { name: unpack, args: vec![v] });
        }
      }
      Expr::new(inner, ExprKind::Deref(Box::new(v)))
    }
  }
}

fn to_ir_binop(op: ast::BinaryOp) -> Option<BinOp> {
  use ast::BinaryOp as A;
  Some(match op {
    A::Eq => BinOp::Eq, A::Ne => BinOp::Ne, A::Lt => BinOp::Lt, A::Le => BinOp::Le, A::Gt => BinOp::Gt, A::Ge => BinOp::Ge,
    A::BitOr => BinOp::BitOr, A::BitXor => BinOp::BitXor, A::BitAnd => BinOp::BitAnd,
    A::Shl => BinOp::Shl, A::Shr => BinOp::Shr,
    A::Add => BinOp::Add, A::Sub => BinOp::Sub, A::Mul => BinOp::Mul, A::Div => BinOp::Div, A::Mod => BinOp::Mod,
    A::Or => BinOp::Or, A::And => BinOp::And,
    A::Range | A::Pow => return None,
  })
}

fn typecheck_binary(state: &mut FunctionState, op: ast::BinaryOp, lhs: &ast::Expr, rhs: &ast::Expr, sink: &mut impl DiagnosticSink) -> Expr {
  use ast::BinaryOp::*;
  match op {
    // The IR has no dedicated range type; a standalone `lo..hi` (outside
    // a `for` header, which lowers its bounds directly in control.rs)
    // becomes a plain two-field tuple.
    Range => {
      let l = typecheck_expr(state, lhs, sink);
      let r = typecheck_expr(state, rhs, sink);
      let tys = vec![l.ty.clone(), r.ty.clone()];
      let ty = crate::layout::make_tuple_ty(state.machine, tys, Vec::new());
      Expr::new(ty, ExprKind::InitTuple(vec![l, r]))
    }
    Pow => {
      sink.report(state.error_here("exponentiation is not supported"));
      state.error(&state.current_span(), "unsupported operator")
    }
    Or | And => {
      let l = typecheck_expr(state, lhs, sink);
      let r = typecheck_expr(state, rhs, sink);
      let l = typecheck_instr(&bool_ty(), l).unwrap_or_else(|| { sink.report(state.error_here("operand must be bool")); Expr::new(bool_ty(), ExprKind::LoadBool(false)) });
      let r = typecheck_instr(&bool_ty(), r).unwrap_or_else(|| { sink.report(state.error_here("operand must be bool")); Expr::new(bool_ty(), ExprKind::LoadBool(false)) });
      Expr::new(bool_ty(), ExprKind::Binary { op: to_ir_binop(op).unwrap(), lhs: Box::new(l), rhs: Box::new(r) })
    }
    Eq | Ne | Lt | Le | Gt | Ge => {
      let l = typecheck_expr(state, lhs, sink);
      let r = typecheck_expr(state, rhs, sink);
      match coerce_operands(l, r) {
        Some((l, r, _)) => Expr::new(bool_ty(), ExprKind::Binary { op: to_ir_binop(op).unwrap(), lhs: Box::new(l), rhs: Box::new(r) }),
        None => { sink.report(state.error_here("comparison operands have incompatible types")); state.error(&state.current_span(), "incompatible comparison") }
      }
    }
    BitOr | BitXor | BitAnd => {
      let l = typecheck_expr(state, lhs, sink);
      let r = typecheck_expr(state, rhs, sink);
      match coerce_operands(l, r) {
        Some((l, r, ty)) if matches!(&*ty, TyKind::Int { .. }) =>
          Expr::new(ty.clone(), ExprKind::Binary { op: to_ir_binop(op).unwrap(), lhs: Box::new(l), rhs: Box::new(r) }),
        _ => { sink.report(state.error_here("bitwise operands must be integers of the same type")); state.error(&state.current_span(), "bad bitwise operands") }
      }
    }
    Shl | Shr => {
      let l = typecheck_expr(state, lhs, sink);
      let r = typecheck_expr(state, rhs, sink);
      if !matches!(&*l.ty, TyKind::Int { .. }) || !matches!(&*r.ty, TyKind::Int { .. }) {
        sink.report(state.error_here("shift operands must be integers"));
        return state.error(&state.current_span(), "bad shift operands");
      }
      let ty = l.ty.clone();
      Expr::new(ty, ExprKind::Binary { op: to_ir_binop(op).unwrap(), lhs: Box::new(l), rhs: Box::new(r) })
    }
    Add | Sub | Mul | Div | Mod => {
      let l = typecheck_expr(state, lhs, sink);
      let r = typecheck_expr(state, rhs, sink);
      match coerce_operands(l, r) {
        Some((l, r, ty)) if matches!(&*ty, TyKind::Int { .. } | TyKind::Float { .. }) =>
          Expr::new(ty.clone(), ExprKind::Binary { op: to_ir_binop(op).unwrap(), lhs: Box::new(l), rhs: Box::new(r) }),
        _ => { sink.report(state.error_here("arithmetic operands must be numbers of the same type")); state.error(&state.current_span(), "bad arithmetic operands") }
      }
    }
  }
}

/// Coerce two operands toward a common type, trying each direction
/// (typecheck.py tries the left-to-right coercion, then falls back to
/// right-to-left, before giving up).
fn coerce_operands(l: Expr, r: Expr) -> Option<(Expr, Expr, Ty)> {
  let l_ty = l.ty.clone();
  if let Some(r2) = typecheck_instr(&l_ty, r.clone()) {
    return Some((l, r2, l_ty));
  }
  let r_ty = r.ty.clone();
  if let Some(l2) = typecheck_instr(&r_ty, l) {
    return Some((l2, r, r_ty));
  }
  None
}

fn typecheck_type_of(state: &mut FunctionState, ty: &ast::TypeExpr) -> Expr {
  let resolved = crate::declare::resolve_type(ty, state.modules, &state.module().namespaces.namespaces, &state.current, state.machine);
  let name = intern(&crate::declare::Describe::describe(&resolved));
  Expr::new(intern_ty(TyKind::Rtti), ExprKind::LoadSymbol(name))
}

/// typecheck.py has no dedicated IR node for `allocate`: the IR models
/// memory purely through pointers and explicit loads/stores, so an
/// `allocate T[n]` expression lowers the way any other systems-language
/// heap allocation would at this level — a call to the C allocator sized
/// by the target's layout, cast to the requested pointer type.
fn typecheck_allocate(state: &mut FunctionState, ty: &ast::TypeExpr, count: Option<&ast::Expr>, sink: &mut impl DiagnosticSink) -> Expr {
  let target = crate::declare::resolve_type(ty, state.modules, &state.module().namespaces.namespaces, &state.current, state.machine);
  let (_, elem_size) = crate::layout::layout_of(state.machine, &target);
  let size_ty = int_ty(64, false);
  let count_v = match count {
    Some(c) => {
      let v = typecheck_expr(state, c, sink);
      typecheck_instr(&size_ty, v).unwrap_or_else(|| { sink.report(state.error_here("allocation count must be an integer")); Expr::new(size_ty.clone(), ExprKind::LoadInt(1)) })
    }
    None => Expr::new(size_ty.clone(), ExprKind::LoadInt(1)),
  };
  let size_expr = Expr::new(size_ty.clone(), ExprKind::Binary {
    op: BinOp::Mul,
    lhs: Box::new(count_v),
    rhs: Box::new(Expr::new(size_ty, ExprKind::LoadInt(elem_size as i128))),
  });
  let byte_ptr = intern_ty(TyKind::Pointer(int_ty(8, false)));
  let raw = Expr::new(byte_ptr, ExprKind::CallCFunction { name: intern("malloc"), args: vec![size_expr] });
  Expr::new(intern_ty(TyKind::Pointer(target)), ExprKind::Cast(Box::new(raw)))
}

enum Callee {
  Named { name: Symbol, ft: FuncTy, is_c: bool, variadic: bool },
  Value(Expr),
}

/// typecheck.py `resolve_call_target`: a plain identifier or a
/// `namespace.name` member resolves to a direct function/C-function call;
/// anything else is evaluated as an ordinary expression that must turn
/// out to be function-pointer-typed.
fn resolve_callee(state: &mut FunctionState, callee: &ast::Expr, sink: &mut impl DiagnosticSink) -> Callee {
  let (filenames, name) = match callee {
    ast::Expr::Ident(name) => {
      let ns = crate::types::entity::implicit_namespace();
      let mut filenames = state.module().namespaces.namespaces.get(&ns).cloned().unwrap_or_default();
      if !filenames.contains(&state.current) { filenames.push(state.current.clone()); }
      (filenames, Some(*name))
    }
    ast::Expr::Member { base, name } => {
      if let ast::Expr::Ident(ns_name) = &**base {
        match state.module().namespaces.namespaces.get(ns_name).cloned() {
          Some(files) => (files, Some(*name)),
          None => (Vec::new(), None),
        }
      } else {
        (Vec::new(), None)
      }
    }
    _ => (Vec::new(), None),
  };

  if let Some(name) = name {
    if !filenames.is_empty() {
      if let Some((owner, ft, is_c)) = super::lookup_function(state.modules, &filenames, name, &state.current) {
        let variadic = is_c && state.modules.get(&owner).map(|m| m.c_funcs.iter().any(|c| c.name == name && c.variadic)).unwrap_or(false);
        return Callee::Named { name, ft: ft.clone(), is_c, variadic };
      }
    }
  }
  Callee::Value(typecheck_expr(state, callee, sink))
}

/// typecheck.py `partition_implicit_args`: implicit parameters are
/// satisfied first by a type-matching explicit argument (consumed from
/// the call site), then by whatever's in scope under that type (spec.md
/// §4.7); remaining arguments are checked positionally against the
/// explicit parameter list, with variadic C calls passing any leftovers
/// through unchanged.
fn lower_call_args(
  state: &mut FunctionState,
  implicit_args: &[(Symbol, Ty)],
  explicit_args: &[(Symbol, Ty)],
  given: &[ast::Expr],
  variadic: bool,
  sink: &mut impl DiagnosticSink,
) -> Vec<Expr> {
  let mut lowered: Vec<Option<Expr>> = given.iter().map(|a| Some(typecheck_expr(state, a, sink))).collect();

  let mut implicit_vals = Vec::with_capacity(implicit_args.len());
  for (_, ty) in implicit_args {
    let found = lowered.iter().position(|e| matches!(e, Some(v) if v.ty == *ty));
    if let Some(idx) = found {
      implicit_vals.push(lowered[idx].take().unwrap());
    } else if let Some(name) = state.lookup_implicit(ty) {
      implicit_vals.push(state.lookup_local(name).unwrap_or_else(|| state.error(&state.current_span(), "implicit argument no longer in scope")));
    } else {
      sink.report(state.error_here(format!("no implicit argument of type '{}' is in scope", crate::declare::Describe::describe(ty))));
      implicit_vals.push(state.error(&state.current_span(), "missing implicit argument"));
    }
  }

  let mut remaining: Vec<Expr> = lowered.into_iter().flatten().collect();
  let mut out = implicit_vals;
  let mut idx = 0;
  for (_, ty) in explicit_args {
    if idx < remaining.len() {
      let v = std::mem::replace(&mut remaining[idx], Expr::new(void_ty(), ExprKind::Null));
      match typecheck_instr(ty, v) {
        Some(v) => out.push(v),
        None => { sink.report(state.error_here("argument type does not match the parameter's declared type")); out.push(state.error(&state.current_span(), "bad argument")); }
      }
      idx += 1;
    } else {
      sink.report(state.error_here("too few arguments in call"));
      out.push(state.error(&state.current_span(), "missing argument"));
    }
  }
  if idx < remaining.len() && !variadic {
    sink.report(state.error_here("too many arguments in call"));
  }
  while idx < remaining.len() {
    let v = std::mem::replace(&mut remaining[idx], Expr::new(void_ty(), ExprKind::Null));
    out.push(v);
    idx += 1;
  }
  out
}

fn typecheck_call(
  state: &mut FunctionState,
  callee: &ast::Expr,
  args: &[ast::Expr],
  trailing_block: Option<&[ast::Stmt]>,
  sink: &mut impl DiagnosticSink,
) -> Expr {
  let target = resolve_callee(state, callee, sink);
  let call_expr = match target {
    Callee::Named { name, ft, is_c, variadic } => {
      let lowered = lower_call_args(state, &ft.implicit_args, &ft.args, args, variadic, sink);
      let kind = if is_c { ExprKind::CallCFunction { name, args: lowered } } else { ExprKind::CallFunction { name, args: lowered } };
      Expr::new(ft.ret.clone(), kind)
    }
    Callee::Value(callee_v) => {
      let TyKind::Function(fty) = &*callee_v.ty else {
        sink.report(state.error_here("call target is not callable"));
        return state.error(&state.current_span(), "not callable");
      };
      let fty = fty.clone();
      let lowered = lower_call_args(state, &[], &fty.args.iter().cloned().map(|t| (intern("_"), t)).collect::<Vec<_>>(), args, false, sink);
      Expr::new(fty.ret.clone(), ExprKind::CallFunctionPointer { callee: Box::new(callee_v), args: lowered })
    }
  };

  let Some(block) = trailing_block else { return call_expr };
  state.push_scope();
  let mut stmts = vec![ir::Instr::IgnoreValue(call_expr)];
  let mut result = Expr::new(void_ty(), ExprKind::Null);
  for (i, s) in block.iter().enumerate() {
    if i + 1 == block.len() {
      if let ast::Stmt::Expr(e) = s {
        result = typecheck_expr(state, e, sink);
        continue;
      }
    }
    stmts.extend(super::assign::typecheck_stmt(state, s, sink));
  }
  state.pop_scope();
  let ty = result.ty.clone();
  Expr::new(ty, ExprKind::ExprWithStatements { stmts, expr: Box::new(result) })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::CollectingSink;
  use crate::layout::MachineDesc;
  use std::path::PathBuf;
  use hashbrown::HashMap;
  use im::HashMap as PersistentMap;

  fn empty_state<'m>(modules: &'m mut HashMap<Rc<PathBuf>, ir::Module>, current: Rc<PathBuf>, machine: &'m MachineDesc) -> FunctionState<'m> {
    FunctionState {
      modules, current, machine,
      retty: void_ty(),
      locals: Vec::new(),
      scopes: vec![PersistentMap::new()],
      access_locals: vec![PersistentMap::new()],
      implicit_locals: vec![PersistentMap::new()],
      loops: Vec::new(),
      next_label: 0,
      pending_regex_fns: Vec::new(),
    }
  }

  #[test]
  fn int_literal_defaults_to_i32() {
    let mut modules = HashMap::new();
    let current = Rc::new(PathBuf::from("t.src"));
    modules.insert(current.clone(), ir::Module { filename: Some(current.clone()), ..Default::default() });
    let machine = MachineDesc::lp64();
    let mut state = empty_state(&mut modules, current, &machine);
    let mut sink = CollectingSink::default();
    let v = typecheck_expr(&mut state, &ast::Expr::Literal(ast::Literal::Int(7)), &mut sink);
    assert_eq!(*v.ty, TyKind::Int { bits: 32, signed: true });
    assert!(sink.diagnostics.is_empty());
  }

  #[test]
  fn array_literal_unifies_element_types() {
    let mut modules = HashMap::new();
    let current = Rc::new(PathBuf::from("t.src"));
    modules.insert(current.clone(), ir::Module { filename: Some(current.clone()), ..Default::default() });
    let machine = MachineDesc::lp64();
    let mut state = empty_state(&mut modules, current, &machine);
    let mut sink = CollectingSink::default();
    let arr = ast::Expr::Array(vec![ast::Expr::Literal(ast::Literal::Int(1)), ast::Expr::Literal(ast::Literal::Int(2))]);
    let v = typecheck_expr(&mut state, &arr, &mut sink);
    assert_eq!(*v.ty, TyKind::ArraySlice(int_ty(32, true)));
  }

  #[test]
  fn binary_add_unifies_operand_widths() {
    let mut modules = HashMap::new();
    let current = Rc::new(PathBuf::from("t.src"));
    modules.insert(current.clone(), ir::Module { filename: Some(current.clone()), ..Default::default() });
    let machine = MachineDesc::lp64();
    let mut state = empty_state(&mut modules, current, &machine);
    let mut sink = CollectingSink::default();
    let expr = ast::Expr::Binary {
      op: ast::BinaryOp::Add,
      lhs: Box::new(ast::Expr::Literal(ast::Literal::Int(1))),
      rhs: Box::new(ast::Expr::Literal(ast::Literal::Int(2))),
    };
    let v = typecheck_expr(&mut state, &expr, &mut sink);
    assert_eq!(*v.ty, TyKind::Int { bits: 32, signed: true });
    assert!(sink.diagnostics.is_empty());
  }
}
