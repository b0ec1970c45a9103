//! Statement-level typechecking and assignment forms (typecheck.py
//! `typecheck_stmt`), including the `__pack__`/`__unpack__` sum-type
//! interop hooks spec.md §4.7 names.

use crate::types::ast;
use crate::types::entity::{Entity, FuncTc};
use crate::types::ir::{TyKind, Instr, Expr, ExprKind};
use super::{FunctionState, typecheck_instr};
use super::expr::typecheck_expr;
use super::control::{typecheck_if_expr, typecheck_for, typecheck_while, typecheck_break_continue};
use super::pattern::typecheck_pattern_match;
use crate::diag::DiagnosticSink;

/// typecheck.py `typecheck_stmt`: lower one statement to zero or more
/// `Instr`s. Diagnostics are pushed to `sink` as they're produced;
/// malformed statements still emit whatever side-effecting instructions
/// were already typechecked before the error was found (spec.md §7:
/// checking never aborts early), matching the original's "don't drop
/// already-emitted declarations" behavior.
pub fn typecheck_stmt(state: &mut FunctionState, stmt: &ast::Stmt, sink: &mut impl DiagnosticSink) -> Vec<Instr> {
  match stmt {
    ast::Stmt::Pass => Vec::new(),
    ast::Stmt::Expr(e) => {
      match e {
        // `if cond case pat { } else { }` as a statement delegates
        // wholesale to pattern matching.
        ast::Expr::IfCase { scrutinee, pattern, then_block, else_block } =>
          typecheck_pattern_match(state, scrutinee, pattern, then_block, else_block.as_deref().unwrap_or(&[]), sink),
        // Plain `if` as a statement: optional-narrowing accessor
        // override for the true branch (spec.md §4.7).
        ast::Expr::If { cond, then_block, else_block } =>
          typecheck_if_stmt(state, cond, then_block, else_block.as_deref(), sink),
        ast::Expr::For { var, low, high, body } => vec![Instr::IgnoreValue(typecheck_for(state, *var, low, high, body, false, sink))],
        ast::Expr::While { cond, body } => vec![Instr::IgnoreValue(typecheck_while(state, cond, body, false, sink))],
        _ => { let v = typecheck_expr(state, e, sink); vec![Instr::IgnoreValue(v)] }
      }
    }
    ast::Stmt::Return(None) => {
      if !matches!(&*state.retty, TyKind::Void) {
        sink.report(state.error_here("bare return requires a void-returning function"));
      }
      vec![Instr::Return(None)]
    }
    ast::Stmt::Return(Some(e)) => {
      let v = typecheck_expr(state, e, sink);
      let retty = state.retty.clone();
      match typecheck_instr(&retty, v) {
        Some(v) => vec![Instr::Return(Some(v))],
        None => { sink.report(state.error_here("return value does not match the function's declared return type")); vec![Instr::Return(None)] }
      }
    }
    ast::Stmt::Assert(e) => {
      let span = state.current_span();
      let v = typecheck_expr(state, e, sink);
      match typecheck_instr(&crate::types::ir::bool_ty(), v) {
        Some(cond) => vec![Instr::Assert { cond, span }],
        None => { sink.report(state.error_here("assert condition must be bool")); Vec::new() }
      }
    }
    ast::Stmt::Break(v) => typecheck_break_continue(state, true, v.as_ref(), sink),
    ast::Stmt::Continue(v) => typecheck_break_continue(state, false, v.as_ref(), sink),
    ast::Stmt::Assign { lhs, rhs } => typecheck_assign(state, lhs, rhs, sink),
  }
}

fn typecheck_if_stmt(state: &mut FunctionState, cond: &ast::Expr, then_block: &[ast::Stmt], else_block: Option<&[ast::Stmt]>, sink: &mut impl DiagnosticSink) -> Vec<Instr> {
  // typecheck.py: when the raw condition is itself a bare `Option<T>`
  // local, the true branch additionally gets that local's name rebound
  // to its unwrapped value for the branch's duration, and the tested
  // condition becomes `!OptionIsEmpty(cond)`.
  let narrow = if let ast::Expr::Ident(name) = cond {
    state.lookup_local(*name).and_then(|e| if let TyKind::Option(_) = &*e.ty { Some((*name, e)) } else { None })
  } else { None };

  let (cond_v, narrowed_name) = if let Some((name, local_expr)) = narrow {
    let TyKind::Option(_) = &*local_expr.ty else { unreachable!() };
    let ExprKind::LoadLocal(id) = local_expr.kind else { unreachable!() };
    let test = Expr::new(crate::types::ir::bool_ty(), ExprKind::Unary {
      op: crate::types::ir::UnOp::Not,
      expr: Box::new(Expr::new(crate::types::ir::bool_ty(), ExprKind::OptionIsEmpty(Box::new(Expr::new(local_expr.ty.clone(), ExprKind::LoadLocal(id)))))),
    });
    (test, Some((name, id)))
  } else {
    let v = typecheck_expr(state, cond, sink);
    (typecheck_instr(&crate::types::ir::bool_ty(), v).unwrap_or_else(|| { sink.report(state.error_here("if condition must be bool")); Expr::new(crate::types::ir::bool_ty(), ExprKind::LoadBool(false)) }), None)
  };

  state.push_scope();
  if let Some((name, id)) = narrowed_name {
    state.access_locals.last_mut().unwrap().insert(name, id);
  }
  let mut then_instrs = Vec::new();
  for s in then_block { then_instrs.extend(typecheck_stmt(state, s, sink)); }
  state.pop_scope();

  state.push_scope();
  let mut else_instrs = Vec::new();
  if let Some(b) = else_block { for s in b { else_instrs.extend(typecheck_stmt(state, s, sink)); } }
  state.pop_scope();

  vec![Instr::IfElse { cond: cond_v, then_block: then_instrs, else_block: else_instrs }]
}

fn typecheck_assign(state: &mut FunctionState, lhs: &ast::LValue, rhs: &ast::Expr, sink: &mut impl DiagnosticSink) -> Vec<Instr> {
  match lhs {
    ast::LValue::Let { name, implicit } => {
      let v = typecheck_expr(state, rhs, sink);
      if matches!(&*v.ty, TyKind::Void) && matches!(v.kind, ExprKind::Null) {
        sink.report(state.error_here("cannot assign untyped null to a fresh variable without a type declaration"));
        return vec![Instr::IgnoreValue(v)];
      }
      let already = state.scopes.last().unwrap().contains_key(name)
        || (*implicit && state.implicit_locals.last().unwrap().values().any(|n| n == name));
      if already {
        sink.report(state.error_here(format!("redefinition of '{name}'")));
        return vec![Instr::IgnoreValue(v)];
      }
      let ty = v.ty.clone();
      let id = state.declare_local(*name, ty.clone());
      if *implicit { state.implicit_locals.last_mut().unwrap().insert(ty.clone(), *name); }
      vec![Instr::DeclareLocal(crate::types::ir::Local { id, name: *name, ty }), Instr::StoreLocal { local: id, value: v }]
    }
    ast::LValue::Ident(name) => {
      let v = typecheck_expr(state, rhs, sink);
      let Some(id) = state.scopes.last().and_then(|s| s.get(name).copied()) else {
        sink.report(state.error_here(format!("assignment to undeclared local '{name}'")));
        return vec![Instr::IgnoreValue(v)];
      };
      let ty = state.local_ty(id);
      match typecheck_instr(&ty, v) {
        Some(v) => vec![Instr::StoreLocal { local: id, value: v }],
        None => { sink.report(state.error_here("assigned value does not match the local's declared type")); Vec::new() }
      }
    }
    ast::LValue::Tuple(slots) => {
      let v = typecheck_expr(state, rhs, sink);
      let TyKind::Tuple(t) = &*v.ty else {
        sink.report(state.error_here("tuple-destructuring assignment requires a tuple value"));
        return vec![Instr::IgnoreValue(v)];
      };
      if slots.len() != t.positional.len() + t.named.len() {
        sink.report(state.error_here("tuple-destructuring assignment arity mismatch"));
        return vec![Instr::IgnoreValue(v)];
      }
      let tmp = state.new_temp(v.ty.clone());
      let mut out = vec![Instr::StoreLocal { local: tmp, value: v.clone() }];
      let mut named_sorted: Vec<_> = t.named.iter().map(|(n, _)| *n).collect();
      named_sorted.sort_by_key(|n| n.as_str().to_string());
      for (i, slot) in slots.iter().enumerate() {
        let (load, _) = if i < t.positional.len() {
          (ExprKind::LoadTupleIndex { base: Box::new(Expr::new(v.ty.clone(), ExprKind::LoadLocal(tmp))), index: i as u32 }, t.positional[i].clone())
        } else {
          let name = named_sorted[i - t.positional.len()];
          let ty = t.named.iter().find(|(n, _)| *n == name).unwrap().1.clone();
          (ExprKind::LoadMember { base: Box::new(Expr::new(v.ty.clone(), ExprKind::LoadLocal(tmp))), name }, ty)
        };
        out.extend(assign_slot(state, slot, load, sink));
      }
      out
    }
    ast::LValue::Deref(ptr) => {
      let ptr_v = typecheck_expr(state, ptr, sink);
      let TyKind::Pointer(target) = &*ptr_v.ty else {
        let v = typecheck_expr(state, rhs, sink);
        sink.report(state.error_here("dereference assignment requires a pointer"));
        return vec![Instr::IgnoreValue(v)];
      };
      let target = target.clone();
      let src = typecheck_expr(state, rhs, sink);
      let Some(src) = typecheck_instr(&target, src) else {
        sink.report(state.error_here("stored value does not match the pointer's target type"));
        return Vec::new();
      };
      if let Some(pack) = find_pack_fn(state, &target) {
        return vec![Instr::IgnoreValue(Expr::new(crate::types::ir::void_ty(), ExprKind::CallFunction { name: pack, args: vec![src, ptr_v] }))];
      }
      vec![Instr::StoreAtAddress { addr: ptr_v, value: src }]
    }
    ast::LValue::Member(base, field) => {
      // Member-assignment through a plain `LValue::Member` chain lowers
      // by re-reading the base as an expression and storing through a
      // synthesized pointer-free member store; C structs are the only
      // target this spec exposes for direct member assignment.
      let base_load = lvalue_as_expr(state, base, sink);
      let v = typecheck_expr(state, rhs, sink);
      let Some((member_ty, _)) = member_field_type(&base_load.ty, *field) else {
        sink.report(state.error_here(format!("'{}' has no field '{field}'", crate::declare::Describe::describe(&base_load.ty))));
        return vec![Instr::IgnoreValue(v)];
      };
      let Some(v) = typecheck_instr(&member_ty, v) else {
        sink.report(state.error_here("assigned value does not match the field's declared type"));
        return Vec::new();
      };
      vec![Instr::StoreAtAddress { addr: Expr::new(crate::types::ir::intern_ty(TyKind::Pointer(member_ty)), ExprKind::AddressOf(Box::new(Expr::new(base_load.ty.clone(), ExprKind::LoadMember { base: Box::new(base_load), name: *field })))), value: v }]
    }
  }
}

fn assign_slot(state: &mut FunctionState, slot: &ast::LValue, value_kind: ExprKind, sink: &mut impl DiagnosticSink) -> Vec<Instr> {
  // Recreate the synthetic per-slot value as a tiny literal AST node is
  // not available here, so slots are assigned directly against the
  // already-lowered `ExprKind` rather than re-typechecking an AST
  // expression (typecheck.py recurses through `typecheck_stmt` on a
  // synthesized `AssignStmt`; this models the same effect without
  // needing a synthesizable AST node).
  match slot {
    ast::LValue::Let { name, implicit } => {
      let ty = crate::types::ir::uninferred_ty();
      let _ = implicit;
      let id = state.declare_local(*name, ty.clone());
      vec![Instr::StoreLocal { local: id, value: Expr::new(ty, value_kind) }]
    }
    ast::LValue::Ident(name) => {
      if let Some(id) = state.scopes.last().and_then(|s| s.get(name).copied()) {
        let ty = state.local_ty(id);
        vec![Instr::StoreLocal { local: id, value: Expr::new(ty, value_kind) }]
      } else {
        sink.report(state.error_here(format!("assignment to undeclared local '{name}'")));
        Vec::new()
      }
    }
    _ => { sink.report(state.error_here("unsupported nested tuple-destructuring slot")); Vec::new() }
  }
}

fn lvalue_as_expr(state: &mut FunctionState, lv: &ast::LValue, sink: &mut impl DiagnosticSink) -> Expr {
  match lv {
    ast::LValue::Ident(name) => state.lookup_local(*name).unwrap_or_else(|| { sink.report(state.error_here(format!("no symbol '{name}' in scope"))); Expr::new(crate::types::ir::uninferred_ty(), ExprKind::Null) }),
    _ => { sink.report(state.error_here("unsupported assignment target")); Expr::new(crate::types::ir::uninferred_ty(), ExprKind::Null) }
  }
}

pub(super) fn member_field_type(ty: &crate::types::ir::Ty, field: crate::symbol::Symbol) -> Option<(crate::types::ir::Ty, usize)> {
  if let TyKind::CStruct(agg) | TyKind::CUnion(agg) = &**ty {
    let b = agg.0.borrow();
    return b.fields.iter().position(|(n, _)| *n == field).map(|i| (b.fields[i].1.clone(), i));
  }
  None
}

/// Look up `__pack__`/`__unpack__` on the module owning a sum type
/// (typecheck.py: `dereference_pointer`'s and the deref-assignment
/// branch's shared helper). Returns the function name if the owning
/// module declares one taking/returning the right shape.
pub fn find_pack_fn(state: &FunctionState, pointee: &crate::types::ir::Ty) -> Option<crate::symbol::Symbol> {
  let TyKind::Sum(sum) = &**pointee else { return None };
  let owner = sum.0.borrow().module.clone();
  let module = state.modules.get(&owner)?;
  let name = crate::symbol::intern("__pack__");
  if let Some(Entity::Func(sp)) = module.entities.get(&name) {
    if let FuncTc::Typed(_) = &sp.k { return Some(name) }
  }
  None
}

pub fn find_unpack_fn(state: &FunctionState, pointee: &crate::types::ir::Ty) -> Option<crate::symbol::Symbol> {
  let TyKind::Sum(sum) = &**pointee else { return None };
  let owner = sum.0.borrow().module.clone();
  let module = state.modules.get(&owner)?;
  let name = crate::symbol::intern("__unpack__");
  if let Some(Entity::Func(sp)) = module.entities.get(&name) {
    if let FuncTc::Typed(ft) = &sp.k { if ft.ret == *pointee { return Some(name) } }
  }
  None
}
