//! Control-flow-as-expression lowering, shared between statement and
//! expression position (typecheck.py: `if`/`for`/`while`/binary-`else`/
//! `where` branches of `typecheck_expr` and `typecheck_stmt`).

use crate::types::ast;
use crate::types::ir::{Ty, TyKind, Instr, Expr, ExprKind, intern_ty};
use super::{FunctionState, LoopContext, typecheck_instr, unify_types_from_branches};
use super::expr::typecheck_expr;
use super::assign::typecheck_stmt;
use crate::diag::DiagnosticSink;

/// Typecheck a statement list in a fresh scope, rewriting the LAST
/// statement (if it is a bare expression statement) into a store of
/// `dest` instead of an `IgnoreValue`, so a statement block can be used
/// as one arm of a value-producing construct. Returns the lowered
/// instructions and the arm's resulting type (the rewritten trailing
/// expr's type, or `Void` if the block doesn't end in an expression).
pub fn typecheck_value_arm(state: &mut FunctionState, stmts: &[ast::Stmt], sink: &mut impl DiagnosticSink) -> (Vec<Instr>, Ty) {
  state.push_scope();
  let mut out = Vec::new();
  let mut ty = crate::types::ir::void_ty();
  for (i, stmt) in stmts.iter().enumerate() {
    if i + 1 == stmts.len() {
      if let ast::Stmt::Expr(e) = stmt {
        let value = typecheck_expr(state, e, sink);
        ty = value.ty.clone();
        out.push(Instr::IgnoreValue(value));
        continue;
      }
    }
    out.extend(typecheck_stmt(state, stmt, sink));
  }
  state.pop_scope();
  (out, ty)
}

/// Rewrite a value arm's trailing `IgnoreValue` into a `StoreLocal` of
/// `dest`, coercing to `target`. Any earlier instructions are left
/// untouched; a block with no trailing expression (ends in `return`/
/// `break`/`continue`, or is empty) stores nothing — its absence of a
/// store is exactly what leaves the pre-loop/`Null` initialization of
/// `dest` in place.
pub(super) fn store_into(mut instrs: Vec<Instr>, dest: u32, target: &Ty) -> Vec<Instr> {
  if let Some(Instr::IgnoreValue(_)) = instrs.last() {
    let Some(Instr::IgnoreValue(value)) = instrs.pop() else { unreachable!() };
    let value = typecheck_instr(target, value).unwrap_or_else(|| panic!("branch value does not coerce to unified type"));
    instrs.push(Instr::StoreLocal { local: dest, value });
  }
  instrs
}

/// `if cond { .. } else { .. }` in expression position.
pub fn typecheck_if_expr(state: &mut FunctionState, cond: &ast::Expr, then_block: &[ast::Stmt], else_block: Option<&[ast::Stmt]>, sink: &mut impl DiagnosticSink) -> Expr {
  let cond_v = typecheck_expr(state, cond, sink);
  let cond_v = typecheck_instr(&crate::types::ir::bool_ty(), cond_v).unwrap_or_else(|| state.error_here("if condition must be bool").into_expr());

  let (then_instrs, then_ty) = typecheck_value_arm(state, then_block, sink);
  let (else_instrs, else_ty) = match else_block {
    Some(b) => typecheck_value_arm(state, b, sink),
    None => (Vec::new(), crate::types::ir::void_ty()),
  };
  let unified = unify_types_from_branches(&then_ty, &else_ty);
  let dest = state.new_temp(unified.clone());
  let mut prelude = Vec::new();
  if let TyKind::Option(_) = &*unified {
    prelude.push(Instr::StoreLocal { local: dest, value: Expr::new(unified.clone(), ExprKind::Null) });
  }
  let then_instrs = store_into(then_instrs, dest, &unified);
  let else_instrs = store_into(else_instrs, dest, &unified);
  prelude.push(Instr::IfElse { cond: cond_v, then_block: then_instrs, else_block: else_instrs });
  Expr::new(unified.clone(), ExprKind::ExprWithStatements { stmts: prelude, expr: Box::new(Expr::new(unified, ExprKind::LoadLocal(dest))) })
}

/// `expr where { stmts }`.
pub fn typecheck_where(state: &mut FunctionState, stmts: &[ast::Stmt], expr: &ast::Expr, sink: &mut impl DiagnosticSink) -> Expr {
  state.push_scope();
  let mut instrs = Vec::new();
  for s in stmts { instrs.extend(typecheck_stmt(state, s, sink)); }
  let value = typecheck_expr(state, expr, sink);
  state.pop_scope();
  Expr::new(value.ty.clone(), ExprKind::ExprWithStatements { stmts: instrs, expr: Box::new(value) })
}

/// `lhs else rhs` (binary else, spec.md §4.7). `lhs` must be `Option<T>`.
pub fn typecheck_binary_else(state: &mut FunctionState, lhs: &ast::Expr, rhs: &ast::ElseArm, sink: &mut impl DiagnosticSink) -> Expr {
  let lhs_v = typecheck_expr(state, lhs, sink);
  let TyKind::Option(inner) = &*lhs_v.ty else {
    return state.error_here("left-hand side of 'else' must be an option type").into_expr();
  };
  let inner = inner.clone();
  let dest = state.new_temp(inner.clone());
  let opt_local = state.new_temp(lhs_v.ty.clone());
  let rhs_instrs = match rhs {
    ast::ElseArm::Expr(e) => {
      let v = typecheck_expr(state, e, sink);
      let v = typecheck_instr(&inner, v).unwrap_or_else(|| state.error_here("'else' value does not match option's value type").into_expr());
      vec![Instr::StoreLocal { local: dest, value: v }]
    }
    ast::ElseArm::Block(stmts) => {
      let (instrs, ty) = typecheck_value_arm(state, stmts, sink);
      let _ = typecheck_instr(&inner, Expr::new(ty, ExprKind::Null));
      store_into(instrs, dest, &inner)
    }
  };
  let then_block = vec![Instr::StoreLocal {
    local: dest,
    value: Expr::new(inner.clone(), ExprKind::OptionGetValue(Box::new(Expr::new(lhs_v.ty.clone(), ExprKind::LoadLocal(opt_local))))),
  }];
  let prelude = vec![
    Instr::StoreLocal { local: opt_local, value: lhs_v.clone() },
    Instr::IfElse {
      cond: Expr::new(crate::types::ir::bool_ty(), ExprKind::Unary { op: crate::types::ir::UnOp::Not, expr: Box::new(Expr::new(crate::types::ir::bool_ty(), ExprKind::OptionIsEmpty(Box::new(Expr::new(lhs_v.ty, ExprKind::LoadLocal(opt_local)))))) }),
      then_block,
      else_block: rhs_instrs,
    },
  ];
  Expr::new(inner.clone(), ExprKind::ExprWithStatements { stmts: prelude, expr: Box::new(Expr::new(inner, ExprKind::LoadLocal(dest))) })
}

/// `for name in low..high { body }`, in either statement or expression
/// position depending on `is_expression`. Expression-position result
/// type is `Option<T>` if a value-carrying `break` was used, or `Array<T>`
/// if a value-carrying `continue` was used instead (typecheck.py: these
/// are mutually exclusive within one loop).
pub fn typecheck_for(state: &mut FunctionState, var: crate::symbol::Symbol, low: &ast::Expr, high: &ast::Expr, body: &[ast::Stmt], is_expression: bool, sink: &mut impl DiagnosticSink) -> Expr {
  let low_v = typecheck_expr(state, low, sink);
  let high_v = typecheck_expr(state, high, sink);
  let elt_ty = crate::types::ir::int_ty(32, true);
  let low_v = typecheck_instr(&elt_ty, low_v).unwrap_or_else(|| state.error_here("for-loop bounds must be integers").into_expr());
  let high_v = typecheck_instr(&elt_ty, high_v).unwrap_or_else(|| state.error_here("for-loop bounds must be integers").into_expr());

  let enter = state.new_label();
  let reenter = state.new_label();
  let exit = state.new_label();
  state.loops.push(LoopContext { break_label: exit, continue_label: reenter, is_expression, dest_local: None, dest_type: None });

  state.push_scope();
  let loop_var = state.declare_local(var, elt_ty.clone());
  let hi_local = state.new_temp(elt_ty.clone());
  let mut prelude = vec![
    Instr::StoreLocal { local: loop_var, value: low_v },
    Instr::StoreLocal { local: hi_local, value: high_v },
  ];

  let mut body_instrs = vec![Instr::Label(enter)];
  body_instrs.push(Instr::IfElse {
    cond: Expr::new(crate::types::ir::bool_ty(), ExprKind::Binary { op: crate::types::ir::BinOp::Lt, lhs: Box::new(Expr::new(elt_ty.clone(), ExprKind::LoadLocal(loop_var))), rhs: Box::new(Expr::new(elt_ty.clone(), ExprKind::LoadLocal(hi_local))) }),
    then_block: Vec::new(),
    else_block: vec![Instr::Goto(exit)],
  });
  for s in body { body_instrs.extend(typecheck_stmt(state, s, sink)); }
  body_instrs.push(Instr::Label(reenter));
  body_instrs.push(Instr::StoreLocal {
    local: loop_var,
    value: Expr::new(elt_ty.clone(), ExprKind::Binary { op: crate::types::ir::BinOp::Add, lhs: Box::new(Expr::new(elt_ty.clone(), ExprKind::LoadLocal(loop_var))), rhs: Box::new(Expr::new(elt_ty.clone(), ExprKind::LoadInt(1))) }),
  });
  body_instrs.push(Instr::Goto(enter));
  body_instrs.push(Instr::Label(exit));

  let ctx = state.loops.pop().expect("loop context pushed above");
  state.pop_scope();

  finish_loop(state, ctx, &mut prelude, body_instrs, is_expression)
}

/// `while cond { body }`, statement or expression position.
pub fn typecheck_while(state: &mut FunctionState, cond: &ast::Expr, body: &[ast::Stmt], is_expression: bool, sink: &mut impl DiagnosticSink) -> Expr {
  let enter = state.new_label();
  let exit = state.new_label();
  state.loops.push(LoopContext { break_label: exit, continue_label: enter, is_expression, dest_local: None, dest_type: None });

  state.push_scope();
  let mut body_instrs = vec![Instr::Label(enter)];
  let cond_v = typecheck_expr(state, cond, sink);
  let cond_v = typecheck_instr(&crate::types::ir::bool_ty(), cond_v).unwrap_or_else(|| state.error_here("while condition must be bool").into_expr());
  body_instrs.push(Instr::IfElse { cond: cond_v, then_block: Vec::new(), else_block: vec![Instr::Goto(exit)] });
  for s in body { body_instrs.extend(typecheck_stmt(state, s, sink)); }
  body_instrs.push(Instr::Goto(enter));
  body_instrs.push(Instr::Label(exit));

  let ctx = state.loops.pop().expect("loop context pushed above");
  state.pop_scope();

  let mut prelude = Vec::new();
  finish_loop(state, ctx, &mut prelude, body_instrs, is_expression)
}

fn finish_loop(state: &mut FunctionState, ctx: LoopContext, prelude: &mut Vec<Instr>, body_instrs: Vec<Instr>, is_expression: bool) -> Expr {
  if !is_expression {
    prelude.extend(body_instrs);
    return Expr::new(crate::types::ir::void_ty(), ExprKind::ExprWithStatements { stmts: std::mem::take(prelude), expr: Box::new(Expr::new(crate::types::ir::void_ty(), ExprKind::Null)) });
  }
  let Some(elt_ty) = ctx.dest_type.clone() else {
    return state.error_here("loop in expression position must yield a value using break or continue").into_expr();
  };
  let _ = elt_ty;
  let dest = ctx.dest_local.expect("dest_type set implies dest_local set");
  let result_ty = state.local_ty(dest);
  if let TyKind::Option(_) = &*result_ty {
    prelude.push(Instr::StoreLocal { local: dest, value: Expr::new(result_ty.clone(), ExprKind::Null) });
  } else {
    prelude.push(Instr::StoreLocal { local: dest, value: Expr::new(result_ty.clone(), ExprKind::MakeArrayLiteral(Vec::new())) });
  }
  prelude.extend(body_instrs);
  Expr::new(result_ty.clone(), ExprKind::ExprWithStatements { stmts: std::mem::take(prelude), expr: Box::new(Expr::new(result_ty, ExprKind::LoadLocal(dest))) })
}

/// `break [expr]` / `continue [expr]` (shared by statement and
/// expression-position loops). `with_value` is `expr`'s lowered form, if
/// any.
pub fn typecheck_break_continue(state: &mut FunctionState, is_break: bool, value: Option<&ast::Expr>, sink: &mut impl DiagnosticSink) -> Vec<Instr> {
  if state.loops.is_empty() {
    return vec![state_error_instr(state, "break/continue outside of a loop")];
  }
  let ctx_idx = state.loops.len() - 1;
  let (label, is_expression, dest_type) = {
    let ctx = &state.loops[ctx_idx];
    (if is_break { ctx.break_label } else { ctx.continue_label }, ctx.is_expression, ctx.dest_type.clone())
  };
  match (is_expression, value) {
    (false, Some(_)) => return vec![state_error_instr(state, "break/continue with a value is illegal in statement context")],
    (true, None) => return vec![state_error_instr(state, "break/continue without a value is illegal in expression context")],
    _ => {}
  }
  let mut out = Vec::new();
  if let Some(e) = value {
    let v = typecheck_expr(state, e, sink);
    let target_kind = if is_break { TyKind::Option(v.ty.clone()) } else { intern_ty_array(v.ty.clone()) };
    let target = intern_ty(target_kind);
    if let Some(prev) = &dest_type {
      assert!(*prev == target, "mismatched break/continue value types in the same loop: {} vs {}",
        crate::declare::Describe::describe(prev), crate::declare::Describe::describe(&target));
    } else {
      let dest = state.new_temp(target.clone());
      state.loops[ctx_idx].dest_type = Some(target.clone());
      state.loops[ctx_idx].dest_local = Some(dest);
    }
    let dest = state.loops[ctx_idx].dest_local.unwrap();
    if is_break {
      out.push(Instr::StoreLocal { local: dest, value: Expr::new(target.clone(), ExprKind::MakeOptional(Box::new(v))) });
    } else {
      out.push(Instr::StoreLocal { local: dest, value: Expr::new(target.clone(), ExprKind::ArrayAppend { base: Box::new(Expr::new(target, ExprKind::LoadLocal(dest))), value: Box::new(v) }) });
    }
  }
  out.push(Instr::Goto(label));
  out
}

fn intern_ty_array(elt: Ty) -> TyKind { TyKind::ArraySlice(elt) }

fn state_error_instr(state: &FunctionState, message: &str) -> Instr {
  Instr::CompileError(crate::diag::Diagnostic { kind: crate::diag::DiagKind::Type, span: crate::types::span::FileSpan::dummy(state.current.clone()), message: message.into() })
}

impl<'m> FunctionState<'m> {
  pub fn error_here(&self, message: impl Into<String>) -> crate::diag::Diagnostic {
    crate::diag::Diagnostic { kind: crate::diag::DiagKind::Type, span: crate::types::span::FileSpan::dummy(self.current.clone()), message: message.into() }
  }
}

trait IntoExpr { fn into_expr(self) -> Expr; }
impl IntoExpr for crate::diag::Diagnostic {
  fn into_expr(self) -> Expr { Expr::new(crate::types::ir::uninferred_ty(), ExprKind::CompileError(self)) }
}
