//! Pattern-match deconstruction (typecheck.py `typecheck_pattern`), shared
//! between `if cond case pattern { .. } else { .. }` in statement position
//! (`assign.rs`'s dispatch) and in expression position (`expr.rs`'s
//! `IfCase` arm). Matching a pattern against a scrutinee accumulates three
//! things, per spec.md §4.7: boolean conditions to `and` together, locals
//! to declare unconditionally before testing (used only by regex
//! patterns, which must run the matcher once no matter which branch is
//! taken), and name -> value bindings to declare inside the true branch.

use crate::symbol::Symbol;
use crate::types::ast;
use crate::types::ir::{self, TyKind, UnOp, BinOp, Instr, Expr, ExprKind, bool_ty};
use super::{FunctionState, typecheck_instr, unify_types_from_branches};
use super::control::{store_into, typecheck_value_arm};
use super::expr::{typecheck_expr, synth_regex_matcher, string_ty};
use crate::diag::DiagnosticSink;

#[derive(Default)]
struct Decon {
  /// Unconditional setup instructions (a regex pattern's matcher call,
  /// which has to run regardless of whether the match succeeds so its
  /// result can be tested).
  pre: Vec<Instr>,
  /// Conditions to `and` together; empty means "always matches".
  conds: Vec<Expr>,
  /// Bindings introduced by this pattern, installed only in the true
  /// branch.
  binds: Vec<(Symbol, Expr)>,
}

fn conjoin(conds: Vec<Expr>) -> Expr {
  let mut it = conds.into_iter();
  let Some(first) = it.next() else { return Expr::new(bool_ty(), ExprKind::LoadBool(true)) };
  it.fold(first, |acc, c| Expr::new(bool_ty(), ExprKind::Binary { op: BinOp::And, lhs: Box::new(acc), rhs: Box::new(c) }))
}

/// typecheck.py `typecheck_pattern`: recursively match `pattern` against
/// an already-lowered `scrutinee`, accumulating into `out`.
fn deconstruct(state: &mut FunctionState, scrutinee: &Expr, pattern: &ast::Pattern, out: &mut Decon, sink: &mut impl DiagnosticSink) {
  match pattern {
    ast::Pattern::Null => {
      match &*scrutinee.ty {
        TyKind::Option(_) => out.conds.push(Expr::new(bool_ty(), ExprKind::OptionIsEmpty(Box::new(scrutinee.clone())))),
        _ => sink.report(state.error_here("'null' pattern requires an option-typed scrutinee")),
      }
    }
    ast::Pattern::Constructor { namespace: _, name, args } => {
      let TyKind::Sum(sum) = &*scrutinee.ty else {
        sink.report(state.error_here("constructor pattern requires a sum-typed scrutinee"));
        return;
      };
      let ctor_idx = {
        let b = sum.0.borrow();
        b.constructors.iter().position(|c| c.name == *name)
      };
      let Some(ctor_idx) = ctor_idx else {
        sink.report(state.error_here(format!("no constructor named '{name}' on '{}'", crate::declare::Describe::describe(&scrutinee.ty))));
        return;
      };
      let (field_types, field_names) = {
        let b = sum.0.borrow();
        (b.constructors[ctor_idx].field_types.clone(), b.constructors[ctor_idx].field_names.clone())
      };
      let tag_ty = ir::int_ty(32, false);
      let tag = Expr::new(tag_ty.clone(), ExprKind::LoadTagValue(Box::new(scrutinee.clone())));
      let idx_lit = Expr::new(tag_ty, ExprKind::LoadInt(ctor_idx as i128));
      out.conds.push(Expr::new(bool_ty(), ExprKind::Binary { op: BinOp::Eq, lhs: Box::new(tag), rhs: Box::new(idx_lit) }));

      let mut next_positional = 0usize;
      for arg in args {
        let (field_idx, sub_pattern) = match arg {
          ast::PatternArg::Positional(p) => {
            let pos = next_positional;
            next_positional += 1;
            (pos, p)
          }
          ast::PatternArg::Named(fname, p) => {
            let Some(idx) = field_names.iter().position(|n| *n == Some(*fname)) else {
              sink.report(state.error_here(format!("constructor '{name}' has no field '{fname}'")));
              continue;
            };
            (idx, p)
          }
        };
        if field_idx >= field_types.len() {
          sink.report(state.error_here(format!("too many positional fields for constructor '{name}'")));
          continue;
        }
        let field_ty = field_types[field_idx].clone();
        let sub = Expr::new(field_ty, ExprKind::LoadSubMember { base: Box::new(scrutinee.clone()), ctor: ctor_idx, field: field_idx });
        deconstruct(state, &sub, sub_pattern, out, sink);
      }
    }
    ast::Pattern::Tuple(tp) => {
      let TyKind::Tuple(t) = &*scrutinee.ty else {
        sink.report(state.error_here("tuple pattern requires a tuple-typed scrutinee"));
        return;
      };
      let t = t.clone();
      for (i, p) in tp.positional.iter().enumerate() {
        if i >= t.positional.len() {
          sink.report(state.error_here("too many positional slots in tuple pattern"));
          break;
        }
        let sub = Expr::new(t.positional[i].clone(), ExprKind::LoadTupleIndex { base: Box::new(scrutinee.clone()), index: i as u32 });
        deconstruct(state, &sub, p, out, sink);
      }
      for (name, p) in &tp.named {
        let Some((_, ty)) = t.named.iter().find(|(n, _)| n == name) else {
          sink.report(state.error_here(format!("tuple has no named field '{name}'")));
          continue;
        };
        let sub = Expr::new(ty.clone(), ExprKind::LoadMember { base: Box::new(scrutinee.clone()), name: *name });
        deconstruct(state, &sub, p, out, sink);
      }
    }
    ast::Pattern::Let(name) => out.binds.push((*name, scrutinee.clone())),
    ast::Pattern::Ident(name) => {
      match state.lookup_local(*name) {
        Some(bound) => match coerce_for_eq(scrutinee.clone(), bound) {
          Some((l, r)) => out.conds.push(Expr::new(bool_ty(), ExprKind::Binary { op: BinOp::Eq, lhs: Box::new(l), rhs: Box::new(r) })),
          None => sink.report(state.error_here(format!("'{name}' does not match the scrutinee's type"))),
        },
        None => sink.report(state.error_here(format!("'{name}' is not bound; use 'let {name}' to bind a new name"))),
      }
    }
    ast::Pattern::Regex(ast) => deconstruct_regex(state, scrutinee, ast, out, sink),
    ast::Pattern::Expr(e) => {
      let v = typecheck_expr(state, e, sink);
      match coerce_for_eq(scrutinee.clone(), v) {
        Some((l, r)) => out.conds.push(Expr::new(bool_ty(), ExprKind::Binary { op: BinOp::Eq, lhs: Box::new(l), rhs: Box::new(r) })),
        None => sink.report(state.error_here("pattern expression does not match the scrutinee's type")),
      }
    }
  }
}

fn coerce_for_eq(l: Expr, r: Expr) -> Option<(Expr, Expr)> {
  if *l.ty == *r.ty { return Some((l, r)) }
  let l_ty = l.ty.clone();
  if let Some(r2) = typecheck_instr(&l_ty, r.clone()) { return Some((l, r2)) }
  let r_ty = r.ty.clone();
  if let Some(l2) = typecheck_instr(&r_ty, l) { return Some((l2, r)) }
  None
}

/// A regex pattern (spec.md §4.7/§6): compile the matcher, store its
/// result into a temp unconditionally (`pre`), test for a match, and bind
/// every named capture group as a value inside the true branch.
fn deconstruct_regex(state: &mut FunctionState, scrutinee: &Expr, regex_ast: &crate::regex::ast::RegexAst, out: &mut Decon, sink: &mut impl DiagnosticSink) {
  let input = match typecheck_instr(&string_ty(), scrutinee.clone()) {
    Some(v) => v,
    None => {
      sink.report(state.error_here("regex pattern requires a string-typed scrutinee"));
      return;
    }
  };
  let info = synth_regex_matcher(state, regex_ast);
  let call = Expr::new(info.ret.clone(), ExprKind::CallFunction { name: info.name, args: vec![input] });

  if info.group_names.is_empty() {
    if matches!(&*info.ret, TyKind::Bool) {
      out.conds.push(call);
      return;
    }
  }

  let tmp = state.new_temp(info.ret.clone());
  out.pre.push(Instr::StoreLocal { local: tmp, value: call });
  let loaded = Expr::new(info.ret.clone(), ExprKind::LoadLocal(tmp));
  out.conds.push(Expr::new(bool_ty(), ExprKind::Unary {
    op: UnOp::Not,
    expr: Box::new(Expr::new(bool_ty(), ExprKind::OptionIsEmpty(Box::new(loaded.clone())))),
  }));
  let TyKind::Option(tuple_ty) = &*info.ret else { unreachable!("non-empty group list always yields Option<Tuple>") };
  let tuple_ty = tuple_ty.clone();
  let unwrapped = Expr::new(tuple_ty, ExprKind::OptionGetValue(Box::new(loaded)));
  for name in &info.group_names {
    let member = Expr::new(string_ty(), ExprKind::LoadMember { base: Box::new(unwrapped.clone()), name: *name });
    out.binds.push((*name, member));
  }
}

fn declare_binds(state: &mut FunctionState, binds: Vec<(Symbol, Expr)>) -> Vec<Instr> {
  let mut instrs = Vec::new();
  for (name, value) in binds {
    let ty = value.ty.clone();
    let id = state.declare_local(name, ty.clone());
    instrs.push(Instr::DeclareLocal(ir::Local { id, name, ty }));
    instrs.push(Instr::StoreLocal { local: id, value });
  }
  instrs
}

/// Statement-position `if cond case pattern { then } else { else }`
/// (`assign.rs`'s dispatch point).
pub fn typecheck_pattern_match(
  state: &mut FunctionState,
  scrutinee: &ast::Expr,
  pattern: &ast::Pattern,
  then_block: &[ast::Stmt],
  else_block: &[ast::Stmt],
  sink: &mut impl DiagnosticSink,
) -> Vec<Instr> {
  let scrutinee_v = typecheck_expr(state, scrutinee, sink);
  let tmp = state.new_temp(scrutinee_v.ty.clone());
  let mut out = vec![Instr::StoreLocal { local: tmp, value: scrutinee_v.clone() }];
  let loaded = Expr::new(scrutinee_v.ty.clone(), ExprKind::LoadLocal(tmp));

  let mut decon = Decon::default();
  deconstruct(state, &loaded, pattern, &mut decon, sink);
  out.extend(decon.pre);
  let cond = conjoin(decon.conds);

  state.push_scope();
  let mut then_instrs = declare_binds(state, decon.binds);
  for s in then_block { then_instrs.extend(super::assign::typecheck_stmt(state, s, sink)); }
  state.pop_scope();

  state.push_scope();
  let mut else_instrs = Vec::new();
  for s in else_block { else_instrs.extend(super::assign::typecheck_stmt(state, s, sink)); }
  state.pop_scope();

  out.push(Instr::IfElse { cond, then_block: then_instrs, else_block: else_instrs });
  out
}

/// Expression-position `if cond case pattern { then } else { else }`
/// (`expr.rs`'s `IfCase` arm): the same deconstruction, but both arms are
/// value arms unified and stored into a destination temp, exactly as
/// `control::typecheck_if_expr` does for a plain `if`.
pub fn typecheck_pattern_match_expr(
  state: &mut FunctionState,
  scrutinee: &ast::Expr,
  pattern: &ast::Pattern,
  then_block: &[ast::Stmt],
  else_block: Option<&[ast::Stmt]>,
  sink: &mut impl DiagnosticSink,
) -> Expr {
  let scrutinee_v = typecheck_expr(state, scrutinee, sink);
  let tmp = state.new_temp(scrutinee_v.ty.clone());
  let mut prelude = vec![Instr::StoreLocal { local: tmp, value: scrutinee_v.clone() }];
  let loaded = Expr::new(scrutinee_v.ty.clone(), ExprKind::LoadLocal(tmp));

  let mut decon = Decon::default();
  deconstruct(state, &loaded, pattern, &mut decon, sink);
  prelude.extend(decon.pre);
  let cond = conjoin(decon.conds);

  state.push_scope();
  let mut then_pre = declare_binds(state, decon.binds);
  let (then_rest, then_ty) = typecheck_value_arm(state, then_block, sink);
  state.pop_scope();
  then_pre.extend(then_rest);

  state.push_scope();
  let (else_instrs, else_ty) = match else_block {
    Some(b) => typecheck_value_arm(state, b, sink),
    None => (Vec::new(), crate::types::ir::void_ty()),
  };
  state.pop_scope();

  let unified = unify_types_from_branches(&then_ty, &else_ty);
  let dest = state.new_temp(unified.clone());
  if let TyKind::Option(_) = &*unified {
    prelude.push(Instr::StoreLocal { local: dest, value: Expr::new(unified.clone(), ExprKind::Null) });
  }
  let then_instrs = store_into(then_pre, dest, &unified);
  let else_instrs = store_into(else_instrs, dest, &unified);
  prelude.push(Instr::IfElse { cond, then_block: then_instrs, else_block: else_instrs });
  Expr::new(unified.clone(), ExprKind::ExprWithStatements { stmts: prelude, expr: Box::new(Expr::new(unified, ExprKind::LoadLocal(dest))) })
}
