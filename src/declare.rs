//! The type declarer (spec.md §4.5): two passes over every module that
//! turn unresolved, textual type expressions into shared [`Ty`] handles.
//!
//! Grounded on `examples/original_source/typecheck/declare.py`
//! (`make_ir_for_asttype`, `declare_module_types`, `resolve_type`,
//! `declare_module_rest_one`, `declare_module_rest`), translated into the
//! teacher's `entity.rs` "forward declared, then typed" idiom: pass 1
//! ([`declare_pass`]) creates every nominal aggregate's placeholder
//! (`Uninit`, in spec.md §9's terms — an empty [`crate::types::ir::SumTypeDef`]
//! or [`crate::types::ir::CAggregateDef`] behind a shared `NominalRef`) so
//! that forward and mutually recursive references resolve to the same
//! handle regardless of declaration order; pass 2 ([`resolve_pass`]) fills
//! in the fields, using those handles.

use std::path::PathBuf;
use std::rc::Rc;
use hashbrown::HashMap;
use itertools::Itertools;
use crate::diag::DiagnosticSink;
use crate::symbol::{Symbol, intern};
use crate::types::ast;
use crate::types::entity::{Entity, TypeTc, TypeTy, FuncTc, FuncTy, GlobalTc, ConstTc, implicit_namespace};
use crate::types::ir::{
  self, Ty, TyKind, CAggregate, CAggregateDef, CEnum, CEnumDef, CFunctionPointerTy,
  SumType, SumTypeDef, ConstructorDef, NominalRef, FunctionTy, intern_ty,
};
use crate::types::span::{FileSpan, Spanned};
use crate::layout::{MachineDesc, make_tuple_ty};

/// `u8/u16/.../int/uint/byte/float/bool/void`: the handful of type names
/// that are resolved without consulting any namespace (declare.py's
/// hardcoded primitive-name table in `resolve_type`).
#[must_use] pub fn primitive_ty(name: &str) -> Option<Ty> {
  Some(match name {
    "u8" => ir::int_ty(8, false), "u16" => ir::int_ty(16, false),
    "u32" => ir::int_ty(32, false), "u64" => ir::int_ty(64, false),
    "i8" => ir::int_ty(8, true), "i16" => ir::int_ty(16, true),
    "i32" => ir::int_ty(32, true), "i64" => ir::int_ty(64, true),
    "int" => ir::int_ty(32, true), "uint" => ir::int_ty(32, false),
    "byte" => ir::int_ty(8, false),
    "float" => intern_ty(TyKind::Float { bits: 32 }),
    "bool" => ir::bool_ty(),
    "void" => ir::void_ty(),
    _ => return None,
  })
}

/// A `u32`-keyed total order over [`TyKind`] discriminants, used to
/// canonicalize union alternatives (spec.md §4.5 "sorting its
/// alternatives"; spec.md §9's Open Question rejects the original's
/// sort-by-printed-representation in favor of an explicit order, since two
/// structurally distinct types can print identically once namespaces are
/// elided — see DESIGN.md).
fn ty_rank(ty: &Ty) -> (u32, String) {
  let tag = match &**ty {
    TyKind::Int { .. } => 0, TyKind::Float { .. } => 1, TyKind::Bool => 2,
    TyKind::Void => 3, TyKind::Exit => 4, TyKind::Pointer(_) => 5,
    TyKind::Option(_) => 6, TyKind::Union(_) => 7, TyKind::Tuple(_) => 8,
    TyKind::ArraySlice(_) => 9, TyKind::Function(_) => 10, TyKind::Rtti => 11,
    TyKind::Padding(_) => 12, TyKind::Uninferred => 13, TyKind::Sum(_) => 14,
    TyKind::CStruct(_) => 15, TyKind::CUnion(_) => 16, TyKind::CEnum(_) => 17,
    TyKind::CTypedef(..) => 18, TyKind::CNamed(_) => 19, TyKind::CArray(..) => 20,
    TyKind::CFunctionPointer(_) => 21,
  };
  (tag, Ty::describe(ty))
}

/// Canonicalize a union's alternatives by the explicit total order above,
/// deduplicating (spec.md §4.5).
#[must_use] pub fn canonicalize_union(alts: Vec<Ty>) -> Ty {
  let alts = alts.into_iter().sorted_by_key(ty_rank).dedup().collect();
  intern_ty(TyKind::Union(alts))
}

/// A pretty-printer for diagnostic messages (spec.md §4.7 supplement),
/// grounded on declare.py/typecheck.py's `describe(irty)`.
pub trait Describe { fn describe(ty: &Ty) -> String; }
impl Describe for Ty {
  fn describe(ty: &Ty) -> String {
    match &**ty {
      TyKind::Uninferred => "uninferred".into(),
      TyKind::Bool => "bool".into(),
      TyKind::Int { bits, signed } => if *signed { format!("i{bits}") } else { format!("u{bits}") },
      TyKind::Void => "void".into(),
      TyKind::Exit => "!".into(),
      TyKind::Float { bits } => (if *bits == 64 { "double" } else { "float" }).into(),
      TyKind::Tuple(t) => {
        let mut parts: Vec<String> = t.positional.iter().map(Ty::describe).collect();
        parts.extend(t.named.iter().map(|(n, ty)| format!("{n}: {}", Ty::describe(ty))));
        format!("({})", parts.join(", "))
      }
      TyKind::Union(alts) => alts.iter().map(Ty::describe).collect::<Vec<_>>().join("|"),
      TyKind::Pointer(t) => format!("{}*", Ty::describe(t)),
      TyKind::Sum(s) => {
        let b = s.0.borrow();
        let ns = b.module.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        format!("{ns}.{}", b.name)
      }
      TyKind::ArraySlice(t) => format!("{}[]", Ty::describe(t)),
      TyKind::Option(t) => format!("{}?", Ty::describe(t)),
      TyKind::Function(f) => {
        let args: Vec<String> = f.args.iter().zip(&f.arg_names).map(|(t, n)| format!("{} {n}", Ty::describe(t))).collect();
        format!("{}({})", Ty::describe(&f.ret), args.join(", "))
      }
      TyKind::CNamed(n) => n.to_string(),
      TyKind::CStruct(a) | TyKind::CUnion(a) => a.0.borrow().name.to_string(),
      TyKind::CEnum(e) => e.0.borrow().name.to_string(),
      TyKind::CTypedef(n, _) => n.to_string(),
      TyKind::CArray(t, n) => format!("{}[{n}]", Ty::describe(t)),
      TyKind::CFunctionPointer(f) => {
        let b = f.0.borrow();
        format!("{} (*)({})", Ty::describe(&b.ret), b.args.iter().map(Ty::describe).collect::<Vec<_>>().join(", "))
      }
      TyKind::Rtti => "rtti".into(),
      TyKind::Padding(w) => format!("pad{w}"),
    }
  }
}

/// Deduplicating cache for C function-pointer types. `TyKind::CFunctionPointer`
/// wraps a [`NominalRef`] (pointer-identity equality), so naively calling
/// `intern_ty` on a freshly built `NominalRef` would never hit the
/// structural cache and would mint a new, distinct type on every
/// occurrence of the same `ty (*)(args)` spelling. This cache
/// pre-deduplicates by structural content before handing a (possibly
/// reused) handle to `intern_ty`.
fn intern_c_fn_ptr(ret: Ty, args: Vec<Ty>, variadic: bool) -> Ty {
  thread_local! {
    static CACHE: std::cell::RefCell<Vec<(Ty, Vec<Ty>, bool, Ty)>> = const { std::cell::RefCell::new(Vec::new()) };
  }
  CACHE.with(|c| {
    let mut c = c.borrow_mut();
    if let Some((.., ty)) = c.iter().find(|(r, a, v, _)| *r == ret && *a == args && *v == variadic) {
      return ty.clone();
    }
    let handle = NominalRef::new(CFunctionPointerTy { ret: ret.clone(), args: args.clone(), variadic });
    let ty = intern_ty(TyKind::CFunctionPointer(handle));
    c.push((ret, args, variadic, ty.clone()));
    ty
  })
}

/// Find a type by name among a set of modules (declare.py `lookup_type`).
/// Sum types must be exported, or `current` must be the defining module;
/// every C-interop kind (struct/union/enum/typedef) is visible regardless.
/// Ambiguous results are a declare-time invariant violation (two types of
/// the same name visible in the same namespace), not a recoverable
/// diagnostic — mirroring declare.py's bare `assert`.
fn lookup_type(modules: &HashMap<Rc<PathBuf>, ir::Module>, filenames: &[Rc<PathBuf>], name: Symbol, current: &Rc<PathBuf>) -> Option<Ty> {
  let mut found: Option<Ty> = None;
  let mut push = |ty: Ty| {
    if let Some(prev) = &found { assert!(*prev == ty, "ambiguous type '{name}'"); }
    found = Some(ty);
  };
  for fname in filenames {
    let Some(m) = modules.get(fname) else { continue };
    for st in &m.sum_types {
      if st.0.borrow().name == name {
        assert!(st.0.borrow().exported || current == fname, "type '{name}' in {fname:?} is not exported");
        push(intern_ty(TyKind::Sum(st.clone())));
      }
    }
    for agg in &m.c_structs {
      if agg.0.borrow().name == name {
        push(intern_ty(if agg.0.borrow().is_union { TyKind::CUnion(agg.clone()) } else { TyKind::CStruct(agg.clone()) }));
      }
    }
    for en in &m.c_enums {
      if en.0.borrow().name == name { push(intern_ty(TyKind::CEnum(en.clone()))); }
    }
    if let Some(Entity::Type(sp)) = m.entities.get(&name) {
      if let TypeTc::Typed(t) = &sp.k {
        if matches!(&*t.ty, TyKind::CTypedef(..)) { push(t.ty.clone()); }
      }
    }
  }
  found
}

/// Resolve a source-language type expression against a module's namespace
/// table (declare.py `resolve_type`). `machine` is needed because tuple
/// types are laid out eagerly at construction time (see
/// [`crate::layout::make_tuple_ty`]), not lazily like the teacher's own
/// type interner.
pub fn resolve_type(
  expr: &ast::TypeExpr,
  modules: &HashMap<Rc<PathBuf>, ir::Module>,
  namespaces: &HashMap<Symbol, Vec<Rc<PathBuf>>>,
  current: &Rc<PathBuf>,
  machine: &MachineDesc,
) -> Ty {
  match expr {
    ast::TypeExpr::Named { namespace, name } => {
      if namespace.is_none() {
        if let Some(p) = primitive_ty(name.as_str()) { return p }
      }
      let ns = namespace.unwrap_or_else(implicit_namespace);
      let filenames = namespaces.get(&ns).unwrap_or_else(|| panic!("unknown namespace '{ns}'"));
      lookup_type(modules, filenames, *name, current).unwrap_or_else(|| panic!("type '{name}' not found in namespace '{ns}'"))
    }
    ast::TypeExpr::Pointer(t) => intern_ty(TyKind::Pointer(resolve_type(t, modules, namespaces, current, machine))),
    ast::TypeExpr::Slice(t) => intern_ty(TyKind::ArraySlice(resolve_type(t, modules, namespaces, current, machine))),
    ast::TypeExpr::Array(t, len_expr) => {
      let n = const_eval_array_len(len_expr);
      intern_ty(TyKind::CArray(resolve_type(t, modules, namespaces, current, machine), n))
    }
    // `T!` has no dedicated IR representation in this spec; it shares
    // Option's runtime shape (a present/absent payload), as declare.py's
    // resolver has no separate failable-type branch either.
    ast::TypeExpr::Option(t) | ast::TypeExpr::Failable(t) =>
      intern_ty(TyKind::Option(resolve_type(t, modules, namespaces, current, machine))),
    ast::TypeExpr::Union(alts) =>
      canonicalize_union(alts.iter().map(|t| resolve_type(t, modules, namespaces, current, machine)).collect()),
    ast::TypeExpr::Tuple(tte) => {
      let positional = tte.positional.iter().map(|t| resolve_type(t, modules, namespaces, current, machine)).collect();
      let named = tte.named.iter().map(|(n, t)| (*n, resolve_type(t, modules, namespaces, current, machine))).collect();
      make_tuple_ty(machine, positional, named)
    }
    ast::TypeExpr::Function { ret, args } => {
      let ret = resolve_type(ret, modules, namespaces, current, machine);
      let mut arg_names = Vec::with_capacity(args.len());
      let args_ty = args.iter().enumerate().map(|(i, (t, name))| {
        arg_names.push(name.unwrap_or_else(|| intern(&format!("_{i}"))));
        resolve_type(t, modules, namespaces, current, machine)
      }).collect();
      intern_ty(TyKind::Function(FunctionTy { ret, args: args_ty, arg_names }))
    }
    ast::TypeExpr::CFunctionPointer { ret, args, variadic } => {
      let ret = resolve_type(ret, modules, namespaces, current, machine);
      let args = args.iter().map(|t| resolve_type(t, modules, namespaces, current, machine)).collect();
      intern_c_fn_ptr(ret, args, *variadic)
    }
  }
}

/// Evaluate the length expression of a fixed-size array type. Declare-time
/// array lengths are restricted to integer literals; anything else is a
/// feature this crate's array-type support does not reach (the source
/// grammar allows an arbitrary expression here, but no example in the
/// retrieval pack exercises a non-literal length).
fn const_eval_array_len(expr: &ast::Expr) -> u64 {
  match expr {
    ast::Expr::Literal(ast::Literal::Int(i)) => u64::try_from(*i).expect("array length must be non-negative"),
    other => panic!("array length must be an integer literal, got {other:?}"),
  }
}

// ---------------------------------------------------------------------
// Pass 1: declare
// ---------------------------------------------------------------------

/// Create every module's shell, with pass-1 placeholders for nominal
/// aggregates and `ForwardDeclared` entities for everything else
/// (declare.py `declare_module_types` run over every module before any
/// module's pass 2 begins, so mutually recursive references across files
/// resolve to the same handle).
#[must_use]
pub fn declare_pass(ast_modules: &[ast::Module]) -> HashMap<Rc<PathBuf>, ir::Module> {
  let mut modules = HashMap::new();
  for m in ast_modules {
    let mut module = ir::Module { filename: Some(m.filename.clone()), ..Default::default() };
    for def in &m.defs {
      declare_def(&m.filename, def, &mut module);
    }
    modules.insert(m.filename.clone(), module);
  }
  modules
}

fn declare_def(filename: &Rc<PathBuf>, def: &ast::Def, module: &mut ir::Module) {
  match def {
    ast::Def::Type(Spanned { span, k: td }) => {
      let sum = SumType::new(SumTypeDef {
        name: td.name, module: filename.clone(), exported: td.exported,
        constructors: Vec::new(), fields_resolved: false, layout: None,
      });
      module.sum_types.push(sum.clone());
      module.entities.insert(td.name, Entity::Type(Spanned::new(span.clone(), TypeTc::ForwardDeclared)));
    }
    ast::Def::CStruct(Spanned { span, k: d }) => declare_caggregate(filename, span, d.name, &d.fields, false, d.opaque, module),
    ast::Def::CUnion(Spanned { span, k: d }) => declare_caggregate(filename, span, d.name, &d.fields, true, d.opaque, module),
    ast::Def::CEnum(Spanned { span, k: d }) => {
      let mut next = 0i64;
      let variants: Vec<(Symbol, i64)> = d.variants.iter().map(|(name, v)| {
        let value = v.unwrap_or(next);
        next = value + 1;
        (*name, value)
      }).collect();
      let en = CEnum::new(CEnumDef { name: d.name, variants });
      module.c_enums.push(en.clone());
      let ty = intern_ty(TyKind::CEnum(en));
      module.entities.insert(d.name, Entity::Type(Spanned::new(span.clone(), TypeTc::Typed(TypeTy { ty }))));
    }
    ast::Def::CTypedef(Spanned { span, k: d }) => {
      module.entities.insert(d.name, Entity::Type(Spanned::new(span.clone(), TypeTc::ForwardDeclared)));
    }
    ast::Def::Function(Spanned { span, k: fd }) => {
      module.entities.insert(fd.name, Entity::Func(Spanned::new(span.clone(), FuncTc::ForwardDeclared)));
    }
    ast::Def::Global(Spanned { span, k: gd }) => {
      module.entities.insert(gd.name, Entity::Global(Spanned::new(span.clone(), GlobalTc::ForwardDeclared)));
    }
    ast::Def::CFunction(Spanned { span, k: cfd }) => {
      module.entities.insert(cfd.name, Entity::Func(Spanned::new(span.clone(), FuncTc::ForwardDeclared)));
    }
    ast::Def::CGlobal(Spanned { span, k: cgd }) => {
      module.entities.insert(cgd.name, Entity::Global(Spanned::new(span.clone(), GlobalTc::ForwardDeclared)));
    }
    ast::Def::CDefine(Spanned { span, k: cdd }) => {
      module.entities.insert(cdd.name, Entity::Const(Spanned::new(span.clone(), ConstTc::ForwardDeclared)));
    }
    // Module header statements and raw `#include` markers carry no type
    // information of their own; the C declarations a header contributes
    // arrive as ordinary `CStruct`/`CFunction`/... defs already flattened
    // into this module's def list by the caller that ran `cheader.rs`.
    ast::Def::Module(_) | ast::Def::CInclude(_) | ast::Def::Import(_) => {}
  }
}

fn declare_caggregate(filename: &Rc<PathBuf>, span: &FileSpan, name: Symbol, fields: &[(ast::TypeExpr, Symbol)], is_union: bool, opaque: bool, module: &mut ir::Module) {
  let agg = CAggregate::new(CAggregateDef {
    name, fields: Vec::new(), fields_resolved: fields.is_empty() && !opaque, layout: None, is_union, opaque,
  });
  module.c_structs.push(agg.clone());
  let ty = intern_ty(if is_union { TyKind::CUnion(agg) } else { TyKind::CStruct(agg) });
  module.entities.insert(name, Entity::Type(Spanned::new(span.clone(), TypeTc::Typed(TypeTy { ty }))));
}

// ---------------------------------------------------------------------
// Pass 2: resolve
// ---------------------------------------------------------------------

/// Build the per-module namespace table (declare.py `declare_module_rest`):
/// `implicit` starts seeded with the module itself; each `import ... in ns`
/// appends the imported module's filename under `ns` (or `implicit` if
/// none given).
fn build_namespaces(m: &ast::Module, filename_of: impl Fn(&std::path::Path) -> Option<Rc<PathBuf>>) -> HashMap<Symbol, Vec<Rc<PathBuf>>> {
  let mut namespaces: HashMap<Symbol, Vec<Rc<PathBuf>>> = HashMap::new();
  namespaces.entry(implicit_namespace()).or_default().push(m.filename.clone());
  for def in &m.defs {
    if let ast::Def::Import(Spanned { k: id, .. }) = def {
      if let Some(target) = filename_of(&id.path) {
        let ns = id.namespace.unwrap_or_else(implicit_namespace);
        namespaces.entry(ns).or_default().push(target);
      }
    }
  }
  namespaces
}

/// Fill in every module's fields (declare.py `declare_module_rest`,
/// `declare_module_rest_one`), given the pass-1 shells from
/// [`declare_pass`]. `filename_of` resolves an `import`'s textual path to
/// one of the module filenames already present in `modules` (path
/// resolution itself — walking the filesystem relative to the importing
/// file — is a driver concern, spec.md §1).
pub fn resolve_pass(
  modules: &mut HashMap<Rc<PathBuf>, ir::Module>,
  ast_modules: &[ast::Module],
  machine: &MachineDesc,
  filename_of: impl Fn(&std::path::Path) -> Option<Rc<PathBuf>>,
  sink: &mut impl DiagnosticSink,
) {
  for m in ast_modules {
    let namespaces = build_namespaces(m, &filename_of);
    for def in &m.defs {
      resolve_def(&m.filename, def, modules, &namespaces, machine, sink);
    }
    let module = modules.get_mut(&m.filename).expect("module declared in pass 1");
    module.namespaces.namespaces = namespaces;
  }
}

fn resolve_def(
  filename: &Rc<PathBuf>,
  def: &ast::Def,
  modules: &mut HashMap<Rc<PathBuf>, ir::Module>,
  namespaces: &HashMap<Symbol, Vec<Rc<PathBuf>>>,
  machine: &MachineDesc,
  sink: &mut impl DiagnosticSink,
) {
  match def {
    ast::Def::Type(Spanned { k: td, .. }) => {
      let sum = find_sum(modules, filename, td.name);
      let mut constructors = Vec::with_capacity(td.constructors.len());
      for (i, ctor) in td.constructors.iter().enumerate() {
        let field_types = ctor.field_types.as_ref().map_or_else(Vec::new, |tys| {
          tys.iter().map(|t| resolve_type(t, modules, namespaces, filename, machine)).collect()
        });
        let field_names = ctor.field_names.as_ref().map_or_else(
          || vec![None; field_types.len()],
          |names| names.iter().map(|n| Some(*n)).collect(),
        );
        let tag_value = ctor.tag_value.as_ref().map_or(i as i64, |e| eval_tag_value(e, i));
        constructors.push(ConstructorDef { name: ctor.name, field_types, field_names, tag_value });
      }
      let mut b = sum.0.borrow_mut();
      b.constructors = constructors;
      b.fields_resolved = true;
      drop(b);
      let ty = intern_ty(TyKind::Sum(sum));
      set_type_entity(modules, filename, td.name, ty);
    }
    ast::Def::CStruct(Spanned { k: d, .. }) => resolve_caggregate(modules, filename, namespaces, machine, d.name, &d.fields),
    ast::Def::CUnion(Spanned { k: d, .. }) => resolve_caggregate(modules, filename, namespaces, machine, d.name, &d.fields),
    ast::Def::CEnum(_) => {} // fully built in pass 1
    ast::Def::CTypedef(Spanned { span, k: d }) => {
      let underlying = resolve_type(&d.ty, modules, namespaces, filename, machine);
      let ty = intern_ty(TyKind::CTypedef(d.name, underlying));
      let module = modules.get_mut(filename).expect("module declared in pass 1");
      module.entities.insert(d.name, Entity::Type(Spanned::new(span.clone(), TypeTc::Typed(TypeTy { ty }))));
    }
    ast::Def::Function(Spanned { span, k: fd }) => {
      // `__unpack__`'s return type must not have its fields reordered by
      // the layout optimizer (declare.py special-cases this by name so
      // the return value's in-memory shape matches the pointee it
      // unpacks), so its return sum type is marked non-reorderable ahead
      // of the later layout pass; see `crate::layout::declare_datatype_layout`.
      let implicit_args = fd.implicit_args.iter().map(|a| (a.name, resolve_type(&a.ty, modules, namespaces, filename, machine))).collect();
      let args = fd.args.iter().map(|a| (a.name, resolve_type(&a.ty, modules, namespaces, filename, machine))).collect();
      let ret = resolve_type(&fd.ret, modules, namespaces, filename, machine);
      let module = modules.get_mut(filename).expect("module declared in pass 1");
      module.entities.insert(fd.name, Entity::Func(Spanned::new(span.clone(), FuncTc::Typed(FuncTy { implicit_args, args, ret }))));
    }
    ast::Def::Global(Spanned { span, k: gd }) => {
      let ty = gd.ty.as_ref().map(|t| resolve_type(t, modules, namespaces, filename, machine));
      let module = modules.get_mut(filename).expect("module declared in pass 1");
      if let Some(ty) = ty {
        module.entities.insert(gd.name, Entity::Global(Spanned::new(span.clone(), GlobalTc::Checked(ty))));
      }
      // An untyped global (`let`-style inference from its initializer) is
      // resolved once its initializer is typechecked; `typeck.rs` installs
      // the entity in that case.
    }
    ast::Def::CFunction(Spanned { span, k: cfd }) => {
      let args: Vec<(Option<Symbol>, Ty)> = cfd.args.iter().map(|(t, n)| (*n, resolve_type(t, modules, namespaces, filename, machine))).collect();
      let ret = resolve_type(&cfd.ret, modules, namespaces, filename, machine);
      let func_ty = FuncTy {
        implicit_args: Vec::new(),
        args: args.iter().map(|(n, t)| (n.unwrap_or_else(|| intern("_")), t.clone())).collect(),
        ret: ret.clone(),
      };
      let module = modules.get_mut(filename).expect("module declared in pass 1");
      module.c_funcs.push(ir::CFuncDecl { name: cfd.name, args, ret, variadic: cfd.variadic });
      module.entities.insert(cfd.name, Entity::Func(Spanned::new(span.clone(), FuncTc::Typed(func_ty))));
    }
    ast::Def::CGlobal(Spanned { span, k: cgd }) => {
      let ty = resolve_type(&cgd.ty, modules, namespaces, filename, machine);
      let module = modules.get_mut(filename).expect("module declared in pass 1");
      module.c_globals.push(ir::CGlobalDecl { name: cgd.name, ty: ty.clone() });
      module.entities.insert(cgd.name, Entity::Global(Spanned::new(span.clone(), GlobalTc::Checked(ty))));
    }
    ast::Def::CDefine(Spanned { span, k: cdd }) => {
      let ty = cdd.guessed_ty.as_ref().map(|t| resolve_type(t, modules, namespaces, filename, machine));
      let module = modules.get_mut(filename).expect("module declared in pass 1");
      module.c_consts.push(ir::CConstDecl { name: cdd.name, ty: ty.clone() });
      module.entities.insert(cdd.name, Entity::Const(Spanned::new(span.clone(), ConstTc::Checked { ty: ty.unwrap_or_else(ir::uninferred_ty) })));
    }
    ast::Def::Module(_) | ast::Def::CInclude(_) | ast::Def::Import(_) => {}
  }
  let _ = sink; // declare-phase structural errors are internal invariant violations (see module docs), not routed through the diagnostic sink.
}

fn eval_tag_value(e: &ast::Expr, declared_index: usize) -> i64 {
  match e {
    ast::Expr::Literal(ast::Literal::Int(i)) => i64::try_from(*i).expect("tag value out of range"),
    // The magic `void` tag (spec.md §4.5 "tagless"): its numeric value is
    // irrelevant since a tagless type is never matched on, so fall back
    // to the declaration index like an unspecified tag.
    ast::Expr::Ident(name) if name.as_str() == "void" => declared_index as i64,
    other => panic!("constructor tag value must be an integer literal or 'void', got {other:?}"),
  }
}

fn find_sum(modules: &HashMap<Rc<PathBuf>, ir::Module>, filename: &Rc<PathBuf>, name: Symbol) -> SumType {
  modules[filename].sum_types.iter().find(|s| s.0.borrow().name == name).cloned()
    .unwrap_or_else(|| unreachable!("sum type '{name}' missing its pass-1 placeholder"))
}

fn find_caggregate(modules: &HashMap<Rc<PathBuf>, ir::Module>, filename: &Rc<PathBuf>, name: Symbol) -> CAggregate {
  modules[filename].c_structs.iter().find(|a| a.0.borrow().name == name).cloned()
    .unwrap_or_else(|| unreachable!("C aggregate '{name}' missing its pass-1 placeholder"))
}

fn resolve_caggregate(
  modules: &mut HashMap<Rc<PathBuf>, ir::Module>,
  filename: &Rc<PathBuf>,
  namespaces: &HashMap<Symbol, Vec<Rc<PathBuf>>>,
  machine: &MachineDesc,
  name: Symbol,
  fields: &[(ast::TypeExpr, Symbol)],
) {
  if fields.is_empty() { return } // opaque or already-empty: nothing to resolve
  let agg = find_caggregate(modules, filename, name);
  let resolved: Vec<(Symbol, Ty)> = fields.iter().map(|(t, n)| (*n, resolve_type(t, modules, namespaces, filename, machine))).collect();
  let mut b = agg.0.borrow_mut();
  b.fields = resolved;
  b.fields_resolved = true;
}

fn set_type_entity(modules: &mut HashMap<Rc<PathBuf>, ir::Module>, filename: &Rc<PathBuf>, name: Symbol, ty: Ty) {
  let module = modules.get_mut(filename).expect("module declared in pass 1");
  let span = module.entities.get(&name).map(Entity::span).cloned().unwrap_or_else(|| FileSpan::dummy(filename.clone()));
  module.entities.insert(name, Entity::Type(Spanned::new(span, TypeTc::Typed(TypeTy { ty }))));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ast::*;
  use crate::types::span::Span;

  fn dummy_span(file: &Rc<PathBuf>) -> FileSpan { FileSpan { file: file.clone(), span: Span { start: 0, end: 0 }, line: 0, column: 0 } }

  fn sp<T>(file: &Rc<PathBuf>, k: T) -> Spanned<T> { Spanned::new(dummy_span(file), k) }

  #[test]
  fn primitive_names_resolve_without_a_namespace() {
    assert_eq!(primitive_ty("u8"), Some(ir::int_ty(8, false)));
    assert_eq!(primitive_ty("int"), Some(ir::int_ty(32, true)));
    assert_eq!(primitive_ty("nope"), None);
  }

  #[test]
  fn declare_then_resolve_a_two_constructor_sum_type() {
    let file = Rc::new(PathBuf::from("m.ce"));
    let td = TypeDef {
      name: intern("Shape"), exported: true,
      constructors: vec![
        Constructor { name: intern("Circle"), field_types: Some(vec![TypeExpr::Named { namespace: None, name: intern("int") }]), field_names: Some(vec![intern("radius")]), tag_value: None },
        Constructor { name: intern("Square"), field_types: Some(vec![TypeExpr::Named { namespace: None, name: intern("int") }]), field_names: Some(vec![intern("side")]), tag_value: None },
      ],
    };
    let module = Module { filename: file.clone(), defs: vec![Def::Type(sp(&file, td))] };
    let mut modules = declare_pass(std::slice::from_ref(&module));
    assert!(matches!(modules[&file].entities.get(&intern("Shape")), Some(Entity::Type(s)) if matches!(s.k, TypeTc::ForwardDeclared)));

    let machine = MachineDesc::lp64();
    let mut sink = crate::diag::CollectingSink::default();
    resolve_pass(&mut modules, std::slice::from_ref(&module), &machine, |_| None, &mut sink);

    let sum = &modules[&file].sum_types[0];
    assert_eq!(sum.0.borrow().constructors.len(), 2);
    assert_eq!(sum.0.borrow().constructors[1].tag_value, 1);
    match modules[&file].entities.get(&intern("Shape")) {
      Some(Entity::Type(s)) => assert!(matches!(s.k, TypeTc::Typed(_))),
      _ => panic!("expected a typed entity"),
    }
  }

  #[test]
  fn union_canonicalization_is_order_independent() {
    let a = canonicalize_union(vec![ir::int_ty(32, true), ir::bool_ty()]);
    let b = canonicalize_union(vec![ir::bool_ty(), ir::int_ty(32, true)]);
    assert_eq!(a, b);
  }

  #[test]
  fn c_function_pointer_types_with_same_shape_are_interned_once() {
    let a = intern_c_fn_ptr(ir::void_ty(), vec![ir::int_ty(32, true)], false);
    let b = intern_c_fn_ptr(ir::void_ty(), vec![ir::int_ty(32, true)], false);
    assert_eq!(a, b);
  }
}
