//! The lowered IR (spec.md §3 "IR"). Every value-producing node carries a
//! resolved [`Ty`]; [`Ty`] itself is a reference-counted, structurally
//! interned handle so that two structurally equal types share an `Rc` and
//! pointer comparison is a fast equality check — this is the concrete form
//! of the "layout cache keyed by the identity of each aggregate type"
//! mentioned in spec.md §5, and of the Design Notes' "create an
//! `Rc<RefCell<TypeDesc>>`... in pass 1; install fully computed fields in
//! pass 2" guidance for nominal aggregates (sum types and C aggregates).

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use hashbrown::HashMap;
use crate::symbol::Symbol;
use crate::diag::Diagnostic;
use super::span::FileSpan;

/// A handle to a nominal, mutably-installed record (a sum type or C
/// aggregate descriptor). Equality and hashing are by pointer identity,
/// never by content — two distinct declarations with identical shape are
/// still distinct types. This is the "`Uninit`/`Ready`" idiom from
/// spec.md §9: `T` starts as a builder and is frozen exactly once.
#[derive(Debug)]
pub struct NominalRef<T>(pub Rc<RefCell<T>>);

impl<T> NominalRef<T> {
  pub fn new(t: T) -> Self { NominalRef(Rc::new(RefCell::new(t))) }
}
// Written by hand rather than `#[derive(Clone)]`: the derived impl would
// add a spurious `T: Clone` bound even though cloning a handle only bumps
// the `Rc`'s refcount.
impl<T> Clone for NominalRef<T> {
  fn clone(&self) -> Self { NominalRef(self.0.clone()) }
}
impl<T> PartialEq for NominalRef<T> {
  fn eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.0, &other.0) }
}
impl<T> Eq for NominalRef<T> {}
impl<T> Hash for NominalRef<T> {
  fn hash<H: Hasher>(&self, state: &mut H) { (Rc::as_ptr(&self.0) as usize).hash(state) }
}

/// One slot of a (tuple-like) aggregate: either positional (`name: None`)
/// or named.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TupleTy {
  pub positional: Vec<Ty>,
  /// Named slots, canonicalized (sorted by name) per spec.md §4.5.
  pub named: Vec<(Symbol, Ty)>,
  pub layout: Option<Rc<super::layout::AggregateLayout>>,
}

impl TupleTy {
  #[must_use] pub fn new(positional: Vec<Ty>, named: Vec<(Symbol, Ty)>) -> Self {
    TupleTy { positional, named, layout: None }
  }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FunctionTy {
  pub ret: Ty,
  pub args: Vec<Ty>,
  pub arg_names: Vec<Symbol>,
}

/// The typechecking / layout state of a sum type. `Uninit` is produced by
/// [`crate::declare`]'s first pass; [`crate::declare`]'s second pass fills
/// in constructor field types, and [`crate::layout`] finally computes
/// storage order and installs `layout`.
#[derive(Debug)]
pub struct SumTypeDef {
  pub name: Symbol,
  pub module: Rc<std::path::PathBuf>,
  pub exported: bool,
  pub constructors: Vec<ConstructorDef>,
  /// `true` once every constructor's field types are known.
  pub fields_resolved: bool,
  pub layout: Option<super::layout::SumTypeLayout>,
}

#[derive(Clone, Debug)]
pub struct ConstructorDef {
  pub name: Symbol,
  /// As written (spec.md invariant: "constructor field order as written
  /// is preserved in `field_*`").
  pub field_types: Vec<Ty>,
  pub field_names: Vec<Option<Symbol>>,
  /// Resolved from the optional tag-value expression, or the declaration
  /// index if none was given.
  pub tag_value: i64,
}

impl SumTypeDef {
  /// spec.md §4.5: "A type is tagless iff it has no constructors or any
  /// constructor carries the magic tag `void`."
  #[must_use] pub fn is_tagless(&self) -> bool {
    self.constructors.is_empty() || self.constructors.iter().any(|c| c.name.as_str() == "void")
  }
}

pub type SumType = NominalRef<SumTypeDef>;

/// A C struct or union descriptor, in the same `Uninit`/`Ready` shape as
/// [`SumTypeDef`] but without a discriminator tag.
#[derive(Debug)]
pub struct CAggregateDef {
  pub name: Symbol,
  pub fields: Vec<(Symbol, Ty)>,
  pub fields_resolved: bool,
  pub layout: Option<Rc<super::layout::AggregateLayout>>,
  pub is_union: bool,
  /// A forward declaration with no field list (`struct foo;`). Opaque
  /// aggregates are never laid out; only pointers to them are usable.
  pub opaque: bool,
}

pub type CAggregate = NominalRef<CAggregateDef>;

#[derive(Debug)]
pub struct CEnumDef {
  pub name: Symbol,
  pub variants: Vec<(Symbol, i64)>,
}
pub type CEnum = NominalRef<CEnumDef>;

#[derive(Debug)]
pub struct CFunctionPointerTy {
  pub ret: Ty,
  pub args: Vec<Ty>,
  pub variadic: bool,
}

/// The IR type enum (spec.md §3 "IR / Types"). Represented behind
/// [`Ty`] = `Rc<TyKind>`, interned so that `Ty::ptr_eq` is a cheap
/// equality test for the common case of comparing two already-resolved
/// types.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TyKind {
  Int { bits: u32, signed: bool },
  Float { bits: u32 },
  Bool,
  Void,
  /// The type of non-returning control flow (`return`/`break`/`continue`),
  /// so sibling branches terminated by such statements don't constrain
  /// the result type of the branch they sit in (spec.md GLOSSARY).
  Exit,
  Pointer(Ty),
  Option(Ty),
  /// Canonicalized (sorted by an explicit total order, spec.md §9 open
  /// question) set of alternatives.
  Union(Vec<Ty>),
  Tuple(TupleTy),
  ArraySlice(Ty),
  Function(FunctionTy),
  Rtti,
  /// Explicit padding of `width` bytes, inserted by the layout optimizer.
  Padding(u32),
  /// Placeholder before type checking resolves the real type.
  Uninferred,
  Sum(SumType),
  CStruct(CAggregate),
  CUnion(CAggregate),
  CEnum(CEnum),
  CTypedef(Symbol, Ty),
  CNamed(Symbol),
  CArray(Ty, u64),
  CFunctionPointer(NominalRef<CFunctionPointerTy>),
}

impl Eq for CFunctionPointerTy {}
impl PartialEq for CFunctionPointerTy {
  fn eq(&self, other: &Self) -> bool {
    self.ret == other.ret && self.args == other.args && self.variadic == other.variadic
  }
}
impl Hash for CFunctionPointerTy {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.ret.hash(state); self.args.hash(state); self.variadic.hash(state);
  }
}

pub type Ty = Rc<TyKind>;

/// The process-wide, write-once-per-key interning cache (spec.md §5).
/// Thread-local, matching the single-threaded, synchronous execution
/// model spec.md §5 describes.
#[derive(Default)]
pub struct TyInterner {
  cache: HashMap<TyKind, Ty>,
}

thread_local! {
  static TY_INTERNER: RefCell<TyInterner> = RefCell::new(TyInterner::default());
}

/// Intern a `TyKind`, returning a shared `Ty`. Once a key is present it is
/// never mutated or replaced — only ever returned again.
pub fn intern_ty(kind: TyKind) -> Ty {
  TY_INTERNER.with(|cache| {
    match cache.borrow_mut().cache.entry(kind.clone()) {
      Entry::Occupied(e) => e.get().clone(),
      Entry::Vacant(e) => { let ty = Rc::new(kind); e.insert(ty.clone()); ty }
    }
  })
}

pub fn bool_ty() -> Ty { intern_ty(TyKind::Bool) }
pub fn void_ty() -> Ty { intern_ty(TyKind::Void) }
pub fn exit_ty() -> Ty { intern_ty(TyKind::Exit) }
pub fn uninferred_ty() -> Ty { intern_ty(TyKind::Uninferred) }
pub fn int_ty(bits: u32, signed: bool) -> Ty { intern_ty(TyKind::Int { bits, signed }) }

// ---------------------------------------------------------------------
// Instructions and expressions
// ---------------------------------------------------------------------

#[derive(Debug)]
pub struct Local {
  pub id: u32,
  pub name: Symbol,
  pub ty: Ty,
}

#[derive(Clone, Debug)]
pub enum Instr {
  DeclareLocal(Local),
  StoreLocal { local: u32, value: Expr },
  StoreAtAddress { addr: Expr, value: Expr },
  Return(Option<Expr>),
  Assert { cond: Expr, span: FileSpan },
  IgnoreValue(Expr),
  Scope(Vec<Instr>),
  IfElse { cond: Expr, then_block: Vec<Instr>, else_block: Vec<Instr> },
  Goto(LabelId),
  Label(LabelId),
  /// A diagnostic placeholder embedded in the instruction stream
  /// (spec.md §7, §9 "Compile-errors in the IR stream"). Downstream
  /// phases must treat this as a terminating node.
  CompileError(Diagnostic),
}

pub type LabelId = u32;

#[derive(Clone, Debug)]
pub struct Expr {
  pub ty: Ty,
  pub kind: ExprKind,
}

impl Expr {
  #[must_use] pub fn new(ty: Ty, kind: ExprKind) -> Self { Expr { ty, kind } }

  /// spec.md invariant: "Every IR value node has a non-placeholder type
  /// after type checking." A `CompileError` subtree is the one sanctioned
  /// exception — its type is `Uninferred`/`Exit` by construction and
  /// downstream lowering must not look past it.
  pub fn assert_typed(&self) {
    debug_assert!(!matches!(&*self.ty, TyKind::Uninferred) || matches!(self.kind, ExprKind::CompileError(_)),
      "expression left with an uninferred type after checking: {self:?}");
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnOp { Neg, BitNot, Not }

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinOp {
  Add, Sub, Mul, Div, Mod,
  BitAnd, BitOr, BitXor, Shl, Shr,
  Eq, Ne, Lt, Le, Gt, Ge,
  And, Or,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
  LoadInt(i128),
  LoadBool(bool),
  LoadFloat(f64),
  LoadString(Box<str>),
  LoadCString(Box<str>),
  LoadSymbol(Symbol),
  LoadLocal(u32),
  LoadGlobal(Symbol),
  LoadCGlobal(Symbol),
  Null,
  Unary { op: UnOp, expr: Box<Expr> },
  Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
  Cast(Box<Expr>),
  AddressOf(Box<Expr>),
  Deref(Box<Expr>),
  OptionIsEmpty(Box<Expr>),
  OptionGetValue(Box<Expr>),
  /// Construct an instance of a sum type's constructor.
  InitInstance { ty: SumType, ctor: usize, fields: Vec<Expr> },
  InitCInstance { ty: CAggregate, fields: Vec<Expr> },
  InitTuple(Vec<Expr>),
  MakeArrayLiteral(Vec<Expr>),
  MakeArrayFromParts { len: Box<Expr>, ptr: Box<Expr> },
  MakeUnion(Box<Expr>),
  MakeOptional(Box<Expr>),
  MakePointerFromArray(Box<Expr>),
  LoadTupleIndex { base: Box<Expr>, index: u32 },
  LoadArrayIndex { base: Box<Expr>, index: Box<Expr> },
  LoadMember { base: Box<Expr>, name: Symbol },
  /// A field load routed through a specific constructor, used by pattern
  /// deconstruction (spec.md §4.7 "Pattern matching").
  LoadSubMember { base: Box<Expr>, ctor: usize, field: usize },
  LoadTagValue(Box<Expr>),
  /// A "common member" load through the per-sum-type offset table
  /// (spec.md §4.6 "common names").
  LoadCommonMember { base: Box<Expr>, name: Symbol },
  ArrayAppend { base: Box<Expr>, value: Box<Expr> },
  ArrayPop(Box<Expr>),
  CallFunction { name: Symbol, args: Vec<Expr> },
  CallCFunction { name: Symbol, args: Vec<Expr> },
  CallFunctionPointer { callee: Box<Expr>, args: Vec<Expr> },
  /// An expression prefixed by statements (`where`, and the temporaries
  /// control-flow-as-expression lowering introduces).
  ExprWithStatements { stmts: Vec<Instr>, expr: Box<Expr> },
  RegexMatch { program: Rc<crate::regex::compile::RegexProgram>, input: Box<Expr> },
  CompileError(Diagnostic),
}

/// A function body: locals declared up front (spec.md §4.7: "collects
/// local declarations into a buffer emitted at the head of the function
/// body"), followed by the statement stream.
#[derive(Debug, Default)]
pub struct Body {
  pub locals: Vec<Local>,
  pub instrs: Vec<Instr>,
}

#[derive(Debug)]
pub struct Function {
  pub name: Symbol,
  pub implicit_args: Vec<(Symbol, Ty)>,
  pub args: Vec<(Symbol, Ty)>,
  pub ret: Ty,
  pub body: Body,
}

#[derive(Debug)]
pub struct GlobalVar {
  pub name: Symbol,
  pub ty: Ty,
  pub value: Option<Expr>,
}

/// The per-namespace import list a module records (spec.md §3
/// "Namespaces"): for each namespace name, the ordered list of modules
/// contributing symbols under it, named by filename so it agrees with
/// the `Rc<PathBuf>`-keyed module map the driver hands back. `implicit`
/// is pre-seeded with the current module and the built-in modules
/// (spec.md §4.2).
#[derive(Default, Debug)]
pub struct NamespaceTable {
  pub namespaces: HashMap<Symbol, Vec<Rc<std::path::PathBuf>>>,
}

/// An external C function prototype, declared via an imported header and
/// callable through [`super::ir::ExprKind::CallCFunction`].
#[derive(Debug)]
pub struct CFuncDecl {
  pub name: Symbol,
  pub args: Vec<(Option<Symbol>, Ty)>,
  pub ret: Ty,
  pub variadic: bool,
}

/// An external C global variable.
#[derive(Debug)]
pub struct CGlobalDecl {
  pub name: Symbol,
  pub ty: Ty,
}

/// A `#define` constant whose C type was guessed from its literal form;
/// `None` when no literal type could be inferred and the constant is
/// exposed only by name (spec.md's header-parser supplement).
#[derive(Debug)]
pub struct CConstDecl {
  pub name: Symbol,
  pub ty: Option<Ty>,
}

#[derive(Default, Debug)]
pub struct Module {
  pub filename: Option<Rc<std::path::PathBuf>>,
  pub sum_types: Vec<SumType>,
  pub c_structs: Vec<CAggregate>,
  pub c_enums: Vec<CEnum>,
  pub c_funcs: Vec<CFuncDecl>,
  pub c_globals: Vec<CGlobalDecl>,
  pub c_consts: Vec<CConstDecl>,
  pub funcs: Vec<Function>,
  pub globals: Vec<GlobalVar>,
  pub namespaces: NamespaceTable,
  pub entities: HashMap<Symbol, super::entity::Entity>,
}
