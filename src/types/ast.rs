//! The untyped AST built by the parser (spec.md §3 "AST", §4.2).
//!
//! Nothing here is resolved yet: type names are still bare identifiers
//! (possibly namespace-qualified), and there is no notion of which
//! constructor a pattern refers to. That work happens in [`crate::declare`]
//! and [`crate::typeck`].

use std::path::PathBuf;
use std::rc::Rc;
use smallvec::SmallVec;
use crate::symbol::Symbol;
use crate::regex::ast::RegexAst;
use super::span::{FileSpan, Spanned};

pub type Box_<T> = Box<T>;

#[derive(Debug)]
pub struct Module {
  pub filename: Rc<PathBuf>,
  pub defs: Vec<Def>,
}

// ---------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum TypeExpr {
  /// `Name` or `ns.Name`.
  Named { namespace: Option<Symbol>, name: Symbol },
  Pointer(Box_<TypeExpr>),
  /// `T[]`
  Slice(Box_<TypeExpr>),
  /// `T[n]`
  Array(Box_<TypeExpr>, Box_<Expr>),
  /// `T?`
  Option(Box_<TypeExpr>),
  /// `T!`
  Failable(Box_<TypeExpr>),
  /// `A | B | C`
  Union(Vec<TypeExpr>),
  Tuple(TupleTypeExpr),
  Function { ret: Box_<TypeExpr>, args: Vec<(TypeExpr, Option<Symbol>)> },
  /// `ty (*)(args)` — a raw C function pointer, as opposed to [`TypeExpr::Function`]
  /// which denotes a first-class source-language function value. Produced only
  /// by [`crate::cheader`].
  CFunctionPointer { ret: Box_<TypeExpr>, args: Vec<TypeExpr>, variadic: bool },
}

#[derive(Clone, Debug, Default)]
pub struct TupleTypeExpr {
  pub positional: Vec<TypeExpr>,
  pub named: Vec<(Symbol, TypeExpr)>,
}

// ---------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------

#[derive(Debug)]
pub enum Def {
  Module(Spanned<ModuleDef>),
  Import(Spanned<ImportDef>),
  Type(Spanned<TypeDef>),
  Function(Spanned<FunctionDef>),
  Global(Spanned<GlobalDef>),
  CStruct(Spanned<CStructDef>),
  CUnion(Spanned<CUnionDef>),
  CEnum(Spanned<CEnumDef>),
  CTypedef(Spanned<CTypedefDef>),
  CFunction(Spanned<CFunctionDef>),
  CGlobal(Spanned<CGlobalDef>),
  CDefine(Spanned<CDefineDef>),
  CInclude(Spanned<CIncludeDef>),
}

#[derive(Debug)]
pub struct ModuleDef {
  pub name: Symbol,
  pub exported: bool,
}

#[derive(Debug)]
pub struct ImportDef {
  pub path: PathBuf,
  /// `import x in name` / `import x in implicit`.
  pub namespace: Option<Symbol>,
  pub params: Vec<Expr>,
}

#[derive(Debug)]
pub struct TypeDef {
  pub name: Symbol,
  pub exported: bool,
  pub constructors: Vec<Constructor>,
}

#[derive(Debug)]
pub struct Constructor {
  pub name: Symbol,
  pub field_types: Option<Vec<TypeExpr>>,
  pub field_names: Option<Vec<Symbol>>,
  pub tag_value: Option<Expr>,
}

#[derive(Debug)]
pub struct FunctionDef {
  pub name: Symbol,
  pub exported: bool,
  pub implicit_args: Vec<Arg>,
  pub args: Vec<Arg>,
  pub ret: TypeExpr,
  pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct Arg {
  pub name: Symbol,
  pub ty: TypeExpr,
}

#[derive(Debug)]
pub struct GlobalDef {
  pub name: Symbol,
  pub exported: bool,
  pub ty: Option<TypeExpr>,
  pub value: Option<Expr>,
}

#[derive(Debug)]
pub struct CStructDef {
  pub name: Symbol,
  pub fields: Vec<(TypeExpr, Symbol)>,
  pub opaque: bool,
}

#[derive(Debug)]
pub struct CUnionDef {
  pub name: Symbol,
  pub fields: Vec<(TypeExpr, Symbol)>,
  pub opaque: bool,
}

#[derive(Debug)]
pub struct CEnumDef {
  pub name: Symbol,
  pub variants: Vec<(Symbol, Option<i64>)>,
}

#[derive(Debug)]
pub struct CTypedefDef {
  pub name: Symbol,
  pub ty: TypeExpr,
}

#[derive(Debug)]
pub struct CFunctionDef {
  pub name: Symbol,
  pub args: Vec<(TypeExpr, Option<Symbol>)>,
  pub variadic: bool,
  pub ret: TypeExpr,
}

#[derive(Debug)]
pub struct CGlobalDef {
  pub name: Symbol,
  pub ty: TypeExpr,
}

#[derive(Debug)]
pub struct CDefineDef {
  pub name: Symbol,
  pub guessed_ty: Option<TypeExpr>,
  pub value_tokens: Vec<String>,
}

#[derive(Debug)]
pub struct CIncludeDef {
  pub path: String,
  pub angle_bracket: bool,
}

// ---------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------

#[derive(Debug)]
pub enum Stmt {
  Expr(Expr),
  Assign { lhs: LValue, rhs: Expr },
  Return(Option<Expr>),
  Assert(Expr),
  Break(Option<Expr>),
  Continue(Option<Expr>),
  Pass,
}

/// The left-hand side of an assignment (spec.md §4.7 "Assignment forms").
#[derive(Debug)]
pub enum LValue {
  Ident(Symbol),
  /// `let name = ...` — introduces a new local.
  Let { name: Symbol, implicit: bool },
  /// `(let a, let b) = ...` / `(a, b) = ...`
  Tuple(Vec<LValue>),
  Deref(Box_<Expr>),
  Member(Box_<LValue>, Symbol),
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Literal {
  Int(i128),
  Float(f64),
  Str(String),
  Bool(bool),
  Null,
  Symbol(Symbol),
  Regex(Rc<RegexAst>),
}

#[derive(Debug)]
pub enum Expr {
  Literal(Literal),
  Ident(Symbol),
  /// A `let` binding appearing in expression position, e.g. inside a
  /// pattern or tuple-decomposition target.
  NewIdent { name: Symbol, implicit: bool },
  Tuple(TupleExpr),
  Array(Vec<Expr>),
  Member { base: Box_<Expr>, name: Symbol },
  Index { base: Box_<Expr>, index: Box_<Expr> },
  Call { callee: Box_<Expr>, args: Vec<Expr>, trailing_block: Option<Vec<Stmt>> },
  Cast { expr: Box_<Expr>, ty: TypeExpr },
  Unary { op: UnaryOp, expr: Box_<Expr> },
  Binary { op: BinaryOp, lhs: Box_<Expr>, rhs: Box_<Expr> },
  /// `lhs else rhs_expr_or_block`
  BinaryElse { lhs: Box_<Expr>, rhs: ElseArm },
  /// `expr where { stmts }`
  Where { stmts: Vec<Stmt>, expr: Box_<Expr> },
  If { cond: Box_<Expr>, then_block: Vec<Stmt>, else_block: Option<Vec<Stmt>> },
  /// `if cond case pat { ... } else { ... }`
  IfCase { scrutinee: Box_<Expr>, pattern: Pattern, then_block: Vec<Stmt>, else_block: Option<Vec<Stmt>> },
  For { var: Symbol, low: Box_<Expr>, high: Box_<Expr>, body: Vec<Stmt> },
  While { cond: Box_<Expr>, body: Vec<Stmt> },
  TypeOf(Box_<TypeExpr>),
  Allocate { ty: TypeExpr, count: Option<Box_<Expr>> },
}

#[derive(Debug)]
pub enum ElseArm {
  Expr(Box_<Expr>),
  Block(Vec<Stmt>),
}

#[derive(Debug, Default)]
pub struct TupleExpr {
  pub positional: Vec<Expr>,
  pub named: Vec<(Symbol, Expr)>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnaryOp { Plus, Neg, BitNot, AddrOf, Deref, Not }

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinaryOp {
  Range, Or, And,
  Eq, Ne, Lt, Le, Gt, Ge,
  BitOr, BitXor, BitAnd,
  Shl, Shr,
  Add, Sub, Mul, Div, Mod,
  Pow,
}

// ---------------------------------------------------------------------
// Patterns (spec.md §4.2 "Pattern expressions")
// ---------------------------------------------------------------------

#[derive(Debug)]
pub enum Pattern {
  Null,
  /// `Ctor(args...)` or `ns.Ctor(args...)`.
  Constructor { namespace: Option<Symbol>, name: Symbol, args: SmallVec<[PatternArg; 4]> },
  Tuple(TuplePattern),
  /// `let name` — binds the whole scrutinee.
  Let(Symbol),
  /// Bare identifier: equality check against the already-bound value.
  Ident(Symbol),
  Regex(Rc<RegexAst>),
  /// Any other expression: evaluated and compared for equality.
  Expr(Box_<Expr>),
}

#[derive(Debug)]
pub enum PatternArg {
  Positional(Pattern),
  Named(Symbol, Pattern),
}

#[derive(Debug, Default)]
pub struct TuplePattern {
  pub positional: Vec<Pattern>,
  pub named: Vec<(Symbol, Pattern)>,
}
