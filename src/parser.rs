//! Recursive-descent parser for the source language (spec.md §4.2).
//!
//! One token of lookahead, plus an explicit checkpoint stack for the few
//! ambiguous prefixes where a declaration-looking statement turns out to
//! be an expression statement once a `(` or `*` disambiguates. Errors
//! accumulate rather than aborting parsing (spec.md §7 "Syntax errors").

use std::path::PathBuf;
use std::rc::Rc;
use smallvec::SmallVec;
use crate::diag::{DiagKind, Diagnostic, DiagnosticSink};
use crate::lexer::{Lexer, Op, Punct, Token, TokenKind};
use crate::symbol::{Symbol, intern};
use crate::types::ast::*;
use crate::types::entity::Keyword;
use crate::types::span::FileSpan;

pub struct Parser {
  toks: Vec<Token>,
  pos: usize,
  filename: Rc<PathBuf>,
}

type PResult<T> = Result<T, ()>;

impl Parser {
  #[must_use] pub fn new(toks: Vec<Token>, filename: Rc<PathBuf>) -> Self {
    Parser { toks, pos: 0, filename }
  }

  /// Tokenize and parse a whole source file in one step.
  pub fn parse_source(src: &str, filename: Rc<PathBuf>, sink: &mut impl DiagnosticSink) -> Module {
    let toks = Lexer::new(src, filename.clone()).tokenize(sink);
    Parser::new(toks, filename).parse_module(sink)
  }

  fn cur(&self) -> &Token { &self.toks[self.pos.min(self.toks.len() - 1)] }
  fn at_end(&self) -> bool { self.pos >= self.toks.len() }
  fn kind(&self) -> TokenKind { if self.at_end() { TokenKind::Semi } else { self.cur().kind } }
  fn span(&self) -> FileSpan {
    if self.at_end() {
      self.toks.last().map_or_else(|| FileSpan::dummy(self.filename.clone()), |t| t.span.clone())
    } else {
      self.cur().span.clone()
    }
  }
  fn text(&self) -> &str { if self.at_end() { "" } else { &self.cur().text } }

  fn bump(&mut self) -> Token {
    let t = self.cur().clone();
    if !self.at_end() { self.pos += 1; }
    t
  }

  fn mark(&self) -> usize { self.pos }
  fn reset(&mut self, mark: usize) { self.pos = mark; }

  fn is_kw(&self, s: &str) -> bool { self.kind() == TokenKind::Keyword && self.text() == s }
  fn is_punct(&self, p: Punct) -> bool { self.kind() == TokenKind::Punct(p) }
  fn is_op(&self, o: Op) -> bool { self.kind() == TokenKind::Op(o) }

  fn eat_kw(&mut self, s: &str) -> bool { if self.is_kw(s) { self.bump(); true } else { false } }
  fn eat_punct(&mut self, p: Punct) -> bool { if self.is_punct(p) { self.bump(); true } else { false } }
  fn eat_op(&mut self, o: Op) -> bool { if self.is_op(o) { self.bump(); true } else { false } }
  fn eat_semi(&mut self) -> bool { if self.is_punct(Punct::Semicolon) || self.kind() == TokenKind::Semi { self.bump(); true } else { false } }

  fn err(&mut self, msg: impl Into<String>, sink: &mut impl DiagnosticSink) {
    sink.report(Diagnostic::new(DiagKind::Syntax, self.span(), msg.into()));
  }

  /// Skip to the next likely resynchronization point: a statement
  /// terminator or a matching bracket (spec.md §7 "Recovery is local").
  fn resync(&mut self) {
    let mut depth = 0i32;
    while !self.at_end() {
      match self.kind() {
        TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => { depth += 1; self.bump(); }
        TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) if depth > 0 => { depth -= 1; self.bump(); }
        TokenKind::Punct(Punct::RBrace) => break,
        TokenKind::Punct(Punct::Semicolon) | TokenKind::Semi if depth == 0 => { self.bump(); break }
        _ => { self.bump(); }
      }
    }
  }

  fn expect_ident(&mut self, sink: &mut impl DiagnosticSink) -> Symbol {
    if self.kind() == TokenKind::Ident {
      let t = self.bump();
      intern(&t.text)
    } else {
      self.err(format!("expected identifier, got `{}`", self.text()), sink);
      intern("<error>")
    }
  }

  fn expect_punct(&mut self, p: Punct, sink: &mut impl DiagnosticSink) -> PResult<()> {
    if self.eat_punct(p) { Ok(()) } else {
      self.err(format!("expected `{p:?}`, got `{}`", self.text()), sink);
      Err(())
    }
  }

  // -------------------------------------------------------------------
  // Top level
  // -------------------------------------------------------------------

  pub fn parse_module(&mut self, sink: &mut impl DiagnosticSink) -> Module {
    let mut defs = Vec::new();
    while !self.at_end() {
      if self.eat_semi() { continue }
      match self.parse_def(sink) {
        Ok(def) => defs.push(def),
        Err(()) => self.resync(),
      }
    }
    Module { filename: self.filename.clone(), defs }
  }

  fn parse_def(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Def> {
    let start = self.span();
    let exported = self.eat_kw("export");
    if self.kind() == TokenKind::Import {
      let t = self.bump();
      return Ok(Def::Import(Spanned::new(start, self.parse_import(&t.text))));
    }
    if self.eat_kw("type") {
      return self.parse_type_def(start, exported, sink);
    }
    // Otherwise: `ty name ( args ) { body }` (function) or `ty name = expr;` /
    // `ty name;` (global). Both begin with a type expression.
    let ty = self.parse_type_expr(sink)?;
    let name = self.expect_ident(sink);
    if self.is_punct(Punct::LParen) {
      return self.parse_function_def(start, exported, ty, name, sink);
    }
    self.parse_global_def(start, exported, ty, name, sink)
  }

  fn parse_import(&self, text: &str) -> ImportDef {
    // `import path/to/file.ext [in name]`
    let rest = text.strip_prefix("import").unwrap_or(text).trim();
    let (path_part, namespace) = if let Some(idx) = rest.find(" in ") {
      let (p, n) = rest.split_at(idx);
      (p.trim(), Some(intern(n["in".len() + 1..].trim())))
    } else {
      (rest, None)
    };
    ImportDef { path: PathBuf::from(path_part), namespace, params: Vec::new() }
  }

  fn parse_type_def(&mut self, start: FileSpan, exported: bool, sink: &mut impl DiagnosticSink) -> PResult<Def> {
    let name = self.expect_ident(sink);
    let mut constructors = Vec::new();
    if self.eat_punct(Punct::LParen) {
      // `type Foo();` desugars to `type Foo { Foo(); }` (spec.md §8).
      let (field_types, field_names) = self.parse_ctor_fields(sink)?;
      self.expect_punct(Punct::RParen, sink)?;
      self.eat_semi();
      constructors.push(Constructor { name, field_types, field_names, tag_value: None });
    } else if self.eat_punct(Punct::LBrace) {
      while !self.is_punct(Punct::RBrace) && !self.at_end() {
        if self.eat_semi() { continue }
        constructors.push(self.parse_constructor(sink)?);
      }
      self.expect_punct(Punct::RBrace, sink)?;
    } else {
      self.eat_semi();
    }
    Ok(Def::Type(Spanned::new(start, TypeDef { name, exported, constructors })))
  }

  fn parse_constructor(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Constructor> {
    let name = self.expect_ident(sink);
    let (field_types, field_names) = if self.eat_punct(Punct::LParen) {
      let r = self.parse_ctor_fields(sink)?;
      self.expect_punct(Punct::RParen, sink)?;
      r
    } else { (None, None) };
    let tag_value = if self.eat_punct(Punct::Colon) { Some(self.parse_expr(sink)?) } else { None };
    self.eat_semi();
    Ok(Constructor { name, field_types, field_names, tag_value })
  }

  #[allow(clippy::type_complexity)]
  fn parse_ctor_fields(&mut self, sink: &mut impl DiagnosticSink) -> PResult<(Option<Vec<TypeExpr>>, Option<Vec<Symbol>>)> {
    if self.is_punct(Punct::RParen) { return Ok((Some(Vec::new()), Some(Vec::new()))) }
    let mut types = Vec::new();
    let mut names = Vec::new();
    loop {
      let ty = self.parse_type_expr(sink)?;
      let name = self.expect_ident(sink);
      types.push(ty);
      names.push(name);
      if !self.eat_punct(Punct::Comma) { break }
    }
    Ok((Some(types), Some(names)))
  }

  fn parse_function_def(&mut self, start: FileSpan, exported: bool, ret: TypeExpr, name: Symbol, sink: &mut impl DiagnosticSink) -> PResult<Def> {
    self.expect_punct(Punct::LParen, sink)?;
    let mut implicit_args = Vec::new();
    let mut args = Vec::new();
    while !self.is_punct(Punct::RParen) {
      let implicit = self.eat_kw("implicit");
      let ty = self.parse_type_expr(sink)?;
      let name = self.expect_ident(sink);
      if implicit { implicit_args.push(Arg { name, ty }) } else { args.push(Arg { name, ty }) }
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RParen, sink)?;
    let body = if self.eat_semi() {
      Vec::new()
    } else if self.is_kw("return") {
      // `int k() return 5;` ≡ `int k() {return 5;}` (spec.md §8).
      vec![self.parse_stmt(sink)?]
    } else {
      self.parse_block(sink)?
    };
    Ok(Def::Function(Spanned::new(start, FunctionDef { name, exported, implicit_args, args, ret, body })))
  }

  fn parse_global_def(&mut self, start: FileSpan, exported: bool, ty: TypeExpr, name: Symbol, sink: &mut impl DiagnosticSink) -> PResult<Def> {
    let value = if self.kind() == TokenKind::Assign {
      self.bump();
      Some(self.parse_expr(sink)?)
    } else { None };
    self.eat_semi();
    Ok(Def::Global(Spanned::new(start, GlobalDef { name, exported, ty: Some(ty), value })))
  }

  // -------------------------------------------------------------------
  // Type expressions
  // -------------------------------------------------------------------

  fn parse_type_expr(&mut self, sink: &mut impl DiagnosticSink) -> PResult<TypeExpr> {
    let mut ty = self.parse_type_atom(sink)?;
    loop {
      if self.eat_op(Op::Star) {
        ty = TypeExpr::Pointer(Box::new(ty));
      } else if self.is_punct(Punct::LBracket) {
        self.bump();
        if self.eat_punct(Punct::RBracket) {
          ty = TypeExpr::Slice(Box::new(ty));
        } else {
          let n = self.parse_expr(sink)?;
          self.expect_punct(Punct::RBracket, sink)?;
          ty = TypeExpr::Array(Box::new(ty), Box::new(n));
        }
      } else if self.eat_punct(Punct::Question) {
        ty = TypeExpr::Option(Box::new(ty));
      } else if self.eat_punct(Punct::Exclaim) {
        ty = TypeExpr::Failable(Box::new(ty));
      } else if self.is_op(Op::Pipe) {
        self.bump();
        let rhs = self.parse_type_expr(sink)?;
        ty = match ty {
          TypeExpr::Union(mut xs) => { xs.push(rhs); TypeExpr::Union(xs) }
          other => TypeExpr::Union(vec![other, rhs]),
        };
      } else { break }
    }
    Ok(ty)
  }

  fn parse_type_atom(&mut self, sink: &mut impl DiagnosticSink) -> PResult<TypeExpr> {
    if self.eat_kw("const") {
      // `int const*` ≡ `const int*` (spec.md §8): `const` is accepted and
      // discarded, since this spec's IR has no separate const-qualified
      // type (C-interop constness is tracked only through `CTypedef`).
      return self.parse_type_atom(sink);
    }
    if self.is_punct(Punct::LParen) {
      self.bump();
      let mut tup = TupleTypeExpr::default();
      while !self.is_punct(Punct::RParen) {
        if self.kind() == TokenKind::Ident && self.peek_is_colon() {
          let name = self.expect_ident(sink);
          self.expect_punct(Punct::Colon, sink)?;
          tup.named.push((name, self.parse_type_expr(sink)?));
        } else {
          tup.positional.push(self.parse_type_expr(sink)?);
        }
        if !self.eat_punct(Punct::Comma) { break }
      }
      self.expect_punct(Punct::RParen, sink)?;
      return Ok(TypeExpr::Tuple(tup));
    }
    if self.kind() == TokenKind::Ident {
      let first = self.expect_ident(sink);
      if self.eat_punct(Punct::Dot) {
        let name = self.expect_ident(sink);
        return Ok(TypeExpr::Named { namespace: Some(first), name });
      }
      // Trailing `const` on the other side: `int const*`.
      if self.eat_kw("const") { /* accepted, discarded */ }
      return Ok(TypeExpr::Named { namespace: None, name: first });
    }
    self.err(format!("expected a type, got `{}`", self.text()), sink);
    Err(())
  }

  fn peek_is_colon(&self) -> bool {
    self.toks.get(self.pos + 1).is_some_and(|t| t.kind == TokenKind::Punct(Punct::Colon))
  }

  // -------------------------------------------------------------------
  // Statements
  // -------------------------------------------------------------------

  fn parse_block(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Vec<Stmt>> {
    self.expect_punct(Punct::LBrace, sink)?;
    let mut stmts = Vec::new();
    while !self.is_punct(Punct::RBrace) && !self.at_end() {
      if self.eat_semi() { continue }
      match self.parse_stmt(sink) {
        Ok(s) => stmts.push(s),
        Err(()) => self.resync(),
      }
    }
    self.expect_punct(Punct::RBrace, sink)?;
    Ok(stmts)
  }

  fn parse_stmt(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Stmt> {
    if self.eat_kw("return") {
      let value = if self.is_punct(Punct::Semicolon) || self.kind() == TokenKind::Semi { None } else { Some(self.parse_expr(sink)?) };
      self.eat_semi();
      return Ok(Stmt::Return(value));
    }
    if self.eat_kw("assert") {
      let e = self.parse_expr(sink)?;
      self.eat_semi();
      return Ok(Stmt::Assert(e));
    }
    if self.eat_kw("break") {
      let value = if self.is_punct(Punct::Semicolon) || self.kind() == TokenKind::Semi { None } else { Some(self.parse_expr(sink)?) };
      self.eat_semi();
      return Ok(Stmt::Break(value));
    }
    if self.eat_kw("continue") {
      let value = if self.is_punct(Punct::Semicolon) || self.kind() == TokenKind::Semi { None } else { Some(self.parse_expr(sink)?) };
      self.eat_semi();
      return Ok(Stmt::Continue(value));
    }
    if self.eat_kw("pass") { self.eat_semi(); return Ok(Stmt::Pass) }
    // Tuple-decomposition assignment: `(let a, let b) = f();`
    if self.is_punct(Punct::LParen) {
      let mark = self.mark();
      if let Ok(lv) = self.try_parse_tuple_lvalue(sink) {
        if self.kind() == TokenKind::Assign {
          self.bump();
          let rhs = self.parse_expr(sink)?;
          self.eat_semi();
          return Ok(Stmt::Assign { lhs: lv, rhs });
        }
      }
      self.reset(mark);
    }
    if self.eat_kw("let") {
      let implicit = self.eat_kw("implicit");
      let name = self.expect_ident(sink);
      if self.kind() == TokenKind::Assign {
        self.bump();
        let rhs = self.parse_expr(sink)?;
        self.eat_semi();
        return Ok(Stmt::Assign { lhs: LValue::Let { name, implicit }, rhs });
      }
      self.eat_semi();
      return Ok(Stmt::Assign { lhs: LValue::Let { name, implicit }, rhs: Expr::Literal(Literal::Null) });
    }
    // Otherwise: an expression, possibly followed by `= rhs` (plain or
    // dereference/member assignment), else just an expression statement.
    let expr = self.parse_expr(sink)?;
    if self.kind() == TokenKind::Assign {
      self.bump();
      let rhs = self.parse_expr(sink)?;
      self.eat_semi();
      let lhs = match Self::expr_to_lvalue(expr) {
        Some(lv) => lv,
        None => { self.err("invalid assignment target", sink); LValue::Ident(intern("<error>")) }
      };
      return Ok(Stmt::Assign { lhs, rhs });
    }
    self.eat_semi();
    Ok(Stmt::Expr(expr))
  }

  fn expr_to_lvalue(e: Expr) -> Option<LValue> {
    match e {
      Expr::Ident(s) => Some(LValue::Ident(s)),
      Expr::Unary { op: UnaryOp::Deref, expr } => Some(LValue::Deref(expr)),
      Expr::Member { base, name } => Some(LValue::Member(Box::new(Self::expr_to_lvalue(*base)?), name)),
      _ => None,
    }
  }

  fn try_parse_tuple_lvalue(&mut self, sink: &mut impl DiagnosticSink) -> PResult<LValue> {
    self.expect_punct(Punct::LParen, sink)?;
    let mut parts = Vec::new();
    while !self.is_punct(Punct::RParen) {
      if self.eat_kw("let") {
        let implicit = self.eat_kw("implicit");
        parts.push(LValue::Let { name: self.expect_ident(sink), implicit });
      } else {
        parts.push(LValue::Ident(self.expect_ident(sink)));
      }
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RParen, sink)?;
    if self.kind() != TokenKind::Assign { return Err(()) }
    Ok(LValue::Tuple(parts))
  }

  // -------------------------------------------------------------------
  // Expressions
  // -------------------------------------------------------------------
  //
  // Precedence, low to high (spec.md §4.2): `..`; `or`; `and`; comparison;
  // `|`; `^`; `&`; shift; additive; multiplicative; exponent; `else`.
  // Unary `+ - ~ & * not` bind tighter than every binary operator except
  // the exponent.

  pub fn parse_expr(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    self.parse_range(sink)
  }

  fn parse_range(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let lhs = self.parse_or(sink)?;
    if self.eat_op(Op::DotDot) {
      let rhs = self.parse_or(sink)?;
      return Ok(Expr::Binary { op: BinaryOp::Range, lhs: Box::new(lhs), rhs: Box::new(rhs) });
    }
    Ok(lhs)
  }

  fn parse_or(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_and(sink)?;
    while self.eat_op(Op::Or) {
      let rhs = self.parse_and(sink)?;
      lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_and(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_cmp(sink)?;
    while self.eat_op(Op::And) {
      let rhs = self.parse_cmp(sink)?;
      lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_cmp(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_bitor(sink)?;
    loop {
      let op = match self.kind() {
        TokenKind::Op(Op::EqEq) => BinaryOp::Eq,
        TokenKind::Op(Op::Ne) => BinaryOp::Ne,
        TokenKind::Op(Op::Lt) => BinaryOp::Lt,
        TokenKind::Op(Op::Le) => BinaryOp::Le,
        TokenKind::Op(Op::Gt) => BinaryOp::Gt,
        TokenKind::Op(Op::Ge) => BinaryOp::Ge,
        _ => break,
      };
      self.bump();
      let rhs = self.parse_bitor(sink)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_bitor(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_bitxor(sink)?;
    while self.is_op(Op::Pipe) {
      self.bump();
      let rhs = self.parse_bitxor(sink)?;
      lhs = Expr::Binary { op: BinaryOp::BitOr, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_bitxor(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_bitand(sink)?;
    while self.eat_op(Op::Caret) {
      let rhs = self.parse_bitand(sink)?;
      lhs = Expr::Binary { op: BinaryOp::BitXor, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_bitand(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_shift(sink)?;
    while self.is_op(Op::Amp) {
      self.bump();
      let rhs = self.parse_shift(sink)?;
      lhs = Expr::Binary { op: BinaryOp::BitAnd, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_shift(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_additive(sink)?;
    loop {
      let op = match self.kind() {
        TokenKind::Op(Op::Shl) => BinaryOp::Shl,
        TokenKind::Op(Op::Shr) => BinaryOp::Shr,
        _ => break,
      };
      self.bump();
      let rhs = self.parse_additive(sink)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_additive(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_multiplicative(sink)?;
    loop {
      let op = match self.kind() {
        TokenKind::Op(Op::Plus) => BinaryOp::Add,
        TokenKind::Op(Op::Minus) => BinaryOp::Sub,
        _ => break,
      };
      self.bump();
      let rhs = self.parse_multiplicative(sink)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_multiplicative(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut lhs = self.parse_exponent(sink)?;
    loop {
      let op = match self.kind() {
        TokenKind::Op(Op::Star) => BinaryOp::Mul,
        TokenKind::Op(Op::Slash) => BinaryOp::Div,
        TokenKind::Op(Op::Percent) => BinaryOp::Mod,
        _ => break,
      };
      self.bump();
      let rhs = self.parse_exponent(sink)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
  }

  fn parse_exponent(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    // This grammar has no dedicated exponent operator token; `Pow` is
    // reserved in `BinaryOp` for the type checker's builtin lowering.
    let lhs = self.parse_unary(sink)?;
    self.parse_else(lhs, sink)
  }

  fn parse_else(&mut self, lhs: Expr, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    if self.eat_kw("else") {
      let rhs = if self.is_punct(Punct::LBrace) {
        ElseArm::Block(self.parse_block(sink)?)
      } else {
        ElseArm::Expr(Box::new(self.parse_unary(sink)?))
      };
      return Ok(Expr::BinaryElse { lhs: Box::new(lhs), rhs });
    }
    Ok(lhs)
  }

  fn parse_unary(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let op = match self.kind() {
      TokenKind::Op(Op::Plus) => Some(UnaryOp::Plus),
      TokenKind::Op(Op::Minus) => Some(UnaryOp::Neg),
      TokenKind::Op(Op::Tilde) => Some(UnaryOp::BitNot),
      TokenKind::Op(Op::Amp) => Some(UnaryOp::AddrOf),
      TokenKind::Op(Op::Star) => Some(UnaryOp::Deref),
      TokenKind::Op(Op::Not) => Some(UnaryOp::Not),
      _ => None,
    };
    if let Some(op) = op {
      self.bump();
      let expr = self.parse_unary(sink)?;
      return Ok(Expr::Unary { op, expr: Box::new(expr) });
    }
    self.parse_postfix(sink)
  }

  fn parse_postfix(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    let mut e = self.parse_primary(sink)?;
    loop {
      if self.eat_punct(Punct::Dot) {
        let name = self.expect_ident(sink);
        e = Expr::Member { base: Box::new(e), name };
      } else if self.eat_punct(Punct::LBracket) {
        let idx = self.parse_expr(sink)?;
        self.expect_punct(Punct::RBracket, sink)?;
        e = Expr::Index { base: Box::new(e), index: Box::new(idx) };
      } else if self.is_punct(Punct::LParen) {
        let args = self.parse_call_args(sink)?;
        let trailing_block = if self.is_punct(Punct::LBrace) { Some(self.parse_block(sink)?) } else { None };
        e = Expr::Call { callee: Box::new(e), args, trailing_block };
      } else if self.eat_kw("cast") {
        let ty = self.parse_type_expr(sink)?;
        e = Expr::Cast { expr: Box::new(e), ty };
      } else if self.eat_kw("where") {
        self.expect_punct(Punct::LBrace, sink)?;
        let mut stmts = Vec::new();
        while !self.is_punct(Punct::RBrace) && !self.at_end() {
          if self.eat_semi() { continue }
          stmts.push(self.parse_stmt(sink)?);
        }
        self.expect_punct(Punct::RBrace, sink)?;
        e = Expr::Where { stmts, expr: Box::new(e) };
      } else { break }
    }
    Ok(e)
  }

  fn parse_call_args(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Vec<Expr>> {
    self.expect_punct(Punct::LParen, sink)?;
    let mut args = Vec::new();
    while !self.is_punct(Punct::RParen) {
      args.push(self.parse_expr(sink)?);
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RParen, sink)?;
    Ok(args)
  }

  fn parse_primary(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    match self.kind() {
      TokenKind::Bool(b) => { self.bump(); Ok(Expr::Literal(Literal::Bool(b))) }
      TokenKind::Int => { let t = self.bump(); Ok(Expr::Literal(Literal::Int(parse_int_literal(&t.text)))) }
      TokenKind::Float => { let t = self.bump(); Ok(Expr::Literal(Literal::Float(t.text.parse().unwrap_or(0.0)))) }
      TokenKind::Str => { let t = self.bump(); Ok(Expr::Literal(Literal::Str(unescape_string(&t.text)))) }
      TokenKind::Symbol => { let t = self.bump(); Ok(Expr::Literal(Literal::Symbol(intern(t.text.trim_start_matches('#'))))) }
      TokenKind::Regex => {
        let t = self.bump();
        let inner = t.text.trim_start_matches('/').trim_end_matches('/');
        match crate::regex::parser::parse_regex(inner) {
          Ok(ast) => Ok(Expr::Literal(Literal::Regex(Rc::new(ast)))),
          Err(e) => { self.err(format!("invalid regex literal: {}", e.message), sink); Err(()) }
        }
      }
      TokenKind::Keyword if self.text() == "null" => { self.bump(); Ok(Expr::Literal(Literal::Null)) }
      TokenKind::Keyword if self.text() == "let" => {
        self.bump();
        let implicit = self.eat_kw("implicit");
        Ok(Expr::NewIdent { name: self.expect_ident(sink), implicit })
      }
      TokenKind::Keyword if self.text() == "if" => self.parse_if(sink),
      TokenKind::Keyword if self.text() == "for" => self.parse_for(sink),
      TokenKind::Keyword if self.text() == "while" => self.parse_while(sink),
      TokenKind::Ident => { let t = self.bump(); Ok(Expr::Ident(intern(&t.text))) }
      TokenKind::Punct(Punct::LParen) => self.parse_tuple_or_paren(sink),
      TokenKind::Punct(Punct::LBracket) => self.parse_array_literal(sink),
      _ => {
        self.err(format!("expected an expression, got `{}`", self.text()), sink);
        Err(())
      }
    }
  }

  fn parse_tuple_or_paren(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    self.bump();
    if self.eat_punct(Punct::RParen) { return Ok(Expr::Tuple(TupleExpr::default())) }
    let mut tup = TupleExpr::default();
    let mut count = 0;
    loop {
      if self.kind() == TokenKind::Ident && self.peek_is_colon() {
        let name = self.expect_ident(sink);
        self.expect_punct(Punct::Colon, sink)?;
        tup.named.push((name, self.parse_expr(sink)?));
      } else {
        tup.positional.push(self.parse_expr(sink)?);
      }
      count += 1;
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RParen, sink)?;
    if count == 1 && tup.named.is_empty() {
      return Ok(tup.positional.pop().unwrap());
    }
    Ok(Expr::Tuple(tup))
  }

  fn parse_array_literal(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    self.bump();
    let mut items = Vec::new();
    while !self.is_punct(Punct::RBracket) {
      items.push(self.parse_expr(sink)?);
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RBracket, sink)?;
    Ok(Expr::Array(items))
  }

  fn parse_if(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    self.bump(); // `if`
    let scrutinee = self.parse_expr(sink)?;
    if self.eat_kw("case") {
      let pattern = self.parse_pattern(sink)?;
      let then_block = self.parse_block(sink)?;
      let else_block = if self.eat_kw("else") { Some(self.parse_else_block(sink)?) } else { None };
      return Ok(Expr::IfCase { scrutinee: Box::new(scrutinee), pattern, then_block, else_block });
    }
    let then_block = self.parse_block(sink)?;
    let else_block = if self.eat_kw("else") { Some(self.parse_else_block(sink)?) } else { None };
    Ok(Expr::If { cond: Box::new(scrutinee), then_block, else_block })
  }

  fn parse_else_block(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Vec<Stmt>> {
    if self.is_kw("if") {
      Ok(vec![Stmt::Expr(self.parse_if(sink)?)])
    } else {
      self.parse_block(sink)
    }
  }

  fn parse_for(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    self.bump(); // `for`
    let var = self.expect_ident(sink);
    if !self.eat_kw("in") { self.err("expected `in` in for loop", sink); return Err(()) }
    let low = self.parse_or(sink)?;
    if !self.eat_op(Op::DotDot) { self.err("expected `..` in for-range", sink); return Err(()) }
    let high = self.parse_or(sink)?;
    let body = self.parse_block(sink)?;
    Ok(Expr::For { var, low: Box::new(low), high: Box::new(high), body })
  }

  fn parse_while(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Expr> {
    self.bump(); // `while`
    let cond = self.parse_expr(sink)?;
    let body = self.parse_block(sink)?;
    Ok(Expr::While { cond: Box::new(cond), body })
  }

  // -------------------------------------------------------------------
  // Patterns (spec.md §4.2 "Pattern expressions")
  // -------------------------------------------------------------------

  fn parse_pattern(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Pattern> {
    if self.is_kw("null") { self.bump(); return Ok(Pattern::Null) }
    if self.kind() == TokenKind::Regex {
      let t = self.bump();
      let inner = t.text.trim_start_matches('/').trim_end_matches('/');
      return match crate::regex::parser::parse_regex(inner) {
        Ok(ast) => Ok(Pattern::Regex(Rc::new(ast))),
        Err(e) => { self.err(format!("invalid regex pattern: {}", e.message), sink); Err(()) }
      };
    }
    if self.eat_kw("let") { return Ok(Pattern::Let(self.expect_ident(sink))) }
    if self.is_punct(Punct::LParen) { return self.parse_tuple_pattern(sink) }
    if self.kind() == TokenKind::Ident {
      let mark = self.mark();
      let first = self.expect_ident(sink);
      if self.eat_punct(Punct::Dot) {
        let name = self.expect_ident(sink);
        if self.is_punct(Punct::LParen) {
          let args = self.parse_pattern_args(sink)?;
          return Ok(Pattern::Constructor { namespace: Some(first), name, args });
        }
        self.reset(mark);
      } else if self.is_punct(Punct::LParen) {
        let args = self.parse_pattern_args(sink)?;
        return Ok(Pattern::Constructor { namespace: None, name: first, args });
      } else {
        return Ok(Pattern::Ident(first));
      }
    }
    // Any other expression: evaluated and compared for equality.
    Ok(Pattern::Expr(Box::new(self.parse_expr(sink)?)))
  }

  fn parse_pattern_args(&mut self, sink: &mut impl DiagnosticSink) -> PResult<SmallVec<[PatternArg; 4]>> {
    self.bump(); // `(`
    let mut args = SmallVec::new();
    while !self.is_punct(Punct::RParen) {
      if self.kind() == TokenKind::Ident && self.peek_is_colon() {
        let name = self.expect_ident(sink);
        self.expect_punct(Punct::Colon, sink)?;
        args.push(PatternArg::Named(name, self.parse_pattern(sink)?));
      } else {
        args.push(PatternArg::Positional(self.parse_pattern(sink)?));
      }
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RParen, sink)?;
    Ok(args)
  }

  fn parse_tuple_pattern(&mut self, sink: &mut impl DiagnosticSink) -> PResult<Pattern> {
    self.bump();
    let mut tup = TuplePattern::default();
    while !self.is_punct(Punct::RParen) {
      if self.kind() == TokenKind::Ident && self.peek_is_colon() {
        let name = self.expect_ident(sink);
        self.expect_punct(Punct::Colon, sink)?;
        tup.named.push((name, self.parse_pattern(sink)?));
      } else {
        tup.positional.push(self.parse_pattern(sink)?);
      }
      if !self.eat_punct(Punct::Comma) { break }
    }
    self.expect_punct(Punct::RParen, sink)?;
    Ok(Pattern::Tuple(tup))
  }
}

fn parse_int_literal(text: &str) -> i128 {
  let cleaned: String = text.chars().filter(|&c| c != '_').collect();
  if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
    return i128::from_str_radix(hex, 16).unwrap_or(0);
  }
  if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
    return i128::from_str_radix(bin, 2).unwrap_or(0);
  }
  cleaned.parse().unwrap_or(0)
}

fn unescape_string(text: &str) -> String {
  let inner = &text[1..text.len().saturating_sub(1).max(1)];
  let mut out = String::new();
  let mut chars = inner.chars();
  while let Some(c) = chars.next() {
    if c == '\\' {
      match chars.next() {
        Some('n') => out.push('\n'),
        Some('t') => out.push('\t'),
        Some('r') => out.push('\r'),
        Some('\\') => out.push('\\'),
        Some('x') => {
          let digits: String = chars.by_ref().take(2).collect();
          if let Ok(bytes) = hex::decode(&digits) {
            out.push(bytes[0] as char);
          } else {
            out.push('x');
            out.push_str(&digits);
          }
        }
        Some(other) => out.push(other),
        None => {}
      }
    } else {
      out.push(c);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::CollectingSink;
  use std::path::PathBuf;

  fn parse_expr_str(src: &str) -> Expr {
    let mut sink = CollectingSink::default();
    let toks = Lexer::new(src, Rc::new(PathBuf::from("<test>"))).tokenize(&mut sink);
    let mut p = Parser::new(toks, Rc::new(PathBuf::from("<test>")));
    let e = p.parse_expr(&mut sink).expect("parse failed");
    assert!(!sink.has_errors(), "{:?}", sink.diagnostics);
    e
  }

  #[test]
  fn precedence_add_before_mul() {
    let e = parse_expr_str("1 + 2 * 3");
    match e {
      Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn else_binds_tighter_than_mul() {
    let e = parse_expr_str("1 * 2 else 3");
    match e {
      Expr::Binary { op: BinaryOp::Mul, rhs, .. } => {
        assert!(matches!(*rhs, Expr::BinaryElse { .. }));
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn module_level_type_shorthand_matches_explicit_form() {
    let mut sink1 = CollectingSink::default();
    let m1 = Parser::parse_source("type Foo();", Rc::new(PathBuf::from("<a>")), &mut sink1);
    let mut sink2 = CollectingSink::default();
    let m2 = Parser::parse_source("type Foo { Foo(); }", Rc::new(PathBuf::from("<b>")), &mut sink2);
    let ctor = |m: &Module| match &m.defs[0] {
      Def::Type(t) => t.k.constructors.len(),
      _ => panic!("not a type def"),
    };
    assert_eq!(ctor(&m1), ctor(&m2));
  }

  #[test]
  fn function_body_shorthand_return() {
    let mut sink = CollectingSink::default();
    let m = Parser::parse_source("int k() return 5;", Rc::new(PathBuf::from("<t>")), &mut sink);
    match &m.defs[0] {
      Def::Function(f) => assert_eq!(f.k.body.len(), 1),
      _ => panic!("not a function"),
    }
  }
}
