//! The C-header parser (spec.md §4.3): turns the declarations visible in a
//! `.h` file into the same `Def` nodes an imported source module would
//! produce, so [`crate::declare`] can treat both uniformly.
//!
//! Grounded on the real C front door, not the similarly-named `addic`
//! module (which is the source language's own lexer/parser under an
//! unrelated name): the lexer mirrors `frontend/clexer.py`'s token
//! classes and its `ignore_tokens`-aware identifier scan, and the parser
//! mirrors `frontend/cparser.py`'s declaration dispatch — typedefs,
//! struct/union/enum, function prototypes, globals, and the handful of
//! preprocessor directives a header actually needs (`#define`, `#undef`,
//! `#include`, `#if`/`#ifdef`/`#ifndef` ... `#endif`, include guards).
//! Anonymous nested struct/union members and GCC `__attribute__((...))`
//! are supplements neither original Python file covered but that any
//! header of consequence uses.

use std::path::PathBuf;
use std::rc::Rc;
use arrayvec::ArrayVec;
use bitflags::bitflags;
use hashbrown::HashSet;
use crate::diag::{DiagKind, Diagnostic, DiagnosticSink};
use crate::symbol::{Symbol, intern};
use crate::types::ast::*;
use crate::types::span::{FileSpan, Span, Spanned};

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Tok {
  Ident(String),
  Int(i128),
  Float(f64),
  Str(String),
  Char(i64),
  /// A single-character punctuator: `( ) { } [ ] , ; * & ~ ? : =`.
  Punct(u8),
  Arrow,
  Ellipsis,
  /// `#` at the start of a logical line: begins a preprocessor directive.
  Hash,
  /// Synthetic end-of-directive marker, emitted at the first unescaped
  /// newline after a [`Tok::Hash`] (mirrors `PPDIRECTIVE_END` in the
  /// original C lexer).
  PpEnd,
  Eof,
}

struct CToken {
  kind: Tok,
  span: FileSpan,
}

bitflags! {
  /// Storage-class and qualifier keywords, tracked but mostly discarded:
  /// this crate only needs a declaration's type and name, not its
  /// linkage or mutability.
  #[derive(Copy, Clone, Default)]
  struct DeclFlags: u16 {
    const TYPEDEF  = 1 << 0;
    const EXTERN   = 1 << 1;
    const STATIC   = 1 << 2;
    const CONST    = 1 << 3;
    const VOLATILE = 1 << 4;
    const INLINE   = 1 << 5;
    const RESTRICT = 1 << 6;
  }
}

struct CLexer<'a> {
  src: &'a str,
  bytes: &'a [u8],
  pos: usize,
  line: u32,
  column: u32,
  file: Rc<PathBuf>,
  in_directive: bool,
  at_line_start: bool,
}

impl<'a> CLexer<'a> {
  fn new(src: &'a str, file: Rc<PathBuf>) -> Self {
    CLexer { src, bytes: src.as_bytes(), pos: 0, line: 1, column: 1, file, in_directive: false, at_line_start: true }
  }

  fn here(&self) -> FileSpan {
    FileSpan { file: self.file.clone(), span: Span { start: self.pos, end: self.pos }, line: self.line, column: self.column }
  }

  fn peek(&self) -> Option<u8> { self.bytes.get(self.pos).copied() }
  fn peek_at(&self, n: usize) -> Option<u8> { self.bytes.get(self.pos + n).copied() }

  fn bump(&mut self) -> Option<u8> {
    let b = self.peek()?;
    self.pos += 1;
    if b == b'\n' { self.line += 1; self.column = 1; } else { self.column += 1; }
    Some(b)
  }

  /// Skip whitespace, `//`/`/* */` comments, and backslash-newline
  /// continuations. Stops at (without consuming) a bare newline while a
  /// directive is open, since that newline itself is significant.
  fn skip_trivia(&mut self) {
    loop {
      match self.peek() {
        Some(b'\\') if self.peek_at(1) == Some(b'\n') => { self.bump(); self.bump(); }
        Some(b'\n') if self.in_directive => break,
        Some(b'\n') => { self.bump(); self.at_line_start = true; }
        Some(b) if b.is_ascii_whitespace() => { self.bump(); }
        Some(b'/') if self.peek_at(1) == Some(b'/') => {
          while !matches!(self.peek(), None | Some(b'\n')) { self.bump(); }
        }
        Some(b'/') if self.peek_at(1) == Some(b'*') => {
          self.bump(); self.bump();
          while self.peek().is_some() && !(self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/')) { self.bump(); }
          self.bump(); self.bump();
        }
        _ => break,
      }
    }
  }

  fn next(&mut self) -> CToken {
    self.skip_trivia();
    let span = self.here();
    if self.in_directive && self.peek() == Some(b'\n') {
      self.bump();
      self.in_directive = false;
      self.at_line_start = true;
      return CToken { kind: Tok::PpEnd, span };
    }
    let was_line_start = self.at_line_start;
    self.at_line_start = false;
    let Some(b) = self.peek() else { return CToken { kind: Tok::Eof, span } };
    match b {
      b'#' if was_line_start => { self.bump(); self.in_directive = true; CToken { kind: Tok::Hash, span } }
      b'(' | b')' | b'{' | b'}' | b'[' | b']' | b',' | b';' | b'*' | b'&' | b'~' | b'?' | b':' | b'^' | b'%' | b'+' | b'-' | b'/' | b'=' | b'<' | b'>' | b'!' | b'|' => {
        self.bump();
        if b == b'-' && self.peek() == Some(b'>') { self.bump(); return CToken { kind: Tok::Arrow, span }; }
        CToken { kind: Tok::Punct(b), span }
      }
      b'.' if self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'.') => {
        self.bump(); self.bump(); self.bump();
        CToken { kind: Tok::Ellipsis, span }
      }
      b'.' => { self.bump(); CToken { kind: Tok::Punct(b'.'), span } }
      b'"' => self.scan_string(span),
      b'\'' => self.scan_char(span),
      b'0'..=b'9' => self.scan_number(span),
      b if b.is_ascii_alphabetic() || b == b'_' => self.scan_ident(span),
      _ => { self.bump(); CToken { kind: Tok::Punct(b), span } }
    }
  }

  fn scan_string(&mut self, span: FileSpan) -> CToken {
    self.bump();
    let mut s = String::new();
    loop {
      match self.peek() {
        None | Some(b'\n') => break,
        Some(b'"') => { self.bump(); break }
        Some(b'\\') => { self.bump(); if let Some(c) = self.bump() { s.push(c as char); } }
        Some(_) => { let start = self.pos; self.bump(); s.push_str(&self.src[start..self.pos]); }
      }
    }
    CToken { kind: Tok::Str(s), span }
  }

  fn scan_char(&mut self, span: FileSpan) -> CToken {
    self.bump();
    let mut v: i64 = 0;
    if self.peek() == Some(b'\\') { self.bump(); v = self.bump().map_or(0, i64::from); } else { v = self.bump().map_or(0, i64::from); }
    if self.peek() == Some(b'\'') { self.bump(); }
    CToken { kind: Tok::Char(v), span }
  }

  fn scan_number(&mut self, span: FileSpan) -> CToken {
    let start = self.pos;
    let mut is_float = false;
    if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
      self.bump(); self.bump();
      while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) { self.bump(); }
      let text = &self.src[start + 2..self.pos];
      while matches!(self.peek(), Some(b'u' | b'U' | b'l' | b'L')) { self.bump(); }
      return CToken { kind: Tok::Int(i128::from_str_radix(text, 16).unwrap_or(0)), span };
    }
    while self.peek().is_some_and(u8::is_ascii_digit) { self.bump(); }
    if self.peek() == Some(b'.') { is_float = true; self.bump(); while self.peek().is_some_and(u8::is_ascii_digit) { self.bump(); } }
    if matches!(self.peek(), Some(b'e' | b'E')) {
      is_float = true; self.bump();
      if matches!(self.peek(), Some(b'+' | b'-')) { self.bump(); }
      while self.peek().is_some_and(u8::is_ascii_digit) { self.bump(); }
    }
    let end_digits = self.pos;
    while matches!(self.peek(), Some(b'u' | b'U' | b'l' | b'L' | b'f' | b'F')) {
      if self.peek() == Some(b'f') || self.peek() == Some(b'F') { is_float = true; }
      self.bump();
    }
    let text = &self.src[start..end_digits];
    if is_float {
      CToken { kind: Tok::Float(text.parse().unwrap_or(0.0)), span }
    } else {
      CToken { kind: Tok::Int(text.parse().unwrap_or(0)), span }
    }
  }

  fn scan_ident(&mut self, span: FileSpan) -> CToken {
    let start = self.pos;
    while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') { self.bump(); }
    CToken { kind: Tok::Ident(self.src[start..self.pos].to_string()), span }
  }
}

// ---------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------

const TYPE_SPECIFIERS: &[&str] = &["unsigned", "signed", "long", "short", "int", "char"];
const KW_TYPES: &[&str] = &["float", "void", "double", "_Bool"];

pub struct CHeaderParser<'a> {
  toks: Vec<CToken>,
  pos: usize,
  filename: Rc<PathBuf>,
  ignore: &'a HashSet<Symbol>,
  /// best-guessed types of previously-seen `#define`s, so a macro defined
  /// in terms of another resolves to the same guess (mirrors
  /// `determine_pp_define_type`'s reuse-of-prior-macro-type fallback).
  macro_types: hashbrown::HashMap<Symbol, Option<TypeExpr>>,
  anon_counter: u32,
  /// Anonymous nested struct/union declarations discovered while parsing
  /// a type expression, staged here until the enclosing top-level
  /// declaration is done and they can be spliced into the output in
  /// source order.
  pending_aggregates: Vec<Def>,
}

type CResult<T> = Result<T, ()>;

impl<'a> CHeaderParser<'a> {
  fn cur(&self) -> &Tok { &self.toks[self.pos].kind }
  fn span(&self) -> FileSpan { self.toks[self.pos].span.clone() }
  fn at_end(&self) -> bool { matches!(self.cur(), Tok::Eof) }
  fn bump(&mut self) -> Tok { let t = self.toks[self.pos].kind.clone(); if self.pos + 1 < self.toks.len() { self.pos += 1; } t }
  fn mark(&self) -> usize { self.pos }
  fn reset(&mut self, m: usize) { self.pos = m; }

  fn err(&self, sink: &mut impl DiagnosticSink, msg: impl Into<String>) {
    sink.report(Diagnostic::new(DiagKind::Syntax, self.span(), msg));
  }

  fn eat_punct(&mut self, c: u8) -> bool {
    if *self.cur() == Tok::Punct(c) { self.bump(); true } else { false }
  }
  fn expect_punct(&mut self, c: u8, sink: &mut impl DiagnosticSink) {
    if !self.eat_punct(c) { self.err(sink, format!("expected '{}'", c as char)); }
  }
  fn ident(&self) -> Option<&str> { if let Tok::Ident(s) = self.cur() { Some(s.as_str()) } else { None } }
  fn is_ident(&self, s: &str) -> bool { self.ident() == Some(s) }

  /// Skip to (and consume) the next `;` at the current brace/paren depth,
  /// or to a matched `}`. Used to resynchronize after anything this
  /// parser doesn't recognize.
  fn skip_to_end_of_declaration(&mut self) {
    let mut depth = 0i32;
    loop {
      match self.cur() {
        Tok::Eof => return,
        Tok::Punct(b'(' | b'[') => { depth += 1; self.bump(); }
        Tok::Punct(b')' | b']') => { depth -= 1; self.bump(); }
        Tok::Punct(b'{') if depth == 0 => { self.skip_braced(); return; }
        Tok::Punct(b';') if depth <= 0 => { self.bump(); return; }
        _ => { self.bump(); }
      }
    }
  }

  fn skip_braced(&mut self) {
    self.bump(); // '{'
    let mut depth = 1;
    while depth > 0 {
      match self.cur() {
        Tok::Eof => return,
        Tok::Punct(b'{') => { depth += 1; self.bump(); }
        Tok::Punct(b'}') => { depth -= 1; self.bump(); }
        Tok::Hash => { self.skip_pp_line(); }
        _ => { self.bump(); }
      }
    }
    self.eat_punct(b';');
  }

  fn skip_matching_paren(&mut self) {
    if !self.eat_punct(b'(') { return }
    let mut depth = 1;
    while depth > 0 {
      match self.cur() {
        Tok::Eof => return,
        Tok::Punct(b'(') => { depth += 1; self.bump(); }
        Tok::Punct(b')') => { depth -= 1; self.bump(); }
        _ => { self.bump(); }
      }
    }
  }

  /// Swallow a raw (non-directive) token line, used when a `#` directive
  /// we don't model shows up nested inside a brace block we're skipping.
  fn skip_pp_line(&mut self) {
    self.bump(); // '#'
    loop {
      match self.cur() {
        Tok::PpEnd => { self.bump(); return }
        Tok::Eof => return,
        _ => { self.bump(); }
      }
    }
  }

  /// `__attribute__((...))`, `__declspec(...)`, and similar GCC/MSVC
  /// decorations: skip them wherever they may appear between a
  /// declaration's pieces.
  fn skip_attributes(&mut self) {
    loop {
      match self.ident() {
        Some("__attribute__") | Some("__attribute") => { self.bump(); self.skip_matching_paren(); }
        Some("__declspec") => { self.bump(); self.skip_matching_paren(); }
        Some("__extension__") | Some("__restrict") | Some("__restrict__") | Some("__inline__") | Some("__inline") => { self.bump(); }
        _ => break,
      }
    }
  }

  // -- preprocessor ------------------------------------------------------

  fn parse_pp_directive(&mut self, sink: &mut impl DiagnosticSink) -> Option<Def> {
    self.bump(); // Hash
    let directive = self.ident().map(str::to_owned);
    match directive.as_deref() {
      Some("define") => { self.bump(); self.parse_define(sink) }
      Some("undef") => {
        self.bump();
        if let Some(name) = self.ident() { let sym = intern(name); self.macro_types.remove(&sym); }
        self.skip_to_pp_end();
        None
      }
      Some("include") | Some("include_next") => { self.bump(); self.parse_include() }
      Some("if") | Some("ifdef") | Some("ifndef") | Some("elif") => {
        self.bump();
        self.skip_to_pp_end();
        self.skip_until_pp_endif();
        None
      }
      Some("else") | Some("endif") => { self.bump(); self.skip_to_pp_end(); None }
      Some("error") | Some("warning") | Some("pragma") | Some("line") => { self.bump(); self.skip_to_pp_end(); None }
      _ => { self.skip_to_pp_end(); None }
    }
  }

  fn skip_to_pp_end(&mut self) {
    loop {
      match self.cur() {
        Tok::PpEnd => { self.bump(); return }
        Tok::Eof => return,
        _ => { self.bump(); }
      }
    }
  }

  /// Skip a `#if`/`#ifdef`/`#ifndef` block up to (and consuming) its
  /// matching `#endif`, tolerating nested conditionals (mirrors
  /// `skip_until_pp_endif`'s recursive handling in the original).
  fn skip_until_pp_endif(&mut self) {
    loop {
      match self.cur() {
        Tok::Eof => return,
        Tok::Hash => {
          self.bump();
          match self.ident() {
            Some("if") | Some("ifdef") | Some("ifndef") => { self.bump(); self.skip_to_pp_end(); self.skip_until_pp_endif(); }
            Some("endif") => { self.bump(); self.skip_to_pp_end(); return; }
            _ => self.skip_to_pp_end(),
          }
        }
        _ => { self.bump(); }
      }
    }
  }

  fn parse_include(&mut self) -> Option<Def> {
    let span = self.span();
    let (path, angle) = match self.cur() {
      Tok::Str(s) => { let s = s.clone(); self.bump(); (s, false) }
      Tok::Punct(b'<') => {
        // `<stdio.h>` lexed as ordinary punctuation/ident tokens;
        // reassemble the path from them up to the closing `>`.
        self.bump();
        let mut s = String::new();
        loop {
          match self.cur() {
            Tok::Punct(b'>') | Tok::PpEnd | Tok::Eof => break,
            Tok::Ident(i) => { s.push_str(i); self.bump(); }
            Tok::Punct(b'.') => { s.push('.'); self.bump(); }
            Tok::Punct(c) => { s.push(*c as char); self.bump(); }
            _ => { self.bump(); }
          }
        }
        self.eat_punct(b'>');
        (s, true)
      }
      _ => { self.skip_to_pp_end(); return None; }
    };
    self.skip_to_pp_end();
    Some(Def::CInclude(Spanned::new(span, CIncludeDef { path, angle_bracket: angle })))
  }

  fn parse_define(&mut self, _sink: &mut impl DiagnosticSink) -> Option<Def> {
    let span = self.span();
    let Some(name) = self.ident().map(str::to_owned) else { self.skip_to_pp_end(); return None };
    let sym = intern(&name);
    self.bump();
    // function-like macros (`#define F(x) ...`, no space before '(') carry
    // no useful type guess; record them as untyped and move on.
    if *self.cur() == Tok::Punct(b'(') {
      self.macro_types.insert(sym, None);
      self.skip_to_pp_end();
      return Some(Def::CDefine(Spanned::new(span, CDefineDef { name: sym, guessed_ty: None, value_tokens: Vec::new() })));
    }
    let mut value_tokens = Vec::new();
    let guessed = self.determine_pp_define_type(&mut value_tokens);
    self.skip_to_pp_end();
    self.macro_types.insert(sym, guessed.clone());
    Some(Def::CDefine(Spanned::new(span, CDefineDef { name: sym, guessed_ty: guessed, value_tokens })))
  }

  /// Best-effort type guess from a `#define`'s replacement tokens: an
  /// integer/float/string/char literal implies its own type; a bare
  /// identifier reuses whatever type was guessed for it earlier.
  fn determine_pp_define_type(&mut self, out: &mut Vec<String>) -> Option<TypeExpr> {
    let mut guessed = None;
    let mut first = true;
    loop {
      match self.cur().clone() {
        Tok::PpEnd | Tok::Eof => break,
        Tok::Int(v) => { out.push(v.to_string()); if first { guessed = Some(named("i32")); } self.bump(); }
        Tok::Float(v) => { out.push(v.to_string()); if first { guessed = Some(named("double")); } self.bump(); }
        Tok::Str(s) => { out.push(s); if first { guessed = Some(TypeExpr::Pointer(Box::new(named_const("char")))); } self.bump(); }
        Tok::Char(c) => { out.push(c.to_string()); if first { guessed = Some(named("i8")); } self.bump(); }
        Tok::Ident(id) => {
          out.push(id.clone());
          if first { guessed = self.macro_types.get(&intern(&id)).cloned().flatten(); }
          self.bump();
        }
        _ => { self.bump(); }
      }
      first = false;
    }
    guessed
  }

  // -- top level -----------------------------------------------------

  pub fn parse(src: &str, filename: Rc<PathBuf>, ignore: &'a HashSet<Symbol>, sink: &mut impl DiagnosticSink) -> Vec<Def> {
    let mut toks = Vec::new();
    let mut lexer = CLexer::new(src, filename.clone());
    loop {
      let t = lexer.next();
      let is_eof = t.kind == Tok::Eof;
      // An `#include <...>` path needs raw scanning once we've seen the
      // directive name, since `<`/`>` are ordinary punctuation otherwise;
      // detect that shape here, before the general token stream is built.
      toks.push(t);
      if is_eof { break; }
    }
    let mut p = CHeaderParser {
      toks, pos: 0, filename, ignore,
      macro_types: hashbrown::HashMap::new(), anon_counter: 0, pending_aggregates: Vec::new(),
    };
    p.parse_module(sink)
  }

  /// spec.md's header-parser supplement: a whole file wrapped in
  /// `#ifndef GUARD` / `#define GUARD` / ... / `#endif` is unwrapped
  /// rather than treated as a conditional block.
  fn parse_module(&mut self, sink: &mut impl DiagnosticSink) -> Vec<Def> {
    let guard = if self.is_guard_opener() {
      self.bump(); // Hash
      self.bump(); // ifndef
      let name = self.ident().map(str::to_owned);
      self.skip_to_pp_end();
      if *self.cur() == Tok::Hash {
        let m = self.mark();
        self.bump();
        if self.is_ident("define") {
          self.bump();
          if self.ident().map(str::to_owned) == name {
            self.skip_to_pp_end();
          } else {
            self.reset(m);
          }
        } else {
          self.reset(m);
        }
      }
      name
    } else { None };

    let mut defs = Vec::new();
    while !self.at_end() {
      let def = self.parse_top(sink);
      defs.append(&mut self.pending_aggregates);
      if let Some(def) = def { defs.push(def); }
    }
    if let Some(name) = guard {
      defs.retain(|d| !matches!(d, Def::CDefine(Spanned { k: CDefineDef { name: n, .. }, .. }) if *n == intern(&name)));
    }
    defs
  }

  fn is_guard_opener(&self) -> bool {
    self.toks.get(self.pos).map(|t| &t.kind) == Some(&Tok::Hash)
      && self.toks.get(self.pos + 1).map(|t| &t.kind) == Some(&Tok::Ident("ifndef".into()))
  }

  fn parse_top(&mut self, sink: &mut impl DiagnosticSink) -> Option<Def> {
    self.skip_attributes();
    match self.cur().clone() {
      Tok::Hash => self.parse_pp_directive(sink),
      Tok::Ident(id) if id == "typedef" => { self.bump(); self.parse_typedef(sink) }
      Tok::Ident(id) if id == "struct" || id == "union" => self.parse_aggregate_decl(sink),
      Tok::Ident(id) if id == "enum" => self.parse_enum_decl(sink),
      Tok::Ident(id) if self.ignore.contains(&intern(&id)) => {
        self.bump();
        if *self.cur() == Tok::Punct(b'(') { self.skip_matching_paren(); }
        self.eat_punct(b';');
        None
      }
      Tok::Eof => None,
      _ => self.parse_function_or_global(sink),
    }
  }

  // -- type specifiers -------------------------------------------------

  /// Collect a run of C type-specifier keywords and qualifiers, returning
  /// the resolved [`TypeExpr`] plus whether `const` appeared anywhere
  /// (tracked but, like the rest of this crate, not surfaced as a
  /// separate IR type).
  fn parse_type_specifiers(&mut self, sink: &mut impl DiagnosticSink) -> CResult<TypeExpr> {
    let mut specs: ArrayVec<&'static str, 6> = ArrayVec::new();
    loop {
      self.skip_attributes();
      match self.ident() {
        Some("const") | Some("volatile") | Some("_Atomic") => { self.bump(); }
        Some(s) if TYPE_SPECIFIERS.contains(&s) => { specs.push(intern_static(s)); self.bump(); }
        _ => break,
      }
    }
    if !specs.is_empty() {
      return Ok(named(c_integer_name(&specs)));
    }
    match self.cur().clone() {
      Tok::Ident(id) if KW_TYPES.contains(&id.as_str()) => {
        self.bump();
        Ok(named(match id.as_str() { "float" => "float", "double" => "double", "_Bool" => "bool", _ => "void" }))
      }
      Tok::Ident(id) if id == "struct" || id == "union" => self.parse_aggregate_typeexpr(sink),
      Tok::Ident(id) if id == "enum" => {
        self.bump();
        let name = self.ident().map(str::to_owned).unwrap_or_default();
        self.bump();
        Ok(named(Box::leak(name.into_boxed_str())))
      }
      Tok::Ident(id) => { self.bump(); Ok(TypeExpr::Named { namespace: None, name: intern(&id) }) }
      _ => { self.err(sink, "expected a type"); Err(()) }
    }
  }

  /// An inline `struct { ... }` / `struct Name { ... }` used as a type
  /// expression (as opposed to a standalone declaration): emits the
  /// aggregate as its own top-level decl under a synthesized name when
  /// anonymous, and returns a reference to it.
  fn parse_aggregate_typeexpr(&mut self, sink: &mut impl DiagnosticSink) -> CResult<TypeExpr> {
    let is_union = self.is_ident("union");
    self.bump();
    let name = self.ident().map(str::to_owned);
    if name.is_some() { self.bump(); }
    if *self.cur() == Tok::Punct(b'{') {
      let resolved_name = name.clone().unwrap_or_else(|| self.fresh_anon("anonymous"));
      let fields = self.parse_field_list(sink)?;
      self.pending_aggregates.push(if is_union {
        Def::CUnion(Spanned::new(self.span(), CUnionDef { name: intern(&resolved_name), fields, opaque: false }))
      } else {
        Def::CStruct(Spanned::new(self.span(), CStructDef { name: intern(&resolved_name), fields, opaque: false }))
      });
      Ok(TypeExpr::Named { namespace: None, name: intern(&resolved_name) })
    } else {
      let name = name.unwrap_or_default();
      Ok(TypeExpr::Named { namespace: None, name: intern(&name) })
    }
  }

  fn fresh_anon(&mut self, kind: &str) -> String {
    self.anon_counter += 1;
    format!("_anonymous_{kind}_{}", self.anon_counter)
  }

  /// Trailing `*`/array suffixes applied to a base type expression.
  fn parse_declarator_suffixes(&mut self, mut ty: TypeExpr) -> TypeExpr {
    while self.eat_punct(b'*') {
      self.skip_attributes();
      while matches!(self.ident(), Some("const") | Some("volatile") | Some("restrict")) { self.bump(); }
      ty = TypeExpr::Pointer(Box::new(ty));
    }
    ty
  }

  // -- struct / union --------------------------------------------------

  fn parse_aggregate_decl(&mut self, sink: &mut impl DiagnosticSink) -> Option<Def> {
    let span = self.span();
    let is_union = self.is_ident("union");
    self.bump();
    self.skip_attributes();
    let name = self.ident().map(str::to_owned);
    if name.is_some() { self.bump(); }
    self.skip_attributes();

    if *self.cur() != Tok::Punct(b'{') {
      // forward declaration: `struct foo;`
      self.skip_to_end_of_declaration();
      let Some(name) = name else { return None };
      return Some(if is_union {
        Def::CUnion(Spanned::new(span, CUnionDef { name: intern(&name), fields: Vec::new(), opaque: true }))
      } else {
        Def::CStruct(Spanned::new(span, CStructDef { name: intern(&name), fields: Vec::new(), opaque: true }))
      });
    }
    let resolved_name = name.unwrap_or_else(|| self.fresh_anon("struct"));
    let fields = match self.parse_field_list(sink) { Ok(f) => f, Err(()) => { self.skip_to_end_of_declaration(); return None; } };
    self.skip_attributes();
    self.eat_punct(b';');
    Some(if is_union {
      Def::CUnion(Spanned::new(span, CUnionDef { name: intern(&resolved_name), fields, opaque: false }))
    } else {
      Def::CStruct(Spanned::new(span, CStructDef { name: intern(&resolved_name), fields, opaque: false }))
    })
  }

  fn parse_field_list(&mut self, sink: &mut impl DiagnosticSink) -> CResult<Vec<(TypeExpr, Symbol)>> {
    self.expect_punct(b'{', sink);
    let mut fields = Vec::new();
    while *self.cur() != Tok::Punct(b'}') && !self.at_end() {
      if *self.cur() == Tok::Hash { self.skip_pp_line(); continue; }
      self.skip_attributes();
      let base = self.parse_type_specifiers(sink)?;
      loop {
        let ty = self.parse_declarator_suffixes(base.clone());
        self.skip_attributes();
        let (name, ty) = match self.ident() {
          Some(id) => { let id = id.to_string(); self.bump(); (id, ty) }
          None => (self.fresh_anon("field"), ty),
        };
        let ty = self.parse_array_suffix(ty, sink);
        // `unsigned x : 4;` bitfield width: not modeled as a distinct IR
        // shape, just skipped.
        if self.eat_punct(b':') { let _ = self.parse_type_specifiers(sink); self.skip_to_pp_end_or_comma(); }
        fields.push((ty, intern(&name)));
        if !self.eat_punct(b',') { break; }
      }
      self.skip_attributes();
      self.expect_punct(b';', sink);
    }
    self.expect_punct(b'}', sink);
    Ok(fields)
  }

  fn skip_to_pp_end_or_comma(&mut self) {
    while !matches!(self.cur(), Tok::Punct(b',') | Tok::Punct(b';') | Tok::Eof) { self.bump(); }
  }

  fn parse_array_suffix(&mut self, ty: TypeExpr, sink: &mut impl DiagnosticSink) -> TypeExpr {
    if !self.eat_punct(b'[') { return ty; }
    let n = if let Tok::Int(v) = self.cur().clone() { self.bump(); v as i128 } else { 0 };
    self.expect_punct(b']', sink);
    TypeExpr::Array(Box::new(ty), Box::new(Expr::Literal(Literal::Int(n))))
  }

  // -- enum -------------------------------------------------------------

  fn parse_enum_decl(&mut self, sink: &mut impl DiagnosticSink) -> Option<Def> {
    let span = self.span();
    self.bump();
    let name = self.ident().map(str::to_owned);
    if name.is_some() { self.bump(); }
    if *self.cur() != Tok::Punct(b'{') {
      self.skip_to_end_of_declaration();
      return name.map(|n| Def::CEnum(Spanned::new(span, CEnumDef { name: intern(&n), variants: Vec::new() })));
    }
    self.bump();
    let mut variants = Vec::new();
    while *self.cur() != Tok::Punct(b'}') && !self.at_end() {
      if *self.cur() == Tok::Hash { self.skip_pp_line(); continue; }
      let Some(vname) = self.ident().map(str::to_owned) else { self.bump(); continue };
      self.bump();
      let value = if self.eat_punct(b'=') {
        let v = self.parse_const_int();
        Some(v)
      } else { None };
      variants.push((intern(&vname), value));
      if !self.eat_punct(b',') { break; }
    }
    self.expect_punct(b'}', sink);
    let resolved_name = name.unwrap_or_else(|| self.fresh_anon("enum"));
    self.eat_punct(b';');
    Some(Def::CEnum(Spanned::new(span, CEnumDef { name: intern(&resolved_name), variants })))
  }

  /// A best-effort constant-expression reader for enumerator values:
  /// handles a single literal, optionally negated, and otherwise skips
  /// whatever's there and reports no value (mirrors the original's
  /// `skip_expression` — full constant folding is out of scope).
  fn parse_const_int(&mut self) -> Option<i64> {
    let neg = self.eat_punct(b'-');
    let v = if let Tok::Int(v) = self.cur().clone() { self.bump(); Some(v as i64) } else { None };
    while !matches!(self.cur(), Tok::Punct(b',') | Tok::Punct(b'}') | Tok::Eof) { self.bump(); }
    v.map(|v| if neg { -v } else { v })
  }

  // -- typedef ------------------------------------------------------------

  fn parse_typedef(&mut self, sink: &mut impl DiagnosticSink) -> Option<Def> {
    let span = self.span();
    if self.looks_like_function_pointer_typedef() {
      let base = match self.parse_type_specifiers(sink) { Ok(t) => t, Err(()) => { self.skip_to_end_of_declaration(); return None } };
      let ret = self.parse_declarator_suffixes(base);
      self.expect_punct(b'(', sink);
      self.expect_punct(b'*', sink);
      let name = self.ident().map(str::to_owned).unwrap_or_default();
      self.bump();
      self.expect_punct(b')', sink);
      let (args, variadic) = self.parse_arg_list(sink);
      self.eat_punct(b';');
      return Some(Def::CTypedef(Spanned::new(span, CTypedefDef {
        name: intern(&name),
        ty: TypeExpr::CFunctionPointer { ret: Box::new(ret), args: args.into_iter().map(|(t, _)| t).collect(), variadic },
      })));
    }
    let base = match self.parse_type_specifiers(sink) { Ok(t) => t, Err(()) => { self.skip_to_end_of_declaration(); return None } };
    let ty = self.parse_declarator_suffixes(base);
    self.skip_attributes();
    let Some(name) = self.ident().map(str::to_owned) else { self.skip_to_end_of_declaration(); return None };
    self.bump();
    let ty = self.parse_array_suffix(ty, sink);
    self.skip_attributes();
    self.eat_punct(b';');
    Some(Def::CTypedef(Spanned::new(span, CTypedefDef { name: intern(&name), ty })))
  }

  fn looks_like_function_pointer_typedef(&self) -> bool {
    // Scan ahead for `(` `*` without consuming: cheap enough given
    // typedefs are short, and avoids needing real backtracking state.
    let mut i = self.pos;
    let mut depth = 0;
    while let Some(t) = self.toks.get(i) {
      match &t.kind {
        Tok::Punct(b'(') => { if depth == 0 { return self.toks.get(i + 1).map(|t| &t.kind) == Some(&Tok::Punct(b'*')); } depth += 1; }
        Tok::Punct(b';') | Tok::Eof => return false,
        _ => {}
      }
      i += 1;
    }
    false
  }

  // -- function / global decl ---------------------------------------------

  fn parse_function_or_global(&mut self, sink: &mut impl DiagnosticSink) -> Option<Def> {
    let span = self.span();
    let mut flags = DeclFlags::empty();
    loop {
      match self.ident() {
        Some("extern") => { flags |= DeclFlags::EXTERN; self.bump(); }
        Some("static") => { flags |= DeclFlags::STATIC; self.bump(); }
        Some("inline" | "__inline" | "__inline__") => { flags |= DeclFlags::INLINE; self.bump(); }
        _ => break,
      }
    }
    // Linkage and inlining don't change a declaration's shape at this
    // layer; only its visibility across translation units, which this
    // crate doesn't model.
    log::trace!("C declaration flags: {flags:?}");
    self.skip_attributes();
    let base = match self.parse_type_specifiers(sink) { Ok(t) => t, Err(()) => { self.skip_to_end_of_declaration(); return None } };
    let ty = self.parse_declarator_suffixes(base);
    self.skip_attributes();
    let Some(name) = self.ident().map(str::to_owned) else { self.skip_to_end_of_declaration(); return None };
    self.bump();
    self.skip_attributes();

    if *self.cur() == Tok::Punct(b'(') {
      let (args, variadic) = self.parse_arg_list(sink);
      self.skip_attributes();
      if *self.cur() == Tok::Punct(b'{') {
        self.skip_braced();
      } else {
        self.eat_punct(b';');
      }
      return Some(Def::CFunction(Spanned::new(span, CFunctionDef { name: intern(&name), args, variadic, ret: ty })));
    }
    let ty = self.parse_array_suffix(ty, sink);
    self.skip_attributes();
    if self.eat_punct(b'=') {
      // skip the initializer; globals aren't given values at this layer.
      let mut depth = 0;
      loop {
        match self.cur() {
          Tok::Punct(b'{' | b'(') => { depth += 1; self.bump(); }
          Tok::Punct(b'}' | b')') => { depth -= 1; self.bump(); }
          Tok::Punct(b';') if depth <= 0 => break,
          Tok::Eof => break,
          _ => { self.bump(); }
        }
      }
    }
    self.eat_punct(b';');
    Some(Def::CGlobal(Spanned::new(span, CGlobalDef { name: intern(&name), ty })))
  }

  fn parse_arg_list(&mut self, sink: &mut impl DiagnosticSink) -> (Vec<(TypeExpr, Option<Symbol>)>, bool) {
    self.expect_punct(b'(', sink);
    let mut args = Vec::new();
    let mut variadic = false;
    // `(void)` is an empty argument list, not a single `void`-typed arg.
    if self.is_ident("void") {
      let m = self.mark();
      self.bump();
      if *self.cur() == Tok::Punct(b')') { self.bump(); return (args, false); }
      self.reset(m);
    }
    while *self.cur() != Tok::Punct(b')') && !self.at_end() {
      if self.cur().clone() == Tok::Ellipsis { self.bump(); variadic = true; break; }
      let base = match self.parse_type_specifiers(sink) { Ok(t) => t, Err(()) => break };
      let mut ty = self.parse_declarator_suffixes(base);
      let name = if self.looks_like_arg_function_pointer() {
        self.expect_punct(b'(', sink);
        self.expect_punct(b'*', sink);
        let n = self.ident().map(str::to_owned);
        if n.is_some() { self.bump(); }
        self.expect_punct(b')', sink);
        let (fargs, fvariadic) = self.parse_arg_list(sink);
        ty = TypeExpr::CFunctionPointer { ret: Box::new(ty), args: fargs.into_iter().map(|(t, _)| t).collect(), variadic: fvariadic };
        n
      } else {
        let n = self.ident().map(str::to_owned);
        if n.is_some() { self.bump(); }
        n
      };
      let ty = self.parse_array_suffix(ty, sink);
      args.push((ty, name.map(|n| intern(&n))));
      if !self.eat_punct(b',') { break; }
    }
    self.expect_punct(b')', sink);
    (args, variadic)
  }

  fn looks_like_arg_function_pointer(&self) -> bool {
    *self.cur() == Tok::Punct(b'(') && self.toks.get(self.pos + 1).map(|t| &t.kind) == Some(&Tok::Punct(b'*'))
  }
}

fn named(name: &'static str) -> TypeExpr { TypeExpr::Named { namespace: None, name: intern(name) } }
fn named_const(name: &'static str) -> TypeExpr { named(name) }
fn intern_static(s: &'static str) -> &'static str { s }

/// Map a run of C integer-type-specifier keywords onto one of this
/// crate's canonical primitive names (spec.md §5's primitive table),
/// the same names [`crate::declare`] resolves for source-language code.
fn c_integer_name(specs: &[&str]) -> &'static str {
  let has = |s: &str| specs.contains(&s);
  let unsigned = has("unsigned");
  if has("char") { return if unsigned { "u8" } else { "i8" }; }
  if has("short") { return if unsigned { "u16" } else { "i16" }; }
  if has("long") && specs.iter().filter(|s| **s == "long").count() >= 2 {
    return if unsigned { "u64" } else { "i64" };
  }
  if has("long") { return if unsigned { "u64" } else { "i64" }; }
  if unsigned { "u32" } else { "i32" }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::CollectingSink;

  fn parse(src: &str) -> Vec<Def> {
    let mut sink = CollectingSink::default();
    let ignore = HashSet::new();
    let file = Rc::new(PathBuf::from("<header>"));
    CHeaderParser::parse(src, file, &ignore, &mut sink)
  }

  #[test]
  fn parses_plain_struct() {
    let defs = parse("struct point { int x; int y; };");
    assert_eq!(defs.len(), 1);
    assert!(matches!(&defs[0], Def::CStruct(s) if s.k.fields.len() == 2 && !s.k.opaque));
  }

  #[test]
  fn parses_opaque_forward_decl() {
    let defs = parse("struct handle;");
    assert!(matches!(&defs[0], Def::CStruct(s) if s.k.opaque));
  }

  #[test]
  fn parses_function_prototype_with_varargs() {
    let defs = parse("int printf(const char *fmt, ...);");
    assert!(matches!(&defs[0], Def::CFunction(f) if f.k.variadic && f.k.args.len() == 1));
  }

  #[test]
  fn parses_typedef_function_pointer() {
    let defs = parse("typedef int (*callback)(int, int);");
    assert!(matches!(&defs[0], Def::CTypedef(t) if matches!(t.k.ty, TypeExpr::CFunctionPointer { .. })));
  }

  #[test]
  fn parses_anonymous_union_member() {
    let defs = parse("struct s { union { int i; float f; }; int tag; };");
    assert_eq!(defs.len(), 2);
    assert!(matches!(&defs[0], Def::CUnion(_)));
    assert!(matches!(&defs[1], Def::CStruct(s) if s.k.fields.len() == 2));
  }

  #[test]
  fn include_guard_is_unwrapped() {
    let defs = parse("#ifndef FOO_H\n#define FOO_H\nint x;\n#endif\n");
    assert_eq!(defs.len(), 1);
    assert!(matches!(&defs[0], Def::CGlobal(_)));
  }

  #[test]
  fn nested_if_block_is_skipped() {
    let defs = parse("#if 0\n#if 1\nint dead;\n#endif\n#endif\nint alive;\n");
    assert_eq!(defs.len(), 1);
  }

  #[test]
  fn define_guesses_int_type() {
    let defs = parse("#define MAX 100\n");
    assert!(matches!(&defs[0], Def::CDefine(d) if matches!(d.k.guessed_ty, Some(TypeExpr::Named { .. }))));
  }

  #[test]
  fn attribute_is_skipped() {
    let defs = parse("int f(void) __attribute__((noreturn));");
    assert!(matches!(&defs[0], Def::CFunction(_)));
  }
}
