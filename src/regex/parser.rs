//! Regex sub-parser (spec.md §4.4, first paragraph).
//!
//! Grounded on `examples/original_source/frontend/reparser.py`: the
//! surface grammar accepted is a subset of PCRE — literals, `.`, character
//! classes with ranges and an optional leading `^` for inversion, groups,
//! non-capturing groups, named groups, alternation, quantifiers, and
//! anchors. Positive lookahead is deliberately not exposed here (spec.md
//! §4.4: "only in the compiler, not exposed by the parser here"); it is
//! only ever constructed internally by [`crate::regex::compile`].

use crate::symbol::intern;
use super::ast::{Anchor, CharRange, RegexAst};

pub struct RegexParseError {
  pub message: String,
  pub offset: usize,
}

pub struct RegexParser<'a> {
  chars: Vec<char>,
  pos: usize,
  src: &'a str,
}

type PResult<T> = Result<T, RegexParseError>;

impl<'a> RegexParser<'a> {
  #[must_use] pub fn new(src: &'a str) -> Self {
    RegexParser { chars: src.chars().collect(), pos: 0, src }
  }

  pub fn parse(mut self) -> PResult<RegexAst> {
    let ast = self.parse_alternation()?;
    if self.pos != self.chars.len() {
      return Err(self.err(format!("unexpected `{}`", self.chars[self.pos])));
    }
    Ok(ast)
  }

  fn err(&self, message: String) -> RegexParseError {
    RegexParseError { message, offset: self.pos }
  }

  fn peek(&self) -> Option<char> { self.chars.get(self.pos).copied() }
  fn bump(&mut self) -> Option<char> { let c = self.peek(); if c.is_some() { self.pos += 1; } c }
  fn eat(&mut self, c: char) -> bool {
    if self.peek() == Some(c) { self.pos += 1; true } else { false }
  }

  fn parse_alternation(&mut self) -> PResult<RegexAst> {
    let mut branches = vec![self.parse_sequence()?];
    while self.eat('|') { branches.push(self.parse_sequence()?); }
    Ok(if branches.len() == 1 { branches.pop().unwrap() } else { RegexAst::Alternation(branches) })
  }

  fn parse_sequence(&mut self) -> PResult<RegexAst> {
    let mut items = Vec::new();
    while let Some(c) = self.peek() {
      if c == '|' || c == ')' { break }
      items.push(self.parse_quantified()?);
    }
    Ok(match items.len() { 1 => items.pop().unwrap(), _ => RegexAst::Sequence(items) })
  }

  fn parse_quantified(&mut self) -> PResult<RegexAst> {
    let atom = self.parse_atom()?;
    match self.peek() {
      Some('*') => { self.bump(); Ok(self.quant(atom, 0, None)) }
      Some('+') => { self.bump(); Ok(self.quant(atom, 1, None)) }
      Some('?') => { self.bump(); Ok(self.quant(atom, 0, Some(1))) }
      Some('{') => self.parse_counted_quantifier(atom),
      _ => Ok(atom),
    }
  }

  fn quant(&self, body: RegexAst, min: u32, max: Option<u32>) -> RegexAst {
    RegexAst::Quantifier { min, max, body: Box::new(body) }
  }

  fn parse_counted_quantifier(&mut self, atom: RegexAst) -> PResult<RegexAst> {
    self.bump(); // '{'
    let min = self.parse_number()?;
    let max = if self.eat(',') {
      if self.peek() == Some('}') { None } else { Some(self.parse_number()?) }
    } else {
      Some(min)
    };
    if !self.eat('}') { return Err(self.err("expected `}` to close quantifier".into())) }
    Ok(self.quant(atom, min, max))
  }

  fn parse_number(&mut self) -> PResult<u32> {
    let start = self.pos;
    while self.peek().is_some_and(|c| c.is_ascii_digit()) { self.pos += 1; }
    if start == self.pos { return Err(self.err("expected a number".into())) }
    self.chars[start..self.pos].iter().collect::<String>().parse()
      .map_err(|_| self.err("quantifier count out of range".into()))
  }

  fn parse_atom(&mut self) -> PResult<RegexAst> {
    match self.bump() {
      Some('.') => Ok(RegexAst::Dot),
      Some('^') => Ok(RegexAst::Anchor(Anchor::Start)),
      Some('$') => Ok(RegexAst::Anchor(Anchor::End)),
      Some('[') => self.parse_class(),
      Some('(') => self.parse_group(),
      Some('\\') => self.parse_escape(),
      Some(c) => Ok(RegexAst::Literal(c)),
      None => Err(self.err("unexpected end of pattern".into())),
    }
  }

  fn parse_escape(&mut self) -> PResult<RegexAst> {
    match self.bump() {
      Some('b') => Ok(RegexAst::Anchor(Anchor::WordBoundary)),
      Some('n') => Ok(RegexAst::Literal('\n')),
      Some('t') => Ok(RegexAst::Literal('\t')),
      Some('r') => Ok(RegexAst::Literal('\r')),
      Some(c) => Ok(RegexAst::Literal(c)),
      None => Err(self.err("dangling backslash".into())),
    }
  }

  fn parse_group(&mut self) -> PResult<RegexAst> {
    if self.eat('?') {
      if self.eat(':') {
        let body = self.parse_alternation()?;
        if !self.eat(')') { return Err(self.err("expected `)`".into())) }
        return Ok(body);
      }
      if self.eat('<') {
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '>') { self.pos += 1; }
        let name: String = self.chars[start..self.pos].iter().collect();
        if !self.eat('>') { return Err(self.err("expected `>` to close group name".into())) }
        let body = self.parse_alternation()?;
        if !self.eat(')') { return Err(self.err("expected `)`".into())) }
        return Ok(RegexAst::Group { name: Some(intern(&name)), body: Box::new(body) });
      }
      return Err(self.err("unsupported group modifier".into()));
    }
    let body = self.parse_alternation()?;
    if !self.eat(')') { return Err(self.err("expected `)`".into())) }
    Ok(RegexAst::Group { name: None, body: Box::new(body) })
  }

  fn parse_class(&mut self) -> PResult<RegexAst> {
    let inverted = self.eat('^');
    let mut ranges = Vec::new();
    while self.peek().is_some_and(|c| c != ']') {
      let lo = self.class_char()?;
      let range = if self.peek() == Some('-') && self.chars.get(self.pos + 1) != Some(&']') {
        self.bump();
        let hi = self.class_char()?;
        CharRange { low: lo as u32, high: hi as u32 }
      } else {
        CharRange { low: lo as u32, high: lo as u32 }
      };
      ranges.push(range);
    }
    if !self.eat(']') { return Err(self.err("expected `]` to close character class".into())) }
    Ok(RegexAst::CharClass { inverted, ranges })
  }

  fn class_char(&mut self) -> PResult<char> {
    match self.bump() {
      Some('\\') => match self.bump() {
        Some('n') => Ok('\n'), Some('t') => Ok('\t'), Some('r') => Ok('\r'),
        Some(c) => Ok(c),
        None => Err(self.err("dangling backslash in character class".into())),
      },
      Some(c) => Ok(c),
      None => Err(self.err("unterminated character class".into())),
    }
  }
}

/// Parse a regex literal's inner text (without the delimiting `/`s) into
/// an AST.
pub fn parse_regex(src: &str) -> PResult<RegexAst> { RegexParser::new(src).parse() }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn literal_sequence() {
    let ast = parse_regex("abc").unwrap();
    assert_eq!(ast, RegexAst::Sequence(vec![
      RegexAst::Literal('a'), RegexAst::Literal('b'), RegexAst::Literal('c'),
    ]));
  }

  #[test]
  fn named_group_and_quantifier() {
    let ast = parse_regex("(?<n>[0-9]+)").unwrap();
    let mut names = Vec::new();
    ast.named_groups(&mut names);
    assert_eq!(names, vec![intern("n")]);
    assert_eq!(ast.group_count(), 1);
  }

  #[test]
  fn counted_quantifier_unbounded() {
    let ast = parse_regex("a{3,}").unwrap();
    match ast {
      RegexAst::Quantifier { min: 3, max: None, .. } => {}
      other => panic!("unexpected ast: {other:?}"),
    }
  }

  #[test]
  fn alternation_with_anchors() {
    let ast = parse_regex("^a|b$").unwrap();
    assert_eq!(ast, RegexAst::Alternation(vec![
      RegexAst::Sequence(vec![RegexAst::Anchor(Anchor::Start), RegexAst::Literal('a')]),
      RegexAst::Sequence(vec![RegexAst::Literal('b'), RegexAst::Anchor(Anchor::End)]),
    ]));
  }
}
