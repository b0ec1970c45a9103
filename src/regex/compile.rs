//! Turn a [`RegexAst`] into the bytecode described in spec.md §4.4, and
//! (for testing) decompile bytecode back into an AST.
//!
//! Forward jump offsets are resolved by backpatching after the relevant
//! subtree has been emitted, exactly as spec.md's invariants section
//! requires ("regex bytecode's forward jumps never overflow the code
//! buffer").

use byteorder::{LittleEndian as LE, ByteOrder};
use crate::symbol::Symbol;
use super::ast::{Anchor, RegexAst};
use super::bytecode::*;

/// A compiled regex: its bytecode and the names of its capturing groups in
/// index order (spec.md §6: "named for named groups, positional slots for
/// the rest, named slots sorted lexicographically" is a property of the
/// *matcher's output tuple*, computed by [`crate::typeck`] from this list,
/// not baked into the bytecode itself).
pub struct RegexProgram {
  pub bytecode: Vec<u8>,
  pub group_names: Vec<Option<Symbol>>,
}

struct Compiler {
  buf: Vec<u8>,
  group_names: Vec<Option<Symbol>>,
}

/// Compile a regex AST into bytecode plus its capture group name table.
#[must_use]
pub fn compile(ast: &RegexAst) -> RegexProgram {
  let mut c = Compiler { buf: Vec::new(), group_names: Vec::new() };
  c.emit(ast);
  RegexProgram { bytecode: c.buf, group_names: c.group_names }
}

impl Compiler {
  fn emit(&mut self, ast: &RegexAst) {
    match ast {
      RegexAst::Literal(ch) => self.emit_literal(*ch),
      RegexAst::Dot => self.buf.push(DOT),
      RegexAst::Anchor(Anchor::Start) => self.buf.push(ANCHOR_START),
      RegexAst::Anchor(Anchor::End) => self.buf.push(ANCHOR_END),
      RegexAst::Anchor(Anchor::WordBoundary) => self.buf.push(ANCHOR_WORD),
      RegexAst::CharClass { inverted, ranges } => {
        self.buf.push(if *inverted { CHARCLASS_INV } else { CHARCLASS });
        let mut lenbuf = [0; 2];
        LE::write_u16(&mut lenbuf, u16::try_from(ranges.len()).expect("too many class ranges"));
        self.buf.extend_from_slice(&lenbuf);
        for r in ranges {
          let mut b = [0; 8];
          LE::write_u32(&mut b[0..4], r.low);
          LE::write_u32(&mut b[4..8], r.high);
          self.buf.extend_from_slice(&b);
        }
      }
      RegexAst::Sequence(items) => {
        self.buf.push(SEQUENCE);
        let len_pos = self.reserve_u32();
        let start = self.buf.len();
        for item in items { self.emit(item); }
        self.patch_u32(len_pos, u32::try_from(self.buf.len() - start).expect("regex body too large"));
      }
      RegexAst::Alternation(branches) => self.emit_alternation(branches),
      RegexAst::Quantifier { min, max, body } => {
        self.buf.push(QUANTIFIER);
        let mut b = [0; 5];
        LE::write_u32(&mut b[0..4], *min);
        b[4] = max.map_or(QUANTIFIER_UNBOUNDED, |m| u8::try_from(m).expect("quantifier max too large"));
        self.buf.extend_from_slice(&b);
        let len_pos = self.reserve_u32();
        let start = self.buf.len();
        self.emit(body);
        self.patch_u32(len_pos, u32::try_from(self.buf.len() - start).expect("regex body too large"));
      }
      RegexAst::Group { name, body } => {
        let index = self.group_names.len();
        self.group_names.push(*name);
        self.buf.push(CAPTURING_GROUP);
        let mut idxbuf = [0; 2];
        LE::write_u16(&mut idxbuf, u16::try_from(index).expect("too many capture groups"));
        self.buf.extend_from_slice(&idxbuf);
        let len_pos = self.reserve_u32();
        let start = self.buf.len();
        self.emit(body);
        self.patch_u32(len_pos, u32::try_from(self.buf.len() - start).expect("regex body too large"));
      }
      RegexAst::PositiveLookahead(body) => {
        self.buf.push(POSITIVE_LOOKAHEAD);
        let len_pos = self.reserve_u32();
        let start = self.buf.len();
        self.emit(body);
        self.patch_u32(len_pos, u32::try_from(self.buf.len() - start).expect("regex body too large"));
      }
    }
  }

  fn emit_literal(&mut self, ch: char) {
    if ch.is_ascii() && (ch as u32) < u32::from(MAX_LITERAL_BYTE) {
      self.buf.push(ch as u8);
    } else {
      // Outside the raw-byte range: represent as a singleton class so the
      // bytecode stays byte-addressed without losing the codepoint.
      self.emit(&RegexAst::CharClass { inverted: false, ranges: vec![super::ast::CharRange {
        low: ch as u32, high: ch as u32,
      }]});
    }
  }

  /// `ALTERNATION(left, jmp_after_right, right)`: the jump operand sits
  /// right after the tag so a matcher that fails `left` can skip straight
  /// to `right` without first measuring `left`'s length.
  fn emit_alternation(&mut self, branches: &[RegexAst]) {
    if let [single] = branches { return self.emit(single) }
    let (first, rest) = branches.split_first().expect("alternation has no branches");
    self.buf.push(ALTERNATION);
    let len_pos = self.reserve_u32();
    let start = self.buf.len();
    self.emit(first);
    self.patch_u32(len_pos, u32::try_from(self.buf.len() - start).expect("regex body too large"));
    self.emit_alternation(rest);
  }

  fn reserve_u32(&mut self) -> usize {
    let pos = self.buf.len();
    self.buf.extend_from_slice(&[0; 4]);
    pos
  }

  fn patch_u32(&mut self, pos: usize, value: u32) {
    LE::write_u32(&mut self.buf[pos..pos + 4], value);
  }
}

/// Decompile bytecode back into an AST, used by the round-trip test
/// (spec.md §8 "for every regex AST A, decompile(compile(A)) yields an
/// AST equivalent up to RESequence nesting normalization"). Not used by
/// the compiler proper.
#[must_use]
pub fn decompile(bytecode: &[u8]) -> RegexAst {
  let mut d = Decompiler { buf: bytecode, group_names: Vec::new() };
  let (ast, pos) = d.decode(0);
  assert_eq!(pos, bytecode.len(), "trailing bytes after decompiling regex bytecode");
  ast
}

struct Decompiler<'a> {
  buf: &'a [u8],
  group_names: Vec<Option<Symbol>>,
}

impl Decompiler<'_> {
  fn decode(&mut self, pos: usize) -> (RegexAst, usize) {
    let tag = self.buf[pos];
    match tag {
      DOT => (RegexAst::Dot, pos + 1),
      ANCHOR_START => (RegexAst::Anchor(Anchor::Start), pos + 1),
      ANCHOR_END => (RegexAst::Anchor(Anchor::End), pos + 1),
      ANCHOR_WORD => (RegexAst::Anchor(Anchor::WordBoundary), pos + 1),
      CHARCLASS | CHARCLASS_INV => {
        let len = LE::read_u16(&self.buf[pos + 1..pos + 3]) as usize;
        let mut ranges = Vec::with_capacity(len);
        let mut p = pos + 3;
        for _ in 0..len {
          let low = LE::read_u32(&self.buf[p..p + 4]);
          let high = LE::read_u32(&self.buf[p + 4..p + 8]);
          ranges.push(super::ast::CharRange { low, high });
          p += 8;
        }
        (RegexAst::CharClass { inverted: tag == CHARCLASS_INV, ranges }, p)
      }
      SEQUENCE => {
        let len = LE::read_u32(&self.buf[pos + 1..pos + 5]) as usize;
        let start = pos + 5;
        let end = start + len;
        let mut items = Vec::new();
        let mut p = start;
        while p < end { let (item, np) = self.decode(p); items.push(item); p = np; }
        (RegexAst::Sequence(items), end)
      }
      ALTERNATION => {
        let len_left = LE::read_u32(&self.buf[pos + 1..pos + 5]) as usize;
        let left_start = pos + 5;
        let (left, left_end) = self.decode(left_start);
        assert_eq!(left_end, left_start + len_left, "alternation left-branch length mismatch");
        let (right, end) = self.decode(left_end);
        let mut branches = vec![left];
        match right {
          RegexAst::Alternation(mut rest) => branches.append(&mut rest),
          other => branches.push(other),
        }
        (RegexAst::Alternation(branches), end)
      }
      QUANTIFIER => {
        let min = LE::read_u32(&self.buf[pos + 1..pos + 5]);
        let max_byte = self.buf[pos + 5];
        let max = if max_byte == QUANTIFIER_UNBOUNDED { None } else { Some(u32::from(max_byte)) };
        let len = LE::read_u32(&self.buf[pos + 6..pos + 10]) as usize;
        let start = pos + 10;
        let (body, end) = self.decode(start);
        assert_eq!(end, start + len, "quantifier body length mismatch");
        (RegexAst::Quantifier { min, max, body: Box::new(body) }, end)
      }
      CAPTURING_GROUP => {
        let index = LE::read_u16(&self.buf[pos + 1..pos + 3]) as usize;
        let len = LE::read_u32(&self.buf[pos + 3..pos + 7]) as usize;
        let start = pos + 7;
        let (body, end) = self.decode(start);
        assert_eq!(end, start + len, "capturing group body length mismatch");
        if self.group_names.len() <= index { self.group_names.resize(index + 1, None); }
        (RegexAst::Group { name: self.group_names[index], body: Box::new(body) }, end)
      }
      POSITIVE_LOOKAHEAD => {
        let len = LE::read_u32(&self.buf[pos + 1..pos + 5]) as usize;
        let start = pos + 5;
        let (body, end) = self.decode(start);
        assert_eq!(end, start + len, "lookahead body length mismatch");
        (RegexAst::PositiveLookahead(Box::new(body)), end)
      }
      byte => (RegexAst::Literal(char::from(byte)), pos + 1),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::regex::parser::parse_regex;

  fn roundtrip(src: &str) {
    let ast = parse_regex(src).unwrap();
    let prog = compile(&ast);
    let back = decompile(&prog.bytecode);
    assert_eq!(normalize(&ast), normalize(&back), "mismatch for {src:?}");
  }

  /// Flattens nested `Sequence`s so nesting differences don't fail the
  /// round-trip comparison (spec.md: "equivalent up to RESequence nesting
  /// normalization").
  fn normalize(ast: &RegexAst) -> RegexAst {
    match ast {
      RegexAst::Sequence(items) => {
        let mut out = Vec::new();
        for item in items {
          match normalize(item) {
            RegexAst::Sequence(mut inner) => out.append(&mut inner),
            other => out.push(other),
          }
        }
        if out.len() == 1 { out.pop().unwrap() } else { RegexAst::Sequence(out) }
      }
      RegexAst::Alternation(xs) => RegexAst::Alternation(xs.iter().map(normalize).collect()),
      RegexAst::Quantifier { min, max, body } =>
        RegexAst::Quantifier { min: *min, max: *max, body: Box::new(normalize(body)) },
      RegexAst::Group { name, body } => RegexAst::Group { name: *name, body: Box::new(normalize(body)) },
      RegexAst::PositiveLookahead(body) => RegexAst::PositiveLookahead(Box::new(normalize(body))),
      other => other.clone(),
    }
  }

  #[test] fn roundtrip_literal() { roundtrip("abc"); }
  #[test] fn roundtrip_class() { roundtrip("[a-z0-9]"); }
  #[test] fn roundtrip_alternation() { roundtrip("a|b|c"); }
  #[test] fn roundtrip_quantifier_unbounded() { roundtrip("a{3,}"); }
  #[test] fn roundtrip_named_group() { roundtrip("(?<n>[0-9]+)"); }
  #[test] fn roundtrip_anchors() { roundtrip("^a.b$"); }

  #[test]
  fn quantifier_unbounded_max_byte_is_255() {
    let ast = parse_regex("x{2,}").unwrap();
    let prog = compile(&ast);
    // tag, min(4), max(1) - max is the 6th byte.
    assert_eq!(prog.bytecode[5], QUANTIFIER_UNBOUNDED);
  }
}
