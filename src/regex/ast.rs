//! The regex AST produced by the embedded regex sub-parser (spec.md §3
//! "Regex AST", §4.4).

use crate::symbol::Symbol;

/// An inclusive codepoint range `[low, high]` inside a character class.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CharRange {
  pub low: u32,
  pub high: u32,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Anchor { Start, End, WordBoundary }

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RegexAst {
  Literal(char),
  Dot,
  CharClass { inverted: bool, ranges: Vec<CharRange> },
  Alternation(Vec<RegexAst>),
  Sequence(Vec<RegexAst>),
  /// `{min, max}`; `max = None` means unbounded.
  Quantifier { min: u32, max: Option<u32>, body: Box<RegexAst> },
  /// `name = None` for an anonymous capturing group, `(?:...)` is instead
  /// represented by leaving the child ungrouped (see the parser).
  Group { name: Option<Symbol>, body: Box<RegexAst> },
  /// Not produced by the surface parser (spec.md §4.4: "only in the
  /// compiler"); constructed internally when the compiler needs to
  /// desugar a trailing assertion.
  PositiveLookahead(Box<RegexAst>),
  Anchor(Anchor),
}

impl RegexAst {
  /// The ordered list of named capturing groups beneath this node,
  /// left-to-right, used to build the matcher's named output slots
  /// (spec.md §6 "Regex matcher ABI").
  pub fn named_groups(&self, out: &mut Vec<Symbol>) {
    match self {
      RegexAst::Group { name: Some(n), body } => { out.push(*n); body.named_groups(out); }
      RegexAst::Group { name: None, body } |
      RegexAst::Quantifier { body, .. } |
      RegexAst::PositiveLookahead(body) => body.named_groups(out),
      RegexAst::Alternation(xs) | RegexAst::Sequence(xs) =>
        for x in xs { x.named_groups(out); }
      RegexAst::Literal(_) | RegexAst::Dot | RegexAst::CharClass { .. } | RegexAst::Anchor(_) => {}
    }
  }

  /// The total number of capturing groups beneath this node (including
  /// itself), in the order the matcher assigns indices.
  #[must_use] pub fn group_count(&self) -> usize {
    match self {
      RegexAst::Group { body, .. } => 1 + body.group_count(),
      RegexAst::Quantifier { body, .. } | RegexAst::PositiveLookahead(body) => body.group_count(),
      RegexAst::Alternation(xs) | RegexAst::Sequence(xs) =>
        xs.iter().map(RegexAst::group_count).sum(),
      RegexAst::Literal(_) | RegexAst::Dot | RegexAst::CharClass { .. } | RegexAst::Anchor(_) => 0,
    }
  }
}
