//! The matcher ABI (spec.md §6 "Regex matcher ABI"). The matcher itself is
//! an external collaborator — only its call-site contract lives here. The
//! generated IR function for a regex literal calls through this trait;
//! a concrete backtracking implementation is supplied by whatever embeds
//! this crate at code-generation/runtime time.

/// One match attempt starting at bytecode position `pc` and input
/// position `sp`. `captures` is pre-sized to the regex's group count and
/// is filled in with `(begin, end)` byte offsets for every group that
/// participated in the match.
pub trait RegexRuntime {
  fn run_match(
    &self,
    bytecode: &[u8],
    input: &[u8],
    pc: usize,
    sp: usize,
    captures: &mut [Option<(usize, usize)>],
  ) -> MatchResult;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MatchResult {
  pub matched: bool,
  pub next_pc: usize,
  pub next_sp: usize,
}
