//! Global string interning.
//!
//! Identifiers, keywords and namespace names all flow through here so that
//! every later stage can compare symbols by `u32` equality instead of
//! string equality. Interned strings are leaked for the lifetime of the
//! process, which is the same tradeoff a long-running compiler makes for
//! any table that is populated once and read for the rest of the run.

use std::cell::RefCell;
use hashbrown::HashMap;

/// An interned identifier. Two symbols are equal iff their underlying
/// strings are equal; comparing `Symbol`s never touches the string table.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl std::fmt::Debug for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self.as_str())
  }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Symbol {
  /// Index into the dense per-process symbol table. Only meaningful
  /// together with [`init_dense_symbol_map`].
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }

  #[must_use] pub fn as_str(self) -> &'static str {
    INTERNER.with(|i| i.borrow().strings[self.0 as usize])
  }
}

#[derive(Default)]
pub struct Interner {
  strings: Vec<&'static str>,
  map: HashMap<&'static str, Symbol>,
}

impl Interner {
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = Symbol(u32::try_from(self.strings.len()).expect("too many symbols"));
    self.strings.push(s);
    self.map.insert(s, sym);
    sym
  }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

/// Intern a string into the global table, returning its [`Symbol`].
pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

/// Build a dense lookup table from symbol to `T`, for keyword/builtin
/// tables that want `O(1)` access by [`Symbol::into_usize`] rather than a
/// hash lookup. Entries for symbols outside the table default to `None`.
#[must_use]
pub fn init_dense_symbol_map<T: Copy>(entries: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let len = entries.iter().map(|(s, _)| s.into_usize() + 1).max().unwrap_or(0);
  let mut map = vec![None; len].into_boxed_slice();
  for &(s, t) in entries { map[s.into_usize()] = Some(t); }
  map
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let a = intern("frobnicate");
    let b = intern("frobnicate");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "frobnicate");
  }

  #[test]
  fn distinct_strings_get_distinct_symbols() {
    assert_ne!(intern("foo"), intern("bar"));
  }
}
