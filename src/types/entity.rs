//! The `Entity` type, describing every name a module can export: types,
//! functions, globals, and constants, each tracked through the
//! "forward-declared, then typed" two-pass idiom spec.md §4.5 describes.
//!
//! Grounded on the teacher's own `entity.rs`: the same `ForwardDeclared` /
//! `Typed(..)` shape per kind, unioned into one `Entity` enum because (as
//! the teacher's comment on its analogous enum puts it) these all live in
//! one namespace, so user types and functions cannot name-overlap.

use crate::symbol::{Symbol, intern, init_dense_symbol_map};
use super::ir::Ty;
use super::span::{FileSpan, Spanned};

macro_rules! make_keywords {
  {$($(#[$attr0:meta])* enum $name:ident {
    $($(#[$attr:meta])* $x:ident: $e:expr,)*
  })* } => {
    $(
      $(#[$attr0])*
      #[derive(Debug, PartialEq, Eq, Copy, Clone)]
      pub enum $name { $($(#[$attr])* $x),* }

      impl $name {
        /// Evaluate a function on all elements of the type, with their names.
        pub fn scan(#[allow(unused)] mut f: impl FnMut(Self, &'static str)) {
          $(f($name::$x, $e);)*
        }
        /// Convert a string into this type.
        #[allow(clippy::should_implement_trait)]
        #[must_use] pub fn from_str(s: &str) -> Option<Self> {
          match s {
            $($e => Some(Self::$x),)*
            _ => None
          }
        }

        /// Get this keyword/builtin for an already-interned symbol.
        #[must_use] pub fn from_symbol(s: Symbol) -> Option<Self> {
          thread_local! {
            static MAP: std::cell::RefCell<Option<Box<[Option<$name>]>>> = const { std::cell::RefCell::new(None) };
          }
          MAP.with(|m| {
            let mut m = m.borrow_mut();
            let table = m.get_or_insert_with(|| init_dense_symbol_map(&[$((intern($e), $name::$x)),*]));
            table.get(s.into_usize()).copied().flatten()
          })
        }
      }
    )*
  }
}

make_keywords! {
  /// Reserved words (spec.md §4.1 "Tokens").
  enum Keyword {
    If: "if", Else: "else", Type: "type", Match: "match", Case: "case",
    Cast: "cast", Let: "let", For: "for", While: "while", In: "in",
    Break: "break", Continue: "continue", Return: "return", Assert: "assert",
    Pass: "pass", Implicit: "implicit", Export: "export", Where: "where",
    Null: "null", True: "true", False: "false", On: "on", Union: "union",
  }

  /// The four built-in modules implicitly imported into `implicit`
  /// (spec.md §4.2 "Import semantics").
  enum BuiltinModule {
    String: "string", SymbolMod: "symbol", Context: "context", Range: "range",
  }
}

/// The distinguished namespace that holds the current module and any
/// unqualified imports (spec.md §3 "Namespaces").
#[must_use] pub fn implicit_namespace() -> Symbol { intern("implicit") }

#[derive(Clone, Debug)]
pub enum TypeTc {
  ForwardDeclared,
  Typed(TypeTy),
}

impl TypeTc {
  #[must_use] pub fn ty(&self) -> Option<&TypeTy> {
    match self { TypeTc::ForwardDeclared => None, TypeTc::Typed(ty) => Some(ty) }
  }
}

/// A (possibly sum-typed) user type definition, once its shape is known.
#[derive(Clone, Debug)]
pub struct TypeTy {
  pub ty: Ty,
}

#[derive(Clone, Debug)]
pub enum FuncTc {
  ForwardDeclared,
  Typed(FuncTy),
}

impl FuncTc {
  #[must_use] pub fn ty(&self) -> Option<&FuncTy> {
    match self { FuncTc::ForwardDeclared => None, FuncTc::Typed(ty) => Some(ty) }
  }
}

#[derive(Clone, Debug)]
pub struct FuncTy {
  pub implicit_args: Vec<(Symbol, Ty)>,
  pub args: Vec<(Symbol, Ty)>,
  pub ret: Ty,
}

#[derive(Clone, Debug)]
pub enum GlobalTc {
  ForwardDeclared,
  Checked(Ty),
}

#[derive(Clone, Debug)]
pub enum ConstTc {
  ForwardDeclared,
  Checked { ty: Ty },
}

/// An operator, function, or type. These all live in one namespace so
/// user types and functions cannot name-overlap, mirroring the teacher's
/// own `Entity` enum.
#[derive(Clone, Debug)]
pub enum Entity {
  Type(Spanned<TypeTc>),
  Func(Spanned<FuncTc>),
  Global(Spanned<GlobalTc>),
  Const(Spanned<ConstTc>),
}

impl Entity {
  #[must_use] pub fn span(&self) -> &FileSpan {
    match self {
      Entity::Type(Spanned { span, .. }) |
      Entity::Func(Spanned { span, .. }) |
      Entity::Global(Spanned { span, .. }) |
      Entity::Const(Spanned { span, .. }) => span,
    }
  }

  #[must_use] pub fn is_resolved(&self) -> bool {
    match self {
      Entity::Type(s) => matches!(s.k, TypeTc::Typed(_)),
      Entity::Func(s) => matches!(s.k, FuncTc::Typed(_)),
      Entity::Global(s) => matches!(s.k, GlobalTc::Checked(_)),
      Entity::Const(s) => matches!(s.k, ConstTc::Checked { .. }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keyword_lookup_by_symbol() {
    assert_eq!(Keyword::from_symbol(intern("while")), Some(Keyword::While));
    assert_eq!(Keyword::from_symbol(intern("banana")), None);
  }

  #[test]
  fn builtin_module_lookup() {
    assert_eq!(BuiltinModule::from_str("range"), Some(BuiltinModule::Range));
  }
}
