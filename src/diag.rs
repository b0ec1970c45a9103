//! The diagnostic stream (spec.md §6 "Outputs", §7 "Error handling design").
//!
//! There are no exceptions here and nothing is fatal inside the core: a
//! lex error becomes an error token, a syntax error is recorded on the
//! parser and parsing continues past it, and a type error becomes a
//! `CompileError` IR node. The only thing every kind of error shares is
//! this struct.

use crate::types::span::FileSpan;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DiagKind {
  Lex,
  Syntax,
  Type,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub kind: DiagKind,
  pub span: FileSpan,
  pub message: String,
}

impl Diagnostic {
  #[must_use] pub fn new(kind: DiagKind, span: FileSpan, message: impl Into<String>) -> Self {
    Diagnostic { kind, span, message: message.into() }
  }
}

/// Something that can receive diagnostics as they are produced. The driver
/// decides, after inspecting the full stream, whether to proceed to
/// emission (spec.md §7) — that decision is not made in this crate.
pub trait DiagnosticSink {
  fn report(&mut self, d: Diagnostic);
}

/// The default sink: just remembers everything, for library callers and
/// tests that want to assert on the diagnostic list.
#[derive(Default, Debug)]
pub struct CollectingSink {
  pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink for CollectingSink {
  fn report(&mut self, d: Diagnostic) { self.diagnostics.push(d) }
}

impl CollectingSink {
  #[must_use] pub fn has_errors(&self) -> bool { !self.diagnostics.is_empty() }
}

/// A sink that forwards to the [`log`] facade (ambient logging stack) in
/// addition to collecting, so a driver that initializes `simplelog` (see
/// [`crate::logging`]) sees diagnostics show up in its log output too.
#[derive(Default, Debug)]
pub struct LoggingSink {
  pub inner: CollectingSink,
}

impl DiagnosticSink for LoggingSink {
  fn report(&mut self, d: Diagnostic) {
    match d.kind {
      DiagKind::Lex | DiagKind::Syntax => log::warn!("{:?} at {:?}: {}", d.kind, d.span.span, d.message),
      DiagKind::Type => log::error!("type error at {:?}: {}", d.span.span, d.message),
    }
    self.inner.report(d);
  }
}
