//! Front-end, type checker, and layout optimizer core for a small
//! systems-language compiler (spec.md §1 "Scope"): lexing, recursive-
//! descent parsing (including an embedded C-header sub-parser and a PCRE-
//! subset regex sub-parser), declaration/resolution of nominal types,
//! data-layout optimization, and type checking with IR lowering.
//!
//! This crate stops at typed IR (spec.md §1, §9 "Non-goals"): no codegen,
//! no C-toolchain invocation, no CLI. [`compile_modules`] is the one
//! entry point a driver needs; everything else is exposed for drivers
//! and tests that want finer-grained control over the pipeline.

pub mod symbol;
pub mod diag;
pub mod logging;
pub mod lexer;
pub mod parser;
pub mod cheader;
pub mod types;
pub mod declare;
pub mod layout;
pub mod typeck;
pub mod regex;

use std::path::PathBuf;
use std::rc::Rc;
use hashbrown::{HashMap, HashSet};
use crate::diag::DiagnosticSink;
use crate::layout::MachineDesc;
use crate::symbol::Symbol;
use crate::types::ast;
use crate::types::ir;

/// Replace every `CInclude` def in `module` with the `Def`s the header it
/// names actually contributes, recursively. declare.rs's pass 1 treats
/// `CInclude` as a no-op on the assumption that a header's declarations
/// already arrived as ordinary `CStruct`/`CFunction`/... defs (spec.md
/// §4.3); this is where that flattening happens, so it must run before
/// [`declare::declare_pass`] sees the module.
///
/// The only file I/O this crate performs: reading a header path a module
/// already named, not walking a source tree (spec.md §9 "Non-goals" rules
/// out general file-tree walking, not this).
fn expand_c_includes(module: &mut ast::Module, header_ignore: &HashSet<Symbol>, sink: &mut impl DiagnosticSink) {
  let base = module.filename.parent().map(std::path::Path::to_path_buf).unwrap_or_default();
  let mut out = Vec::with_capacity(module.defs.len());
  for def in std::mem::take(&mut module.defs) {
    if let ast::Def::CInclude(sp) = &def {
      let header_path = base.join(&sp.k.path);
      let Ok(src) = std::fs::read_to_string(&header_path) else {
        out.push(def);
        continue;
      };
      let header_defs = cheader::CHeaderParser::parse(&src, Rc::new(header_path), header_ignore, sink);
      let mut header_module = ast::Module { filename: module.filename.clone(), defs: header_defs };
      expand_c_includes(&mut header_module, header_ignore, sink);
      out.extend(header_module.defs);
    } else {
      out.push(def);
    }
  }
  module.defs = out;
}

/// Parse one source file from disk into an [`ast::Module`] (spec.md §4.1,
/// §4.2), with any `#include`d headers already flattened in. Convenience
/// for drivers and tests; not used by [`compile_modules`] itself, which
/// takes already-parsed modules so that file discovery and path
/// resolution for `import` statements stay a driver concern (spec.md §1).
pub fn parse_file(path: &std::path::Path, header_ignore: &HashSet<Symbol>, sink: &mut impl DiagnosticSink) -> std::io::Result<ast::Module> {
  let src = std::fs::read_to_string(path)?;
  let filename = Rc::new(path.to_path_buf());
  let tokens = lexer::Lexer::new(&src, filename.clone()).tokenize(sink);
  let mut module = parser::Parser::new(tokens, filename).parse_module(sink);
  expand_c_includes(&mut module, header_ignore, sink);
  Ok(module)
}

/// The single driver entry point (spec.md §2 "Pipeline", §9): declare
/// every module's types, resolve them, lay out data, then type check and
/// lower every function body. Returns the IR module map (spec.md §6
/// "Outputs"); regex matcher functions synthesized along the way are
/// appended directly to their owning module's `funcs`, not returned
/// through a side channel (spec.md §3 "Lifecycle").
#[must_use]
pub fn compile_modules(
  mut modules: Vec<ast::Module>,
  machine: &MachineDesc,
  header_ignore: &HashSet<Symbol>,
  sink: &mut impl DiagnosticSink,
) -> HashMap<Rc<PathBuf>, ir::Module> {
  for module in &mut modules {
    expand_c_includes(module, header_ignore, sink);
  }

  let mut ir_modules = declare::declare_pass(&modules);

  let filenames: Vec<Rc<PathBuf>> = modules.iter().map(|m| m.filename.clone()).collect();
  let filename_of = |p: &std::path::Path| filenames.iter().find(|f| f.as_path() == p).cloned();
  declare::resolve_pass(&mut ir_modules, &modules, machine, filename_of, sink);

  let all_sums: Vec<_> = ir_modules.values().flat_map(|m| m.sum_types.iter().cloned()).collect();
  layout::declare_datatype_layout(machine, &all_sums);

  for ast_module in &modules {
    typeck::typecheck_module(&mut ir_modules, ast_module, machine, sink);
  }

  ir_modules
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::CollectingSink;

  #[test]
  fn parse_file_reads_and_tokenizes_a_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mod.src");
    std::fs::write(&path, "fn main() { }\n").unwrap();
    let mut sink = CollectingSink::default();
    let module = parse_file(&path, &HashSet::new(), &mut sink).unwrap();
    assert!(!sink.has_errors());
    assert_eq!(module.defs.len(), 1);
  }

  #[test]
  fn compile_modules_returns_a_module_per_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.src");
    std::fs::write(&path, "").unwrap();
    let mut sink = CollectingSink::default();
    let module = parse_file(&path, &HashSet::new(), &mut sink).unwrap();
    let filename = module.filename.clone();
    let machine = MachineDesc::lp64();
    let out = compile_modules(vec![module], &machine, &HashSet::new(), &mut sink);
    assert!(out.contains_key(&filename));
  }
}
