//! Thin wrapper around `simplelog`. Nothing in the compilation pipeline
//! calls this directly (a library has no business configuring global
//! logging for its host process); it exists for driver binaries, and for
//! this crate's own tests and doctests, to opt in with one call.

use simplelog::{Config, LevelFilter, TermLogger, TerminalMode, ColorChoice};

/// Initialize a terminal logger at the given level. Safe to call more than
/// once; later calls are ignored once a global logger is installed.
pub fn init_logger(level: LevelFilter) {
  let _ = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
}
