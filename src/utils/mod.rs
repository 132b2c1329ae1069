//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Captured process output and command-line display
//! - `io` - File I/O and digests with consistent error handling
//! - `shell` - Quoting for display of argument vectors
//! - `template` - `{{outputs.NAME}}` reference parsing and rendering
//! - `validation` - Input validation helpers

pub mod command;
pub mod io;
pub mod shell;
pub mod template;
pub mod validation;
