//! Command-line interface definitions.
//!
//! - `Cli`, `Commands`: argument structure via clap
//! - `Display`: styled terminal output, separate from tracing diagnostics

mod commands;
mod display;

pub use commands::{Cli, Commands, StatusFilterArg};
pub use display::Display;
