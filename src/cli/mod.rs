//! Process entrypoint: argument parsing and subcommand dispatch.

mod commands;

pub use commands::{is_verbose, run};
