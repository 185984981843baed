//! CLI subcommands

pub mod create;
pub mod options;
