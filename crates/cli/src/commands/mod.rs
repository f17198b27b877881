//! CLI subcommands

pub mod history;
pub mod status;
