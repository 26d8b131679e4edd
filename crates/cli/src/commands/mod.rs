//! CLI subcommand implementations

pub mod models;
pub mod serving;
pub mod train;
