//! CLI subcommand implementations.

pub mod streaks;
pub mod track;
