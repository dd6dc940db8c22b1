//! Presence tracker CLI library.
//!
//! This crate provides the CLI interface, configuration and output writers
//! for the `pt` binary.

mod cli;
pub mod commands;
mod config;
pub mod output;

pub use cli::{Cli, Commands, StreaksArgs, TrackArgs};
pub use config::Config;
