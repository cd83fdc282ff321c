//! # Quarry CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create an empty database
//! - `status` - Show concept counts
//! - `define` / `undefine` - Schema writes from a pattern document
//! - `insert` / `delete` - Data writes from a pattern document
//! - `compile` - Show what a pattern compiles to, without writing
//! - `config` - Print the resolved configuration

mod commands;

use crate::config::{Config, Override};
use crate::error::AppError;
use clap::{Parser, Subcommand, ValueEnum};
use quarry_core::WriteMode;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Quarry - graph knowledge database
///
/// Patterns are read from JSON documents and compiled by quarry-core.
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the bundled config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override a config option, e.g. `--set log.level=debug`
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub overrides: Vec<Override>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show database status
    Status,

    /// Define schema concepts from a pattern document
    Define {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Undefine schema concepts from a pattern document
    Undefine {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Insert data from a pattern document
    Insert {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete data described by a pattern document
    Delete {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Compile a pattern document without touching the database
    Compile {
        #[arg(short, long)]
        file: PathBuf,

        /// Compilation target
        #[arg(short, long, value_enum, default_value = "fragments")]
        target: Target,

        /// Write mode, for the `steps` target
        #[arg(short, long, value_enum, default_value = "insert")]
        mode: Mode,
    },

    /// Print the resolved configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Target {
    /// Traversal fragments, per conjunct
    Fragments,
    /// Ordered write steps, per conjunct
    Steps,
    /// Reasoner atoms, per conjunct
    Atoms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Define,
    Undefine,
    Insert,
    Delete,
}

impl From<Mode> for WriteMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Define => Self::Define,
            Mode::Undefine => Self::Undefine,
            Mode::Insert => Self::Insert,
            Mode::Delete => Self::Delete,
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI against a loaded configuration.
pub fn execute(cli: Cli, config: &Config) -> Result<(), AppError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(config, force),
        Some(Commands::Define { file }) => cmd_write(config, json_mode, WriteMode::Define, &file),
        Some(Commands::Undefine { file }) => {
            cmd_write(config, json_mode, WriteMode::Undefine, &file)
        }
        Some(Commands::Insert { file }) => cmd_write(config, json_mode, WriteMode::Insert, &file),
        Some(Commands::Delete { file }) => cmd_write(config, json_mode, WriteMode::Delete, &file),
        Some(Commands::Compile { file, target, mode }) => {
            cmd_compile(json_mode, &file, target, mode.into())
        }
        Some(Commands::Config) => cmd_config(config, json_mode),
        Some(Commands::Status) | None => cmd_status(config, json_mode),
    }
}
