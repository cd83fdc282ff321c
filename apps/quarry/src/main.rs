//! # Quarry
//!
//! Command-line front-end of the Quarry graph knowledge database.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  apps/quarry (THE BINARY)                 │
//! │                                                           │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │    CLI      │   │   Config     │   │   Documents   │   │
//! │  │   (clap)    │   │   (toml)     │   │ (serde_json)  │   │
//! │  └──────┬──────┘   └──────┬───────┘   └───────┬───────┘   │
//! │         └─────────────────┼───────────────────┘           │
//! │                           ▼                               │
//! │                   ┌───────────────┐                       │
//! │                   │  quarry-core  │                       │
//! │                   │ (THE ALGEBRA) │                       │
//! │                   └───────────────┘                       │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! quarry init
//! quarry define -f schema.json
//! quarry insert -f people.json --json-mode
//! quarry compile -f query.json --target steps --mode insert
//! quarry --set log.level=debug --set log.output=[stdout,file] status
//! ```

use clap::Parser;
use quarry::cli;
use quarry::config::{Config, LogConfig};
use quarry::logging;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    let config = match Config::load(cli.config.as_deref(), &cli.overrides) {
        Ok(config) => config,
        Err(e) => {
            // Fall back to stdout logging so the failure is still reported.
            let _ = logging::init(&LogConfig::default());
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config.log) {
        let _ = logging::init(&LogConfig::default());
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = cli::execute(cli, &config) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
