//! CLI argument definitions for UsageLens.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use clap::{Parser, Subcommand, ValueEnum};

use crate::settings::Settings;

/// UsageLens -- product analytics tools for language models.
#[derive(Parser)]
#[command(
    name = "usagelens",
    version,
    about = "UsageLens -- product analytics tools for language models",
    long_about = "Answers product-analytics questions against Pendo through a fixed set of \
                  tools, falling back to broader queries when the first one finds nothing."
)]
pub struct Cli {
    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the tools over MCP on stdin/stdout.
    Serve {
        #[command(flatten)]
        settings: Settings,
    },

    /// Invoke one tool and print its summary.
    Run {
        /// Tool name, e.g. `analyze_usage`.
        tool: String,

        /// Tool arguments as a JSON object.
        #[arg(long, short, default_value = "{}")]
        params: String,

        /// Print the summary as JSON instead of text.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        settings: Settings,
    },

    /// List the available tools and their parameters.
    Intents {
        /// Print each tool's input schema as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show configuration status without contacting the service.
    Status {
        #[command(flatten)]
        settings: Settings,
    },
}
