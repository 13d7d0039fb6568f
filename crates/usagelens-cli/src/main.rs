//! CLI entry point for UsageLens.
//!
//! This binary provides the `usagelens` command: `serve` runs the MCP server
//! on stdio, `run` invokes a single tool, `intents` lists the tools and
//! `status` reports configuration.

mod cli;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use usagelens_intent::IntentRegistry;
use usagelens_mcp::{McpServer, render_error, render_summary};

use crate::cli::{Cli, Commands, LogFormat};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Values from .env become defaults for the env-backed flags.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to read .env"),
    }

    match cli.command {
        Commands::Serve { settings } => cmd_serve(settings).await,
        Commands::Run {
            tool,
            params,
            json,
            settings,
        } => cmd_run(settings, &tool, &params, json).await,
        Commands::Intents { json } => cmd_intents(json),
        Commands::Status { settings } => cmd_status(&settings),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(settings: Settings) -> Result<()> {
    let orchestrator = settings.orchestrator()?;
    info!(
        api_base = %settings.api_base,
        call_timeout_secs = settings.call_timeout_secs,
        cascade_budget_secs = settings.cascade_budget_secs,
        "starting MCP server on stdio"
    );

    let server = Arc::new(McpServer::new(Arc::new(orchestrator)));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = usagelens_mcp::serve(server, stdin, stdout) => {
            result.context("MCP session failed")?;
            info!("client disconnected");
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted; shutting down"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(settings: Settings, tool: &str, params: &str, json: bool) -> Result<()> {
    let args: Value = serde_json::from_str(params).context("--params is not valid JSON")?;
    let orchestrator = settings.orchestrator()?;

    match orchestrator.invoke(tool, &args).await {
        Ok(summary) if json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Ok(summary) => {
            println!("{}", render_summary(&summary));
            Ok(())
        }
        Err(err) => bail!(render_error(&err)),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: intents
// ---------------------------------------------------------------------------

fn cmd_intents(json: bool) -> Result<()> {
    let registry = IntentRegistry::new();

    if json {
        let tools: Vec<Value> = registry
            .entries()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.tool_name,
                    "description": entry.description,
                    "inputSchema": entry.schema.to_json_schema(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!();
    for entry in registry.entries() {
        println!("  {}", entry.tool_name);
        println!("      {}", entry.description);
        let params: Vec<String> = entry
            .schema
            .params()
            .iter()
            .map(|p| {
                if p.required {
                    format!("{}*", p.name)
                } else {
                    p.name.to_string()
                }
            })
            .collect();
        if !params.is_empty() {
            println!("      params: {}", params.join(", "));
        }
        println!("      e.g. {}", entry.example);
    }
    println!();
    println!("  * required");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

fn cmd_status(settings: &Settings) -> Result<()> {
    let registry = IntentRegistry::new();

    println!();
    println!("  UsageLens Status");
    println!("  ================");
    println!();
    println!("  Integration key:  {}", settings.key_status());
    println!("  API base:         {}", settings.api_base);
    println!("  Call timeout:     {}s", settings.call_timeout_secs);
    println!("  Cascade budget:   {}s", settings.cascade_budget_secs);
    println!("  Tools:            {}", registry.entries().count());
    println!();

    if settings.key_status() != "configured" {
        println!("  Set PENDO_INTEGRATION_KEY in your environment or .env to enable queries.");
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize tracing on stderr; stdout is reserved for tool output and the
/// MCP stream.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
