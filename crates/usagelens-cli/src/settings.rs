//! Connection and timing settings.
//!
//! Every value can come from a flag or its environment variable; `.env` is
//! loaded into the environment before parsing.  The integration key is never
//! printed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use usagelens_adapters::{DEFAULT_BASE_URL, PendoClient};
use usagelens_engine::{EngineConfig, Orchestrator};
use usagelens_intent::IntentRegistry;

/// Collaborator id used in logs.
const COLLABORATOR_ID: &str = "pendo";

#[derive(Args, Clone)]
pub struct Settings {
    /// Pendo integration key, sent on every request.
    #[arg(long, env = "PENDO_INTEGRATION_KEY", hide_env_values = true)]
    pub integration_key: Option<String>,

    /// Pendo API base URL.
    #[arg(long, env = "PENDO_API_BASE", default_value = DEFAULT_BASE_URL)]
    pub api_base: String,

    /// Timeout for a single Pendo call, in seconds.
    #[arg(
        long,
        env = "USAGELENS_CALL_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub call_timeout_secs: u64,

    /// Wall-clock budget for one tool invocation including fallbacks, in
    /// seconds.
    #[arg(
        long,
        env = "USAGELENS_CASCADE_BUDGET_SECS",
        default_value_t = 90,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub cascade_budget_secs: u64,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("integration_key", &self.key_status())
            .field("api_base", &self.api_base)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .field("cascade_budget_secs", &self.cascade_budget_secs)
            .finish()
    }
}

impl Settings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_call_timeout(Duration::from_secs(self.call_timeout_secs))
            .with_cascade_budget(Duration::from_secs(self.cascade_budget_secs))
    }

    /// `configured` or `not set`; never the key itself.
    pub fn key_status(&self) -> &'static str {
        match self.integration_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => "configured",
            _ => "not set",
        }
    }

    /// Build the Pendo-backed orchestrator.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let key = self
            .integration_key
            .as_deref()
            .context("PENDO_INTEGRATION_KEY is not set; export it or add it to .env")?;
        let client = PendoClient::with_base_url(COLLABORATOR_ID, key, &self.api_base)
            .context("failed to create the Pendo client")?;
        Ok(Orchestrator::new(
            Arc::new(IntentRegistry::new()),
            Arc::new(client),
            self.engine_config(),
        ))
    }
}
