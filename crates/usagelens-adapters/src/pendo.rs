//! Pendo REST API client.
//!
//! Runs aggregation pipelines against `/api/v1/aggregation` and fetches named
//! entities from `/api/v1/<kind>/<id>`.  Every request carries the
//! integration key in the `x-pendo-integration-key` header; the key never
//! appears in logs or `Debug` output.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use usagelens_intent::{PipelineSpec, ResourceLookup};

use crate::error::{ClientError, Result, TransportError};
use crate::traits::Collaborator;
use crate::wire;

/// Default Pendo API base URL.
pub const DEFAULT_BASE_URL: &str = "https://app.pendo.io";

/// Header carrying the integration key.
const KEY_HEADER: &str = "x-pendo-integration-key";

/// Connection establishment limit.  Whole-call deadlines belong to the
/// executor.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP collaborator backed by the Pendo API.
pub struct PendoClient {
    /// Unique identifier for this client instance.
    id: String,
    /// Opaque integration key.
    integration_key: String,
    /// Base URL for the API (default: `https://app.pendo.io`).
    base_url: Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for PendoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendoClient")
            .field("id", &self.id)
            .field("integration_key", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl PendoClient {
    /// Create a client for the default API base.
    pub fn new(id: &str, integration_key: &str) -> std::result::Result<Self, ClientError> {
        Self::with_base_url(id, integration_key, DEFAULT_BASE_URL)
    }

    /// Create a client for a custom API base, e.g. a regional instance.
    pub fn with_base_url(
        id: &str,
        integration_key: &str,
        base_url: &str,
    ) -> std::result::Result<Self, ClientError> {
        let integration_key = integration_key.trim();
        if integration_key.is_empty() {
            return Err(ClientError::MissingKey);
        }

        let trimmed = base_url.trim().trim_end_matches('/');
        let invalid = |reason: String| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };
        let base_url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(invalid("expected an http(s) URL".into()));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("usagelens/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            id: id.to_string(),
            integration_key: integration_key.to_string(),
            base_url,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    // -----------------------------------------------------------------------
    // URL construction helpers
    // -----------------------------------------------------------------------

    /// `path` resolved against the base, keeping any base path prefix.
    fn api_url(&self, path: &str, id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| TransportError::Unavailable {
                    reason: "API base URL cannot carry a path".into(),
                })?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(KEY_HEADER, &self.integration_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// Send a request and parse the JSON response, classifying failures.
    async fn send(&self, request: reqwest::RequestBuilder, resource: &str) -> Result<Value> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    seconds: CONNECT_TIMEOUT.as_secs(),
                }
            } else {
                TransportError::Unavailable {
                    reason: e.without_url().to_string(),
                }
            }
        })?;

        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Unavailable {
                reason: format!("failed to read response body: {}", e.without_url()),
            })?;

        if !status.is_success() {
            let err = match TransportError::from_status(status.as_u16(), &body, resource) {
                TransportError::RateLimited { .. } => {
                    TransportError::RateLimited { retry_after_secs }
                }
                other => other,
            };
            warn!(
                collaborator = %self.id,
                status = status.as_u16(),
                resource,
                error = %err,
                "analytics request failed"
            );
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|e| TransportError::ServerError {
            status: status.as_u16(),
            message: format!("response is not valid JSON: {e}"),
        })
    }
}

#[async_trait]
impl Collaborator for PendoClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute_pipeline(&self, spec: &PipelineSpec) -> Result<Vec<Value>> {
        let url = self.api_url(wire::AGGREGATION_PATH, None)?;
        let name = spec
            .source()
            .map(|s| format!("usagelens {s:?}"))
            .unwrap_or_else(|| "usagelens".into());
        let body = wire::aggregation_request(spec, &name);

        debug!(collaborator = %self.id, stages = spec.stages().len(), "running aggregation");
        let request = self.request(reqwest::Method::POST, url).json(&body);
        let data = self.send(request, wire::AGGREGATION_PATH).await?;

        match data.get("results") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(TransportError::ServerError {
                status: 200,
                message: format!("`results` is not a list: {other}"),
            }),
        }
    }

    async fn lookup_resource(&self, lookup: &ResourceLookup) -> Result<Value> {
        let url = self.api_url(&lookup.path, Some(&lookup.id))?;
        let resource = format!("{}/{}", lookup.path.trim_end_matches('/'), lookup.id);

        debug!(collaborator = %self.id, resource = %resource, "looking up resource");
        let request = self.request(reqwest::Method::GET, url);
        self.send(request, &resource).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
