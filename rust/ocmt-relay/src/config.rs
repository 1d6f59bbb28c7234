use anyhow::{anyhow, Result};
use std::path::PathBuf;
use url::Url;

/// Everything the relay reads from flags or environment, resolved once at
/// startup and carried inside the state handle thereafter.
#[derive(Clone, Debug)]
pub struct RelayConfiguration {
    /// Storage location; `None` runs on in-memory storage (development only)
    pub storage_path: Option<PathBuf>,
    /// Agent server base URL; wake-on-arrival is disabled without it
    pub agent_server_url: Option<Url>,
    pub agent_server_token: Option<String>,
    /// Mesh audit sink; events are logged locally when unset
    pub mesh_audit_url: Option<Url>,
    /// Explicit CORS allow-list; there is deliberately no `*` fallback
    pub allowed_origins: Vec<String>,
    /// Hot-path cap per container per minute
    pub messages_per_minute: u64,
    /// DB-backed cap per container per [RelayConfiguration::rate_limit_window_ms]
    pub messages_per_hour: u64,
    pub rate_limit_window_ms: u64,
    /// General API cap per client address per hour
    pub requests_per_hour: u64,
    pub forward_timeout_ms: u64,
    pub forward_max_retries: u32,
    /// Pending messages older than this flip to expired
    pub message_ttl_hours: u64,
}

impl Default for RelayConfiguration {
    fn default() -> Self {
        RelayConfiguration {
            storage_path: None,
            agent_server_url: None,
            agent_server_token: None,
            mesh_audit_url: None,
            allowed_origins: Vec::new(),
            messages_per_minute: 100,
            messages_per_hour: 100,
            rate_limit_window_ms: 60 * 60 * 1000,
            requests_per_hour: 1000,
            forward_timeout_ms: 10_000,
            forward_max_retries: 2,
            message_ttl_hours: 24,
        }
    }
}

impl RelayConfiguration {
    /// Wake coordination needs both the agent server URL and its token;
    /// anything else is a configuration mistake worth failing loudly over
    pub fn agent_server(&self) -> Result<Option<(Url, String)>> {
        match (&self.agent_server_url, &self.agent_server_token) {
            (Some(url), Some(token)) => Ok(Some((url.clone(), token.clone()))),
            (None, None) => Ok(None),
            _ => Err(anyhow!(
                "AGENT_SERVER_URL and AGENT_SERVER_TOKEN must be configured together"
            )),
        }
    }
}
