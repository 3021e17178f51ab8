//! Configuration types and loading
//!
//! Two layers. The bootstrap TOML file holds what must exist before the
//! store does: listen address, state file path, primary upstream URL. The
//! per-request `AppConfig` is hydrated from the key-value store on every
//! request so admin mutations apply immediately, with no cache to
//! invalidate.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use kvstore::KvStore;
use rectifier::RectifierConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default primary upstream.
pub const DEFAULT_PRIMARY_URL: &str = "https://api.anthropic.com";

/// Default maximum cooldown when neither the store nor the environment says
/// otherwise (seconds).
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

/// Root bootstrap configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Bootstrap {
    pub server: ServerConfig,
    pub proxy: UpstreamConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub state_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8787".parse().expect("valid default addr"),
            state_path: PathBuf::from("gateway-state.json"),
        }
    }
}

/// Primary upstream settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub upstream_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_PRIMARY_URL.to_string(),
        }
    }
}

impl Bootstrap {
    /// Resolve the config path: CLI flag, then `GATEWAY_CONFIG`, then the
    /// conventional filename.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(path) = cli_path {
            return PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GATEWAY_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("gateway.toml")
    }

    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> common::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Upstream wire format of a fallback provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFormat {
    #[default]
    Anthropic,
    Openai,
}

/// One fallback provider, persisted under the `providers` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub auth_header: String,
    pub headers: BTreeMap<String, String>,
    pub model_mapping: BTreeMap<String, String>,
    pub format: ProviderFormat,
    pub disabled: bool,
    pub retry: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            auth_header: "x-api-key".to_string(),
            headers: BTreeMap::new(),
            model_mapping: BTreeMap::new(),
            format: ProviderFormat::Anthropic,
            disabled: false,
            retry: 0,
        }
    }
}

impl ProviderConfig {
    /// Required-field check applied at load and on admin writes.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("provider is missing a name".to_string());
        }
        if self.base_url.is_empty() {
            return Err(format!("provider {} is missing baseUrl", self.name));
        }
        if self.api_key.is_empty() {
            return Err(format!("provider {} is missing apiKey", self.name));
        }
        Ok(())
    }

    /// Gemini-style gateways are flagged by name so users can opt any
    /// endpoint into schema cleanup.
    pub fn wants_schema_cleanup(&self) -> bool {
        self.name.to_lowercase().contains("gemini")
    }

    /// Upstream model id after applying the mapping.
    pub fn map_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }
}

/// Ingress token; persisted entries may be bare strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenEntry {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl<'de> Deserialize<'de> for TokenEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bare(String),
            Full { token: String, note: Option<String> },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bare(token) => TokenEntry { token, note: None },
            Raw::Full { token, note } => TokenEntry { token, note },
        })
    }
}

/// Per-request configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub debug: bool,
    pub providers: Vec<ProviderConfig>,
    pub allowed_tokens: Vec<TokenEntry>,
    pub max_cooldown_secs: u64,
    pub anthropic_primary_disabled: bool,
    pub rectifier: RectifierConfig,
}

/// Hydrate the per-request config from the store.
///
/// The five keys are read concurrently. Any malformed entry degrades to its
/// default with a warning; a malformed provider entry is dropped
/// individually so one bad record cannot take the chain down.
pub async fn load_app_config(
    store: &dyn KvStore,
    debug: bool,
    default_cooldown_secs: u64,
) -> AppConfig {
    let (providers, tokens, cooldown, primary_disabled, rectifier) = tokio::join!(
        store.get("providers"),
        store.get("allowed_tokens"),
        store.get("cooldown_duration"),
        store.get("anthropic_primary_disabled"),
        store.get("rectifier_config"),
    );

    AppConfig {
        debug,
        providers: parse_providers(flatten(providers, "providers")),
        allowed_tokens: parse_tokens(flatten(tokens, "allowed_tokens")),
        max_cooldown_secs: parse_cooldown(flatten(cooldown, "cooldown_duration"))
            .unwrap_or(default_cooldown_secs),
        anthropic_primary_disabled: flatten(primary_disabled, "anthropic_primary_disabled")
            .map(|v| v.trim() == "true")
            .unwrap_or(false),
        rectifier: parse_rectifier(flatten(rectifier, "rectifier_config")),
    }
}

fn flatten(result: kvstore::Result<Option<String>>, key: &str) -> Option<String> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "store read failed, using default");
            None
        }
    }
}

pub(crate) fn parse_providers(raw: Option<String>) -> Vec<ProviderConfig> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "malformed providers entry, treating as empty");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let provider: ProviderConfig = match serde_json::from_value(entry) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(error = %e, "dropping unparseable provider entry");
                    return None;
                }
            };
            if let Err(reason) = provider.validate() {
                warn!(reason, "dropping invalid provider entry");
                return None;
            }
            Some(provider)
        })
        .collect()
}

fn parse_tokens(raw: Option<String>) -> Vec<TokenEntry> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(error = %e, "malformed allowed_tokens entry, treating as empty");
            Vec::new()
        }
    }
}

fn parse_cooldown(raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<f64>() {
        Ok(seconds) if seconds >= 0.0 => Some(seconds as u64),
        _ => {
            warn!(value = %raw, "malformed cooldown_duration entry, using default");
            None
        }
    }
}

fn parse_rectifier(raw: Option<String>) -> RectifierConfig {
    let Some(raw) = raw else {
        return RectifierConfig::default();
    };
    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "malformed rectifier_config entry, using defaults");
            RectifierConfig::default()
        }
    }
}
