use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::schema::JobField;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json` (or the path given as first CLI argument).
//
// It is constructed exactly once at startup and passed by
// reference into the catalog, the extraction adapter and the
// sink connector. Nothing reads the environment after this.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Channel identifiers, in processing order
    pub channels: Vec<String>,

    /// Message source (relay) connection settings
    pub source: SourceConfig,

    /// Extraction service settings
    pub extraction: ExtractionConfig,

    /// Explicit list of sinks to connect at startup
    pub sinks: Vec<SinkConfig>,

    /// Skip live messages already covered by backfill.
    ///
    /// A live message is skipped when it is older than the last
    /// replayed message of its channel, or has the same timestamp
    /// and identical text.
    #[serde(default)]
    pub dedupe_boundary: bool,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Reads a JSON configuration file from disk and deserializes
    /// it into the strongly typed `Config` structure.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&data).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_json::from_str(data)?;
        Ok(cfg)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.debug
            .as_ref()
            .and_then(|d| d.metrics_interval_secs)
            .unwrap_or(60)
    }
}

// ------------------------------------------------------------
// Source configuration
// ------------------------------------------------------------
//
// The relay exposes channel history over HTTP and live delivery
// over a WebSocket.
//
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Base HTTP URL of the relay (resolution + history)
    pub api_url: String,

    /// WebSocket URL for live delivery
    pub live_url: String,

    /// Optional access token, sent as bearer / in the subscribe frame
    pub token: Option<String>,

    /// History page size
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    100
}

// ------------------------------------------------------------
// Extraction configuration
// ------------------------------------------------------------
//
// NOTES:
// - `api_key` is security-sensitive and must never be committed.
//   When absent it is read once from AZURE_OPENAI_API_KEY.
// - `fields` selects which job fields are extracted. Company name
//   and job role are always part of the schema.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Azure OpenAI resource endpoint (https://<name>.openai.azure.com)
    pub endpoint: String,

    /// Model deployment name
    pub deployment: String,

    /// REST API version (e.g. "2024-08-01-preview")
    pub api_version: String,

    pub api_key: Option<String>,

    /// Per-request timeout; unset means wait for the service
    pub request_timeout_secs: Option<u64>,

    pub fields: Option<Vec<JobField>>,
}

impl ExtractionConfig {
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var("AZURE_OPENAI_API_KEY")
            .context("extraction.api_key not set and AZURE_OPENAI_API_KEY missing")
    }
}

// ------------------------------------------------------------
// Sink configuration
// ------------------------------------------------------------
//
// One entry per destination table. A sink that fails to connect
// at startup is dropped; the others keep running.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Local CSV file, one row per record
    Csv { id: String, path: String },

    /// Redis list, one JSON array per record
    Redis { id: String, url: String, key: String },

    /// HTTP endpoint accepting `{"values": [...]}` (e.g. a sheet script)
    Webhook {
        id: String,
        url: String,
        token: Option<String>,
    },
}

impl SinkConfig {
    pub fn id(&self) -> &str {
        match self {
            SinkConfig::Csv { id, .. }
            | SinkConfig::Redis { id, .. }
            | SinkConfig::Webhook { id, .. } => id,
        }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Mirror log output into this file
    pub log_file: Option<String>,

    /// Interval of the metrics summary line (default 60s)
    pub metrics_interval_secs: Option<u64>,
}
