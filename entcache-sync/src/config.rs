//! Codec configuration, loadable from a TOML file.
//!
//! ```toml
//! [codec]
//! json_keys = "REFERENCED | REFERENCING"
//! max_depth = 3
//! page_size = 50
//! max_page_size = 1000
//! skip_own_notifications = true
//! fetch_timeout_ms = 30000
//! ```

use crate::policy::{JsonKeys, JsonPolicy};
use crate::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default page size when a page index is requested without a size.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Upper bound for requested page sizes and list windows.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

/// Default time allowed for one notification re-fetch.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Codec-wide defaults. Per-request headers override the policy fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Default traversal directions.
    pub json_keys: JsonKeys,
    /// Default traversal bound; `None` is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    pub page_size: usize,
    pub max_page_size: usize,
    /// Ignore push notifications caused by the local user's own writes.
    pub skip_own_notifications: bool,
    /// Timeout for one notification re-fetch (ms).
    pub fetch_timeout_ms: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            json_keys: JsonKeys::default(),
            max_depth: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            skip_own_notifications: true,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

/// Raw TOML structure: settings live under a `[codec]` table.
#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    codec: CodecConfig,
}

impl CodecConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> CodecResult<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| CodecError::Config(e.to_string()))?;
        Ok(file.codec)
    }

    /// Loads the configuration from a file, falling back to defaults when
    /// the file is missing or cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No codec config found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!("Loaded codec config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse codec config {:?}: {}. Using defaults.", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read codec config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Renders the configuration as a TOML document.
    pub fn to_toml_string(&self) -> CodecResult<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            codec: &'a CodecConfig,
        }
        toml::to_string(&Out { codec: self }).map_err(|e| CodecError::Config(e.to_string()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Baseline policy for requests that carry no policy headers.
    pub fn policy(&self) -> JsonPolicy {
        JsonPolicy {
            keys: self.json_keys,
            max_depth: self.max_depth,
            full_json: false,
        }
    }
}
