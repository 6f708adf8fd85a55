//! Engine configuration.
//!
//! [`EngineConfig`] carries the knobs a host can tune per session. It can be
//! built in code with the builder methods or loaded from JSON; missing fields
//! fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Viewport
// ---------------------------------------------------------------------------

/// Screen dimensions reported to `screen_width` / `screen_height` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Configuration for a screen session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum nesting of calculation tokens and embedded pages.
    pub max_depth: usize,
    /// Number of id characters shown in `[Missing: ..]` placeholders.
    pub missing_id_len: usize,
    /// Initial viewport.
    pub viewport: Viewport,
    /// `chrono` format for `timestamp` steps without their own format.
    /// `None` yields epoch milliseconds.
    pub timestamp_format: Option<String>,
    /// Keep query results for the whole session instead of one run.
    pub cache_queries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            missing_id_len: 8,
            viewport: Viewport::default(),
            timestamp_format: None,
            cache_queries: true,
        }
    }
}

impl EngineConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from JSON. Absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxDepth".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(config)
    }

    /// Set the nesting limit (builder).
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Set the placeholder id length (builder).
    pub fn with_missing_id_len(mut self, len: usize) -> Self {
        self.missing_id_len = len;
        self
    }

    /// Set the initial viewport (builder).
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport::new(width, height);
        self
    }

    /// Set the default timestamp format (builder).
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    /// Enable or disable the session query cache (builder).
    pub fn with_query_cache(mut self, enabled: bool) -> Self {
        self.cache_queries = enabled;
        self
    }
}
