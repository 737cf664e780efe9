//! Global configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! definition defaults, context limits, and event bus sizing.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
///
/// Loaded from `~/.skillchain/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `max_retries` applied to links that omit it in a chain YAML file.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// `max_total_failures` applied to chains that omit it.
    #[serde(default = "default_max_total_failures")]
    pub default_max_total_failures: u32,

    /// Maximum serialized size of an execution context. An execution whose
    /// context grows past this limit is marked Failed.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Capacity of the broadcast channel carrying chain events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Default number of rows returned by list queries.
    #[serde(default = "default_list_limit")]
    pub default_list_limit: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_total_failures() -> u32 {
    10
}

fn default_max_context_bytes() -> usize {
    10_485_760
}

fn default_event_capacity() -> usize {
    1024
}

fn default_list_limit() -> u32 {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            default_max_total_failures: default_max_total_failures(),
            max_context_bytes: default_max_context_bytes(),
            event_capacity: default_event_capacity(),
            default_list_limit: default_list_limit(),
        }
    }
}
