//! Configuration for the data-table engine

use serde::Deserialize;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rows per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Age after which a cached schema is treated as a miss
    #[serde(default = "default_schema_cache_ttl", with = "humantime_serde")]
    pub schema_cache_ttl: Duration,

    /// Quiet period after the last realtime event before reconciling
    #[serde(default = "default_refresh_debounce", with = "humantime_serde")]
    pub refresh_debounce: Duration,

    /// Maximum matching rows a bulk export may return
    #[serde(default = "default_export_ceiling")]
    pub export_ceiling: u64,

    /// Remote procedure performing bulk exports
    #[serde(default = "default_export_rpc")]
    pub export_rpc: String,

    /// Roles that bypass hierarchical scoping
    #[serde(default = "default_global_roles")]
    pub global_roles: Vec<String>,

    /// Let callers without any hierarchy identifier see unfiltered rows
    #[serde(default)]
    pub allow_unscoped_profiles: bool,

    /// Enable the session schema cache
    #[serde(default = "default_true")]
    pub schema_cache_enabled: bool,

    /// Session-store key prefix for cached schemas
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            schema_cache_ttl: default_schema_cache_ttl(),
            refresh_debounce: default_refresh_debounce(),
            export_ceiling: default_export_ceiling(),
            export_rpc: default_export_rpc(),
            global_roles: default_global_roles(),
            allow_unscoped_profiles: false,
            schema_cache_enabled: true,
            cache_key_prefix: default_cache_key_prefix(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(source: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }
}

fn default_page_size() -> usize {
    50
}

fn default_schema_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_refresh_debounce() -> Duration {
    Duration::from_secs(1)
}

fn default_export_ceiling() -> u64 {
    5000
}

fn default_export_rpc() -> String {
    "export_entity_rows".to_string()
}

fn default_global_roles() -> Vec<String> {
    vec!["admin".to_string(), "super_admin".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_cache_key_prefix() -> String {
    "sovereign:schema:".to_string()
}
