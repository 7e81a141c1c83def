//! Server settings.

use serde::Deserialize;

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_catalog_uri() -> String {
    "sqlite::memory:".to_string()
}

fn default_authn_uri() -> String {
    "sqlite::memory:".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_data_dir() -> String {
    "./trellis-data".to_string()
}

fn default_response_bytesize_limit() -> u64 {
    trellis_core::DEFAULT_RESPONSE_BYTESIZE_LIMIT
}

fn default_streaming() -> serde_json::Value {
    serde_json::json!({"datastore": "memory"})
}

/// Server configuration, loadable from YAML with environment-shaped
/// defaults suitable for development.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_catalog_uri")]
    pub catalog_uri: String,
    #[serde(default = "default_authn_uri")]
    pub authn_uri: String,
    /// Bounded pool size, per store.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Directory for internally-managed node data.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Ordered token secrets; the first encodes, all decode.
    #[serde(default)]
    pub secret_keys: Vec<String>,
    /// Serve read access to public nodes without credentials.
    #[serde(default)]
    pub allow_anonymous_access: bool,
    #[serde(default = "default_response_bytesize_limit")]
    pub response_bytesize_limit: u64,
    /// Streaming datastore settings, dispatched by `datastore` name.
    #[serde(default = "default_streaming")]
    pub streaming: serde_json::Value,
    /// Reject specs not present in the validation registry.
    #[serde(default)]
    pub reject_undeclared_specs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            catalog_uri: default_catalog_uri(),
            authn_uri: default_authn_uri(),
            pool_size: default_pool_size(),
            data_dir: default_data_dir(),
            secret_keys: Vec::new(),
            allow_anonymous_access: false,
            response_bytesize_limit: default_response_bytesize_limit(),
            streaming: default_streaming(),
            reject_undeclared_specs: false,
        }
    }
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}
