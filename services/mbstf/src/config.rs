//! MBSTF configuration loading.
//!
//! YAML is the sole config source, consumed at startup as described by
//! spec.md's external-interfaces section. Only the distribution-session
//! API's listen address and the response cache-control defaults are
//! exercised here; `mbstf.rtpIngest`, `mbstf.sbi` and `mbstf.discovery` are
//! recognised by the external SBI collaborator, not by this crate.
//!
//! Default config path: `/etc/mbstf/mbstf.yaml`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub dist_session_api: ListenConfig,
    pub http_push_ingest: ListenConfig,
    pub cache_control: CacheControlConfig,
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheControlConfig {
    pub dist_max_age: Duration,
    pub object_max_age: Duration,
}

// ---------------------------------------------------------------------------
// Raw YAML deserialization types (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDocument {
    mbstf: Option<RawMbstf>,
}

#[derive(Debug, Deserialize)]
struct RawMbstf {
    #[serde(rename = "distSessionAPI")]
    dist_session_api: Option<RawListenConfig>,
    #[serde(rename = "httpPushIngest")]
    http_push_ingest: Option<RawListenConfig>,
    #[serde(rename = "serverResponseCacheControl")]
    server_response_cache_control: Option<RawCacheControlConfig>,
}

#[derive(Debug, Deserialize)]
struct RawListenConfig {
    addr: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawCacheControlConfig {
    #[serde(rename = "distMaxAge", alias = "DistMaxAge")]
    dist_max_age: Option<u64>,
    #[serde(rename = "ObjectMaxAge", alias = "objectMaxAge")]
    object_max_age: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let yaml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&yaml_str)
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(Path::new("/etc/mbstf/mbstf.yaml"))
}

pub fn load_config_from_str(yaml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawDocument = serde_yaml::from_str(yaml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mbstf = raw.mbstf.unwrap_or(RawMbstf {
        dist_session_api: None,
        http_push_ingest: None,
        server_response_cache_control: None,
    });

    let dist_session_api = resolve_listen(mbstf.dist_session_api, "0.0.0.0", 8805)?;
    let http_push_ingest = resolve_listen(mbstf.http_push_ingest, "0.0.0.0", 0)?;

    let cache_control = match mbstf.server_response_cache_control {
        Some(c) => CacheControlConfig {
            dist_max_age: Duration::from_secs(c.dist_max_age.unwrap_or(60)),
            object_max_age: Duration::from_secs(c.object_max_age.unwrap_or(60)),
        },
        None => CacheControlConfig {
            dist_max_age: Duration::from_secs(60),
            object_max_age: Duration::from_secs(60),
        },
    };

    Ok(Config {
        dist_session_api,
        http_push_ingest,
        cache_control,
    })
}

fn resolve_listen(raw: Option<RawListenConfig>, default_addr: &str, default_port: u16) -> Result<ListenConfig, ConfigError> {
    let (addr, port) = match raw {
        Some(r) => (r.addr.unwrap_or_else(|| default_addr.to_owned()), r.port.unwrap_or(default_port)),
        None => (default_addr.to_owned(), default_port),
    };
    Ok(ListenConfig {
        bind: format!("{}:{}", addr, port),
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_document_is_empty() {
        let config = load_config_from_str("mbstf: {}\n").unwrap();
        assert_eq!(config.dist_session_api.bind, "0.0.0.0:8805");
        assert_eq!(config.cache_control.dist_max_age, Duration::from_secs(60));
        assert_eq!(config.cache_control.object_max_age, Duration::from_secs(60));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
mbstf:
  distSessionAPI:
    addr: "127.0.0.1"
    port: 9090
  serverResponseCacheControl:
    distMaxAge: 120
    ObjectMaxAge: 30
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.dist_session_api.bind, "127.0.0.1:9090");
        assert_eq!(config.cache_control.dist_max_age, Duration::from_secs(120));
        assert_eq!(config.cache_control.object_max_age, Duration::from_secs(30));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = load_config_from_str("mbstf: [this, is, not, a, map]\n  bad indent").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
