use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `LABDESK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the next one is triggered.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "labdesk".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or(&lookup, "LABDESK_PORT", defaults.port),
            bind: lookup("LABDESK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("LABDESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("LABDESK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(&lookup, "LABDESK_MAX_CONNECTIONS", defaults.max_connections),
            compact_threshold: parse_or(&lookup, "LABDESK_COMPACT_THRESHOLD", defaults.compact_threshold),
            tls_cert: lookup("LABDESK_TLS_CERT"),
            tls_key: lookup("LABDESK_TLS_KEY"),
            metrics_port: lookup("LABDESK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("labdesk.wal")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
