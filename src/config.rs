use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::DEFAULT_LOG_N;
use crate::notify::DEFAULT_GRACE;

/// Process configuration, read from `SPACEBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Password every wire client presents at startup.
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub notify_grace: Duration,
    pub scrypt_log_n: u8,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    /// Write the fixed catalog when it is empty.
    pub seed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "spacebook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            notify_grace: DEFAULT_GRACE,
            scrypt_log_n: DEFAULT_LOG_N,
            admin_email: None,
            admin_password: None,
            seed: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default, with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Config::default();
        let get = |name: &str| lookup(&format!("SPACEBOOK_{name}")).filter(|v| !v.is_empty());
        Self {
            port: parsed(&get, "PORT").unwrap_or(d.port),
            bind: get("BIND").unwrap_or(d.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&get, "MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&get, "COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            compact_interval: parsed(&get, "COMPACT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.compact_interval),
            metrics_port: parsed(&get, "METRICS_PORT"),
            tls_cert: get("TLS_CERT"),
            tls_key: get("TLS_KEY"),
            notify_grace: parsed(&get, "NOTIFY_GRACE_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.notify_grace),
            scrypt_log_n: parsed(&get, "SCRYPT_LOG_N").unwrap_or(d.scrypt_log_n),
            admin_email: get("ADMIN_EMAIL"),
            admin_password: get("ADMIN_PASSWORD"),
            seed: parsed(&get, "SEED").unwrap_or(d.seed),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("spacebook.wal")
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = get(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring SPACEBOOK_{name}={raw:?}: not a valid value");
            None
        }
    }
}
