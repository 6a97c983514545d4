//! Centralized server configuration for SimpleDB.
//!
//! Источники (по возрастанию приоритета):
//! - defaults (consts.rs)
//! - config.json — ключи исходного сервера (`port`, `bindAddress`,
//!   `server_storage_path`) плюс snake_case ключи для остальных полей
//! - ENV SDB_*
//! - флаги CLI (применяются через with_* в cli.rs)
//!
//! storage_path = None означает чисто in-memory стор.
//! session_idle_timeout_ms = 0 отключает idle-таймаут сессий.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consts::{
    DEFAULT_BIND_ADDRESS, DEFAULT_ENGINE_TIMEOUT_MS, DEFAULT_MAX_BATCHES,
    DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_ITERATORS, DEFAULT_MAX_SNAPSHOTS, DEFAULT_PORT,
    DEFAULT_SESSION_IDLE_MS, DEFAULT_WORKER_THREADS,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Env: SDB_BIND_ADDRESS (default 127.0.0.1)
    pub bind_address: String,
    /// Env: SDB_PORT (default 20080)
    pub port: u16,
    /// Env: SDB_STORAGE_PATH (default None = in-memory)
    pub storage_path: Option<PathBuf>,

    /// Per-session handle limits.
    /// Env: SDB_MAX_SNAPSHOTS / SDB_MAX_BATCHES / SDB_MAX_ITERATORS
    pub max_snapshots: usize,
    pub max_batches: usize,
    pub max_iterators: usize,

    /// Env: SDB_WORKERS (default 4, min 1)
    pub worker_threads: usize,
    /// Server-side deadline per request. Env: SDB_ENGINE_TIMEOUT_MS (default 5000)
    pub engine_timeout_ms: u64,
    /// Env: SDB_SESSION_IDLE_MS (default 300000; 0 disables)
    pub session_idle_timeout_ms: u64,
    /// Env: SDB_MAX_FRAME_LEN (default 16 MiB)
    pub max_frame_len: usize,

    /// fsync batch log on every commit.
    /// Env: SDB_DATA_FSYNC (default true; "0|false|off|no" => false)
    pub data_fsync: bool,

    /// Metrics/health exporter address. Env: SDB_METRICS_ADDR (default None)
    pub metrics_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            storage_path: None,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            max_batches: DEFAULT_MAX_BATCHES,
            max_iterators: DEFAULT_MAX_ITERATORS,
            worker_threads: DEFAULT_WORKER_THREADS,
            engine_timeout_ms: DEFAULT_ENGINE_TIMEOUT_MS,
            session_idle_timeout_ms: DEFAULT_SESSION_IDLE_MS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            data_fsync: true,
            metrics_addr: None,
        }
    }
}

/// config.json как его писал исходный сервер; всё опционально.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default, rename = "bindAddress", alias = "bind_address")]
    bind_address: Option<String>,
    #[serde(default, rename = "server_storage_path", alias = "storage_path")]
    storage_path: Option<String>,
    #[serde(default)]
    max_snapshots: Option<usize>,
    #[serde(default)]
    max_batches: Option<usize>,
    #[serde(default)]
    max_iterators: Option<usize>,
    #[serde(default)]
    worker_threads: Option<usize>,
    #[serde(default)]
    engine_timeout_ms: Option<u64>,
    #[serde(default)]
    session_idle_timeout_ms: Option<u64>,
    #[serde(default)]
    max_frame_len: Option<usize>,
    #[serde(default)]
    data_fsync: Option<bool>,
    #[serde(default)]
    metrics_addr: Option<String>,
}

fn parse_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

fn non_empty(v: &str) -> Option<String> {
    let s = v.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl ServerConfig {
    /// Defaults overridden by SDB_* environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Defaults → config.json → ENV.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(p) = config_file {
            cfg = cfg.merge_json_file(p)?;
        }
        Ok(cfg.apply_env())
    }

    /// Defaults → config.json (без ENV).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::default().merge_json_file(path)
    }

    fn merge_json_file(mut self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let fc: FileConfig = serde_json::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;

        if let Some(v) = fc.port {
            self.port = v;
        }
        if let Some(v) = fc.bind_address.as_deref().and_then(non_empty) {
            self.bind_address = v;
        }
        if let Some(v) = fc.storage_path.as_deref().and_then(non_empty) {
            self.storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = fc.max_snapshots {
            self.max_snapshots = v;
        }
        if let Some(v) = fc.max_batches {
            self.max_batches = v;
        }
        if let Some(v) = fc.max_iterators {
            self.max_iterators = v;
        }
        if let Some(v) = fc.worker_threads {
            self.worker_threads = v.max(1);
        }
        if let Some(v) = fc.engine_timeout_ms {
            self.engine_timeout_ms = v;
        }
        if let Some(v) = fc.session_idle_timeout_ms {
            self.session_idle_timeout_ms = v;
        }
        if let Some(v) = fc.max_frame_len {
            self.max_frame_len = v;
        }
        if let Some(v) = fc.data_fsync {
            self.data_fsync = v;
        }
        if let Some(v) = fc.metrics_addr.as_deref().and_then(non_empty) {
            self.metrics_addr = Some(v);
        }
        Ok(self)
    }

    fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("SDB_BIND_ADDRESS") {
            if let Some(s) = non_empty(&v) {
                self.bind_address = s;
            }
        }
        if let Ok(v) = std::env::var("SDB_PORT") {
            if let Ok(n) = v.trim().parse::<u16>() {
                self.port = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_STORAGE_PATH") {
            if let Some(s) = non_empty(&v) {
                self.storage_path = Some(PathBuf::from(s));
            }
        }
        if let Ok(v) = std::env::var("SDB_MAX_SNAPSHOTS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.max_snapshots = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_MAX_BATCHES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.max_batches = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_MAX_ITERATORS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.max_iterators = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_WORKERS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.worker_threads = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("SDB_ENGINE_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.engine_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_SESSION_IDLE_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.session_idle_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_MAX_FRAME_LEN") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.max_frame_len = n;
            }
        }
        if let Ok(v) = std::env::var("SDB_DATA_FSYNC") {
            self.data_fsync = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("SDB_METRICS_ADDR") {
            self.metrics_addr = non_empty(&v);
        }
        self
    }

    /// "bind_address:port" для TcpListener::bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    /// None — idle-таймаут отключён.
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        if self.session_idle_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.session_idle_timeout_ms))
        }
    }

    /// Проверка значений, которые нельзя разумно исправить молча.
    pub fn validate(&self) -> Result<()> {
        if self.max_snapshots == 0 || self.max_batches == 0 || self.max_iterators == 0 {
            return Err(anyhow!("handle limits must be > 0: {}", self));
        }
        if self.engine_timeout_ms == 0 {
            return Err(anyhow!("engine_timeout_ms must be > 0"));
        }
        if self.max_frame_len < 64 {
            return Err(anyhow!("max_frame_len too small: {}", self.max_frame_len));
        }
        Ok(())
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_bind_address<S: Into<String>>(mut self, addr: S) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_storage_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.storage_path = path.map(Into::into);
        self
    }

    pub fn with_max_snapshots(mut self, n: usize) -> Self {
        self.max_snapshots = n;
        self
    }

    pub fn with_max_batches(mut self, n: usize) -> Self {
        self.max_batches = n;
        self
    }

    pub fn with_max_iterators(mut self, n: usize) -> Self {
        self.max_iterators = n;
        self
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn with_engine_timeout_ms(mut self, ms: u64) -> Self {
        self.engine_timeout_ms = ms;
        self
    }

    pub fn with_session_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.session_idle_timeout_ms = ms;
        self
    }

    pub fn with_max_frame_len(mut self, n: usize) -> Self {
        self.max_frame_len = n;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }

    pub fn with_metrics_addr<S: Into<String>>(mut self, addr: Option<S>) -> Self {
        self.metrics_addr = addr.map(Into::into);
        self
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerConfig {{ \
             listen: {}, \
             storage_path: {}, \
             max_snapshots: {}, \
             max_batches: {}, \
             max_iterators: {}, \
             worker_threads: {}, \
             engine_timeout_ms: {}, \
             session_idle_timeout_ms: {}, \
             max_frame_len: {}, \
             data_fsync: {}, \
             metrics_addr: {} \
             }}",
            self.listen_addr(),
            self.storage_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string()),
            self.max_snapshots,
            self.max_batches,
            self.max_iterators,
            self.worker_threads,
            self.engine_timeout_ms,
            self.session_idle_timeout_ms,
            self.max_frame_len,
            self.data_fsync,
            self.metrics_addr.as_deref().unwrap_or("disabled"),
        )
    }
}
