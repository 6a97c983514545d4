use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use SimpleDB::ServerConfig;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("sdbtest-cfg-{prefix}-{pid}-{t}-{id}"))
}

fn write_config(body: &str) -> Result<PathBuf> {
    let dir = unique_root("file");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.json");
    std::fs::write(&path, body)?;
    Ok(path)
}

#[test]
fn defaults() {
    let cfg = ServerConfig::default();
    assert_eq!(cfg.listen_addr(), "127.0.0.1:20080");
    assert_eq!(cfg.storage_path, None);
    assert_eq!(cfg.max_snapshots, 1024);
    assert_eq!(cfg.max_iterators, 4096);
    assert_eq!(cfg.engine_timeout(), Duration::from_millis(5000));
    assert_eq!(cfg.session_idle_timeout(), Some(Duration::from_millis(300_000)));
    assert!(cfg.data_fsync);
    assert!(cfg.validate().is_ok());
}

/// Ключи исходного config.json: port, bindAddress, server_storage_path.
#[test]
fn legacy_keys_are_understood() -> Result<()> {
    let path = write_config(
        r#"{ "port": 21000, "bindAddress": "0.0.0.0", "server_storage_path": "/var/lib/sdb" }"#,
    )?;
    let cfg = ServerConfig::from_json_file(&path)?;
    assert_eq!(cfg.port, 21000);
    assert_eq!(cfg.bind_address, "0.0.0.0");
    assert_eq!(cfg.storage_path, Some(PathBuf::from("/var/lib/sdb")));
    // Остальное — по умолчанию.
    assert_eq!(cfg.max_batches, 1024);
    Ok(())
}

#[test]
fn snake_case_keys_and_idle_off() -> Result<()> {
    let path = write_config(
        r#"{
            "bind_address": "10.0.0.1",
            "storage_path": "",
            "max_snapshots": 8,
            "worker_threads": 0,
            "engine_timeout_ms": 250,
            "session_idle_timeout_ms": 0,
            "data_fsync": false,
            "metrics_addr": "127.0.0.1:0"
        }"#,
    )?;
    let cfg = ServerConfig::from_json_file(&path)?;
    assert_eq!(cfg.bind_address, "10.0.0.1");
    // Пустой путь = in-memory.
    assert_eq!(cfg.storage_path, None);
    assert_eq!(cfg.max_snapshots, 8);
    assert_eq!(cfg.worker_threads, 1);
    assert_eq!(cfg.engine_timeout_ms, 250);
    assert_eq!(cfg.session_idle_timeout(), None);
    assert!(!cfg.data_fsync);
    assert_eq!(cfg.metrics_addr.as_deref(), Some("127.0.0.1:0"));
    Ok(())
}

#[test]
fn bad_file_is_an_error() -> Result<()> {
    let path = write_config("{ port: ")?;
    assert!(ServerConfig::from_json_file(&path).is_err());
    assert!(ServerConfig::from_json_file(&unique_root("missing").join("config.json")).is_err());
    Ok(())
}

/// Единственный тест файла, который трогает ENV: переменные процесса общие.
#[test]
fn env_overrides_file() -> Result<()> {
    let path = write_config(r#"{ "port": 21000, "max_iterators": 10 }"#)?;
    std::env::set_var("SDB_PORT", "22000");
    std::env::set_var("SDB_DATA_FSYNC", "off");
    let cfg = ServerConfig::load(Some(path.as_path()));
    std::env::remove_var("SDB_PORT");
    std::env::remove_var("SDB_DATA_FSYNC");

    let cfg = cfg?;
    assert_eq!(cfg.port, 22000);
    assert_eq!(cfg.max_iterators, 10);
    assert!(!cfg.data_fsync);
    Ok(())
}

#[test]
fn builder_and_validation() {
    let cfg = ServerConfig::default()
        .with_bind_address("0.0.0.0")
        .with_port(1234)
        .with_storage_path(Some("/tmp/sdb"))
        .with_max_iterators(0);
    assert_eq!(cfg.listen_addr(), "0.0.0.0:1234");
    assert_eq!(cfg.storage_path, Some(PathBuf::from("/tmp/sdb")));
    assert!(cfg.validate().is_err());

    let cfg = ServerConfig::default().with_engine_timeout_ms(0);
    assert!(cfg.validate().is_err());

    // Display не пустой и содержит адрес.
    let s = ServerConfig::default().to_string();
    assert!(s.contains("127.0.0.1"), "{}", s);
}
