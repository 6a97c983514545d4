use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::ServerConfig;
use crate::engine::{Engine, KeyRange, Store};
use crate::server::Server;
use crate::util::{display_text, hex_decode, hex_encode};

#[derive(Parser, Debug)]
#[command(
    name = "simpledb",
    version,
    about = "Versioned KV store behind a snapshot / write-batch / iterator protocol",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Поднять сервер (defaults → --config → ENV SDB_* → флаги)
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        metrics: Option<String>,
    },
    /// Офлайн-чтение одного ключа
    Get {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long)]
        key: String,
    },
    /// Офлайн-дамп одной таблицы
    Scan {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Сводка по стору
    Status {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Переписать batch log одной записью текущего состояния
    Compact {
        #[arg(long)]
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Serve {
            config,
            bind,
            port,
            path,
            metrics,
        } => cmd_serve(config, bind, port, path, metrics),
        Cmd::Get { path, table, key } => cmd_get(path, &table, &key),
        Cmd::Scan { path, table, json } => cmd_scan(path, &table, json),
        Cmd::Status { path, json } => cmd_status(path, json),
        Cmd::Compact { path } => cmd_compact(path),
    }
}

fn cmd_serve(
    config: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
    path: Option<PathBuf>,
    metrics: Option<String>,
) -> Result<()> {
    let mut cfg = ServerConfig::load(config.as_deref())?;
    if let Some(b) = bind {
        cfg = cfg.with_bind_address(b);
    }
    if let Some(p) = port {
        cfg = cfg.with_port(p);
    }
    if path.is_some() {
        cfg = cfg.with_storage_path(path);
    }
    if metrics.is_some() {
        cfg = cfg.with_metrics_addr(metrics);
    }
    let server = Server::open(cfg)?;
    server.serve()
}

/// get / scan / status: на диске ничего не меняется, оборванный хвост лога
/// только пропускается.
fn open_existing(path: &Path) -> Result<Store> {
    Store::open_read_only(path)
}

fn cmd_get(path: PathBuf, table: &str, key: &str) -> Result<()> {
    let table = hex_decode(table)?;
    let key = hex_decode(key)?;
    if table.is_empty() {
        return Err(anyhow!("--table must not be empty"));
    }
    let store = open_existing(&path)?;
    match store.get(&table, &key, None)? {
        Some(v) => println!("{}", hex_encode(&v)),
        None => println!("not found"),
    }
    Ok(())
}

fn cmd_scan(path: PathBuf, table: &str, json: bool) -> Result<()> {
    let table = hex_decode(table)?;
    if table.is_empty() {
        return Err(anyhow!("--table must not be empty"));
    }
    let store = open_existing(&path)?;
    let rows = store.scan_table(&table, &KeyRange::all(), None);

    if json {
        let items: Vec<serde_json::Value> = rows
            .iter()
            .map(|(k, v)| {
                serde_json::json!({
                    "key": hex_encode(k),
                    "value": hex_encode(v),
                })
            })
            .collect();
        let out = serde_json::json!({
            "table": hex_encode(&table),
            "seq": store.latest_seq(),
            "count": rows.len(),
            "items": items,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for (k, v) in &rows {
        println!("{} = {}  [{}]", hex_encode(k), hex_encode(v), display_text(v));
    }
    println!("{} entries (seq {})", rows.len(), store.latest_seq());
    Ok(())
}

fn cmd_status(path: PathBuf, json: bool) -> Result<()> {
    let store = open_existing(&path)?;
    let st = store.stats();
    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "seq": st.seq,
            "tables": st.tables,
            "keys": st.keys,
            "versions": st.versions,
            "log_bytes": st.log_bytes,
            "table_ids": store.tables().iter().map(|t| hex_encode(t)).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!("Store at {}", path.display());
    println!("  seq       = {}", st.seq);
    println!("  tables    = {}", st.tables);
    for t in store.tables() {
        println!("    - {}", hex_encode(&t));
    }
    println!("  keys      = {}", st.keys);
    println!("  versions  = {}", st.versions);
    match st.log_bytes {
        Some(n) => println!("  log_bytes = {}", n),
        None => println!("  log_bytes = (in-memory)"),
    }
    Ok(())
}

fn cmd_compact(path: PathBuf) -> Result<()> {
    if !path.is_dir() {
        return Err(anyhow!("store directory {} does not exist", path.display()));
    }
    // fsync не нужен: rewrite сам делает sync_all перед rename.
    let store = Store::open(&path, false)?;
    let before = store.stats().log_bytes.unwrap_or(0);
    match store.compact_log()? {
        Some(after) => println!("Compacted batch log: {} -> {} bytes", before, after),
        None => println!("Nothing to compact (in-memory store)"),
    }
    Ok(())
}
