use anyhow::Result;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use SimpleDB::server::http::spawn_exporter;
use SimpleDB::{metrics, Server, ServerConfig, Store};

fn http_get(addr: SocketAddr, path: &str) -> Result<(u16, String)> {
    let mut s = TcpStream::connect(addr)?;
    s.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(
        s,
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    )?;
    let mut raw = String::new();
    s.read_to_string(&mut raw)?;
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|c| c.parse::<u16>().ok())
        .unwrap_or(0);
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    Ok((status, body))
}

#[test]
fn health_and_metrics_endpoints() -> Result<()> {
    let store = Arc::new(Store::in_memory());
    let server = Server::new(ServerConfig::default(), store.clone());
    let addr = spawn_exporter("127.0.0.1:0", server.engine())?;

    // Немного трафика, чтобы счётчики сдвинулись.
    let c = server.connect_local()?;
    let wb = c.create_write_batch()?;
    c.put(wb, &[0x4d], b"k", b"v")?;
    c.write(wb)?;
    c.use_snapshot()?;

    let (code, body) = http_get(addr, "/health")?;
    assert_eq!(code, 200);
    assert_eq!(body.trim(), "OK");

    let (code, body) = http_get(addr, "/metrics")?;
    assert_eq!(code, 200);
    assert!(body.contains("simpledb_requests_total"), "{}", body);
    assert!(body.contains("simpledb_latest_seq 1"), "{}", body);

    let (code, _) = http_get(addr, "/nope")?;
    assert_eq!(code, 404);
    Ok(())
}

#[test]
fn snapshot_counters_move() -> Result<()> {
    let server = Server::new(ServerConfig::default(), Arc::new(Store::in_memory()));
    let c = server.connect_local()?;
    let before = metrics::snapshot();
    c.use_snapshot()?;
    let wb = c.create_write_batch()?;
    c.write(wb)?;
    let after = metrics::snapshot();

    // Счётчики процессные и тесты идут параллельно: только монотонность.
    assert!(after.requests_total >= before.requests_total + 3);
    assert!(after.batches_committed >= before.batches_committed + 1);
    assert!(after.sessions_opened >= 1);
    let text = metrics::render_prometheus(&after);
    assert!(text.contains("# TYPE"), "{}", text);
    Ok(())
}
