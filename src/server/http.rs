//! Metrics / health exporter (tiny_http).
//!
//! GET /, /health, /ready → "OK"
//! GET /metrics           → Prometheus text (metrics::render_prometheus + текущий seq)

use anyhow::{anyhow, Result};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Response, Server};

use crate::engine::Engine;
use crate::metrics;

/// Поднять экспортёр в фоне. Возвращает фактический адрес (удобно для ":0").
pub fn spawn_exporter(addr: &str, engine: Arc<dyn Engine>) -> Result<SocketAddr> {
    let server = Server::http(addr).map_err(|e| anyhow!("bind http at {}: {}", addr, e))?;
    let bound = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| anyhow!("metrics exporter at {} is not an IP listener", addr))?;
    info!("metrics exporter listening on {}", bound);

    thread::Builder::new()
        .name("sdb-metrics".to_string())
        .spawn(move || serve(server, engine))
        .map_err(|e| anyhow!("spawn metrics exporter: {}", e))?;
    Ok(bound)
}

fn serve(server: Server, engine: Arc<dyn Engine>) {
    loop {
        let rq = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                warn!("http recv error: {}", e);
                continue;
            }
        };

        let url = rq.url().to_string();
        let is_get = rq.method().as_str() == "GET";

        if is_get && (url == "/" || url == "/health" || url == "/ready") {
            let _ = rq.respond(Response::from_string("OK\n").with_status_code(200));
            continue;
        }

        if is_get && url == "/metrics" {
            let mut body = metrics::render_prometheus(&metrics::snapshot());
            body.push_str("# HELP simpledb_latest_seq Latest committed sequence.\n");
            body.push_str("# TYPE simpledb_latest_seq gauge\n");
            body.push_str(&format!("simpledb_latest_seq {}\n", engine.latest_seq()));
            let mut resp = Response::from_string(body);
            if let Ok(ct) = Header::from_bytes(b"Content-Type", b"text/plain; version=0.0.4") {
                resp.add_header(ct);
            }
            let _ = rq.respond(resp);
            continue;
        }

        let _ = rq.respond(Response::from_string("not found\n").with_status_code(404));
    }
}
