//! server — приём соединений и исполнение запросов.
//!
//! Подмодули:
//! - pool.rs       — пул рабочих потоков, общий для всех соединений;
//! - connection.rs — reader / writer одного соединения, in-flight дедлайны;
//! - http.rs       — экспортёр /health и /metrics.
//!
//! Стор передаётся явно (Arc<dyn Engine>), так что в одном процессе может жить
//! несколько независимых серверов.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::client::{Client, ClientTransport};
use crate::config::ServerConfig;
use crate::engine::{Engine, Store};
use crate::session::{Session, SessionLimits};

pub mod connection;
pub mod http;
pub mod pool;

use connection::{run_connection, ConnectionParams, Inbound, Outbound};
use pool::WorkerPool;

pub struct Server {
    config: ServerConfig,
    engine: Arc<dyn Engine>,
    pool: Arc<WorkerPool>,
    listener: Option<TcpListener>,
    next_session: AtomicU64,
}

impl Server {
    /// Сервер без TCP-листенера: только connect_local().
    pub fn new(config: ServerConfig, engine: Arc<dyn Engine>) -> Self {
        let pool = Arc::new(WorkerPool::new(config.worker_threads));
        Self {
            config,
            engine,
            pool,
            listener: None,
            next_session: AtomicU64::new(1),
        }
    }

    /// Забиндить TCP-листенер на config.listen_addr().
    pub fn bind(config: ServerConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        config.validate()?;
        let addr = config.listen_addr();
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("bind listener at {}", addr))?;
        let mut server = Self::new(config, engine);
        server.listener = Some(listener);
        Ok(server)
    }

    /// Открыть стор по конфигурации (storage_path / data_fsync) и забиндиться.
    pub fn open(config: ServerConfig) -> Result<Self> {
        let store = match &config.storage_path {
            Some(p) => Store::open(p, config.data_fsync)?,
            None => Store::in_memory(),
        };
        Self::bind(config, Arc::new(store))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .as_ref()
            .ok_or_else(|| anyhow!("server has no TCP listener"))?
            .local_addr()
            .context("listener local_addr")
    }

    fn limits(&self) -> SessionLimits {
        SessionLimits {
            max_snapshots: self.config.max_snapshots,
            max_batches: self.config.max_batches,
            max_iterators: self.config.max_iterators,
        }
    }

    fn params(&self) -> ConnectionParams {
        ConnectionParams {
            engine_timeout: self.config.engine_timeout(),
            idle_timeout: self.config.session_idle_timeout(),
            max_frame_len: self.config.max_frame_len,
        }
    }

    fn spawn_connection(&self, inbound: Inbound, outbound: Outbound, peer: String) -> Result<()> {
        let sid = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(sid, self.engine(), self.limits()));
        let pool = Arc::clone(&self.pool);
        let params = self.params();
        thread::Builder::new()
            .name(format!("sdb-conn-{}", sid))
            .spawn(move || run_connection(session, pool, params, inbound, outbound, peer))
            .map(|_| ())
            .with_context(|| format!("spawn connection thread for session {}", sid))
    }

    /// Accept loop. Не возвращается, пока листенер жив.
    pub fn serve(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("serve() needs a bound listener (use Server::bind)"))?;

        if let Some(addr) = &self.config.metrics_addr {
            http::spawn_exporter(addr, self.engine())?;
        }
        info!("listening on {} ({})", listener.local_addr()?, self.config);

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("accept error: {}", e);
                    continue;
                }
            };
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            stream.set_nodelay(true).ok();
            let write_half = match stream.try_clone() {
                Ok(s) => s,
                Err(e) => {
                    warn!("clone stream for {}: {}", peer, e);
                    continue;
                }
            };
            info!("accepted from {}", peer);
            if let Err(e) =
                self.spawn_connection(Inbound::Tcp(stream), Outbound::Tcp(write_half), peer)
            {
                warn!("{:#}", e);
            }
        }
        Ok(())
    }

    /// In-process соединение поверх каналов: та же сессия и тот же пул, что и у TCP.
    pub fn connect_local(&self) -> Result<Client> {
        let (c2s_tx, c2s_rx) = mpsc::channel::<Vec<u8>>();
        let (s2c_tx, s2c_rx) = mpsc::channel::<Vec<u8>>();
        self.spawn_connection(
            Inbound::Local(c2s_rx),
            Outbound::Local(s2c_tx),
            "local".to_string(),
        )?;
        Client::new(ClientTransport::Local {
            tx: c2s_tx,
            rx: s2c_rx,
        })
    }
}
