//! Client side of the protocol.
//!
//! Один транспорт, много запросов в полёте: фоновый reader раскладывает ответы
//! по pending-таблице (ключ — id запроса). Отмена — только локальная: запись из
//! pending удаляется, сервер об этом не узнаёт, поздний ответ молча выбрасывается.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::collections::HashMap;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::consts::{DEFAULT_ENGINE_TIMEOUT_MS, DEFAULT_MAX_FRAME_LEN};
use crate::error::{ErrorKind, ProtoError};
use crate::protocol::messages;
use crate::protocol::{read_frame, write_frame, Frame, Method, ParamBag, Request, Response};

/// Транспорт клиента: каналы in-process соединения или TCP-кадры.
pub enum ClientTransport {
    Local {
        tx: Sender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
    },
    Tcp(TcpStream),
}

enum WriteHalf {
    Local(Sender<Vec<u8>>),
    Tcp(TcpStream),
}

impl WriteHalf {
    fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        match self {
            WriteHalf::Local(tx) => tx
                .send(payload)
                .map_err(|_| anyhow!("connection is closed")),
            WriteHalf::Tcp(s) => write_frame(s, &payload),
        }
    }
}

type Pending = Arc<Mutex<HashMap<String, Sender<Response>>>>;

pub struct Client {
    writer: Mutex<Option<WriteHalf>>,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Client {
    pub fn new(transport: ClientTransport) -> Result<Self> {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let writer = match transport {
            ClientTransport::Local { tx, rx } => {
                let p = Arc::clone(&pending);
                spawn_reader(move || local_reader(rx, p))?;
                WriteHalf::Local(tx)
            }
            ClientTransport::Tcp(stream) => {
                stream.set_nodelay(true).ok();
                let read_half = stream.try_clone().context("clone client stream")?;
                let p = Arc::clone(&pending);
                spawn_reader(move || tcp_reader(read_half, p))?;
                WriteHalf::Tcp(stream)
            }
        };
        Ok(Self {
            writer: Mutex::new(Some(writer)),
            pending,
            next_id: AtomicU64::new(1),
            timeout: Duration::from_millis(DEFAULT_ENGINE_TIMEOUT_MS * 2),
        })
    }

    pub fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).context("connect to server")?;
        Self::new(ClientTransport::Tcp(stream))
    }

    /// Сколько ждать ответа в call(). По умолчанию — двойной серверный дедлайн.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn fresh_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Запрос с новым уникальным id.
    pub fn request(&self, method: Method, params: ParamBag) -> Request {
        Request::new(method.as_str(), self.fresh_id(), params)
    }

    fn write_request(&self, req: &Request) -> Result<()> {
        let mut guard = self.writer.lock().unwrap();
        match guard.as_mut() {
            Some(w) => w.send(req.to_json()),
            None => Err(anyhow!("client is closed")),
        }
    }

    /// Отправить запрос и вернуть ожидание ответа.
    pub fn send(&self, req: Request) -> Result<PendingReply> {
        if req.id.is_empty() {
            return Err(anyhow!("send() needs a request id; use notify() for fire-and-forget"));
        }
        let (tx, rx) = mpsc::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            if pending.contains_key(&req.id) {
                return Err(anyhow!("request id '{}' is already in flight", req.id));
            }
            pending.insert(req.id.clone(), tx);
        }
        if let Err(e) = self.write_request(&req) {
            self.pending.lock().unwrap().remove(&req.id);
            return Err(e);
        }
        Ok(PendingReply {
            id: req.id,
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Fire-and-forget: id очищается, ответ сервера будет выброшен.
    pub fn notify(&self, mut req: Request) -> Result<()> {
        req.id.clear();
        self.write_request(&req)
    }

    /// Перестать ждать ответ. true — запрос ещё числился в pending.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending.lock().unwrap().remove(id).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Отправить и дождаться ответа (не дольше with_timeout).
    pub fn call_request(&self, req: Request) -> Result<ParamBag> {
        self.send(req)?.wait_timeout(self.timeout)
    }

    pub fn call(&self, method: Method, params: ParamBag) -> Result<ParamBag> {
        self.call_request(self.request(method, params))
    }

    /// Закрыть транспорт. Сервер увидит разрыв и освободит хэндлы сессии.
    pub fn close(&self) {
        if let Some(w) = self.writer.lock().unwrap().take() {
            if let WriteHalf::Tcp(s) = &w {
                let _ = s.shutdown(Shutdown::Both);
            }
        }
    }

    // ---------------- typed helpers ----------------

    pub fn use_snapshot(&self) -> Result<u64> {
        let bag = self.call_request(messages::use_snapshot(&self.fresh_id()))?;
        Ok(messages::parse_snapid(&bag)?)
    }

    pub fn dispose_snapshot(&self, snapid: u64) -> Result<()> {
        self.call_request(messages::dispose_snapshot(&self.fresh_id(), snapid))?;
        Ok(())
    }

    pub fn create_write_batch(&self) -> Result<u64> {
        let bag = self.call_request(messages::create_write_batch(&self.fresh_id()))?;
        Ok(messages::parse_wbid(&bag)?)
    }

    pub fn dispose_write_batch(&self, wbid: u64) -> Result<()> {
        self.call_request(messages::dispose_write_batch(&self.fresh_id(), wbid))?;
        Ok(())
    }

    pub fn put(&self, wbid: u64, table: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.call_request(messages::put(&self.fresh_id(), wbid, table, key, value))?;
        Ok(())
    }

    pub fn delete(&self, wbid: u64, table: &[u8], key: &[u8]) -> Result<()> {
        self.call_request(messages::delete(&self.fresh_id(), wbid, table, key))?;
        Ok(())
    }

    pub fn write(&self, wbid: u64) -> Result<()> {
        self.call_request(messages::write(&self.fresh_id(), wbid))?;
        Ok(())
    }

    pub fn new_iterator(
        &self,
        snapid: u64,
        table: &[u8],
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<u64> {
        let req = messages::new_iterator(&self.fresh_id(), snapid, table, begin, end);
        let bag = self.call_request(req)?;
        Ok(messages::parse_itid(&bag)?)
    }

    pub fn iterator_current(&self, itid: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let bag = self.call_request(messages::iterator_current(&self.fresh_id(), itid))?;
        Ok(messages::parse_current(&bag))
    }

    pub fn iterator_next(&self, itid: u64) -> Result<bool> {
        let bag = self.call_request(messages::iterator_next(&self.fresh_id(), itid))?;
        Ok(messages::parse_bool(&bag))
    }

    pub fn iterator_seek_to_first(&self, itid: u64) -> Result<bool> {
        let bag = self.call_request(messages::iterator_seek_to_first(&self.fresh_id(), itid))?;
        Ok(messages::parse_bool(&bag))
    }

    pub fn iterator_reset(&self, itid: u64) -> Result<bool> {
        let bag = self.call_request(messages::iterator_reset(&self.fresh_id(), itid))?;
        Ok(messages::parse_bool(&bag))
    }

    pub fn iterator_dispose(&self, itid: u64) -> Result<()> {
        self.call_request(messages::iterator_dispose(&self.fresh_id(), itid))?;
        Ok(())
    }

    /// snapid = None (или Some(0)) — последнее закоммиченное состояние.
    pub fn get_value(&self, table: &[u8], key: &[u8], snapid: Option<u64>) -> Result<Option<Vec<u8>>> {
        let bag = self.call_request(messages::get_value(&self.fresh_id(), table, key, snapid))?;
        Ok(messages::parse_lookup(&bag))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ожидание ответа на один запрос.
pub struct PendingReply {
    id: String,
    rx: Receiver<Response>,
    pending: Pending,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn wait(self) -> Result<ParamBag> {
        match self.rx.recv() {
            Ok(resp) => Ok(resp.into_result()?),
            Err(_) => Err(closed_before_reply(&self.id)),
        }
    }

    /// По истечении таймаута запрос снимается с учёта (как cancel).
    pub fn wait_timeout(self, timeout: Duration) -> Result<ParamBag> {
        match self.rx.recv_timeout(timeout) {
            Ok(resp) => Ok(resp.into_result()?),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().unwrap().remove(&self.id);
                Err(ProtoError::new(
                    ErrorKind::EngineFailure,
                    format!(
                        "no reply to request '{}' within {} ms",
                        self.id,
                        timeout.as_millis()
                    ),
                )
                .into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(closed_before_reply(&self.id)),
        }
    }
}

fn closed_before_reply(id: &str) -> anyhow::Error {
    ProtoError::new(
        ErrorKind::EngineFailure,
        format!("connection closed before reply to '{}'", id),
    )
    .into()
}

/// Вид протокольной ошибки, если `e` — ProtoError (ответ сервера или клиентский таймаут).
pub fn error_kind(e: &anyhow::Error) -> Option<ErrorKind> {
    e.downcast_ref::<ProtoError>().map(|p| p.kind)
}

fn spawn_reader<F: FnOnce() + Send + 'static>(f: F) -> Result<()> {
    thread::Builder::new()
        .name("sdb-client-reader".to_string())
        .spawn(f)
        .map(|_| ())
        .context("spawn client reader")
}

fn route(payload: &[u8], pending: &Pending) {
    let resp: Response = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => {
            debug!("client: undecodable response dropped: {}", e);
            return;
        }
    };
    if resp.id.is_empty() {
        debug!("client: response without id dropped: {:?}", resp.error);
        return;
    }
    let waiter = pending.lock().unwrap().remove(&resp.id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(resp);
        }
        None => debug!("client: response for unknown or cancelled id '{}' dropped", resp.id),
    }
}

fn local_reader(rx: Receiver<Vec<u8>>, pending: Pending) {
    while let Ok(payload) = rx.recv() {
        route(&payload, &pending);
    }
    // Ожидающие получат Disconnected.
    pending.lock().unwrap().clear();
}

fn tcp_reader(mut stream: TcpStream, pending: Pending) {
    loop {
        match read_frame(&mut stream, DEFAULT_MAX_FRAME_LEN) {
            Ok(Some(Frame::Data(payload))) => route(&payload, &pending),
            Ok(Some(Frame::Oversized(n))) => {
                debug!("client: oversized response of {} bytes skipped", n)
            }
            Ok(None) => break,
            Err(e) => {
                debug!("client: read error: {}", e);
                break;
            }
        }
    }
    pending.lock().unwrap().clear();
}
