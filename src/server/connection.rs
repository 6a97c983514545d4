//! Одно соединение = одна сессия.
//!
//! Потоки:
//! - reader (поток соединения): читает кадры, разбирает envelope, регистрирует запрос
//!   в in-flight таблице и отдаёт его в общий пул;
//! - worker (пул): Session::dispatch, ответ уходит в исходящую очередь, только если
//!   запрос ещё числится в in-flight (иначе по нему уже ушёл таймаут);
//! - writer: пишет исходящую очередь в транспорт и по тикам выметает просроченные
//!   запросы, отвечая EngineFailure (-32800).
//!
//! Ответы идут в порядке готовности, не в порядке запросов: клиент сопоставляет по id.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::pool::WorkerPool;
use crate::error::{ErrorKind, ProtoError};
use crate::metrics::{
    record_frame_rejected, record_late_result_dropped, record_request, record_request_timeout,
    record_session_idle_expired,
};
use crate::protocol::{parse_request, read_frame, write_frame, Frame, Response};
use crate::session::Session;

/// Входящая сторона транспорта.
pub(crate) enum Inbound {
    Tcp(TcpStream),
    Local(Receiver<Vec<u8>>),
}

/// Исходящая сторона транспорта.
pub(crate) enum Outbound {
    Tcp(TcpStream),
    Local(Sender<Vec<u8>>),
}

enum Incoming {
    Frame(Vec<u8>),
    Oversized(usize),
    Closed,
    Idle,
    Failed(io::Error),
}

impl Inbound {
    fn prepare(&self, idle: Option<Duration>) {
        if let Inbound::Tcp(s) = self {
            let _ = s.set_read_timeout(idle);
        }
    }

    fn recv(&mut self, idle: Option<Duration>, max_len: usize) -> Incoming {
        match self {
            Inbound::Tcp(s) => match read_frame(s, max_len) {
                Ok(Some(Frame::Data(b))) => Incoming::Frame(b),
                Ok(Some(Frame::Oversized(n))) => Incoming::Oversized(n),
                Ok(None) => Incoming::Closed,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    Incoming::Idle
                }
                Err(e) => Incoming::Failed(e),
            },
            Inbound::Local(rx) => {
                let got = match idle {
                    Some(d) => rx.recv_timeout(d).map_err(|e| e == RecvTimeoutError::Timeout),
                    None => rx.recv().map_err(|_| false),
                };
                match got {
                    Ok(b) if b.len() > max_len => Incoming::Oversized(b.len()),
                    Ok(b) => Incoming::Frame(b),
                    Err(true) => Incoming::Idle,
                    Err(false) => Incoming::Closed,
                }
            }
        }
    }
}

impl Outbound {
    fn send(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        match self {
            Outbound::Tcp(s) => write_frame(s, &payload),
            Outbound::Local(tx) => tx
                .send(payload)
                .map_err(|_| anyhow::anyhow!("local peer is gone")),
        }
    }

    fn close(&mut self) {
        if let Outbound::Tcp(s) = self {
            let _ = s.shutdown(Shutdown::Both);
        }
    }
}

/// Запросы, ответ на которые ещё не отправлен. Ключ — внутренний токен: id
/// клиента может повторяться или быть пустым.
#[derive(Default)]
pub(crate) struct InFlight {
    next: AtomicU64,
    entries: Mutex<HashMap<u64, (String, Instant)>>,
    // Ответы, снятые с учёта, но ещё не положенные в очередь писателя.
    answering: AtomicUsize,
}

impl InFlight {
    pub(crate) fn register(&self, id: &str, deadline: Instant) -> u64 {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap()
            .insert(token, (id.to_string(), deadline));
        token
    }

    /// Снять запрос с учёта и отдать ответ через `send`. false — запрос уже
    /// просрочен, `send` не вызывается. Пока `send` идёт, is_empty() ложно.
    pub(crate) fn answer<F: FnOnce()>(&self, token: u64, send: F) -> bool {
        {
            let mut map = self.entries.lock().unwrap();
            if map.remove(&token).is_none() {
                return false;
            }
            self.answering.fetch_add(1, Ordering::AcqRel);
        }
        send();
        self.answering.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Снять просроченные; вернуть их id.
    pub(crate) fn take_expired(&self, now: Instant) -> Vec<String> {
        let mut map = self.entries.lock().unwrap();
        let expired: Vec<u64> = map
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(t, _)| *t)
            .collect();
        expired
            .into_iter()
            .filter_map(|t| map.remove(&t).map(|(id, _)| id))
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        let map = self.entries.lock().unwrap();
        map.is_empty() && self.answering.load(Ordering::Acquire) == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionParams {
    pub engine_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_frame_len: usize,
}

/// Обслужить соединение до закрытия. Вызывается в отдельном потоке.
pub(crate) fn run_connection(
    session: Arc<Session>,
    pool: Arc<WorkerPool>,
    params: ConnectionParams,
    mut inbound: Inbound,
    outbound: Outbound,
    peer: String,
) {
    let sid = session.id();
    info!("session {} opened for {}", sid, peer);

    let inflight = Arc::new(InFlight::default());
    let reader_done = Arc::new(AtomicBool::new(false));
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>();

    let writer = {
        let inflight = Arc::clone(&inflight);
        let reader_done = Arc::clone(&reader_done);
        let timeout_ms = params.engine_timeout.as_millis() as u64;
        thread::Builder::new()
            .name(format!("sdb-writer-{}", sid))
            .spawn(move || writer_loop(sid, outbound, out_rx, inflight, reader_done, timeout_ms))
    };
    let writer = match writer {
        Ok(h) => h,
        Err(e) => {
            warn!("session {}: spawn writer: {}", sid, e);
            session.close();
            return;
        }
    };

    inbound.prepare(params.idle_timeout);
    loop {
        match inbound.recv(params.idle_timeout, params.max_frame_len) {
            Incoming::Frame(bytes) => {
                let req = match parse_request(&bytes) {
                    Ok(r) => r,
                    Err(resp) => {
                        record_frame_rejected();
                        record_request(resp.error.as_ref().map(|e| e.kind));
                        let _ = out_tx.send(resp.to_json());
                        continue;
                    }
                };
                let token = inflight.register(&req.id, Instant::now() + params.engine_timeout);
                let s = Arc::clone(&session);
                let inf = Arc::clone(&inflight);
                let tx = out_tx.clone();
                let id = req.id.clone();
                let queued = pool.execute(move || {
                    let resp = s.dispatch(&req);
                    let sent = inf.answer(token, || {
                        let _ = tx.send(resp.to_json());
                    });
                    if !sent {
                        record_late_result_dropped();
                        debug!(
                            "session {}: late result for {} id='{}' dropped",
                            s.id(),
                            req.method,
                            req.id
                        );
                    }
                });
                if !queued {
                    inflight.answer(token, || {
                        let e =
                            ProtoError::new(ErrorKind::EngineFailure, "server is shutting down");
                        let _ = out_tx.send(Response::err(id, &e).to_json());
                    });
                }
            }
            Incoming::Oversized(n) => {
                record_frame_rejected();
                warn!(
                    "session {}: frame of {} bytes rejected (max {})",
                    sid, n, params.max_frame_len
                );
                let e = ProtoError::new(
                    ErrorKind::InvalidRequest,
                    format!("frame too large: {} bytes (max {})", n, params.max_frame_len),
                );
                let _ = out_tx.send(Response::err("", &e).to_json());
            }
            Incoming::Closed => {
                debug!("session {}: peer {} closed", sid, peer);
                break;
            }
            Incoming::Idle => {
                record_session_idle_expired();
                info!("session {}: idle timeout, closing {}", sid, peer);
                break;
            }
            Incoming::Failed(e) => {
                warn!("session {}: read error from {}: {}", sid, peer, e);
                break;
            }
        }
    }

    reader_done.store(true, Ordering::Release);
    drop(out_tx);
    session.close();
    let _ = writer.join();
    info!("session {} for {} finished", sid, peer);
}

fn writer_loop(
    sid: u64,
    mut out: Outbound,
    rx: Receiver<Vec<u8>>,
    inflight: Arc<InFlight>,
    reader_done: Arc<AtomicBool>,
    timeout_ms: u64,
) {
    let tick = Duration::from_millis((timeout_ms / 4).clamp(1, 50));
    'outer: loop {
        match rx.recv_timeout(tick) {
            Ok(frame) => {
                if let Err(e) = out.send(frame) {
                    debug!("session {}: write failed: {:#}", sid, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        for id in inflight.take_expired(Instant::now()) {
            record_request_timeout();
            warn!(
                "session {}: request id='{}' exceeded {} ms, answering EngineFailure",
                sid, id, timeout_ms
            );
            if out.send(Response::timeout(id, timeout_ms).to_json()).is_err() {
                break 'outer;
            }
        }

        // Пир ушёл и ответить больше некому: зависшие задачи дожидаться незачем.
        // Пустой InFlight значит, что все неопоздавшие ответы уже в rx.
        if reader_done.load(Ordering::Acquire) && inflight.is_empty() {
            while let Ok(frame) = rx.try_recv() {
                if out.send(frame).is_err() {
                    break;
                }
            }
            break;
        }
    }
    out.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_expiry_and_completion_are_exclusive() {
        let inf = InFlight::default();
        let now = Instant::now();
        let a = inf.register("a", now);
        let b = inf.register("b", now + Duration::from_secs(60));
        assert_eq!(inf.take_expired(now), vec!["a".to_string()]);
        assert!(!inf.answer(a, || panic!("expired request must not be answered")));
        assert!(inf.answer(b, || {}));
        assert!(inf.is_empty());
    }

    #[test]
    fn inflight_not_empty_while_answer_is_queued() {
        let inf = InFlight::default();
        let t = inf.register("x", Instant::now() + Duration::from_secs(60));
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let answered = inf.answer(t, || {
            // Писатель, заглянувший сюда, не должен счесть соединение пустым.
            assert!(!inf.is_empty());
            tx.send(b"reply".to_vec()).unwrap();
        });
        assert!(answered);
        assert!(inf.is_empty());
        assert_eq!(rx.try_recv().unwrap(), b"reply".to_vec());
    }
}
