//! Lightweight global metrics for SimpleDB.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - batch log (appends / fsync / torn tails / compaction)
//! - engine (commits, GC версий)
//! - sessions и handle-таблицы (snapshots / batches / iterators)
//! - запросы (ошибки, таймауты, отброшенные поздние результаты, битые кадры)
//!
//! Экспорт — render_prometheus(), его отдаёт server::http на /metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ErrorKind;

// ----- Batch log -----
static LOG_APPENDS_TOTAL: AtomicU64 = AtomicU64::new(0);
static LOG_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static LOG_FSYNC_CALLS: AtomicU64 = AtomicU64::new(0);
static LOG_TORN_TAILS: AtomicU64 = AtomicU64::new(0);
static LOG_COMPACTIONS: AtomicU64 = AtomicU64::new(0);

// ----- Engine -----
static COMMITS_TOTAL: AtomicU64 = AtomicU64::new(0);
static COMMIT_OPS_TOTAL: AtomicU64 = AtomicU64::new(0);
static GC_VERSIONS_PRUNED: AtomicU64 = AtomicU64::new(0);

// ----- Sessions -----
static SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_ACTIVE: AtomicU64 = AtomicU64::new(0);
static SESSIONS_IDLE_EXPIRED: AtomicU64 = AtomicU64::new(0);

// ----- Handles -----
static SNAPSHOTS_ACTIVE: AtomicU64 = AtomicU64::new(0);
static ITERATORS_ACTIVE: AtomicU64 = AtomicU64::new(0);
static BATCHES_ACTIVE: AtomicU64 = AtomicU64::new(0);
static BATCHES_COMMITTED: AtomicU64 = AtomicU64::new(0);
static BATCHES_ABANDONED: AtomicU64 = AtomicU64::new(0);

// ----- Requests -----
static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static REQUEST_ERRORS: AtomicU64 = AtomicU64::new(0);
static REQUEST_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static LATE_RESULTS_DROPPED: AtomicU64 = AtomicU64::new(0);
static FRAMES_REJECTED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Batch log
    pub log_appends_total: u64,
    pub log_bytes_written: u64,
    pub log_fsync_calls: u64,
    pub log_torn_tails: u64,
    pub log_compactions: u64,

    // Engine
    pub commits_total: u64,
    pub commit_ops_total: u64,
    pub gc_versions_pruned: u64,

    // Sessions
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub sessions_idle_expired: u64,

    // Handles
    pub snapshots_active: u64,
    pub iterators_active: u64,
    pub batches_active: u64,
    pub batches_committed: u64,
    pub batches_abandoned: u64,

    // Requests
    pub requests_total: u64,
    pub request_errors: u64,
    pub request_timeouts: u64,
    pub late_results_dropped: u64,
    pub frames_rejected: u64,
}

impl MetricsSnapshot {
    pub fn avg_ops_per_commit(&self) -> f64 {
        if self.commits_total == 0 {
            0.0
        } else {
            self.commit_ops_total as f64 / self.commits_total as f64
        }
    }

    pub fn error_ratio(&self) -> f64 {
        if self.requests_total == 0 {
            0.0
        } else {
            self.request_errors as f64 / self.requests_total as f64
        }
    }
}

fn gauge_dec(g: &AtomicU64) {
    g.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
        .ok();
}

// ----- Recorders (batch log) -----
pub fn record_log_append(bytes: usize) {
    LOG_APPENDS_TOTAL.fetch_add(1, Ordering::Relaxed);
    LOG_BYTES_WRITTEN.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_log_fsync() {
    LOG_FSYNC_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_log_torn_tail() {
    LOG_TORN_TAILS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_log_compaction() {
    LOG_COMPACTIONS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (engine) -----
pub fn record_commit(ops: usize) {
    COMMITS_TOTAL.fetch_add(1, Ordering::Relaxed);
    COMMIT_OPS_TOTAL.fetch_add(ops as u64, Ordering::Relaxed);
}

pub fn record_gc_pruned(versions: usize) {
    if versions > 0 {
        GC_VERSIONS_PRUNED.fetch_add(versions as u64, Ordering::Relaxed);
    }
}

// ----- Recorders (sessions) -----
pub fn record_session_open() {
    SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
    SESSIONS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_close() {
    gauge_dec(&SESSIONS_ACTIVE);
}

pub fn record_session_idle_expired() {
    SESSIONS_IDLE_EXPIRED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (handles) -----
pub fn record_snapshot_open() {
    SNAPSHOTS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_close() {
    gauge_dec(&SNAPSHOTS_ACTIVE);
}

pub fn record_iterator_open() {
    ITERATORS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_iterator_close() {
    gauge_dec(&ITERATORS_ACTIVE);
}

pub fn record_batch_open() {
    BATCHES_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_committed() {
    BATCHES_COMMITTED.fetch_add(1, Ordering::Relaxed);
    gauge_dec(&BATCHES_ACTIVE);
}

pub fn record_batch_abandoned() {
    BATCHES_ABANDONED.fetch_add(1, Ordering::Relaxed);
    gauge_dec(&BATCHES_ACTIVE);
}

/// Батч закрыт явно (disposeWriteBatch) без коммита.
pub fn record_batch_disposed() {
    gauge_dec(&BATCHES_ACTIVE);
}

// ----- Recorders (requests) -----
pub fn record_request(error: Option<ErrorKind>) {
    REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    if error.is_some() {
        REQUEST_ERRORS.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_request_timeout() {
    REQUEST_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_late_result_dropped() {
    LATE_RESULTS_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_frame_rejected() {
    FRAMES_REJECTED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        log_appends_total: LOG_APPENDS_TOTAL.load(Ordering::Relaxed),
        log_bytes_written: LOG_BYTES_WRITTEN.load(Ordering::Relaxed),
        log_fsync_calls: LOG_FSYNC_CALLS.load(Ordering::Relaxed),
        log_torn_tails: LOG_TORN_TAILS.load(Ordering::Relaxed),
        log_compactions: LOG_COMPACTIONS.load(Ordering::Relaxed),

        commits_total: COMMITS_TOTAL.load(Ordering::Relaxed),
        commit_ops_total: COMMIT_OPS_TOTAL.load(Ordering::Relaxed),
        gc_versions_pruned: GC_VERSIONS_PRUNED.load(Ordering::Relaxed),

        sessions_opened: SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_active: SESSIONS_ACTIVE.load(Ordering::Relaxed),
        sessions_idle_expired: SESSIONS_IDLE_EXPIRED.load(Ordering::Relaxed),

        snapshots_active: SNAPSHOTS_ACTIVE.load(Ordering::Relaxed),
        iterators_active: ITERATORS_ACTIVE.load(Ordering::Relaxed),
        batches_active: BATCHES_ACTIVE.load(Ordering::Relaxed),
        batches_committed: BATCHES_COMMITTED.load(Ordering::Relaxed),
        batches_abandoned: BATCHES_ABANDONED.load(Ordering::Relaxed),

        requests_total: REQUESTS_TOTAL.load(Ordering::Relaxed),
        request_errors: REQUEST_ERRORS.load(Ordering::Relaxed),
        request_timeouts: REQUEST_TIMEOUTS.load(Ordering::Relaxed),
        late_results_dropped: LATE_RESULTS_DROPPED.load(Ordering::Relaxed),
        frames_rejected: FRAMES_REJECTED.load(Ordering::Relaxed),
    }
}

fn push_metric(out: &mut String, name: &str, kind: &str, help: &str, value: String) {
    out.push_str(&format!("# HELP simpledb_{} {}\n", name, help));
    out.push_str(&format!("# TYPE simpledb_{} {}\n", name, kind));
    out.push_str(&format!("simpledb_{} {}\n", name, value));
}

/// Prometheus text exposition (version 0.0.4).
pub fn render_prometheus(m: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let ver = env!("CARGO_PKG_VERSION");
    out.push_str("# HELP simpledb_build_info Build info.\n");
    out.push_str("# TYPE simpledb_build_info gauge\n");
    out.push_str(&format!(
        "simpledb_build_info{{version=\"{}\",protocol=\"{}\"}} 1\n",
        ver,
        crate::consts::PROTOCOL_VERSION
    ));

    // --- batch log ---
    push_metric(&mut out, "log_appends_total", "counter", "Batch records appended.", m.log_appends_total.to_string());
    push_metric(&mut out, "log_bytes_written", "counter", "Batch log bytes written.", m.log_bytes_written.to_string());
    push_metric(&mut out, "log_fsync_calls", "counter", "Batch log fsync calls.", m.log_fsync_calls.to_string());
    push_metric(&mut out, "log_torn_tails", "counter", "Torn log tails truncated on open.", m.log_torn_tails.to_string());
    push_metric(&mut out, "log_compactions", "counter", "Batch log rewrites.", m.log_compactions.to_string());

    // --- engine ---
    push_metric(&mut out, "commits_total", "counter", "Committed write batches.", m.commits_total.to_string());
    push_metric(&mut out, "commit_ops_avg", "gauge", "Average ops per commit.", format!("{:.2}", m.avg_ops_per_commit()));
    push_metric(&mut out, "gc_versions_pruned", "counter", "Old versions reclaimed.", m.gc_versions_pruned.to_string());

    // --- sessions / handles ---
    push_metric(&mut out, "sessions_opened", "counter", "Sessions opened.", m.sessions_opened.to_string());
    push_metric(&mut out, "sessions_active", "gauge", "Sessions currently open.", m.sessions_active.to_string());
    push_metric(&mut out, "sessions_idle_expired", "counter", "Sessions closed by idle timeout.", m.sessions_idle_expired.to_string());
    push_metric(&mut out, "snapshots_active", "gauge", "Open snapshot handles.", m.snapshots_active.to_string());
    push_metric(&mut out, "iterators_active", "gauge", "Open iterator handles.", m.iterators_active.to_string());
    push_metric(&mut out, "batches_active", "gauge", "Open write batch handles.", m.batches_active.to_string());
    push_metric(&mut out, "batches_committed", "counter", "Write batches committed.", m.batches_committed.to_string());
    push_metric(&mut out, "batches_abandoned", "counter", "Write batches dropped with their session.", m.batches_abandoned.to_string());

    // --- requests ---
    push_metric(&mut out, "requests_total", "counter", "Requests dispatched.", m.requests_total.to_string());
    push_metric(&mut out, "request_errors", "counter", "Requests answered with an error.", m.request_errors.to_string());
    push_metric(&mut out, "request_timeouts", "counter", "Requests failed by engine timeout.", m.request_timeouts.to_string());
    push_metric(&mut out, "late_results_dropped", "counter", "Results discarded after timeout.", m.late_results_dropped.to_string());
    push_metric(&mut out, "frames_rejected", "counter", "Undecodable or oversized frames.", m.frames_rejected.to_string());

    out
}
