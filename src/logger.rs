use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Process-wide error counters. Last-write-wins and explicitly best-effort;
/// a poisoned lock is recovered rather than propagated.
#[derive(Debug, Default, Clone)]
pub struct ErrorMetrics {
    pub total: u64,
    pub by_phase: HashMap<String, u64>,
    pub by_type: HashMap<String, u64>,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Clone)]
pub struct LastError {
    pub message: String,
    pub phase: String,
    pub at: DateTime<Utc>,
}

static ERROR_METRICS: LazyLock<Mutex<ErrorMetrics>> =
    LazyLock::new(|| Mutex::new(ErrorMetrics::default()));

pub fn error_metrics_snapshot() -> ErrorMetrics {
    ERROR_METRICS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// A recorded error emission, handed to monitoring hooks.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub request_id: String,
    pub phase: String,
    pub kind: String,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Monitoring hooks observe errors and phase/request completions. Panics in
/// hook implementations are caught and logged, never propagated.
pub trait MonitoringHook: Send + Sync {
    fn on_error(&self, _entry: &ErrorEntry) {}
    fn on_phase_complete(&self, _phase: &str, _duration_ms: u64, _success: bool) {}
    fn on_request_complete(&self, _request_id: &str, _duration_ms: u64, _success: bool) {}
}

static HOOKS: LazyLock<RwLock<Vec<Arc<dyn MonitoringHook>>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

pub fn register_hook(hook: Arc<dyn MonitoringHook>) {
    HOOKS
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(hook);
}

fn each_hook(f: impl Fn(&Arc<dyn MonitoringHook>)) {
    let hooks = HOOKS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    for hook in hooks.iter() {
        if catch_unwind(AssertUnwindSafe(|| f(hook))).is_err() {
            warn!("monitoring hook panicked; continuing");
        }
    }
}

/// Request-scoped structured logger. Every emission carries the request id,
/// current phase, and elapsed milliseconds since creation.
pub struct RequestLogger {
    request_id: String,
    session_id: Option<String>,
    query: Option<String>,
    phase: Mutex<(String, Instant)>,
    started: Instant,
}

impl RequestLogger {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            query: None,
            phase: Mutex::new(("start".to_string(), Instant::now())),
            started: Instant::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn phase(&self) -> String {
        self.phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .0
            .clone()
    }

    /// Enter a new pipeline phase. Resets the per-phase clock used by
    /// [`RequestLogger::phase_complete`].
    pub fn set_phase(&self, phase: &str) {
        let mut guard = self
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = (phase.to_string(), Instant::now());
    }

    pub fn debug(&self, message: &str) {
        debug!(
            request_id = %self.request_id,
            phase = %self.phase(),
            elapsed_ms = self.elapsed_ms(),
            "{message}"
        );
    }

    pub fn info(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            phase = %self.phase(),
            elapsed_ms = self.elapsed_ms(),
            "{message}"
        );
    }

    pub fn warn(&self, message: &str) {
        warn!(
            request_id = %self.request_id,
            phase = %self.phase(),
            elapsed_ms = self.elapsed_ms(),
            "{message}"
        );
    }

    /// Emit an error record, bump the process-wide metrics, and notify hooks.
    pub fn error(&self, kind: &str, message: &str) {
        let phase = self.phase();
        error!(
            request_id = %self.request_id,
            phase = %phase,
            error_kind = kind,
            elapsed_ms = self.elapsed_ms(),
            "{message}"
        );

        {
            let mut metrics = ERROR_METRICS
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            metrics.total += 1;
            *metrics.by_phase.entry(phase.clone()).or_insert(0) += 1;
            *metrics.by_type.entry(kind.to_string()).or_insert(0) += 1;
            metrics.last_error = Some(LastError {
                message: message.to_string(),
                phase: phase.clone(),
                at: Utc::now(),
            });
        }

        let entry = ErrorEntry {
            request_id: self.request_id.clone(),
            phase,
            kind: kind.to_string(),
            message: message.to_string(),
            elapsed_ms: self.elapsed_ms(),
        };
        each_hook(|h| h.on_error(&entry));
    }

    /// Mark the current phase finished and notify hooks with its duration.
    pub fn phase_complete(&self, success: bool) {
        let (phase, phase_started) = {
            let guard = self
                .phase
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (guard.0.clone(), guard.1)
        };
        let duration_ms = phase_started.elapsed().as_millis() as u64;
        each_hook(|h| h.on_phase_complete(&phase, duration_ms, success));
    }

    /// Mark the whole request finished and notify hooks.
    pub fn request_complete(&self, success: bool) {
        let duration_ms = self.elapsed_ms();
        if let Some(query) = &self.query {
            debug!(request_id = %self.request_id, duration_ms, success, query = %query, "request complete");
        }
        each_hook(|h| h.on_request_complete(&self.request_id, duration_ms, success));
    }
}
