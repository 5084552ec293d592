use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::engine::SqliteEngine;
use crate::error::{Error, Result};

const DEFAULT_SYNC_BATCH: usize = 100;

/// Per-registration sync settings, parsed from the caller's sync-config
/// document: which columns participate and how many rows go into one
/// published payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub fields: Option<Vec<String>>,
    pub batch_size: usize,
}

impl SyncConfig {
    pub fn from_document(doc: &JsonValue) -> Self {
        let fields = doc.get("fields").and_then(JsonValue::as_array).map(|list| {
            list.iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_owned)
                .collect()
        });
        let batch_size = doc
            .get("batch_size")
            .and_then(JsonValue::as_u64)
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_SYNC_BATCH);
        Self { fields, batch_size }
    }
}

/// Sink the serialized sync payloads are published through; the transport
/// behind it is the surrounding agent's concern.
pub type ReportSink = Box<dyn Fn(&str) + Send + 'static>;

/// A table's participation in periodic synchronization.
pub struct SyncRegistration {
    pub sync_id: String,
    pub table: String,
    pub config: SyncConfig,
    pub report: ReportSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Condition-variable cancellation token driving the sync loop. `cancel` is
/// safe from any thread; a waiter wakes either on timeout or on the stop
/// signal.
struct CancelToken {
    stop: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            stop: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn cancel(&self) {
        *lock_ignore_poison(&self.stop) = true;
        self.signal.notify_all();
    }

    /// Wait out one interval; returns true when cancellation was requested.
    fn wait_interval(&self, interval: Duration) -> bool {
        let guard = lock_ignore_poison(&self.stop);
        let (guard, _timeout) = self
            .signal
            .wait_timeout_while(guard, interval, |stopped| !*stopped)
            .unwrap_or_else(|err| err.into_inner());
        *guard
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

/// Background loop that, on a fixed interval, publishes the serialized state
/// of every registered table. One pass runs immediately on start; `stop()`
/// is idempotent and takes effect at the next wake.
pub struct SyncScheduler {
    engine: Arc<Mutex<SqliteEngine>>,
    registrations: Arc<Mutex<Vec<SyncRegistration>>>,
    token: Arc<CancelToken>,
    state: Arc<Mutex<SchedulerState>>,
    thread: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<Mutex<SqliteEngine>>) -> Self {
        Self {
            engine,
            registrations: Arc::new(Mutex::new(Vec::new())),
            token: Arc::new(CancelToken::new()),
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            thread: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *lock_ignore_poison(&self.state)
    }

    /// Register a table under a sync identifier. Tables without a loadable
    /// schema or without a primary key are rejected up front.
    pub fn register(
        &self,
        sync_id: &str,
        table: &str,
        config_document: &JsonValue,
        report: ReportSink,
    ) -> Result<()> {
        let primary_keys = lock_ignore_poison(&self.engine).primary_keys(table)?;
        if primary_keys.is_empty() {
            return Err(Error::NoPrimaryKey(table.to_owned()));
        }
        debug!(sync_id, table, "registered sync");
        lock_ignore_poison(&self.registrations).push(SyncRegistration {
            sync_id: sync_id.to_owned(),
            table: table.to_owned(),
            config: SyncConfig::from_document(config_document),
            report,
        });
        Ok(())
    }

    /// Start the background loop. A second call while running is a no-op.
    pub fn start(&mut self, interval: Duration) {
        if self.thread.is_some() {
            warn!("sync scheduler already running");
            return;
        }
        *lock_ignore_poison(&self.state) = SchedulerState::Running;
        let engine = Arc::clone(&self.engine);
        let registrations = Arc::clone(&self.registrations);
        let token = Arc::clone(&self.token);
        self.thread = Some(thread::spawn(move || {
            info!("sync loop started");
            sync_pass(&engine, &registrations);
            while !token.wait_interval(interval) {
                sync_pass(&engine, &registrations);
            }
            info!("sync loop exiting");
        }));
    }

    /// Signal the loop to stop and block until its thread has exited. Safe
    /// to call from any thread holding the scheduler; calling it twice is a
    /// no-op the second time.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.thread.take() {
            *lock_ignore_poison(&self.state) = SchedulerState::Stopping;
            let _ = handle.join();
            *lock_ignore_poison(&self.state) = SchedulerState::Stopped;
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One full synchronization cycle: each registration in sequence, under the
/// shared engine mutex. A failed pass is logged and retried at the next
/// interval; the loop itself never terminates on failure.
fn sync_pass(engine: &Arc<Mutex<SqliteEngine>>, registrations: &Arc<Mutex<Vec<SyncRegistration>>>) {
    let registrations = lock_ignore_poison(registrations);
    for registration in registrations.iter() {
        let rows = {
            let mut engine = lock_ignore_poison(engine);
            engine.select_rows(&registration.table, registration.config.fields.as_deref())
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                warn!(sync_id = %registration.sync_id, %err, "sync pass failed");
                continue;
            }
        };
        for chunk in rows.chunks(registration.config.batch_size.max(1)) {
            let payload = serde_json::json!({
                "component": registration.sync_id,
                "table": registration.table,
                "data": chunk,
            });
            let serialized = payload.to_string();
            (registration.report)(&serialized);
            debug!(sync_id = %registration.sync_id, "sync sent: {}", serialized);
        }
    }
}
