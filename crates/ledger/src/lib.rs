//! Append-only ledger of request lifecycle events, backed by an embedded
//! relational store opened in write-ahead-log mode (§4.3).

pub mod error;
pub mod queue;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llmgate_core::ledger::{DailySpend, EventStatus, LedgerEvent, LedgerEventType};
use rusqlite::Connection;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use error::{LedgerError, Result};
use queue::{LedgerQueue, QueuedEvent};

const QUEUE_CAPACITY: usize = 10_000;
const BATCH_MAX: usize = 100;
const BATCH_WINDOW: Duration = Duration::from_millis(200);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
const MAX_BATCH_RETRIES: u32 = 3;

/// Handle to the ledger. Cheap to clone; all clones share the same writer
/// task and queue.
#[derive(Clone)]
pub struct Ledger {
    db_path: PathBuf,
    queue: Arc<LedgerQueue>,
    degraded: Arc<AtomicBool>,
    writer: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: Arc<tokio::sync::Mutex<Option<oneshot::Sender<oneshot::Sender<()>>>>>,
}

impl Ledger {
    /// Opens (creating if necessary) the ledger store at `db_path` and spawns
    /// the single-writer worker task.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let write_conn = open_connection(&db_path)?;
        initialize_schema(&write_conn)?;

        let queue = LedgerQueue::new(QUEUE_CAPACITY);
        let degraded = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<oneshot::Sender<()>>();

        let worker_queue = queue.clone();
        let worker_degraded = degraded.clone();
        let handle = tokio::spawn(writer_loop(write_conn, worker_queue, worker_degraded, shutdown_rx));

        Ok(Self {
            db_path,
            queue,
            degraded,
            writer: Arc::new(tokio::sync::Mutex::new(Some(handle))),
            shutdown_tx: Arc::new(tokio::sync::Mutex::new(Some(shutdown_tx))),
        })
    }

    /// Enqueues an event. When `sync` is true, waits for the worker to
    /// durably commit it before returning — the synchronisation point
    /// strict-budget mode needs (§4.4).
    pub async fn append(&self, event: LedgerEvent, sync: bool) -> Result<()> {
        if !sync {
            self.queue.push(event, None);
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        self.queue.push(event, Some(tx));
        rx.await.map_err(|_| LedgerError::WriterShutDown)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Daily-spend aggregate (§3): committed/adjusted actual cost plus
    /// outstanding precheck holds, scoped to `[local-midnight, now)`.
    pub fn spend_today(&self) -> Result<DailySpend> {
        let conn = self.read_connection()?;
        let midnight = llmgate_core::local_midnight_unix(chrono::Utc::now());

        let committed: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(cost_actual_usd), 0.0) FROM events
                 WHERE timestamp >= ?1 AND event_type IN ('commit', 'adjust')",
                rusqlite::params![midnight],
                |row| row.get(0),
            )
            .unwrap_or(0.0);

        let held: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(h.cost_est_usd), 0.0) FROM events h
                 WHERE h.timestamp >= ?1 AND h.event_type = 'precheck_hold'
                 AND NOT EXISTS (
                     SELECT 1 FROM events t
                     WHERE t.trace_id = h.trace_id AND t.event_type IN ('commit', 'cancel')
                 )",
                rusqlite::params![midnight],
                |row| row.get(0),
            )
            .unwrap_or(0.0);

        Ok(DailySpend {
            committed_usd: rust_decimal::Decimal::try_from(committed).unwrap_or_default(),
            held_usd: rust_decimal::Decimal::try_from(held).unwrap_or_default(),
        })
    }

    /// Count of events of `event_type` for `(provider, model)` with
    /// `timestamp >= since`. Used by callers that want the ledger as the
    /// authoritative source for a window count instead of an in-memory ring.
    pub fn count_in_window(&self, provider: &str, model: &str, event_type: &str, since: f64) -> Result<u64> {
        let conn = self.read_connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE provider = ?1 AND model = ?2 AND event_type = ?3 AND timestamp >= ?4",
            rusqlite::params![provider, model, event_type, since],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn events_for_trace(&self, trace_id: uuid::Uuid) -> Result<Vec<LedgerEvent>> {
        let conn = self.read_connection()?;
        let mut stmt = conn.prepare("SELECT * FROM events WHERE trace_id = ?1 ORDER BY timestamp ASC")?;
        let rows = stmt.query_map(rusqlite::params![trace_id.to_string()], types::row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn read_connection(&self) -> Result<Connection> {
        open_connection(&self.db_path)
    }

    /// Drains the queue with a bounded deadline, then closes the writer.
    /// Remaining events beyond the deadline are flushed synchronously by the
    /// caller (§4.3).
    pub async fn close(&self) -> Result<()> {
        let maybe_tx = self.shutdown_tx.lock().await.take();
        if let Some(tx) = maybe_tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(done_tx).is_ok() {
                let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, done_rx).await;
            }
        }

        if let Some(handle) = self.writer.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, handle).await;
        }

        if !self.queue.is_empty() {
            let remaining = self.queue.drain_up_to(usize::MAX);
            let mut conn = self.read_connection()?;
            flush_batch(&mut conn, remaining)?;
        }

        Ok(())
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path).map_err(|source| LedgerError::Open {
        path: db_path.display().to_string(),
        source,
    })?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| {
        if e.to_string().contains("Os { code: 112") {
            LedgerError::DiskFull(e.to_string())
        } else {
            LedgerError::Database(e)
        }
    })?;
    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            trace_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            usage_json TEXT NOT NULL,
            cost_est_usd REAL,
            cost_actual_usd REAL,
            status TEXT NOT NULL,
            timing_json TEXT,
            metadata_json TEXT,
            timestamp REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_trace_id ON events(trace_id);",
    )?;
    Ok(())
}

async fn writer_loop(
    mut conn: Connection,
    queue: Arc<LedgerQueue>,
    degraded: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<oneshot::Sender<()>>,
) {
    loop {
        tokio::select! {
            biased;
            done_tx = &mut shutdown_rx => {
                while !queue.is_empty() {
                    let batch = queue.drain_up_to(BATCH_MAX);
                    if let Err(e) = flush_batch(&mut conn, batch) {
                        tracing::error!(error = %e, "ledger: failed to flush batch during shutdown");
                        degraded.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                if let Ok(done_tx) = done_tx {
                    let _ = done_tx.send(());
                }
                return;
            }
            _ = collect_batch(&queue) => {
                let batch = queue.drain_up_to(BATCH_MAX);
                if batch.is_empty() {
                    continue;
                }
                if let Err(e) = flush_batch(&mut conn, batch) {
                    tracing::error!(error = %e, "ledger: batch write failed after retries");
                    degraded.store(true, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Resolves once either `BATCH_MAX` items are queued or `BATCH_WINDOW` has
/// elapsed since the first item arrived, whichever comes first (§4.3).
async fn collect_batch(queue: &LedgerQueue) {
    queue.wait_for_item().await;
    let deadline = tokio::time::Instant::now() + BATCH_WINDOW;
    while queue.len() < BATCH_MAX && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn flush_batch(conn: &mut Connection, batch: Vec<QueuedEvent>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let mut attempt = 0u32;
    loop {
        match try_write_batch(conn, &batch) {
            Ok(()) => {
                for item in batch {
                    if let Some(tx) = item.completion {
                        let _ = tx.send(());
                    }
                }
                return Ok(());
            }
            Err(e) if attempt < MAX_BATCH_RETRIES => {
                attempt += 1;
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                tracing::warn!(attempt, error = %e, "ledger: retrying batch write");
                std::thread::sleep(backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

fn try_write_batch(conn: &mut Connection, batch: &[QueuedEvent]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO events (event_id, trace_id, event_type, provider, model, usage_json,
                cost_est_usd, cost_actual_usd, status, timing_json, metadata_json, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for item in batch {
            let ev: &LedgerEvent = &item.event;
            stmt.execute(rusqlite::params![
                ev.event_id.to_string(),
                ev.trace_id.to_string(),
                types::event_type_str(ev.event_type),
                ev.provider,
                ev.model,
                serde_json::to_string(&ev.usage)?,
                ev.cost_est_usd.map(|d| d.to_string().parse::<f64>().unwrap_or(0.0)),
                ev.cost_actual_usd.map(|d| d.to_string().parse::<f64>().unwrap_or(0.0)),
                types::status_str(ev.status),
                ev.timing.map(|t| serde_json::to_string(&t)).transpose()?,
                serde_json::to_string(&ev.metadata)?,
                ev.timestamp,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Convenience constructor for an event with `status = Ok` (the common case
/// for `precheck_hold`/`retry_attempt`).
pub fn new_event(
    trace_id: uuid::Uuid,
    event_type: LedgerEventType,
    provider: impl Into<String>,
    model: impl Into<String>,
) -> LedgerEvent {
    LedgerEvent::new(trace_id, event_type, provider, model, EventStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_core::ledger::LedgerEventType;
    use rust_decimal_macros::dec;

    async fn open_temp() -> (Ledger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let ledger = Ledger::open(&path).await.unwrap();
        (ledger, dir)
    }

    #[tokio::test]
    async fn append_then_spend_today_reflects_commit() {
        let (ledger, _dir) = open_temp().await;
        let trace_id = uuid::Uuid::new_v4();
        let mut event = new_event(trace_id, LedgerEventType::Commit, "acme", "m1");
        event.cost_actual_usd = Some(dec!(0.00007));
        ledger.append(event, true).await.unwrap();

        let spend = ledger.spend_today().unwrap();
        assert_eq!(spend.committed_usd, dec!(0.00007));
    }

    #[tokio::test]
    async fn precheck_hold_counts_until_committed() {
        let (ledger, _dir) = open_temp().await;
        let trace_id = uuid::Uuid::new_v4();
        let mut hold = new_event(trace_id, LedgerEventType::PrecheckHold, "acme", "m1");
        hold.cost_est_usd = Some(dec!(0.60));
        ledger.append(hold, true).await.unwrap();

        let spend = ledger.spend_today().unwrap();
        assert_eq!(spend.held_usd, dec!(0.60));

        let mut commit = new_event(trace_id, LedgerEventType::Commit, "acme", "m1");
        commit.cost_actual_usd = Some(dec!(0.55));
        ledger.append(commit, true).await.unwrap();

        let spend = ledger.spend_today().unwrap();
        assert_eq!(spend.held_usd, dec!(0.0), "hold must no longer count once committed");
        assert_eq!(spend.committed_usd, dec!(0.55));
    }

    #[tokio::test]
    async fn cancel_drops_the_hold_from_aggregation() {
        let (ledger, _dir) = open_temp().await;
        let trace_id = uuid::Uuid::new_v4();
        let mut hold = new_event(trace_id, LedgerEventType::PrecheckHold, "acme", "m1");
        hold.cost_est_usd = Some(dec!(0.30));
        ledger.append(hold, true).await.unwrap();

        let mut cancel = new_event(trace_id, LedgerEventType::Cancel, "acme", "m1");
        cancel.status = EventStatus::Cancelled;
        ledger.append(cancel, true).await.unwrap();

        let spend = ledger.spend_today().unwrap();
        assert_eq!(spend.total(), dec!(0.0));
    }

    #[tokio::test]
    async fn batches_many_events_without_sync() {
        let (ledger, _dir) = open_temp().await;
        for _ in 0..250 {
            let event = new_event(uuid::Uuid::new_v4(), LedgerEventType::RetryAttempt, "acme", "m1");
            ledger.append(event, false).await.unwrap();
        }
        ledger.close().await.unwrap();

        let conn = ledger.read_connection().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 250);
    }
}
