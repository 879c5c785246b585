use crate::db::append_record;
use crate::errors::{Error, Result};
use crate::metrics::{APPEND_LATENCY_SECONDS, STORAGE_FAILURES_TOTAL, WRITER_QUEUE_DEPTH};
use crate::model::{Ack, Record};
use chrono::Utc;
use prometheus::Gauge;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

struct AppendRequest {
    record: Record,
    reply: oneshot::Sender<Result<Ack>>,
}

/// Handle to the single writer task. Cloning shares the same queue.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<AppendRequest>,
    pool: SqlitePool,
    depth: Gauge,
}

impl std::fmt::Debug for AppendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendRequest")
            .field("sheet", &self.record.sheet())
            .finish()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("queued", &self.depth.get())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl LogSink {
    /// Starts the writer task. It stops once every `LogSink` clone is dropped.
    pub fn spawn(pool: SqlitePool, capacity: usize) -> (LogSink, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let depth = WRITER_QUEUE_DEPTH.clone();
        let handle = tokio::spawn(run_writer(rx, pool.clone(), depth.clone()));
        (LogSink { tx, pool, depth }, handle)
    }

    /// Queues `record` and waits until it is durably appended.
    pub async fn append(&self, record: Record) -> Result<Ack> {
        // Depth moves only once the request holds a queue slot
        let permit = self.tx.reserve().await.map_err(|_| Error::WriterUnavailable)?;
        let (reply, wait) = oneshot::channel();
        self.depth.inc();
        permit.send(AppendRequest { record, reply });

        wait.await.map_err(|_| Error::WriterUnavailable)?
    }

    /// Pool for the read side.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Appends requests one at a time, in the order they were queued.
async fn run_writer(mut rx: mpsc::Receiver<AppendRequest>, pool: SqlitePool, depth: Gauge) {
    info!("Starting log writer");

    while let Some(AppendRequest { record, reply }) = rx.recv().await {
        depth.dec();
        let sheet = record.sheet();
        let start = Instant::now();

        let outcome = match append_record(&pool, &record, Utc::now()).await {
            Ok(row) => {
                let elapsed = start.elapsed().as_secs_f64();
                APPEND_LATENCY_SECONDS.observe(elapsed);
                debug!("Appended {} row {} in {:.3}s", sheet, row, elapsed);
                Ok(Ack::new(sheet, row))
            }
            Err(e) => {
                STORAGE_FAILURES_TOTAL.inc();
                error!(
                    "Failed to append {} record from {}: {}",
                    sheet,
                    record.device_id(),
                    e
                );
                Err(e)
            }
        };

        if reply.send(outcome).is_err() {
            debug!("Requester for {} append went away before the reply", sheet);
        }
    }

    info!("Log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{list_access, make_pool, LogFilter};
    use crate::model::{AccessLogRecord, AccessReason, AccessResult, DoorState, Sheet};
    use std::time::Duration;

    fn denied(n: u32) -> Record {
        Record::Access(AccessLogRecord {
            device_id: "esp32-smart-server-01".to_string(),
            user_id: format!("user-{}", n),
            display_name: "Tidak Dikenal".to_string(),
            result: AccessResult::Denied,
            reason: AccessReason::UserNotFound,
            failed_count: 1,
            lockout_until: 0,
            door_state: DoorState::Locked,
            timestamp: None,
        })
    }

    #[tokio::test]
    async fn test_append_returns_ack() {
        let pool = make_pool("sqlite::memory:").await.unwrap();
        let (sink, _handle) = LogSink::spawn(pool, 16);

        let ack = sink.append(denied(1)).await.unwrap();
        assert!(ack.ok);
        assert_eq!(ack.sheet, Sheet::AccessLogs);
        assert_eq!(ack.row, 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_whole_rows() {
        let pool = make_pool("sqlite::memory:").await.unwrap();
        let (sink, _handle) = LogSink::spawn(pool.clone(), 4);

        let mut tasks = Vec::new();
        for n in 0..32 {
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move { sink.append(denied(n)).await }));
        }
        let mut rows = Vec::new();
        for task in tasks {
            rows.push(task.await.unwrap().unwrap().row);
        }
        rows.sort_unstable();
        rows.dedup();
        assert_eq!(rows.len(), 32);

        let stored = list_access(&pool, &LogFilter { limit: 100, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(stored.len(), 32);
        assert!(stored.iter().all(|s| s.record.display_name == "Tidak Dikenal"));
    }

    #[tokio::test]
    async fn test_storage_fault_is_reported() {
        let pool = make_pool("sqlite::memory:").await.unwrap();
        let (sink, _handle) = LogSink::spawn(pool.clone(), 4);
        pool.close().await;

        let err = sink.append(denied(1)).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_abandoned_append_leaves_queue_depth_unchanged() {
        let pool = make_pool("sqlite::memory:").await.unwrap();
        // No writer task: the single slot stays occupied
        let (tx, _rx) = mpsc::channel(1);
        let (reply, _wait) = oneshot::channel();
        tx.try_send(AppendRequest { record: denied(0), reply }).unwrap();

        let depth = Gauge::new("test_writer_queue_depth", "queue depth").unwrap();
        let sink = LogSink {
            tx,
            pool,
            depth: depth.clone(),
        };

        let waited = tokio::time::timeout(Duration::from_millis(50), sink.append(denied(1))).await;
        assert!(waited.is_err());
        assert_eq!(depth.get(), 0.0);
    }
}
