//! Sandbox executor: runs one untrusted query against a materialized dataset
//! under wall-clock, row and memory limits.
//!
//! Every execution opens its own read-only connection, runs on the blocking
//! pool and drops the connection on every exit path. Timeouts and
//! cancellation interrupt the in-flight statement rather than abandoning it.

pub mod statement;

use crate::dataset::Dataset;
use crate::engine::cancel::CancelSignal;
use crate::errors::ExecutionError;
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::limits::Limit;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// VM instructions between progress callbacks.
const PROGRESS_OPS: i32 = 1_000;

/// Floor for the per-value length limit so small memory caps still admit
/// ordinary dataset rows.
const MIN_VALUE_LENGTH: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub max_rows: usize,
    pub max_memory_bytes: u64,
}

impl SandboxLimits {
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Result set exactly as the engine returned it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Approximate bytes held by `rows`.
    pub memory_bytes: u64,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        query: &str,
        limits: SandboxLimits,
        cancel: CancelSignal,
    ) -> Result<RawResult, ExecutionError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Default, Clone)]
pub struct SqliteSandbox;

#[async_trait]
impl QueryExecutor for SqliteSandbox {
    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        query: &str,
        limits: SandboxLimits,
        cancel: CancelSignal,
    ) -> Result<RawResult, ExecutionError> {
        statement::check(query)?;
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let conn = open_readonly(dataset.path(), &limits)?;
        let interrupt = conn.get_interrupt_handle();
        let deadline = Instant::now() + limits.timeout;
        let stop = cancel.flag();
        let sql = query.to_string();

        // the handle keeps the dataset file alive until the blocking task ends
        let task = tokio::task::spawn_blocking(move || {
            let _dataset = dataset;
            run_query(conn, &sql, limits, deadline, stop)
        });
        tokio::pin!(task);

        let outcome = tokio::select! {
            joined = &mut task => return flatten(joined),
            _ = tokio::time::sleep_until(deadline.into()) => Err(ExecutionError::Timeout {
                limit_ms: limits.timeout_ms(),
            }),
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
        };

        tracing::debug!(event = "sandbox_interrupt", reason = ?outcome);
        interrupt.interrupt();
        // wait for the statement to unwind so the connection is closed
        // before the caller moves on
        let _ = flatten(task.await);
        outcome
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

fn flatten(
    joined: Result<Result<RawResult, ExecutionError>, tokio::task::JoinError>,
) -> Result<RawResult, ExecutionError> {
    match joined {
        Ok(r) => r,
        Err(e) => Err(ExecutionError::Infrastructure(format!(
            "sandbox task failed: {}",
            e
        ))),
    }
}

fn open_readonly(path: &Path, limits: &SandboxLimits) -> Result<Connection, ExecutionError> {
    let infra = |e: rusqlite::Error| {
        ExecutionError::Infrastructure(format!("cannot open dataset {}: {}", path.display(), e))
    };
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(infra)?;

    // Page caches and the sorter's in-memory run are sized from cache_size;
    // with temp_store = FILE anything larger spills to disk instead of heap.
    // Negative cache_size means KiB.
    let cache_kib = (limits.max_memory_bytes / 1024).clamp(256, 256 * 1024);
    conn.execute_batch(&format!(
        "PRAGMA temp_store = FILE; PRAGMA cache_size = -{kib}; PRAGMA temp.cache_size = -{kib}; PRAGMA query_only = ON;",
        kib = cache_kib
    ))
    .map_err(infra)?;
    // any single string, blob or row larger than the limit fails with TOOBIG
    let _ = conn.set_limit(Limit::SQLITE_LIMIT_LENGTH, value_length_limit(limits));
    Ok(conn)
}

fn value_length_limit(limits: &SandboxLimits) -> i32 {
    limits
        .max_memory_bytes
        .clamp(MIN_VALUE_LENGTH, i32::MAX as u64) as i32
}

fn run_query(
    conn: Connection,
    sql: &str,
    limits: SandboxLimits,
    deadline: Instant,
    stop: Arc<AtomicBool>,
) -> Result<RawResult, ExecutionError> {
    let interrupted = {
        let stop = stop.clone();
        move |_: rusqlite::Error| {
            if stop.load(Ordering::SeqCst) {
                ExecutionError::Cancelled
            } else {
                ExecutionError::Timeout {
                    limit_ms: limits.timeout_ms(),
                }
            }
        }
    };
    let map_err = |e: rusqlite::Error| match classify(&e) {
        Failure::Interrupted => interrupted(e),
        Failure::Other(err) => err,
    };

    let stop_cb = stop.clone();
    conn.progress_handler(
        PROGRESS_OPS,
        Some(move || stop_cb.load(Ordering::SeqCst) || Instant::now() >= deadline),
    );

    let mut stmt = conn.prepare(sql).map_err(map_err)?;
    if !stmt.readonly() {
        return Err(ExecutionError::Forbidden(
            "statement would modify the database".into(),
        ));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows_out: Vec<Vec<Value>> = Vec::new();
    let mut bytes: u64 = 0;

    let mut rows = stmt.query([]).map_err(map_err)?;
    while let Some(row) = rows.next().map_err(map_err)? {
        if rows_out.len() >= limits.max_rows {
            return Err(ExecutionError::ResourceExceeded(format!(
                "result has more than {} rows",
                limits.max_rows
            )));
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            let v: Value = row.get(i).map_err(map_err)?;
            bytes += value_bytes(&v);
            values.push(v);
        }
        if bytes > limits.max_memory_bytes {
            return Err(ExecutionError::ResourceExceeded(format!(
                "result exceeds {} MB",
                limits.max_memory_bytes / (1024 * 1024)
            )));
        }
        rows_out.push(values);
    }

    Ok(RawResult {
        columns,
        rows: rows_out,
        memory_bytes: bytes,
    })
}

fn value_bytes(v: &Value) -> u64 {
    let payload = match v {
        Value::Null => 0,
        Value::Integer(_) | Value::Real(_) => 8,
        Value::Text(s) => s.len(),
        Value::Blob(b) => b.len(),
    };
    // enum tag plus heap header
    payload as u64 + 24
}

enum Failure {
    Interrupted,
    Other(ExecutionError),
}

fn classify(e: &rusqlite::Error) -> Failure {
    match e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            let text = msg.clone().unwrap_or_else(|| err.to_string());
            match err.code {
                ErrorCode::OperationInterrupted => Failure::Interrupted,
                ErrorCode::OutOfMemory | ErrorCode::TooBig => {
                    Failure::Other(ExecutionError::ResourceExceeded(text))
                }
                ErrorCode::ReadOnly | ErrorCode::AuthorizationForStatementDenied => {
                    Failure::Other(ExecutionError::Forbidden(text))
                }
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied => {
                    Failure::Other(ExecutionError::Infrastructure(text))
                }
                _ => Failure::Other(ExecutionError::Query(text)),
            }
        }
        other => Failure::Other(ExecutionError::Query(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_problem;
    use crate::dataset::DatasetLoader;
    use crate::engine::cancel;

    const PROBLEM: &str = r#"
id: sandbox
tables:
  - name: nums
    columns: [{ name: n, type: INTEGER }, { name: label, type: TEXT }]
    rows: [{ n: 1, label: one }, { n: 2, label: two }, { n: 3, label: three }]
tests:
  - id: c1
    expected: []
"#;

    fn limits() -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_secs(5),
            max_rows: 100,
            max_memory_bytes: 1024 * 1024,
        }
    }

    async fn dataset(dir: &Path) -> Arc<Dataset> {
        let loader = DatasetLoader::new(dir, 4);
        loader.load(&parse_problem(PROBLEM, true).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_select_returns_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let raw = SqliteSandbox
            .execute(ds, "SELECT n, label FROM nums ORDER BY n DESC", limits(), CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(raw.columns, vec!["n", "label"]);
        assert_eq!(raw.rows.len(), 3);
        assert_eq!(raw.rows[0][0], Value::Integer(3));
        assert!(raw.memory_bytes > 0);
    }

    #[tokio::test]
    async fn test_query_error_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let err = SqliteSandbox
            .execute(ds, "SELECT nope FROM nums", limits(), CancelSignal::never())
            .await
            .unwrap_err();
        match err {
            ExecutionError::Query(msg) => assert!(msg.contains("no such column"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cte_with_write_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let err = SqliteSandbox
            .execute(
                ds.clone(),
                "WITH x AS (SELECT 1) DELETE FROM nums",
                limits(),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Forbidden(_)), "{:?}", err);

        // dataset untouched
        let raw = SqliteSandbox
            .execute(ds, "SELECT count(*) FROM nums", limits(), CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(raw.rows[0][0], Value::Integer(3));
    }

    #[tokio::test]
    async fn test_runaway_query_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let mut l = limits();
        l.timeout = Duration::from_millis(200);
        let started = Instant::now();
        let err = SqliteSandbox
            .execute(
                ds,
                "WITH RECURSIVE r(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM r) SELECT count(*) FROM r",
                l,
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Timeout { limit_ms: 200 });
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_execution() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let (handle, signal) = cancel::pair();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });
        let err = SqliteSandbox
            .execute(
                ds,
                "WITH RECURSIVE r(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM r) SELECT count(*) FROM r",
                limits(),
                signal,
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err, ExecutionError::Cancelled);
    }

    #[tokio::test]
    async fn test_row_cap() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let mut l = limits();
        l.max_rows = 2;
        let err = SqliteSandbox
            .execute(ds, "SELECT * FROM nums", l, CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ResourceExceeded(_)));
    }

    #[tokio::test]
    async fn test_oversized_value_is_resource_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let err = SqliteSandbox
            .execute(
                ds,
                "SELECT length(randomblob(4 * 1024 * 1024))",
                limits(),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ResourceExceeded(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_large_sort_spills_instead_of_growing_heap() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;

        let conn = open_readonly(ds.path(), &limits()).unwrap();
        let temp_store: i64 = conn
            .query_row("PRAGMA temp_store", [], |r| r.get(0))
            .unwrap();
        assert_eq!(temp_store, 1);
        let cache: i64 = conn
            .query_row("PRAGMA temp.cache_size", [], |r| r.get(0))
            .unwrap();
        assert_eq!(cache, -1024);
        assert_eq!(conn.limit(Limit::SQLITE_LIMIT_LENGTH), 1024 * 1024);
        drop(conn);

        // about 20 MB of sort keys under a 1 MiB cap
        let raw = SqliteSandbox
            .execute(
                ds,
                "WITH RECURSIVE r(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM r WHERE i < 20000) \
                 SELECT count(*) FROM (SELECT randomblob(1000) AS b FROM r ORDER BY b)",
                limits(),
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(raw.rows[0][0], Value::Integer(20000));
    }

    #[tokio::test]
    async fn test_memory_cap() {
        let dir = tempfile::tempdir().unwrap();
        let ds = dataset(dir.path()).await;
        let mut l = limits();
        l.max_memory_bytes = 4096;
        let err = SqliteSandbox
            .execute(
                ds,
                "SELECT replace(hex(zeroblob(1000)), '0', 'x') FROM nums",
                l,
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ResourceExceeded(_)), "{:?}", err);
    }
}
