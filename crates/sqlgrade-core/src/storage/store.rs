use crate::fingerprint::sha256_hex;
use crate::model::{Submission, SubmissionResult};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// One row of `submissions`, plus pass counts from `test_results`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SubmissionSummary {
    pub id: String,
    pub problem_id: String,
    pub submitter_id: String,
    pub query_sha256: String,
    pub submitted_at: String,
    pub success: bool,
    pub is_correct: bool,
    pub score: f64,
    pub passed: u32,
    pub total: u32,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    /// Persists a graded submission. The query text itself is not stored,
    /// only its SHA-256.
    pub fn insert_submission(
        &self,
        submission: &Submission,
        result: &SubmissionResult,
    ) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let result_json = serde_json::to_string(result)?;

        tx.execute(
            "INSERT INTO submissions
               (id, problem_id, submitter_id, query_sha256, submitted_at,
                success, is_correct, score, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                submission.id,
                submission.problem_id,
                submission.submitter_id,
                sha256_hex(&submission.query_text),
                submission.submitted_at.to_rfc3339(),
                result.success,
                result.is_correct,
                result.score,
                result_json,
            ],
        )
        .context("failed to insert submission")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_results
                   (submission_id, position, test_case_id, is_hidden, is_correct,
                    score, execution_status, execution_time_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (i, tr) in result.test_results.iter().enumerate() {
                stmt.execute(params![
                    submission.id,
                    i as i64,
                    tr.test_case_id,
                    tr.is_hidden,
                    tr.is_correct,
                    tr.score,
                    tr.execution_status.as_str(),
                    tr.execution_time_ms as i64,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn fetch_recent(
        &self,
        problem_id: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<SubmissionSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT
                s.id, s.problem_id, s.submitter_id, s.query_sha256, s.submitted_at,
                s.success, s.is_correct, s.score,
                (SELECT count(*) FROM test_results t WHERE t.submission_id = s.id AND t.is_correct = 1),
                (SELECT count(*) FROM test_results t WHERE t.submission_id = s.id)
             FROM submissions s
             WHERE s.problem_id = ?1
             ORDER BY s.submitted_at DESC, s.rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![problem_id, limit], |row| {
            Ok(SubmissionSummary {
                id: row.get(0)?,
                problem_id: row.get(1)?,
                submitter_id: row.get(2)?,
                query_sha256: row.get(3)?,
                submitted_at: row.get(4)?,
                success: row.get(5)?,
                is_correct: row.get(6)?,
                score: row.get(7)?,
                passed: row.get(8)?,
                total: row.get(9)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_submission(&self, id: &str) -> anyhow::Result<Option<SubmissionResult>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT result_json FROM submissions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(
                serde_json::from_str(&s).context("corrupt stored submission result")?,
            )),
            None => Ok(None),
        }
    }
}
