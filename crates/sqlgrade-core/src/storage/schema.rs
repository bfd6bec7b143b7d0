pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS submissions (
  id            TEXT PRIMARY KEY,
  problem_id    TEXT NOT NULL,
  submitter_id  TEXT NOT NULL,
  query_sha256  TEXT NOT NULL,
  submitted_at  TEXT NOT NULL,
  success       INTEGER NOT NULL,
  is_correct    INTEGER NOT NULL,
  score         REAL NOT NULL,
  result_json   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_submissions_problem
  ON submissions(problem_id, submitted_at);

CREATE TABLE IF NOT EXISTS test_results (
  id                INTEGER PRIMARY KEY AUTOINCREMENT,
  submission_id     TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
  position          INTEGER NOT NULL,
  test_case_id      TEXT NOT NULL,
  is_hidden         INTEGER NOT NULL,
  is_correct        INTEGER NOT NULL,
  score             REAL NOT NULL,
  execution_status  TEXT NOT NULL,
  execution_time_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_test_results_submission
  ON test_results(submission_id, position);
"#;
