use crate::row::CanonicalRow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub version: u32,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub tables: Vec<TableDescriptor>,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: ProblemSettings,
    pub tests: Vec<TestCase>,
}

impl Problem {
    pub fn public_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.iter().filter(|t| !t.hidden)
    }

    pub fn hidden_count(&self) -> usize {
        self.tests.iter().filter(|t| t.hidden).count()
    }
}

fn is_default_settings(s: &ProblemSettings) -> bool {
    s == &ProblemSettings::default()
}

/// One declared table: its schema, inline rows, and where the full data lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<CanonicalRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DataSource>,
}

impl TableDescriptor {
    pub const SAMPLE_ROWS: usize = 5;

    pub fn sample_rows(&self) -> &[CanonicalRow] {
        &self.rows[..self.rows.len().min(Self::SAMPLE_ROWS)]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", default = "default_column_type")]
    pub ty: String,
}

fn default_column_type() -> String {
    "TEXT".to_string()
}

/// Backing data for a table beyond its inline rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// JSON array of row objects, or JSON lines. `uri` is a local path or an
    /// http(s) object-storage URL.
    Json { uri: String },
    /// A table inside an existing SQLite database file.
    Sqlite {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProblemSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_concurrency: Option<usize>,
    #[serde(default)]
    pub scoring: ScoringMode,
    #[serde(default)]
    pub display: DisplayPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// A test case is worth its full weight only when its output matches.
    #[default]
    Binary,
    /// A test case earns the fraction of its rows that matched.
    RowFraction,
}

/// Which public test cases keep their row data in caller-facing output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPolicy {
    #[default]
    FirstPublic,
    AllPublic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "is_hidden")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub compare: ComparisonPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitOverrides>,
    #[serde(default)]
    pub expected: Vec<CanonicalRow>,
}

impl TestCase {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LimitOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,
}

/// Per-test-case comparison policy. Each axis is a closed set of variants.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ComparisonPolicy {
    #[serde(default)]
    pub order: RowOrder,
    #[serde(default)]
    pub columns: ColumnMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    /// Row i of the actual output is graded against row i of the expected output.
    #[default]
    Ordered,
    /// Multiset equality; rows are paired by value.
    Unordered,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMatch {
    /// Only columns named in the expected output are graded; extra actual
    /// columns are tolerated.
    #[default]
    ExpectedSubset,
    /// The actual column set must equal the expected column set.
    Exact,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Fast feedback: only the first public test case is executed.
    Run,
    /// All test cases, result persisted.
    #[default]
    Submit,
}

/// Caller -> engine request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRequest {
    pub problem_id: String,
    pub submitter_id: String,
    pub query_text: String,
    #[serde(default)]
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub problem_id: String,
    pub submitter_id: String,
    pub query_text: String,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    QueryError,
    Timeout,
    ResourceExceeded,
    ForbiddenStatement,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::QueryError => "query_error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::ResourceExceeded => "resource_exceeded",
            ExecutionStatus::ForbiddenStatement => "forbidden_statement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "query_error" => Some(ExecutionStatus::QueryError),
            "timeout" => Some(ExecutionStatus::Timeout),
            "resource_exceeded" => Some(ExecutionStatus::ResourceExceeded),
            "forbidden_statement" => Some(ExecutionStatus::ForbiddenStatement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowComparison {
    pub row_index: usize,
    pub matches: bool,
    pub actual_row: Option<CanonicalRow>,
    pub expected_row: Option<CanonicalRow>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub differences: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub row_comparisons: Vec<RowComparison>,
    pub matching_row_count: usize,
    pub total_row_count: usize,
    pub comparison_differences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case_id: String,
    pub test_case_name: String,
    pub is_hidden: bool,
    pub is_correct: bool,
    pub score: f64,
    #[serde(default)]
    pub feedback: Vec<String>,
    pub execution_time_ms: u64,
    pub execution_status: ExecutionStatus,
    pub validation_details: ValidationDetails,
    pub user_output: Vec<CanonicalRow>,
    pub expected_output: Vec<CanonicalRow>,
    pub output_matches: bool,
    /// Verbatim engine message for query errors and limit violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub memory_used_bytes: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub redacted: bool,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub avg_time_ms: f64,
    pub max_time_ms: u64,
    pub memory_used_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    pub is_correct: bool,
    pub score: f64,
    pub feedback: Vec<String>,
    pub test_results: Vec<TestResult>,
    pub submission_id: String,
    pub execution_stats: ExecutionStats,
}

impl SubmissionResult {
    /// The shape every infrastructure failure resolves into.
    pub fn failed(submission_id: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            is_correct: false,
            score: 0.0,
            feedback: vec![message.into()],
            test_results: Vec::new(),
            submission_id: submission_id.to_string(),
            execution_stats: ExecutionStats::default(),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.test_results.iter().filter(|t| t.is_correct).count()
    }
}
