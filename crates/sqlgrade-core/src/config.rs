use crate::errors::ConfigError;
use crate::model::{DataSource, Problem};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

pub mod path_resolver;

pub const SUPPORTED_PROBLEM_VERSION: u32 = 1;

/// Process-level defaults. Problem settings and per-case overrides take
/// precedence over these.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub timeout_ms: u64,
    pub max_rows: usize,
    pub max_memory_mb: u64,
    pub overhead_ms: u64,
    pub case_concurrency: usize,
    pub workers: usize,
    pub dataset_cache_entries: u64,
    pub cache_dir: PathBuf,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_rows: 10_000,
            max_memory_mb: 64,
            overhead_ms: 2000,
            case_concurrency: 1,
            workers: 4,
            dataset_cache_entries: 64,
            cache_dir: env::temp_dir().join("sqlgrade-datasets"),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse("SQLGRADE_TIMEOUT_MS") {
            cfg.timeout_ms = n;
        }
        if let Some(n) = env_parse("SQLGRADE_MAX_ROWS") {
            cfg.max_rows = n;
        }
        if let Some(n) = env_parse("SQLGRADE_MAX_MEMORY_MB") {
            cfg.max_memory_mb = n;
        }
        if let Some(n) = env_parse("SQLGRADE_OVERHEAD_MS") {
            cfg.overhead_ms = n;
        }
        if let Some(n) = env_parse::<usize>("SQLGRADE_CASE_CONCURRENCY") {
            cfg.case_concurrency = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("SQLGRADE_WORKERS") {
            cfg.workers = n.max(1);
        }
        if let Some(n) = env_parse("SQLGRADE_DATASET_CACHE_ENTRIES") {
            cfg.dataset_cache_entries = n;
        }
        if let Ok(v) = env::var("SQLGRADE_CACHE_DIR") {
            if !v.trim().is_empty() {
                cfg.cache_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("SQLGRADE_LOG") {
            cfg.log_level = v;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let v = env::var(key).ok()?;
    match v.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(event = "config_env_invalid", key = key, value = %v);
            None
        }
    }
}

pub fn load_problem(path: &Path, strict: bool) -> Result<Problem, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read problem {}: {}", path.display(), e)))?;
    parse_problem_at(&raw, path, strict)
}

/// Like [`parse_problem`], for content already read from `path`. Relative
/// source paths resolve against the file's directory.
pub fn parse_problem_at(raw: &str, path: &Path, strict: bool) -> Result<Problem, ConfigError> {
    let mut problem = parse_problem(raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e, path.display())))?;
    normalize_paths(&mut problem, path);
    Ok(problem)
}

/// Parses and validates a problem definition. Source paths are left as
/// written; [`load_problem`] resolves them against the file location.
pub fn parse_problem(raw: &str, strict: bool) -> Result<Problem, ConfigError> {
    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let problem: Problem = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse problem: {}", e)))?;

    let meaningful: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .cloned()
        .collect();
    if !meaningful.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?}",
                meaningful
            )));
        }
        tracing::warn!(
            event = "problem_unknown_fields",
            problem_id = %problem.id,
            fields = ?meaningful,
            "ignored unknown problem fields"
        );
    }

    validate_problem(&problem)?;
    Ok(problem)
}

pub fn validate_problem(p: &Problem) -> Result<(), ConfigError> {
    if p.version != 0 && p.version != SUPPORTED_PROBLEM_VERSION {
        return Err(ConfigError(format!(
            "unsupported problem version {} (supported: 0, {})",
            p.version, SUPPORTED_PROBLEM_VERSION
        )));
    }
    if p.id.trim().is_empty() {
        return Err(ConfigError("problem id is empty".into()));
    }
    if p.tables.is_empty() {
        return Err(ConfigError(format!("problem '{}' declares no tables", p.id)));
    }
    if p.tests.is_empty() {
        return Err(ConfigError(format!("problem '{}' has no tests", p.id)));
    }

    let mut names = HashSet::new();
    for t in &p.tables {
        if !is_identifier(&t.name) {
            return Err(ConfigError(format!("invalid table name '{}'", t.name)));
        }
        if !names.insert(t.name.to_ascii_lowercase()) {
            return Err(ConfigError(format!("duplicate table '{}'", t.name)));
        }
        if t.columns.is_empty() {
            return Err(ConfigError(format!("table '{}' has no columns", t.name)));
        }
        let mut cols = HashSet::new();
        for c in &t.columns {
            if !is_identifier(&c.name) {
                return Err(ConfigError(format!(
                    "invalid column name '{}.{}'",
                    t.name, c.name
                )));
            }
            if !is_column_type(&c.ty) {
                return Err(ConfigError(format!(
                    "invalid column type '{}' for '{}.{}'",
                    c.ty, t.name, c.name
                )));
            }
            if !cols.insert(c.name.to_ascii_lowercase()) {
                return Err(ConfigError(format!(
                    "duplicate column '{}.{}'",
                    t.name, c.name
                )));
            }
        }
        if let Some(DataSource::Sqlite {
            table: Some(src), ..
        }) = &t.source
        {
            if !is_identifier(src) {
                return Err(ConfigError(format!("invalid source table name '{}'", src)));
            }
        }
    }

    let mut ids = HashSet::new();
    for tc in &p.tests {
        if !ids.insert(tc.id.as_str()) {
            return Err(ConfigError(format!("duplicate test id '{}'", tc.id)));
        }
        if let Some(w) = tc.weight {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError(format!("test '{}' has invalid weight {}", tc.id, w)));
            }
        }
        if let Some(tol) = tc.compare.tolerance {
            if !tol.is_finite() || tol < 0.0 {
                return Err(ConfigError(format!(
                    "test '{}' has invalid tolerance {}",
                    tc.id, tol
                )));
            }
        }
    }
    Ok(())
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_column_type(s: &str) -> bool {
    let re = regex::Regex::new(r"^[A-Za-z][A-Za-z ]*(\(\s*\d+\s*(,\s*\d+\s*)?\))?$");
    match re {
        Ok(re) => s.len() <= 64 && re.is_match(s.trim()),
        Err(_) => false,
    }
}

fn normalize_paths(p: &mut Problem, problem_path: &Path) {
    let r = path_resolver::PathResolver::new(problem_path);
    for t in &mut p.tables {
        match &mut t.source {
            Some(DataSource::Json { uri }) => r.resolve_str(uri),
            Some(DataSource::Sqlite { path, .. }) => r.resolve_str(path),
            None => {}
        }
    }
}

pub const SAMPLE_PROBLEM: &str = r#"version: 1
id: top-customers
title: Top customers by revenue
tables:
  - name: customers
    columns:
      - { name: id, type: INTEGER }
      - { name: name, type: TEXT }
      - { name: region, type: TEXT }
    rows:
      - { id: 1, name: Ada, region: north }
      - { id: 2, name: Brook, region: south }
      - { id: 3, name: Cyd, region: north }
  - name: orders
    columns:
      - { name: id, type: INTEGER }
      - { name: customer_id, type: INTEGER }
      - { name: amount, type: REAL }
      - { name: placed_at, type: TEXT }
    rows:
      - { id: 10, customer_id: 1, amount: 120.5, placed_at: "2024-01-03 09:00:00" }
      - { id: 11, customer_id: 2, amount: 80.0, placed_at: "2024-01-04 10:30:00" }
      - { id: 12, customer_id: 1, amount: 19.5, placed_at: "2024-01-05 11:45:00" }
settings:
  timeout_ms: 3000
  scoring: binary
tests:
  - id: t1
    name: revenue per customer
    expected:
      - { name: Ada, revenue: 140 }
      - { name: Brook, revenue: 80 }
  - id: t2
    name: hidden check
    hidden: true
    compare: { order: unordered }
    expected:
      - { name: Brook, revenue: 80 }
      - { name: Ada, revenue: 140 }
"#;

pub fn write_sample_problem(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_PROBLEM)
        .map_err(|e| ConfigError(format!("failed to write sample problem: {}", e)))?;
    Ok(())
}
