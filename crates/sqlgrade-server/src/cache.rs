use crate::methods::MethodError;
use moka::sync::Cache;
use sqlgrade_core::cache::key::document_key;
use sqlgrade_core::config::parse_problem_at;
use sqlgrade_core::model::Problem;
use std::path::Path;
use std::sync::Arc;

/// Parsed problem definitions keyed by canonical path plus content hash;
/// editing a problem file on disk yields a new entry on the next request.
pub struct ProblemCache {
    problems: Cache<String, Arc<Problem>>,
}

impl ProblemCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            problems: Cache::new(max_entries),
        }
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Problem>, MethodError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MethodError::new("E_PROBLEM_READ", &format!("failed to read problem: {e}"))
        })?;
        let key = document_key(&path.to_string_lossy(), raw.as_bytes());
        if let Some(p) = self.problems.get(&key) {
            tracing::debug!(event = "problem_cache_hit", path = %path.display());
            return Ok(p);
        }

        let problem = parse_problem_at(&raw, path, false)
            .map_err(|e| MethodError::new("E_CFG_PARSE", &e.to_string()))?;
        let problem = Arc::new(problem);
        self.problems.insert(key, problem.clone());
        Ok(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: &str = "id: p1\ntables:\n  - name: t\n    columns: [{ name: x, type: INTEGER }]\n    rows: [{ x: 1 }]\ntests:\n  - id: c1\n    expected: [{ x: 1 }]\n";

    #[test]
    fn test_reload_on_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.yaml");
        std::fs::write(&path, P).unwrap();
        let cache = ProblemCache::new(8);

        let a = cache.load(&path).unwrap();
        let b = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        std::fs::write(&path, P.replace("x: 1 }]\ntests", "x: 2 }]\ntests")).unwrap();
        let c = cache.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "id: [").unwrap();
        let err = ProblemCache::new(8).load(&path).unwrap_err();
        assert_eq!(err.code, "E_CFG_PARSE");
    }
}
