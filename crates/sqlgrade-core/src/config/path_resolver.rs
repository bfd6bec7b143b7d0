use std::path::{Path, PathBuf};

/// Resolves paths written inside a problem file relative to that file.
#[derive(Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

impl PathResolver {
    pub fn new(problem_path: &Path) -> Self {
        let base_dir = problem_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        Self { base_dir }
    }

    /// Rewrites a relative local path in place. URLs and absolute paths are
    /// left untouched.
    pub fn resolve_str(&self, s: &mut String) {
        if s.trim().is_empty() || is_url(s) {
            return;
        }
        let pb = PathBuf::from(&*s);
        if pb.is_absolute() {
            return;
        }

        let joined = self.join_clean(&pb);
        *s = joined.to_string_lossy().to_string();
    }

    fn join_clean(&self, rel: &Path) -> PathBuf {
        let joined = self.base_dir.join(rel);

        let mut out = PathBuf::new();
        for c in joined.components() {
            use std::path::Component::*;
            match c {
                CurDir => {}
                ParentDir => {
                    out.pop();
                }
                RootDir | Prefix(_) | Normal(_) => out.push(c.as_os_str()),
            }
        }
        out
    }
}

pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_join_problem_dir() {
        let r = PathResolver::new(Path::new("/srv/problems/p1.yaml"));
        let mut s = "data/../data/orders.jsonl".to_string();
        r.resolve_str(&mut s);
        assert_eq!(s, "/srv/problems/data/orders.jsonl");
    }

    #[test]
    fn test_urls_and_absolute_untouched() {
        let r = PathResolver::new(Path::new("/srv/problems/p1.yaml"));
        let mut url = "https://bucket.example.com/orders.json".to_string();
        r.resolve_str(&mut url);
        assert_eq!(url, "https://bucket.example.com/orders.json");

        let mut abs = "/data/x.db".to_string();
        r.resolve_str(&mut abs);
        assert_eq!(abs, "/data/x.db");
    }
}
