use crate::methods::MethodError;
use std::path::{Component, Path, PathBuf};

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Maps a problem id onto a file under the problem root.
///
/// The id is checked lexically first (no absolute paths, no `..` above the
/// root). An existing file is then canonicalized so a symlink cannot point
/// outside the root.
pub fn resolve_problem_path(root_canon: &Path, problem_id: &str) -> Result<PathBuf, MethodError> {
    if problem_id.trim().is_empty() {
        return Err(MethodError::new("E_INVALID_REQUEST", "problem_id is empty"));
    }

    let up = Path::new(problem_id);
    if up.is_absolute() {
        return Err(MethodError::new(
            "E_PERMISSION_DENIED",
            "absolute paths are not allowed",
        ));
    }

    let mut base = PathBuf::from(root_canon);
    let root_len = base.components().count();
    for c in up.components() {
        match c {
            Component::CurDir => {}
            Component::Normal(seg) => base.push(seg),
            Component::ParentDir => {
                if base.components().count() <= root_len {
                    return Err(MethodError::new(
                        "E_PERMISSION_DENIED",
                        "path escapes problem_root",
                    ));
                }
                base.pop();
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(MethodError::new(
                    "E_PERMISSION_DENIED",
                    "path prefixes/root are not allowed",
                ));
            }
        }
    }
    if base.components().count() <= root_len {
        return Err(MethodError::new(
            "E_PERMISSION_DENIED",
            "problem_id resolves to problem_root itself",
        ));
    }

    for ext in EXTENSIONS {
        let mut candidate = base.clone().into_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if !candidate.exists() {
            continue;
        }
        let canon = std::fs::canonicalize(&candidate).map_err(|e| {
            MethodError::new("E_PROBLEM_READ", &format!("canonicalize failed: {e}"))
        })?;
        if !canon.starts_with(root_canon) {
            return Err(MethodError::new(
                "E_PERMISSION_DENIED",
                "problem resolves outside problem_root",
            ));
        }
        return Ok(canon);
    }

    Err(MethodError::new(
        "E_PROBLEM_NOT_FOUND",
        &format!("no problem definition for '{}'", problem_id),
    ))
}
