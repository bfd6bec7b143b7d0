use sha2::{Digest, Sha256};

/// Cache key for a materialized dataset: problem id plus content fingerprint.
pub fn dataset_key(problem_id: &str, fingerprint: &str) -> String {
    format!("{}:{}", problem_id, fingerprint)
}

/// Cache key for a parsed document: canonical path plus content hash, so an
/// edited file never hits a stale entry.
pub fn document_key(abs_path: &str, content: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(content);
    format!("{}:{:x}", abs_path, h.finalize())
}
