use crate::model::TableDescriptor;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static SUBMISSION_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

impl Fingerprint {
    pub fn short(&self) -> &str {
        &self.hex[..16.min(self.hex.len())]
    }
}

pub fn sha256_hex(s: &str) -> String {
    sha256_bytes_hex(s.as_bytes())
}

pub fn sha256_bytes_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Everything that determines the content of a materialized dataset.
pub struct DatasetContext<'a> {
    pub problem_id: &'a str,
    pub tables: &'a [TableDescriptor],
    /// `(table name, sha256 of the backing source bytes)` for every table with
    /// an external source.
    pub source_hashes: &'a [(String, String)],
}

/// Computes a deterministic fingerprint for a problem's dataset. Any change
/// to a declaration or to backing bytes yields a new fingerprint.
pub fn dataset(ctx: DatasetContext<'_>) -> Fingerprint {
    let mut parts = Vec::new();
    parts.push(format!("problem={}", ctx.problem_id));

    for t in ctx.tables {
        // serde_json emits struct fields in declaration order, so this is stable
        let decl = serde_json::to_string(t).unwrap_or_default();
        parts.push(format!("table={}", decl));
    }

    let mut sources = ctx.source_hashes.to_vec();
    sources.sort();
    for (table, hash) in sources {
        parts.push(format!("source={}:{}", table, hash));
    }

    // loader version: materialization changes invalidate everything
    parts.push(format!("sqlgrade_version={}", env!("CARGO_PKG_VERSION")));

    let raw = parts.join("\n");
    let hex = sha256_hex(&raw);

    Fingerprint {
        hex,
        components: parts,
    }
}

/// Stable, unique id for a submission.
pub fn submission_id(
    problem_id: &str,
    submitter_id: &str,
    query_text: &str,
    submitted_at: &chrono::DateTime<chrono::Utc>,
) -> String {
    let seq = SUBMISSION_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut h = Sha256::new();
    h.update(problem_id.as_bytes());
    h.update(b"\n");
    h.update(submitter_id.as_bytes());
    h.update(b"\n");
    h.update(query_text.as_bytes());
    h.update(b"\n");
    h.update(submitted_at.to_rfc3339().as_bytes());
    h.update(b"\n");
    h.update(seq.to_le_bytes());
    let digest = hex::encode(h.finalize());
    format!("sub-{}", &digest[..16])
}
