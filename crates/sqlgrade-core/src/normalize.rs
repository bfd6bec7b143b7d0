//! Result normalizer: engine values to [`CanonicalRow`]s.

use crate::row::{CanonicalRow, Cell};
use crate::sandbox::RawResult;
use rusqlite::types::Value;
use std::collections::{HashMap, HashSet};

/// Converts a raw result set into canonical rows. Column order is kept as the
/// query returned it; repeated column names are suffixed (`total`, `total:1`)
/// so no value is shadowed by a same-named column.
pub fn normalize(raw: &RawResult) -> Vec<CanonicalRow> {
    let names = unique_column_names(&raw.columns);
    raw.rows
        .iter()
        .map(|values| {
            CanonicalRow::from_pairs(
                names
                    .iter()
                    .zip(values.iter())
                    .map(|(name, v)| (name.clone(), cell(v))),
            )
        })
        .collect()
}

pub fn cell(v: &Value) -> Cell {
    match v {
        Value::Null => Cell::Null,
        Value::Integer(i) => Cell::Integer(*i),
        Value::Real(f) => Cell::Real(*f),
        Value::Text(s) => Cell::text(s.as_str()),
        Value::Blob(b) => Cell::Text(format!("x'{}'", hex::encode(b))),
    }
}

fn unique_column_names(columns: &[String]) -> Vec<String> {
    // names as returned are claimed first so a suffix never shadows one
    let mut taken: HashSet<String> = HashSet::new();
    let claimed: Vec<bool> = columns
        .iter()
        .map(|c| taken.insert(c.to_ascii_lowercase()))
        .collect();

    let mut next: HashMap<String, usize> = HashMap::new();
    columns
        .iter()
        .zip(claimed)
        .map(|(c, kept)| {
            if kept {
                return c.clone();
            }
            let n = next.entry(c.to_ascii_lowercase()).or_insert(1);
            loop {
                let candidate = format!("{}:{}", c, n);
                *n += 1;
                if taken.insert(candidate.to_ascii_lowercase()) {
                    return candidate;
                }
            }
        })
        .collect()
}
