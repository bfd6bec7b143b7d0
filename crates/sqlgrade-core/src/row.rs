//! Canonical cell and row types.
//!
//! Every value that takes part in grading, whether it came out of the query
//! engine or out of an authored expected-output block, is converted into a
//! [`Cell`] exactly once. Downstream code (comparator, scorer, reports) only
//! ever sees [`CanonicalRow`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Largest magnitude at which an `f64` still represents every integer exactly.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    /// Builds a canonical text cell. Strings that parse as a date or timestamp
    /// are rewritten into the single canonical form used for comparison.
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        match canonical_timestamp(&s) {
            Some(ts) => Cell::Text(ts),
            None => Cell::Text(s),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Cell::Real(f)
                } else {
                    Cell::text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Cell::text(s.as_str()),
            // nested structures have no column semantics; compare their JSON text
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Integer(i) => serde_json::json!(i),
            Cell::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(canonical_float(*f))),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Real(f) => Some(*f),
            _ => None,
        }
    }

    /// The canonical textual form. Numbers are formatted so that `42` and
    /// `42.0` share one representation; NULL has its own marker and never
    /// collapses into the empty string.
    pub fn canonical(&self) -> String {
        match self {
            Cell::Null => "NULL".to_string(),
            Cell::Integer(i) => i.to_string(),
            Cell::Real(f) => canonical_float(*f),
            Cell::Text(s) => format!("'{}'", s),
        }
    }

    /// Exact equality on canonical form, or absolute-tolerance equality when
    /// both sides are numeric and a tolerance is supplied.
    pub fn matches(&self, other: &Cell, tolerance: Option<f64>) -> bool {
        if let (Some(tol), Some(a), Some(b)) = (tolerance, self.as_f64(), other.as_f64()) {
            return (a - b).abs() <= tol;
        }
        self.canonical() == other.canonical()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{:?}", s),
            other => f.write_str(&other.canonical()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(Cell::from_json(&v))
    }
}

fn canonical_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT {
        // integral floats share the integer representation
        format!("{}", f as i64)
    } else if f.is_nan() {
        "NaN".to_string()
    } else {
        // Display for f64 is the shortest string that round-trips
        format!("{}", f)
    }
}

/// Normalizes dates to `YYYY-MM-DD` and timestamps to
/// `YYYY-MM-DD HH:MM:SS[.fff]` in UTC. Returns `None` for anything else.
pub fn canonical_timestamp(s: &str) -> Option<String> {
    let t = s.trim();
    let b = t.as_bytes();
    if b.len() < 10 || b.len() > 40 || !b[..4].iter().all(u8::is_ascii_digit) || b[4] != b'-' {
        return None;
    }

    if b.len() == 10 {
        return NaiveDate::parse_from_str(t, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%Y-%m-%d").to_string());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(format_naive(dt.with_timezone(&Utc).naive_utc()));
    }

    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(format_naive(dt));
        }
    }
    None
}

fn format_naive(dt: NaiveDateTime) -> String {
    use chrono::Timelike;
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        let s = dt.format("%Y-%m-%d %H:%M:%S%.f").to_string();
        s.trim_end_matches('0').to_string()
    }
}

/// Ordered column-name to value mapping. Column order is the order the query
/// (or the author) produced; lookups by name are ASCII case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRow {
    cells: Vec<(String, Cell)>,
}

impl CanonicalRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Cell)>,
        K: Into<String>,
    {
        let mut row = Self::new();
        for (k, v) in pairs {
            row.push(k, v);
        }
        row
    }

    pub fn push(&mut self, column: impl Into<String>, value: Cell) {
        self.cells.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Rough in-memory footprint, used for result memory accounting.
    pub fn approx_bytes(&self) -> usize {
        self.cells
            .iter()
            .map(|(name, v)| {
                name.len()
                    + match v {
                        Cell::Null => 1,
                        Cell::Integer(_) | Cell::Real(_) => 8,
                        Cell::Text(s) => s.len(),
                    }
            })
            .sum::<usize>()
            + 24
    }
}

impl Serialize for CanonicalRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (k, v) in &self.cells {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CanonicalRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = CanonicalRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of column name to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut row = CanonicalRow::new();
                while let Some((k, v)) = access.next_entry::<String, Cell>()? {
                    row.push(k, v);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}
