use super::source::parse_json_rows;
use crate::errors::DatasetError;
use crate::fingerprint::Fingerprint;
use crate::model::{ColumnDef, DataSource, TableDescriptor};
use crate::row::{CanonicalRow, Cell};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static BUILD_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn dataset_file_name(problem_id: &str, fp: &Fingerprint) -> String {
    let safe: String = problem_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    format!(
        "{}-{}-{}-{}.sqlite",
        safe,
        fp.short(),
        std::process::id(),
        BUILD_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Writes every declared table into a fresh SQLite file under `dir`.
///
/// Every build gets its own file, so removing a superseded dataset can never
/// pull the file out from under a newer handle. The database is built under a
/// temporary name and renamed into place, so a reader never observes a
/// half-written dataset.
pub fn materialize(
    dir: &Path,
    problem_id: &str,
    fp: &Fingerprint,
    tables: &[TableDescriptor],
    json_payloads: &HashMap<String, Vec<u8>>,
) -> Result<PathBuf, DatasetError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        DatasetError::unavailable(problem_id, format!("cannot create {}: {}", dir.display(), e))
    })?;

    let final_path = dir.join(dataset_file_name(problem_id, fp));
    let tmp_path = final_path.with_extension("tmp");

    let built = build(&tmp_path, problem_id, tables, json_payloads);
    if let Err(e) = built {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    std::fs::rename(&tmp_path, &final_path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        DatasetError::unavailable(problem_id, format!("cannot publish dataset: {}", e))
    })?;

    if let Ok(meta) = std::fs::metadata(&final_path) {
        let mut perms = meta.permissions();
        perms.set_readonly(true);
        let _ = std::fs::set_permissions(&final_path, perms);
    }

    Ok(final_path)
}

fn build(
    path: &Path,
    problem_id: &str,
    tables: &[TableDescriptor],
    json_payloads: &HashMap<String, Vec<u8>>,
) -> Result<(), DatasetError> {
    let unavailable = |e: rusqlite::Error| DatasetError::unavailable(problem_id, e);

    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(unavailable)?;
    conn.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = OFF;")
        .map_err(unavailable)?;

    for t in tables {
        conn.execute_batch(&create_table_sql(t)).map_err(unavailable)?;

        if let Some(DataSource::Sqlite { path: src, table }) = &t.source {
            copy_from_sqlite(&conn, problem_id, t, src, table.as_deref())?;
        }

        let tx = conn.transaction().map_err(unavailable)?;
        insert_rows(&tx, t, t.rows.iter()).map_err(unavailable)?;

        if let Some(DataSource::Json { uri }) = &t.source {
            let bytes = json_payloads.get(&t.name).ok_or_else(|| {
                DatasetError::unavailable(problem_id, format!("no payload fetched for {}", uri))
            })?;
            let objects = parse_json_rows(bytes).map_err(|e| DatasetError::Invalid {
                table: t.name.clone(),
                reason: e.to_string(),
            })?;
            let rows: Vec<CanonicalRow> = objects
                .iter()
                .map(|obj| row_from_object(&t.columns, obj))
                .collect();
            insert_rows(&tx, t, rows.iter()).map_err(unavailable)?;
        }
        tx.commit().map_err(unavailable)?;
    }

    let count: i64 = conn
        .query_row("SELECT count(*) FROM sqlite_master WHERE type = 'table'", [], |r| {
            r.get(0)
        })
        .map_err(unavailable)?;
    tracing::debug!(
        event = "dataset_built",
        problem_id = problem_id,
        tables = count,
        path = %path.display()
    );
    Ok(())
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn create_table_sql(t: &TableDescriptor) -> String {
    let cols: Vec<String> = t
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.trim()))
        .collect();
    format!("CREATE TABLE {} ({});", quote_ident(&t.name), cols.join(", "))
}

fn insert_rows<'a>(
    tx: &Transaction<'_>,
    t: &TableDescriptor,
    rows: impl Iterator<Item = &'a CanonicalRow>,
) -> rusqlite::Result<usize> {
    let names: Vec<String> = t.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&t.name),
        names.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = tx.prepare(&sql)?;

    let mut n = 0;
    for row in rows {
        let values: Vec<Value> = t
            .columns
            .iter()
            .map(|c| to_sql_value(row.get(&c.name).unwrap_or(&Cell::Null)))
            .collect();
        stmt.execute(rusqlite::params_from_iter(values.iter()))?;
        n += 1;
    }
    Ok(n)
}

fn row_from_object(
    columns: &[ColumnDef],
    obj: &serde_json::Map<String, serde_json::Value>,
) -> CanonicalRow {
    let mut row = CanonicalRow::new();
    for c in columns {
        let v = obj
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&c.name))
            .map(|(_, v)| Cell::from_json(v))
            .unwrap_or(Cell::Null);
        row.push(c.name.clone(), v);
    }
    row
}

fn to_sql_value(c: &Cell) -> Value {
    match c {
        Cell::Null => Value::Null,
        Cell::Integer(i) => Value::Integer(*i),
        Cell::Real(f) => Value::Real(*f),
        Cell::Text(s) => Value::Text(s.clone()),
    }
}

fn copy_from_sqlite(
    conn: &Connection,
    problem_id: &str,
    t: &TableDescriptor,
    src_path: &str,
    src_table: Option<&str>,
) -> Result<(), DatasetError> {
    // ATTACH would silently create a missing file
    if !Path::new(src_path).is_file() {
        return Err(DatasetError::unavailable(
            problem_id,
            format!("sqlite source not found: {}", src_path),
        ));
    }
    let unavailable = |e: rusqlite::Error| {
        DatasetError::unavailable(problem_id, format!("copy from {}: {}", src_path, e))
    };

    conn.execute("ATTACH DATABASE ?1 AS src", [src_path])
        .map_err(unavailable)?;

    let cols: Vec<String> = t.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let sql = format!(
        "INSERT INTO main.{} ({}) SELECT {} FROM src.{}",
        quote_ident(&t.name),
        cols.join(", "),
        cols.join(", "),
        quote_ident(src_table.unwrap_or(&t.name))
    );
    let copied = conn.execute(&sql, []);
    let detached = conn.execute_batch("DETACH DATABASE src");

    let n = copied.map_err(unavailable)?;
    detached.map_err(unavailable)?;
    tracing::debug!(event = "dataset_sqlite_copy", table = %t.name, rows = n);
    Ok(())
}
