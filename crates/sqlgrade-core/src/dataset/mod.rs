//! Dataset loader: resolves a problem's declared tables into an immutable,
//! locally materialized SQLite file shared by every submission against that
//! problem.

pub mod materialize;
pub mod source;

use crate::cache::key::dataset_key;
use crate::errors::DatasetError;
use crate::fingerprint::{self, Fingerprint};
use crate::model::{DataSource, Problem};
use moka::sync::Cache;
use source::{DefaultFetcher, SourceFetcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Read-only handle to a materialized dataset. Cloned as `Arc<Dataset>`;
/// nothing hands out a writable connection to it.
#[derive(Debug)]
pub struct Dataset {
    pub problem_id: String,
    pub fingerprint: String,
    pub tables: Vec<String>,
    path: PathBuf,
    retired: AtomicBool,
}

impl Dataset {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the dataset as evicted; its file is removed once the last
    /// submission holding the handle lets go.
    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if self.retired.load(Ordering::SeqCst) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!(event = "dataset_file_remove_failed", path = %self.path.display(), error = %e);
            }
        }
    }
}

#[derive(Clone)]
pub struct DatasetLoader {
    cache: Cache<String, Arc<Dataset>>,
    // problem id -> cache key currently considered live
    live: Arc<Mutex<HashMap<String, String>>>,
    // source uri/path -> (revision, content sha256)
    revisions: Cache<String, (String, String)>,
    cache_dir: PathBuf,
    fetcher: Arc<dyn SourceFetcher>,
}

struct SourcePayloads {
    json: HashMap<String, Vec<u8>>,
    hashes: Vec<(String, String)>,
    /// False when some JSON hash came from the revision cache without its bytes.
    complete: bool,
}

/// Max distinct sources whose revision is remembered.
const REVISION_ENTRIES: u64 = 1024;

impl DatasetLoader {
    pub fn new(cache_dir: impl Into<PathBuf>, capacity: u64) -> Self {
        Self::with_fetcher(cache_dir, capacity, Arc::new(DefaultFetcher::default()))
    }

    pub fn with_fetcher(
        cache_dir: impl Into<PathBuf>,
        capacity: u64,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity.max(1))
            .eviction_listener(|_key, ds: Arc<Dataset>, cause| {
                tracing::debug!(event = "dataset_evicted", problem_id = %ds.problem_id, cause = ?cause);
                ds.retire();
            })
            .build();
        Self {
            cache,
            live: Arc::new(Mutex::new(HashMap::new())),
            revisions: Cache::new(REVISION_ENTRIES),
            cache_dir: cache_dir.into(),
            fetcher,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Flushes pending cache bookkeeping, releasing handles of evicted entries.
    pub fn run_maintenance(&self) {
        self.cache.run_pending_tasks();
    }

    /// Returns the dataset for `problem`, materializing it on first use or
    /// whenever a declaration or backing source changed.
    ///
    /// Sources whose revision (size and mtime, ETag, ...) is unchanged since
    /// the last load are not re-read; their bytes are fetched only when the
    /// dataset has to be built.
    pub async fn load(&self, problem: &Problem) -> Result<Arc<Dataset>, DatasetError> {
        let mut payloads = self.collect_sources(problem, false).await?;
        let mut fp = dataset_fingerprint(problem, &payloads);
        let mut cache_key = dataset_key(&problem.id, &fp.hex);

        if let Some(ds) = self.cache.get(&cache_key) {
            tracing::debug!(event = "dataset_cache_hit", problem_id = %problem.id, fingerprint = fp.short());
            return Ok(ds);
        }

        if !payloads.complete {
            payloads = self.collect_sources(problem, true).await?;
            fp = dataset_fingerprint(problem, &payloads);
            cache_key = dataset_key(&problem.id, &fp.hex);
            if let Some(ds) = self.cache.get(&cache_key) {
                return Ok(ds);
            }
        }

        let cache = self.cache.clone();
        let dir = self.cache_dir.clone();
        let tables = problem.tables.clone();
        let problem_id = problem.id.clone();
        let k = cache_key.clone();
        let fp_for_build = fp.clone();

        let ds = tokio::task::spawn_blocking(move || {
            cache.try_get_with(k, || build_dataset(&dir, &problem_id, &fp_for_build, &tables, &payloads))
        })
        .await
        .map_err(|e| DatasetError::unavailable(&problem.id, format!("loader task failed: {}", e)))?
        .map_err(|e: Arc<DatasetError>| (*e).clone())?;

        self.retire_stale(&problem.id, &cache_key);
        tracing::info!(
            event = "dataset_ready",
            problem_id = %problem.id,
            fingerprint = fp.short(),
            tables = ds.tables.len()
        );
        Ok(ds)
    }

    /// Drops a problem's cached dataset so the next load rebuilds it.
    pub fn invalidate(&self, problem_id: &str) {
        let prev = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(problem_id);
        if let Some(k) = prev {
            self.cache.invalidate(&k);
        }
    }

    fn retire_stale(&self, problem_id: &str, current: &str) {
        let prev = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(problem_id.to_string(), current.to_string());
        if let Some(old) = prev.filter(|old| old != current) {
            tracing::info!(event = "dataset_superseded", problem_id = problem_id, key = %old);
            self.cache.invalidate(&old);
        }
    }

    async fn collect_sources(
        &self,
        problem: &Problem,
        fetch_all: bool,
    ) -> Result<SourcePayloads, DatasetError> {
        let mut json = HashMap::new();
        let mut hashes = Vec::new();
        let mut complete = true;

        for t in &problem.tables {
            match &t.source {
                Some(DataSource::Json { uri }) => {
                    let revision = self.fetcher.revision(uri).await;
                    if !fetch_all {
                        if let Some(hash) = self.known_hash(uri, revision.as_deref()) {
                            hashes.push((t.name.clone(), hash));
                            complete = false;
                            continue;
                        }
                    }
                    let bytes = self
                        .fetcher
                        .fetch(uri)
                        .await
                        .map_err(|e| DatasetError::unavailable(&problem.id, e))?;
                    let hash = fingerprint::sha256_bytes_hex(&bytes);
                    self.remember(uri, revision, &hash);
                    hashes.push((t.name.clone(), hash));
                    json.insert(t.name.clone(), bytes);
                }
                Some(DataSource::Sqlite { path, .. }) => {
                    let p = path.clone();
                    let revision = tokio::task::spawn_blocking(move || source::file_revision(&p))
                        .await
                        .ok()
                        .flatten();
                    if let Some(hash) = self.known_hash(path, revision.as_deref()) {
                        hashes.push((t.name.clone(), hash));
                        continue;
                    }
                    let p = path.clone();
                    let hash = tokio::task::spawn_blocking(move || {
                        std::fs::read(&p).map(|b| fingerprint::sha256_bytes_hex(&b))
                    })
                    .await
                    .map_err(|e| DatasetError::unavailable(&problem.id, e))?
                    .map_err(|e| {
                        DatasetError::unavailable(&problem.id, format!("cannot read {}: {}", path, e))
                    })?;
                    self.remember(path, revision, &hash);
                    hashes.push((t.name.clone(), hash));
                }
                None => {}
            }
        }
        Ok(SourcePayloads {
            json,
            hashes,
            complete,
        })
    }

    fn known_hash(&self, source: &str, revision: Option<&str>) -> Option<String> {
        let revision = revision?;
        let (seen, hash) = self.revisions.get(source)?;
        (seen == revision).then_some(hash)
    }

    fn remember(&self, source: &str, revision: Option<String>, hash: &str) {
        match revision {
            Some(rev) => self
                .revisions
                .insert(source.to_string(), (rev, hash.to_string())),
            None => self.revisions.invalidate(source),
        }
    }
}

fn dataset_fingerprint(problem: &Problem, payloads: &SourcePayloads) -> Fingerprint {
    fingerprint::dataset(fingerprint::DatasetContext {
        problem_id: &problem.id,
        tables: &problem.tables,
        source_hashes: &payloads.hashes,
    })
}

fn build_dataset(
    dir: &Path,
    problem_id: &str,
    fp: &Fingerprint,
    tables: &[crate::model::TableDescriptor],
    payloads: &SourcePayloads,
) -> Result<Arc<Dataset>, DatasetError> {
    let path = materialize::materialize(dir, problem_id, fp, tables, &payloads.json)?;
    Ok(Arc::new(Dataset {
        problem_id: problem_id.to_string(),
        fingerprint: fp.hex.clone(),
        tables: tables.iter().map(|t| t.name.clone()).collect(),
        path,
        retired: AtomicBool::new(false),
    }))
}
