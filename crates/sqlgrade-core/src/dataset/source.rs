use crate::config::path_resolver::is_url;
use async_trait::async_trait;
use std::time::Duration;

/// Reads the raw bytes behind a table's `source.uri`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> anyhow::Result<Vec<u8>>;

    /// Cheap change marker for `uri` (file size and mtime, ETag, ...).
    /// `None` means the content has to be fetched to tell.
    async fn revision(&self, _uri: &str) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str;
}

/// Size plus modification time of a local file.
pub fn file_revision(path: &str) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?;
    Some(format!("file:{}:{}", meta.len(), mtime.as_nanos()))
}

/// Local files plus http(s) object storage (presigned or public URLs).
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(event = "http_client_fallback", error = %e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
        if is_url(uri) {
            let resp = self.client.get(uri).send().await?;
            if !resp.status().is_success() {
                anyhow::bail!("GET {} returned {}", uri, resp.status());
            }
            return Ok(resp.bytes().await?.to_vec());
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri).to_string();
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|e| anyhow::anyhow!("read task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", uri, e))?;
        Ok(bytes)
    }

    async fn revision(&self, uri: &str) -> Option<String> {
        if !is_url(uri) {
            let path = uri.strip_prefix("file://").unwrap_or(uri).to_string();
            return tokio::task::spawn_blocking(move || file_revision(&path))
                .await
                .ok()
                .flatten();
        }

        let resp = self.client.head(uri).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(etag) = header(reqwest::header::ETAG) {
            return Some(format!("etag:{}", etag));
        }
        let modified = header(reqwest::header::LAST_MODIFIED)?;
        let len = header(reqwest::header::CONTENT_LENGTH).unwrap_or_default();
        Some(format!("modified:{}:{}", modified, len))
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Parses a JSON array of row objects, or newline-delimited JSON objects.
pub fn parse_json_rows(
    bytes: &[u8],
) -> anyhow::Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    let text = std::str::from_utf8(bytes)?;
    let trimmed = text.trim_start();

    let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        let mut out = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let v = serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("line {}: {}", i + 1, e))?;
            out.push(v);
        }
        out
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            serde_json::Value::Object(m) => Ok(m),
            other => Err(anyhow::anyhow!(
                "row {} is not an object (got {})",
                i + 1,
                json_kind(&other)
            )),
        })
        .collect()
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
