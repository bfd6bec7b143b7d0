use crate::cache::ProblemCache;
use crate::config::ServerConfig;
use crate::methods::{self, MethodContext};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlgrade_core::engine::{cancel, Grader, WorkerPool};
use sqlgrade_core::storage::Store;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

static RID: AtomicU64 = AtomicU64::new(1);

fn next_rid() -> String {
    let n = RID.fetch_add(1, Ordering::Relaxed);
    format!("r-{n:06}")
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }

    fn app_error(id: Option<Value>, e: methods::MethodError) -> Self {
        let data = serde_json::json!({ "code": e.code });
        Self::error(id, e.rpc_code(), e.message, Some(data))
    }
}

pub struct Server;

impl Server {
    pub async fn run(
        problem_root: PathBuf,
        db: Option<PathBuf>,
        cfg: ServerConfig,
    ) -> Result<()> {
        let problem_root_canon = std::fs::canonicalize(&problem_root)
            .map_err(|e| anyhow::anyhow!("invalid --problem-root: {e}"))?;

        let mut grader = Grader::new(cfg.engine.clone());
        if let Some(db) = &db {
            let store = Store::open(db)?;
            store.init_schema()?;
            grader = grader.with_store(store);
        }
        let pool = WorkerPool::new(grader, cfg.engine.workers);
        let (shutdown, shutdown_signal) = cancel::pair();

        let ctx = Arc::new(MethodContext {
            problem_root_canon,
            problems: ProblemCache::new(cfg.problem_cache_entries),
            pool,
            shutdown: shutdown_signal,
        });

        // Responses from concurrent requests funnel through one writer.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = rx.recv().await {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            anyhow::Ok(())
        });

        let mut in_flight = JoinSet::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            // reap finished requests so the set stays small
            while in_flight.try_join_next().is_some() {}

            let rid = next_rid();

            if line.len() > cfg.max_msg_bytes {
                tracing::warn!(
                    target: "sqlgrade_server",
                    event = "limit_exceeded",
                    rid = %rid,
                    bytes_in = line.len(),
                    max = cfg.max_msg_bytes
                );
                let resp = JsonRpcResponse::error(
                    None,
                    -32600,
                    format!("message bytes={} > max={}", line.len(), cfg.max_msg_bytes),
                    Some(serde_json::json!({ "code": "E_LIMIT_EXCEEDED" })),
                );
                send(&tx, &resp)?;
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let req: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(event = "json_parse_error", rid = %rid, error = %e);
                    continue;
                }
            };

            tracing::debug!(event = "request", rid = %rid, method = %req.method, rpc_id = ?req.id);

            match req.method.as_str() {
                "health" => {
                    let resp = JsonRpcResponse::ok(req.id, methods::health(&ctx));
                    send(&tx, &resp)?;
                }
                "grade" => {
                    let Some(params) = req.params else {
                        let resp =
                            JsonRpcResponse::error(req.id, -32602, "Missing params".into(), None);
                        send(&tx, &resp)?;
                        continue;
                    };
                    let ctx = ctx.clone();
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        let resp = match methods::grade(&ctx, &rid, params).await {
                            Ok(v) => JsonRpcResponse::ok(req.id, v),
                            Err(e) => {
                                tracing::warn!(event = "grade_rejected", rid = %rid, code = %e.code, error = %e.message);
                                JsonRpcResponse::app_error(req.id, e)
                            }
                        };
                        if let Err(e) = send(&tx, &resp) {
                            tracing::warn!(event = "response_dropped", rid = %rid, error = %e);
                        }
                    });
                }
                _ => {
                    let resp = JsonRpcResponse::error(
                        req.id,
                        -32601,
                        format!("Method not found: {}", req.method),
                        None,
                    );
                    send(&tx, &resp)?;
                }
            }
        }

        // Caller went away: nobody is left to read verdicts.
        tracing::info!(event = "server_shutdown", in_flight = in_flight.len());
        shutdown.cancel();
        ctx.pool.close();
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                tracing::error!(event = "request_task_failed", error = %e);
            }
        }

        drop(tx);
        match writer.await {
            Ok(res) => res,
            Err(e) => Err(anyhow::anyhow!("stdout writer failed: {e}")),
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, resp: &JsonRpcResponse) -> Result<()> {
    let line = serde_json::to_string(resp)?;
    tx.send(line)
        .map_err(|_| anyhow::anyhow!("stdout writer is gone"))?;
    Ok(())
}
