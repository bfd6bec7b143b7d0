use anyhow::Result;
use clap::Parser;
use sqlgrade_server::config;
use sqlgrade_server::server::Server;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `<problem_id>.yaml` files
    #[arg(long, default_value = "problems")]
    problem_root: PathBuf,

    /// Persist submit-mode results to this SQLite file
    #[arg(long, env = "SQLGRADE_DB")]
    db: Option<PathBuf>,
}

use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::ServerConfig::from_env();

    init_logging(&cfg.log_level);

    tracing::info!(
        event = "server_start",
        problem_root = ?args.problem_root,
        db = ?args.db,
        config = ?cfg
    );

    Server::run(args.problem_root, args.db, cfg).await
}
