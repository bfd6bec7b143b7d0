use super::exit_codes;
use crate::cli::args::ValidateArgs;
use serde_json::json;
use sqlgrade_core::config::{load_problem, EngineConfig};
use sqlgrade_core::dataset::DatasetLoader;
use sqlgrade_core::errors::DatasetError;

pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let problem = match load_problem(&args.problem, args.strict) {
        Ok(p) => p,
        Err(e) => {
            print_error("E_CFG_PARSE", &e.to_string(), &args.format);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let cfg = EngineConfig::from_env();
    let loader = DatasetLoader::new(cfg.cache_dir.clone(), cfg.dataset_cache_entries);
    let dataset = match loader.load(&problem).await {
        Ok(ds) => ds,
        Err(e) => {
            let (code, exit) = match &e {
                DatasetError::Invalid { .. } => ("E_DATASET_INVALID", exit_codes::CONFIG_ERROR),
                DatasetError::Unavailable { .. } => {
                    ("E_DATASET_UNAVAILABLE", exit_codes::INFRA_ERROR)
                }
            };
            tracing::debug!(event = "cli_dataset_failed", problem_id = %problem.id, code, error = %e);
            print_error(code, &e.to_string(), &args.format);
            return Ok(exit);
        }
    };

    tracing::debug!(
        event = "cli_problem_valid",
        problem_id = %problem.id,
        fingerprint = %dataset.fingerprint,
        tables = dataset.tables.len()
    );
    let public = problem.tests.len() - problem.hidden_count();
    if args.format == "json" {
        let out = json!({
            "ok": true,
            "problem_id": problem.id,
            "fingerprint": dataset.fingerprint,
            "tables": dataset.tables,
            "tests": { "public": public, "hidden": problem.hidden_count() },
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("✅ problem '{}' is valid", problem.id);
        println!("   tables:      {}", dataset.tables.join(", "));
        println!(
            "   tests:       {} public, {} hidden",
            public,
            problem.hidden_count()
        );
        println!("   fingerprint: {}", dataset.fingerprint);
    }

    drop(dataset);
    loader.invalidate(&problem.id);
    Ok(exit_codes::OK)
}

fn print_error(code: &str, message: &str, format: &str) {
    if format == "json" {
        let out = json!({
            "ok": false,
            "errors": [{ "code": code, "message": message }],
        });
        println!("{}", out);
    } else {
        eprintln!("❌ {}: {}", code, message);
    }
}
