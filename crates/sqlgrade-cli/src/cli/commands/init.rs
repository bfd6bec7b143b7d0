use super::exit_codes;
use crate::cli::args::InitArgs;
use sqlgrade_core::config::write_sample_problem;

pub fn run(args: InitArgs) -> anyhow::Result<i32> {
    if args.path.exists() && !args.force {
        eprintln!(
            "❌ {} already exists (use --force to overwrite)",
            args.path.display()
        );
        return Ok(exit_codes::CONFIG_ERROR);
    }
    if let Some(parent) = args.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_sample_problem(&args.path)?;
    println!("✅ wrote sample problem to {}", args.path.display());
    println!(
        "   try: sqlgrade run --problem {} --sql \"SELECT ...\"",
        args.path.display()
    );
    Ok(exit_codes::OK)
}
