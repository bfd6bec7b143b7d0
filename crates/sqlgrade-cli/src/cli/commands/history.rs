use super::exit_codes;
use crate::cli::args::HistoryArgs;
use sqlgrade_core::storage::Store;

pub fn run(args: HistoryArgs) -> anyhow::Result<i32> {
    if !args.db.exists() {
        eprintln!("❌ no grades database at {}", args.db.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }
    let store = Store::open(&args.db)?;
    store.init_schema()?;
    let rows = store.fetch_recent(&args.problem, args.last)?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(exit_codes::OK);
    }

    if rows.is_empty() {
        println!("no submissions for problem '{}'", args.problem);
        return Ok(exit_codes::OK);
    }
    for r in &rows {
        let icon = match (r.success, r.is_correct) {
            (false, _) => "💥",
            (true, true) => "✅",
            (true, false) => "❌",
        };
        println!(
            "{} {}  {}  {:<12} {:>6.1}  {}/{}",
            icon, r.id, r.submitted_at, r.submitter_id, r.score, r.passed, r.total
        );
    }
    Ok(exit_codes::OK)
}
