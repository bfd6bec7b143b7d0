use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sqlgrade",
    version,
    about = "Grade SQL submissions against problem datasets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Quick check: runs the first public test case only
    Run(GradeArgs),
    /// Full grading: every test case, result persisted
    Submit(SubmitArgs),
    /// Load a problem and materialize its dataset
    Validate(ValidateArgs),
    /// Write a sample problem file
    Init(InitArgs),
    /// Recent submissions for a problem
    History(HistoryArgs),
    Version,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GradeArgs {
    #[arg(long)]
    pub problem: PathBuf,

    /// File containing the query
    #[arg(long, conflicts_with = "sql", required_unless_present = "sql")]
    pub query: Option<PathBuf>,

    /// Query text given inline
    #[arg(long)]
    pub sql: Option<String>,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Show hidden test cases in full (problem authors)
    #[arg(long)]
    pub reveal_hidden: bool,

    #[arg(long, default_value = "cli", env = "SQLGRADE_SUBMITTER")]
    pub submitter: String,

    /// Also write a JUnit report
    #[arg(long)]
    pub junit: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub grade: GradeArgs,

    #[arg(long, default_value = ".sqlgrade/grades.db")]
    pub db: PathBuf,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ValidateArgs {
    #[arg(long)]
    pub problem: PathBuf,

    /// Reject unknown keys instead of warning
    #[arg(long)]
    pub strict: bool,

    #[arg(long, default_value = "text")]
    pub format: String, // text|json
}

#[derive(clap::Args, Clone, Debug)]
pub struct InitArgs {
    #[arg(long, default_value = "problem.yaml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Clone, Debug)]
pub struct HistoryArgs {
    #[arg(long, default_value = ".sqlgrade/grades.db")]
    pub db: PathBuf,

    /// Problem id
    #[arg(long)]
    pub problem: String,

    #[arg(long, default_value_t = 20)]
    pub last: u32,

    #[arg(long, default_value = "text")]
    pub format: String,
}
