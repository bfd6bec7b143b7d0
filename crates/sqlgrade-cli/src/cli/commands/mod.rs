use crate::cli::args::{Cli, Command};
use sqlgrade_core::model::Mode;

pub mod history;
pub mod init;
pub mod run;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// Graded, but not correct.
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    /// The engine could not produce a verdict (dataset, sandbox, store).
    pub const INFRA_ERROR: i32 = 3;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args, Mode::Run, None).await,
        Command::Submit(args) => run::run(args.grade, Mode::Submit, Some(args.db)).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Init(args) => init::run(args),
        Command::History(args) => history::run(args),
        Command::Version => {
            println!("sqlgrade {}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}
