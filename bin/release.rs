// biweeklybudget - release notes tool
//
// release gist     preview the current version's notes as a private gist
// release release  create the GitHub release for the current version

use biweeklybudget::logging;
use biweeklybudget::release::{Action, Releaser, DEFAULT_CHANGES_PATH, DEFAULT_REPO, USAGE};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "release")]
#[command(about = "Publish biweeklybudget release notes to GitHub", long_about = None)]
#[command(version)]
struct Cli {
    /// What to publish
    #[arg(value_enum)]
    action: Action,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,

    /// GitHub repository as owner/name
    #[arg(long, default_value = DEFAULT_REPO)]
    repo: String,

    /// Changelog to convert
    #[arg(long, default_value = DEFAULT_CHANGES_PATH)]
    changes: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(_) => {
            eprintln!("{}", USAGE);
            return ExitCode::from(1);
        }
    };

    logging::init("debug,reqwest=error,hyper=error,hyper_util=error,rustls=error");

    let result = Releaser::new(&cli.repo, &cli.changes).and_then(|r| r.run(cli.action, !cli.yes));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::from(1)
        }
    }
}
