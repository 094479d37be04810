use anyhow::Context;
use clap::Parser;
use std::io::{self, IsTerminal};
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;

use tmcsh::cli::Cli;
use tmcsh::config::Config;
use tmcsh::console::ConsoleReader;
use tmcsh::logging::init_tracing;
use tmcsh::session::{Session, SessionOutcome};
use tmcsh::shutdown::InterruptGuard;
use tmcsh::transport::UsbTmcCatalog;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match panic::catch_unwind(AssertUnwindSafe(|| run(&cli))) {
        Ok(Ok(outcome)) => ExitCode::from(outcome.exit_code()),
        Ok(Err(err)) => {
            tracing::error!(error = %format!("{:#}", err), "session failed");
            eprintln!("Unexpected exception occurred: {:#}", err);
            ExitCode::from(1)
        }
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            eprintln!("Unexpected exception occurred: {}", detail);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<SessionOutcome> {
    println!("USB-TMC shell {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .with_context(|| format!("loading {}", cli.config_path().display()))?;
    init_tracing(&config.logging);
    let options = cli.session_options(&config, io::stdout().is_terminal());
    tracing::info!(?options, "starting session");

    let guard = InterruptGuard::install().context("installing SIGINT handler")?;
    let mut input = ConsoleReader::open(guard.handle()).context("opening console input")?;
    tracing::debug!(interactive = input.is_interactive(), "console opened");
    let mut catalog = UsbTmcCatalog::new();
    let mut stdout = io::stdout();

    let outcome = Session::new(&mut catalog, &mut input, &mut stdout, options, guard.handle())
        .run()
        .context("console I/O failed")?;
    tracing::info!(?outcome, "session finished");
    Ok(outcome)
}
