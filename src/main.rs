use clap::Parser;
use std::process::ExitCode;
use suep_toolkit::app::{App, ExitStatus};
use suep_toolkit::cli::Args;
use suep_toolkit::config::Config;
use suep_toolkit::logging::setup_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging depends on the config, so a broken config can only be reported on stderr.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitStatus::Internal.into();
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        "starting suep"
    );

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = format!("{e:#}"), "failed to initialize");
            return ExitStatus::Internal.into();
        }
    };

    app.run(args.command).await.into()
}
