mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use acikit_config::Overrides;
use acikit_core::ControllerConfig;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "acikit", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let config = build_controller_config(&cli.global)?;
            tracing::debug!(command = ?cmd, url = %config.url, "dispatching command");
            commands::dispatch(cmd, config, &cli.global).await
        }
    }
}

/// Build a `ControllerConfig` from the config file, profile, and flags.
fn build_controller_config(global: &GlobalOpts) -> Result<ControllerConfig, CliError> {
    let cfg = acikit_config::load_config_or_default();
    let profile_name = acikit_config::active_profile_name(global.profile.as_deref(), &cfg);

    let overrides = Overrides {
        url: global.url.clone(),
        login: global.login.clone(),
        password: global.password.clone(),
        insecure: global.insecure,
        timeout: global.timeout,
    };

    let profile = acikit_config::select_profile(&cfg, &profile_name, &overrides)?;
    Ok(acikit_config::resolve_profile(
        &profile,
        &profile_name,
        &cfg.defaults,
        &overrides,
    )?)
}
