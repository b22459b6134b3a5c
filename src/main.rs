use std::process::ExitCode;

use clap::Parser;
use ddns_updater::config::{Args, Config};
use ddns_updater::logging::Logger;
use ddns_updater::reconcile::{Reconciler, Report};
use ddns_updater::resolver::HttpResolver;
use ddns_updater::workflow::Conclusion;
use ddns_updater::{http, provider, workflow};
use eyre::WrapErr;

fn main() -> ExitCode {
    // Load `.env` before anything reads the environment (argument parsing and the logger included).
    #[cfg(feature = "dotenv")]
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    let (logger, log_file_err) = Logger::new(args.log_level, &args.log_file);
    if let Err(err) = logger.init() {
        eprintln!("Failed to initialize logger: {err}");
    }

    if let Some(err) = log_file_err {
        log::warn!("Could not open log file {}: {err}", args.log_file.display());
    }

    #[cfg(feature = "dotenv")]
    match dotenv {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {},
        Err(err) => log::warn!("Failed to load .env file: {err}"),
    }

    let result = run(&args);
    if let Err(err) = &result {
        log::error!("{err:#}");
    }

    let conclusion = Conclusion::of(&result);
    conclusion.log();

    log::Log::flush(log::logger());
    conclusion.into()
}

/// Runs one update, returning what happened to each record.
fn run(args: &Args) -> eyre::Result<Report> {
    let config = Config::from_args(args)?;
    let client = http::client(config.timeout()).wrap_err("Failed to build HTTP client")?;

    let mut resolver = HttpResolver::new(client.clone());
    if let Some(url) = &config.ip_endpoint {
        resolver = resolver.with_endpoint(config.family, url);
    }

    let provider = provider::from_env(config.provider, client)?;
    log::debug!("Using DNS provider {}", config.provider);
    let reconciler = Reconciler::new(provider, config.reconcile_options());

    Ok(workflow::run(&resolver, &reconciler, &config.settings())?)
}
