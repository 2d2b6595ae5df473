use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_famup::{Relay, StopReason};

mod famup_logic;
use famup_logic::{config, logger};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let (config, file_status) = match config::load_config(std::env::args_os()) {
        Ok(loaded) => loaded,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_status(&e));
        }
    };

    let log_level = config.log_level.as_deref().unwrap_or("info");
    if let Err(e) = logger::setup_logging(config.log_dir.as_deref(), log_level) {
        eprintln!("famup: failed to set up logging: {:#}", e);
        return ExitCode::FAILURE;
    }
    file_status.log();

    let outcome = run(config).await;
    match &outcome {
        Ok(reason) => log::info!("famup stopped: {}", reason),
        Err(e) => log::error!("{:#}", e),
    }
    ExitCode::from(run_status(&outcome))
}

/// Exit status for a command line clap refused to parse.
///
/// --help and --version land here too, and are not failures.
fn usage_status(e: &clap::Error) -> u8 {
    if e.use_stderr() { 1 } else { 0 }
}

/// Exit status for a finished run. Any clean stop is 0, including loss of the
/// feed, the output or the delivery path; setup failures and a 401 are 1.
fn run_status(outcome: &Result<StopReason>) -> u8 {
    match outcome {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

async fn run(config: config::Config) -> Result<StopReason> {
    let settings = config.to_settings().context("invalid configuration")?;
    let relay = Relay::start(settings).await.context("relay setup failed")?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_signals(cancel.clone()));

    let outcome = relay.run(&cancel).await;
    watcher.abort();

    Ok(outcome?)
}

async fn watch_signals(cancel: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut term_signal) => {
                    term_signal.recv().await;
                }
                Err(e) => {
                    log::warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            // On non-unix platforms, just wait forever.
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => log::info!("Ctrl-C received, initiating shutdown."),
            Err(e) => {
                log::warn!("Cannot listen for Ctrl-C: {}", e);
                return;
            }
        },
        _ = terminate => log::info!("SIGTERM received, initiating shutdown."),
    }

    cancel.cancel();
}
