use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use seat_watch::config::{AppConfig, COOKIE_ENV, config_path};
use seat_watch::egress::EgressRotator;
use seat_watch::listing::{
    ListingClient, ListingSource, MockListingClient, StaticSession,
};
use seat_watch::pacing::PacingController;
use seat_watch::poll::{LogSink, PollLoop, StopReason};

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seat_watch=info")),
        )
        .init();

    match run().await {
        Ok(reason) => {
            info!(?reason, "Stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<StopReason, BoxError> {
    let config = AppConfig::load(config_path(std::env::args().nth(1)))?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current cycle");
            stop_on_signal.store(true, Ordering::SeqCst);
        }
    });

    match &config.mock_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using mock listings");
            let source = MockListingClient::new(dir)?;
            watch(&config, source, stop).await
        }
        None => {
            let session = match std::env::var(COOKIE_ENV) {
                Ok(cookie) => StaticSession::new(&cookie)?,
                Err(_) => {
                    warn!("{COOKIE_ENV} not set, querying without a session");
                    StaticSession::anonymous()
                }
            };
            let source = ListingClient::new(config.listing.clone(), Arc::new(session))?;
            watch(&config, source, stop).await
        }
    }
}

async fn watch<S: ListingSource>(
    config: &AppConfig,
    source: S,
    stop: Arc<AtomicBool>,
) -> Result<StopReason, BoxError> {
    let parser = config.record_parser();
    info!(schema = %parser.schema().version, "Record schema");

    let criteria = config.order_criteria()?;
    if !criteria.train_codes.is_empty() || !criteria.seat_classes.is_empty() {
        info!("No order collaborator configured; criteria are not used");
    }

    let mut poll = PollLoop::new(
        config.target.clone(),
        source,
        parser,
        PacingController::new(config.pacing.clone()),
        EgressRotator::new(config.egress.clone()).shared(),
        Arc::new(LogSink::new(config.seat_labels())),
    )
    .with_run_config(config.run.clone())
    .with_stop_flag(stop);

    let reason = poll.run().await;
    info!(status = %poll.pacing().status(), "Final pacing state");
    Ok(reason)
}
