use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use weather_relay::{Config, app, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            utils::init_tracing("info", false);
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };
    utils::init_tracing(&config.log_level, config.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.redacted_amqp_url(),
        queue = %config.queue,
        "Starting weather consumer"
    );

    let shutdown = CancellationToken::new();
    utils::cancel_on_shutdown_signal(shutdown.clone());

    match app::run_consumer(config, shutdown).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(e) => {
            error!(error = %e, "Consumer failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
