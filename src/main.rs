use anyhow::Result;
use solar_home_controller::{config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    init_tracing();

    let cfg = Config::load()?;
    let app_state = controller::AppState::new(cfg.clone())?;

    info!(
        timezone = %cfg.controller.timezone,
        tick_seconds = cfg.controller.tick_seconds,
        data_dir = %cfg.stores.data_dir,
        mode = %app_state.mode.get(),
        "starting Solar Home Controller"
    );

    let shutdown = CancellationToken::new();
    telemetry::cancel_on_shutdown(shutdown.clone());

    let scheduler = controller::spawn_controller_tasks(&app_state, shutdown);
    if let Err(e) = scheduler.await {
        warn!(error = %e, "scheduler task aborted");
    }

    warn!("shutdown complete");
    Ok(())
}
