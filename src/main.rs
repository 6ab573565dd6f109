use std::sync::Arc;

use mjpeg_tap::{
    app_state::AppState, capture::CaptureService, config::AppConfig, detect::PlateDetector, web,
};
use tracing::{error, info};
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all("logs").await?;
    let file_appender = rolling::daily("logs", "mjpeg-tap.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .init();

    if let Some(dir) = &config.frame_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let capture = CaptureService::new(config.stream_source(), config.capture_settings());
    let detector = PlateDetector::from_config(&config);
    if let Some(detector) = &detector {
        info!(
            url = %detector.url(),
            every = config.detect_every,
            "plate detection enabled"
        );
    }

    let state = Arc::new(AppState::new(config.clone(), capture, detector));
    if let Err(err) = state.start_capture().await {
        error!("failed to start capture: {err:#}");
    }

    let app = web::build_router(state);
    info!("{} listening on {}", config.app_name, config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
