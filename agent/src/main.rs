mod capture;
mod detect;
mod source;
mod store;
mod viewer;

use std::path::PathBuf;
use std::time::Duration;

use accident_watch_common::config::Config;
use capture::CaptureLoop;
use detect::HttpDetector;
use source::{MjpegSource, PollingSource};
use store::ImageStore;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = config.camera.url,
        mode = config.camera.mode,
        model = config.detection.model_url,
        accident_class = config.detection.accident_class,
        sample_interval = config.detection.sample_interval,
        store = config.store.dir,
        "starting accident-watch agent"
    );

    // The store directory must exist before the loop starts; failure here
    // is fatal.
    let store = match ImageStore::open(&config.store.dir) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to prepare image store");
            std::process::exit(1);
        }
    };

    // Viewer: serves the store read-only, concurrently with the capture
    // loop. The directory is their only shared state.
    let app = viewer::router(store.clone(), &config.location, &config.server);
    let listener = match tokio::net::TcpListener::bind(&config.server.bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = config.server.bind, "failed to bind viewer address");
            std::process::exit(1);
        }
    };
    info!(addr = config.server.bind, "viewer listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "viewer server exited");
        }
    });

    // Ctrl-C flips the shutdown channel; the capture loop checks it at the
    // top of every iteration and during cooldown.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut detector = match HttpDetector::new(&config.detection.model_url) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to build inference client");
            std::process::exit(1);
        }
    };

    let mut capture = CaptureLoop::new(store, &config.detection, shutdown_rx);

    let result = match config.camera.mode.as_str() {
        "mjpeg" => {
            let url = format!(
                "{}?quality={}&fps={}",
                config.camera.url, config.camera.quality, config.camera.fps
            );
            match MjpegSource::connect(&url).await {
                Ok(mut source) => capture.run(&mut source, &mut detector).await,
                Err(e) => {
                    error!(error = %e, "failed to connect to camera stream");
                    std::process::exit(1);
                }
            }
        }
        "polling" => {
            let url = format!(
                "{}?quality={}",
                config.camera.url.replace("/stream", "/frame"),
                config.camera.quality
            );
            let interval = Duration::from_secs_f64(1.0 / config.camera.fps);
            match PollingSource::new(&url, interval) {
                Ok(mut source) => capture.run(&mut source, &mut detector).await,
                Err(e) => {
                    error!(error = %e, "failed to build polling camera client");
                    std::process::exit(1);
                }
            }
        }
        other => {
            error!(mode = other, "unknown camera mode, expected 'mjpeg' or 'polling'");
            std::process::exit(1);
        }
    };

    match result {
        Ok(()) => info!("capture loop stopped"),
        Err(e) => {
            error!(error = %e, "capture loop failed");
            std::process::exit(1);
        }
    }
}
