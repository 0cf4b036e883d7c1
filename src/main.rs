use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rtsp_recorder::config::{self, Args, Config};
use rtsp_recorder::supervisor::Supervisor;
use rtsp_recorder::{logging, preflight};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Settings files feed the env-backed CLI arguments, so they must be in
    // the environment before clap parses.
    dotenvy::dotenv().ok();
    let loaded = config::load_config_files();

    let args = Args::parse();

    logging::init(&args.log_file, args.verbose, args.quiet);

    for path in &loaded.loaded {
        info!("Loaded settings from {}", path.display());
    }
    for (path, err) in &loaded.failed {
        warn!("Ignoring unreadable settings file {}: {}", path.display(), err);
    }

    let config = Config::resolve(&args);

    let errors = preflight::run(&config);
    if errors > 0 {
        error!(
            "Startup validation failed with {} error(s), refusing to record",
            errors
        );
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping after the active capture is terminated");
            cancel.cancel();
        });
    }

    Supervisor::new(config, cancel).run().await;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
