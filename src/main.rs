//! retrocastd: playback appliance daemon.
//! - Shows the idle image, then waits for requests on the Unix socket.
//! - Watchdog returns to idle when the player dies.
//! - SIGINT/SIGTERM stop playback and exit; SIGHUP is only logged.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use retrocast::{config, ipc, logging, watchdog::Watchdog, Controller};
use std::sync::Arc;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
    task,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::read_config()?;
    logging::init(&cfg.logging.level);
    info!(
        player = %cfg.player.binary,
        resolver = %cfg.resolver.binary,
        media_dir = %cfg.library.media_dir,
        "retrocastd starting"
    );

    let socket_path = cfg.output.socket_path();
    let watchdog_every = cfg.watchdog.interval();
    let ctl = Arc::new(Controller::new(cfg));

    // Initial idle screen
    ctl.show_idle().await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let wd = Watchdog::new(ctl.clone(), watchdog_every).spawn(stop_rx);

    let listener = ipc::bind(&socket_path)?;
    let ipc_ctl = ctl.clone();
    let server = task::spawn(async move {
        if let Err(e) = ipc::serve(ipc_ctl, listener).await {
            error!("ipc server error: {e:#}");
        }
    });

    task::spawn(async move {
        if let Ok(mut hup) = signal(SignalKind::hangup()) {
            while hup.recv().await.is_some() {
                warn!("SIGHUP received, config reload not supported; restart the daemon");
            }
        }
    });

    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    tokio::select! {
        _ = term.recv() => info!("SIGTERM"),
        _ = int.recv() => info!("SIGINT"),
    }

    info!("shutting down");
    let _ = stop_tx.send(true);
    server.abort();
    ctl.shutdown().await;
    let _ = wd.await;
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
