//! Periodic liveness probe for the active player.
//!
//! Reads the controller's published session; asks the controller to tear down
//! when the process is gone. Does nothing while idle.

use crate::controller::Controller;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

pub struct Watchdog {
    controller: Arc<Controller>,
    every: Duration,
}

impl Watchdog {
    pub fn new(controller: Arc<Controller>, every: Duration) -> Self {
        Self { controller, every }
    }

    /// One probe. Returns true if a dead session was reported.
    pub async fn check(&self) -> bool {
        let Some(active) = self.controller.probe() else {
            return false;
        };
        if active.process.is_alive() {
            return false;
        }
        warn!(session = active.session_id, pid = active.process.pid(), "watchdog: player process gone");
        self.controller.on_process_exit(active.session_id).await;
        true
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(self.every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(every = ?self.every, "watchdog started");
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.check().await;
                    }
                    r = shutdown.changed() => {
                        if r.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("watchdog stopped");
        })
    }
}
