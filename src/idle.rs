//! Static placeholder image shown whenever no session is active.

use crate::{
    player::PlayerArgs,
    supervisor::{Escalation, IoPolicy, ProcessRecord, Supervisor},
};
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};

const HIDE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct IdlePresentation {
    supervisor: Supervisor,
    args: PlayerArgs,
    image: PathBuf,
    process: Option<ProcessRecord>,
    shown: bool,
    shows: u64,
}

impl IdlePresentation {
    pub fn new(supervisor: Supervisor, args: PlayerArgs, image: PathBuf) -> Self {
        Self {
            supervisor,
            args,
            image,
            process: None,
            shown: false,
            shows: 0,
        }
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    /// How many times the placeholder has been put up.
    pub fn shows(&self) -> u64 {
        self.shows
    }

    /// No-op while already shown. A missing image still counts as idle.
    pub fn show(&mut self) {
        if self.shown {
            return;
        }
        self.shown = true;
        self.shows += 1;
        if !self.image.is_file() {
            warn!(image = %self.image.display(), "idle image missing, leaving display blank");
            return;
        }
        let argv = self.args.idle_image(&self.image);
        match self.supervisor.spawn(&argv, &[], IoPolicy::Discard) {
            Ok(rec) => {
                info!(pid = rec.pid(), "idle presentation shown");
                self.process = Some(rec);
            }
            Err(e) => warn!("idle presentation failed: {e}"),
        }
    }

    pub async fn hide(&mut self) {
        self.shown = false;
        if let Some(rec) = self.process.take() {
            self.supervisor.terminate(&rec, Escalation::Graceful(HIDE_GRACE)).await;
        }
    }
}
