//! Session data model and the status snapshot written on every transition.

use crate::{channel::ChannelHandle, supervisor::ProcessRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Local,
    Remote,
    Monitor,
}

/// Controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Resolving,
    Starting,
    Active,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    Stopping,
    Crashed,
    Terminated,
}

/// How the previous session went away, reported while idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Stopped,
    /// The player reached the end of its file and exited.
    Finished,
    Crashed,
}

/// One playback. Owned by the controller while it exists.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub kind: SessionKind,
    pub source_ref: Option<String>,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub lifecycle: Lifecycle,
    pub(crate) process: Arc<ProcessRecord>,
    pub(crate) channel: Arc<ChannelHandle>,
}

impl Session {
    /// What the watchdog and control commands get to see.
    pub(crate) fn active_ref(&self) -> ActiveRef {
        ActiveRef {
            session_id: self.id,
            process: self.process.clone(),
            channel: Arc::downgrade(&self.channel),
        }
    }
}

/// Lock-free view of the active session. The channel reference dies with the session.
#[derive(Debug, Clone)]
pub struct ActiveRef {
    pub session_id: u64,
    pub process: Arc<ProcessRecord>,
    pub channel: Weak<ChannelHandle>,
}

// ------------------------- Local media -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Video,
    Audio,
    Image,
}

const VIDEO_EXT: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpeg", "mpg", "3gp"];
const AUDIO_EXT: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "opus"];
const IMAGE_EXT: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

pub fn classify(path: &Path) -> Option<MediaClass> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if VIDEO_EXT.contains(&ext.as_str()) {
        Some(MediaClass::Video)
    } else if AUDIO_EXT.contains(&ext.as_str()) {
        Some(MediaClass::Audio)
    } else if IMAGE_EXT.contains(&ext.as_str()) {
        Some(MediaClass::Image)
    } else {
        None
    }
}

// ------------------------- Status -------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: Phase,
    pub session_id: Option<u64>,
    pub kind: Option<SessionKind>,
    pub title: Option<String>,
    pub source: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub paused: bool,
    pub looping: bool,
    pub idle_shown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<EndReason>,
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub volume: Option<f64>,
}

impl SessionStatus {
    pub fn of(session: &Session) -> Self {
        Self {
            phase: Phase::Active,
            session_id: Some(session.id),
            kind: Some(session.kind),
            title: Some(session.title.clone()),
            source: session.source_ref.clone(),
            started_at: Some(session.started_at),
            pid: Some(session.process.pid()),
            ..Self::default()
        }
    }
}

/// Atomic snapshot file plus an append-only JSON lines log.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    snapshot_path: PathBuf,
    events_path: PathBuf,
    pretty: bool,
}

impl StatusWriter {
    pub fn new(snapshot_path: PathBuf, events_path: PathBuf, pretty: bool) -> Self {
        if let Some(p) = snapshot_path.parent() {
            let _ = fs::create_dir_all(p);
        }
        if let Some(p) = events_path.parent() {
            let _ = fs::create_dir_all(p);
        }
        Self {
            snapshot_path,
            events_path,
            pretty,
        }
    }

    pub fn write(&self, st: &SessionStatus) -> Result<()> {
        // snapshot (atomic)
        let json = if self.pretty { serde_json::to_string_pretty(st)? } else { serde_json::to_string(st)? };
        let tmp = self.snapshot_path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &self.snapshot_path)?;
        // events (append)
        let mut f = OpenOptions::new().create(true).append(true).open(&self.events_path)?;
        let line = serde_json::to_string(st)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_case_insensitively() {
        assert_eq!(classify(Path::new("/m/a.MKV")), Some(MediaClass::Video));
        assert_eq!(classify(Path::new("/m/b.opus")), Some(MediaClass::Audio));
        assert_eq!(classify(Path::new("/m/c.jpeg")), Some(MediaClass::Image));
        assert_eq!(classify(Path::new("/m/d.txt")), None);
        assert_eq!(classify(Path::new("/m/noext")), None);
    }

    #[test]
    fn writer_keeps_snapshot_and_appends_events() {
        let dir = tempfile::tempdir().unwrap();
        let w = StatusWriter::new(dir.path().join("run/state.json"), dir.path().join("run/events.jsonl"), false);
        let mut st = SessionStatus::default();
        w.write(&st).unwrap();
        st.phase = Phase::Resolving;
        w.write(&st).unwrap();

        let snap: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("run/state.json")).unwrap()).unwrap();
        assert_eq!(snap["phase"], "resolving");
        assert_eq!(snap["idleShown"], false);
        let events = fs::read_to_string(dir.path().join("run/events.jsonl")).unwrap();
        assert_eq!(events.lines().count(), 2);
    }
}
