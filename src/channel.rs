//! Control channel into a running mpv via its JSON IPC socket.
//!
//! One connection per session. Writes are serialized; a reader task routes
//! replies by `request_id` and watches events. Any I/O failure or a closed
//! socket is reported as [`ChannelError::Unavailable`].

use crate::{config, error::ChannelError};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info};

const MAX_BACKOFF: Duration = Duration::from_millis(1000);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    TogglePause,
    Pause,
    Resume,
    /// Relative seek in seconds.
    Seek(f64),
    VolumeUp(i64),
    VolumeDown(i64),
    SetVolume(f64),
    SetLoop(bool),
    GetProperty(String),
}

impl ControlCommand {
    /// Fire-and-forget commands don't wait for mpv's reply.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(self, Self::TogglePause | Self::Pause | Self::Resume | Self::Seek(_))
    }

    fn payload(&self) -> Value {
        match self {
            Self::TogglePause => json!(["cycle", "pause"]),
            Self::Pause => json!(["set_property", "pause", true]),
            Self::Resume => json!(["set_property", "pause", false]),
            Self::Seek(secs) => json!(["seek", secs, "relative"]),
            Self::VolumeUp(step) => json!(["add", "volume", step]),
            Self::VolumeDown(step) => json!(["add", "volume", step.saturating_neg()]),
            Self::SetVolume(v) => json!(["set_property", "volume", v]),
            Self::SetLoop(on) => json!(["set_property", "loop-file", if *on { "inf" } else { "no" }]),
            Self::GetProperty(name) => json!(["get_property", name]),
        }
    }

    fn reports_volume(&self) -> bool {
        matches!(self, Self::VolumeUp(_) | Self::VolumeDown(_) | Self::SetVolume(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Written; no reply awaited.
    Sent,
    /// mpv's `data` field (null when the command has none).
    Data(Value),
}

#[derive(Debug)]
pub struct ChannelHandle {
    path: PathBuf,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    eof: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    reply_timeout: Duration,
}

/// Connects to the player's endpoint, retrying while the player creates it.
pub async fn attach(path: &Path, cfg: &config::Channel) -> Result<ChannelHandle, ChannelError> {
    let attempts = cfg.attach_attempts.max(1);
    let mut backoff = Duration::from_millis(cfg.backoff_ms);
    let mut last_err = String::new();
    for attempt in 1..=attempts {
        match UnixStream::connect(path).await {
            Ok(stream) => {
                info!(path = %path.display(), attempt, "control channel attached");
                return Ok(ChannelHandle::from_stream(path, stream, cfg.reply_timeout()));
            }
            Err(e) => {
                debug!(path = %path.display(), attempt, "attach failed: {e}");
                last_err = e.to_string();
            }
        }
        if attempt < attempts {
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
    Err(ChannelError::Unavailable(format!("{}: {last_err}", path.display())))
}

impl ChannelHandle {
    fn from_stream(path: &Path, stream: UnixStream, reply_timeout: Duration) -> Self {
        let (rd, wr) = stream.into_split();
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let eof = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(rd, pending.clone(), closed.clone(), eof.clone()));
        Self {
            path: path.to_path_buf(),
            writer: tokio::sync::Mutex::new(wr),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            eof,
            reader,
            reply_timeout,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once the player reported the end of its file.
    pub fn reached_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    pub async fn send(&self, cmd: &ControlCommand) -> Result<Reply, ChannelError> {
        if cmd.is_fire_and_forget() {
            self.write(&json!({ "command": cmd.payload() })).await?;
            return Ok(Reply::Sent);
        }
        let data = self.request(cmd.payload()).await?;
        if cmd.reports_volume() {
            return Ok(Reply::Data(self.request(json!(["get_property", "volume"])).await?));
        }
        Ok(Reply::Data(data))
    }

    pub async fn get_property(&self, name: &str) -> Result<Value, ChannelError> {
        self.request(json!(["get_property", name])).await
    }

    async fn request(&self, command: Value) -> Result<Value, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        if let Err(e) = self.write(&json!({ "command": command, "request_id": id })).await {
            self.lock_pending().remove(&id);
            return Err(e);
        }
        let reply = match timeout(self.reply_timeout, rx).await {
            Ok(Ok(v)) => v,
            Ok(Err(_)) => return Err(self.unavailable("closed while awaiting reply")),
            Err(_) => {
                self.lock_pending().remove(&id);
                return Err(ChannelError::Timeout(self.reply_timeout));
            }
        };
        match reply.get("error").and_then(Value::as_str) {
            Some("success") | None => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
            Some(err) => Err(ChannelError::Rejected(err.to_string())),
        }
    }

    async fn write(&self, msg: &Value) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(self.unavailable("closed"));
        }
        let mut line = msg.to_string();
        line.push('\n');
        let mut w = self.writer.lock().await;
        w.write_all(line.as_bytes()).await.map_err(|e| self.unavailable(&e.to_string()))?;
        w.flush().await.map_err(|e| self.unavailable(&e.to_string()))
    }

    fn unavailable(&self, why: &str) -> ChannelError {
        ChannelError::Unavailable(format!("{}: {why}", self.path.display()))
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(rd: OwnedReadHalf, pending: Pending, closed: Arc<AtomicBool>, eof: Arc<AtomicBool>) {
    let mut lines = BufReader::new(rd).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(v) = serde_json::from_str::<Value>(&line) else {
            debug!("control channel: unparsable line: {line}");
            continue;
        };
        if let Some(event) = v.get("event").and_then(Value::as_str) {
            debug!(event, "player event");
            if event == "end-file" && v.get("reason").and_then(Value::as_str) == Some("eof") {
                eof.store(true, Ordering::SeqCst);
            }
            continue;
        }
        if let Some(id) = v.get("request_id").and_then(Value::as_u64) {
            let tx = pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
            if let Some(tx) = tx {
                let _ = tx.send(v);
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    // wake everyone still waiting
    pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    debug!("control channel closed");
}
