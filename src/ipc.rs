//! Playback request socket: one JSON object per line in, one JSON reply per line out.
//!
//! `{"cmd":"play-remote","url":"https://…"}` → `{"ok":true,"data":{…status…}}`

use crate::{
    channel::{ControlCommand, Reply},
    controller::Controller,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fs, os::unix::fs::PermissionsExt, path::Path, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};
use tracing::{debug, info, warn};

const DEFAULT_VOLUME_STEP: i64 = 5;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum IpcCmd {
    PlayLocal { path: String },
    PlayRemote { url: String },
    Monitor { port: Option<u16> },
    Stop,
    TogglePause,
    Pause,
    Resume,
    Seek { offset: f64 }, // seconds (+/-)
    VolumeUp { step: Option<i64> },
    VolumeDown { step: Option<i64> },
    SetVolume { volume: f64 },
    Loop { enabled: bool },
    Status,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IpcReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IpcReply {
    fn ok(data: Option<Value>) -> Self {
        Self { ok: true, error: None, data }
    }
    fn err(e: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(e.to_string()),
            data: None,
        }
    }
}

fn from_reply(r: Reply) -> IpcReply {
    match r {
        Reply::Sent => IpcReply::ok(None),
        Reply::Data(v) => IpcReply::ok(Some(serde_json::json!({ "value": v }))),
    }
}

pub async fn handle(ctl: &Controller, cmd: IpcCmd) -> IpcReply {
    let status = |r: Result<crate::session::SessionStatus, _>| match r {
        Ok(st) => IpcReply::ok(serde_json::to_value(st).ok()),
        Err(e) => IpcReply::err(e),
    };
    let control = |r: Result<Reply, crate::error::SessionError>| match r {
        Ok(r) => from_reply(r),
        Err(e) => IpcReply::err(e),
    };
    match cmd {
        IpcCmd::PlayLocal { path } => status(ctl.start_local(&path).await),
        IpcCmd::PlayRemote { url } => status(ctl.start_remote(&url).await),
        IpcCmd::Monitor { port } => status(ctl.start_monitor(port).await),
        IpcCmd::Stop => match ctl.stop().await {
            Ok(()) => IpcReply::ok(None),
            Err(e) => IpcReply::err(e),
        },
        IpcCmd::TogglePause => control(ctl.control(ControlCommand::TogglePause).await),
        IpcCmd::Pause => control(ctl.control(ControlCommand::Pause).await),
        IpcCmd::Resume => control(ctl.control(ControlCommand::Resume).await),
        IpcCmd::Seek { offset } => control(ctl.control(ControlCommand::Seek(offset)).await),
        IpcCmd::VolumeUp { step } => {
            control(ctl.control(ControlCommand::VolumeUp(step.unwrap_or(DEFAULT_VOLUME_STEP))).await)
        }
        IpcCmd::VolumeDown { step } => {
            control(ctl.control(ControlCommand::VolumeDown(step.unwrap_or(DEFAULT_VOLUME_STEP))).await)
        }
        IpcCmd::SetVolume { volume } => control(ctl.control(ControlCommand::SetVolume(volume)).await),
        IpcCmd::Loop { enabled } => control(ctl.set_loop(enabled).await),
        IpcCmd::Status => IpcReply::ok(serde_json::to_value(ctl.status().await).ok()),
    }
}

async fn handle_stream(ctl: Arc<Controller>, stream: UnixStream) {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let txt = line.trim();
        if txt.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<IpcCmd>(txt) {
            Ok(cmd) => {
                debug!(?cmd, "request");
                handle(&ctl, cmd).await
            }
            Err(e) => IpcReply::err(format!("bad request: {e}")),
        };
        let Ok(mut out) = serde_json::to_string(&reply) else {
            break;
        };
        out.push('\n');
        if wr.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        let _ = wr.flush().await;
    }
}

/// Binds the socket (replacing a stale one) with owner-only permissions.
pub fn bind(sock: &Path) -> Result<UnixListener> {
    if let Some(dir) = sock.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let _ = fs::remove_file(sock);
    let listener = UnixListener::bind(sock).with_context(|| format!("binding {}", sock.display()))?;
    let _ = fs::set_permissions(sock, fs::Permissions::from_mode(0o600));
    info!(path = %sock.display(), "request socket listening");
    Ok(listener)
}

pub async fn serve(ctl: Arc<Controller>, listener: UnixListener) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_stream(ctl.clone(), stream));
            }
            Err(e) => {
                warn!("ipc accept error: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        let c: IpcCmd = serde_json::from_str(r#"{"cmd":"play-remote","url":"https://x"}"#).unwrap();
        assert_eq!(c, IpcCmd::PlayRemote { url: "https://x".into() });
        let c: IpcCmd = serde_json::from_str(r#"{"cmd":"stop"}"#).unwrap();
        assert_eq!(c, IpcCmd::Stop);
        let c: IpcCmd = serde_json::from_str(r#"{"cmd":"monitor"}"#).unwrap();
        assert_eq!(c, IpcCmd::Monitor { port: None });
        let c: IpcCmd = serde_json::from_str(r#"{"cmd":"volume-up"}"#).unwrap();
        assert_eq!(c, IpcCmd::VolumeUp { step: None });
        let c: IpcCmd = serde_json::from_str(r#"{"cmd":"seek","offset":-10}"#).unwrap();
        assert_eq!(c, IpcCmd::Seek { offset: -10.0 });
        assert!(serde_json::from_str::<IpcCmd>(r#"{"cmd":"reboot"}"#).is_err());
    }

    #[test]
    fn reply_omits_empty_fields() {
        assert_eq!(serde_json::to_string(&IpcReply::ok(None)).unwrap(), r#"{"ok":true}"#);
        assert_eq!(
            serde_json::to_string(&IpcReply::err("no active session")).unwrap(),
            r#"{"ok":false,"error":"no active session"}"#
        );
    }
}
