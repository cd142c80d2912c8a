//! Shared test rig: a temp media library, shell scripts standing in for mpv and
//! yt-dlp, and a fake mpv IPC endpoint.

#![allow(dead_code)]

use retrocast::config::Config;
use serde_json::{json, Value};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{unix::OwnedWriteHalf, UnixListener},
    task::JoinHandle,
};

type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

pub struct Rig {
    pub dir: TempDir,
    pub cfg: Config,
}

impl Rig {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn socket(&self) -> PathBuf {
        self.path("mpv.sock")
    }

    /// Point the resolver at a script with the given body.
    pub fn extractor(&mut self, name: &str, body: &str) {
        let p = script(self.dir.path(), name, body);
        self.cfg.resolver.binary = p.to_string_lossy().into_owned();
    }
}

pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
    p
}

pub fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let media = root.join("media");
    fs::create_dir_all(media.join("videos")).unwrap();
    fs::write(media.join("videos/a.mp4"), b"not really a video").unwrap();
    fs::write(media.join("b.mp3"), b"not really audio").unwrap();
    fs::write(media.join("pic.png"), b"not really an image").unwrap();
    fs::write(media.join("notes.txt"), b"text").unwrap();
    fs::write(root.join("splash.png"), b"splash").unwrap();

    // run through sh so the freshly written file is never exec'd directly
    let player = script(root, "fakeplayer", "exec sleep 60");
    let extractor = script(root, "fakeextractor", "echo 'Title'\necho 'http://v.example/v'\necho 'http://a.example/a'");

    let mut cfg = Config::default();
    cfg.player.wrapper = vec!["/bin/sh".into(), player.to_string_lossy().into_owned()];
    cfg.player.binary = "mpv".into();
    cfg.player.ipc_socket = root.join("mpv.sock").to_string_lossy().into_owned();
    cfg.player.sweep = vec![];
    cfg.player.stop_grace_ms = 500;
    cfg.player.startup_grace_secs = 3;
    cfg.resolver.binary = extractor.to_string_lossy().into_owned();
    cfg.resolver.timeout_secs = 5;
    cfg.resolver.cache_dir = None;
    cfg.channel.attach_attempts = 20;
    cfg.channel.backoff_ms = 10;
    cfg.channel.reply_timeout_ms = 1000;
    cfg.watchdog.interval_secs = 1;
    cfg.idle.image = root.join("splash.png").to_string_lossy().into_owned();
    cfg.library.media_dir = media.to_string_lossy().into_owned();
    cfg.output.snapshot_path = Some(root.join("run/state.json").to_string_lossy().into_owned());
    cfg.output.events_path = Some(root.join("run/events.jsonl").to_string_lossy().into_owned());
    cfg.output.socket_path = Some(root.join("run/retrocast.sock").to_string_lossy().into_owned());
    Rig { dir, cfg }
}

/// Fake mpv IPC server. Answers `get_property` with canned values and
/// everything else with success; records every command it receives.
pub struct FakeMpv {
    pub seen: Arc<Mutex<Vec<Value>>>,
    accept: JoinHandle<()>,
    conns: Arc<Mutex<Vec<JoinHandle<()>>>>,
    writers: Arc<Mutex<Vec<Writer>>>,
}

impl FakeMpv {
    pub fn start(path: &Path) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let conns: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();
        let writers: Arc<Mutex<Vec<Writer>>> = Arc::default();
        let (seen2, conns2, writers2) = (seen.clone(), conns.clone(), writers.clone());
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen2.clone();
                let (rd, wr) = stream.into_split();
                let wr: Writer = Arc::new(tokio::sync::Mutex::new(wr));
                writers2.lock().unwrap().push(wr.clone());
                let h = tokio::spawn(async move {
                    let mut lines = BufReader::new(rd).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let Ok(v) = serde_json::from_str::<Value>(&line) else { continue };
                        seen.lock().unwrap().push(v.clone());
                        let Some(id) = v.get("request_id").cloned() else { continue };
                        let data = match v["command"][1].as_str() {
                            Some("volume") if v["command"][0] == "get_property" => json!(55.0),
                            Some("time-pos") => json!(1.5),
                            Some("duration") => json!(120.0),
                            Some("pause") => json!(false),
                            _ => Value::Null,
                        };
                        let reply = json!({ "request_id": id, "error": "success", "data": data });
                        if wr.lock().await.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
                conns2.lock().unwrap().push(h);
            }
        });
        Self {
            seen,
            accept,
            conns,
            writers,
        }
    }

    /// Push an unsolicited event line to every connected client.
    pub async fn emit(&self, event: Value) {
        let writers: Vec<Writer> = self.writers.lock().unwrap().clone();
        for wr in writers {
            let _ = wr.lock().await.write_all(format!("{event}\n").as_bytes()).await;
        }
    }

    pub fn commands(&self) -> Vec<Value> {
        self.seen.lock().unwrap().iter().map(|v| v["command"].clone()).collect()
    }

    /// Drop every connection, as if the player went away.
    pub fn shutdown(&self) {
        self.accept.abort();
        for h in self.conns.lock().unwrap().drain(..) {
            h.abort();
        }
        self.writers.lock().unwrap().clear();
    }
}

impl Drop for FakeMpv {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn pid_exists(pid: u32) -> bool {
    let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap());
    nix::sys::signal::kill(pid, None).is_ok()
}

pub async fn wait_until(limit: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    f()
}
