//! Daemon configuration (`$XDG_CONFIG_HOME/retrocast/config.toml`).
//!
//! Every field has a default so an absent file is a valid configuration.
//! Path-like values go through [`expand`] before use.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: Player,
    #[serde(default)]
    pub resolver: Resolver,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub watchdog: Watchdog,
    #[serde(default)]
    pub idle: Idle,
    #[serde(default)]
    pub library: Library,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

// ------------------------- Player -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Player {
    #[serde(default = "default_player_binary")]
    pub binary: String,
    /// Prefix argv, e.g. `["openvt", "-f", "-w", "-c", "1", "--"]`.
    #[serde(default)]
    pub wrapper: Vec<String>,
    #[serde(default = "default_video_output")]
    pub video_output: String,
    #[serde(default = "default_connector")]
    pub drm_connector: String,
    #[serde(default = "default_ipc_socket")]
    pub ipc_socket: String,
    #[serde(default = "d10")]
    pub cache_secs: u64,
    #[serde(default = "d50mib")]
    pub demuxer_max_bytes: u64,
    #[serde(default = "default_hwdec")]
    pub hwdec: String,
    #[serde(default = "default_aspect")]
    pub aspect: String,
    #[serde(default = "d5")]
    pub startup_grace_secs: u64,
    #[serde(default = "d1000")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_sweep")]
    pub sweep: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}
fn default_player_binary() -> String {
    "mpv".into()
}
fn default_video_output() -> String {
    "drm".into()
}
fn default_connector() -> String {
    "Composite-1".into()
}
fn default_ipc_socket() -> String {
    "/tmp/mpvsocket".into()
}
fn default_hwdec() -> String {
    "auto".into()
}
fn default_aspect() -> String {
    "4:3".into()
}
fn default_sweep() -> Vec<String> {
    vec!["mpv".into(), "vlc".into(), "fbi".into(), "fim".into()]
}
fn d5() -> u64 {
    5
}
fn d10() -> u64 {
    10
}
fn d1000() -> u64 {
    1000
}
fn d50mib() -> u64 {
    50 * 1024 * 1024
}
impl Default for Player {
    fn default() -> Self {
        Self {
            binary: default_player_binary(),
            wrapper: vec![],
            video_output: default_video_output(),
            drm_connector: default_connector(),
            ipc_socket: default_ipc_socket(),
            cache_secs: d10(),
            demuxer_max_bytes: d50mib(),
            hwdec: default_hwdec(),
            aspect: default_aspect(),
            startup_grace_secs: d5(),
            stop_grace_ms: d1000(),
            sweep: default_sweep(),
            extra_args: vec![],
        }
    }
}
impl Player {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
    pub fn ipc_socket_path(&self) -> PathBuf {
        PathBuf::from(expand(&self.ipc_socket))
    }
}

// ------------------------- Resolver -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Resolver {
    #[serde(default = "default_resolver_binary")]
    pub binary: String,
    #[serde(default = "d480")]
    pub max_height: u32,
    #[serde(default = "d60")]
    pub timeout_secs: u64,
    #[serde(default = "d15")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_resolver_cache")]
    pub cache_dir: Option<String>,
    #[serde(default = "d200usize")]
    pub max_error_len: usize,
}
fn default_resolver_binary() -> String {
    "yt-dlp".into()
}
#[allow(clippy::unnecessary_wraps)]
fn default_resolver_cache() -> Option<String> {
    Some("/tmp/yt-dlp-cache".into())
}
fn d480() -> u32 {
    480
}
fn d60() -> u64 {
    60
}
fn d15() -> u64 {
    15
}
fn d200usize() -> usize {
    200
}
impl Default for Resolver {
    fn default() -> Self {
        Self {
            binary: default_resolver_binary(),
            max_height: d480(),
            timeout_secs: d60(),
            socket_timeout_secs: d15(),
            cache_dir: default_resolver_cache(),
            max_error_len: d200usize(),
        }
    }
}
impl Resolver {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ------------------------- Control channel -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(default = "d10u32")]
    pub attach_attempts: u32,
    #[serde(default = "d100")]
    pub backoff_ms: u64,
    #[serde(default = "d2000")]
    pub reply_timeout_ms: u64,
}
fn d10u32() -> u32 {
    10
}
fn d100() -> u64 {
    100
}
fn d2000() -> u64 {
    2000
}
impl Default for Channel {
    fn default() -> Self {
        Self {
            attach_attempts: d10u32(),
            backoff_ms: d100(),
            reply_timeout_ms: d2000(),
        }
    }
}
impl Channel {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

// ------------------------- Watchdog / Idle / Library -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Watchdog {
    #[serde(default = "d2")]
    pub interval_secs: u64,
}
fn d2() -> u64 {
    2
}
impl Default for Watchdog {
    fn default() -> Self {
        Self { interval_secs: d2() }
    }
}
impl Watchdog {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Idle {
    #[serde(default = "default_idle_image")]
    pub image: String,
}
fn default_idle_image() -> String {
    "/home/pi/retrocast/splash.png".into()
}
impl Default for Idle {
    fn default() -> Self {
        Self {
            image: default_idle_image(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Library {
    #[serde(default = "default_media_dir")]
    pub media_dir: String,
    #[serde(default = "d1234")]
    pub monitor_port: u16,
}
fn default_media_dir() -> String {
    "/home/pi/media".into()
}
fn d1234() -> u16 {
    1234
}
impl Default for Library {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            monitor_port: d1234(),
        }
    }
}

// ------------------------- Output / Logging -------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub snapshot_path: Option<String>,
    #[serde(default)]
    pub events_path: Option<String>,
    #[serde(default)]
    pub socket_path: Option<String>,
    #[serde(default)]
    pub pretty_snapshot: bool,
}
impl Output {
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(expand(
            self.snapshot_path
                .as_deref()
                .unwrap_or("$XDG_RUNTIME_DIR/retrocast/state.json"),
        ))
    }
    pub fn events_path(&self) -> PathBuf {
        PathBuf::from(expand(
            self.events_path
                .as_deref()
                .unwrap_or("$XDG_RUNTIME_DIR/retrocast/events.jsonl"),
        ))
    }
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(expand(
            self.socket_path
                .as_deref()
                .unwrap_or("$XDG_RUNTIME_DIR/retrocast/retrocast.sock"),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Logging {
    #[serde(default = "default_level")]
    pub level: String,
}
fn default_level() -> String {
    "info".into()
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

// ------------------------- Utils -------------------------

pub fn expand(path: &str) -> String {
    let mut s = path.to_string();
    if let Some(home) = dirs::home_dir() {
        s = s.replace("$HOME", home.to_string_lossy().as_ref());
    }
    if let Some(cfg) = dirs::config_dir() {
        s = s.replace("$XDG_CONFIG_HOME", cfg.to_string_lossy().as_ref());
    }
    if let Some(cache) = dirs::cache_dir() {
        s = s.replace("$XDG_CACHE_HOME", cache.to_string_lossy().as_ref());
    }
    if let Ok(run) = std::env::var("XDG_RUNTIME_DIR") {
        s = s.replace("$XDG_RUNTIME_DIR", &run);
    } else {
        let uid = nix::unistd::Uid::current().as_raw();
        s = s.replace("$XDG_RUNTIME_DIR", &format!("/run/user/{uid}"));
    }
    s
}

pub fn config_path() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("RETROCAST_CONFIG") {
        return Ok(PathBuf::from(expand(&p)));
    }
    let cfg_dir = dirs::config_dir().context("no XDG_CONFIG_HOME")?;
    Ok(cfg_dir.join("retrocast").join("config.toml"))
}

pub fn parse(text: &str) -> Result<Config> {
    toml::from_str(text).context("parsing toml")
}

/// Missing file means defaults; an unreadable or malformed one is an error.
pub fn read_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let text = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    parse(&text)
}
