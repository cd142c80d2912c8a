//! Remote URL → direct stream URLs via an external extractor (yt-dlp).
//!
//! The extractor prints the title on the first line and one URL per line after it.
//! Some extractor versions omit or reorder the title, so parsing is two-pass:
//! 1. title = first line, URLs = later lines that start with a scheme;
//! 2. only if pass 1 found no URL, rescan every line and use a placeholder title.
//!
//! A real title that itself starts with `scheme://` is indistinguishable from
//! a URL in pass 2. That ambiguity is accepted.

use crate::{
    config,
    error::ResolveError,
    supervisor::{Escalation, IoPolicy, Supervisor},
};
use regex::Regex;
use std::{sync::LazyLock, time::Duration};
use tokio::{io::AsyncReadExt, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

pub const PLACEHOLDER_TITLE: &str = "Remote video";

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+").expect("scheme regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub title: String,
    /// Video first, then the separate audio stream if there is one.
    pub media_urls: Vec<String>,
}

impl ResolvedStream {
    pub fn video(&self) -> &str {
        &self.media_urls[0]
    }
    pub fn audio(&self) -> Option<&str> {
        self.media_urls.get(1).map(String::as_str)
    }
}

/// Best video ≤ h with best audio, else best combined ≤ h, else anything.
pub fn format_selector(max_height: u32) -> String {
    format!("bestvideo[height<={max_height}]+bestaudio/best[height<={max_height}]/best")
}

fn is_url(line: &str) -> bool {
    SCHEME.is_match(line)
}

pub fn parse_output(stdout: &str) -> Result<ResolvedStream, ResolveError> {
    let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let mut title = lines.first().map_or_else(|| PLACEHOLDER_TITLE.to_string(), ToString::to_string);
    let mut urls: Vec<String> = lines.iter().skip(1).filter(|l| is_url(l)).map(ToString::to_string).collect();

    if urls.is_empty() {
        urls = lines.iter().filter(|l| is_url(l)).map(ToString::to_string).collect();
        if !urls.is_empty() {
            debug!("extractor output had no title line, using placeholder");
            title = PLACEHOLDER_TITLE.to_string();
        }
    }
    if urls.is_empty() {
        return Err(ResolveError::NoStreamFound);
    }
    // video + audio at most
    urls.truncate(2);
    Ok(ResolvedStream { title, media_urls: urls })
}

pub fn truncate_diagnostic(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max.saturating_sub(1)).collect::<String>() + "…"
}

#[derive(Debug, Clone)]
pub struct StreamResolver {
    cfg: config::Resolver,
    supervisor: Supervisor,
}

impl StreamResolver {
    pub fn new(cfg: config::Resolver, supervisor: Supervisor) -> Self {
        Self { cfg, supervisor }
    }

    pub fn argv(&self, url: &str, max_height: u32) -> Vec<String> {
        let mut argv = vec![
            self.cfg.binary.clone(),
            "-f".into(),
            format_selector(max_height),
            "--get-title".into(),
            "-g".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--socket-timeout".into(),
            self.cfg.socket_timeout_secs.to_string(),
        ];
        if let Some(dir) = &self.cfg.cache_dir {
            argv.push("--cache-dir".into());
            argv.push(config::expand(dir));
        }
        argv.push("--".into());
        argv.push(url.to_string());
        argv
    }

    /// Uses the configured height limit and timeout.
    pub async fn resolve_default(&self, url: &str) -> Result<ResolvedStream, ResolveError> {
        self.resolve(url, self.cfg.max_height, self.cfg.timeout()).await
    }

    /// Runs the extractor once. `limit` covers the exit and draining its output;
    /// on expiry the extractor's whole process group is killed before returning.
    pub async fn resolve(&self, url: &str, max_height: u32, limit: Duration) -> Result<ResolvedStream, ResolveError> {
        let argv = self.argv(url, max_height);
        let record = self.supervisor.spawn_group(&argv, &[], IoPolicy::Capture)?;
        info!(pid = record.pid(), %url, "resolving");

        let mut stdout = record.take_stdout().map(read_all);
        let mut stderr = record.take_stderr().map(read_all);

        let finished = timeout(limit, async {
            record.wait_exit().await;
            (collect(&mut stdout).await, collect(&mut stderr).await)
        })
        .await;
        if finished.is_err() {
            warn!(pid = record.pid(), ?limit, "extractor timed out");
        }
        // nothing the extractor forked may outlive the call
        self.supervisor.terminate(&record, Escalation::Immediate).await;
        let Ok((out, err)) = finished else {
            abort(stdout);
            abort(stderr);
            return Err(ResolveError::Timeout);
        };
        let status = record.exit_status();

        if !status.is_some_and(|s| s.success()) {
            let msg = if err.trim().is_empty() {
                format!("{} exited with {}", self.cfg.binary, status.map_or_else(|| "unknown status".into(), |s| s.to_string()))
            } else {
                err
            };
            return Err(ResolveError::ExtractionFailed(truncate_diagnostic(&msg, self.cfg.max_error_len)));
        }

        let resolved = parse_output(&out)?;
        info!(title = %resolved.title, streams = resolved.media_urls.len(), "resolved");
        Ok(resolved)
    }
}

fn read_all<R>(mut r: R) -> JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = r.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn collect(h: &mut Option<JoinHandle<String>>) -> String {
    match h {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    }
}

fn abort(h: Option<JoinHandle<String>>) {
    if let Some(h) = h {
        h.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_then_two_urls() {
        let r = parse_output("Title\nhttp://a\nhttp://b\n").unwrap();
        assert_eq!(r.title, "Title");
        assert_eq!(r.media_urls, vec!["http://a", "http://b"]);
        assert_eq!(r.video(), "http://a");
        assert_eq!(r.audio(), Some("http://b"));
    }

    #[test]
    fn single_combined_stream() {
        let r = parse_output("Some clip\nhttps://cdn.example/v.mp4\n").unwrap();
        assert_eq!(r.media_urls.len(), 1);
        assert_eq!(r.audio(), None);
    }

    #[test]
    fn no_url_lines_is_no_stream() {
        let err = parse_output("Title\nnot a url\nERROR: nope\n").unwrap_err();
        assert!(matches!(err, ResolveError::NoStreamFound));
        assert!(matches!(parse_output("").unwrap_err(), ResolveError::NoStreamFound));
    }

    #[test]
    fn second_pass_uses_placeholder_title() {
        // title line missing, single URL only
        let r = parse_output("https://only.example/stream\n").unwrap();
        assert_eq!(r.title, PLACEHOLDER_TITLE);
        assert_eq!(r.media_urls, vec!["https://only.example/stream"]);
    }

    #[test]
    fn second_pass_not_taken_when_first_pass_succeeds() {
        // a URL-looking title stays the title when later lines are URLs
        let r = parse_output("http://title-like\nhttp://v\n").unwrap();
        assert_eq!(r.title, "http://title-like");
        assert_eq!(r.media_urls, vec!["http://v"]);
    }

    #[test]
    fn non_http_schemes_count() {
        let r = parse_output("Live\nrtmp://host/live\n").unwrap();
        assert_eq!(r.media_urls, vec!["rtmp://host/live"]);
    }

    #[test]
    fn selector_is_priority_ordered() {
        assert_eq!(
            format_selector(480),
            "bestvideo[height<=480]+bestaudio/best[height<=480]/best"
        );
    }

    #[test]
    fn diagnostics_are_bounded() {
        let long = "x".repeat(1000);
        let t = truncate_diagnostic(&long, 200);
        assert_eq!(t.chars().count(), 200);
        assert_eq!(truncate_diagnostic("  short \n", 200), "short");
    }

    #[test]
    fn argv_carries_direct_url_and_playlist_flags() {
        let r = StreamResolver::new(config::Resolver::default(), Supervisor::new(Duration::from_secs(1)));
        let argv = r.argv("https://youtu.be/x", 360);
        assert_eq!(argv[0], "yt-dlp");
        assert!(argv.contains(&"-g".to_string()));
        assert!(argv.contains(&"--no-playlist".to_string()));
        assert!(argv.contains(&format_selector(360)));
        let i = argv.iter().position(|a| a == "--socket-timeout").unwrap();
        assert_eq!(argv[i + 1], "15");
        assert_eq!(argv.last().unwrap(), "https://youtu.be/x");
    }
}
