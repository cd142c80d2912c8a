mod fixtures;

use fixtures::{rig, script};
use retrocast::{
    error::ResolveError,
    resolver::{StreamResolver, PLACEHOLDER_TITLE},
    supervisor::{pids_by_name, Supervisor},
};
use std::time::{Duration, Instant};

fn resolver(cfg: &retrocast::config::Config) -> StreamResolver {
    StreamResolver::new(cfg.resolver.clone(), Supervisor::new(Duration::from_millis(200)))
}

#[tokio::test]
async fn separate_video_and_audio_streams() {
    let r = rig();
    let got = resolver(&r.cfg).resolve_default("https://video.example/watch?v=1").await.unwrap();
    assert_eq!(got.title, "Title");
    assert_eq!(got.video(), "http://v.example/v");
    assert_eq!(got.audio(), Some("http://a.example/a"));
}

#[tokio::test]
async fn extractor_receives_height_limit_and_url() {
    let mut r = rig();
    let log = r.path("argv.log");
    r.extractor(
        "argvextractor",
        &format!("echo \"$@\" > '{}'\necho Clip\necho https://cdn.example/x.mp4", log.display()),
    );
    let got = resolver(&r.cfg).resolve("https://video.example/a", 360, Duration::from_secs(5)).await.unwrap();
    assert_eq!(got.title, "Clip");
    assert_eq!(got.media_urls.len(), 1);

    let argv = std::fs::read_to_string(log).unwrap();
    assert!(argv.contains("bestvideo[height<=360]+bestaudio/best[height<=360]/best"));
    assert!(argv.contains("--no-playlist"));
    assert!(argv.trim_end().ends_with("-- https://video.example/a"));
}

#[tokio::test]
async fn url_only_output_gets_placeholder_title() {
    let mut r = rig();
    r.extractor("urlonly", "echo https://cdn.example/only.mp4");
    let got = resolver(&r.cfg).resolve_default("https://video.example/b").await.unwrap();
    assert_eq!(got.title, PLACEHOLDER_TITLE);
    assert_eq!(got.video(), "https://cdn.example/only.mp4");
}

#[tokio::test]
async fn output_without_urls_is_no_stream() {
    let mut r = rig();
    r.extractor("nourls", "echo 'Just a title'");
    let err = resolver(&r.cfg).resolve_default("https://video.example/c").await.unwrap_err();
    assert!(matches!(err, ResolveError::NoStreamFound), "{err:?}");
}

#[tokio::test]
async fn failure_diagnostic_is_truncated() {
    let mut r = rig();
    r.extractor("chattyfail", "i=0\nwhile [ $i -lt 50 ]; do printf 'ERROR: broken ' >&2; i=$((i+1)); done\nexit 2");
    let err = resolver(&r.cfg).resolve_default("https://video.example/d").await.unwrap_err();
    let ResolveError::ExtractionFailed(msg) = err else {
        panic!("unexpected {err:?}");
    };
    assert!(msg.starts_with("ERROR: broken"));
    assert!(msg.chars().count() <= 200, "{} chars", msg.chars().count());
}

#[tokio::test]
async fn silent_failure_reports_exit_status() {
    let mut r = rig();
    r.extractor("quietfail", "exit 3");
    let err = resolver(&r.cfg).resolve_default("https://video.example/e").await.unwrap_err();
    let ResolveError::ExtractionFailed(msg) = err else {
        panic!("unexpected {err:?}");
    };
    assert!(msg.contains("quietfail"), "{msg}");
}

#[tokio::test]
async fn hung_extractor_is_killed_on_timeout() {
    let r = rig();
    let mut cfg = r.cfg.clone();
    cfg.resolver.binary = script(r.dir.path(), "rcslowtool", "while :; do sleep 0.1; done")
        .to_string_lossy()
        .into_owned();

    let started = Instant::now();
    let err = resolver(&cfg)
        .resolve("https://video.example/slow", 480, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Timeout), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(pids_by_name(&["rcslowtool"]).is_empty());
}

#[tokio::test]
async fn deadline_covers_output_held_open_by_a_forked_helper() {
    let mut r = rig();
    let beat = r.path("beat");
    let helper = script(
        r.dir.path(),
        "rclingerer",
        &format!("while :; do echo x >> '{}'; sleep 0.1; done", beat.display()),
    );
    r.extractor(
        "forkingextractor",
        &format!("echo Title\necho http://v.example/v\n/bin/sh '{}' &\nexit 0", helper.display()),
    );

    let started = Instant::now();
    let err = resolver(&r.cfg)
        .resolve("https://video.example/fork", 480, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Timeout), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());

    // the helper was in the extractor's process group and must be gone
    tokio::time::sleep(Duration::from_millis(200)).await;
    let len = std::fs::metadata(&beat).map(|m| m.len()).unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(std::fs::metadata(&beat).map(|m| m.len()).unwrap_or(0), len);
}

#[tokio::test]
async fn missing_extractor_is_a_spawn_error() {
    let mut r = rig();
    r.cfg.resolver.binary = "/nonexistent/yt-dlp".into();
    let err = resolver(&r.cfg).resolve_default("https://video.example/f").await.unwrap_err();
    assert!(matches!(err, ResolveError::Spawn(_)), "{err:?}");
}
