//! mpv command lines for each kind of output.

use crate::{config, resolver::ResolvedStream};
use std::path::Path;

/// What the player is asked to show.
#[derive(Debug, Clone)]
pub enum Target<'a> {
    /// Local audio or video file.
    File(&'a Path),
    /// Local still image, held on screen.
    Image(&'a Path),
    Remote(&'a ResolvedStream),
    /// Wait for an incoming UDP stream.
    Monitor { port: u16 },
}

#[derive(Debug, Clone)]
pub struct PlayerArgs {
    cfg: config::Player,
}

impl PlayerArgs {
    pub fn new(cfg: config::Player) -> Self {
        Self { cfg }
    }

    pub fn ipc_socket(&self) -> std::path::PathBuf {
        self.cfg.ipc_socket_path()
    }

    fn prefix(&self) -> Vec<String> {
        let mut v: Vec<String> = self.cfg.wrapper.clone();
        v.push(self.cfg.binary.clone());
        v.push(format!("--vo={}", self.cfg.video_output));
        if self.cfg.video_output == "drm" {
            v.push(format!("--drm-connector={}", self.cfg.drm_connector));
        }
        v.push("--fs".into());
        v.push("--no-terminal".into());
        v.push("--no-osc".into());
        v.push("--no-config".into());
        v
    }

    fn playback_args(&self) -> Vec<String> {
        vec![
            "--af=scaletempo".into(),
            format!("--input-ipc-server={}", self.ipc_socket().display()),
            "--cache=yes".into(),
            format!("--cache-secs={}", self.cfg.cache_secs),
            format!("--demuxer-max-bytes={}", self.cfg.demuxer_max_bytes),
            format!("--hwdec={}", self.cfg.hwdec),
            "--video-sync=audio".into(),
            "--audio-device=auto".into(),
        ]
    }

    /// Full argv for a session.
    pub fn session(&self, target: &Target<'_>, looping: bool) -> Vec<String> {
        let mut v = self.prefix();
        match target {
            Target::Image(path) => {
                v.push("--image-display-duration=inf".into());
                v.push(format!("--input-ipc-server={}", self.ipc_socket().display()));
                v.push("--loop-file=inf".into());
                v.push(format!("--video-aspect-override={}", self.cfg.aspect));
                v.extend(self.cfg.extra_args.iter().cloned());
                v.push("--".into());
                v.push(path.to_string_lossy().into_owned());
            }
            Target::File(path) => {
                v.extend(self.playback_args());
                if looping {
                    v.push("--loop-file=inf".into());
                }
                v.extend(self.cfg.extra_args.iter().cloned());
                v.push("--".into());
                v.push(path.to_string_lossy().into_owned());
            }
            Target::Remote(stream) => {
                v.extend(self.playback_args());
                if looping {
                    v.push("--loop-file=inf".into());
                }
                if let Some(audio) = stream.audio() {
                    v.push(format!("--audio-file={audio}"));
                }
                v.extend(self.cfg.extra_args.iter().cloned());
                v.push("--".into());
                v.push(stream.video().to_string());
            }
            Target::Monitor { port } => {
                v.extend(self.playback_args());
                v.push("--idle=yes".into());
                v.push("--force-window=yes".into());
                v.push("--keep-open=always".into());
                v.push("--network-timeout=30".into());
                v.extend(self.cfg.extra_args.iter().cloned());
                v.push(format!("udp://@:{port}"));
            }
        }
        v
    }

    /// The idle placeholder: no IPC endpoint, never controlled.
    pub fn idle_image(&self, image: &Path) -> Vec<String> {
        let mut v = self.prefix();
        v.push("--image-display-duration=inf".into());
        v.push(format!("--video-aspect-override={}", self.cfg.aspect));
        v.push("--really-quiet".into());
        v.push("--".into());
        v.push(image.to_string_lossy().into_owned());
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> PlayerArgs {
        PlayerArgs::new(config::Player::default())
    }

    #[test]
    fn file_playback_has_cache_window_and_ipc() {
        let p = PathBuf::from("/home/pi/media/videos/a.mp4");
        let v = args().session(&Target::File(&p), false);
        assert_eq!(v[0], "mpv");
        assert!(v.contains(&"--drm-connector=Composite-1".to_string()));
        assert!(v.contains(&"--fs".to_string()));
        assert!(v.contains(&"--cache-secs=10".to_string()));
        assert!(v.contains(&"--demuxer-max-bytes=52428800".to_string()));
        assert!(v.contains(&"--hwdec=auto".to_string()));
        assert!(v.contains(&"--input-ipc-server=/tmp/mpvsocket".to_string()));
        assert!(!v.iter().any(|a| a.starts_with("--loop-file")));
        assert_eq!(v.last().unwrap(), "/home/pi/media/videos/a.mp4");
    }

    #[test]
    fn looping_adds_loop_file() {
        let p = PathBuf::from("/m/a.mp3");
        let v = args().session(&Target::File(&p), true);
        assert!(v.contains(&"--loop-file=inf".to_string()));
    }

    #[test]
    fn separate_audio_stream_is_passed_as_audio_file() {
        let s = ResolvedStream {
            title: "t".into(),
            media_urls: vec!["http://v".into(), "http://a".into()],
        };
        let v = args().session(&Target::Remote(&s), false);
        assert!(v.contains(&"--audio-file=http://a".to_string()));
        assert_eq!(v.last().unwrap(), "http://v");
    }

    #[test]
    fn monitor_listens_on_udp() {
        let v = args().session(&Target::Monitor { port: 5000 }, false);
        assert!(v.contains(&"--idle=yes".to_string()));
        assert_eq!(v.last().unwrap(), "udp://@:5000");
    }

    #[test]
    fn wrapper_prefixes_the_binary() {
        let cfg = config::Player {
            wrapper: vec!["openvt".into(), "-w".into(), "--".into()],
            ..config::Player::default()
        };
        let v = PlayerArgs::new(cfg).idle_image(&PathBuf::from("/s.png"));
        assert_eq!(&v[..4], &["openvt", "-w", "--", "mpv"]);
        assert!(!v.iter().any(|a| a.starts_with("--input-ipc-server")));
    }
}
