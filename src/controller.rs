//! Media session controller.
//!
//! All transitions run under one async mutex, so at most one session exists and
//! starts never interleave. Every start or stop takes a ticket first; an in-flight
//! resolve or player startup gives up as soon as a newer ticket appears.
//! Control commands and the watchdog only read the published [`ActiveRef`] and
//! never take the transition lock unless they request a transition.

use crate::{
    channel::{self, ChannelHandle, ControlCommand, Reply},
    config::{self, Config},
    error::{ChannelError, SessionError, SpawnError},
    idle::IdlePresentation,
    player::{PlayerArgs, Target},
    resolver::StreamResolver,
    session::{self, ActiveRef, EndReason, Lifecycle, MediaClass, Phase, Session, SessionKind, SessionStatus, StatusWriter},
    supervisor::{IoPolicy, ProcessRecord, Supervisor},
};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::{sync::watch, time::timeout};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Request {
    Local { path: PathBuf, class: MediaClass },
    Remote { url: String },
    Monitor { port: u16 },
}

#[derive(Debug)]
struct Inner {
    session: Option<Session>,
    idle: IdlePresentation,
    next_session_id: u64,
}

#[derive(Debug)]
pub struct Controller {
    cfg: Config,
    supervisor: Supervisor,
    resolver: StreamResolver,
    args: PlayerArgs,
    inner: tokio::sync::Mutex<Inner>,
    active: Mutex<Option<ActiveRef>>,
    status: Mutex<SessionStatus>,
    writer: StatusWriter,
    phase_tx: watch::Sender<Phase>,
    ticket_tx: watch::Sender<u64>,
    looping: AtomicBool,
}

impl Controller {
    pub fn new(cfg: Config) -> Self {
        let supervisor = Supervisor::new(cfg.player.stop_grace());
        let resolver = StreamResolver::new(cfg.resolver.clone(), supervisor);
        let args = PlayerArgs::new(cfg.player.clone());
        let idle = IdlePresentation::new(supervisor, args.clone(), PathBuf::from(config::expand(&cfg.idle.image)));
        let writer = StatusWriter::new(
            cfg.output.snapshot_path(),
            cfg.output.events_path(),
            cfg.output.pretty_snapshot,
        );
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let (ticket_tx, _) = watch::channel(0);
        Self {
            cfg,
            supervisor,
            resolver,
            args,
            inner: tokio::sync::Mutex::new(Inner {
                session: None,
                idle,
                next_session_id: 1,
            }),
            active: Mutex::new(None),
            status: Mutex::new(SessionStatus::default()),
            writer,
            phase_tx,
            ticket_tx,
            looping: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    /// What the watchdog probes. `None` unless a session is Active.
    pub fn probe(&self) -> Option<ActiveRef> {
        self.lock_active().clone()
    }

    pub async fn idle_presentations(&self) -> u64 {
        self.inner.lock().await.idle.shows()
    }

    // ------------------------- Requests -------------------------

    pub async fn start_local(&self, path: &str) -> Result<SessionStatus, SessionError> {
        let (path, class) = self.check_local(path)?;
        let ticket = self.take_ticket();
        self.start(ticket, Request::Local { path, class }).await
    }

    pub async fn start_remote(&self, url: &str) -> Result<SessionStatus, SessionError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SessionError::InvalidRequest("empty url".into()));
        }
        let ticket = self.take_ticket();
        self.start(ticket, Request::Remote { url: url.to_string() }).await
    }

    pub async fn start_monitor(&self, port: Option<u16>) -> Result<SessionStatus, SessionError> {
        let port = port.unwrap_or(self.cfg.library.monitor_port);
        if port == 0 {
            return Err(SessionError::InvalidRequest("port 0".into()));
        }
        let ticket = self.take_ticket();
        self.start(ticket, Request::Monitor { port }).await
    }

    /// Stopping while idle is a successful no-op.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.take_ticket();
        let mut inner = self.inner.lock().await;
        let stopped = self.teardown(&mut inner, Lifecycle::Stopping).await;
        if stopped {
            info!("stopped by request");
        }
        self.enter_idle(&mut inner, stopped.then_some(EndReason::Stopped));
        Ok(())
    }

    /// Show the placeholder at daemon start.
    pub async fn show_idle(&self) {
        let mut inner = self.inner.lock().await;
        if inner.session.is_none() {
            self.enter_idle(&mut inner, None);
        }
    }

    /// Daemon exit: stop everything including the placeholder.
    pub async fn shutdown(&self) {
        self.take_ticket();
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner, Lifecycle::Stopping).await;
        inner.idle.hide().await;
        self.update_status(|st| *st = SessionStatus::default());
        self.set_phase(Phase::Idle);
    }

    /// Watchdog entry point: the process behind `session_id` is gone.
    pub async fn on_process_exit(&self, session_id: u64) {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.session.as_ref() else {
            return;
        };
        if session.id != session_id || session.process.is_alive() {
            return;
        }
        let ended = if session.channel.reached_eof() {
            info!(session = session_id, title = %session.title, "playback finished");
            self.teardown(&mut inner, Lifecycle::Terminated).await;
            EndReason::Finished
        } else {
            let status = session.process.exit_status();
            warn!(session = session_id, pid = session.process.pid(), ?status, "player exited unexpectedly");
            self.teardown(&mut inner, Lifecycle::Crashed).await;
            EndReason::Crashed
        };
        self.enter_idle(&mut inner, Some(ended));
    }

    // ------------------------- Control -------------------------

    pub async fn control(&self, cmd: ControlCommand) -> Result<Reply, SessionError> {
        if let ControlCommand::SetLoop(on) = cmd {
            return self.set_loop(on).await;
        }
        let ch = self.channel()?;
        let reply = ch.send(&cmd).await?;
        match cmd {
            ControlCommand::TogglePause => self.update_status(|st| st.paused = !st.paused),
            ControlCommand::Pause => self.update_status(|st| st.paused = true),
            ControlCommand::Resume => self.update_status(|st| st.paused = false),
            _ => {}
        }
        Ok(reply)
    }

    /// Loop mode applies to later sessions too, so it succeeds while idle.
    pub async fn set_loop(&self, on: bool) -> Result<Reply, SessionError> {
        self.looping.store(on, Ordering::SeqCst);
        self.update_status(|st| st.looping = on);
        match self.channel() {
            Ok(ch) => Ok(ch.send(&ControlCommand::SetLoop(on)).await?),
            Err(_) => Ok(Reply::Sent),
        }
    }

    /// Snapshot plus live player properties when a channel is attached.
    pub async fn status(&self) -> SessionStatus {
        let mut st = self.lock_status().clone();
        if let Ok(ch) = self.channel() {
            st.position = number(ch.get_property("time-pos").await);
            st.duration = number(ch.get_property("duration").await);
            st.volume = number(ch.get_property("volume").await);
            if let Ok(Value::Bool(p)) = ch.get_property("pause").await {
                st.paused = p;
            }
        }
        st
    }

    fn channel(&self) -> Result<Arc<ChannelHandle>, SessionError> {
        let active = self.probe().ok_or(SessionError::NoSession)?;
        active
            .channel
            .upgrade()
            .ok_or_else(|| ChannelError::Unavailable("session ended".into()).into())
    }

    // ------------------------- Transitions -------------------------

    async fn start(&self, ticket: u64, req: Request) -> Result<SessionStatus, SessionError> {
        let mut inner = self.inner.lock().await;
        if self.is_stale(ticket) {
            debug!(ticket, "request superseded before it started");
            return Err(SessionError::Superseded);
        }
        if self.teardown(&mut inner, Lifecycle::Stopping).await {
            info!("previous session superseded");
        }

        let resolved;
        let (target, kind, title, source) = match &req {
            Request::Remote { url } => {
                self.set_phase(Phase::Resolving);
                let outcome = tokio::select! {
                    r = self.resolver.resolve_default(url) => Some(r),
                    () = self.superseded(ticket) => None,
                };
                match outcome {
                    None => {
                        self.set_phase(Phase::Idle);
                        return Err(SessionError::Superseded);
                    }
                    Some(Err(e)) => {
                        warn!(%url, "resolve failed: {e}");
                        self.enter_idle(&mut inner, None);
                        return Err(e.into());
                    }
                    Some(Ok(r)) => resolved = r,
                }
                (Target::Remote(&resolved), SessionKind::Remote, resolved.title.clone(), Some(url.clone()))
            }
            Request::Local { path, class } => {
                let target = if *class == MediaClass::Image { Target::Image(path) } else { Target::File(path) };
                let title = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
                (target, SessionKind::Local, title, Some(path.display().to_string()))
            }
            Request::Monitor { port } => (
                Target::Monitor { port: *port },
                SessionKind::Monitor,
                format!("Monitor UDP:{port}"),
                None,
            ),
        };

        self.set_phase(Phase::Starting);
        inner.idle.hide().await;
        self.supervisor.kill_all_by_name(&self.cfg.player.sweep).await;

        let argv = self.args.session(&target, self.is_looping());
        let record = match self.supervisor.spawn(&argv, &[], IoPolicy::Discard) {
            Ok(r) => {
                debug!(pid = r.pid(), argv = ?r.argv(), "player command line");
                Arc::new(r)
            }
            Err(e) => {
                warn!("player spawn failed: {e}");
                self.enter_idle(&mut inner, None);
                return Err(e.into());
            }
        };

        let attached = tokio::select! {
            r = self.attach(&record) => Some(r),
            () = self.superseded(ticket) => None,
        };
        let channel = match attached {
            Some(Ok(ch)) if record.is_alive() => ch,
            Some(Ok(_)) => {
                self.abandon(&mut inner, &record).await;
                return Err(SpawnError::ExitedEarly(record.program().to_string()).into());
            }
            Some(Err(e)) => {
                warn!(pid = record.pid(), "player startup failed: {e}");
                self.abandon(&mut inner, &record).await;
                return Err(e);
            }
            None => {
                self.supervisor.terminate(&record, self.supervisor.graceful()).await;
                self.set_phase(Phase::Idle);
                return Err(SessionError::Superseded);
            }
        };

        record.mark_running();
        let session = Session {
            id: inner.next_session_id,
            kind,
            source_ref: source,
            title,
            started_at: chrono::Utc::now(),
            lifecycle: Lifecycle::Active,
            process: record,
            channel: Arc::new(channel),
        };
        inner.next_session_id += 1;
        info!(session = session.id, kind = ?session.kind, title = %session.title, pid = session.process.pid(), "session active");

        let looping = self.is_looping();
        let st = SessionStatus {
            looping,
            ..SessionStatus::of(&session)
        };
        *self.lock_active() = Some(session.active_ref());
        inner.session = Some(session);
        self.update_status(|s| *s = st.clone());
        self.set_phase(Phase::Active);
        Ok(st)
    }

    /// Attach within the startup grace period, failing early if the player dies.
    async fn attach(&self, record: &ProcessRecord) -> Result<ChannelHandle, SessionError> {
        let path = self.args.ipc_socket();
        let grace = self.cfg.player.startup_grace();
        let attempt = async {
            tokio::select! {
                r = channel::attach(&path, &self.cfg.channel) => r.map_err(SessionError::from),
                () = record.wait_exit() => Err(SpawnError::ExitedEarly(record.program().to_string()).into()),
            }
        };
        match timeout(grace, attempt).await {
            Ok(r) => r,
            Err(_) => Err(ChannelError::Unavailable(format!(
                "{}: not attached within {grace:?}",
                path.display()
            ))
            .into()),
        }
    }

    async fn abandon(&self, inner: &mut Inner, record: &ProcessRecord) {
        self.supervisor.terminate(record, self.supervisor.graceful()).await;
        self.enter_idle(inner, None);
    }

    /// Active → Stopping → terminated. Returns whether there was a session.
    async fn teardown(&self, inner: &mut Inner, why: Lifecycle) -> bool {
        let Some(mut session) = inner.session.take() else {
            return false;
        };
        session.lifecycle = why;
        self.set_phase(Phase::Stopping);
        *self.lock_active() = None;
        debug!(session = session.id, lifecycle = ?session.lifecycle, "tearing down");
        self.supervisor.terminate(&session.process, self.supervisor.graceful()).await;
        session.lifecycle = Lifecycle::Terminated;
        info!(session = session.id, "session terminated");
        true
    }

    fn enter_idle(&self, inner: &mut Inner, ended: Option<EndReason>) {
        inner.idle.show();
        let looping = self.is_looping();
        let idle_shown = inner.idle.is_shown();
        self.update_status(|st| {
            *st = SessionStatus {
                looping,
                idle_shown,
                ended,
                ..SessionStatus::default()
            };
        });
        self.set_phase(Phase::Idle);
    }

    fn set_phase(&self, phase: Phase) {
        let prev = self.phase_tx.send_replace(phase);
        if prev != phase {
            debug!(from = ?prev, to = ?phase, "phase");
            self.update_status(|st| st.phase = phase);
        }
    }

    // ------------------------- Tickets -------------------------

    fn take_ticket(&self) -> u64 {
        let mut t = 0;
        self.ticket_tx.send_modify(|v| {
            *v += 1;
            t = *v;
        });
        t
    }

    fn is_stale(&self, ticket: u64) -> bool {
        *self.ticket_tx.borrow() != ticket
    }

    async fn superseded(&self, ticket: u64) {
        let mut rx = self.ticket_tx.subscribe();
        if rx.wait_for(|v| *v != ticket).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    // ------------------------- Helpers -------------------------

    fn check_local(&self, raw: &str) -> Result<(PathBuf, MediaClass), SessionError> {
        let media_dir = PathBuf::from(config::expand(&self.cfg.library.media_dir));
        let p = Path::new(raw);
        let p = if p.is_absolute() { p.to_path_buf() } else { media_dir.join(p) };
        if !p.exists() {
            return Err(SessionError::NotFound(raw.to_string()));
        }
        let root = media_dir
            .canonicalize()
            .map_err(|e| SessionError::InvalidRequest(format!("media dir {}: {e}", media_dir.display())))?;
        let resolved = p
            .canonicalize()
            .map_err(|e| SessionError::InvalidRequest(format!("{raw}: {e}")))?;
        if !resolved.starts_with(&root) || !resolved.is_file() {
            return Err(SessionError::InvalidRequest(format!("{raw}: not a file in the media library")));
        }
        let class = session::classify(&resolved)
            .ok_or_else(|| SessionError::InvalidRequest(format!("{raw}: unsupported file type")))?;
        Ok((resolved, class))
    }

    fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        let snapshot = {
            let mut st = self.lock_status();
            f(&mut st);
            st.clone()
        };
        if let Err(e) = self.writer.write(&snapshot) {
            debug!("status write failed: {e:#}");
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRef>> {
        self.active.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn number(v: Result<Value, ChannelError>) -> Option<f64> {
    v.ok().and_then(|v| v.as_f64())
}
