//! Process supervision for the external helpers (player, extractor, idle image).
//!
//! - Each spawned process is owned by one [`ProcessRecord`]; dropping it kills the child.
//! - `terminate` sends SIGTERM, waits a bounded grace period, then SIGKILLs.
//!   Records spawned with `spawn_group` are signalled as a whole process group,
//!   so helpers the child forked die with it.
//! - `kill_all_by_name` is the defensive sweep for leftovers of a previous run.
//!   It is never the primary termination path.

use crate::error::SpawnError;
use nix::{
    sys::signal::{kill, killpg, Signal},
    unistd::Pid,
};
use std::{
    fs,
    process::{ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::{
    process::{ChildStderr, ChildStdout, Command},
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};

const POLL_EVERY: Duration = Duration::from_millis(25);
const KILL_REAP: Duration = Duration::from_millis(500);
const SWEEP_SETTLE: Duration = Duration::from_millis(300);
// Linux truncates /proc/<pid>/comm to 15 bytes.
const COMM_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPolicy {
    /// stdin/stdout/stderr all go to /dev/null.
    Discard,
    /// stdout and stderr are piped for the caller to read.
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// SIGTERM, then SIGKILL if still alive after the grace period.
    Graceful(Duration),
    /// SIGKILL straight away.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Terminated,
}

#[derive(Debug)]
struct Slot {
    child: tokio::process::Child,
    state: ProcessState,
    status: Option<ExitStatus>,
}

/// The supervisor's view of one spawned process.
#[derive(Debug)]
pub struct ProcessRecord {
    pid: u32,
    argv: Vec<String>,
    slot: Mutex<Slot>,
    exit_observed: AtomicBool,
    group: bool,
}

impl ProcessRecord {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    pub fn exit_observed(&self) -> bool {
        self.exit_observed.load(Ordering::SeqCst)
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.lock().status
    }

    pub fn mark_running(&self) {
        let mut slot = self.lock();
        if slot.state == ProcessState::Starting {
            slot.state = ProcessState::Running;
        }
    }

    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.lock().child.stdout.take()
    }

    pub fn take_stderr(&self) -> Option<ChildStderr> {
        self.lock().child.stderr.take()
    }

    /// Non-blocking; reaps the child the first time it is seen dead.
    pub fn is_alive(&self) -> bool {
        if self.exit_observed() {
            return false;
        }
        let mut slot = self.lock();
        match slot.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                slot.status = Some(status);
                slot.state = ProcessState::Terminated;
                self.exit_observed.store(true, Ordering::SeqCst);
                debug!(pid = self.pid, %status, "process exited");
                false
            }
            Err(e) => {
                warn!(pid = self.pid, "try_wait failed: {e}");
                slot.state = ProcessState::Terminated;
                self.exit_observed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Polls until the process is gone. Cancel-safe.
    pub async fn wait_exit(&self) {
        while self.is_alive() {
            sleep(POLL_EVERY).await;
        }
    }

    /// Returns true if the process exited within `limit`.
    pub async fn wait_exit_within(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_EVERY).await;
        }
    }

    fn raw_pid(&self) -> Pid {
        Pid::from_raw(i32::try_from(self.pid).unwrap_or(i32::MAX))
    }

    fn signal(&self, sig: Signal) -> nix::Result<()> {
        if self.group {
            killpg(self.raw_pid(), sig)
        } else {
            kill(self.raw_pid(), sig)
        }
    }

    fn force_kill(&self) {
        {
            let mut slot = self.lock();
            if let Err(e) = slot.child.start_kill() {
                debug!(pid = self.pid, "start_kill: {e}");
            }
        }
        self.kill_group();
    }

    /// SIGKILLs whatever is left in the process group, even after the leader exited.
    fn kill_group(&self) {
        if !self.group {
            return;
        }
        match killpg(self.raw_pid(), Signal::SIGKILL) {
            Ok(()) => debug!(pgid = self.pid, "process group killed"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(pgid = self.pid, "killpg failed: {e}"),
        }
    }

    fn mark_terminated(&self) {
        self.lock().state = ProcessState::Terminated;
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A poisoned slot still holds a valid Child handle.
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// kill_on_drop only reaches the leader
impl Drop for ProcessRecord {
    fn drop(&mut self) {
        self.kill_group();
    }
}

/// SIGKILLs the process on drop unless disarmed; covers cancelled terminations.
struct KillGuard<'a> {
    record: &'a ProcessRecord,
    armed: bool,
}

impl<'a> KillGuard<'a> {
    fn new(record: &'a ProcessRecord) -> Self {
        Self { record, armed: true }
    }
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for KillGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(pid = self.record.pid, "termination interrupted, forcing kill");
            self.record.force_kill();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }

    /// The escalation used for ordinary stops.
    pub fn graceful(&self) -> Escalation {
        Escalation::Graceful(self.stop_grace)
    }

    pub fn spawn(&self, argv: &[String], env: &[(String, String)], io: IoPolicy) -> Result<ProcessRecord, SpawnError> {
        self.launch(argv, env, io, false)
    }

    /// Like `spawn`, but the child leads a new process group that `terminate` signals as a whole.
    pub fn spawn_group(
        &self,
        argv: &[String],
        env: &[(String, String)],
        io: IoPolicy,
    ) -> Result<ProcessRecord, SpawnError> {
        self.launch(argv, env, io, true)
    }

    fn launch(&self, argv: &[String], env: &[(String, String)], io: IoPolicy, group: bool) -> Result<ProcessRecord, SpawnError> {
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyArgv)?;
        let out = || match io {
            IoPolicy::Discard => Stdio::null(),
            IoPolicy::Capture => Stdio::piped(),
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(out())
            .stderr(out())
            .kill_on_drop(true);
        if group {
            cmd.process_group(0);
        }
        let child = cmd.spawn().map_err(|e| SpawnError::from_io(program, e))?;
        let pid = child.id().ok_or_else(|| SpawnError::ExitedEarly(program.clone()))?;
        info!(pid, program = %program, group, "spawned");
        Ok(ProcessRecord {
            pid,
            argv: argv.to_vec(),
            slot: Mutex::new(Slot {
                child,
                state: ProcessState::Starting,
                status: None,
            }),
            exit_observed: AtomicBool::new(false),
            group,
        })
    }

    pub fn is_alive(&self, record: &ProcessRecord) -> bool {
        record.is_alive()
    }

    /// Idempotent: an already-dead process is a no-op, apart from clearing
    /// leftovers of its process group.
    pub async fn terminate(&self, record: &ProcessRecord, escalation: Escalation) {
        if !record.is_alive() {
            record.kill_group();
            record.mark_terminated();
            return;
        }
        let guard = KillGuard::new(record);
        if let Escalation::Graceful(grace) = escalation {
            match record.signal(Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(pid = record.pid, "SIGTERM failed: {e}"),
            }
            if record.wait_exit_within(grace).await {
                guard.disarm();
                record.kill_group();
                record.mark_terminated();
                info!(pid = record.pid, "terminated");
                return;
            }
            warn!(pid = record.pid, ?grace, "still alive after grace period, escalating to SIGKILL");
        }
        record.force_kill();
        if !record.wait_exit_within(KILL_REAP).await {
            warn!(pid = record.pid, "not reaped after SIGKILL");
        }
        guard.disarm();
        record.mark_terminated();
        info!(pid = record.pid, "killed");
    }

    /// Best-effort SIGKILL of every process whose executable name matches.
    /// Never fails; returns how many processes were signalled.
    pub async fn kill_all_by_name<S: AsRef<str>>(&self, names: &[S]) -> usize {
        if names.is_empty() {
            return 0;
        }
        let pids = pids_by_name(names);
        if pids.is_empty() {
            debug!("sweep: nothing to kill");
            return 0;
        }
        let mut killed = 0;
        for (pid, comm) in pids {
            match kill(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) => {
                    info!(pid, name = %comm, "sweep: killed leftover process");
                    killed += 1;
                }
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(pid, name = %comm, "sweep: kill failed: {e}"),
            }
        }
        if killed > 0 {
            sleep(SWEEP_SETTLE).await;
        }
        killed
    }
}

fn comm_matches(comm: &str, name: &str) -> bool {
    let name = name.rsplit('/').next().unwrap_or(name);
    let short: String = name.chars().take(COMM_LEN).collect();
    comm == short
}

/// Processes (excluding ourselves) whose `/proc/<pid>/comm` matches one of `names`.
pub fn pids_by_name<S: AsRef<str>>(names: &[S]) -> Vec<(i32, String)> {
    let me = i32::try_from(std::process::id()).unwrap_or(-1);
    let Ok(entries) = fs::read_dir("/proc") else {
        return vec![];
    };
    let mut out = vec![];
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if pid == me {
            continue;
        }
        let Ok(comm) = fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        let comm = comm.trim_end();
        if names.iter().any(|n| comm_matches(comm, n.as_ref())) {
            out.push((pid, comm.to_string()));
        }
    }
    out
}
