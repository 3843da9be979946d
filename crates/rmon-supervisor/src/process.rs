//! ---
//! rmon_section: "02-process-supervision"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Ownership wrapper around one supervised OS process."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rmon_common::CommandConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Result, SupervisorError, OUTPUT_SETTLE};

/// Captured lines kept per process for crash diagnostics.
const OUTPUT_LINES: usize = 50;

type OutputRing = Arc<Mutex<VecDeque<String>>>;

/// A running (or exited) child process owned by the supervisor.
///
/// Captured stdout/stderr are drained continuously into a bounded ring so the
/// child can never block on a full pipe. Dropping the handle kills the child.
pub struct ProcessHandle {
    service: String,
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
    output: OutputRing,
    drains: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    spawned_at: Instant,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("service", &self.service)
            .field("pid", &self.pid)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Launch the configured command for `service`.
    pub fn spawn(service: &str, command: &CommandConfig) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        if command.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            service: service.to_owned(),
            program: command.program.clone(),
            source,
        })?;

        let output: OutputRing = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_LINES)));
        let cancel = CancellationToken::new();
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain(stdout, "stdout", output.clone(), cancel.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_drain(stderr, "stderr", output.clone(), cancel.clone()));
        }

        let pid = child.id();
        debug!(target: "rmon::supervisor", service, ?pid, program = %command.program, "process spawned");
        Ok(Self {
            service: service.to_owned(),
            child,
            pid,
            exit: None,
            output,
            drains,
            cancel,
            spawned_at: Instant::now(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Time since the process was launched.
    pub fn age(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// Non-blocking liveness check. Records the exit status once observed.
    pub fn poll_alive(&mut self) -> Result<bool> {
        if self.exit.is_some() {
            return Ok(false);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status);
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(source) => Err(SupervisorError::Process {
                service: self.service.clone(),
                source,
            }),
        }
    }

    /// Exit code, if the process has exited normally. `None` while running or
    /// when it was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|status| status.code())
    }

    pub fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// Request graceful termination (SIGTERM on Unix).
    pub fn terminate(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.pid else {
                return Ok(());
            };
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(err) => Err(SupervisorError::Signal {
                    pid,
                    reason: err.to_string(),
                }),
            }
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|source| SupervisorError::Process {
                    service: self.service.clone(),
                    source,
                })
        }
    }

    /// Terminate, wait up to `grace`, then kill if the process is still alive.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<Option<i32>> {
        if !self.poll_alive()? {
            self.cancel.cancel();
            return Ok(self.exit_code());
        }
        self.terminate()?;
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => self.exit = Some(status),
            Ok(Err(source)) => {
                return Err(SupervisorError::Process {
                    service: self.service.clone(),
                    source,
                })
            }
            Err(_) => {
                warn!(
                    target: "rmon::supervisor",
                    service = %self.service,
                    pid = ?self.pid,
                    grace_secs = grace.as_secs_f64(),
                    "process ignored termination; killing",
                );
                self.child
                    .kill()
                    .await
                    .map_err(|source| SupervisorError::Process {
                        service: self.service.clone(),
                        source,
                    })?;
                self.exit = self.child.try_wait().ok().flatten();
            }
        }
        self.cancel.cancel();
        Ok(self.exit_code())
    }

    /// Recent captured output, oldest first. Waits briefly for the drain tasks
    /// to reach end of stream so the last lines of an exited process are kept.
    pub async fn diagnostics(&mut self) -> String {
        for mut drain in self.drains.drain(..) {
            if timeout(OUTPUT_SETTLE, &mut drain).await.is_err() {
                drain.abort();
            }
        }
        self.cancel.cancel();
        self.recent_output()
    }

    /// Captured output so far, without waiting on the drains.
    pub fn recent_output(&self) -> String {
        let lines = self.output.lock();
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_drain<R>(
    stream: R,
    label: &'static str,
    ring: OutputRing,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => push_line(&ring, format!("[{label}] {line}")),
                    Ok(None) => break,
                    Err(err) => {
                        debug!(target: "rmon::supervisor", stream = label, error = %err, "output drain stopped");
                        break;
                    }
                },
            }
        }
    })
}

fn push_line(ring: &OutputRing, line: String) {
    let mut lines = ring.lock();
    if lines.len() == OUTPUT_LINES {
        lines.pop_front();
    }
    lines.push_back(line);
}
