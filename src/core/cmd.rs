use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};

use super::DiskError;

/// Time a terminated process gets to exit before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// Time allowed to reap a killed process
const KILL_REAP: Duration = Duration::from_secs(1);
/// Pipes can outlive the child when it leaves grandchildren behind.
/// After a halt the drain also has to end within `TERMINATE_GRACE`.
const READER_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Normal,
    Crashed,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdExit {
    pub code: Option<i32>,
    pub kind: ExitKind,
}

impl CmdExit {
    pub fn success(&self) -> bool {
        self.kind == ExitKind::Normal && self.code == Some(0)
    }

    fn crashed() -> Self {
        Self {
            code: None,
            kind: ExitKind::Crashed,
        }
    }

    fn from_status(status: io::Result<ExitStatus>) -> Self {
        match status.map(|s| s.code()) {
            Ok(Some(code)) => Self {
                code: Some(code),
                kind: ExitKind::Normal,
            },
            // No code means the process was killed by a signal
            Ok(None) | Err(_) => Self::crashed(),
        }
    }
}

/// Notifications delivered to whoever subscribed to a `Cmd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdEvent {
    Started,
    Output { stream: Stream, line: String },
    Finished(CmdExit),
}

#[derive(Debug, Default)]
struct Captured {
    lines: Vec<String>,
    stderr: Vec<String>,
}

struct InFlight {
    halt_tx: Option<oneshot::Sender<()>>,
    waiter: JoinHandle<CmdExit>,
}

/// Runs one external process at a time and captures its output line by line
pub struct Cmd {
    captured: Arc<Mutex<Captured>>,
    listener: Option<UnboundedSender<CmdEvent>>,
    in_flight: Option<InFlight>,
}

impl Cmd {
    pub fn new() -> Self {
        Self {
            captured: Arc::new(Mutex::new(Captured::default())),
            listener: None,
            in_flight: None,
        }
    }

    /// Registers a new listener and returns its receiving end.
    /// Replaces any previous listener for processes started afterwards.
    pub fn subscribe(&mut self) -> UnboundedReceiver<CmdEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listener = Some(tx);
        rx
    }

    pub fn disconnect(&mut self) {
        self.listener = None;
    }

    pub fn is_running(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|flight| !flight.waiter.is_finished())
    }

    /// Spawns the process without waiting for it.
    ///
    /// Fails with `DiskError::AlreadyRunning` when a previous process on this
    /// runner has not exited yet; nothing is spawned in that case.
    pub fn start(&mut self, program: &str, args: &[String], quiet: bool) -> Result<(), DiskError> {
        if self.is_running() {
            tracing::debug!(program, "Process already running, refusing to start another");
            return Err(DiskError::AlreadyRunning);
        }

        {
            let mut captured = lock(&self.captured);
            captured.lines.clear();
            captured.stderr.clear();
        }

        if !quiet {
            tracing::info!("{}", command_line(program, args));
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        self.emit(CmdEvent::Started);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr, Stream::Stderr));
        }

        let (halt_tx, halt_rx) = oneshot::channel();
        let waiter = tokio::spawn(supervise(child, readers, halt_rx, self.listener.clone()));

        self.in_flight = Some(InFlight {
            halt_tx: Some(halt_tx),
            waiter,
        });

        Ok(())
    }

    /// Waits for the current process to exit. Returns `None` if nothing was started.
    pub async fn wait(&mut self) -> Option<CmdExit> {
        let flight = self.in_flight.take()?;
        Some(flight.waiter.await.unwrap_or_else(|_| CmdExit::crashed()))
    }

    /// Runs the process to completion; true iff it exited normally with code 0
    pub async fn run(&mut self, program: &str, args: &[String], quiet: bool) -> bool {
        if let Err(e) = self.start(program, args, quiet) {
            tracing::debug!(program, "Failed to run: {e}");
            return false;
        }
        self.wait().await.is_some_and(|exit| exit.success())
    }

    /// Terminates the running process, killing it if it ignores the request.
    ///
    /// No-op (returns `None`) when nothing is in flight.
    pub async fn halt(&mut self) -> Option<CmdExit> {
        let flight = self.in_flight.as_mut()?;
        if let Some(halt_tx) = flight.halt_tx.take() {
            // The waiter may already be done, in which case nobody is listening
            let _ = halt_tx.send(());
        }
        self.wait().await
    }

    /// Everything captured from stdout and stderr, in arrival order
    pub fn cmd_out(&self) -> String {
        lock(&self.captured).lines.join("\n").trim().to_string()
    }

    pub fn stderr_out(&self) -> String {
        lock(&self.captured).stderr.join("\n").trim().to_string()
    }

    fn emit(&self, event: CmdEvent) {
        if let Some(tx) = &self.listener {
            let _ = tx.send(event);
        }
    }

    fn spawn_reader<R>(&self, pipe: R, stream: Stream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = self.captured.clone();
        let listener = self.listener.clone();

        let deliver = move |bytes: &[u8]| {
            let line = String::from_utf8_lossy(bytes).to_string();
            if line.is_empty() {
                return;
            }

            {
                let mut captured = lock(&captured);
                captured.lines.push(line.clone());
                if stream == Stream::Stderr {
                    captured.stderr.push(line.clone());
                }
            }

            if let Some(tx) = &listener {
                let _ = tx.send(CmdEvent::Output { stream, line });
            }
        };

        tokio::spawn(async move {
            let mut pipe = pipe;
            let mut chunk = [0u8; 4096];
            let mut pending = Vec::new();
            loop {
                let read = match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                pending.extend_from_slice(&chunk[..read]);

                // Progress meters redraw with '\r', so it ends a line too
                while let Some(end) = pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
                    let line: Vec<u8> = pending.drain(..=end).collect();
                    deliver(&line[..end]);
                }
            }
            deliver(&pending);
        })
    }
}

impl Default for Cmd {
    fn default() -> Self {
        Self::new()
    }
}

async fn supervise(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    halt_rx: oneshot::Receiver<()>,
    listener: Option<UnboundedSender<CmdEvent>>,
) -> CmdExit {
    let (exit, drain_until) = tokio::select! {
        status = child.wait() => (CmdExit::from_status(status), Instant::now() + READER_DRAIN),
        Ok(()) = halt_rx => {
            let halted_at = Instant::now();
            let exit = terminate(&mut child).await;
            (exit, (Instant::now() + READER_DRAIN).min(halted_at + TERMINATE_GRACE))
        }
    };

    // One shared deadline for all readers
    for mut reader in readers {
        if timeout_at(drain_until, &mut reader).await.is_err() {
            reader.abort();
        }
    }

    tracing::debug!(code = ?exit.code, kind = ?exit.kind, "Process finished");

    if let Some(tx) = &listener {
        let _ = tx.send(CmdEvent::Finished(exit));
    }

    exit
}

async fn terminate(child: &mut Child) -> CmdExit {
    if let Some(pid) = child.id() {
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {}
            Err(nix::Error::EPERM) => {
                tracing::warn!(pid, "Permission denied sending SIGTERM, process runs as another user")
            }
            Err(e) => tracing::warn!(pid, "Failed to send SIGTERM: {e}"),
        }
        if let Ok(status) = timeout(TERMINATE_GRACE, child.wait()).await {
            return CmdExit::from_status(status);
        }
        tracing::warn!(pid, "Process ignored SIGTERM, killing it");
    }

    let _ = child.start_kill();
    match timeout(KILL_REAP, child.wait()).await {
        Ok(status) => CmdExit::from_status(status),
        Err(_) => CmdExit::crashed(),
    }
}

fn lock(captured: &Mutex<Captured>) -> MutexGuard<'_, Captured> {
    captured.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Quotes each argument for display in logs
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push_str(" \"");
        line.push_str(&arg.replace('"', "\\\""));
        line.push('"');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_run_collects_output_in_order() {
        let mut cmd = Cmd::new();
        let ok = cmd.run("/bin/sh", &sh("printf 'one\\n\\ntwo\\nthree\\n'"), true).await;

        assert!(ok);
        assert_eq!(cmd.cmd_out(), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn test_run_reports_failure_on_nonzero_exit() {
        let mut cmd = Cmd::new();
        assert!(!cmd.run("/bin/sh", &sh("exit 1"), true).await);

        cmd.start("/bin/sh", &sh("exit 1"), true).unwrap();
        assert_eq!(
            cmd.wait().await,
            Some(CmdExit {
                code: Some(1),
                kind: ExitKind::Normal
            })
        );
    }

    #[tokio::test]
    async fn test_run_fails_when_program_is_missing() {
        let mut cmd = Cmd::new();
        assert!(!cmd.run("/nonexistent/formatusb-test", &[], true).await);
    }

    #[tokio::test]
    async fn test_stderr_is_kept_separately() {
        let mut cmd = Cmd::new();
        let ok = cmd
            .run("/bin/sh", &sh("echo out; echo 'bad things' >&2; exit 3"), true)
            .await;

        assert!(!ok);
        assert_eq!(cmd.stderr_out(), "bad things");
        assert!(cmd.cmd_out().contains("out"));
    }

    #[tokio::test]
    async fn test_each_run_starts_with_empty_buffer() {
        let mut cmd = Cmd::new();
        assert!(cmd.run("/bin/sh", &sh("echo first"), true).await);
        assert!(cmd.run("/bin/sh", &sh("echo second"), true).await);
        assert_eq!(cmd.cmd_out(), "second");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let mut cmd = Cmd::new();
        cmd.start("/bin/sh", &sh("exec sleep 30"), true).unwrap();

        assert!(matches!(
            cmd.start("/bin/sh", &sh("echo hi"), true),
            Err(DiskError::AlreadyRunning)
        ));
        assert!(!cmd.run("/bin/sh", &sh("echo hi"), true).await);
        assert!(cmd.is_running());

        cmd.halt().await;
        assert!(!cmd.is_running());
    }

    #[tokio::test]
    async fn test_halt_terminates_running_process() {
        let mut cmd = Cmd::new();
        cmd.start("/bin/sh", &sh("exec sleep 30"), true).unwrap();

        let started = Instant::now();
        let exit = cmd.halt().await.unwrap();

        assert!(!exit.success());
        assert_eq!(exit.kind, ExitKind::Crashed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_halt_kills_process_ignoring_sigterm() {
        let mut cmd = Cmd::new();
        cmd.start("/bin/sh", &sh("trap '' TERM; while :; do sleep 1; done"), true)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let exit = cmd.halt().await.unwrap();

        assert!(!exit.success());
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_halt_bound_holds_when_grandchild_keeps_pipes_open() {
        let mut cmd = Cmd::new();
        cmd.start(
            "/bin/sh",
            &sh("trap '' TERM; sleep 20 & while :; do sleep 1; done"),
            true,
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let exit = cmd.halt().await.unwrap();

        assert!(!exit.success());
        assert!(started.elapsed() <= Duration::from_secs(6));
        assert!(!cmd.is_running());
    }

    #[tokio::test]
    async fn test_carriage_return_ends_a_line() {
        let mut cmd = Cmd::new();
        let mut rx = cmd.subscribe();
        cmd.start("/bin/sh", &sh("printf ' 10%%\r 50%%\r100%%\r\ndone'"), true)
            .unwrap();
        cmd.wait().await;

        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CmdEvent::Output { line, .. } = event {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec![" 10%", " 50%", "100%", "done"]);
        assert_eq!(cmd.cmd_out(), "10%\n 50%\n100%\ndone");
    }

    #[tokio::test]
    async fn test_halt_without_process_is_noop() {
        let mut cmd = Cmd::new();
        assert_eq!(cmd.halt().await, None);

        assert!(cmd.run("/bin/sh", &sh("true"), true).await);
        assert_eq!(cmd.halt().await, None);
    }

    #[tokio::test]
    async fn test_listener_sees_started_output_finished() {
        let mut cmd = Cmd::new();
        let mut rx = cmd.subscribe();
        assert!(cmd.run("/bin/sh", &sh("echo hello"), true).await);

        assert_eq!(rx.recv().await, Some(CmdEvent::Started));
        assert_eq!(
            rx.recv().await,
            Some(CmdEvent::Output {
                stream: Stream::Stdout,
                line: "hello".to_string()
            })
        );
        assert!(matches!(rx.recv().await, Some(CmdEvent::Finished(exit)) if exit.success()));
    }

    #[test]
    fn test_command_line_quotes_each_argument() {
        let args = vec!["sdb".to_string(), "my label".to_string()];
        assert_eq!(command_line("helper", &args), "helper \"sdb\" \"my label\"");
    }
}
