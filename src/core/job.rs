use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use super::cmd::{Cmd, CmdEvent, CmdExit, ExitKind};
use super::format::FormatRequest;
use super::{DiskError, JobFailure};
use crate::utils::strip_ansi;

/// Lifecycle of the supervisor's current job. Terminal states stay put until
/// the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed(JobFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobFailure),
}

/// What the consumer of a supervisor gets told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Starting,
    Started,
    Output(String),
    Finished(JobOutcome),
}

/// Which navigation controls the front end should offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affordances {
    pub next_enabled: bool,
    pub back_enabled: bool,
    pub busy: bool,
}

impl Affordances {
    const IDLE: Self = Self {
        next_enabled: true,
        back_enabled: false,
        busy: false,
    };
    const STARTING: Self = Self {
        next_enabled: false,
        back_enabled: false,
        busy: true,
    };
    const RUNNING: Self = Self {
        next_enabled: false,
        back_enabled: true,
        busy: true,
    };
    const DONE: Self = Self {
        next_enabled: true,
        back_enabled: true,
        busy: false,
    };
}

/// One helper invocation and the wiring that listens to it
struct FormatJob {
    request: FormatRequest,
    cmd: Cmd,
    events: UnboundedReceiver<CmdEvent>,
}

/// Runs at most one format job at a time and turns process events into
/// `JobUpdate`s for the front end
pub struct JobSupervisor {
    state: JobState,
    job: Option<FormatJob>,
    affordances: Affordances,
    pending: Vec<JobUpdate>,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            job: None,
            affordances: Affordances::IDLE,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, JobState::Starting | JobState::Running)
    }

    pub fn affordances(&self) -> Affordances {
        self.affordances
    }

    /// How the most recent job ended, if it has
    pub fn last_outcome(&self) -> Option<JobOutcome> {
        match &self.state {
            JobState::Succeeded => Some(JobOutcome::Succeeded),
            JobState::Failed(failure) => Some(JobOutcome::Failed(failure.clone())),
            _ => None,
        }
    }

    /// The request of the job in flight
    pub fn request(&self) -> Option<&FormatRequest> {
        self.job.as_ref().map(|job| &job.request)
    }

    /// Starts the helper for `request`.
    ///
    /// Rejected with `DiskError::JobBusy` while another job is starting or
    /// running; the in-flight job is left untouched.
    pub fn submit(&mut self, request: FormatRequest) -> Result<(), DiskError> {
        if self.is_active() {
            tracing::warn!(device = %request.device, "Format job already in progress, rejecting");
            return Err(DiskError::JobBusy);
        }

        tracing::info!("Executing format command: {}", request.command_line());

        self.state = JobState::Starting;
        self.affordances = Affordances::STARTING;
        self.pending.push(JobUpdate::Starting);

        let mut cmd = Cmd::new();
        let events = cmd.subscribe();
        let started = cmd.start(&request.program(), &request.args(), true);

        self.job = Some(FormatJob {
            request,
            cmd,
            events,
        });

        if let Err(e) = started {
            tracing::error!("Failed to start formatting helper: {e}");
            let update = self.finish(JobOutcome::Failed(JobFailure::Spawn(e.to_string())));
            self.pending.push(update);
        }

        Ok(())
    }

    /// Drains everything that happened since the last call without blocking
    pub fn poll(&mut self) -> Vec<JobUpdate> {
        let mut updates = std::mem::take(&mut self.pending);

        loop {
            let received = match self.job.as_mut() {
                Some(job) => job.events.try_recv(),
                None => break,
            };
            match received {
                Ok(event) => updates.extend(self.handle(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    updates.push(self.finish(JobOutcome::Failed(JobFailure::Crashed {
                        detail: "lost connection to helper process".to_string(),
                    })));
                    break;
                }
            }
        }

        updates
    }

    /// Waits for the next update; `None` once there is no job and nothing pending
    #[cfg(test)]
    pub async fn next_update(&mut self) -> Option<JobUpdate> {
        if !self.pending.is_empty() {
            return Some(self.pending.remove(0));
        }

        loop {
            let event = self.job.as_mut()?.events.recv().await;
            match event {
                Some(event) => {
                    if let Some(update) = self.handle(event) {
                        return Some(update);
                    }
                }
                None => {
                    return Some(self.finish(JobOutcome::Failed(JobFailure::Crashed {
                        detail: "lost connection to helper process".to_string(),
                    })));
                }
            }
        }
    }

    /// Forcibly stops a starting or running job and reports it as cancelled.
    /// Returns `None` when there was nothing to cancel.
    pub async fn cancel(&mut self) -> Option<JobOutcome> {
        if !self.is_active() {
            return None;
        }

        if let Some(job) = self.job.as_mut() {
            tracing::warn!(device = %job.request.device, "Cancelling format job");
            job.cmd.halt().await;
        }

        let update = self.finish(JobOutcome::Failed(JobFailure::Cancelled));
        self.pending.push(update);
        self.last_outcome()
    }

    fn handle(&mut self, event: CmdEvent) -> Option<JobUpdate> {
        match event {
            CmdEvent::Started => {
                self.state = JobState::Running;
                self.affordances = Affordances::RUNNING;
                Some(JobUpdate::Started)
            }
            CmdEvent::Output { line, .. } => Some(JobUpdate::Output(strip_ansi(&line))),
            CmdEvent::Finished(exit) => {
                let outcome = self.classify(exit);
                Some(self.finish(outcome))
            }
        }
    }

    fn classify(&self, exit: CmdExit) -> JobOutcome {
        if exit.success() {
            return JobOutcome::Succeeded;
        }

        let detail = self
            .job
            .as_ref()
            .map(|job| job.cmd.stderr_out())
            .unwrap_or_default();

        match (exit.kind, exit.code) {
            (ExitKind::Normal, Some(code)) => JobOutcome::Failed(JobFailure::Exit { code, detail }),
            _ => JobOutcome::Failed(JobFailure::Crashed { detail }),
        }
    }

    /// Records the terminal state and detaches the job
    fn finish(&mut self, outcome: JobOutcome) -> JobUpdate {
        self.state = match &outcome {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed(failure) => JobState::Failed(failure.clone()),
        };

        match &self.state {
            JobState::Failed(failure) => {
                tracing::error!(detail = failure.detail(), "Format job failed: {failure}")
            }
            _ => tracing::info!("Format job succeeded"),
        }

        if let Some(mut job) = self.job.take() {
            tracing::debug!(output = %job.cmd.cmd_out(), "Helper output");
            job.cmd.disconnect();
        }

        self.affordances = Affordances::DONE;

        JobUpdate::Finished(outcome)
    }
}

impl Default for JobSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
