use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::MigrationError;

/// Lifecycle of a single migration run. No state is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Selecting,
    ResolvingRoot,
    StagingCreated,
    Copying,
    Verifying,
    SpaceCreated,
    NodesCreated,
    Moving,
    PollingTasks,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    Select,
    RootMeta,
    CreateMigrateFolder,
    CopyFiles,
    CopyCheck,
    CreateSpace,
    CreateNodes,
    MoveDocs,
    WikiTask,
}

impl StepId {
    pub const ALL: [StepId; 9] = [
        StepId::Select,
        StepId::RootMeta,
        StepId::CreateMigrateFolder,
        StepId::CopyFiles,
        StepId::CopyCheck,
        StepId::CreateSpace,
        StepId::CreateNodes,
        StepId::MoveDocs,
        StepId::WikiTask,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::Select => "select",
            StepId::RootMeta => "root-meta",
            StepId::CreateMigrateFolder => "create-migrate-folder",
            StepId::CopyFiles => "copy-files",
            StepId::CopyCheck => "copy-check",
            StepId::CreateSpace => "create-space",
            StepId::CreateNodes => "create-nodes",
            StepId::MoveDocs => "move-docs",
            StepId::WikiTask => "wiki-task",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Active,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub current: usize,
    pub total: usize,
}

impl Counter {
    fn clamped(current: usize, total: usize) -> Self {
        Self {
            current: current.min(total),
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    pub id: StepId,
    pub state: StepState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub state: RunState,
    pub steps: Vec<StepStatus>,
    pub nodes: Counter,
    pub moves: Counter,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            state: RunState::Selecting,
            steps: StepId::ALL
                .iter()
                .map(|id| StepStatus {
                    id: *id,
                    state: StepState::Pending,
                })
                .collect(),
            nodes: Counter::default(),
            moves: Counter::default(),
        }
    }
}

impl ProgressSnapshot {
    pub fn step(&self, id: StepId) -> StepState {
        self.steps
            .iter()
            .find(|step| step.id == id)
            .map_or(StepState::Pending, |step| step.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    State(RunState),
    Step { id: StepId, state: StepState },
    Nodes(Counter),
    Moves(Counter),
    Cooldown { wait: Duration },
}

/// Per-run coordination: cancellation, step list and progress counters.
///
/// One context belongs to exactly one run; there is no process-wide state.
pub struct RunContext {
    cancel: CancellationToken,
    snapshot: Mutex<ProgressSnapshot>,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            snapshot: Mutex::new(ProgressSnapshot::default()),
            events: None,
        }
    }

    pub fn with_events(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ctx = Self::with_token(cancel);
        ctx.events = Some(tx);
        (ctx, rx)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Called immediately before every remote call.
    pub fn checkpoint(&self) -> Result<(), MigrationError> {
        if self.cancel.is_cancelled() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Waits out a rate-limit window, waking at least every `tick` to honor
    /// cancellation.
    pub async fn cooldown(&self, wait: Duration, tick: Duration) -> Result<(), MigrationError> {
        self.emit(ProgressEvent::Cooldown { wait });
        info!(wait_ms = wait.as_millis() as u64, "rate limit reached, pausing moves");
        let tick = if tick.is_zero() { wait } else { tick };
        let deadline = Instant::now() + wait;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let slice = tick.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = tokio::time::sleep(slice) => {}
            }
        }
    }

    pub async fn pause(&self, wait: Duration) -> Result<(), MigrationError> {
        self.checkpoint()?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MigrationError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    pub fn set_state(&self, state: RunState) {
        {
            let mut snapshot = self.lock();
            if snapshot.state.is_terminal() {
                return;
            }
            snapshot.state = state;
        }
        self.emit(ProgressEvent::State(state));
    }

    pub fn start_step(&self, id: StepId) {
        self.set_step(id, StepState::Active);
    }

    pub fn finish_step(&self, id: StepId) {
        self.set_step(id, StepState::Done);
    }

    pub fn nodes_progress(&self, current: usize, total: usize) {
        let counter = Counter::clamped(current, total);
        self.lock().nodes = counter;
        self.emit(ProgressEvent::Nodes(counter));
    }

    pub fn moves_progress(&self, current: usize, total: usize) {
        let counter = Counter::clamped(current, total);
        self.lock().moves = counter;
        self.emit(ProgressEvent::Moves(counter));
    }

    /// Moves the run into its terminal state according to how it ended.
    pub fn finish<T>(&self, outcome: &Result<T, MigrationError>) {
        let state = match outcome {
            Ok(_) => RunState::Done,
            Err(MigrationError::Cancelled) => RunState::Cancelled,
            Err(_) => RunState::Failed,
        };
        self.set_state(state);
    }

    fn set_step(&self, id: StepId, state: StepState) {
        {
            let mut snapshot = self.lock();
            if let Some(step) = snapshot.steps.iter_mut().find(|step| step.id == id) {
                step.state = state;
            }
        }
        self.emit(ProgressEvent::Step { id, state });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
