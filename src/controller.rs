//! The perceive → plan → dispatch → act → record loop.
//!
//! One [`LoopController`] serves tasks one at a time. Each task gets its own
//! history window and audit directory, both dropped when the task ends.
//! The loop has no built-in iteration cap; the only designed exit is the
//! planner's stop sentinel, plus cancellation and the optional budgets in
//! [`LoopConfig`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::archive::{ArchivedTask, TaskArchive, TaskOutcome};
use crate::brain::{
    ActionSynthesizer, InstructionPlanner, PlannerDecision, PlanningPolicy, ScriptSynthesizer,
    Synthesis,
};
use crate::dispatch::{Dispatch, classify};
use crate::error::LoopError;
use crate::eyes::{
    AccessibilityProvider, DocumentSource, PerceptionAssembler, PerceptionSettings, ScreenCapturer,
};
use crate::hands::{Action, ActionRunner, ScriptRunner, TaskStorage};
use crate::history::HistoryWindow;
use crate::types::{IdGrammar, LoopEvent, ScreenSnapshot, StepRecord, Task};

/// Upper bound for the capture retry delay, as a multiple of `perception_retry`.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Platform services the loop drives. Chosen once at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub capturer: Arc<dyn ScreenCapturer>,
    pub accessibility: Arc<dyn AccessibilityProvider>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub documents: Vec<Arc<dyn DocumentSource>>,
}

#[derive(Clone)]
pub struct Oracles {
    pub planner: Arc<dyn PlanningPolicy>,
    pub synthesizer: Arc<dyn ActionSynthesizer>,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Root for per-task screenshot directories.
    pub data_dir: PathBuf,
    pub perception: PerceptionSettings,
    /// Pause after a not-ready planner, and the first pause after a failed
    /// capture. Repeated capture failures double it.
    pub perception_retry: Duration,
    /// Applied to every collaborator call when set.
    pub call_timeout: Option<Duration>,
    pub max_cycles: Option<u64>,
    pub time_budget: Option<Duration>,
}

impl LoopConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            perception: PerceptionSettings::default(),
            perception_retry: Duration::from_secs(1),
            call_timeout: None,
            max_cycles: None,
            time_budget: None,
        }
    }
}

/// Cooperative cancellation, honoured between cycles.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Perceiving,
    Planning,
    Dispatching,
    Acting,
    Recording,
    Terminated,
}

/// How a task ended without a bookkeeping fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Completed { message: String, cycles: u64 },
    Cancelled { cycles: u64 },
    BudgetExhausted { cycles: u64 },
}

/// Loop state together with the data each step hands to the next.
enum Phase {
    Perceiving,
    Planning(ScreenSnapshot),
    Dispatching {
        snapshot: ScreenSnapshot,
        instruction: String,
    },
    Acting {
        instruction: String,
        action: Action,
    },
    Recording(StepRecord),
}

impl Phase {
    fn state(&self) -> LoopState {
        match self {
            Phase::Perceiving => LoopState::Perceiving,
            Phase::Planning(_) => LoopState::Planning,
            Phase::Dispatching { .. } => LoopState::Dispatching,
            Phase::Acting { .. } => LoopState::Acting,
            Phase::Recording(_) => LoopState::Recording,
        }
    }
}

/// Everything owned by a single running task.
struct TaskRun {
    task: Task,
    history: HistoryWindow,
    storage: TaskStorage,
    messages: Vec<LoopEvent>,
}

pub struct LoopController {
    eyes: PerceptionAssembler,
    planner: InstructionPlanner,
    synthesizer: ScriptSynthesizer,
    hands: ActionRunner,
    grammar: IdGrammar,
    config: LoopConfig,
    archive: Arc<Mutex<TaskArchive>>,
    events: broadcast::Sender<LoopEvent>,
}

impl LoopController {
    pub fn new(
        capabilities: Capabilities,
        oracles: Oracles,
        config: LoopConfig,
        archive: Arc<Mutex<TaskArchive>>,
        events: broadcast::Sender<LoopEvent>,
    ) -> Self {
        let timeout = config.call_timeout;
        let perception = PerceptionSettings {
            call_timeout: timeout,
            ..config.perception.clone()
        };
        let dialect = capabilities.scripts.dialect();

        Self {
            grammar: capabilities.accessibility.id_grammar(),
            eyes: PerceptionAssembler::new(
                capabilities.capturer,
                capabilities.accessibility.clone(),
                capabilities.documents,
                perception,
            ),
            planner: InstructionPlanner::new(oracles.planner, timeout),
            synthesizer: ScriptSynthesizer::new(oracles.synthesizer, dialect, timeout),
            hands: ActionRunner::new(capabilities.accessibility, capabilities.scripts, timeout),
            config,
            archive,
            events,
        }
    }

    /// Run `title` until the planner stops it, `cancel` fires or a budget runs out.
    ///
    /// Returns an error only when the task's own storage cannot be set up.
    pub async fn start_task(
        &self,
        title: &str,
        cancel: &CancelFlag,
    ) -> Result<LoopOutcome, LoopError> {
        let task = Task::new(title.trim());
        info!(task = %task.title, "starting task");

        let storage = match TaskStorage::create(&self.config.data_dir, &task) {
            Ok(storage) => storage,
            Err(e) => {
                error!(task = %task.title, error = %e, "task aborted");
                let event = LoopEvent::Failed {
                    message: e.to_string(),
                };
                self.emit(event.clone());
                self.archive(&task, TaskOutcome::Failed, vec![event]).await;
                return Err(e);
            }
        };

        let mut run = TaskRun {
            task,
            history: HistoryWindow::new(),
            storage,
            messages: Vec::new(),
        };
        let outcome = self.drive(&mut run, cancel).await;
        debug!(state = ?LoopState::Terminated, ?outcome, "task finished");

        let archived = match &outcome {
            LoopOutcome::Completed { message, .. } => {
                info!(task = %run.task.title, message, "task complete");
                let event = LoopEvent::Complete {
                    message: message.clone(),
                };
                run.messages.push(event.clone());
                self.emit(event);
                TaskOutcome::Completed
            }
            LoopOutcome::Cancelled { cycles } => {
                info!(task = %run.task.title, cycles, "task cancelled");
                TaskOutcome::Cancelled
            }
            LoopOutcome::BudgetExhausted { cycles } => {
                warn!(task = %run.task.title, cycles, "task budget exhausted");
                let event = LoopEvent::Failed {
                    message: format!("Stopped after {cycles} cycles: budget exhausted"),
                };
                run.messages.push(event.clone());
                self.emit(event);
                TaskOutcome::BudgetExhausted
            }
        };
        self.archive(&run.task, archived, std::mem::take(&mut run.messages))
            .await;
        Ok(outcome)
    }

    async fn drive(&self, run: &mut TaskRun, cancel: &CancelFlag) -> LoopOutcome {
        let started = Instant::now();
        let mut cycles = 0u64;
        let mut capture_backoff = self.config.perception_retry;
        let mut phase = Phase::Perceiving;

        loop {
            debug!(state = ?phase.state(), cycle = cycles, "loop transition");
            phase = match phase {
                Phase::Perceiving => {
                    if cancel.is_cancelled() {
                        return LoopOutcome::Cancelled { cycles };
                    }
                    if self.budget_exhausted(cycles, started) {
                        return LoopOutcome::BudgetExhausted { cycles };
                    }
                    match self.eyes.perceive().await {
                        Ok(snapshot) => {
                            cycles += 1;
                            capture_backoff = self.config.perception_retry;
                            Phase::Planning(snapshot)
                        }
                        Err(e) => {
                            warn!(error = %e, retry_in = ?capture_backoff, "screenshot unavailable");
                            tokio::time::sleep(capture_backoff).await;
                            capture_backoff = capture_backoff.saturating_mul(2).min(
                                self.config.perception_retry.saturating_mul(MAX_BACKOFF_FACTOR),
                            );
                            Phase::Perceiving
                        }
                    }
                }

                Phase::Planning(snapshot) => {
                    let cycle_started = Instant::now();
                    let decision = self.planner.plan(&run.task, &run.history, &snapshot).await;
                    debug!(elapsed_ms = cycle_started.elapsed().as_millis() as u64, "planned");
                    match decision {
                        PlannerDecision::Stop { message } => {
                            return LoopOutcome::Completed { message, cycles };
                        }
                        PlannerDecision::NotReady { reason } => {
                            info!(reason, "planner not ready, skipping cycle");
                            tokio::time::sleep(self.config.perception_retry).await;
                            Phase::Perceiving
                        }
                        PlannerDecision::Act { instruction } => {
                            info!(cycle = cycles, instruction, "next step");
                            let event = LoopEvent::Info {
                                message: instruction.clone(),
                            };
                            run.messages.push(event.clone());
                            self.emit(event);
                            Phase::Dispatching {
                                snapshot,
                                instruction,
                            }
                        }
                    }
                }

                Phase::Dispatching {
                    snapshot,
                    instruction,
                } => {
                    run.storage
                        .save_snapshot(&snapshot.image, &instruction)
                        .await;
                    let action = match classify(&instruction, self.grammar) {
                        Dispatch::Click(id) => Action::Click(id),
                        Dispatch::Script => {
                            match self
                                .synthesizer
                                .synthesize(&instruction, &run.history, &snapshot)
                                .await
                            {
                                Synthesis::Script(text) => Action::Script(text),
                                Synthesis::NoAction => Action::Noop,
                                Synthesis::Failed(reason) => Action::Unavailable(reason),
                            }
                        }
                    };
                    Phase::Acting {
                        instruction,
                        action,
                    }
                }

                Phase::Acting {
                    instruction,
                    action,
                } => {
                    let result = self.hands.run(&action, &run.storage).await;
                    Phase::Recording(StepRecord {
                        instruction,
                        script: action.recorded_script(),
                        error: result.error(),
                    })
                }

                Phase::Recording(record) => {
                    run.history.append(record);
                    Phase::Perceiving
                }
            };
        }
    }

    fn budget_exhausted(&self, cycles: u64, started: Instant) -> bool {
        if self.config.max_cycles.is_some_and(|max| cycles >= max) {
            return true;
        }
        self.config
            .time_budget
            .is_some_and(|budget| started.elapsed() >= budget)
    }

    fn emit(&self, event: LoopEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn archive(&self, task: &Task, outcome: TaskOutcome, messages: Vec<LoopEvent>) {
        let entry = ArchivedTask::finish(task, outcome, messages);
        if let Err(e) = self.archive.lock().await.record(entry).await {
            warn!(error = %e, "could not persist task archive");
        }
    }
}
