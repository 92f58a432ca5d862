//! Action execution and the per-task audit directory.
//!
//! Exactly one action runs per cycle: a click through the accessibility
//! provider or a synthesized script through the platform's script runner.
//! Nothing here returns an error to the loop; every failure ends up in the
//! [`ActionResult`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};

use crate::deadline::bounded;
use crate::dispatch::click_script;
use crate::error::{ExecutionError, LoopError, ProviderError};
use crate::eyes::AccessibilityProvider;
use crate::types::{ActionResult, ElementId, PreparedScript, ScriptDialect, ScriptOutput, Task};

/// Runs script files in one dialect.
///
/// Errors mean the interpreter could not be started. Scripts that ran but
/// failed report it through `stderr`.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    fn dialect(&self) -> ScriptDialect;

    async fn run_script(&self, script: &PreparedScript) -> Result<ScriptOutput, ExecutionError>;
}

/// The single executable action chosen for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click(ElementId),
    Script(String),
    /// The synthesizer confirmed there is nothing left to run.
    Noop,
    /// The synthesizer could not produce anything this cycle.
    Unavailable(String),
}

impl Action {
    /// Script text recorded in the step history.
    pub fn recorded_script(&self) -> Option<String> {
        match self {
            Action::Click(id) => Some(click_script(id)),
            Action::Script(text) => Some(text.clone()),
            Action::Noop => Some(String::new()),
            Action::Unavailable(_) => None,
        }
    }
}

/// Directory holding one task's screenshots and transient scripts.
#[derive(Debug, Clone)]
pub struct TaskStorage {
    dir: PathBuf,
}

impl TaskStorage {
    /// Create `<base>/screenshots/<millis>-<slug>` for `task`.
    pub fn create(base: &Path, task: &Task) -> Result<Self, LoopError> {
        let dir = base.join("screenshots").join(format!(
            "{}-{}",
            task.started_at.timestamp_millis(),
            slugify(&task.title)
        ));
        std::fs::create_dir_all(&dir).map_err(|source| LoopError::Storage {
            path: dir.clone(),
            source,
        })?;
        debug!(dir = %dir.display(), "created task storage");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keep the cycle's screenshot for later inspection. Failures are only logged.
    pub async fn save_snapshot(&self, png: &[u8], instruction: &str) -> Option<PathBuf> {
        let path = self.dir.join(format!(
            "{}-{}.png",
            chrono::Utc::now().timestamp_millis(),
            slugify(instruction)
        ));
        match tokio::fs::write(&path, png).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not write screenshot");
                None
            }
        }
    }

    /// Write `text` to a temporary file that is removed when the returned
    /// guard drops.
    pub fn prepare_script(
        &self,
        text: &str,
        dialect: ScriptDialect,
    ) -> Result<(TempPath, PreparedScript), ExecutionError> {
        let write_err = |source| ExecutionError::Write {
            path: self.dir.clone(),
            source,
        };
        let mut file = tempfile::Builder::new()
            .prefix("script-")
            .suffix(dialect.file_extension())
            .tempfile_in(&self.dir)
            .map_err(write_err)?;
        file.write_all(text.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;

        let guard = file.into_temp_path();
        let prepared = PreparedScript {
            text: text.to_string(),
            path: guard.to_path_buf(),
            dialect,
        };
        Ok((guard, prepared))
    }
}

/// File-name friendly form of free text.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 60 {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "step".to_string() } else { slug }
}

pub struct ActionRunner {
    accessibility: Arc<dyn AccessibilityProvider>,
    scripts: Arc<dyn ScriptRunner>,
    call_timeout: Option<Duration>,
}

impl ActionRunner {
    pub fn new(
        accessibility: Arc<dyn AccessibilityProvider>,
        scripts: Arc<dyn ScriptRunner>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            accessibility,
            scripts,
            call_timeout,
        }
    }

    pub async fn run(&self, action: &Action, storage: &TaskStorage) -> ActionResult {
        match action {
            Action::Click(id) => self.click(id).await,
            Action::Script(text) => self.script(text, storage).await,
            Action::Noop => ActionResult::success(None),
            Action::Unavailable(reason) => {
                ActionResult::failure(format!("action synthesis failed: {reason}"))
            }
        }
    }

    #[instrument(skip(self), fields(element = %id))]
    async fn click(&self, id: &ElementId) -> ActionResult {
        let outcome = bounded(
            self.call_timeout,
            self.accessibility.click_element(id),
            ProviderError::TimedOut,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                if let Some(error) = outcome.error.filter(|e| !e.trim().is_empty()) {
                    warn!(error, "click failed");
                    return ActionResult::failure(error);
                }
                if !outcome.succeeded {
                    return ActionResult::failure(format!("click on element {id} failed"));
                }
                let echoed = outcome
                    .clicked_element
                    .map(|el| format!("clicked element {} {}", el.id, el.title).trim_end().to_string());
                info!("clicked element");
                ActionResult::success(echoed)
            }
            Err(e) => {
                warn!(error = %e, "click failed");
                ActionResult::failure(e.to_string())
            }
        }
    }

    #[instrument(skip_all, fields(dialect = %self.scripts.dialect()))]
    async fn script(&self, text: &str, storage: &TaskStorage) -> ActionResult {
        let (_guard, prepared) = match storage.prepare_script(text, self.scripts.dialect()) {
            Ok(prepared) => prepared,
            Err(e) => return ActionResult::failure(format!("execution error: {e}")),
        };
        debug!(path = %prepared.path.display(), "running script");

        let output = bounded(
            self.call_timeout,
            self.scripts.run_script(&prepared),
            ExecutionError::TimedOut,
        )
        .await;

        match output {
            Ok(out) => {
                let stdout = out.stdout.filter(|s| !s.trim().is_empty());
                match out.stderr.filter(|s| !s.trim().is_empty()) {
                    Some(stderr) => {
                        warn!(stderr = %stderr.trim(), "script reported errors");
                        ActionResult {
                            succeeded: false,
                            stdout,
                            stderr: Some(stderr),
                        }
                    }
                    None => ActionResult::success(stdout),
                }
            }
            Err(e) => {
                warn!(error = %e, "script runner could not be invoked");
                ActionResult::failure(format!("execution error: {e}"))
            }
        }
    }
}
