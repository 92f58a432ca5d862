//! Adapters between the loop and its two decision oracles.
//!
//! The planning policy answers "what is the next small step?" with plain
//! text. The action synthesizer turns one such step into a script for the
//! platform's automation dialect. Both see the same perceived context.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::deadline::bounded;
use crate::error::OracleError;
use crate::history::HistoryWindow;
use crate::types::{ClickableElement, STOP_SENTINEL, ScreenSnapshot, ScriptDialect, Task};

/// Context handed to an oracle: prompt text plus the annotated screenshot.
#[derive(Debug, Clone)]
pub struct OracleRequest<'a> {
    pub prompt: String,
    pub screenshot_png: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleReply {
    pub text: String,
    /// False when the oracle stopped early (length cap, tool call, filter).
    pub is_final: bool,
}

impl OracleReply {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

#[async_trait]
pub trait PlanningPolicy: Send + Sync {
    async fn plan_next(&self, request: &OracleRequest<'_>) -> Result<OracleReply, OracleError>;
}

#[async_trait]
pub trait ActionSynthesizer: Send + Sync {
    async fn synthesize_action(
        &self,
        request: &OracleRequest<'_>,
    ) -> Result<OracleReply, OracleError>;
}

/// Outcome of asking the planner for the next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerDecision {
    /// Task finished; the message is what the user sees.
    Stop { message: String },
    Act { instruction: String },
    /// No usable instruction this cycle. Nothing gets recorded.
    NotReady { reason: String },
}

/// Summary line per clickable element, as shown to both oracles.
pub fn element_summary(elements: &[ClickableElement]) -> String {
    if elements.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = elements
        .iter()
        .map(|e| format!("  - ID: {}, Role: {}, Title: {}", e.id, e.role, e.title))
        .collect();
    format!(
        "\n\nHere is a list of clickable elements on the screen:\n{}",
        lines.join("\n")
    )
}

fn document_section(snapshot: &ScreenSnapshot) -> String {
    match &snapshot.structured_document {
        Some(doc) => format!(
            "\n\nHere is a structured JSON representation of the DOM of the current page:\n{}",
            doc
        ),
        None => String::new(),
    }
}

fn focus_lines(snapshot: &ScreenSnapshot) -> String {
    let mut out = format!(
        "The current application in focus is {}.",
        snapshot.foreground_app
    );
    if let Some(title) = snapshot
        .foreground_window_title
        .as_deref()
        .filter(|t| !t.is_empty())
    {
        out.push_str(&format!("\nThe focused window is titled \"{}\".", title));
    }
    out
}

/// Prompt text for the planning policy.
pub fn planning_prompt(task: &Task, history: &HistoryWindow, snapshot: &ScreenSnapshot) -> String {
    format!(
        "Initial task request: {}\n{}\nAll previous steps taken so far:\n{}{}{}",
        task.title,
        focus_lines(snapshot),
        history.render(),
        element_summary(&snapshot.clickable_elements),
        document_section(snapshot),
    )
}

/// Prompt text for the action synthesizer.
pub fn synthesis_prompt(
    instruction: &str,
    history: &HistoryWindow,
    snapshot: &ScreenSnapshot,
) -> String {
    let rendered = history.render();
    let history_section = if rendered.is_empty() {
        String::new()
    } else {
        format!("\nLast {} steps:\n{}", history.len(), rendered)
    };
    format!(
        "Instruction to execute: {}\n{}\n{}\nDimensions of window: {}x{}{}{}",
        instruction,
        history_section,
        focus_lines(snapshot),
        snapshot.width,
        snapshot.height,
        element_summary(&snapshot.clickable_elements),
        document_section(snapshot),
    )
}

/// Classify raw planner text.
pub fn parse_instruction(text: &str) -> PlannerDecision {
    let text = text.trim();
    if text.contains(STOP_SENTINEL) {
        return PlannerDecision::Stop {
            message: text.replace(STOP_SENTINEL, "").trim().to_string(),
        };
    }
    if text.is_empty() {
        return PlannerDecision::NotReady {
            reason: "planner returned an empty instruction".into(),
        };
    }
    PlannerDecision::Act {
        instruction: text.to_string(),
    }
}

pub struct InstructionPlanner {
    policy: Arc<dyn PlanningPolicy>,
    call_timeout: Option<Duration>,
}

impl InstructionPlanner {
    pub fn new(policy: Arc<dyn PlanningPolicy>, call_timeout: Option<Duration>) -> Self {
        Self {
            policy,
            call_timeout,
        }
    }

    #[instrument(skip_all)]
    pub async fn plan(
        &self,
        task: &Task,
        history: &HistoryWindow,
        snapshot: &ScreenSnapshot,
    ) -> PlannerDecision {
        let request = OracleRequest {
            prompt: planning_prompt(task, history, snapshot),
            screenshot_png: &snapshot.image,
        };
        let reply = bounded(
            self.call_timeout,
            self.policy.plan_next(&request),
            OracleError::TimedOut,
        )
        .await;

        match reply {
            Ok(reply) if reply.is_final => {
                debug!(reply = %reply.text, "planner replied");
                parse_instruction(&reply.text)
            }
            Ok(reply) => PlannerDecision::NotReady {
                reason: format!("planner reply was not final: {}", reply.text.trim()),
            },
            Err(e) => {
                warn!(error = %e, "planning policy failed");
                PlannerDecision::NotReady {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// What the synthesizer produced for an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Synthesis {
    Script(String),
    /// A confirmation with nothing left to run.
    NoAction,
    Failed(String),
}

static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("valid fence regex"));

static OPEN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*```").expect("valid fence regex"));

static FENCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*([A-Za-z0-9_+-]+)").expect("valid fence regex"));

fn looks_like_confirmation(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.starts_with("action:") || lower.contains("clickitem(") || lower.contains("click element")
}

/// Split an info string off the text that follows an opening fence.
///
/// A leading word only counts as the tag when it ends its line or names a
/// known dialect, so ```` ```open -a Notes``` ```` keeps `open`.
fn split_fence_tag(after: &str) -> (&str, &str) {
    let Some(caps) = FENCE_TAG.captures(after) else {
        return ("", after);
    };
    let (Some(whole), Some(word)) = (caps.get(0), caps.get(1)) else {
        return ("", after);
    };
    let rest = &after[whole.end()..];
    let ends_line = rest.trim_start_matches([' ', '\t']).is_empty()
        || rest.trim_start_matches([' ', '\t']).starts_with(['\n', '\r']);
    if ends_line || ScriptDialect::from_fence_tag(word.as_str()).is_some() {
        (word.as_str(), rest)
    } else {
        ("", after)
    }
}

/// Extract the script body from a synthesizer reply.
///
/// Prose before the opening fence and anything after the closing fence is
/// dropped. A lone trailing fence is stripped.
pub fn parse_script_reply(text: &str, dialect: ScriptDialect) -> Synthesis {
    let text = TRAILING_FENCE.replace(text.trim(), "");
    let text = text.trim();

    let open = OPEN_FENCE
        .find(text)
        .map(|m| m.end())
        .or_else(|| text.find("```").map(|i| i + 3));
    let Some(open) = open else {
        if text.is_empty() || looks_like_confirmation(text) {
            return Synthesis::NoAction;
        }
        return Synthesis::Script(text.to_string());
    };

    let (tag, rest) = split_fence_tag(&text[open..]);
    if !tag.is_empty() && ScriptDialect::from_fence_tag(tag) != Some(dialect) {
        warn!(tag, expected = %dialect, "script fence tag does not match runner dialect");
    }
    let body = rest.split("```").next().unwrap_or_default().trim();
    if body.is_empty() {
        Synthesis::NoAction
    } else {
        Synthesis::Script(body.to_string())
    }
}

pub struct ScriptSynthesizer {
    synthesizer: Arc<dyn ActionSynthesizer>,
    dialect: ScriptDialect,
    call_timeout: Option<Duration>,
}

impl ScriptSynthesizer {
    pub fn new(
        synthesizer: Arc<dyn ActionSynthesizer>,
        dialect: ScriptDialect,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            synthesizer,
            dialect,
            call_timeout,
        }
    }

    #[instrument(skip_all, fields(dialect = %self.dialect))]
    pub async fn synthesize(
        &self,
        instruction: &str,
        history: &HistoryWindow,
        snapshot: &ScreenSnapshot,
    ) -> Synthesis {
        let request = OracleRequest {
            prompt: synthesis_prompt(instruction, history, snapshot),
            screenshot_png: &snapshot.image,
        };
        let reply = bounded(
            self.call_timeout,
            self.synthesizer.synthesize_action(&request),
            OracleError::TimedOut,
        )
        .await;

        match reply {
            Ok(reply) if reply.is_final => parse_script_reply(&reply.text, self.dialect),
            Ok(_) => Synthesis::Failed("synthesizer reply was not final".into()),
            Err(e) => {
                warn!(error = %e, "action synthesizer failed");
                Synthesis::Failed(e.to_string())
            }
        }
    }
}
