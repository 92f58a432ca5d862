use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reserved token the planner appends when the task is finished.
pub const STOP_SENTINEL: &str = "STOP";

/// Number of recent steps kept as oracle context.
pub const HISTORY_CAPACITY: usize = 5;

/// Foreground app reported when the accessibility provider cannot tell.
pub const UNKNOWN_APPLICATION: &str = "Unknown Application";

pub const DOCUMENT_MAX_CHARS: usize = 20_000;

/// A user request the loop is working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    pub started_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            started_at: Utc::now(),
        }
    }
}

/// Opaque UI element identifier.
///
/// macOS hands out numeric indices, Windows UI Automation hands out
/// AutomationId strings. Both arrive here as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric view for providers that address elements by index.
    pub fn as_index(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ElementId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for ElementId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_index() {
            Some(index) if index.to_string() == self.0 => serializer.serialize_u64(index),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for ElementId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => ElementId::from(n),
            Raw::Text(s) => ElementId(s),
        })
    }
}

/// How a provider's element identifiers look inside planner text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGrammar {
    Numeric,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickableElement {
    pub id: ElementId,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Foreground application as reported by the accessibility provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    #[serde(rename = "appName")]
    pub app_name: String,
    #[serde(rename = "windowTitle", default)]
    pub window_title: Option<String>,
}

/// One cycle's view of the desktop. Rebuilt every cycle.
#[derive(Debug, Clone)]
pub struct ScreenSnapshot {
    /// PNG bytes with the reference grid already drawn.
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub clickable_elements: Vec<ClickableElement>,
    pub foreground_app: String,
    pub foreground_window_title: Option<String>,
    pub structured_document: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickedElement {
    pub id: ElementId,
    #[serde(default)]
    pub title: String,
}

/// Reply of a click-by-identifier request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickOutcome {
    #[serde(alias = "success")]
    pub succeeded: bool,
    #[serde(default, alias = "clickedElement")]
    pub clicked_element: Option<ClickedElement>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Scripting language a platform's script runner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptDialect {
    AppleScript,
    PowerShell,
    Shell,
}

impl ScriptDialect {
    /// Tag used on fenced code blocks.
    pub fn fence_tag(self) -> &'static str {
        match self {
            ScriptDialect::AppleScript => "applescript",
            ScriptDialect::PowerShell => "powershell",
            ScriptDialect::Shell => "shell",
        }
    }

    pub fn from_fence_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "applescript" | "osascript" => Some(ScriptDialect::AppleScript),
            "powershell" | "ps1" | "pwsh" => Some(ScriptDialect::PowerShell),
            "shell" | "sh" | "bash" => Some(ScriptDialect::Shell),
            _ => None,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            ScriptDialect::AppleScript => ".scpt",
            ScriptDialect::PowerShell => ".ps1",
            ScriptDialect::Shell => ".sh",
        }
    }
}

impl fmt::Display for ScriptDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fence_tag())
    }
}

/// A synthesized script written to disk and ready to run.
#[derive(Debug, Clone)]
pub struct PreparedScript {
    pub text: String,
    pub path: PathBuf,
    pub dialect: ScriptDialect,
}

/// Captured output of a script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// What the action runner observed for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub succeeded: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ActionResult {
    pub fn success(stdout: Option<String>) -> Self {
        Self {
            succeeded: true,
            stdout,
            stderr: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: None,
            stderr: Some(error.into()),
        }
    }

    /// Error text recorded in history, if the action failed.
    pub fn error(&self) -> Option<String> {
        if self.succeeded {
            return None;
        }
        Some(
            self.stderr
                .clone()
                .unwrap_or_else(|| "action failed".to_string()),
        )
    }
}

/// One finished cycle as remembered by the history window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub instruction: String,
    pub script: Option<String>,
    pub error: Option<String>,
}

/// Events streamed to whoever started the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoopEvent {
    /// A non-terminal instruction about to be acted on.
    Info { message: String },
    /// The planner declared the task finished.
    Complete { message: String },
    /// The task ended abnormally.
    Failed { message: String },
}

impl LoopEvent {
    pub fn message(&self) -> &str {
        match self {
            LoopEvent::Info { message }
            | LoopEvent::Complete { message }
            | LoopEvent::Failed { message } => message,
        }
    }
}
