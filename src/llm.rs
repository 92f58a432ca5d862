//! OpenAI-compatible chat-completions backend for both decision oracles.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::brain::{ActionSynthesizer, OracleReply, OracleRequest, PlanningPolicy};
use crate::error::OracleError;
use crate::types::ScriptDialect;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const PLANNER_TEMPERATURE: f32 = 0.1;
pub const SYNTHESIZER_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleRole {
    Planner,
    Synthesizer,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

pub struct OpenAiOracle {
    client: Client,
    settings: ModelSettings,
    role: OracleRole,
    instructions: String,
}

impl OpenAiOracle {
    pub fn new(
        client: Client,
        settings: ModelSettings,
        role: OracleRole,
        dialect: ScriptDialect,
    ) -> Self {
        let instructions = match role {
            OracleRole::Planner => planner_instructions(dialect),
            OracleRole::Synthesizer => synthesizer_instructions(dialect),
        };
        Self {
            client,
            settings,
            role,
            instructions,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        )
    }

    /// Chat-completions body: system instructions, then the prompt text
    /// with the screenshot attached as a data URL.
    pub fn request_body(&self, request: &OracleRequest<'_>) -> Value {
        let image_url = format!(
            "data:image/png;base64,{}",
            STANDARD.encode(request.screenshot_png)
        );
        json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": [
                {"role": "system", "content": self.instructions},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": request.prompt},
                        {"type": "image_url", "image_url": {"url": image_url}},
                    ],
                },
            ],
        })
    }

    async fn complete(&self, request: &OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        debug!(role = ?self.role, model = %self.settings.model, "calling oracle");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        parse_completion(status.as_u16(), &body)
    }
}

/// Read the first choice of a chat-completions response.
///
/// Any finish reason other than `stop` marks the reply as non-final.
pub fn parse_completion(status: u16, body: &Value) -> Result<OracleReply, OracleError> {
    if !(200..300).contains(&status) {
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("Unknown API error")
            .to_string();
        warn!(status, message, "oracle API error");
        return Err(OracleError::Api { status, message });
    }

    let choice = &body["choices"][0];
    let text = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| OracleError::Malformed(format!("no content in response: {body}")))?;
    let is_final = choice["finish_reason"]
        .as_str()
        .is_none_or(|reason| reason == "stop");

    Ok(OracleReply {
        text: text.to_string(),
        is_final,
    })
}

#[async_trait]
impl PlanningPolicy for OpenAiOracle {
    async fn plan_next(&self, request: &OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        self.complete(request).await
    }
}

#[async_trait]
impl ActionSynthesizer for OpenAiOracle {
    async fn synthesize_action(
        &self,
        request: &OracleRequest<'_>,
    ) -> Result<OracleReply, OracleError> {
        self.complete(request).await
    }
}

fn machine(dialect: ScriptDialect) -> &'static str {
    match dialect {
        ScriptDialect::AppleScript => "a Mac",
        ScriptDialect::PowerShell => "a Windows PC",
        ScriptDialect::Shell => "a Linux desktop",
    }
}

fn tooling(dialect: ScriptDialect) -> &'static str {
    match dialect {
        ScriptDialect::AppleScript => {
            "AppleScript run with osascript. Use `tell application \"X\" to activate` to focus apps, \
             `System Events` keystrokes for typing and shortcuts, and `do JavaScript` in Safari for page interaction."
        }
        ScriptDialect::PowerShell => {
            "PowerShell run with -ExecutionPolicy Bypass. Use Start-Process to open apps and \
             [System.Windows.Forms.SendKeys]::SendWait after Add-Type -AssemblyName System.Windows.Forms for keystrokes. \
             For long text, Set-Clipboard then send ^v."
        }
        ScriptDialect::Shell => {
            "POSIX sh. Use xdg-open or the app's binary to launch programs and xdotool for focus, typing and key presses."
        }
    }
}

pub fn planner_instructions(dialect: ScriptDialect) -> String {
    format!(
        "You generate the next instruction for another agent that automates {machine}. \
You see the current screen, the focused application, the task, and the last {history} steps with their scripts and errors. \
If a step failed, read its error and recover; if a strategy keeps failing, try a different one. Do not loop.

Rules:
- Reply with only the instruction. You are not talking to a human.
- One action per step, as short as possible: \"Open Notes\", \"Type hello\".
- For the first step, open the relevant app and bring it to the front. Never close apps or delete anything.
- Prefer keyboard shortcuts and typing over clicks.
- To click a listed element, reply exactly \"Click element <ID> <description>\", using an ID from the element list. Treat this as a last resort.
- When a page structure is given, nodes look like {{tag, id, class, role, text, clickable, children}}; use it for precise web steps.

When the screenshot shows the task is done, reply with a few words saying so followed by {stop}, e.g. \"Notes is open {stop}\".",
        machine = machine(dialect),
        history = crate::types::HISTORY_CAPACITY,
        stop = crate::types::STOP_SENTINEL,
    )
}

pub fn synthesizer_instructions(dialect: ScriptDialect) -> String {
    format!(
        "You write automation scripts for {machine}. You get exactly one instruction to carry out, \
the focused application, the window size, clickable elements and the last steps with their results.

Write {tooling}

Output format:
- Only the script, wrapped in ```{tag} ... ```. No commentary; your reply is executed verbatim.
- If the instruction is \"Click element <ID> ...\", the application clicks it itself: reply \"Action: Click element <ID>\" and nothing else.
- Keep scripts short and non-interactive.",
        machine = machine(dialect),
        tooling = tooling(dialect),
        tag = dialect.fence_tag(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(role: OracleRole) -> OpenAiOracle {
        OpenAiOracle::new(
            Client::new(),
            ModelSettings {
                api_base: "http://localhost:8080/v1/".into(),
                api_key: "sk-test".into(),
                model: "gpt-4.1".into(),
                temperature: PLANNER_TEMPERATURE,
            },
            role,
            ScriptDialect::PowerShell,
        )
    }

    #[test]
    fn body_carries_prompt_and_screenshot() {
        let png = [0x89, b'P', b'N', b'G'];
        let body = oracle(OracleRole::Planner).request_body(&OracleRequest {
            prompt: "Initial task request: Open Notepad".into(),
            screenshot_png: &png,
        });

        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["messages"][0]["role"], "system");
        let content = &body["messages"][1]["content"];
        assert_eq!(content[0]["text"], "Initial task request: Open Notepad");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        assert_eq!(
            oracle(OracleRole::Synthesizer).endpoint(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn completed_reply_is_final() {
        let body = json!({
            "choices": [{"message": {"content": "Open Notepad"}, "finish_reason": "stop"}]
        });
        assert_eq!(
            parse_completion(200, &body).unwrap(),
            OracleReply::final_text("Open Notepad")
        );
    }

    #[test]
    fn truncated_reply_is_not_final() {
        let body = json!({
            "choices": [{"message": {"content": "Open Note"}, "finish_reason": "length"}]
        });
        assert!(!parse_completion(200, &body).unwrap().is_final);
    }

    #[test]
    fn api_errors_keep_status_and_message() {
        let body = json!({"error": {"message": "Rate limit reached"}});
        match parse_completion(429, &body) {
            Err(OracleError::Api { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_content_is_malformed() {
        let body = json!({"choices": []});
        assert!(matches!(
            parse_completion(200, &body),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn instructions_follow_the_dialect() {
        let mac = synthesizer_instructions(ScriptDialect::AppleScript);
        assert!(mac.contains("```applescript"));
        let planner = planner_instructions(ScriptDialect::PowerShell);
        assert!(planner.contains("Windows PC"));
        assert!(planner.contains("STOP"));
        assert!(planner.contains("Click element <ID> <description>"));
    }
}
