//! Windows: UI Automation through a PowerShell helper script.
//!
//! The helper is not bundled. Put an `accessibility.ps1` in `--helper-dir`;
//! it is run as `powershell -NoProfile -ExecutionPolicy Bypass -File
//! accessibility.ps1 <command>` and answers with JSON on stdout, exiting
//! non-zero with a message on stderr on failure:
//!
//! - `list` prints `[{"id": "buttonSubmit", "role": "Button", "title": "Submit"}]`
//!   for the focused window, using AutomationIds as ids.
//! - `click <id>` invokes the element and prints
//!   `{"success": false, "error": "element not found: buttonSubmit"}` or a
//!   success object with `clicked_element`.
//! - `focused` prints `{"appName": "notepad", "windowTitle": "Untitled - Notepad"}`.
//!
//! Without the helper, listing and the foreground app degrade and clicks
//! fail as step errors.

use std::path::PathBuf;

use async_trait::async_trait;

use super::command;
use crate::error::ProviderError;
use crate::eyes::AccessibilityProvider;
use crate::types::{ClickOutcome, ClickableElement, ElementId, IdGrammar, WindowInfo};

/// Drives `accessibility.ps1` (`list`, `click <id>`, `focused`) under `helper_dir`.
///
/// Element ids are UIA AutomationIds, so any token is a valid id.
#[derive(Debug, Clone)]
pub struct UiaAccessibility {
    helper: PathBuf,
}

impl UiaAccessibility {
    pub fn new(helper_dir: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper_dir.into().join("accessibility.ps1"),
        }
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        let mut argv: Vec<String> = ["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        argv.push(self.helper.to_string_lossy().into_owned());
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    async fn helper(&self, args: &[&str]) -> Result<String, ProviderError> {
        let out = command::output("powershell", self.argv(args))
            .await
            .map_err(|e| ProviderError::Helper(format!("powershell: {e}")))?;
        command::checked_stdout("powershell", &out).map_err(ProviderError::Helper)
    }
}

#[async_trait]
impl AccessibilityProvider for UiaAccessibility {
    fn id_grammar(&self) -> IdGrammar {
        IdGrammar::Opaque
    }

    async fn list_clickable_elements(&self) -> Result<Vec<ClickableElement>, ProviderError> {
        let stdout = self.helper(&["list"]).await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn click_element(&self, id: &ElementId) -> Result<ClickOutcome, ProviderError> {
        let stdout = self.helper(&["click", id.as_str()]).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn foreground_window(&self) -> Result<WindowInfo, ProviderError> {
        let stdout = self.helper(&["focused"]).await?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_is_invoked_through_bypass_policy() {
        let uia = UiaAccessibility::new("helpers");
        let argv = uia.argv(&["click", "buttonSubmit"]);
        assert_eq!(argv[..4], ["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"]);
        assert!(argv[4].ends_with("accessibility.ps1"));
        assert_eq!(argv[5..], ["click", "buttonSubmit"]);
    }

    #[test]
    fn focused_window_reply_parses() {
        let info: WindowInfo =
            serde_json::from_str(r#"{"appName": "notepad", "windowTitle": "Untitled - Notepad"}"#)
                .unwrap();
        assert_eq!(info.app_name, "notepad");
        assert_eq!(info.window_title.as_deref(), Some("Untitled - Notepad"));
    }

    #[test]
    fn failed_click_reply_parses() {
        let outcome: ClickOutcome =
            serde_json::from_str(r#"{"success": false, "error": "element not found: buttonSubmit"}"#)
                .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.clicked_element, None);
        assert_eq!(outcome.error.as_deref(), Some("element not found: buttonSubmit"));
    }

    #[test]
    fn element_list_accepts_string_ids() {
        let elements: Vec<ClickableElement> = serde_json::from_str(
            r#"[{"id": "buttonSubmit", "role": "Button", "title": "Submit"}]"#,
        )
        .unwrap();
        assert_eq!(elements[0].id.as_str(), "buttonSubmit");
    }
}
