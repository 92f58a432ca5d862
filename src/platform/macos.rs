//! macOS: Swift accessibility helper, System Events and Safari.
//!
//! The element helper is not bundled. Put an `accessibility.swift` in
//! `--helper-dir`; it is run as `swift accessibility.swift <command>` and
//! must answer on stdout, exiting non-zero with a message on stderr when it
//! cannot:
//!
//! - `json-list` prints the clickable elements of the frontmost window,
//!   `[{"id": 0, "role": "AXButton", "title": "OK", "description": null}]`.
//!   Ids are indices into that listing. Empty output means no elements.
//! - `click <index>` presses the element and prints
//!   `{"success": true, "clicked_element": {"id": 0, "title": "OK"}, "error": null}`.
//!
//! Without the helper, listing degrades to no elements and clicks fail as
//! step errors. The foreground app comes from System Events, not the helper.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{SERIALIZE_DOM_JS, command};
use crate::error::{DocumentError, ProviderError};
use crate::eyes::{AccessibilityProvider, DocumentSource};
use crate::types::{ClickOutcome, ClickableElement, ElementId, IdGrammar, WindowInfo};

const FRONTMOST_APP: &str =
    "tell application \"System Events\" to get name of first application process whose frontmost is true";

const FRONT_WINDOW_TITLE: &str = "tell application \"System Events\" to tell (first application process whose frontmost is true) to get name of front window";

/// Drives `accessibility.swift` (`json-list`, `click <index>`) under `helper_dir`.
#[derive(Debug, Clone)]
pub struct SwiftAccessibility {
    helper: PathBuf,
}

impl SwiftAccessibility {
    pub fn new(helper_dir: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper_dir.into().join("accessibility.swift"),
        }
    }

    async fn helper(&self, args: &[&str]) -> Result<String, ProviderError> {
        let mut argv = vec![self.helper.to_string_lossy().into_owned()];
        argv.extend(args.iter().map(|a| a.to_string()));
        let out = command::output("swift", &argv)
            .await
            .map_err(|e| ProviderError::Helper(format!("swift: {e}")))?;
        command::checked_stdout("swift", &out).map_err(ProviderError::Helper)
    }
}

async fn osascript(source: &str) -> Result<String, String> {
    let out = command::output("osascript", ["-e", source])
        .await
        .map_err(|e| format!("osascript: {e}"))?;
    command::checked_stdout("osascript", &out).map(|s| s.trim().to_string())
}

#[async_trait]
impl AccessibilityProvider for SwiftAccessibility {
    fn id_grammar(&self) -> IdGrammar {
        IdGrammar::Numeric
    }

    async fn list_clickable_elements(&self) -> Result<Vec<ClickableElement>, ProviderError> {
        let stdout = self.helper(&["json-list"]).await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn click_element(&self, id: &ElementId) -> Result<ClickOutcome, ProviderError> {
        let Some(index) = id.as_index() else {
            return Ok(ClickOutcome {
                succeeded: false,
                clicked_element: None,
                error: Some(format!("invalid element id for macOS click: {id}")),
            });
        };
        let stdout = self.helper(&["click", &index.to_string()]).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn foreground_window(&self) -> Result<WindowInfo, ProviderError> {
        let app_name = osascript(FRONTMOST_APP)
            .await
            .map_err(ProviderError::Helper)?;
        // Apps without windows have no title.
        let window_title = osascript(FRONT_WINDOW_TITLE)
            .await
            .ok()
            .filter(|t| !t.is_empty());
        Ok(WindowInfo {
            app_name,
            window_title,
        })
    }
}

/// Reads Safari's page through `do JavaScript`.
#[derive(Debug, Default, Clone)]
pub struct SafariDocuments;

#[async_trait]
impl DocumentSource for SafariDocuments {
    fn handles(&self, app: &str) -> bool {
        app.trim().eq_ignore_ascii_case("safari")
    }

    async fn structured_document(&self, _app: &str) -> Result<String, DocumentError> {
        let script = format!(
            "tell application \"Safari\" to do JavaScript \"{}\" in front document",
            SERIALIZE_DOM_JS.replace('\\', "\\\\").replace('"', "\\\"")
        );
        debug!("reading Safari document");
        osascript(&script).await.map_err(DocumentError::Source)
    }
}
