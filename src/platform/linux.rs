//! Linux/X11: foreground lookup via xdotool. There is no element provider.

use async_trait::async_trait;

use super::command;
use crate::error::ProviderError;
use crate::eyes::AccessibilityProvider;
use crate::types::{ClickOutcome, ClickableElement, ElementId, IdGrammar, WindowInfo};

#[derive(Debug, Default, Clone)]
pub struct XdotoolAccessibility;

async fn xdotool(query: &str) -> Result<String, ProviderError> {
    let out = command::output("xdotool", ["getactivewindow", query])
        .await
        .map_err(|e| ProviderError::Helper(format!("xdotool: {e}")))?;
    command::checked_stdout("xdotool", &out)
        .map(|s| s.trim().to_string())
        .map_err(ProviderError::Helper)
}

#[async_trait]
impl AccessibilityProvider for XdotoolAccessibility {
    fn id_grammar(&self) -> IdGrammar {
        IdGrammar::Numeric
    }

    async fn list_clickable_elements(&self) -> Result<Vec<ClickableElement>, ProviderError> {
        Err(ProviderError::Unsupported(
            "element listing is not implemented for Linux".into(),
        ))
    }

    async fn click_element(&self, id: &ElementId) -> Result<ClickOutcome, ProviderError> {
        Ok(ClickOutcome {
            succeeded: false,
            clicked_element: None,
            error: Some(format!("cannot click element {id}: unsupported platform")),
        })
    }

    async fn foreground_window(&self) -> Result<WindowInfo, ProviderError> {
        let app_name = xdotool("getwindowclassname").await?;
        let window_title = xdotool("getwindowname").await.ok().filter(|t| !t.is_empty());
        Ok(WindowInfo {
            app_name,
            window_title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clicks_fail_as_step_errors() {
        let outcome = XdotoolAccessibility
            .click_element(&ElementId::from(3u64))
            .await
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(
            outcome.error.as_deref(),
            Some("cannot click element 3: unsupported platform")
        );
    }

    #[tokio::test]
    async fn listing_is_unsupported() {
        assert!(matches!(
            XdotoolAccessibility.list_clickable_elements().await,
            Err(ProviderError::Unsupported(_))
        ));
    }
}
