//! Perception: one [`ScreenSnapshot`] per cycle.
//!
//! Only the screenshot is mandatory. Element listing, foreground-app lookup
//! and document extraction each fall back to an empty or unknown value when
//! their collaborator fails, so a flaky accessibility stack never stalls the
//! loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::deadline::bounded;
use crate::error::{CaptureError, DocumentError, ProviderError};
use crate::grid::{self, GridSpec};
use crate::types::{
    ClickOutcome, ClickableElement, DOCUMENT_MAX_CHARS, ElementId, IdGrammar, ScreenSnapshot,
    UNKNOWN_APPLICATION, WindowInfo,
};

/// Produces a raw image (any format `image` can decode) of the display.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Platform UI automation: element enumeration, clicking and focus queries.
#[async_trait]
pub trait AccessibilityProvider: Send + Sync {
    /// Shape of the identifiers this provider hands out.
    fn id_grammar(&self) -> IdGrammar;

    async fn list_clickable_elements(&self) -> Result<Vec<ClickableElement>, ProviderError>;

    async fn click_element(&self, id: &ElementId) -> Result<ClickOutcome, ProviderError>;

    async fn foreground_window(&self) -> Result<WindowInfo, ProviderError>;
}

/// Serializes the active document of a browser-class application.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Whether this source can read documents out of `app`.
    fn handles(&self, app: &str) -> bool;

    async fn structured_document(&self, app: &str) -> Result<String, DocumentError>;
}

const BROWSERS: &[&str] = &[
    "safari",
    "google chrome",
    "chrome",
    "microsoft edge",
    "msedge",
    "chromium",
    "chromium browser",
    "brave browser",
    "brave",
    "arc",
    "firefox",
];

/// Lowercase application key: `.exe` dropped, `-` and `_` read as spaces
/// so X11 class names like `Google-chrome` match their display names.
pub fn app_key(app: &str) -> String {
    let name = app.trim().to_ascii_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);
    name.replace(['-', '_'], " ")
}

/// Whether `app` names a browser whose page tree is worth extracting.
pub fn is_browser(app: &str) -> bool {
    BROWSERS.contains(&app_key(app).as_str())
}

#[derive(Debug, Clone)]
pub struct PerceptionSettings {
    pub grid: GridSpec,
    /// Resize captures to this size before annotating (e.g. logical display size).
    pub resize_to: Option<(u32, u32)>,
    pub document_max_chars: usize,
    pub call_timeout: Option<Duration>,
}

impl Default for PerceptionSettings {
    fn default() -> Self {
        Self {
            grid: GridSpec::default(),
            resize_to: None,
            document_max_chars: DOCUMENT_MAX_CHARS,
            call_timeout: None,
        }
    }
}

pub struct PerceptionAssembler {
    capturer: Arc<dyn ScreenCapturer>,
    accessibility: Arc<dyn AccessibilityProvider>,
    documents: Vec<Arc<dyn DocumentSource>>,
    settings: PerceptionSettings,
}

impl PerceptionAssembler {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        accessibility: Arc<dyn AccessibilityProvider>,
        documents: Vec<Arc<dyn DocumentSource>>,
        settings: PerceptionSettings,
    ) -> Self {
        Self {
            capturer,
            accessibility,
            documents,
            settings,
        }
    }

    /// Build this cycle's snapshot.
    ///
    /// Fails only when no screenshot could be produced.
    #[instrument(skip_all)]
    pub async fn perceive(&self) -> Result<ScreenSnapshot, CaptureError> {
        let limit = self.settings.call_timeout;

        let raw = bounded(limit, self.capturer.capture_screen(), CaptureError::TimedOut).await?;
        let (image, width, height) =
            grid::annotate_png(&raw, &self.settings.grid, self.settings.resize_to)?;
        debug!(width, height, bytes = image.len(), "captured screen");

        let clickable_elements = match bounded(
            limit,
            self.accessibility.list_clickable_elements(),
            ProviderError::TimedOut,
        )
        .await
        {
            Ok(elements) => elements,
            Err(e) => {
                warn!(error = %e, "clickable element listing failed, continuing without elements");
                Vec::new()
            }
        };

        let (foreground_app, foreground_window_title) = match bounded(
            limit,
            self.accessibility.foreground_window(),
            ProviderError::TimedOut,
        )
        .await
        {
            Ok(info) if !info.app_name.trim().is_empty() => {
                (info.app_name.trim().to_string(), info.window_title)
            }
            Ok(info) => (UNKNOWN_APPLICATION.to_string(), info.window_title),
            Err(e) => {
                warn!(error = %e, "foreground window lookup failed");
                (UNKNOWN_APPLICATION.to_string(), None)
            }
        };

        let structured_document = self.extract_document(&foreground_app).await;

        Ok(ScreenSnapshot {
            image,
            width,
            height,
            clickable_elements,
            foreground_app,
            foreground_window_title,
            structured_document,
        })
    }

    async fn extract_document(&self, app: &str) -> Option<String> {
        if !is_browser(app) {
            return None;
        }
        let source = self.documents.iter().find(|s| s.handles(app))?;
        match bounded(
            self.settings.call_timeout,
            source.structured_document(app),
            DocumentError::TimedOut,
        )
        .await
        {
            Ok(doc) if doc.trim().is_empty() => None,
            Ok(doc) => Some(truncate_document(doc, self.settings.document_max_chars)),
            Err(e) => {
                warn!(app, error = %e, "structured document unavailable");
                None
            }
        }
    }
}

fn truncate_document(doc: String, max_chars: usize) -> String {
    match doc.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n... [truncated, {} total chars]",
            &doc[..cut],
            doc.chars().count()
        ),
        None => doc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedAccessibility, ScriptedCapturer, StaticDocuments, element, png,
    };

    fn assembler(
        capturer: ScriptedCapturer,
        accessibility: ScriptedAccessibility,
        documents: Vec<Arc<dyn DocumentSource>>,
    ) -> PerceptionAssembler {
        PerceptionAssembler::new(
            Arc::new(capturer),
            Arc::new(accessibility),
            documents,
            PerceptionSettings::default(),
        )
    }

    #[test]
    fn browser_names_are_recognized_loosely() {
        assert!(is_browser("Safari"));
        assert!(is_browser("msedge.exe"));
        assert!(is_browser(" Google Chrome "));
        assert!(is_browser("Google-chrome"));
        assert!(is_browser("Brave-browser"));
        assert!(is_browser("Microsoft-edge"));
        assert!(is_browser("Chromium-browser"));
        assert!(!is_browser("Notepad"));
        assert!(!is_browser(UNKNOWN_APPLICATION));
    }

    #[tokio::test]
    async fn snapshot_carries_all_perceived_fields() {
        let accessibility = ScriptedAccessibility::new()
            .with_elements(vec![element(1, "button", "OK")])
            .with_foreground("Notepad", Some("Untitled - Notepad"));
        let snapshot = assembler(ScriptedCapturer::always(png(200, 100)), accessibility, vec![])
            .perceive()
            .await
            .unwrap();

        assert_eq!((snapshot.width, snapshot.height), (200, 100));
        assert_eq!(snapshot.clickable_elements.len(), 1);
        assert_eq!(snapshot.foreground_app, "Notepad");
        assert_eq!(
            snapshot.foreground_window_title.as_deref(),
            Some("Untitled - Notepad")
        );
        assert_eq!(snapshot.structured_document, None);
    }

    #[tokio::test]
    async fn element_listing_failure_degrades_to_empty_list() {
        let accessibility = ScriptedAccessibility::new()
            .failing_listing()
            .with_foreground("Finder", None);
        let snapshot = assembler(ScriptedCapturer::always(png(10, 10)), accessibility, vec![])
            .perceive()
            .await
            .unwrap();

        assert!(snapshot.clickable_elements.is_empty());
        assert_eq!(snapshot.foreground_app, "Finder");
    }

    #[tokio::test]
    async fn foreground_failure_degrades_to_unknown_application() {
        let accessibility = ScriptedAccessibility::new().failing_foreground();
        let snapshot = assembler(ScriptedCapturer::always(png(10, 10)), accessibility, vec![])
            .perceive()
            .await
            .unwrap();

        assert_eq!(snapshot.foreground_app, UNKNOWN_APPLICATION);
        assert_eq!(snapshot.foreground_window_title, None);
    }

    #[tokio::test]
    async fn capture_failure_is_fatal() {
        let result = assembler(
            ScriptedCapturer::failing(),
            ScriptedAccessibility::new(),
            vec![],
        )
        .perceive()
        .await;

        assert!(matches!(result, Err(CaptureError::CaptureFailed(_))));
    }

    #[tokio::test]
    async fn document_is_read_only_for_browsers() {
        let docs: Vec<Arc<dyn DocumentSource>> =
            vec![Arc::new(StaticDocuments::ok(r#"{"tag":"BODY"}"#))];

        let in_safari = assembler(
            ScriptedCapturer::always(png(10, 10)),
            ScriptedAccessibility::new().with_foreground("Safari", None),
            docs.clone(),
        )
        .perceive()
        .await
        .unwrap();
        assert_eq!(
            in_safari.structured_document.as_deref(),
            Some(r#"{"tag":"BODY"}"#)
        );

        let in_notes = assembler(
            ScriptedCapturer::always(png(10, 10)),
            ScriptedAccessibility::new().with_foreground("Notes", None),
            docs,
        )
        .perceive()
        .await
        .unwrap();
        assert_eq!(in_notes.structured_document, None);
    }

    #[tokio::test]
    async fn document_failure_yields_no_document() {
        let docs: Vec<Arc<dyn DocumentSource>> = vec![Arc::new(StaticDocuments::failing())];
        let snapshot = assembler(
            ScriptedCapturer::always(png(10, 10)),
            ScriptedAccessibility::new().with_foreground("Safari", None),
            docs,
        )
        .perceive()
        .await
        .unwrap();

        assert_eq!(snapshot.structured_document, None);
    }

    #[test]
    fn long_documents_are_truncated_on_char_boundaries() {
        let doc = "é".repeat(10);
        let cut = truncate_document(doc.clone(), 4);
        assert!(cut.starts_with("éééé\n"));
        assert!(cut.ends_with("[truncated, 10 total chars]"));
        assert_eq!(truncate_document(doc.clone(), 10), doc);
    }
}
