//! Chromium-family page documents over the DevTools protocol.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use headless_chrome::{Browser, Tab};
use tracing::{debug, info};

use super::SERIALIZE_DOM_JS;
use crate::error::DocumentError;
use crate::eyes::{DocumentSource, app_key};

const CHROMIUM_APPS: &[&str] = &[
    "google chrome",
    "chrome",
    "microsoft edge",
    "msedge",
    "chromium",
    "chromium browser",
    "brave browser",
    "brave",
    "arc",
];

/// Attaches to a browser started with `--remote-debugging-port` and reads
/// the first page tab. The connection is reused until it breaks.
#[derive(Clone)]
pub struct ChromeDocuments {
    ws_url: String,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl ChromeDocuments {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            browser: Arc::new(Mutex::new(None)),
        }
    }

    fn connected(&self) -> Result<Browser, DocumentError> {
        let mut slot = self
            .browser
            .lock()
            .map_err(|_| DocumentError::Source("browser connection lock poisoned".into()))?;
        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }
        info!(url = %self.ws_url, "attaching to browser");
        let browser = Browser::connect(self.ws_url.clone())
            .map_err(|e| DocumentError::Source(format!("could not attach to browser: {e}")))?;
        *slot = Some(browser.clone());
        Ok(browser)
    }

    fn forget(&self) {
        if let Ok(mut slot) = self.browser.lock() {
            slot.take();
        }
    }

    fn read(&self) -> Result<String, DocumentError> {
        let browser = self.connected()?;
        let tab = first_tab(&browser)?;
        let result = tab.evaluate(SERIALIZE_DOM_JS, false).map_err(|e| {
            self.forget();
            DocumentError::Source(format!("page evaluation failed: {e}"))
        })?;
        let doc = result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        debug!(chars = doc.len(), url = %tab.get_url(), "read page document");
        Ok(doc)
    }
}

fn first_tab(browser: &Browser) -> Result<Arc<Tab>, DocumentError> {
    let tabs = browser
        .get_tabs()
        .lock()
        .map_err(|_| DocumentError::Source("tab list lock poisoned".into()))?;
    tabs.first()
        .cloned()
        .ok_or_else(|| DocumentError::Source("browser has no open tabs".into()))
}

#[async_trait]
impl DocumentSource for ChromeDocuments {
    fn handles(&self, app: &str) -> bool {
        CHROMIUM_APPS.contains(&app_key(app).as_str())
    }

    async fn structured_document(&self, _app: &str) -> Result<String, DocumentError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.read())
            .await
            .map_err(|e| DocumentError::Source(format!("document task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_chromium_family_is_handled() {
        let docs = ChromeDocuments::new("ws://127.0.0.1:9222/devtools/browser/x");
        assert!(docs.handles("Google Chrome"));
        assert!(docs.handles("msedge.exe"));
        assert!(docs.handles("Google-chrome"));
        assert!(docs.handles("Brave-browser"));
        assert!(docs.handles("Microsoft-edge"));
        assert!(!docs.handles("Safari"));
        assert!(!docs.handles("Firefox"));
    }
}
