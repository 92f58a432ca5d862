//! Per-OS capability sets, chosen once at startup.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::controller::Capabilities;
use crate::eyes::{AccessibilityProvider, DocumentSource, ScreenCapturer};
use crate::types::ScriptDialect;

pub mod capture;
pub mod cdp;
pub mod command;
pub mod linux;
pub mod macos;
pub mod windows;

/// Serializes `document.body` as `{tag,id,class,role,text,clickable,children}` nodes.
pub const SERIALIZE_DOM_JS: &str = "function serializeDOM(node) { \
if (!node || node.nodeType !== 1) return null; \
const children = [...node.children].map(serializeDOM).filter(Boolean); \
return { tag: node.tagName, id: node.id || null, class: node.className || null, \
role: node.getAttribute('role') || null, text: node.innerText?.trim().slice(0, 100) || null, \
clickable: typeof node.onclick === 'function' || ['A', 'BUTTON'].includes(node.tagName), \
children: children.length ? children : null }; } \
JSON.stringify(serializeDOM(document.body));";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    pub fn dialect(self) -> ScriptDialect {
        match self {
            Platform::MacOs => ScriptDialect::AppleScript,
            Platform::Windows => ScriptDialect::PowerShell,
            Platform::Linux => ScriptDialect::Shell,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlatformOptions {
    /// Directory holding the accessibility helper scripts.
    pub helper_dir: PathBuf,
    /// DevTools websocket of a running Chromium-family browser.
    pub cdp_url: Option<String>,
    /// Use the in-process capturer instead of the OS screenshot tool.
    pub native_capture: bool,
}

pub fn capabilities(platform: Platform, options: &PlatformOptions) -> Capabilities {
    let (capturer, accessibility): (Arc<dyn ScreenCapturer>, Arc<dyn AccessibilityProvider>) =
        match platform {
            Platform::MacOs => (
                Arc::new(capture::CommandCapturer::macos()),
                Arc::new(macos::SwiftAccessibility::new(&options.helper_dir)),
            ),
            Platform::Windows => (
                Arc::new(capture::CommandCapturer::windows()),
                Arc::new(windows::UiaAccessibility::new(&options.helper_dir)),
            ),
            Platform::Linux => (
                Arc::new(capture::CommandCapturer::linux()),
                Arc::new(linux::XdotoolAccessibility),
            ),
        };
    let capturer = native_capturer(options).unwrap_or(capturer);

    let mut documents: Vec<Arc<dyn DocumentSource>> = Vec::new();
    if platform == Platform::MacOs {
        documents.push(Arc::new(macos::SafariDocuments));
    }
    if let Some(url) = &options.cdp_url {
        documents.push(Arc::new(cdp::ChromeDocuments::new(url.clone())));
    }

    info!(?platform, dialect = %platform.dialect(), documents = documents.len(), "platform capabilities ready");
    Capabilities {
        capturer,
        accessibility,
        scripts: Arc::new(command::InterpreterRunner::for_dialect(platform.dialect())),
        documents,
    }
}

#[cfg(feature = "xcap")]
fn native_capturer(options: &PlatformOptions) -> Option<Arc<dyn ScreenCapturer>> {
    options
        .native_capture
        .then(|| Arc::new(capture::native::XcapCapturer) as Arc<dyn ScreenCapturer>)
}

#[cfg(not(feature = "xcap"))]
fn native_capturer(options: &PlatformOptions) -> Option<Arc<dyn ScreenCapturer>> {
    if options.native_capture {
        tracing::warn!("built without the xcap feature, using the OS screenshot tool");
    }
    None
}
