//! Scripted collaborators for unit tests.
//!
//! Each fake replays canned results and records what it was asked, so tests
//! can assert which path a cycle took.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::brain::{ActionSynthesizer, OracleReply, OracleRequest, PlanningPolicy};
use crate::controller::CancelFlag;
use crate::error::{CaptureError, DocumentError, ExecutionError, OracleError, ProviderError};
use crate::eyes::{AccessibilityProvider, DocumentSource, ScreenCapturer};
use crate::hands::{ScriptRunner, TaskStorage};
use crate::types::{
    ClickOutcome, ClickableElement, ElementId, IdGrammar, PreparedScript, ScreenSnapshot,
    ScriptDialect, ScriptOutput, Task, WindowInfo,
};

/// Encode a blank PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn element(id: u64, role: &str, title: &str) -> ClickableElement {
    ClickableElement {
        id: ElementId::from(id),
        role: role.to_string(),
        title: title.to_string(),
        description: None,
    }
}

pub fn snapshot() -> ScreenSnapshot {
    ScreenSnapshot {
        image: png(4, 4),
        width: 1440,
        height: 900,
        clickable_elements: Vec::new(),
        foreground_app: "Finder".to_string(),
        foreground_window_title: None,
        structured_document: None,
    }
}

/// Task storage rooted in a fresh temporary directory.
pub fn scratch_storage() -> (tempfile::TempDir, TaskStorage) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = TaskStorage::create(tmp.path(), &Task::new("test task")).expect("storage");
    (tmp, storage)
}

/// Makes the first `calls` invocations of a fake sleep for `delay`.
#[derive(Default)]
pub struct Latency {
    delay: Duration,
    remaining: AtomicUsize,
}

impl Latency {
    pub fn first(calls: usize, delay: Duration) -> Self {
        Self {
            delay,
            remaining: AtomicUsize::new(calls),
        }
    }

    async fn wait(&self) {
        let slow = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if slow {
            tokio::time::sleep(self.delay).await;
        }
    }
}

pub struct ScriptedCapturer {
    frames: Mutex<VecDeque<Option<Vec<u8>>>>,
    fallback: Option<Vec<u8>>,
    calls: AtomicUsize,
    latency: Latency,
}

impl ScriptedCapturer {
    pub fn always(frame: Vec<u8>) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            fallback: Some(frame),
            calls: AtomicUsize::new(0),
            latency: Latency::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
            latency: Latency::default(),
        }
    }

    /// Replay `frames` (`None` = capture failure), then behave like `always(fallback)`.
    pub fn sequence(frames: Vec<Option<Vec<u8>>>, fallback: Vec<u8>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            fallback: Some(fallback),
            calls: AtomicUsize::new(0),
            latency: Latency::default(),
        }
    }

    pub fn slow_first(mut self, calls: usize, delay: Duration) -> Self {
        self.latency = Latency::first(calls, delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenCapturer for ScriptedCapturer {
    async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        let next = self.frames.lock().unwrap().pop_front();
        match next {
            Some(Some(frame)) => Ok(frame),
            Some(None) => Err(CaptureError::CaptureFailed("no display".into())),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| CaptureError::CaptureFailed("no display".into())),
        }
    }
}

pub struct ScriptedAccessibility {
    grammar: IdGrammar,
    elements: Option<Vec<ClickableElement>>,
    foreground: Option<WindowInfo>,
    click: ClickOutcome,
    clicks: Mutex<Vec<ElementId>>,
    listing_latency: Latency,
}

impl ScriptedAccessibility {
    pub fn new() -> Self {
        Self {
            grammar: IdGrammar::Numeric,
            elements: Some(Vec::new()),
            foreground: Some(WindowInfo {
                app_name: "Finder".into(),
                window_title: None,
            }),
            click: ClickOutcome {
                succeeded: true,
                clicked_element: None,
                error: None,
            },
            clicks: Mutex::new(Vec::new()),
            listing_latency: Latency::default(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<ClickableElement>) -> Self {
        self.elements = Some(elements);
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.elements = None;
        self
    }

    pub fn with_foreground(mut self, app: &str, title: Option<&str>) -> Self {
        self.foreground = Some(WindowInfo {
            app_name: app.to_string(),
            window_title: title.map(str::to_string),
        });
        self
    }

    pub fn failing_foreground(mut self) -> Self {
        self.foreground = None;
        self
    }

    pub fn with_click(mut self, outcome: ClickOutcome) -> Self {
        self.click = outcome;
        self
    }

    pub fn slow_listing(mut self, calls: usize, delay: Duration) -> Self {
        self.listing_latency = Latency::first(calls, delay);
        self
    }

    pub fn with_grammar(mut self, grammar: IdGrammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn clicks(&self) -> Vec<ElementId> {
        self.clicks.lock().unwrap().clone()
    }
}

impl Default for ScriptedAccessibility {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessibilityProvider for ScriptedAccessibility {
    fn id_grammar(&self) -> IdGrammar {
        self.grammar
    }

    async fn list_clickable_elements(&self) -> Result<Vec<ClickableElement>, ProviderError> {
        self.listing_latency.wait().await;
        self.elements
            .clone()
            .ok_or_else(|| ProviderError::Helper("accessibility helper crashed".into()))
    }

    async fn click_element(&self, id: &ElementId) -> Result<ClickOutcome, ProviderError> {
        self.clicks.lock().unwrap().push(id.clone());
        Ok(self.click.clone())
    }

    async fn foreground_window(&self) -> Result<WindowInfo, ProviderError> {
        self.foreground
            .clone()
            .ok_or_else(|| ProviderError::Helper("no focused window".into()))
    }
}

pub struct StaticDocuments {
    document: Option<String>,
}

impl StaticDocuments {
    pub fn ok(document: &str) -> Self {
        Self {
            document: Some(document.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { document: None }
    }
}

#[async_trait]
impl DocumentSource for StaticDocuments {
    fn handles(&self, _app: &str) -> bool {
        true
    }

    async fn structured_document(&self, _app: &str) -> Result<String, DocumentError> {
        self.document
            .clone()
            .ok_or_else(|| DocumentError::Source("javascript disabled".into()))
    }
}

/// Replays oracle replies in order. Once exhausted it stops the task.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply, String>>>,
    prompts: Mutex<Vec<String>>,
    latency: Latency,
}

impl ScriptedOracle {
    fn from_results(replies: Vec<Result<OracleReply, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            latency: Latency::default(),
        }
    }

    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| OracleReply::final_text(*t)).collect())
    }

    pub fn failing() -> Self {
        Self::from_results(vec![Err("connection refused".into())])
    }

    /// Calls that time out never consume a scripted reply.
    pub fn slow_first(mut self, calls: usize, delay: Duration) -> Self {
        self.latency = Latency::first(calls, delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    async fn next(&self, request: &OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.latency.wait().await;
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(OracleError::Malformed(message)),
            None => Ok(OracleReply::final_text("Out of scripted replies STOP")),
        }
    }
}

pub type ScriptedPlanner = ScriptedOracle;
pub type ScriptedSynthesizer = ScriptedOracle;

#[async_trait]
impl PlanningPolicy for ScriptedOracle {
    async fn plan_next(&self, request: &OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        self.next(request).await
    }
}

#[async_trait]
impl ActionSynthesizer for ScriptedOracle {
    async fn synthesize_action(
        &self,
        request: &OracleRequest<'_>,
    ) -> Result<OracleReply, OracleError> {
        self.next(request).await
    }
}

pub struct ScriptedScriptRunner {
    output: Option<ScriptOutput>,
    seen: Mutex<Vec<PreparedScript>>,
    latency: Latency,
    cancel_on_run: Option<CancelFlag>,
}

impl ScriptedScriptRunner {
    pub fn ok(stdout: &str) -> Self {
        Self {
            output: Some(ScriptOutput {
                stdout: Some(stdout.to_string()),
                stderr: None,
            }),
            seen: Mutex::new(Vec::new()),
            latency: Latency::default(),
            cancel_on_run: None,
        }
    }

    pub fn stderr(stderr: &str) -> Self {
        Self {
            output: Some(ScriptOutput {
                stdout: None,
                stderr: Some(stderr.to_string()),
            }),
            seen: Mutex::new(Vec::new()),
            latency: Latency::default(),
            cancel_on_run: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            output: None,
            seen: Mutex::new(Vec::new()),
            latency: Latency::default(),
            cancel_on_run: None,
        }
    }

    pub fn slow_first(mut self, calls: usize, delay: Duration) -> Self {
        self.latency = Latency::first(calls, delay);
        self
    }

    /// Raise `cancel` while a script is running.
    pub fn cancelling(mut self, cancel: CancelFlag) -> Self {
        self.cancel_on_run = Some(cancel);
        self
    }

    pub fn seen(&self) -> Vec<PreparedScript> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptRunner for ScriptedScriptRunner {
    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::PowerShell
    }

    async fn run_script(&self, script: &PreparedScript) -> Result<ScriptOutput, ExecutionError> {
        assert!(script.path.exists(), "script file must exist while running");
        self.seen.lock().unwrap().push(script.clone());
        if let Some(cancel) = &self.cancel_on_run {
            cancel.cancel();
        }
        self.latency.wait().await;
        self.output
            .clone()
            .ok_or_else(|| ExecutionError::Unsupported("powershell not installed".into()))
    }
}
