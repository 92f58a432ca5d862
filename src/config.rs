//! Command-line and environment configuration.
//!
//! `.env` is loaded by the binary before parsing, so every flag with an
//! `env` name can also come from there.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::controller::LoopConfig;
use crate::eyes::PerceptionSettings;
use crate::grid::GridSpec;
use crate::llm::{
    DEFAULT_API_BASE, DEFAULT_MODEL, ModelSettings, PLANNER_TEMPERATURE, SYNTHESIZER_TEMPERATURE,
};
use crate::platform::PlatformOptions;
use crate::types::DOCUMENT_MAX_CHARS;

/// Desktop automation agent driven by a planning model and a scripting model.
#[derive(Parser, Debug, Clone)]
#[command(name = "opus-agent", version, about, long_about = None)]
pub struct AgentArgs {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI-compatible API root
    #[arg(long, env = "OPUS_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    #[arg(long, env = "OPUS_PLANNER_MODEL", default_value = DEFAULT_MODEL)]
    pub planner_model: String,

    #[arg(long, env = "OPUS_SYNTH_MODEL", default_value = DEFAULT_MODEL)]
    pub synth_model: String,

    /// Address for the command/event HTTP server
    #[arg(long, env = "OPUS_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Screenshots and the task archive live here
    #[arg(long, env = "OPUS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory with the accessibility helper scripts
    #[arg(long, env = "OPUS_HELPER_DIR", default_value = "helpers")]
    pub helper_dir: PathBuf,

    /// Stop a task after this many cycles
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// Stop a task after this many seconds
    #[arg(long)]
    pub time_budget_secs: Option<u64>,

    /// Deadline for each capture, accessibility, model or script call
    #[arg(long)]
    pub call_timeout_secs: Option<u64>,

    /// Pause before retrying a failed perception
    #[arg(long, default_value_t = 1000)]
    pub perception_retry_ms: u64,

    #[arg(long, default_value_t = 100)]
    pub grid_pitch: u32,

    #[arg(long, default_value_t = 5)]
    pub grid_radius: u32,

    /// Resize screenshots to this width (requires --screen-height)
    #[arg(long, requires = "screen_height")]
    pub screen_width: Option<u32>,

    #[arg(long, requires = "screen_width")]
    pub screen_height: Option<u32>,

    #[arg(long, default_value_t = DOCUMENT_MAX_CHARS)]
    pub document_max_chars: usize,

    /// DevTools websocket URL of a running Chromium browser
    #[arg(long, env = "OPUS_CDP_URL")]
    pub cdp_url: Option<String>,

    /// Capture in-process (needs the `xcap` feature)
    #[arg(long)]
    pub native_capture: bool,

    /// Finished tasks kept in the archive
    #[arg(long, default_value_t = 50)]
    pub archive_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub archive_capacity: usize,
    pub planner: ModelSettings,
    pub synthesizer: ModelSettings,
    pub run: LoopConfig,
    pub platform: PlatformOptions,
}

impl AgentArgs {
    pub fn into_config(self) -> Result<AgentConfig> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .context("OPENAI_API_KEY not set in environment")?;
        let data_dir = match self.data_dir {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .context("no local data directory; set OPUS_DATA_DIR")?
                .join("opus-agent"),
        };

        let model = |model: String, temperature: f32| ModelSettings {
            api_base: self.api_base.clone(),
            api_key: api_key.clone(),
            model,
            temperature,
        };
        let planner = model(self.planner_model, PLANNER_TEMPERATURE);
        let synthesizer = model(self.synth_model, SYNTHESIZER_TEMPERATURE);

        let perception = PerceptionSettings {
            grid: GridSpec {
                pitch: self.grid_pitch.max(1),
                radius: self.grid_radius,
                ..GridSpec::default()
            },
            resize_to: self.screen_width.zip(self.screen_height),
            document_max_chars: self.document_max_chars,
            call_timeout: None,
        };
        let run = LoopConfig {
            data_dir: data_dir.clone(),
            perception,
            perception_retry: Duration::from_millis(self.perception_retry_ms),
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
            max_cycles: self.max_cycles,
            time_budget: self.time_budget_secs.map(Duration::from_secs),
        };

        Ok(AgentConfig {
            bind: self.bind,
            data_dir,
            archive_capacity: self.archive_capacity,
            planner,
            synthesizer,
            run,
            platform: PlatformOptions {
                helper_dir: self.helper_dir,
                cdp_url: self.cdp_url,
                native_capture: self.native_capture,
            },
        })
    }
}
