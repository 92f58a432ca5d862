mod face;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use opus_agent::archive::ARCHIVE_FILE;
use opus_agent::llm::{OpenAiOracle, OracleRole};
use opus_agent::platform::{self, Platform};
use opus_agent::{
    AgentArgs, CancelFlag, LoopController, LoopEvent, LoopOutcome, Oracles, TaskArchive, logging,
};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    logging::init();

    let config = AgentArgs::parse().into_config()?;
    info!(data_dir = %config.data_dir.display(), "starting agent");

    let archive_path = config.data_dir.join(ARCHIVE_FILE);
    let archive = TaskArchive::open(&archive_path, config.archive_capacity)
        .with_context(|| format!("could not load task archive {}", archive_path.display()))?;
    let archive = Arc::new(Mutex::new(archive));

    let platform = Platform::current();
    let capabilities = platform::capabilities(platform, &config.platform);
    let client = reqwest::Client::new();
    let dialect = platform.dialect();
    let oracles = Oracles {
        planner: Arc::new(OpenAiOracle::new(
            client.clone(),
            config.planner.clone(),
            OracleRole::Planner,
            dialect,
        )),
        synthesizer: Arc::new(OpenAiOracle::new(
            client,
            config.synthesizer.clone(),
            OracleRole::Synthesizer,
            dialect,
        )),
    };

    let (event_tx, _) = broadcast::channel::<LoopEvent>(64);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);
    let cancel = CancelFlag::new();

    face::start_server(
        config.bind,
        face::AppState {
            cmd_tx,
            event_tx: event_tx.clone(),
            archive: archive.clone(),
            cancel: cancel.clone(),
        },
    )
    .await?;

    let controller = LoopController::new(capabilities, oracles, config.run, archive, event_tx);
    info!("waiting for commands");

    // Tasks run one at a time, in arrival order.
    while let Some(command) = cmd_rx.recv().await {
        cancel.reset();
        match controller.start_task(&command, &cancel).await {
            Ok(LoopOutcome::Completed { cycles, .. }) => info!(cycles, "task done"),
            Ok(outcome) => info!(?outcome, "task ended early"),
            Err(e) => error!(error = %e, "task aborted"),
        }
    }

    Ok(())
}
