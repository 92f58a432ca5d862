use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use opus_agent::archive::ArchivedTask;
use opus_agent::{CancelFlag, LoopEvent, TaskArchive};
use serde::Deserialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<LoopEvent>,
    pub archive: Arc<Mutex<TaskArchive>>,
    pub cancel: CancelFlag,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

fn to_sse_event(event: &LoopEvent) -> Event {
    let name = match event {
        LoopEvent::Info { .. } => "info",
        LoopEvent::Complete { .. } => "complete",
        LoopEvent::Failed { .. } => "failed",
    };
    Event::default()
        .event(name)
        .data(serde_json::json!({ "message": event.message() }).to_string())
}

/// Serve the UI and the command/event endpoints on `bind`, or on one of
/// the next nine ports when it is taken.
pub async fn start_server(bind: SocketAddr, state: AppState) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/cancel", post(cancel_handler))
        .route("/tasks", get(tasks_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(Arc::new(state));

    let mut listener = None;
    for offset in 0..10 {
        let addr = SocketAddr::new(bind.ip(), bind.port().saturating_add(offset));
        match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(e) => warn!(%addr, error = %e, "address in use, trying next port"),
        }
    }
    let listener = listener.with_context(|| {
        format!("could not bind {bind} or the nine ports after it; is another agent running?")
    })?;
    let addr = listener.local_addr()?;
    info!("web UI running at http://{addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "web server stopped");
        }
    });

    Ok(addr)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    let command = payload.command.trim().to_string();
    if command.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty command");
    }
    info!(command, "command received");
    match state.cmd_tx.send(command).await {
        Ok(()) => (StatusCode::ACCEPTED, "queued"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "agent is shutting down"),
    }
}

async fn cancel_handler(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    info!("cancel requested");
    state.cancel.cancel();
    (StatusCode::ACCEPTED, "cancelling")
}

async fn tasks_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ArchivedTask>> {
    Json(state.archive.lock().await.to_vec())
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Opus Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #101014; color: #ddd; font-family: system-ui, sans-serif;
         height: 100vh; display: flex; flex-direction: column; }
  header { padding: 18px 28px; border-bottom: 1px solid #222; display: flex; gap: 10px; align-items: center; }
  header h1 { font-size: 18px; color: #fff; }
  #dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  #dot.busy { background: #f59e0b; }
  main { flex: 1; max-width: 760px; width: 100%; margin: 0 auto; padding: 20px 28px;
         display: flex; flex-direction: column; gap: 14px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; background: #17171d; }
  .entry.user { border-left: 3px solid #6366f1; }
  .entry.info { border-left: 3px solid #3b82f6; font-family: monospace; }
  .entry.complete { border-left: 3px solid #22c55e; color: #86efac; }
  .entry.failed { border-left: 3px solid #ef4444; color: #fca5a5; }
  form { display: flex; gap: 8px; }
  input { flex: 1; background: #17171d; border: 1px solid #2a2a33; border-radius: 6px;
          padding: 10px 14px; color: #fff; font-size: 15px; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 6px; padding: 10px 18px; cursor: pointer; }
  button#stop { background: #3a3a44; }
</style>
</head>
<body>
  <header><div id="dot"></div><h1>Opus Agent</h1></header>
  <main>
    <div id="log"></div>
    <form id="form">
      <input id="cmd" placeholder="What should the agent do?" autofocus />
      <button type="submit">Run</button>
      <button type="button" id="stop">Stop</button>
    </form>
  </main>
<script>
  const log = document.getElementById('log');
  const dot = document.getElementById('dot');
  const esc = s => s.replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function add(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  document.getElementById('form').addEventListener('submit', async e => {
    e.preventDefault();
    const cmd = document.getElementById('cmd');
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    add('user', '<strong>Task:</strong> ' + esc(text));
    dot.className = 'busy';
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  });

  document.getElementById('stop').addEventListener('click', () => fetch('/cancel', {method: 'POST'}));

  const events = new EventSource('/events');
  events.addEventListener('info', e => add('info', esc(JSON.parse(e.data).message)));
  events.addEventListener('complete', e => {
    add('complete', '<strong>Done:</strong> ' + esc(JSON.parse(e.data).message));
    dot.className = '';
  });
  events.addEventListener('failed', e => {
    add('failed', '<strong>Failed:</strong> ' + esc(JSON.parse(e.data).message));
    dot.className = '';
  });
</script>
</body>
</html>
"##;
