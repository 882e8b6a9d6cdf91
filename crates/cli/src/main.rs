//! `advisor` -- stream a trading recommendation for one subject.
//!
//! Opens the workflow stream for the given subject, logs stage progress
//! as it arrives, and prints the final recommendation as JSON on stdout.
//!
//! # Usage
//!
//! ```text
//! advisor <subject-id>
//! ```
//!
//! # Environment variables
//!
//! | Variable                      | Required | Default               | Description                          |
//! |-------------------------------|----------|-----------------------|--------------------------------------|
//! | `ADVISOR_WS_URL`              | no       | `ws://localhost:3000` | WebSocket base URL                   |
//! | `ADVISOR_TOKEN`               | no       | --                    | Bearer token for the stream          |
//! | `ADVISOR_STAGES_FILE`         | no       | --                    | JSON stage definitions               |
//! | `ADVISOR_SESSION_TEARDOWN_MS` | no       | `4000`                | Delay before an auth failure exits   |
//!
//! Exit codes: `0` on a recommendation, `1` on a failed run, `2` on bad
//! usage, `130` when interrupted.

mod render;

use std::sync::Arc;

use advisor_client::{
    drive_renderer, EngineConfig, EngineError, MemorySession, WorkflowEngine, WsTransport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::render::LogRenderer;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "advisor=info,advisor_client=info,advisor_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let subject_id = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: advisor <subject-id>");
        std::process::exit(2);
    });

    let config = EngineConfig::from_env();
    let registry = config.load_registry().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid stage configuration");
        std::process::exit(1);
    });
    let registry = Arc::new(registry);

    let token = std::env::var("ADVISOR_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());
    let session = Arc::new(MemorySession::new(token));
    let transport = Arc::new(WsTransport::new(config.ws_url.clone(), config.event_buffer));

    tracing::info!(
        subject_id = %subject_id,
        ws_url = %config.ws_url,
        stage_count = registry.len(),
        "Starting advisor",
    );

    let engine = WorkflowEngine::new(Arc::clone(&registry), transport, session.clone(), config);

    // Subscribe first so the renderer sees every snapshot, including a
    // failure raised while opening the stream.
    let receiver = engine.subscribe();

    match engine.start_run(&subject_id).await {
        Ok(run_id) => tracing::debug!(run_id = %run_id, "Run started"),
        // The failed snapshot is already queued for the renderer.
        Err(EngineError::Open(_)) => {}
        Err(e) => {
            tracing::error!(error = %e, "Could not start workflow run");
            std::process::exit(1);
        }
    }

    let mut renderer = LogRenderer::new(registry);
    let last = tokio::select! {
        last = drive_renderer(receiver, &mut renderer) => last,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
            engine.dispose().await;
            std::process::exit(130);
        }
    };

    engine.dispose().await;

    let Some(snapshot) = last else {
        tracing::error!("Workflow engine stopped before the run finished");
        std::process::exit(1);
    };

    if let Some(result) = &snapshot.result {
        match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize recommendation");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Some(failure) = &snapshot.failure {
        if failure.ends_session() {
            // Keep the message on screen until the session is torn down.
            session.ended().await;
        }
    }
    std::process::exit(1);
}
