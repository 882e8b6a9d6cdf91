//! Workflow engine façade.
//!
//! [`WorkflowEngine`] owns at most one live run. `start_run` opens a
//! channel through the injected [`Transport`] and spawns a pump task
//! that feeds channel messages, one at a time, into
//! [`WorkflowRun::apply`]. After every state change the engine
//! publishes an immutable [`Snapshot`] on a
//! [`tokio::sync::broadcast`] channel. Call [`WorkflowEngine::subscribe`]
//! to receive them.

use std::sync::Arc;

use advisor_core::run::{Outcome, RunInput, WorkflowRun};
use advisor_core::snapshot::{Renderer, Snapshot};
use advisor_core::stages::StageRegistry;
use advisor_core::types::RunId;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::session::SessionStore;
use crate::transport::{ChannelHandle, ChannelMessage, Transport, TransportError};

/// Drives one workflow run at a time and publishes its snapshots.
pub struct WorkflowEngine {
    registry: Arc<StageRegistry>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    /// Master cancellation token -- cancelled on dispose.
    cancel: CancellationToken,
}

/// State reachable from both the engine and its pump task.
struct Shared {
    state: Mutex<EngineState>,
    snapshot_tx: broadcast::Sender<Arc<Snapshot>>,
    session: Arc<dyn SessionStore>,
    config: EngineConfig,
}

#[derive(Default)]
struct EngineState {
    run: Option<WorkflowRun>,
    latest: Option<Arc<Snapshot>>,
    disposed: bool,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<StageRegistry>,
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionStore>,
        config: EngineConfig,
    ) -> Self {
        let (snapshot_tx, _) = broadcast::channel(config.snapshot_capacity.max(1));
        Self {
            registry,
            transport,
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                snapshot_tx,
                session,
                config,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to snapshots. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Most recently published snapshot, if any run has started.
    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.state.lock().await.latest.clone()
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Start a fresh run for `subject_id`.
    ///
    /// Rejected with [`EngineError::AlreadyRunning`] while the current run
    /// has not reached a terminal state; the existing run is left
    /// untouched. If the channel cannot be opened the run is failed
    /// through the classifier and the transport error is returned.
    /// Dropping the future before the channel opens fails the run as a
    /// connectivity loss, so a later `start_run` can proceed.
    pub async fn start_run(&self, subject_id: &str) -> Result<RunId, EngineError> {
        let run_id = uuid::Uuid::new_v4();

        {
            let mut state = self.shared.state.lock().await;
            if state.disposed {
                return Err(EngineError::Disposed);
            }
            if let Some(current) = &state.run {
                if !current.status().is_terminal() {
                    return Err(EngineError::AlreadyRunning {
                        subject_id: current.subject_id().to_string(),
                        run_id: current.run_id(),
                    });
                }
            }

            let run = WorkflowRun::new(run_id, subject_id, Arc::clone(&self.registry), Utc::now());
            state.run = Some(run);
            self.shared.publish(&mut state);
        }

        tracing::info!(run_id = %run_id, subject_id, "Starting workflow run");

        // Fails the run if this future is dropped before the pump owns it.
        let pending = PendingOpen {
            shared: Arc::clone(&self.shared),
            run_id,
            armed: true,
        };

        let token = self.shared.session.token();
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Disposed),
            opened = self.transport.open(subject_id, token.as_deref()) => opened,
        };

        let channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                pending.disarm();
                tracing::error!(run_id = %run_id, subject_id, error = %e, "Failed to open workflow stream");
                let input = RunInput::Failed {
                    signal: e.to_signal(),
                    at: Utc::now(),
                };
                if let Some(Outcome::Terminal { end_session: true }) =
                    Shared::apply(&self.shared, run_id, input).await
                {
                    Shared::schedule_session_teardown(&self.shared);
                }
                return Err(EngineError::Open(e));
            }
        };

        pending.disarm();
        let pump_cancel = self.cancel.child_token();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            pump(shared, run_id, channel, pump_cancel).await;
            tracing::debug!(run_id = %run_id, "Workflow pump exited");
        });

        Ok(run_id)
    }

    /// Stop dispatching and close the channel. Events that arrive later
    /// are dropped. Idempotent.
    pub async fn dispose(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        self.cancel.cancel();
        tracing::info!("Workflow engine disposed");
    }

    pub async fn is_disposed(&self) -> bool {
        self.shared.state.lock().await.disposed
    }
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    /// Apply one input to the current run and publish if state changed.
    ///
    /// Returns `None` when the input no longer belongs to a live run:
    /// the engine was disposed or a newer run replaced this one.
    async fn apply(shared: &Arc<Shared>, run_id: RunId, input: RunInput) -> Option<Outcome> {
        let mut state = shared.state.lock().await;
        shared.apply_locked(&mut state, run_id, input)
    }

    fn apply_locked(
        &self,
        state: &mut EngineState,
        run_id: RunId,
        input: RunInput,
    ) -> Option<Outcome> {
        if state.disposed {
            return None;
        }
        let run = state.run.as_mut().filter(|r| r.run_id() == run_id)?;
        let outcome = run.apply(input);
        if outcome.changed_state() {
            self.publish(state);
        }
        Some(outcome)
    }

    fn publish(&self, state: &mut EngineState) {
        let Some(run) = &state.run else {
            return;
        };
        let snapshot = Arc::new(run.snapshot());
        state.latest = Some(Arc::clone(&snapshot));
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.snapshot_tx.send(snapshot);
    }

    /// End the session after the configured delay so the failure message
    /// stays readable first.
    fn schedule_session_teardown(shared: &Arc<Shared>) {
        let session = Arc::clone(&shared.session);
        let delay = shared.config.session_teardown_delay;
        tracing::warn!(
            delay_ms = delay.as_millis() as u64,
            "Authorization failed, ending session after delay",
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.end_session();
        });
    }
}

/// Armed while `start_run` waits on the transport. If the caller drops
/// that future, the run is failed as a connectivity loss so the slot does
/// not stay `idle` forever.
struct PendingOpen {
    shared: Arc<Shared>,
    run_id: RunId,
    armed: bool,
}

impl PendingOpen {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingOpen {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(run_id = %self.run_id, "Run abandoned before the stream opened");
        let input = RunInput::Disconnected { at: Utc::now() };

        match self.shared.state.try_lock() {
            Ok(mut state) => {
                self.shared.apply_locked(&mut state, self.run_id, input);
            }
            Err(_) => {
                // Someone holds the lock; finish the job on the runtime.
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    return;
                };
                let shared = Arc::clone(&self.shared);
                let run_id = self.run_id;
                handle.spawn(async move {
                    Shared::apply(&shared, run_id, input).await;
                });
            }
        }
    }
}

/// Feed channel messages into the run until it finishes, the channel
/// ends, or the engine is disposed.
async fn pump(
    shared: Arc<Shared>,
    run_id: RunId,
    mut channel: ChannelHandle,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = channel.recv() => message,
        };

        let channel_ended = !matches!(message, ChannelMessage::Event(_));
        let input = match message {
            ChannelMessage::Event(event) => RunInput::Event(event),
            ChannelMessage::Disconnected => RunInput::Disconnected { at: Utc::now() },
            ChannelMessage::Closed => RunInput::ChannelClosed { at: Utc::now() },
        };

        match Shared::apply(&shared, run_id, input).await {
            None => break,
            Some(Outcome::Terminal { end_session }) => {
                if end_session {
                    Shared::schedule_session_teardown(&shared);
                }
                break;
            }
            Some(_) if channel_ended => break,
            Some(_) => {}
        }
    }

    channel.close();
}

/// Render every snapshot from `receiver` until one is terminal.
///
/// Returns the terminal snapshot, or `None` if the engine went away
/// first. Lagging receivers skip ahead and keep rendering.
pub async fn drive_renderer<R: Renderer>(
    mut receiver: broadcast::Receiver<Arc<Snapshot>>,
    renderer: &mut R,
) -> Option<Arc<Snapshot>> {
    loop {
        match receiver.recv().await {
            Ok(snapshot) => {
                renderer.render(&snapshot);
                if snapshot.is_terminal() {
                    return Some(snapshot);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Renderer fell behind, skipping snapshots");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Errors returned by the engine façade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A run is still live.
    #[error("A workflow run ({run_id}) is already in progress for subject {subject_id}")]
    AlreadyRunning { subject_id: String, run_id: RunId },

    /// The engine was disposed.
    #[error("Workflow engine has been disposed")]
    Disposed,

    /// The channel could not be opened.
    #[error("Failed to open workflow stream: {0}")]
    Open(#[from] TransportError),
}
