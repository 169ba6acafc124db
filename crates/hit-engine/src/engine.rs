//! Engine actor: serializes all queue mutation and delivery decisions.
//!
//! The public `HitEngine` handle is cheap to clone and safe to call from any
//! task; every call becomes a command on a channel consumed by a single
//! worker task. Sends run on spawned tasks and post their outcome back as a
//! command, so the worker never blocks on the network and there is never
//! more than one hit in flight.

use crate::{
    BatchGate, Completion, ConfigSnapshot, DeliveryProcessor, EngineConfig, EngineError,
    EngineResult, HttpTransport, PreparedHit, PrivacyStatus, ReorderController, ResponseSink,
    SendOutcome, Transport, WaitDimension,
};
use hit_store::HitStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

const COMMAND_BUFFER: usize = 1024;

enum Command {
    QueueHit {
        payload: String,
        timestamp: f64,
        correlation_id: String,
        backdated: bool,
    },
    WaitFor(WaitDimension),
    Release {
        dimension: WaitDimension,
        context: Option<HashMap<String, String>>,
    },
    Reset,
    Kick {
        forced: bool,
    },
    UpdateConfig(ConfigSnapshot),
    IsWaiting {
        reply: oneshot::Sender<bool>,
    },
    QueueSize {
        reply: oneshot::Sender<EngineResult<usize>>,
    },
    SendResolved {
        epoch: u64,
        hit: PreparedHit,
        outcome: SendOutcome,
    },
    RetryDue {
        epoch: u64,
    },
}

/// Handle to the engine worker task.
#[derive(Clone)]
pub struct HitEngine {
    sender: mpsc::Sender<Command>,
}

impl HitEngine {
    /// Spawn the worker task and return its handle. Fails only if the
    /// persisted cursor cannot be read.
    pub fn new(
        store: Arc<HitStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ResponseSink>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let worker = EngineWorker {
            controller: ReorderController::new(store.clone()),
            processor: DeliveryProcessor::new(store, config.offline_wait_threshold)?,
            gate: BatchGate::new(ConfigSnapshot::default()),
            transport,
            sink,
            config,
            sender: sender.clone(),
            epoch: 0,
            in_flight: false,
            retry_scheduled: false,
            draining: false,
        };
        tokio::spawn(worker.run(receiver));
        Ok(Self { sender })
    }

    /// Construct with the production HTTP transport.
    pub fn with_http_transport(
        store: Arc<HitStore>,
        sink: Arc<dyn ResponseSink>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout));
        Self::new(store, transport, sink, config)
    }

    /// Queue a hit for delivery.
    pub async fn queue_hit(
        &self,
        payload: String,
        timestamp: f64,
        correlation_id: String,
        backdated: bool,
    ) -> EngineResult<()> {
        self.send(Command::QueueHit {
            payload,
            timestamp,
            correlation_id,
            backdated,
        })
        .await
    }

    /// Hold subsequent hits until `dimension` is released.
    pub async fn wait_for(&self, dimension: WaitDimension) -> EngineResult<()> {
        self.send(Command::WaitFor(dimension)).await
    }

    /// Release a wait dimension, optionally supplying context data to merge
    /// into the oldest held hit.
    pub async fn release(
        &self,
        dimension: WaitDimension,
        context: Option<HashMap<String, String>>,
    ) -> EngineResult<()> {
        self.send(Command::Release { dimension, context }).await
    }

    /// Drop all queued hits and clear wait state.
    pub async fn reset(&self) -> EngineResult<()> {
        self.send(Command::Reset).await
    }

    /// Ask the engine to attempt delivery now. `forced` bypasses the batch
    /// limit (but never privacy or configuration checks).
    pub async fn kick(&self, forced: bool) -> EngineResult<()> {
        self.send(Command::Kick { forced }).await
    }

    /// Push a fresh config/privacy snapshot.
    pub async fn update_config(&self, config: ConfigSnapshot) -> EngineResult<()> {
        self.send(Command::UpdateConfig(config)).await
    }

    /// Whether any wait dimension is pending.
    pub async fn is_waiting(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IsWaiting { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Total hits queued across both queues.
    pub async fn queue_size(&self) -> EngineResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::QueueSize { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, command: Command) -> EngineResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

struct EngineWorker {
    controller: ReorderController,
    processor: DeliveryProcessor,
    gate: BatchGate,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ResponseSink>,
    config: EngineConfig,
    sender: mpsc::Sender<Command>,
    /// Bumped on suspension; outcomes and retry timers carrying an older
    /// epoch are ignored.
    epoch: u64,
    in_flight: bool,
    retry_scheduled: bool,
    draining: bool,
}

impl EngineWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        debug!("Engine worker started");
        while let Some(command) = receiver.recv().await {
            self.handle(command);
        }
        debug!("Engine worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::QueueHit {
                payload,
                timestamp,
                correlation_id,
                backdated,
            } => {
                if let Err(e) =
                    self.controller
                        .queue_hit(payload, timestamp, correlation_id, backdated)
                {
                    error!(error = %e, "Failed to queue hit");
                    return;
                }
                self.drive(false);
            }
            Command::WaitFor(dimension) => self.controller.wait_for(dimension),
            Command::Release { dimension, context } => {
                if let Err(e) = self.controller.release(dimension, context) {
                    error!(error = %e, "Failed to release wait dimension");
                    return;
                }
                self.drive(false);
            }
            Command::Reset => {
                self.suspend();
                if let Err(e) = self.controller.reset() {
                    error!(error = %e, "Failed to reset queues");
                }
            }
            Command::Kick { forced } => self.drive(forced),
            Command::UpdateConfig(config) => {
                let opted_out = config.privacy == PrivacyStatus::OptedOut;
                self.gate.update_config(config);
                if opted_out {
                    // Cancel anything scheduled; queued hits stay put.
                    self.suspend();
                } else {
                    self.drive(false);
                }
            }
            Command::IsWaiting { reply } => {
                let _ = reply.send(self.controller.is_waiting());
            }
            Command::QueueSize { reply } => {
                // A store failure must not masquerade as an empty queue.
                let _ = reply.send(self.controller.queue_size());
            }
            Command::SendResolved {
                epoch,
                hit,
                outcome,
            } => self.on_send_resolved(epoch, hit, outcome),
            Command::RetryDue { epoch } => {
                if epoch != self.epoch {
                    return;
                }
                self.retry_scheduled = false;
                self.continue_drain();
            }
        }
    }

    /// Possibly start a drain. No-op while a send or retry timer is pending.
    fn drive(&mut self, forced: bool) {
        if self.in_flight || self.retry_scheduled {
            return;
        }
        if !self.draining {
            // Backpressure is over the main queue only; hits held in the
            // reorder queue must not trip the batch limit.
            let depth = match self.controller.main_size() {
                Ok(depth) => depth,
                Err(e) => {
                    error!(error = %e, "Failed to read main queue depth");
                    return;
                }
            };
            if !self.gate.should_drain(depth, forced) {
                return;
            }
            self.draining = true;
        }
        self.send_next();
    }

    /// Keep an in-progress drain going. Only readiness is re-checked, so a
    /// drain started by crossing the batch limit runs the queue dry.
    fn continue_drain(&mut self) {
        if !self.gate.is_ready() {
            self.draining = false;
            return;
        }
        self.send_next();
    }

    fn send_next(&mut self) {
        let Some(url) = self.gate.config().collect_url.clone() else {
            self.draining = false;
            return;
        };
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let hit = match self.processor.next_sendable(self.gate.config(), now) {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                self.draining = false;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to prepare next hit");
                self.draining = false;
                return;
            }
        };

        self.in_flight = true;
        let epoch = self.epoch;
        let transport = self.transport.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let outcome = match transport.send(&url, &hit.payload).await {
                Ok(response) => SendOutcome::Response(response),
                Err(e) => SendOutcome::Failed(e),
            };
            let _ = sender
                .send(Command::SendResolved {
                    epoch,
                    hit,
                    outcome,
                })
                .await;
        });
    }

    fn on_send_resolved(&mut self, epoch: u64, hit: PreparedHit, outcome: SendOutcome) {
        if epoch != self.epoch {
            debug!(correlation_id = %hit.correlation_id, "Ignoring stale send outcome");
            return;
        }
        self.in_flight = false;

        let completion = match self.processor.complete(&hit, outcome, self.gate.config()) {
            Ok(completion) => completion,
            Err(e) => {
                error!(error = %e, "Failed to record send outcome");
                self.draining = false;
                return;
            }
        };
        match completion {
            Completion::Delivered(Some(response)) => {
                self.sink.on_response(response);
                self.continue_drain();
            }
            Completion::Delivered(None) | Completion::Dropped => self.continue_drain(),
            Completion::Retry => self.schedule_retry(),
        }
    }

    fn schedule_retry(&mut self) {
        self.retry_scheduled = true;
        let epoch = self.epoch;
        let interval = self.config.retry_interval;
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = sender.send(Command::RetryDue { epoch }).await;
        });
    }

    /// Invalidate any in-flight send and pending retry timer.
    fn suspend(&mut self) {
        self.epoch += 1;
        self.in_flight = false;
        self.retry_scheduled = false;
        self.draining = false;
        info!("Delivery suspended");
    }
}
