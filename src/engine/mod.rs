//! Engine lifecycle and the concurrency shell around mapping evaluation.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
//!                │                        ▲
//!                └── (rollback on any ────┘
//!                     attach failure)
//! ```
//!
//! # Architecture
//!
//! The running engine is one tokio task owning the active profile, the
//! source cache, and the sink. Device events and engine commands arrive
//! over two bounded channels consumed by the same `select!` loop, so
//! profile mutation is serialized against evaluation without a lock, and
//! the sink can never observe a snapshot mixing two profiles. Evaluation
//! happens on receipt of a change notification; there is no tick loop.

use statum::{machine, state};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, DeviceBus, DeviceHook};
use crate::capture::{self, CaptureHandle, CaptureSettings};
use crate::feedback::{self, FeedbackCommand, FeedbackSettings, FeedbackTarget, MotorMode};
use crate::input::{SourceCache, SourceEvent};
use crate::mapping::{evaluate, Binding, MappingProfile, PadOutput};
use crate::sink::{SinkError, VirtualPad};

/// Channel capacities and sub-component settings of one engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub event_capacity: usize,
    pub command_capacity: usize,
    pub rumble_capacity: usize,
    pub capture: CaptureSettings,
    pub feedback: FeedbackSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            event_capacity: 1000,
            command_capacity: 32,
            rumble_capacity: 64,
            capture: CaptureSettings::default(),
            feedback: FeedbackSettings::default(),
        }
    }
}

// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to acquire virtual pad: {0}")]
    Sink(#[from] SinkError),

    #[error("device subscription failed: {0}")]
    Bus(#[from] BusError),

    #[error("engine is not running")]
    NotRunning,

    #[error("a capture session is already active")]
    CaptureActive,

    #[error("engine command channel closed")]
    ChannelClosed,

    #[error("engine task panicked: {0}")]
    TaskPanicked(String),
}

/// Commands consumed by the running engine task, serialized with
/// evaluation by the command queue.
pub enum EngineCommand {
    InsertBinding {
        output: PadOutput,
        binding: Binding,
        ack: oneshot::Sender<()>,
    },
    BeginCapture {
        output: PadOutput,
        ack: oneshot::Sender<Result<CaptureHandle, EngineError>>,
    },
    Feedback(FeedbackCommand),
    Stop {
        ack: oneshot::Sender<()>,
    },
}

#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Stopped,  // Nothing attached
    Starting, // Acquiring sink, subscribing devices, attaching feedback
    Running,  // Consuming events and commands
    Stopping, // Releasing in mandatory order
}

/// The engine with compile-time lifecycle safety via statum.
#[machine]
pub struct PadEngine<S: EngineState> {
    profile: MappingProfile,
    settings: EngineSettings,
    cache: SourceCache,
    sink: Box<dyn VirtualPad>,
    hooks: Vec<DeviceHook>,
    feedback_tx: Option<mpsc::Sender<FeedbackCommand>>,
    feedback_task: Option<JoinHandle<()>>,
    capture_tap: Option<mpsc::Sender<SourceEvent>>,
}

impl<S: EngineState> PadEngine<S> {
    pub fn profile_name(&self) -> &str {
        &self.profile.name
    }
}

impl PadEngine<Stopped> {
    pub fn create(
        profile: MappingProfile,
        settings: EngineSettings,
        sink: Box<dyn VirtualPad>,
    ) -> Self {
        info!("Creating engine for profile: {}", profile.name);
        Self::new(
            profile,
            settings,
            SourceCache::new(),
            sink,
            Vec::new(),
            None, // feedback_tx
            None, // feedback_task
            None, // capture_tap
        )
    }

    pub fn begin_start(self) -> PadEngine<Starting> {
        info!("Starting engine for profile: {}", self.profile.name);
        self.transition()
    }
}

impl PadEngine<Starting> {
    /// Acquires the sink, subscribes every device the profile references,
    /// and spawns the feedback router.
    ///
    /// Any failure rolls back fully: the sink is disconnected and the
    /// hooks collected so far drop with `self`, releasing their
    /// subscriptions. Nothing stays attached after an `Err`.
    pub fn attach(
        mut self,
        bus: &dyn DeviceBus,
        events: mpsc::Sender<SourceEvent>,
        target: Option<FeedbackTarget>,
    ) -> Result<PadEngine<Running>, EngineError> {
        let (rumble_tx, rumble_rx) = mpsc::channel(self.settings.rumble_capacity);

        if let Err(e) = self.sink.connect(rumble_tx) {
            error!("Failed to acquire virtual pad: {}", e);
            return Err(e.into());
        }

        for device in self.profile.device_ids() {
            match bus.subscribe(&device, events.clone()) {
                Ok(hook) => {
                    debug!("Subscribed device {} ({} sources)", device, hook.sources.len());
                    self.cache.install_device(&device, hook.sources.clone());
                    self.hooks.push(hook);
                }
                Err(e) => {
                    error!("Failed to subscribe device {}: {}", device, e);
                    self.sink.disconnect();
                    return Err(e.into());
                }
            }
        }

        let (feedback_tx, feedback_rx) = mpsc::channel(self.settings.command_capacity);
        let feedback_task = feedback::spawn(&self.settings.feedback, rumble_rx, feedback_rx);
        if let Some(target) = target {
            if feedback_tx.try_send(FeedbackCommand::Attach(target)).is_err() {
                warn!("Feedback router rejected initial target");
            }
        }
        self.feedback_tx = Some(feedback_tx);
        self.feedback_task = Some(feedback_task);

        info!(
            "Engine attached: profile {}, {} devices, {} sources",
            self.profile.name,
            self.hooks.len(),
            self.cache.len()
        );
        Ok(self.transition())
    }
}

impl PadEngine<Running> {
    /// Main loop. Runs until a stop command arrives or both channels
    /// close, then hands over to the stopping state.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SourceEvent>,
        mut commands: mpsc::Receiver<EngineCommand>,
    ) -> PadEngine<Stopping> {
        // Present a defined neutral state before the first device event.
        let initial = evaluate(&self.profile, &self.cache);
        if let Err(e) = self.sink.submit(&initial) {
            warn!("Failed to submit initial pad state: {}", e);
        }

        loop {
            tokio::select! {
                maybe = commands.recv() => match maybe {
                    Some(EngineCommand::Stop { ack }) => {
                        info!("Stop requested for profile: {}", self.profile.name);
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        warn!("Command channel closed, stopping engine");
                        break;
                    }
                },
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Event channel closed, stopping engine");
                        break;
                    }
                },
            }
        }

        self.transition()
    }

    // One change notification: tap for capture, refresh the cache, and
    // emit a fresh snapshot if the value really moved.
    fn handle_event(&mut self, event: SourceEvent) {
        if let Some(tap) = &self.capture_tap {
            match tap.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Capture session ended, dropping tap");
                    self.capture_tap = None;
                }
                // Full tap: capture detection is level-based, dropping
                // one event loses nothing the next one doesn't carry.
                Err(mpsc::error::TrySendError::Full(_)) => {}
            }
        }

        if self.cache.apply(&event) {
            let snapshot = evaluate(&self.profile, &self.cache);
            if let Err(e) = self.sink.submit(&snapshot) {
                warn!("Failed to submit pad state: {}", e);
            }
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::InsertBinding {
                output,
                binding,
                ack,
            } => {
                info!(
                    "Binding {}#{} -> {} added to profile {}",
                    binding.device_id, binding.source_index, output, self.profile.name
                );
                self.profile.insert_binding(output, binding);
                // Make the new binding visible without waiting for the
                // next device event.
                let snapshot = evaluate(&self.profile, &self.cache);
                if let Err(e) = self.sink.submit(&snapshot) {
                    warn!("Failed to submit pad state: {}", e);
                }
                let _ = ack.send(());
            }
            EngineCommand::BeginCapture { output, ack } => {
                let _ = ack.send(self.begin_capture(output));
            }
            EngineCommand::Feedback(command) => {
                if let Some(tx) = &self.feedback_tx {
                    if tx.try_send(command).is_err() {
                        warn!("Feedback router not accepting commands");
                    }
                }
            }
            // Stop is consumed by the run loop.
            EngineCommand::Stop { ack } => {
                let _ = ack.send(());
            }
        }
    }

    // One capture session engine-wide: refuse while the previous tap is
    // still alive.
    fn begin_capture(&mut self, output: PadOutput) -> Result<CaptureHandle, EngineError> {
        if let Some(tap) = &self.capture_tap {
            if !tap.is_closed() {
                return Err(EngineError::CaptureActive);
            }
        }

        let taken = self
            .profile
            .mapping(output)
            .map(|m| m.bound_sources().into_iter().collect())
            .unwrap_or_default();
        let (handle, tap) = capture::spawn(output, taken, self.settings.capture.clone());
        self.capture_tap = Some(tap);
        Ok(handle)
    }
}

impl PadEngine<Stopping> {
    /// Releases everything in the mandatory order: device subscriptions,
    /// virtual pad, feedback router.
    pub async fn shutdown(mut self) -> PadEngine<Stopped> {
        info!("Shutting down engine for profile: {}", self.profile.name);

        self.hooks.clear();
        self.cache = SourceCache::new();
        self.sink.disconnect();

        if let Some(tx) = self.feedback_tx.take() {
            let _ = tx.send(FeedbackCommand::Detach).await;
        }
        if let Some(task) = self.feedback_task.take() {
            if let Err(e) = task.await {
                error!("Feedback router task panicked: {}", e);
            }
        }

        // A live capture session loses its feed and reports on its own
        // timer; the caller still holds the handle.
        self.capture_tap = None;

        info!("Engine stopped: {}", self.profile.name);
        self.transition()
    }
}

/// Public handle managing one engine at a time.
///
/// `start` on a running handle performs the profile swap discipline:
/// fully stop the previous profile (device unsubscription, pad
/// disconnect, feedback detach), then start the next one. Two engines
/// never write the same virtual device.
pub struct EngineHandle {
    bus: Arc<dyn DeviceBus>,
    settings: EngineSettings,
    running: Option<RunningEngine>,
}

struct RunningEngine {
    profile_name: String,
    commands: mpsc::Sender<EngineCommand>,
    // Keeps the event channel open while devices come and go.
    _events: mpsc::Sender<SourceEvent>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn new(bus: Arc<dyn DeviceBus>, settings: EngineSettings) -> Self {
        Self {
            bus,
            settings,
            running: None,
        }
    }

    /// Starts `profile` on `sink`, stopping any running profile first.
    /// On failure everything attached so far is rolled back and the
    /// handle is left stopped.
    pub async fn start(
        &mut self,
        profile: MappingProfile,
        sink: Box<dyn VirtualPad>,
        feedback: Option<FeedbackTarget>,
    ) -> Result<(), EngineError> {
        self.stop().await?;

        let (event_tx, event_rx) = mpsc::channel(self.settings.event_capacity);
        let (command_tx, command_rx) = mpsc::channel(self.settings.command_capacity);

        let profile_name = profile.name.clone();
        let engine = PadEngine::create(profile, self.settings.clone(), sink).begin_start();
        let engine = engine.attach(self.bus.as_ref(), event_tx.clone(), feedback)?;

        let task = tokio::spawn(async move {
            let stopping = engine.run(event_rx, command_rx).await;
            let _ = stopping.shutdown().await;
        });

        self.running = Some(RunningEngine {
            profile_name,
            commands: command_tx,
            _events: event_tx,
            task,
        });
        Ok(())
    }

    /// Stops the running profile and waits for the full release. Ok when
    /// nothing was running.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        debug!("Stopping profile: {}", running.profile_name);
        let (ack_tx, ack_rx) = oneshot::channel();
        if running
            .commands
            .send(EngineCommand::Stop { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }

        match running.task.await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Engine task panicked: {}", e);
                Err(EngineError::TaskPanicked(e.to_string()))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.profile_name.as_str())
    }

    /// Adds a binding to the active profile, serialized with evaluation.
    pub async fn insert_binding(
        &self,
        output: PadOutput,
        binding: Binding,
    ) -> Result<(), EngineError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(EngineCommand::InsertBinding {
            output,
            binding,
            ack: ack_tx,
        })
        .await?;
        ack_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Starts an interactive capture for `output`. Fails with
    /// [`EngineError::CaptureActive`] while another session runs.
    pub async fn begin_capture(&self, output: PadOutput) -> Result<CaptureHandle, EngineError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(EngineCommand::BeginCapture {
            output,
            ack: ack_tx,
        })
        .await?;
        ack_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn attach_feedback(&self, target: FeedbackTarget) -> Result<(), EngineError> {
        self.send(EngineCommand::Feedback(FeedbackCommand::Attach(target)))
            .await
    }

    pub async fn detach_feedback(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Feedback(FeedbackCommand::Detach))
            .await
    }

    pub async fn set_motor_mode(&self, mode: MotorMode) -> Result<(), EngineError> {
        self.send(EngineCommand::Feedback(FeedbackCommand::SetMode(mode)))
            .await
    }

    pub async fn set_feedback_gain(&self, gain: f64) -> Result<(), EngineError> {
        self.send(EngineCommand::Feedback(FeedbackCommand::SetGain(gain)))
            .await
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        let Some(running) = &self.running else {
            return Err(EngineError::NotRunning);
        };
        running
            .commands
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}
