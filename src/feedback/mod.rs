//! Reverse path: vibration from the virtual pad back to the hardware.
//!
//! ```text
//! VirtualPad ──► RumblePulse ──► [mode select] ──► [gain · clamp] ──► target
//!                                                                 (device XOR plugin)
//! ```
//!
//! The router runs in its own task and is fed exclusively through
//! `try_send`, so a slow or disconnected target can never delay the
//! input-evaluation path. Target failures are logged and swallowed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Feedback errors, swallowed at the router boundary
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback target rejected the effect: {0}")]
    PlaybackFailed(String),

    #[error("feedback target is gone: {0}")]
    TargetGone(String),
}

/// One vibration update from the virtual-controller sink, both motors 0..1.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RumblePulse {
    pub large: f64,
    pub small: f64,
}

impl RumblePulse {
    pub fn new(large: f64, small: f64) -> Self {
        Self { large, small }
    }

    pub fn is_silent(&self) -> bool {
        self.large == 0.0 && self.small == 0.0
    }
}

/// Which motor channel drives the physical effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorMode {
    /// Follow the large (low-frequency) motor.
    Large,
    /// Follow the small (high-frequency) motor.
    Small,
    /// Strongest of both channels.
    Combined,
    /// Small becomes primary; for devices that only honor one channel.
    Swap,
}

impl MotorMode {
    pub fn select(self, pulse: RumblePulse) -> f64 {
        match self {
            MotorMode::Large => pulse.large,
            MotorMode::Small => pulse.small,
            MotorMode::Combined => pulse.large.max(pulse.small),
            MotorMode::Swap => pulse.small,
        }
    }
}

/// Whatever actually shakes: a physical device handle or a plugin handler.
pub trait RumbleSink: Send {
    /// Plays a constant-force effect at `level` (0..1, 0 stops).
    fn play(&mut self, level: f64) -> Result<(), FeedbackError>;

    /// Stops any active effect. Idempotent.
    fn stop(&mut self);
}

/// Exactly one of these receives the routed effect, never both.
pub enum FeedbackTarget {
    Device(Box<dyn RumbleSink>),
    Plugin(Box<dyn RumbleSink>),
}

impl FeedbackTarget {
    fn sink(&mut self) -> &mut dyn RumbleSink {
        match self {
            FeedbackTarget::Device(sink) | FeedbackTarget::Plugin(sink) => sink.as_mut(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FeedbackTarget::Device(_) => "device",
            FeedbackTarget::Plugin(_) => "plugin",
        }
    }
}

impl std::fmt::Debug for FeedbackTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FeedbackTarget::{}", self.label())
    }
}

/// Router configuration, part of the engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSettings {
    pub mode: MotorMode,
    /// Multiplied onto the selected level, 0..1.
    pub gain: f64,
    /// Minimum interval between forwarded pulses; None forwards every one.
    pub min_pulse_interval_ms: Option<u64>,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            mode: MotorMode::Combined,
            gain: 1.0,
            min_pulse_interval_ms: None,
        }
    }
}

/// Minimum-interval gate for pulses reaching the hardware.
///
/// Silent pulses always pass: a stop command must never be dropped.
#[derive(Debug, Clone)]
pub struct PulseLimiter {
    min_interval_ms: u64,
    last_pulse: std::time::Instant,
}

impl PulseLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_pulse: std::time::Instant::now() - std::time::Duration::from_secs(1),
        }
    }

    pub fn should_forward(&mut self, pulse: &RumblePulse) -> bool {
        if pulse.is_silent() {
            return true;
        }
        let now = std::time::Instant::now();
        if now.duration_since(self.last_pulse).as_millis() as u64 >= self.min_interval_ms {
            self.last_pulse = now;
            true
        } else {
            false
        }
    }
}

/// Control messages for a running router task.
#[derive(Debug)]
pub enum FeedbackCommand {
    Attach(FeedbackTarget),
    Detach,
    SetMode(MotorMode),
    SetGain(f64),
}

/// Routes pulses from the sink to at most one target.
pub struct RumbleRouter {
    mode: MotorMode,
    gain: f64,
    limiter: Option<PulseLimiter>,
    target: Option<FeedbackTarget>,
}

impl RumbleRouter {
    pub fn new(settings: &FeedbackSettings) -> Self {
        Self {
            mode: settings.mode,
            gain: settings.gain.clamp(0.0, 1.0),
            limiter: settings.min_pulse_interval_ms.map(PulseLimiter::new),
            target: None,
        }
    }

    /// Replaces the routed target, stopping any effect on the previous one
    /// before releasing it.
    pub fn attach(&mut self, target: FeedbackTarget) {
        info!("Attaching feedback target: {}", target.label());
        self.detach();
        self.target = Some(target);
    }

    pub fn detach(&mut self) {
        if let Some(mut previous) = self.target.take() {
            debug!("Detaching feedback target: {}", previous.label());
            previous.sink().stop();
        }
    }

    pub fn set_mode(&mut self, mode: MotorMode) {
        self.mode = mode;
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    /// Applies mode, gain, and clamp, then plays the level on the target.
    /// Best-effort: failures are logged, never propagated.
    pub fn route(&mut self, pulse: RumblePulse) {
        if let Some(limiter) = &mut self.limiter {
            if !limiter.should_forward(&pulse) {
                return;
            }
        }

        let level = (self.mode.select(pulse) * self.gain).clamp(0.0, 1.0);
        if let Some(target) = &mut self.target {
            if let Err(e) = target.sink().play(level) {
                warn!("Feedback target failed, dropping pulse: {}", e);
            }
        }
    }
}

impl Drop for RumbleRouter {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Spawns the router task. Pulses come from the sink, commands from the
/// engine; the task ends when both channels close, detaching on the way
/// out.
pub fn spawn(
    settings: &FeedbackSettings,
    pulses: mpsc::Receiver<RumblePulse>,
    commands: mpsc::Receiver<FeedbackCommand>,
) -> JoinHandle<()> {
    let router = RumbleRouter::new(settings);
    tokio::spawn(run_router(router, pulses, commands))
}

async fn run_router(
    mut router: RumbleRouter,
    mut pulses: mpsc::Receiver<RumblePulse>,
    mut commands: mpsc::Receiver<FeedbackCommand>,
) {
    debug!("Feedback router running");
    loop {
        tokio::select! {
            maybe = commands.recv() => match maybe {
                Some(FeedbackCommand::Attach(target)) => router.attach(target),
                Some(FeedbackCommand::Detach) => router.detach(),
                Some(FeedbackCommand::SetMode(mode)) => router.set_mode(mode),
                Some(FeedbackCommand::SetGain(gain)) => router.set_gain(gain),
                None => break,
            },
            maybe = pulses.recv() => match maybe {
                Some(pulse) => router.route(pulse),
                None => break,
            },
        }
    }
    info!("Feedback router shutting down");
    router.detach();
}
