//! Interactive binding capture: "press the control you want" with noise
//! rejection.
//!
//! A session runs in its own tokio task, fed by a tap on the engine's raw
//! event stream. The statum machine has two phases:
//!
//! ```text
//! Settling ──(grace period over)──► Listening ──► Captured | TimedOut | Cancelled
//!    │                                  │
//!  record baselines               AlreadyBound reports (session keeps listening)
//! ```
//!
//! During the settling grace period every event only records that source's
//! baseline, so transient power-on values cannot trigger a capture. After
//! that, an event is significant relative to the recorded baseline and the
//! target output's kind. A significant event on a source already bound to
//! the target is reported as [`CaptureOutcome::AlreadyBound`] and the
//! session stays alive; the session itself ends only on success, cancel,
//! or timeout.

use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::input::{SourceEvent, SourceId};
use crate::mapping::output::{OutputKind, PadOutput};
use crate::mapping::Binding;

/// Detection thresholds and timing of a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Baseline grace period after entering capture, in milliseconds.
    pub grace_ms: u64,
    /// Session timeout measured from entering capture, in milliseconds.
    pub timeout_ms: u64,
    /// Raw level a button-kind target must exceed.
    pub button_level: f64,
    /// Deflection from baseline an axis-kind target must exceed.
    pub axis_delta: f64,
    /// Absolute floor a trigger-kind target must additionally clear.
    pub trigger_floor: f64,
    /// Capacity of the event tap feeding the session.
    pub tap_capacity: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            grace_ms: 300,
            timeout_ms: 10_000,
            button_level: 0.7,
            axis_delta: 0.4,
            trigger_floor: 0.5,
            tap_capacity: 64,
        }
    }
}

impl CaptureSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What a capture session reported.
///
/// A session emits zero or more `AlreadyBound` notices followed by exactly
/// one terminal outcome (`Captured`, `TimedOut`, or `Cancelled`). Callers
/// branch on the outcome; none of these is an error.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// A new binding was learned. Apply it via
    /// `EngineHandle::insert_binding` to make it live.
    Captured(Binding),
    /// The moved source already feeds the target output.
    AlreadyBound(SourceId),
    /// Nothing significant moved within the timeout.
    TimedOut,
    Cancelled,
}

// What Listening::observe concluded about one event
enum Detection {
    Bound(Binding),
    Occupied(SourceId),
}

#[state]
#[derive(Debug, Clone)]
pub enum CapturePhase {
    Settling,
    Listening,
}

/// Capture state machine. Phase transitions are compile-time checked; the
/// driving task in [`spawn`] owns the timers.
#[machine]
pub struct CaptureSession<S: CapturePhase> {
    target: PadOutput,
    taken: HashSet<SourceId>,
    baseline: HashMap<SourceId, f64>,
    settings: CaptureSettings,
}

impl<S: CapturePhase> CaptureSession<S> {
    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn target(&self) -> PadOutput {
        self.target
    }
}

impl CaptureSession<Settling> {
    pub fn begin(target: PadOutput, taken: HashSet<SourceId>, settings: CaptureSettings) -> Self {
        info!(
            "Starting capture for {} ({} sources already bound)",
            target,
            taken.len()
        );
        Self::new(target, taken, HashMap::new(), settings)
    }

    /// Records an event as its source's baseline. Settling never detects.
    pub fn absorb(&mut self, event: &SourceEvent) {
        self.baseline.insert(event.source_id(), event.value);
    }

    pub fn listen(self) -> CaptureSession<Listening> {
        debug!("Grace period over, {} baselines recorded", self.baseline.len());
        self.transition()
    }
}

impl CaptureSession<Listening> {
    // Checks one event for significance against its baseline and the
    // target kind. First contact with a source only records its baseline.
    fn observe(&mut self, event: &SourceEvent) -> Option<Detection> {
        let id = event.source_id();
        let Some(baseline) = self.baseline.get(&id).copied() else {
            debug!("Late baseline for {}: {:.3}", id, event.value);
            self.baseline.insert(id, event.value);
            return None;
        };

        let significant = match self.target.kind() {
            OutputKind::Button => event.value > self.settings.button_level,
            OutputKind::Axis => (event.value - baseline).abs() > self.settings.axis_delta,
            OutputKind::Trigger => {
                (event.value - baseline).abs() > self.settings.axis_delta
                    && event.value > self.settings.trigger_floor
            }
        };
        if !significant {
            return None;
        }

        if self.taken.contains(&id) {
            info!("Source {} is already bound to {}", id, self.target);
            return Some(Detection::Occupied(id));
        }

        info!("Captured {} for {} (value {:.3})", id, self.target, event.value);
        Some(Detection::Bound(Binding::new(id.device, id.index)))
    }
}

/// Caller side of a running capture session.
pub struct CaptureHandle {
    reports: mpsc::Receiver<CaptureOutcome>,
    cancel: Option<oneshot::Sender<()>>,
}

impl CaptureHandle {
    /// Next report from the session; `None` once the task is gone after a
    /// terminal outcome.
    pub async fn next(&mut self) -> Option<CaptureOutcome> {
        self.reports.recv().await
    }

    /// Waits for the terminal outcome, skipping `AlreadyBound` notices.
    pub async fn wait(mut self) -> CaptureOutcome {
        loop {
            match self.reports.recv().await {
                Some(CaptureOutcome::AlreadyBound(id)) => {
                    debug!("Ignoring already-bound notice for {}", id);
                }
                Some(outcome) => return outcome,
                // Task gone without a terminal report: treat as cancelled.
                None => return CaptureOutcome::Cancelled,
            }
        }
    }

    /// Cancels the session. The terminal `Cancelled` report follows.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Spawns a capture task for `target` and returns the caller handle plus
/// the event tap the engine forwards raw events into.
pub fn spawn(
    target: PadOutput,
    taken: HashSet<SourceId>,
    settings: CaptureSettings,
) -> (CaptureHandle, mpsc::Sender<SourceEvent>) {
    let (event_tx, event_rx) = mpsc::channel(settings.tap_capacity);
    let (report_tx, report_rx) = mpsc::channel(8);
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let session = CaptureSession::begin(target, taken, settings);
    tokio::spawn(run_capture(session, event_rx, report_tx, cancel_rx));

    (
        CaptureHandle {
            reports: report_rx,
            cancel: Some(cancel_tx),
        },
        event_tx,
    )
}

async fn run_capture(
    mut session: CaptureSession<Settling>,
    mut events: mpsc::Receiver<SourceEvent>,
    reports: mpsc::Sender<CaptureOutcome>,
    mut cancel: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let grace_over = started + session.settings().grace();
    let deadline = started + session.settings().timeout();

    // Settling: swallow everything as baseline until the grace period ends.
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(grace_over) => break,
            _ = &mut cancel => {
                info!("Capture cancelled during grace period");
                let _ = reports.send(CaptureOutcome::Cancelled).await;
                return;
            }
            maybe = events.recv() => match maybe {
                Some(event) => session.absorb(&event),
                None => {
                    warn!("Capture tap closed during grace period");
                    let _ = reports.send(CaptureOutcome::Cancelled).await;
                    return;
                }
            }
        }
    }

    let mut session = session.listen();

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                info!("Capture for {} timed out", session.target());
                let _ = reports.send(CaptureOutcome::TimedOut).await;
                return;
            }
            _ = &mut cancel => {
                info!("Capture for {} cancelled", session.target());
                let _ = reports.send(CaptureOutcome::Cancelled).await;
                return;
            }
            maybe = events.recv() => match maybe {
                Some(event) => match session.observe(&event) {
                    Some(Detection::Bound(binding)) => {
                        let _ = reports.send(CaptureOutcome::Captured(binding)).await;
                        return;
                    }
                    Some(Detection::Occupied(id)) => {
                        let _ = reports.send(CaptureOutcome::AlreadyBound(id)).await;
                    }
                    None => {}
                },
                None => {
                    warn!("Capture tap closed while listening");
                    let _ = reports.send(CaptureOutcome::Cancelled).await;
                    return;
                }
            }
        }
    }
}
