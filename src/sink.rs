//! Boundary to the virtual-controller sink.
//!
//! The sink presents the emulated pad to the operating system (a ViGEm-style
//! bus driver, an uinput device, or a test double). The engine connects it
//! once per lifecycle, submits one [`PadState`](crate::mapping::PadState)
//! per evaluation, and receives vibration updates through the rumble sender
//! handed over at connect time.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::feedback::RumblePulse;
use crate::mapping::PadState;

// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("virtual pad unavailable: {0}")]
    Unavailable(String),

    #[error("failed to submit pad state: {0}")]
    SubmitFailed(String),
}

/// Fixed-shape contract of the virtual-controller sink.
pub trait VirtualPad: Send {
    /// Acquires the virtual device. The sink keeps `rumble` and pushes one
    /// pulse per vibration update it receives from the OS side; it must use
    /// `try_send` so a stalled engine never blocks the driver callback.
    fn connect(&mut self, rumble: mpsc::Sender<RumblePulse>) -> Result<(), SinkError>;

    /// Presents one evaluated snapshot to the OS.
    fn submit(&mut self, state: &PadState) -> Result<(), SinkError>;

    /// Releases the virtual device. Idempotent.
    fn disconnect(&mut self);
}
