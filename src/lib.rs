//! padbridge maps physical input devices (wheels, joysticks, gamepads,
//! pedals) onto one virtual game controller and routes force feedback back
//! to the hardware.
//!
//! ```text
//! DeviceBus ──► SourceEvent ──► SourceCache ──► evaluate ──► PadState ──► VirtualPad
//!                    │                                                        │
//!              capture tap                                               RumblePulse
//!                    ▼                                                        ▼
//!              CaptureSession                                           RumbleRouter ──► FeedbackTarget
//! ```
//!
//! Device enumeration, the UI, and profile persistence are external
//! collaborators: the first one feeds [`bus::DeviceBus`] subscriptions,
//! the last one loads and saves [`mapping::MappingProfile`] values. The
//! engine itself is started and swapped through [`engine::EngineHandle`].

pub mod bus;
pub mod capture;
pub mod engine;
pub mod feedback;
pub mod input;
pub mod mapping;
pub mod sink;

pub use bus::{BusError, DeviceBus, DeviceHook};
pub use capture::{CaptureHandle, CaptureOutcome, CaptureSettings};
pub use engine::{EngineError, EngineHandle, EngineSettings};
pub use feedback::{FeedbackSettings, FeedbackTarget, MotorMode, RumblePulse, RumbleSink};
pub use input::{Source, SourceCache, SourceEvent, SourceId, SourceKind};
pub use mapping::{evaluate, Binding, MappingProfile, OutputKind, OutputMapping, PadOutput, PadState};
