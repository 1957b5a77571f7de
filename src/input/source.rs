use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Smallest value movement that counts as a change. Anything below this is
/// analog jitter and must not trigger re-evaluation.
pub const CHANGE_EPSILON: f64 = 1e-4;

// Kind of physical input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Button,
    Axis,
    Slider,
    DPad,
}

impl SourceKind {
    /// Rest value of a channel of this kind (axes center at 0.5).
    pub fn rest_value(self) -> f64 {
        match self {
            SourceKind::Axis => 0.5,
            _ => 0.0,
        }
    }
}

/// Identity of one channel on one device. The device id is the stable,
/// opaque string handed out by the device collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId {
    pub device: String,
    pub index: u32,
}

impl SourceId {
    pub fn new(device: impl Into<String>, index: u32) -> Self {
        Self {
            device: device.into(),
            index,
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.device, self.index)
    }
}

// Change notification from the device collaborator, values normalized to 0..1
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub device: String,
    pub index: u32,
    pub value: f64,
    pub timestamp: DateTime<Local>,
}

impl SourceEvent {
    pub fn new(device: impl Into<String>, index: u32, value: f64) -> Self {
        Self {
            device: device.into(),
            index,
            value,
            timestamp: Local::now(),
        }
    }

    pub fn source_id(&self) -> SourceId {
        SourceId::new(self.device.clone(), self.index)
    }
}

/// One physical input channel with its deadzone configuration and the last
/// value it settled on.
///
/// Values are normalized: `0..1` for everything, with `0.5` as the center
/// position of an `Axis`. Buttons and d-pad directions report `0` or `1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub index: u32,
    pub name: String,
    pub kind: SourceKind,
    pub deadzone: f64,
    pub value: f64,
}

impl Source {
    pub fn new(index: u32, name: impl Into<String>, kind: SourceKind, deadzone: f64) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            deadzone,
            value: kind.rest_value(),
        }
    }

    /// Applies the deadzone to an incoming raw value and stores the result.
    ///
    /// Returns the applied value and whether it moved more than
    /// [`CHANGE_EPSILON`] away from the previous one. Buttons and d-pad
    /// directions pass through untouched; sliders get an edge deadzone at
    /// both ends; axes get a center deadzone around 0.5. Deadzones outside
    /// `0..0.5` are applied as-is, that contract sits with the caller.
    pub fn refresh(&mut self, new_value: f64) -> (f64, bool) {
        let applied = match self.kind {
            SourceKind::Button | SourceKind::DPad => new_value,
            SourceKind::Slider => {
                if new_value < self.deadzone {
                    0.0
                } else if new_value > 1.0 - self.deadzone {
                    1.0
                } else {
                    new_value
                }
            }
            SourceKind::Axis => {
                if (new_value - 0.5).abs() < self.deadzone {
                    0.5
                } else {
                    new_value
                }
            }
        };

        let changed = (applied - self.value).abs() > CHANGE_EPSILON;
        self.value = applied;
        (applied, changed)
    }
}
