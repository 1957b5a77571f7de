use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::input::SourceId;
use crate::mapping::binding::Binding;

/// One output of the virtual pad. The set is fixed: an emulated X360-class
/// controller has exactly these controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadOutput {
    A,
    B,
    X,
    Y,
    LeftBumper,
    RightBumper,
    Back,
    Start,
    Guide,
    LeftThumb,
    RightThumb,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
}

/// Aggregation class of an output. Classification is a pure function of the
/// output itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Button,
    Axis,
    Trigger,
}

impl PadOutput {
    pub const ALL: [PadOutput; 21] = [
        PadOutput::A,
        PadOutput::B,
        PadOutput::X,
        PadOutput::Y,
        PadOutput::LeftBumper,
        PadOutput::RightBumper,
        PadOutput::Back,
        PadOutput::Start,
        PadOutput::Guide,
        PadOutput::LeftThumb,
        PadOutput::RightThumb,
        PadOutput::DPadUp,
        PadOutput::DPadDown,
        PadOutput::DPadLeft,
        PadOutput::DPadRight,
        PadOutput::LeftStickX,
        PadOutput::LeftStickY,
        PadOutput::RightStickX,
        PadOutput::RightStickY,
        PadOutput::LeftTrigger,
        PadOutput::RightTrigger,
    ];

    pub fn kind(self) -> OutputKind {
        match self {
            PadOutput::LeftStickX
            | PadOutput::LeftStickY
            | PadOutput::RightStickX
            | PadOutput::RightStickY => OutputKind::Axis,
            PadOutput::LeftTrigger | PadOutput::RightTrigger => OutputKind::Trigger,
            _ => OutputKind::Button,
        }
    }
}

impl fmt::Display for PadOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Every binding feeding one virtual output.
///
/// Insertion order matters: it is the tie-break order for axis outputs when
/// two sources carry the same change stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMapping {
    pub output: PadOutput,
    pub bindings: Vec<Binding>,
}

impl OutputMapping {
    pub fn new(output: PadOutput) -> Self {
        Self {
            output,
            bindings: Vec::new(),
        }
    }

    pub fn push(&mut self, binding: Binding) {
        self.bindings.push(binding);
    }

    /// Whether a physical channel already feeds this output.
    pub fn is_bound(&self, id: &SourceId) -> bool {
        self.bindings
            .iter()
            .any(|b| b.device_id == id.device && b.source_index == id.index)
    }

    /// Source ids of every binding, for capture collision checks.
    pub fn bound_sources(&self) -> Vec<SourceId> {
        self.bindings.iter().map(Binding::source_id).collect()
    }
}

/// A complete mapping profile: what the user configured for one game.
///
/// Exactly one profile is active at a time; swapping goes through the
/// engine lifecycle (stop, then start with the new profile). The shape here
/// is the in-memory contract any profile loader/saver must produce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingProfile {
    pub name: String,
    pub mappings: HashMap<PadOutput, OutputMapping>,
}

impl MappingProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mappings: HashMap::new(),
        }
    }

    pub fn mapping(&self, output: PadOutput) -> Option<&OutputMapping> {
        self.mappings.get(&output)
    }

    /// Appends a binding to an output, creating the mapping if needed.
    pub fn insert_binding(&mut self, output: PadOutput, binding: Binding) {
        self.mappings
            .entry(output)
            .or_insert_with(|| OutputMapping::new(output))
            .push(binding);
    }

    /// Every device id any binding references; the set the engine has to
    /// subscribe when this profile starts.
    pub fn device_ids(&self) -> BTreeSet<String> {
        self.mappings
            .values()
            .flat_map(|m| m.bindings.iter().map(|b| b.device_id.clone()))
            .collect()
    }
}
