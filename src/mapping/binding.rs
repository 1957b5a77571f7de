use serde::{Deserialize, Serialize};

use crate::input::SourceId;
use crate::mapping::output::OutputKind;

/// One configured link from a physical channel to a virtual output.
///
/// The transform pipeline runs invert, range remap, then the sensitivity
/// curve for analog outputs; button-kind outputs use invert and the press
/// threshold only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub device_id: String,
    pub source_index: u32,
    pub display_name: Option<String>,
    pub invert: bool,
    /// Lower edge of the used input range, `0..1`. Must stay below
    /// `max_value`; a degenerate range disables the remap step.
    pub min_value: f64,
    pub max_value: f64,
    /// Press point for button-kind outputs, `0..1`.
    pub button_threshold: f64,
    /// Power-law exponent; 1.0 is linear, above flattens near center,
    /// below steepens. Non-positive values disable the curve step.
    pub sensitivity: f64,
}

impl Binding {
    pub fn new(device_id: impl Into<String>, source_index: u32) -> Self {
        Self {
            device_id: device_id.into(),
            source_index,
            display_name: None,
            invert: false,
            min_value: 0.0,
            max_value: 1.0,
            button_threshold: 0.5,
            sensitivity: 1.0,
        }
    }

    pub fn source_id(&self) -> SourceId {
        SourceId::new(self.device_id.clone(), self.source_index)
    }

    /// Transforms a settled source value for an analog output.
    ///
    /// Axis values pivot around 0.5 through every step; trigger values run
    /// the plain 0..1 pipeline. Button kind gets no analog transform and
    /// passes through (use [`Binding::is_active`] for press detection).
    pub fn transform(&self, raw: f64, kind: OutputKind) -> f64 {
        let value = if self.invert { 1.0 - raw } else { raw };

        match kind {
            OutputKind::Button => value,
            OutputKind::Trigger => self.curve_deflection(self.remap_linear(value)),
            OutputKind::Axis => {
                let remapped = self.remap_centered(value);
                let deflection = (remapped - 0.5).abs() * 2.0;
                let shaped = self.curve_deflection(deflection);
                0.5 + (remapped - 0.5).signum() * shaped * 0.5
            }
        }
    }

    /// Press decision for button-kind outputs: invert, then threshold.
    pub fn is_active(&self, raw: f64) -> bool {
        let value = if self.invert { 1.0 - raw } else { raw };
        value >= self.button_threshold
    }

    // Stretch [min,max] to [0,1], clamped. Degenerate range: pass through.
    fn remap_linear(&self, value: f64) -> f64 {
        if self.min_value >= self.max_value {
            return value;
        }
        ((value - self.min_value) / (self.max_value - self.min_value)).clamp(0.0, 1.0)
    }

    // Same stretch applied to deflection from center, both directions.
    fn remap_centered(&self, value: f64) -> f64 {
        if self.min_value >= self.max_value {
            return value;
        }
        let deflection = (value - 0.5).abs() * 2.0;
        let remapped = ((deflection - self.min_value) / (self.max_value - self.min_value))
            .clamp(0.0, 1.0);
        0.5 + (value - 0.5).signum() * remapped * 0.5
    }

    // Power-law response over a 0..1 deflection. Invalid exponent: linear.
    fn curve_deflection(&self, deflection: f64) -> f64 {
        if self.sensitivity <= 0.0 || self.sensitivity == 1.0 {
            return deflection;
        }
        deflection.powf(self.sensitivity)
    }
}
