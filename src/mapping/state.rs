use serde::{Deserialize, Serialize};

use crate::mapping::output::PadOutput;

/// One evaluated snapshot of the virtual pad.
///
/// Created fresh by every evaluation, submitted to the sink once, then
/// discarded. Buttons default to released, stick axes to center (0.5),
/// triggers to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PadState {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub left_bumper: bool,
    pub right_bumper: bool,
    pub back: bool,
    pub start: bool,
    pub guide: bool,
    pub left_thumb: bool,
    pub right_thumb: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,
    pub left_stick_x: f64,
    pub left_stick_y: f64,
    pub right_stick_x: f64,
    pub right_stick_y: f64,
    pub left_trigger: f64,
    pub right_trigger: f64,
}

impl Default for PadState {
    fn default() -> Self {
        Self {
            a: false,
            b: false,
            x: false,
            y: false,
            left_bumper: false,
            right_bumper: false,
            back: false,
            start: false,
            guide: false,
            left_thumb: false,
            right_thumb: false,
            dpad_up: false,
            dpad_down: false,
            dpad_left: false,
            dpad_right: false,
            left_stick_x: 0.5,
            left_stick_y: 0.5,
            right_stick_x: 0.5,
            right_stick_y: 0.5,
            left_trigger: 0.0,
            right_trigger: 0.0,
        }
    }
}

impl PadState {
    pub fn set_button(&mut self, output: PadOutput, pressed: bool) {
        match output {
            PadOutput::A => self.a = pressed,
            PadOutput::B => self.b = pressed,
            PadOutput::X => self.x = pressed,
            PadOutput::Y => self.y = pressed,
            PadOutput::LeftBumper => self.left_bumper = pressed,
            PadOutput::RightBumper => self.right_bumper = pressed,
            PadOutput::Back => self.back = pressed,
            PadOutput::Start => self.start = pressed,
            PadOutput::Guide => self.guide = pressed,
            PadOutput::LeftThumb => self.left_thumb = pressed,
            PadOutput::RightThumb => self.right_thumb = pressed,
            PadOutput::DPadUp => self.dpad_up = pressed,
            PadOutput::DPadDown => self.dpad_down = pressed,
            PadOutput::DPadLeft => self.dpad_left = pressed,
            PadOutput::DPadRight => self.dpad_right = pressed,
            _ => {}
        }
    }

    pub fn set_axis(&mut self, output: PadOutput, value: f64) {
        match output {
            PadOutput::LeftStickX => self.left_stick_x = value,
            PadOutput::LeftStickY => self.left_stick_y = value,
            PadOutput::RightStickX => self.right_stick_x = value,
            PadOutput::RightStickY => self.right_stick_y = value,
            _ => {}
        }
    }

    pub fn set_trigger(&mut self, output: PadOutput, value: f64) {
        match output {
            PadOutput::LeftTrigger => self.left_trigger = value,
            PadOutput::RightTrigger => self.right_trigger = value,
            _ => {}
        }
    }

    pub fn button(&self, output: PadOutput) -> bool {
        match output {
            PadOutput::A => self.a,
            PadOutput::B => self.b,
            PadOutput::X => self.x,
            PadOutput::Y => self.y,
            PadOutput::LeftBumper => self.left_bumper,
            PadOutput::RightBumper => self.right_bumper,
            PadOutput::Back => self.back,
            PadOutput::Start => self.start,
            PadOutput::Guide => self.guide,
            PadOutput::LeftThumb => self.left_thumb,
            PadOutput::RightThumb => self.right_thumb,
            PadOutput::DPadUp => self.dpad_up,
            PadOutput::DPadDown => self.dpad_down,
            PadOutput::DPadLeft => self.dpad_left,
            PadOutput::DPadRight => self.dpad_right,
            _ => false,
        }
    }
}
