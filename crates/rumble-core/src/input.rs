//! Per-tick input snapshot for one character.
//!
//! Buttons are captured as held flags by press/release edges from the
//! platform layer; the controller turns them into edge-triggered requests
//! with its own consume semantics.

use nalgebra::Vector2;

/// How the character derives its facing from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrientationMethod {
    /// Face the camera's planar heading.
    #[default]
    TowardsCamera,
    /// Face the current movement direction.
    TowardsMovement,
}

/// Input state sampled once per frame and read once per fixed tick.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    /// Raw movement stick, clamped to the unit disc by the controller.
    pub move_axis: Vector2<f32>,
    /// Planar camera heading, radians around world up.
    pub camera_yaw: f32,
    pub jump_held: bool,
    pub crouch_held: bool,
}

impl InputState {
    pub fn set_move(&mut self, x: f32, y: f32) {
        self.move_axis = Vector2::new(x, y);
    }

    pub fn press_jump(&mut self) {
        self.jump_held = true;
    }

    pub fn release_jump(&mut self) {
        self.jump_held = false;
    }

    pub fn press_crouch(&mut self) {
        self.crouch_held = true;
    }

    pub fn release_crouch(&mut self) {
        self.crouch_held = false;
    }
}
