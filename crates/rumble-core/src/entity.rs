//! Health bridge: invincibility windows, blink feedback, spawn reset data.
//!
//! Health itself lives behind the session's [`crate::pool::HealthSink`]; this
//! module owns the timing state around damage: the i-frame window (tick
//! counted, no stacking) and the render-blink that accompanies it.

use nalgebra::Vector3;

/// Per-character damage state.
#[derive(Debug, Clone)]
pub struct EntityState {
    spawn_position: Vector3<f32>,
    spawn_yaw: f32,
    pub is_invincible: bool,
    invincible_until: u64,
    blink_active: bool,
    blink_countdown: f32,
    blink_interval: f32,
    /// Renderer-facing visibility flag, toggled while blinking.
    pub visible: bool,
}

impl EntityState {
    pub fn new(spawn_position: Vector3<f32>, spawn_yaw: f32, blink_interval: f32) -> Self {
        Self {
            spawn_position,
            spawn_yaw,
            is_invincible: false,
            invincible_until: 0,
            blink_active: false,
            blink_countdown: 0.0,
            blink_interval,
            visible: true,
        }
    }

    pub fn spawn_pose(&self) -> (Vector3<f32>, f32) {
        (self.spawn_position, self.spawn_yaw)
    }

    /// Whether a damage request may go out right now.
    pub fn can_take_damage(&self) -> bool {
        !self.is_invincible
    }

    /// Opens the invincibility window. A window already in progress is left
    /// untouched; i-frames never stack.
    pub fn start_invincibility(&mut self, current_tick: u64, duration_ticks: u64) {
        if self.is_invincible {
            return;
        }
        self.is_invincible = true;
        self.invincible_until = current_tick + duration_ticks;
        self.blink_active = true;
        self.blink_countdown = self.blink_interval;
    }

    /// Per-frame blink update while invincible.
    pub fn tick_blink(&mut self, dt: f32) {
        if !self.blink_active {
            return;
        }
        self.blink_countdown -= dt;
        if self.blink_countdown <= 0.0 {
            self.visible = !self.visible;
            self.blink_countdown = self.blink_interval;
        }
    }

    /// Closes the window once its deadline passes. Returns true on the expiry
    /// edge so the caller can clear the character's collision-ignore list.
    pub fn expire_if_due(&mut self, current_tick: u64) -> bool {
        if self.is_invincible && current_tick >= self.invincible_until {
            self.is_invincible = false;
            self.blink_active = false;
            self.visible = true;
            return true;
        }
        false
    }
}
