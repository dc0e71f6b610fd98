//! Tuning data for movement, throwing, combat and session rules.
//!
//! Loaded from a JSON tuning file or constructed in code; defaults mirror the
//! shipped balance values.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Character movement tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementTuning {
    pub max_stable_move_speed: f32,
    pub max_crouch_move_speed: f32,
    pub stable_movement_sharpness: f32,
    pub orientation_sharpness: f32,
    pub max_air_move_speed: f32,
    pub air_acceleration_speed: f32,
    pub drag: f32,
    pub allow_jumping_when_sliding: bool,
    pub allow_wall_jump: bool,
    pub jump_up_speed: f32,
    pub jump_scalable_forward_speed: f32,
    pub jump_pre_grounding_grace: f32,
    pub jump_post_grounding_grace: f32,
    pub charge_speed: f32,
    pub max_charge_time: f32,
    pub stopped_time: f32,
    pub bonus_orientation_sharpness: f32,
    pub gravity: [f32; 3],
    pub capsule_radius: f32,
    pub standing_height: f32,
    pub crouched_height: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            max_stable_move_speed: 4.0,
            max_crouch_move_speed: 1.0,
            stable_movement_sharpness: 10.0,
            orientation_sharpness: 20.0,
            max_air_move_speed: 4.0,
            air_acceleration_speed: 20.0,
            drag: 0.0,
            allow_jumping_when_sliding: false,
            allow_wall_jump: false,
            jump_up_speed: 15.0,
            jump_scalable_forward_speed: 0.0,
            jump_pre_grounding_grace: 0.1,
            jump_post_grounding_grace: 0.1,
            charge_speed: 15.0,
            max_charge_time: 1.5,
            stopped_time: 1.0,
            bonus_orientation_sharpness: 10.0,
            gravity: [0.0, -30.0, 0.0],
            capsule_radius: 0.5,
            standing_height: 2.0,
            crouched_height: 1.0,
        }
    }
}

/// Pickup and throw tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrowTuning {
    pub min_throw_power: f32,
    pub throw_power_scale: f32,
    pub throw_height: f32,
    pub max_warmup: f32,
    pub impact_speed: f32,
    pub aim_radius: f32,
    /// Seconds after a throw before the carrier collides with the object
    /// again.
    pub rearm_delay: f32,
}

impl Default for ThrowTuning {
    fn default() -> Self {
        Self {
            min_throw_power: 3.0,
            throw_power_scale: 10.0,
            throw_height: 3.0,
            max_warmup: 2.0,
            impact_speed: 4.0,
            aim_radius: 0.5,
            rearm_delay: 0.5,
        }
    }
}

/// Damage and invincibility tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatTuning {
    pub max_health: f32,
    pub invincibility_length: f32,
    pub blink_interval: f32,
    pub impact_damage: i32,
    /// Mash-out window while carried. Kept for tuning-file compatibility;
    /// the escape mechanic itself never shipped.
    pub max_escape_time: f32,
}

impl Default for CombatTuning {
    fn default() -> Self {
        Self {
            max_health: 100.0,
            invincibility_length: 5.0,
            blink_interval: 0.15,
            impact_damage: 10,
            max_escape_time: 5.0,
        }
    }
}

/// Match-level rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Characters below this height fell out of the arena.
    pub kill_plane_y: f32,
    pub bot_count: usize,
    pub character_variants: u32,
    pub skin_variants: u32,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            kill_plane_y: -5.0,
            bot_count: 7,
            character_variants: 6,
            skin_variants: 3,
        }
    }
}

/// Complete tuning set for one match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub movement: MovementTuning,
    pub throwing: ThrowTuning,
    pub combat: CombatTuning,
    pub session: SessionTuning,
}

impl GameConfig {
    /// Loads tuning from a JSON document. Missing fields fall back to the
    /// shipped defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects setups the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.movement;
        if m.capsule_radius <= 0.0
            || m.standing_height < 2.0 * m.capsule_radius
            || m.crouched_height < 2.0 * m.capsule_radius
        {
            return Err(ConfigError::InvalidCapsule {
                radius: m.capsule_radius,
                height: m.standing_height.min(m.crouched_height),
            });
        }
        for (field, value) in [
            ("max_stable_move_speed", m.max_stable_move_speed),
            ("max_air_move_speed", m.max_air_move_speed),
            ("jump_up_speed", m.jump_up_speed),
            ("charge_speed", m.charge_speed),
            ("max_charge_time", m.max_charge_time),
            ("min_throw_power", self.throwing.min_throw_power),
            ("max_warmup", self.throwing.max_warmup),
            ("invincibility_length", self.combat.invincibility_length),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        GameConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn test_from_json_partial_overrides() {
        let config = GameConfig::from_json(
            r#"{ "movement": { "max_stable_move_speed": 6.5 }, "throwing": { "max_warmup": 1.0 } }"#,
        )
        .expect("parse");

        assert!((config.movement.max_stable_move_speed - 6.5).abs() < f32::EPSILON);
        assert!((config.throwing.max_warmup - 1.0).abs() < f32::EPSILON);
        // Untouched fields keep defaults.
        assert!((config.movement.jump_up_speed - 15.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_capsule_rejected() {
        let mut config = GameConfig::default();
        config.movement.standing_height = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCapsule { .. })
        ));
    }

    #[test]
    fn test_non_positive_speed_rejected() {
        let mut config = GameConfig::default();
        config.movement.max_air_move_speed = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { .. })
        ));
    }
}
