//! Pooled transient-effect provider.
//!
//! Every peer owns its own pools and fires its own local copy of each effect;
//! there is no cross-peer coordination. Acquisition is a linear scan for an
//! inactive instance; an exhausted pool skips the effect, which is never a
//! gameplay error.

use nalgebra::Vector3;

use rumble_proto::ActorId;

/// Kinds of pooled one-shot effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    LandSmoke,
    ImpactAudio,
}

/// One pooled instance. Inactive instances are reusable.
#[derive(Debug, Clone)]
pub struct PooledEffect {
    pub kind: EffectKind,
    pub active: bool,
    pub position: Vector3<f32>,
    remaining: f32,
}

/// A fixed-capacity pool of one effect kind.
#[derive(Debug)]
pub struct EffectPool {
    kind: EffectKind,
    /// Seconds an activated instance stays alive before auto-recycling.
    lifetime: f32,
    instances: Vec<PooledEffect>,
}

impl EffectPool {
    pub fn new(kind: EffectKind, capacity: usize, lifetime: f32) -> Self {
        Self {
            kind,
            lifetime,
            instances: vec![
                PooledEffect {
                    kind,
                    active: false,
                    position: Vector3::zeros(),
                    remaining: 0.0,
                };
                capacity
            ],
        }
    }

    /// Returns the first inactive instance, or `None` when exhausted.
    pub fn acquire(&mut self) -> Option<&mut PooledEffect> {
        self.instances.iter_mut().find(|instance| !instance.active)
    }

    /// Activates an instance at a position, if one is free.
    pub fn fire_at(&mut self, position: Vector3<f32>) -> bool {
        let lifetime = self.lifetime;
        match self.acquire() {
            Some(instance) => {
                instance.active = true;
                instance.position = position;
                instance.remaining = lifetime;
                true
            }
            None => false,
        }
    }

    /// Advances instance lifetimes, recycling expired ones.
    pub fn tick(&mut self, dt: f32) {
        for instance in &mut self.instances {
            if instance.active {
                instance.remaining -= dt;
                if instance.remaining <= 0.0 {
                    instance.active = false;
                }
            }
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn active_count(&self) -> usize {
        self.instances.iter().filter(|i| i.active).count()
    }
}

/// Abstract effect playback the simulation core calls into.
pub trait EffectSink {
    fn play_effect(&mut self, kind: EffectKind, position: Vector3<f32>);

    /// Per-frame housekeeping (instance lifetimes). No-op by default.
    fn tick(&mut self, _dt: f32) {}
}

/// Abstract health adjustment the simulation core calls into.
pub trait HealthSink {
    fn adjust_health(&mut self, actor: ActorId, delta: i32);
}

/// Default effect sink backed by one pool per effect kind.
#[derive(Debug)]
pub struct PooledEffectSink {
    pub land_smoke: EffectPool,
    pub impact_audio: EffectPool,
}

impl PooledEffectSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            land_smoke: EffectPool::new(EffectKind::LandSmoke, capacity, 1.0),
            impact_audio: EffectPool::new(EffectKind::ImpactAudio, capacity, 1.0),
        }
    }
}

impl EffectSink for PooledEffectSink {
    fn play_effect(&mut self, kind: EffectKind, position: Vector3<f32>) {
        let pool = match kind {
            EffectKind::LandSmoke => &mut self.land_smoke,
            EffectKind::ImpactAudio => &mut self.impact_audio,
        };
        if !pool.fire_at(position) {
            tracing::debug!("[pool] {kind:?} pool exhausted, skipping effect");
        }
    }

    fn tick(&mut self, dt: f32) {
        self.land_smoke.tick(dt);
        self.impact_audio.tick(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = EffectPool::new(EffectKind::LandSmoke, 2, 1.0);
        assert!(pool.fire_at(Vector3::zeros()));
        assert!(pool.fire_at(Vector3::zeros()));
        assert!(!pool.fire_at(Vector3::zeros()));
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn test_expired_instances_recycle() {
        let mut pool = EffectPool::new(EffectKind::ImpactAudio, 1, 0.5);
        assert!(pool.fire_at(Vector3::zeros()));
        pool.tick(0.6);
        assert_eq!(pool.active_count(), 0);
        assert!(pool.fire_at(Vector3::zeros()));
    }

    #[test]
    fn test_sink_routes_by_kind() {
        let mut sink = PooledEffectSink::new(4);
        sink.play_effect(EffectKind::LandSmoke, Vector3::new(1.0, 0.0, 0.0));
        sink.play_effect(EffectKind::ImpactAudio, Vector3::new(2.0, 0.0, 0.0));
        assert_eq!(sink.land_smoke.active_count(), 1);
        assert_eq!(sink.impact_audio.active_count(), 1);
    }
}
