use bevy::prelude::*;

use crate::geometry::EffectLocation;

/// Context for a single spell cast, threaded through effect resolution.
///
/// Created once per cast by the cast pipeline and never mutated. Effects
/// that are played outside of a cast (purely geometric calls) take
/// `None` instead.
#[derive(Clone, Copy, Debug)]
pub struct CastData {
    pub caster: Entity,
    pub target: Option<Entity>,
    pub location: Option<EffectLocation>,
    pub power: Option<f64>,
}

impl CastData {
    pub fn new(caster: Entity) -> Self {
        Self {
            caster,
            target: None,
            location: None,
            power: None,
        }
    }

    pub fn with_target(mut self, target: Entity) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_location(mut self, location: EffectLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_power(mut self, power: f64) -> Self {
        self.power = Some(power);
        self
    }

    /// The cast's power, 1.0 when none was supplied.
    pub fn power(&self) -> f64 {
        return self.power.unwrap_or(1.0);
    }
}
