use bevy::{
    math::{DVec3, Vec3},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    cast::CastData,
    config::{self, ConfigError, ConfigSection, ConfigValue},
    geometry::EffectLocation,
};

use super::EffectRenderer;

/// A burst of particles for the host to forward to its clients. The
/// fields mirror the client protocol's explosion style emitter.
#[derive(Event, Serialize, Deserialize, Debug, Clone)]
pub struct ParticleBurst {
    /// Spawn location
    pub position: DVec3,
    /// Maximum offset a particle can be spawned at
    pub spawn_offset: Vec3,
    /// Min and max size of a particle
    pub size_range: (f32, f32),
    /// Minimum initial velocity
    pub min_velocity: Vec3,
    /// Maximum initial velocity
    pub max_velocity: Vec3,
    /// Path to texture, relative to /textures/
    pub texture: Option<String>,
    /// Hex encoded rgba
    pub color: Option<String>,
    /// Min to max lifetime of each particle
    pub lifetime: (f32, f32),
    /// How many particles should be spawned
    pub count: u32,
}

/// The `particles` effect type, rendering through [`ParticleBurst`]
/// events.
pub struct ParticlesEffect {
    texture: Option<String>,
    color: Option<String>,
    spawn_offset: Vec3,
    min_velocity: Vec3,
    max_velocity: Vec3,
    size_min: ConfigValue<f32>,
    size_max: ConfigValue<f32>,
    lifetime_min: ConfigValue<f32>,
    lifetime_max: ConfigValue<f32>,
    count: ConfigValue<i32>,
}

impl ParticlesEffect {
    pub fn from_section(section: &ConfigSection) -> Result<Box<dyn EffectRenderer>, ConfigError> {
        Ok(Box::new(Self {
            texture: section
                .get("texture")
                .and_then(Value::as_str)
                .map(str::to_owned),
            color: section
                .get("color")
                .and_then(Value::as_str)
                .map(str::to_owned),
            spawn_offset: config::parse_vector(section, "spawn-offset", DVec3::ZERO)?.as_vec3(),
            min_velocity: config::parse_vector(section, "min-velocity", DVec3::NEG_ONE)?.as_vec3(),
            max_velocity: config::parse_vector(section, "max-velocity", DVec3::ONE)?.as_vec3(),
            size_min: ConfigValue::parse(section, "size-min", 0.1),
            size_max: ConfigValue::parse(section, "size-max", 0.25),
            lifetime_min: ConfigValue::parse(section, "lifetime-min", 0.5),
            lifetime_max: ConfigValue::parse(section, "lifetime-max", 1.0),
            count: ConfigValue::parse(section, "count", 10),
        }))
    }
}

impl EffectRenderer for ParticlesEffect {
    fn play(&self, world: &mut World, location: &EffectLocation, data: Option<&CastData>) {
        world.send_event(ParticleBurst {
            position: location.position,
            spawn_offset: self.spawn_offset,
            size_range: (self.size_min.get(data), self.size_max.get(data)),
            min_velocity: self.min_velocity,
            max_velocity: self.max_velocity,
            texture: self.texture.clone(),
            color: self.color.clone(),
            lifetime: (self.lifetime_min.get(data), self.lifetime_max.get(data)),
            count: self.count.get(data).max(0) as u32,
        });
    }
}
