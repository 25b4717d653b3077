use bevy::{math::DVec3, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    cast::CastData,
    config::{ConfigError, ConfigSection, ConfigValue},
    geometry::EffectLocation,
};

use super::EffectRenderer;

/// Positional sound for the host to forward to its clients.
#[derive(Event, Serialize, Deserialize, Debug, Clone)]
pub struct SoundRequest {
    /// Where the sound is emitted from. "None" plays it uniformly from
    /// all directions.
    pub position: Option<DVec3>,
    /// The volume the sound will be played at, [0..1]
    pub volume: f32,
    /// Playback speed
    pub speed: f32,
    /// Path to the sound that should be played.
    pub sound: String,
}

/// The `sound` effect type, rendering through [`SoundRequest`] events.
pub struct SoundEffect {
    sound: String,
    volume: ConfigValue<f32>,
    speed: ConfigValue<f32>,
}

impl SoundEffect {
    pub fn from_section(section: &ConfigSection) -> Result<Box<dyn EffectRenderer>, ConfigError> {
        let Some(sound) = section.get("sound").and_then(Value::as_str) else {
            return Err(ConfigError::MissingKey("sound".to_owned()));
        };

        Ok(Box::new(Self {
            sound: sound.to_owned(),
            volume: ConfigValue::parse(section, "volume", 1.0),
            speed: ConfigValue::parse(section, "speed", 1.0),
        }))
    }
}

impl EffectRenderer for SoundEffect {
    fn play(&self, world: &mut World, location: &EffectLocation, data: Option<&CastData>) {
        world.send_event(SoundRequest {
            position: Some(location.position),
            volume: self.volume.get(data).clamp(0.0, 1.0),
            speed: self.speed.get(data),
            sound: self.sound.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        effects::{EffectDefinition, EffectTypeRegistry, SpellEffect},
        modifiers::ModifierRegistry,
        scheduler::TickScheduler,
    };

    #[test]
    fn sound_path_is_required() {
        let section: ConfigSection = serde_json::from_str(r#"{"type": "sound"}"#).unwrap();
        assert!(matches!(
            EffectTypeRegistry::default().create(&section),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn plays_send_sound_events() {
        let mut world = World::new();
        world.init_resource::<Events<SoundRequest>>();

        let section: ConfigSection = serde_json::from_str(
            r#"{"type": "sound", "sound": "spells/fizzle.ogg", "volume": 0.4}"#,
        )
        .unwrap();

        let scheduler = TickScheduler::default();
        let renderer = EffectTypeRegistry::default().create(&section).unwrap();
        let definition =
            EffectDefinition::from_section(&section, &ModifierRegistry::default()).unwrap();
        let effect = SpellEffect::new(definition, renderer, Arc::new(scheduler.clone()));

        effect.play_at_location(&mut world, &EffectLocation::new(DVec3::Y), None);

        let events: Vec<SoundRequest> = world
            .resource_mut::<Events<SoundRequest>>()
            .drain()
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sound, "spells/fizzle.ogg");
        assert_eq!(events[0].volume, 0.4);
        assert_eq!(events[0].position, Some(DVec3::Y));
    }
}
