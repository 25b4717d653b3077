use std::sync::Arc;

use bevy::prelude::*;
use indexmap::IndexMap;

use crate::{
    cast::CastData,
    config::{self, ConfigError, ConfigSection},
    effects::{EffectDefinition, EffectTypeRegistry, SpellEffect},
    geometry::EffectLocation,
    modifiers::ModifierRegistry,
    scheduler::{Scheduler, TaskHandle, TickScheduler},
};

pub mod bind;

pub const SPELL_CONFIG_PATH: &str = "config/spells/";

/// Where in a cast an effect list plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectPosition {
    /// At the casting entity.
    Caster,
    /// At the cast's target entity or location.
    Target,
    /// Along the line between caster and target.
    Trail,
    /// Following an entity for as long as the spell is active.
    Buff,
    /// Orbiting an entity for as long as the spell is active.
    Orbit,
}

impl EffectPosition {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "caster" => Some(Self::Caster),
            "target" => Some(Self::Target),
            "trail" => Some(Self::Trail),
            "buff" => Some(Self::Buff),
            "orbit" => Some(Self::Orbit),
            _ => None,
        }
    }
}

/// A loaded spell: its names, binding rules and the effects it plays at
/// each position. Shared by every cast of the spell.
pub struct Spell {
    internal_name: String,
    display_name: String,
    bindable: bool,
    effects: IndexMap<EffectPosition, Vec<SpellEffect>>,
}

impl Spell {
    pub fn new(internal_name: impl Into<String>) -> Self {
        let internal_name = internal_name.into();
        Self {
            display_name: internal_name.clone(),
            internal_name,
            bindable: true,
            effects: IndexMap::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_bindable(mut self, bindable: bool) -> Self {
        self.bindable = bindable;
        self
    }

    pub fn add_effect(&mut self, position: EffectPosition, effect: SpellEffect) {
        self.effects.entry(position).or_default().push(effect);
    }

    pub fn from_section(
        internal_name: &str,
        section: &ConfigSection,
        effect_types: &EffectTypeRegistry,
        modifier_registry: &ModifierRegistry,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ConfigError> {
        let mut spell = Self::new(internal_name)
            .with_display_name(config::get_string(section, "display-name", internal_name))
            .with_bindable(config::get_bool(section, "bindable", true));

        let Some(positions) = section.get("effects") else {
            return Ok(spell);
        };
        let Some(positions) = positions.as_object() else {
            return Err(ConfigError::MalformedSpell(
                "'effects' must map positions to effect lists".to_owned(),
            ));
        };

        for (key, entries) in positions {
            let Some(position) = EffectPosition::from_key(key) else {
                return Err(ConfigError::MalformedSpell(format!(
                    "unknown effect position '{}'",
                    key
                )));
            };
            let Some(entries) = entries.as_array() else {
                return Err(ConfigError::MalformedSpell(format!(
                    "effects under '{}' must be a list",
                    key
                )));
            };

            for entry in entries {
                let Some(effect_section) = entry.as_object() else {
                    return Err(ConfigError::MalformedSpell(format!(
                        "effect under '{}' must be a section",
                        key
                    )));
                };
                let renderer = effect_types.create(effect_section)?;
                let definition =
                    EffectDefinition::from_section(effect_section, modifier_registry)?;
                spell.add_effect(
                    position,
                    SpellEffect::new(definition, renderer, scheduler.clone()),
                );
            }
        }

        return Ok(spell);
    }

    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn bindable(&self) -> bool {
        self.bindable
    }

    pub fn effects(&self, position: EffectPosition) -> &[SpellEffect] {
        self.effects
            .get(&position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn play_effects_at_entity(
        &self,
        world: &mut World,
        position: EffectPosition,
        entity: Entity,
        data: Option<&CastData>,
    ) {
        for effect in self.effects(position) {
            effect.play_at_entity(world, entity, data);
        }
    }

    pub fn play_effects_at_location(
        &self,
        world: &mut World,
        position: EffectPosition,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) {
        for effect in self.effects(position) {
            effect.play_at_location(world, location, data);
        }
    }

    pub fn play_trail_effects(
        &self,
        world: &mut World,
        from: &EffectLocation,
        to: &EffectLocation,
        data: Option<&CastData>,
    ) {
        for effect in self.effects(EffectPosition::Trail) {
            effect.play_line(world, from, to, data);
        }
    }

    /// Starts the spell's buff effects on an entity. The checker decides
    /// how long they live; the handles allow stopping them early.
    pub fn play_buff_effects(
        &self,
        entity: Entity,
        checker: impl Fn(&World, Entity) -> bool + Send + Sync + Clone + 'static,
        data: Option<&CastData>,
    ) -> Vec<TaskHandle> {
        self.effects(EffectPosition::Buff)
            .iter()
            .map(|effect| {
                if effect.is_managed() {
                    effect.play_animation_while_active(entity, Box::new(checker.clone()), data)
                } else {
                    effect.play_while_active(entity, Box::new(checker.clone()), data)
                }
            })
            .collect()
    }

    /// Starts the spell's orbit effects around an entity.
    pub fn play_orbit_effects(
        &self,
        entity: Entity,
        checker: impl Fn(&World, Entity) -> bool + Send + Sync + Clone + 'static,
        data: Option<&CastData>,
    ) -> Vec<TaskHandle> {
        self.effects(EffectPosition::Orbit)
            .iter()
            .map(|effect| {
                if effect.is_managed() {
                    effect.play_animation_while_active_orbit(
                        entity,
                        Box::new(checker.clone()),
                        data,
                    )
                } else {
                    effect.play_while_active_orbit(entity, Box::new(checker.clone()), data)
                }
            })
            .collect()
    }
}

/// Names and configurations of all the spells in the game.
#[derive(Resource, Default, Clone)]
pub struct Spells {
    spells: IndexMap<String, Arc<Spell>>,
}

impl Spells {
    pub fn get(&self, internal_name: &str) -> Option<&Arc<Spell>> {
        self.spells.get(internal_name)
    }

    pub fn get_by_display_name(&self, display_name: &str) -> Option<&Arc<Spell>> {
        self.spells
            .values()
            .find(|spell| spell.display_name() == display_name)
    }

    pub fn insert(&mut self, spell: Spell) {
        self.spells
            .insert(spell.internal_name().to_owned(), Arc::new(spell));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Spell>> {
        self.spells.values()
    }
}

/// A finished cast, handed over by the host's cast pipeline. The effect
/// system only consumes casts, it never produces them.
#[derive(Event, Clone, Debug)]
pub struct SpellCastEvent {
    pub spell: String,
    pub caster: Entity,
    pub target: Option<Entity>,
    pub location: Option<EffectLocation>,
    pub power: f64,
}

pub fn load_spells(
    mut commands: Commands,
    scheduler: Res<TickScheduler>,
    effect_types: Res<EffectTypeRegistry>,
    modifier_registry: Res<ModifierRegistry>,
) {
    let mut spells = Spells::default();

    let directory = match std::fs::read_dir(SPELL_CONFIG_PATH) {
        Ok(directory) => directory,
        Err(_) => {
            info!("No spell configurations at {}", SPELL_CONFIG_PATH);
            commands.insert_resource(spells);
            return;
        }
    };

    for entry in directory {
        let path = entry.unwrap().path();
        if path.extension().is_none() || path.extension().unwrap() != "json" {
            continue;
        }

        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) => panic!(
                "Failed to open spell config at: {}\nError: {}",
                path.display(),
                e
            ),
        };

        let section: ConfigSection = match serde_json::from_reader(&file) {
            Ok(section) => section,
            Err(e) => panic!(
                "Couldn't read spell config from '{}'\nError: {}",
                path.display(),
                e
            ),
        };

        let name = path.file_stem().unwrap().to_string_lossy().into_owned();
        let spell = match Spell::from_section(
            &name,
            &section,
            &effect_types,
            &modifier_registry,
            Arc::new(TickScheduler::clone(&scheduler)),
        ) {
            Ok(spell) => spell,
            Err(e) => panic!(
                "Failed to parse spell config at: {}\nError: {}",
                path.display(),
                e
            ),
        };
        spells.insert(spell);
    }

    commands.insert_resource(spells);
}

/// Plays the caster/target/trail effects of every cast handed over this
/// tick. Buff and orbit effects are started by game code through
/// [`Spell::play_buff_effects`]/[`Spell::play_orbit_effects`], which need
/// the game's idea of when the spell ends.
pub fn play_cast_effects(world: &mut World) {
    let events: Vec<SpellCastEvent> = world
        .resource_mut::<Events<SpellCastEvent>>()
        .drain()
        .collect();

    for event in events {
        let Some(spell) = world.resource::<Spells>().get(&event.spell).cloned() else {
            warn!("Cast of unknown spell '{}'", event.spell);
            continue;
        };

        let mut data = CastData::new(event.caster).with_power(event.power);
        if let Some(target) = event.target {
            data = data.with_target(target);
        }
        if let Some(location) = event.location {
            data = data.with_location(location);
        }

        spell.play_effects_at_entity(world, EffectPosition::Caster, event.caster, Some(&data));

        if let Some(target) = event.target {
            spell.play_effects_at_entity(world, EffectPosition::Target, target, Some(&data));
        } else if let Some(location) = event.location {
            spell.play_effects_at_location(world, EffectPosition::Target, &location, Some(&data));
        }

        let from = world.get::<EffectLocation>(event.caster).copied();
        let to = event
            .target
            .and_then(|target| world.get::<EffectLocation>(target).copied())
            .or(event.location);
        if let (Some(from), Some(to)) = (from, to) {
            spell.play_trail_effects(world, &from, &to, Some(&data));
        }
    }
}

#[cfg(test)]
mod tests {
    use bevy::math::DVec3;

    use super::*;
    use crate::effects::particles::ParticleBurst;

    fn spell_section(json: &str) -> ConfigSection {
        serde_json::from_str(json).unwrap()
    }

    fn parse_spell(name: &str, json: &str) -> Result<Spell, ConfigError> {
        Spell::from_section(
            name,
            &spell_section(json),
            &EffectTypeRegistry::default(),
            &ModifierRegistry::default(),
            Arc::new(TickScheduler::default()),
        )
    }

    #[test]
    fn parses_effects_per_position() {
        let spell = parse_spell(
            "fireball",
            r#"{
                "display-name": "Fireball",
                "effects": {
                    "caster": [{"type": "sound", "sound": "spells/woosh.ogg"}],
                    "target": [
                        {"type": "particles", "texture": "fire.png"},
                        {"type": "sound", "sound": "spells/boom.ogg"}
                    ],
                    "trail": [{"type": "particles"}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(spell.internal_name(), "fireball");
        assert_eq!(spell.display_name(), "Fireball");
        assert!(spell.bindable());
        assert_eq!(spell.effects(EffectPosition::Caster).len(), 1);
        assert_eq!(spell.effects(EffectPosition::Target).len(), 2);
        assert_eq!(spell.effects(EffectPosition::Trail).len(), 1);
        assert_eq!(spell.effects(EffectPosition::Buff).len(), 0);
    }

    #[test]
    fn unknown_positions_and_types_are_fatal() {
        assert!(parse_spell(
            "bad",
            r#"{"effects": {"everywhere": [{"type": "particles"}]}}"#
        )
        .is_err());
        assert!(parse_spell(
            "bad",
            r#"{"effects": {"caster": [{"type": "lightning"}]}}"#
        )
        .is_err());
    }

    #[test]
    fn cast_plays_caster_target_and_trail() {
        let mut world = World::new();
        world.init_resource::<Events<SpellCastEvent>>();
        world.init_resource::<Events<ParticleBurst>>();

        let spell = parse_spell(
            "zap",
            r#"{
                "effects": {
                    "caster": [{"type": "particles"}],
                    "target": [{"type": "particles"}],
                    "trail": [{"type": "particles", "distance-between": 2}]
                }
            }"#,
        )
        .unwrap();
        let mut spells = Spells::default();
        spells.insert(spell);
        world.insert_resource(spells);

        let caster = world.spawn(EffectLocation::new(DVec3::ZERO)).id();
        let target = world
            .spawn(EffectLocation::new(DVec3::new(8.0, 0.0, 0.0)))
            .id();
        world.send_event(SpellCastEvent {
            spell: "zap".to_owned(),
            caster,
            target: Some(target),
            location: None,
            power: 1.0,
        });

        play_cast_effects(&mut world);

        let bursts: Vec<ParticleBurst> = world
            .resource_mut::<Events<ParticleBurst>>()
            .drain()
            .collect();
        // Caster + target + 3 interior trail points at x = 2, 4, 6.
        assert_eq!(bursts.len(), 5);
        assert_eq!(bursts[0].position, DVec3::ZERO);
        assert_eq!(bursts[1].position, DVec3::new(8.0, 0.0, 0.0));
        let trail: Vec<f64> = bursts[2..].iter().map(|burst| burst.position.x).collect();
        assert_eq!(trail, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn casting_an_unknown_spell_is_harmless() {
        let mut world = World::new();
        world.init_resource::<Events<SpellCastEvent>>();
        world.insert_resource(Spells::default());

        let caster = world.spawn(()).id();
        world.send_event(SpellCastEvent {
            spell: "mystery".to_owned(),
            caster,
            target: None,
            location: None,
            power: 1.0,
        });
        play_cast_effects(&mut world);
    }
}
