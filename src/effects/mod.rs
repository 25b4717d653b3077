use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bevy::{math::DVec3, prelude::*};
use serde_json::Value;

use crate::{
    cast::CastData,
    config::{self, ConfigError, ConfigSection, ConfigValue},
    geometry::{self, EffectLocation},
    modifiers::{ModifierRegistry, ModifierSet},
    random::Rng,
    scheduler::{Scheduler, TaskHandle, TICKS_PER_SECOND},
};

pub mod particles;
pub mod sound;
mod trackers;

use trackers::{BuffAnimationTracker, BuffTracker, OrbitAnimationTracker, OrbitTracker};

/// Everything an effect reads from its configuration section.
///
/// Parsed once when the spell loads and immutable afterwards; the dynamic
/// values re-resolve against each cast. Every key has a default, no field
/// is ever unset.
pub struct EffectDefinition {
    pub delay: ConfigValue<i32>,

    pub chance: ConfigValue<f64>,
    pub z_offset: ConfigValue<f64>,
    pub height_offset: ConfigValue<f64>,
    pub forward_offset: ConfigValue<f64>,

    pub offset: DVec3,
    pub relative_offset: DVec3,

    // for line effects
    pub distance_between: ConfigValue<f64>,
    pub max_distance_squared: ConfigValue<f64>,

    // for buff/orbit effects
    pub orbit_x_axis: ConfigValue<f32>,
    pub orbit_y_axis: ConfigValue<f32>,
    pub orbit_z_axis: ConfigValue<f32>,
    pub orbit_radius: ConfigValue<f32>,
    pub orbit_y_offset: ConfigValue<f32>,
    pub horiz_offset: ConfigValue<f32>,
    pub horiz_expand_radius: ConfigValue<f32>,
    pub vert_expand_radius: ConfigValue<f32>,
    pub seconds_per_revolution: ConfigValue<f32>,
    pub horiz_expand_delay: ConfigValue<i32>,
    pub vert_expand_delay: ConfigValue<i32>,
    pub counter_clockwise: bool,

    pub effect_interval: ConfigValue<i32>,

    pub modifiers: Option<ModifierSet>,
    pub location_modifiers: Option<ModifierSet>,
}

impl EffectDefinition {
    pub fn from_section(
        section: &ConfigSection,
        registry: &ModifierRegistry,
    ) -> Result<Self, ConfigError> {
        let modifiers = config::get_string_list(section, "modifiers");
        let location_modifiers = config::get_string_list(section, "location-modifiers");

        Ok(Self {
            delay: ConfigValue::parse(section, "delay", 0),
            // Negative is the "always" sentinel, a missing key never rolls.
            chance: ConfigValue::parse(section, "chance", -1.0),
            z_offset: ConfigValue::parse(section, "z-offset", 0.0),
            height_offset: ConfigValue::parse(section, "height-offset", 0.0),
            forward_offset: ConfigValue::parse(section, "forward-offset", 0.0),
            offset: config::parse_vector(section, "offset", DVec3::ZERO)?,
            relative_offset: config::parse_vector(section, "relative-offset", DVec3::ZERO)?,
            max_distance_squared: ConfigValue::parse(section, "max-distance", 100.0),
            distance_between: ConfigValue::parse(section, "distance-between", 1.0),
            orbit_x_axis: ConfigValue::parse(section, "orbit-x-axis", 0.0),
            orbit_y_axis: ConfigValue::parse(section, "orbit-y-axis", 0.0),
            orbit_z_axis: ConfigValue::parse(section, "orbit-z-axis", 0.0),
            orbit_radius: ConfigValue::parse(section, "orbit-radius", 1.0),
            orbit_y_offset: ConfigValue::parse(section, "orbit-y-offset", 0.0),
            horiz_offset: ConfigValue::parse(section, "orbit-horiz-offset", 0.0),
            horiz_expand_radius: ConfigValue::parse(section, "orbit-horiz-expand-radius", 0.0),
            vert_expand_radius: ConfigValue::parse(section, "orbit-vert-expand-radius", 0.0),
            seconds_per_revolution: ConfigValue::parse(
                section,
                "orbit-seconds-per-revolution",
                3.0,
            ),
            horiz_expand_delay: ConfigValue::parse(section, "orbit-horiz-expand-delay", 0),
            vert_expand_delay: ConfigValue::parse(section, "orbit-vert-expand-delay", 0),
            counter_clockwise: config::get_bool(section, "orbit-counter-clockwise", false),
            effect_interval: ConfigValue::parse(
                section,
                "effect-interval",
                TICKS_PER_SECOND as i32,
            ),
            modifiers: if modifiers.is_empty() {
                None
            } else {
                Some(ModifierSet::from_config(&modifiers, registry)?)
            },
            location_modifiers: if location_modifiers.is_empty() {
                None
            } else {
                Some(ModifierSet::from_config(&location_modifiers, registry)?)
            },
        })
    }
}

/// A renderer-owned animation that is updated in place instead of being
/// recreated every tick.
pub trait ManagedAnimation: Send + Sync {
    fn move_to(&mut self, world: &mut World, location: &EffectLocation);
    fn stop(&mut self, world: &mut World);
}

pub type AnimationHandle = Box<dyn ManagedAnimation>;

/// The output channels an effect type can render through.
///
/// A concrete effect overrides exactly one of the four; the rest stay
/// no-ops. Everything upstream of these calls (chance, eligibility,
/// delay, offsets) is handled by [`SpellEffect`].
pub trait EffectRenderer: Send + Sync + 'static {
    /// Whether this effect renders through managed animations. Decides
    /// which tracker flavor continuous patterns use.
    fn is_managed(&self) -> bool {
        false
    }

    /// One-off rendering at a location.
    fn play(&self, world: &mut World, location: &EffectLocation, data: Option<&CastData>) {
        let _ = (world, location, data);
    }

    /// Starts a long-lived animation and hands back its handle.
    fn start_animation(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<AnimationHandle> {
        let _ = (world, location, data);
        None
    }

    /// Spawns a marker entity that represents the effect.
    fn spawn_marker(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<Entity> {
        let _ = (world, location, data);
        None
    }

    /// Spawns an invisible stand entity that represents the effect.
    fn spawn_stand(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<Entity> {
        let _ = (world, location, data);
        None
    }
}

/// Predicate that keeps a buff/orbit pattern alive. The pattern stops the
/// first time this returns false; there is no other cancellation path for
/// a running tracker.
pub type ActiveChecker = Box<dyn FnMut(&World, Entity) -> bool + Send + Sync>;

struct EffectInner {
    definition: EffectDefinition,
    renderer: Box<dyn EffectRenderer>,
    scheduler: Arc<dyn Scheduler>,
    rng: Mutex<Rng>,
}

/// One configured effect of a spell.
///
/// Owns the parsed definition, the renderer it dispatches to, a handle to
/// the game's scheduler for delays and repeating patterns, and its own
/// seeded random source for chance rolls. Clones share the same state, so
/// deferred dispatches keep the effect alive cheaply.
#[derive(Clone)]
pub struct SpellEffect {
    inner: Arc<EffectInner>,
}

impl SpellEffect {
    pub fn new(
        definition: EffectDefinition,
        renderer: Box<dyn EffectRenderer>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(EffectInner {
                definition,
                renderer,
                scheduler,
                rng: Mutex::new(Rng::new(rand::random())),
            }),
        }
    }

    /// Replaces the random source, so tests can pick a seed.
    pub fn with_rng(self, rng: Rng) -> Self {
        *self.inner.rng.lock().unwrap() = rng;
        self
    }

    pub fn definition(&self) -> &EffectDefinition {
        &self.inner.definition
    }

    /// True when the renderer is backed by managed animations.
    pub fn is_managed(&self) -> bool {
        self.inner.renderer.is_managed()
    }

    /// Plays the effect on an entity. The entity's location is read when
    /// the effect actually fires, so a delayed effect follows its target.
    pub fn play_at_entity(&self, world: &mut World, entity: Entity, data: Option<&CastData>) {
        if !self.passes_chance(data) {
            return;
        }
        if let Some(modifiers) = &self.inner.definition.modifiers {
            if !modifiers.check_entity(world, entity) {
                return;
            }
        }

        let delay = self.inner.definition.delay.get(data);
        if delay <= 0 {
            self.play_at_entity_now(world, entity, data);
            return;
        }

        let effect = self.clone();
        let data = data.copied();
        self.inner.scheduler.schedule(
            delay as u32,
            Box::new(move |world| effect.play_at_entity_now(world, entity, data.as_ref())),
        );
    }

    /// Plays the effect at a fixed location.
    pub fn play_at_location(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) {
        if !self.passes_location_gate(world, location, data) {
            return;
        }

        let delay = self.inner.definition.delay.get(data);
        if delay <= 0 {
            self.play_now(world, location, data);
            return;
        }

        let effect = self.clone();
        let location = *location;
        let data = data.copied();
        self.inner.scheduler.schedule(
            delay as u32,
            Box::new(move |world| effect.play_now(world, &location, data.as_ref())),
        );
    }

    /// Starts a managed animation at a location. Returns the handle unless
    /// the effect was gated away or deferred by a delay; a deferred start
    /// is fire-and-forget.
    pub fn play_animation_at(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<AnimationHandle> {
        if !self.passes_location_gate(world, location, data) {
            return None;
        }

        let delay = self.inner.definition.delay.get(data);
        if delay <= 0 {
            return self.start_animation_now(world, location, data);
        }

        let effect = self.clone();
        let location = *location;
        let data = data.copied();
        self.inner.scheduler.schedule(
            delay as u32,
            Box::new(move |world| {
                effect.start_animation_now(world, &location, data.as_ref());
            }),
        );
        return None;
    }

    /// Spawns the effect's marker entity at a location.
    pub fn spawn_marker_at(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<Entity> {
        if !self.passes_location_gate(world, location, data) {
            return None;
        }

        let delay = self.inner.definition.delay.get(data);
        if delay <= 0 {
            return self.spawn_marker_now(world, location, data);
        }

        let effect = self.clone();
        let location = *location;
        let data = data.copied();
        self.inner.scheduler.schedule(
            delay as u32,
            Box::new(move |world| {
                effect.spawn_marker_now(world, &location, data.as_ref());
            }),
        );
        return None;
    }

    /// Spawns the effect's invisible stand entity at a location.
    pub fn spawn_stand_at(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<Entity> {
        if !self.passes_location_gate(world, location, data) {
            return None;
        }

        let delay = self.inner.definition.delay.get(data);
        if delay <= 0 {
            return self.spawn_stand_now(world, location, data);
        }

        let effect = self.clone();
        let location = *location;
        let data = data.copied();
        self.inner.scheduler.schedule(
            delay as u32,
            Box::new(move |world| {
                effect.spawn_stand_now(world, &location, data.as_ref());
            }),
        );
        return None;
    }

    /// Plays the effect along the line between two locations, as a trail
    /// of evenly spaced points. The endpoints themselves are excluded.
    pub fn play_line(
        &self,
        world: &mut World,
        from: &EffectLocation,
        to: &EffectLocation,
        data: Option<&CastData>,
    ) {
        let max_distance_squared = self.inner.definition.max_distance_squared.get(data);
        let distance_squared = from.position.distance_squared(to.position);
        if distance_squared > max_distance_squared {
            return;
        }

        let distance_between = self.inner.definition.distance_between.get(data);
        if distance_between <= 0.0 {
            return;
        }

        let steps = (distance_squared.sqrt() / distance_between).ceil() as i64 - 1;
        if steps <= 0 {
            return;
        }

        let step = (to.position - from.position).normalize() * distance_between;
        let mut cursor = *from;

        let height_offset = self.inner.definition.height_offset.get(data);
        if height_offset != 0.0 {
            cursor.position.y += height_offset;
        }

        for _ in 0..steps {
            cursor.position += step;
            self.play_at_location(world, &cursor, data);
        }
    }

    /// Repeatedly plays the effect at an entity's location until the
    /// checker says it is no longer active.
    pub fn play_while_active(
        &self,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<&CastData>,
    ) -> TaskHandle {
        let interval = self.interval(data);
        let mut tracker = BuffTracker::new(self.clone(), entity, checker, data.copied());
        self.inner
            .scheduler
            .schedule_repeating(interval, Box::new(move |world| tracker.tick(world)))
    }

    /// Repeatedly plays the effect orbiting around an entity until the
    /// checker says it is no longer active.
    pub fn play_while_active_orbit(
        &self,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<&CastData>,
    ) -> TaskHandle {
        let interval = self.interval(data);
        let mut tracker = OrbitTracker::new(self.clone(), entity, checker, data.copied());
        self.inner
            .scheduler
            .schedule_repeating(interval, Box::new(move |world| tracker.tick(world)))
    }

    /// Like [`Self::play_while_active`], but through one managed animation
    /// that follows the entity instead of an effect instance per tick.
    pub fn play_animation_while_active(
        &self,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<&CastData>,
    ) -> TaskHandle {
        let interval = self.interval(data);
        let mut tracker = BuffAnimationTracker::new(self.clone(), entity, checker, data.copied());
        self.inner
            .scheduler
            .schedule_repeating(interval, Box::new(move |world| tracker.tick(world)))
    }

    /// Like [`Self::play_while_active_orbit`], but through one managed
    /// animation that is repositioned along the orbit.
    pub fn play_animation_while_active_orbit(
        &self,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<&CastData>,
    ) -> TaskHandle {
        let interval = self.interval(data);
        let mut tracker = OrbitAnimationTracker::new(self.clone(), entity, checker, data.copied());
        self.inner
            .scheduler
            .schedule_repeating(interval, Box::new(move |world| tracker.tick(world)))
    }

    /// Applies the definition's offsets to a location in place.
    pub fn apply_offsets(&self, location: &mut EffectLocation, data: Option<&CastData>) {
        geometry::apply_offsets(
            location,
            self.inner.definition.offset,
            self.inner.definition.relative_offset,
            self.inner.definition.z_offset.get(data),
            self.inner.definition.height_offset.get(data),
            self.inner.definition.forward_offset.get(data),
        );
    }

    fn passes_chance(&self, data: Option<&CastData>) -> bool {
        let chance = self.inner.definition.chance.get(data);
        // Outside (0,1) is the "always" sentinel.
        if chance <= 0.0 || chance >= 1.0 {
            return true;
        }
        return self.inner.rng.lock().unwrap().next_f64() <= chance;
    }

    fn passes_location_gate(
        &self,
        world: &World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> bool {
        if !self.passes_chance(data) {
            return false;
        }
        if let Some(modifiers) = &self.inner.definition.location_modifiers {
            if !modifiers.check_location(world, location) {
                return false;
            }
        }
        return true;
    }

    fn play_at_entity_now(&self, world: &mut World, entity: Entity, data: Option<&CastData>) {
        // A despawned or anchor-less entity is a valid no-op, not a fault.
        let Some(location) = world.get::<EffectLocation>(entity).copied() else {
            return;
        };
        self.play_now(world, &location, data);
    }

    fn play_now(&self, world: &mut World, location: &EffectLocation, data: Option<&CastData>) {
        let mut location = *location;
        self.apply_offsets(&mut location, data);
        self.inner.renderer.play(world, &location, data);
    }

    fn start_animation_now(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<AnimationHandle> {
        let mut location = *location;
        self.apply_offsets(&mut location, data);
        self.inner.renderer.start_animation(world, &location, data)
    }

    fn spawn_marker_now(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<Entity> {
        let mut location = *location;
        self.apply_offsets(&mut location, data);
        self.inner.renderer.spawn_marker(world, &location, data)
    }

    fn spawn_stand_now(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<Entity> {
        let mut location = *location;
        self.apply_offsets(&mut location, data);
        self.inner.renderer.spawn_stand(world, &location, data)
    }

    fn interval(&self, data: Option<&CastData>) -> u32 {
        let interval = self.inner.definition.effect_interval.get(data);
        if interval <= 0 {
            return 1;
        }
        return interval as u32;
    }

    // Used by the managed trackers, which gate once at pattern start.
    fn start_animation_unchecked(
        &self,
        world: &mut World,
        location: &EffectLocation,
        data: Option<&CastData>,
    ) -> Option<AnimationHandle> {
        self.inner.renderer.start_animation(world, location, data)
    }
}

type EffectFactory =
    Box<dyn Fn(&ConfigSection) -> Result<Box<dyn EffectRenderer>, ConfigError> + Send + Sync>;

/// Maps the `type` key of an effect section to a parser for that effect.
/// Hosts register their own effect types next to the built in ones.
#[derive(Resource)]
pub struct EffectTypeRegistry {
    factories: HashMap<String, EffectFactory>,
}

impl Default for EffectTypeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("particles", particles::ParticlesEffect::from_section);
        registry.register("sound", sound::SoundEffect::from_section);
        return registry;
    }
}

impl EffectTypeRegistry {
    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&ConfigSection) -> Result<Box<dyn EffectRenderer>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn create(&self, section: &ConfigSection) -> Result<Box<dyn EffectRenderer>, ConfigError> {
        let type_name = section
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ConfigError::MissingEffectType)?;

        let Some(factory) = self.factories.get(type_name) else {
            return Err(ConfigError::UnknownEffectType(type_name.to_owned()));
        };
        return factory(section);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::scheduler::TickScheduler;

    #[derive(Debug, Clone, PartialEq)]
    pub enum AnimationEvent {
        Started(EffectLocation),
        Moved(EffectLocation),
        Stopped,
    }

    /// Renderer that records every channel invocation.
    #[derive(Default, Clone)]
    pub struct RecordingRenderer {
        pub plays: Arc<Mutex<Vec<EffectLocation>>>,
        pub marker_spawns: Arc<Mutex<Vec<EffectLocation>>>,
        pub stand_spawns: Arc<Mutex<Vec<EffectLocation>>>,
        pub animation_events: Arc<Mutex<Vec<AnimationEvent>>>,
    }

    impl RecordingRenderer {
        pub fn play_count(&self) -> usize {
            self.plays.lock().unwrap().len()
        }
    }

    impl EffectRenderer for RecordingRenderer {
        fn play(&self, _world: &mut World, location: &EffectLocation, _data: Option<&CastData>) {
            self.plays.lock().unwrap().push(*location);
        }

        fn start_animation(
            &self,
            _world: &mut World,
            location: &EffectLocation,
            _data: Option<&CastData>,
        ) -> Option<AnimationHandle> {
            self.animation_events
                .lock()
                .unwrap()
                .push(AnimationEvent::Started(*location));
            Some(Box::new(RecordingAnimation {
                events: self.animation_events.clone(),
            }))
        }

        fn spawn_marker(
            &self,
            world: &mut World,
            location: &EffectLocation,
            _data: Option<&CastData>,
        ) -> Option<Entity> {
            self.marker_spawns.lock().unwrap().push(*location);
            Some(world.spawn(*location).id())
        }

        fn spawn_stand(
            &self,
            world: &mut World,
            location: &EffectLocation,
            _data: Option<&CastData>,
        ) -> Option<Entity> {
            self.stand_spawns.lock().unwrap().push(*location);
            Some(world.spawn(*location).id())
        }
    }

    struct RecordingAnimation {
        events: Arc<Mutex<Vec<AnimationEvent>>>,
    }

    impl ManagedAnimation for RecordingAnimation {
        fn move_to(&mut self, _world: &mut World, location: &EffectLocation) {
            self.events
                .lock()
                .unwrap()
                .push(AnimationEvent::Moved(*location));
        }

        fn stop(&mut self, _world: &mut World) {
            self.events.lock().unwrap().push(AnimationEvent::Stopped);
        }
    }

    pub fn effect_from_json(
        json: &str,
        scheduler: &TickScheduler,
        seed: u64,
    ) -> (SpellEffect, RecordingRenderer) {
        let section: ConfigSection = serde_json::from_str(json).unwrap();
        let registry = ModifierRegistry::default();
        let definition = EffectDefinition::from_section(&section, &registry).unwrap();
        let renderer = RecordingRenderer::default();
        let effect = SpellEffect::new(
            definition,
            Box::new(renderer.clone()),
            Arc::new(scheduler.clone()),
        )
        .with_rng(Rng::new(seed));
        return (effect, renderer);
    }
}
