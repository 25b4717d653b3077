use std::collections::HashMap;
use std::sync::Mutex;

use bevy::prelude::*;

use crate::{
    config::ConfigError,
    geometry::EffectLocation,
    random::{Bernoulli, Rng},
};

/// A named eligibility rule an effect can be gated behind.
///
/// Checks are predicates without side effects, though they are free to
/// read world state (positions, components, whatever the rule needs).
pub trait Modifier: Send + Sync {
    fn check_entity(&self, world: &World, entity: Entity) -> bool;

    fn check_location(&self, world: &World, location: &EffectLocation) -> bool {
        let _ = (world, location);
        true
    }
}

/// An ordered conjunction of modifiers, built from an effect's
/// `modifiers`/`location-modifiers` config lists. Passes only if every
/// member passes.
pub struct ModifierSet {
    modifiers: Vec<Box<dyn Modifier>>,
}

impl ModifierSet {
    pub fn new(modifiers: Vec<Box<dyn Modifier>>) -> Self {
        Self { modifiers }
    }

    pub fn from_config(lines: &[String], registry: &ModifierRegistry) -> Result<Self, ConfigError> {
        let mut modifiers = Vec::with_capacity(lines.len());
        for line in lines {
            modifiers.push(registry.create(line)?);
        }
        return Ok(Self { modifiers });
    }

    pub fn check_entity(&self, world: &World, entity: Entity) -> bool {
        self.modifiers
            .iter()
            .all(|modifier| modifier.check_entity(world, entity))
    }

    pub fn check_location(&self, world: &World, location: &EffectLocation) -> bool {
        self.modifiers
            .iter()
            .all(|modifier| modifier.check_location(world, location))
    }
}

type ModifierFactory =
    Box<dyn Fn(&str) -> Result<Box<dyn Modifier>, ConfigError> + Send + Sync + 'static>;

/// Registry of modifier rules, filled in by the host game before spells
/// load. A modifier config line is `"<name> <args...>"`; the factory
/// registered under the name receives the argument remainder.
#[derive(Resource)]
pub struct ModifierRegistry {
    factories: HashMap<String, ModifierFactory>,
}

impl Default for ModifierRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("chance", |args| ChanceModifier::new(args));
        return registry;
    }
}

impl ModifierRegistry {
    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&str) -> Result<Box<dyn Modifier>, ConfigError> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn create(&self, line: &str) -> Result<Box<dyn Modifier>, ConfigError> {
        let line = line.trim();
        let (name, args) = match line.split_once(' ') {
            Some((name, args)) => (name, args.trim()),
            None => (line, ""),
        };

        let Some(factory) = self.factories.get(name) else {
            return Err(ConfigError::UnknownModifier(name.to_owned()));
        };
        return factory(args);
    }
}

/// Built in rule: `chance <percent>` passes that percentage of checks.
struct ChanceModifier {
    gate: Bernoulli,
    rng: Mutex<Rng>,
}

impl ChanceModifier {
    fn new(args: &str) -> Result<Box<dyn Modifier>, ConfigError> {
        let percent: f32 = args.parse().map_err(|_| ConfigError::InvalidModifier {
            name: "chance".to_owned(),
            reason: format!("'{}' is not a percentage", args),
        })?;
        if !(0.0..=100.0).contains(&percent) {
            return Err(ConfigError::InvalidModifier {
                name: "chance".to_owned(),
                reason: format!("{} is outside 0-100", percent),
            });
        }

        Ok(Box::new(Self {
            gate: Bernoulli::new(percent / 100.0),
            rng: Mutex::new(Rng::new(rand::random())),
        }))
    }
}

impl Modifier for ChanceModifier {
    fn check_entity(&self, world: &World, entity: Entity) -> bool {
        let _ = (world, entity);
        self.gate.sample(&mut self.rng.lock().unwrap())
    }

    fn check_location(&self, world: &World, location: &EffectLocation) -> bool {
        let _ = (world, location);
        self.gate.sample(&mut self.rng.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    impl Modifier for Fixed {
        fn check_entity(&self, _world: &World, _entity: Entity) -> bool {
            self.0
        }

        fn check_location(&self, _world: &World, _location: &EffectLocation) -> bool {
            self.0
        }
    }

    #[test]
    fn set_is_a_conjunction() {
        let world = World::new();
        let entity = Entity::from_raw(0);

        let set = ModifierSet::new(vec![Box::new(Fixed(true)), Box::new(Fixed(true))]);
        assert!(set.check_entity(&world, entity));

        let set = ModifierSet::new(vec![Box::new(Fixed(true)), Box::new(Fixed(false))]);
        assert!(!set.check_entity(&world, entity));

        let set = ModifierSet::new(Vec::new());
        assert!(set.check_location(&world, &EffectLocation::default()));
    }

    #[test]
    fn unknown_modifiers_are_fatal() {
        let registry = ModifierRegistry::default();
        let lines = vec!["levitating".to_owned()];
        assert!(ModifierSet::from_config(&lines, &registry).is_err());
    }

    #[test]
    fn chance_rule_parses_and_gates() {
        let registry = ModifierRegistry::default();

        assert!(registry.create("chance 150").is_err());
        assert!(registry.create("chance everytime").is_err());

        let world = World::new();
        let entity = Entity::from_raw(0);
        let always = registry.create("chance 100").unwrap();
        let never = registry.create("chance 0").unwrap();
        for _ in 0..100 {
            assert!(always.check_entity(&world, entity));
            assert!(!never.check_entity(&world, entity));
        }
    }
}
