use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bevy::prelude::*;
use serde_json::Value;

use crate::{
    cast::CastData,
    config::{self, ConfigSection},
};

use super::{EffectPosition, Spell, Spells};

pub type ItemId = u32;

/// Item id used when binding to an empty hand.
pub const FIST_ITEM_ID: ItemId = 0;

/// A player's spells: which ones they know and which items they are
/// bound to. Persistence is left to the host.
#[derive(Component, Default)]
pub struct Spellbook {
    known: HashSet<String>,
    bindings: HashMap<ItemId, String>,
}

impl Spellbook {
    pub fn learn(&mut self, spell: impl Into<String>) {
        self.known.insert(spell.into());
    }

    pub fn forget(&mut self, spell: &str) {
        self.known.remove(spell);
        self.bindings.retain(|_, bound| bound != spell);
    }

    pub fn knows(&self, spell: &str) -> bool {
        self.known.contains(spell)
    }

    pub fn bind(&mut self, item: ItemId, spell: impl Into<String>) {
        self.bindings.insert(item, spell.into());
    }

    pub fn unbind(&mut self, item: ItemId) -> Option<String> {
        self.bindings.remove(&item)
    }

    pub fn bound_spell(&self, item: ItemId) -> Option<&str> {
        self.bindings.get(&item).map(String::as_str)
    }
}

/// A player asking to bind a spell to the item they are holding.
#[derive(Event, Debug)]
pub struct BindRequest {
    pub player: Entity,
    pub spell_name: String,
    /// The held item, `None` for an empty hand.
    pub held_item: Option<ItemId>,
}

/// Feedback line for the host to deliver to a player's chat.
#[derive(Event, Debug, Clone)]
pub struct ChatMessage {
    pub player: Entity,
    pub message: String,
}

/// Rules and feedback strings for the bind command.
#[derive(Resource, Clone)]
pub struct BindConfig {
    /// Restricts which items spells may be bound to. `None` allows all.
    pub bindable_items: Option<HashSet<ItemId>>,
    pub allow_bind_to_fist: bool,
    /// Restricts which spells this command may bind. `None` allows all.
    pub allowed_spells: Option<HashSet<String>>,
    pub str_usage: String,
    pub str_no_spell: String,
    pub str_cant_bind_spell: String,
    pub str_cant_bind_item: String,
    /// Success message, `%s` is replaced with the spell's display name.
    pub str_bound: String,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            bindable_items: None,
            allow_bind_to_fist: false,
            allowed_spells: None,
            str_usage: String::from(
                "You must specify a spell name and hold an item in your hand.",
            ),
            str_no_spell: String::from("You do not know a spell by that name."),
            str_cant_bind_spell: String::from("That spell cannot be bound to an item."),
            str_cant_bind_item: String::from("That spell cannot be bound to that item."),
            str_bound: String::from("Bound %s."),
        }
    }
}

impl BindConfig {
    pub fn from_section(section: &ConfigSection) -> Self {
        let defaults = Self::default();

        let bindable_items = section.get("bindable-items").and_then(Value::as_array).map(
            |items| {
                items
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(|item| item as ItemId)
                    .collect()
            },
        );

        let allowed_spells = section.get("allowed-spells").and_then(Value::as_array).map(
            |spells| {
                spells
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            },
        );

        Self {
            bindable_items,
            allow_bind_to_fist: config::get_bool(section, "allow-bind-to-fist", false),
            allowed_spells,
            str_usage: config::get_string(section, "str-usage", &defaults.str_usage),
            str_no_spell: config::get_string(section, "str-no-spell", &defaults.str_no_spell),
            str_cant_bind_spell: config::get_string(
                section,
                "str-cant-bind-spell",
                &defaults.str_cant_bind_spell,
            ),
            str_cant_bind_item: config::get_string(
                section,
                "str-cant-bind-item",
                &defaults.str_cant_bind_item,
            ),
            str_bound: config::get_string(section, "str-bound", &defaults.str_bound),
        }
    }
}

/// Validates bind requests and records the binding, answering every
/// request with a chat line. Successful binds play the spell's caster
/// effects as confirmation.
pub fn handle_bind_requests(world: &mut World) {
    let requests: Vec<BindRequest> = world
        .resource_mut::<Events<BindRequest>>()
        .drain()
        .collect();
    if requests.is_empty() {
        return;
    }

    let bind_config = world.resource::<BindConfig>().clone();
    let spells = world.resource::<Spells>().clone();

    for request in requests {
        match validate(world, &bind_config, &spells, &request) {
            Ok(spell) => {
                let item = request.held_item.unwrap_or(FIST_ITEM_ID);
                world
                    .get_mut::<Spellbook>(request.player)
                    .unwrap()
                    .bind(item, spell.internal_name());

                world.send_event(ChatMessage {
                    player: request.player,
                    message: bind_config
                        .str_bound
                        .replace("%s", spell.display_name()),
                });

                let data = CastData::new(request.player);
                spell.play_effects_at_entity(
                    world,
                    EffectPosition::Caster,
                    request.player,
                    Some(&data),
                );
            }
            Err(message) => {
                world.send_event(ChatMessage {
                    player: request.player,
                    message,
                });
            }
        }
    }
}

fn validate(
    world: &World,
    config: &BindConfig,
    spells: &Spells,
    request: &BindRequest,
) -> Result<Arc<Spell>, String> {
    if request.spell_name.is_empty() {
        return Err(config.str_usage.clone());
    }

    let Some(spell) = spells
        .get(&request.spell_name)
        .or_else(|| spells.get_by_display_name(&request.spell_name))
    else {
        return Err(config.str_no_spell.clone());
    };

    let Some(spellbook) = world.get::<Spellbook>(request.player) else {
        return Err(config.str_no_spell.clone());
    };
    if !spellbook.knows(spell.internal_name()) {
        return Err(config.str_no_spell.clone());
    }

    if !spell.bindable() {
        return Err(config.str_cant_bind_spell.clone());
    }
    if let Some(allowed) = &config.allowed_spells {
        if !allowed.contains(spell.internal_name()) {
            return Err(config.str_cant_bind_spell.clone());
        }
    }

    let Some(item) = request.held_item else {
        if config.allow_bind_to_fist {
            return Ok(spell.clone());
        }
        return Err(config.str_cant_bind_item.clone());
    };
    if let Some(bindable) = &config.bindable_items {
        if !bindable.contains(&item) {
            return Err(config.str_cant_bind_item.clone());
        }
    }

    return Ok(spell.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(config: BindConfig) -> (World, Entity) {
        let mut world = World::new();
        world.init_resource::<Events<BindRequest>>();
        world.init_resource::<Events<ChatMessage>>();
        world.insert_resource(config);

        let mut spells = Spells::default();
        spells.insert(Spell::new("blink").with_display_name("Blink"));
        spells.insert(Spell::new("decorate").with_bindable(false));
        world.insert_resource(spells);

        let mut spellbook = Spellbook::default();
        spellbook.learn("blink");
        spellbook.learn("decorate");
        let player = world.spawn(spellbook).id();

        return (world, player);
    }

    fn request(world: &mut World, player: Entity, spell_name: &str, item: Option<ItemId>) {
        world.send_event(BindRequest {
            player,
            spell_name: spell_name.to_owned(),
            held_item: item,
        });
        handle_bind_requests(world);
    }

    fn last_message(world: &mut World) -> String {
        let messages: Vec<ChatMessage> = world
            .resource_mut::<Events<ChatMessage>>()
            .drain()
            .collect();
        messages.last().expect("no chat feedback").message.clone()
    }

    #[test]
    fn binds_a_known_spell_to_the_held_item() {
        let (mut world, player) = setup(BindConfig::default());
        request(&mut world, player, "blink", Some(7));

        assert_eq!(last_message(&mut world), "Bound Blink.");
        let spellbook = world.get::<Spellbook>(player).unwrap();
        assert_eq!(spellbook.bound_spell(7), Some("blink"));
    }

    #[test]
    fn display_names_resolve_too() {
        let (mut world, player) = setup(BindConfig::default());
        request(&mut world, player, "Blink", Some(3));
        let spellbook = world.get::<Spellbook>(player).unwrap();
        assert_eq!(spellbook.bound_spell(3), Some("blink"));
    }

    #[test]
    fn rejects_missing_or_unknown_spells() {
        let (mut world, player) = setup(BindConfig::default());

        request(&mut world, player, "", Some(7));
        assert_eq!(
            last_message(&mut world),
            BindConfig::default().str_usage
        );

        request(&mut world, player, "fireball", Some(7));
        assert_eq!(
            last_message(&mut world),
            BindConfig::default().str_no_spell
        );
        assert!(world
            .get::<Spellbook>(player)
            .unwrap()
            .bound_spell(7)
            .is_none());
    }

    #[test]
    fn rejects_unbindable_spells() {
        let (mut world, player) = setup(BindConfig::default());
        request(&mut world, player, "decorate", Some(7));
        assert_eq!(
            last_message(&mut world),
            BindConfig::default().str_cant_bind_spell
        );
    }

    #[test]
    fn respects_the_allow_list() {
        let config = BindConfig {
            allowed_spells: Some(HashSet::from(["decorate".to_owned()])),
            ..Default::default()
        };
        let (mut world, player) = setup(config);
        request(&mut world, player, "blink", Some(7));
        assert_eq!(
            last_message(&mut world),
            BindConfig::default().str_cant_bind_spell
        );
    }

    #[test]
    fn empty_hands_need_permission() {
        let (mut world, player) = setup(BindConfig::default());
        request(&mut world, player, "blink", None);
        assert_eq!(
            last_message(&mut world),
            BindConfig::default().str_cant_bind_item
        );

        let config = BindConfig {
            allow_bind_to_fist: true,
            ..Default::default()
        };
        let (mut world, player) = setup(config);
        request(&mut world, player, "blink", None);
        let spellbook = world.get::<Spellbook>(player).unwrap();
        assert_eq!(spellbook.bound_spell(FIST_ITEM_ID), Some("blink"));
    }

    #[test]
    fn respects_the_bindable_item_list() {
        let config = BindConfig {
            bindable_items: Some(HashSet::from([1, 2])),
            ..Default::default()
        };
        let (mut world, player) = setup(config);

        request(&mut world, player, "blink", Some(7));
        assert_eq!(
            last_message(&mut world),
            BindConfig::default().str_cant_bind_item
        );

        request(&mut world, player, "blink", Some(2));
        let spellbook = world.get::<Spellbook>(player).unwrap();
        assert_eq!(spellbook.bound_spell(2), Some("blink"));
    }
}
