/// Per cast context threaded through effect resolution
pub mod cast;
/// Configuration value resolution
pub mod config;
/// The effect engine: definitions, gating, dispatch and patterns
pub mod effects;
/// Effect placement math
pub mod geometry;
/// Eligibility rules effects can be gated behind
pub mod modifiers;
/// Seedable rng
pub mod random;
/// Tick based task scheduling
pub mod scheduler;
/// The spell registry, cast hand-off and item binding
pub mod spells;

use bevy::prelude::*;

pub mod prelude {
    pub use crate::cast::CastData;
    pub use crate::effects::{
        particles::ParticleBurst, sound::SoundRequest, ActiveChecker, AnimationHandle,
        EffectDefinition, EffectRenderer, EffectTypeRegistry, ManagedAnimation, SpellEffect,
    };
    pub use crate::geometry::EffectLocation;
    pub use crate::modifiers::{Modifier, ModifierRegistry, ModifierSet};
    pub use crate::scheduler::{
        Scheduler, TaskControl, TaskHandle, TickScheduler, TICKS_PER_SECOND,
    };
    pub use crate::spells::{
        bind::{BindConfig, BindRequest, ChatMessage, Spellbook},
        EffectPosition, Spell, SpellCastEvent, Spells,
    };
    pub use crate::SpellsPlugin;
}

/// Adds the spell system to an fmc style server.
///
/// Spells are loaded from `config/spells/` at startup. Register custom
/// effect types and modifiers before then:
/// ```no_run
/// use bevy::prelude::*;
/// use spellweave::prelude::*;
///
/// fn main() {
///     App::new().add_plugins(SpellsPlugin).run();
/// }
/// ```
pub struct SpellsPlugin;
impl Plugin for SpellsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<scheduler::TickScheduler>()
            .init_resource::<effects::EffectTypeRegistry>()
            .init_resource::<modifiers::ModifierRegistry>()
            .init_resource::<spells::bind::BindConfig>()
            .add_event::<effects::particles::ParticleBurst>()
            .add_event::<effects::sound::SoundRequest>()
            .add_event::<spells::SpellCastEvent>()
            .add_event::<spells::bind::BindRequest>()
            .add_event::<spells::bind::ChatMessage>()
            .add_systems(PreStartup, spells::load_spells)
            .add_systems(
                Update,
                (
                    scheduler::run_scheduled_tasks,
                    spells::play_cast_effects,
                    spells::bind::handle_bind_requests,
                )
                    .chain(),
            );
    }
}
