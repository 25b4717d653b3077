use bevy::{
    math::{DQuat, DVec3},
    prelude::*,
};

use crate::{
    cast::CastData,
    geometry::EffectLocation,
    scheduler::{TaskControl, TICKS_PER_SECOND},
};

use super::{ActiveChecker, AnimationHandle, SpellEffect};

/// Re-plays an effect at an entity's live location every interval, an
/// aura that follows its owner. Stops for good the first time the checker
/// fails or the entity disappears.
pub(super) struct BuffTracker {
    effect: SpellEffect,
    entity: Entity,
    checker: ActiveChecker,
    data: Option<CastData>,
}

impl BuffTracker {
    pub(super) fn new(
        effect: SpellEffect,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<CastData>,
    ) -> Self {
        Self {
            effect,
            entity,
            checker,
            data,
        }
    }

    pub(super) fn tick(&mut self, world: &mut World) -> TaskControl {
        if !(self.checker)(world, self.entity) {
            return TaskControl::Stop;
        }
        let Some(location) = world.get::<EffectLocation>(self.entity).copied() else {
            return TaskControl::Stop;
        };

        self.effect
            .play_at_location(world, &location, self.data.as_ref());
        return TaskControl::Continue;
    }
}

/// Spins an effect around an entity. Same lifetime rules as
/// [`BuffTracker`], plus the rotation state.
pub(super) struct OrbitTracker {
    effect: SpellEffect,
    entity: Entity,
    checker: ActiveChecker,
    data: Option<CastData>,
    path: OrbitPath,
}

impl OrbitTracker {
    pub(super) fn new(
        effect: SpellEffect,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<CastData>,
    ) -> Self {
        let path = OrbitPath::new(&effect, data.as_ref());
        Self {
            effect,
            entity,
            checker,
            data,
            path,
        }
    }

    pub(super) fn tick(&mut self, world: &mut World) -> TaskControl {
        if !(self.checker)(world, self.entity) {
            return TaskControl::Stop;
        }
        let Some(center) = world.get::<EffectLocation>(self.entity).copied() else {
            return TaskControl::Stop;
        };

        self.path.advance();
        let point = self.path.point_around(&center);
        self.effect
            .play_at_location(world, &point, self.data.as_ref());
        return TaskControl::Continue;
    }
}

/// Buff pattern rendered through one managed animation instead of a fresh
/// effect instance per tick. The animation is created on the first tick
/// and repositioned from then on.
pub(super) struct BuffAnimationTracker {
    effect: SpellEffect,
    entity: Entity,
    checker: ActiveChecker,
    data: Option<CastData>,
    animation: Option<AnimationHandle>,
    started: bool,
}

impl BuffAnimationTracker {
    pub(super) fn new(
        effect: SpellEffect,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<CastData>,
    ) -> Self {
        Self {
            effect,
            entity,
            checker,
            data,
            animation: None,
            started: false,
        }
    }

    pub(super) fn tick(&mut self, world: &mut World) -> TaskControl {
        if !(self.checker)(world, self.entity) {
            self.shutdown(world);
            return TaskControl::Stop;
        }
        let Some(mut location) = world.get::<EffectLocation>(self.entity).copied() else {
            self.shutdown(world);
            return TaskControl::Stop;
        };
        self.effect.apply_offsets(&mut location, self.data.as_ref());

        if !self.started {
            self.started = true;
            self.animation =
                self.effect
                    .start_animation_unchecked(world, &location, self.data.as_ref());
            if self.animation.is_none() {
                // Nothing to drive.
                return TaskControl::Stop;
            }
        } else if let Some(animation) = self.animation.as_mut() {
            animation.move_to(world, &location);
        }
        return TaskControl::Continue;
    }

    fn shutdown(&mut self, world: &mut World) {
        if let Some(mut animation) = self.animation.take() {
            animation.stop(world);
        }
    }
}

/// Orbit pattern rendered through one managed animation repositioned
/// along the orbit every tick.
pub(super) struct OrbitAnimationTracker {
    effect: SpellEffect,
    entity: Entity,
    checker: ActiveChecker,
    data: Option<CastData>,
    path: OrbitPath,
    animation: Option<AnimationHandle>,
    started: bool,
}

impl OrbitAnimationTracker {
    pub(super) fn new(
        effect: SpellEffect,
        entity: Entity,
        checker: ActiveChecker,
        data: Option<CastData>,
    ) -> Self {
        let path = OrbitPath::new(&effect, data.as_ref());
        Self {
            effect,
            entity,
            checker,
            data,
            path,
            animation: None,
            started: false,
        }
    }

    pub(super) fn tick(&mut self, world: &mut World) -> TaskControl {
        if !(self.checker)(world, self.entity) {
            self.shutdown(world);
            return TaskControl::Stop;
        }
        let Some(center) = world.get::<EffectLocation>(self.entity).copied() else {
            self.shutdown(world);
            return TaskControl::Stop;
        };

        self.path.advance();
        let mut point = self.path.point_around(&center);
        self.effect.apply_offsets(&mut point, self.data.as_ref());

        if !self.started {
            self.started = true;
            self.animation =
                self.effect
                    .start_animation_unchecked(world, &point, self.data.as_ref());
            if self.animation.is_none() {
                return TaskControl::Stop;
            }
        } else if let Some(animation) = self.animation.as_mut() {
            animation.move_to(world, &point);
        }
        return TaskControl::Continue;
    }

    fn shutdown(&mut self, world: &mut World) {
        if let Some(mut animation) = self.animation.take() {
            animation.stop(world);
        }
    }
}

/// The numeric state of an orbit, resolved once when the tracker starts.
struct OrbitPath {
    interval: u32,
    ticks_elapsed: u32,
    // Degrees.
    angle: f32,
    step: f32,
    radius: f32,
    y_offset: f32,
    horiz_offset: f32,
    horiz_expand_radius: f32,
    vert_expand_radius: f32,
    horiz_expand_delay: u32,
    vert_expand_delay: u32,
    x_axis: f32,
    y_axis: f32,
    z_axis: f32,
}

impl OrbitPath {
    fn new(effect: &SpellEffect, data: Option<&CastData>) -> Self {
        let definition = effect.definition();
        let interval = effect.interval(data);

        let seconds_per_revolution = definition.seconds_per_revolution.get(data);
        let mut step =
            360.0 / (seconds_per_revolution * TICKS_PER_SECOND as f32) * interval as f32;
        if !step.is_finite() {
            step = 0.0;
        }
        if definition.counter_clockwise {
            step = -step;
        }

        Self {
            interval,
            ticks_elapsed: 0,
            angle: 0.0,
            step,
            radius: definition.orbit_radius.get(data),
            y_offset: definition.orbit_y_offset.get(data),
            horiz_offset: definition.horiz_offset.get(data),
            horiz_expand_radius: definition.horiz_expand_radius.get(data),
            vert_expand_radius: definition.vert_expand_radius.get(data),
            horiz_expand_delay: definition.horiz_expand_delay.get(data).max(0) as u32,
            vert_expand_delay: definition.vert_expand_delay.get(data).max(0) as u32,
            x_axis: definition.orbit_x_axis.get(data),
            y_axis: definition.orbit_y_axis.get(data),
            z_axis: definition.orbit_z_axis.get(data),
        }
    }

    fn advance(&mut self) {
        self.ticks_elapsed += self.interval;

        // Expansion grows linearly once its delay has passed, without any
        // upper bound. Expanding patterns are expected to be stopped by
        // their checker.
        if self.horiz_expand_radius != 0.0 && self.ticks_elapsed >= self.horiz_expand_delay {
            self.radius += self.horiz_expand_radius;
        }
        if self.vert_expand_radius != 0.0 && self.ticks_elapsed >= self.vert_expand_delay {
            self.y_offset += self.vert_expand_radius;
        }

        self.angle = (self.angle + self.step).rem_euclid(360.0);
    }

    fn point_around(&self, center: &EffectLocation) -> EffectLocation {
        let angle = (self.angle as f64).to_radians();
        let mut orbit = DVec3::new(
            self.radius as f64 * angle.cos(),
            0.0,
            self.radius as f64 * angle.sin(),
        );
        orbit = rotate_axes(orbit, self.x_axis, self.y_axis, self.z_axis);

        let mut location = *center;
        location.position += orbit;
        location.position.y += self.y_offset as f64;
        if self.horiz_offset != 0.0 {
            location.position += center.right() * self.horiz_offset as f64;
        }
        return location;
    }
}

fn rotate_axes(vector: DVec3, x_degrees: f32, y_degrees: f32, z_degrees: f32) -> DVec3 {
    let mut vector = vector;
    if x_degrees != 0.0 {
        vector = DQuat::from_rotation_x((x_degrees as f64).to_radians()) * vector;
    }
    if y_degrees != 0.0 {
        vector = DQuat::from_rotation_y((y_degrees as f64).to_radians()) * vector;
    }
    if z_degrees != 0.0 {
        vector = DQuat::from_rotation_z((z_degrees as f64).to_radians()) * vector;
    }
    return vector;
}
