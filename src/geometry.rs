use bevy::{
    math::{DQuat, DVec3},
    prelude::*,
};

/// A point in the world together with a view direction, the coordinate
/// frame all effect placement works in.
///
/// Entities that effects should be able to track carry this as a
/// component; the host server keeps it in sync with its own transforms.
/// Yaw and pitch are in radians. Yaw zero faces +Z, positive pitch looks
/// down.
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct EffectLocation {
    pub position: DVec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl EffectLocation {
    pub fn new(position: DVec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(position: DVec3, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
        }
    }

    /// Unit vector the location is facing along.
    pub fn direction(&self) -> DVec3 {
        let yaw = self.yaw as f64;
        let pitch = self.pitch as f64;
        return DVec3::new(
            -yaw.sin() * pitch.cos(),
            -pitch.sin(),
            yaw.cos() * pitch.cos(),
        );
    }

    /// Rotates a vector from the location's local frame into world axes.
    /// +Z is forward, +X is the horizontal right hand side.
    pub fn rotate_relative(&self, vector: DVec3) -> DVec3 {
        let rotation = DQuat::from_rotation_y(-(self.yaw as f64))
            * DQuat::from_rotation_x(self.pitch as f64);
        return rotation * vector;
    }

    /// The horizontal right vector, the normalized cross product of up and
    /// the view direction.
    pub fn right(&self) -> DVec3 {
        let direction = self.direction();
        return DVec3::new(direction.z, 0.0, -direction.x).normalize_or_zero();
    }
}

impl Default for EffectLocation {
    fn default() -> Self {
        Self::new(DVec3::ZERO)
    }
}

/// Applies an effect definition's offsets to a location in place.
///
/// The steps run in order against the same position: world-axis offset,
/// entity-relative offset, lateral offset along the horizontal right
/// vector, plain height offset, and forward offset along the horizontal
/// projection of the view direction. Translation never changes the
/// orientation.
pub fn apply_offsets(
    location: &mut EffectLocation,
    offset: DVec3,
    relative_offset: DVec3,
    lateral_offset: f64,
    height_offset: f64,
    forward_offset: f64,
) {
    if offset != DVec3::ZERO {
        location.position += offset;
    }

    if relative_offset != DVec3::ZERO {
        location.position += location.rotate_relative(relative_offset);
    }

    if lateral_offset != 0.0 {
        location.position += location.right() * lateral_offset;
    }

    if height_offset != 0.0 {
        location.position.y += height_offset;
    }

    if forward_offset != 0.0 {
        let mut forward = location.direction();
        forward.y = 0.0;
        location.position += forward.normalize_or_zero() * forward_offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(left: DVec3, right: DVec3) {
        assert!(
            (left - right).length() < 1e-9,
            "{:?} != {:?}",
            left,
            right
        );
    }

    #[test]
    fn zero_offsets_are_identity() {
        let original = EffectLocation::with_rotation(DVec3::new(1.0, 2.0, 3.0), 0.4, -0.2);
        let mut location = original;
        apply_offsets(&mut location, DVec3::ZERO, DVec3::ZERO, 0.0, 0.0, 0.0);
        assert_eq!(location, original);
    }

    #[test]
    fn world_offset_ignores_orientation() {
        let mut location = EffectLocation::with_rotation(DVec3::ZERO, 1.3, 0.7);
        apply_offsets(
            &mut location,
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::ZERO,
            0.0,
            0.0,
            0.0,
        );
        assert_close(location.position, DVec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn relative_offset_follows_yaw() {
        // Facing +Z, a relative forward offset lands straight ahead.
        let mut location = EffectLocation::new(DVec3::ZERO);
        apply_offsets(&mut location, DVec3::ZERO, DVec3::Z, 0.0, 0.0, 0.0);
        assert_close(location.position, DVec3::Z);

        // Turned a quarter counter-clockwise (yaw 90°) forward is -X.
        let mut location =
            EffectLocation::with_rotation(DVec3::ZERO, std::f32::consts::FRAC_PI_2, 0.0);
        apply_offsets(&mut location, DVec3::ZERO, DVec3::Z, 0.0, 0.0, 0.0);
        assert_close(location.position, DVec3::NEG_X);
    }

    #[test]
    fn rotate_relative_forward_matches_direction() {
        let location = EffectLocation::with_rotation(DVec3::ZERO, 0.8, 0.3);
        assert_close(location.rotate_relative(DVec3::Z), location.direction());
    }

    #[test]
    fn lateral_offset_is_horizontal_right() {
        // Facing +Z the right hand side is +X.
        let mut location = EffectLocation::new(DVec3::ZERO);
        apply_offsets(&mut location, DVec3::ZERO, DVec3::ZERO, 2.0, 0.0, 0.0);
        assert_close(location.position, DVec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn height_offset_only_touches_y() {
        let mut location = EffectLocation::with_rotation(DVec3::new(5.0, 1.0, -2.0), 0.9, 0.4);
        apply_offsets(&mut location, DVec3::ZERO, DVec3::ZERO, 0.0, 1.5, 0.0);
        assert_close(location.position, DVec3::new(5.0, 2.5, -2.0));
    }

    #[test]
    fn forward_offset_projects_to_horizontal() {
        // Looking 45° down while facing +Z still moves straight along +Z.
        let mut location =
            EffectLocation::with_rotation(DVec3::ZERO, 0.0, std::f32::consts::FRAC_PI_4);
        apply_offsets(&mut location, DVec3::ZERO, DVec3::ZERO, 0.0, 0.0, 3.0);
        assert_close(location.position, DVec3::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn offsets_apply_in_sequence() {
        let mut location = EffectLocation::new(DVec3::ZERO);
        apply_offsets(
            &mut location,
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::Z,
            1.0,
            2.0,
            1.0,
        );
        // Facing +Z: absolute +Z, relative +Z, lateral +X, height +Y, forward +Z.
        assert_close(location.position, DVec3::new(1.0, 2.0, 3.0));
    }
}
