//! Axis-aligned bounds and the actor's collider shape.

use glam::Vec3;
use sm64sync_bridge::MARIO_SCALE;

/// World-space axis-aligned bounding box, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Build from two arbitrary corners.
    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Touching faces count as overlap.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }
}

/// Capsule collider attached to a locally owned actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleShape {
    /// Vertical offset of the capsule centre from the actor origin.
    pub offset: Vec3,
    pub radius: f32,
    pub height: f32,
}

impl CapsuleShape {
    pub fn mario() -> Self {
        Self {
            offset: Vec3::new(0.0, 0.075 * MARIO_SCALE, 0.0),
            radius: 0.05 * MARIO_SCALE,
            height: 0.15 * MARIO_SCALE,
        }
    }

    /// Bounds of the capsule placed at `origin`.
    pub fn bounds_at(&self, origin: Vec3) -> Aabb {
        let center = origin + self.offset;
        let half = Vec3::new(self.radius, self.height * 0.5, self.radius);
        Aabb {
            min: center - half,
            max: center + half,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
