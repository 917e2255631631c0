//! Collaborators the embedding host provides.
//!
//! The core never touches the scene graph, renderer or network directly; it
//! asks for what it needs through these traits. Every method is called from
//! the single update thread.

use glam::{Quat, Vec2, Vec3};
use sm64sync_bridge::{ActionFlags, MAX_HEALTH_POINTS, StateFlags};

use crate::volume::{Aabb, CapsuleShape};
use crate::{EntityId, UserId, VolumeId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Scene queries and mutations.
pub trait HostWorld {
    fn transform(&self, entity: EntityId) -> Option<Transform>;
    fn set_transform(&mut self, entity: EntityId, transform: Transform);

    /// Whether some participant is currently holding the entity.
    fn is_grabbed(&self, entity: EntityId) -> bool;
    /// Distance from the local viewer's head.
    fn distance_from_viewer(&self, entity: EntityId) -> f32;
    /// Head rotation of a participant, `None` if they left.
    fn view_rotation(&self, user: UserId) -> Option<Quat>;

    fn collider_bounds(&self, entity: EntityId) -> Option<Aabb>;
    fn configure_collider(&mut self, entity: EntityId, shape: CapsuleShape);

    fn volume_bounds(&self, volume: VolumeId) -> Option<Aabb>;
    fn volume_position(&self, volume: VolumeId) -> Vec3;
    fn is_volume_active(&self, volume: VolumeId) -> bool;
    fn set_volume_active(&mut self, volume: VolumeId, active: bool);
    /// Whether the volume sits somewhere under `entity` in the hierarchy.
    fn is_volume_within(&self, volume: VolumeId, entity: EntityId) -> bool;
    /// Whether a mesh-backed volume has readable geometry.
    fn is_volume_geometry_ready(&self, volume: VolumeId) -> bool;

    /// `local_only` keeps the mesh off the replicated scene.
    fn create_renderer(&mut self, entity: EntityId, local_only: bool) -> Box<dyn MarioRenderer>;
    /// Attach the loaded non-modified visual representation.
    fn attach_visual(&mut self, entity: EntityId, asset: &[u8]);
    fn destroy_visual(&mut self, entity: EntityId);
    fn destroy_entity(&mut self, entity: EntityId);
}

/// Material picked from the actor's cap bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterialSelection {
    #[default]
    Normal,
    Vanish,
    Metal,
}

impl MaterialSelection {
    /// Metal wins over vanish.
    pub fn from_state_flags(flags: StateFlags) -> Self {
        if flags.contains(StateFlags::METAL_CAP) {
            MaterialSelection::Metal
        } else if flags.contains(StateFlags::VANISH_CAP) {
            MaterialSelection::Vanish
        } else {
            MaterialSelection::Normal
        }
    }
}

/// Mesh representation owned by one actor.
pub trait MarioRenderer {
    fn set_enabled(&mut self, enabled: bool);
    fn set_material(&mut self, material: MaterialSelection);
    fn update_mesh(&mut self, positions: &[Vec3], normals: &[Vec3]);
    fn update_colors(&mut self, colors: &[Vec3], uvs: &[Vec2]);
    fn destroy(&mut self);
}

// ============================================================================
// Replicated Values
// ============================================================================

/// Controller snapshot shared with every participant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerInput {
    pub joystick: Vec2,
    pub jump: bool,
    pub punch: bool,
    pub crouch: bool,
}

/// Values the authority publishes and mirrors read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicatedVars {
    pub health_points: f32,
    pub action_flags: ActionFlags,
    pub state_flags: StateFlags,
    pub is_shown: bool,
}

impl Default for ReplicatedVars {
    fn default() -> Self {
        Self {
            health_points: MAX_HEALTH_POINTS,
            action_flags: ActionFlags::NONE,
            state_flags: StateFlags::NONE,
            is_shown: true,
        }
    }
}

/// One replicated field write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarioVar {
    HealthPoints(f32),
    ActionFlags(ActionFlags),
    StateFlags(StateFlags),
    IsShown(bool),
}

impl ReplicatedVars {
    pub fn apply(&mut self, var: MarioVar) {
        match var {
            MarioVar::HealthPoints(value) => self.health_points = value,
            MarioVar::ActionFlags(value) => self.action_flags = value,
            MarioVar::StateFlags(value) => self.state_flags = value,
            MarioVar::IsShown(value) => self.is_shown = value,
        }
    }
}

/// The host's networked variable space.
pub trait Replication {
    /// Latest values for an actor, defaults when nothing was published yet.
    fn read_vars(&self, entity: EntityId) -> ReplicatedVars;
    fn write_var(&mut self, entity: EntityId, var: MarioVar);

    fn read_input(&self, entity: EntityId) -> ControllerInput;
    fn write_input(&mut self, entity: EntityId, input: ControllerInput);

    fn read_presence(&self, user: UserId) -> Option<bool>;
    fn write_presence(&mut self, user: UserId, near_any_mario: bool);

    /// Drop everything stored for an actor.
    fn forget(&mut self, entity: EntityId);
}
