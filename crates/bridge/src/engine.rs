//! The raw function-call surface of the simulation engine.
//!
//! Everything here is in simulation space: engine units, engine axis
//! conventions, raw health counters. [`crate::Bridge`] is the only caller and
//! owns the translation to world space.

use glam::{Vec2, Vec3};

/// Raw handle returned by the engine. Negative or `i32::MAX` signals failure.
pub type RawMarioId = i32;

/// Controller snapshot for one engine step.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawInputs {
    pub cam_look_x: f32,
    pub cam_look_z: f32,
    pub stick_x: f32,
    pub stick_y: f32,
    pub button_a: u8,
    pub button_b: u8,
    pub button_z: u8,
}

/// Engine-side character state written by every step.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawMarioState {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub face_angle: f32,
    pub health: i16,
    pub action: u32,
    pub flags: u32,
    pub particle_flags: u32,
    pub invinc_timer: i16,
}

/// One static collision triangle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSurface {
    pub surface_type: i16,
    pub force: i16,
    pub terrain: u16,
    pub vertices: [[i32; 3]; 3],
}

/// Output of a single engine step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTickOutput {
    pub state: RawMarioState,
    pub triangles_used: u16,
}

/// Caller-owned geometry destinations for one engine step.
///
/// Every slice holds `3 * GEO_MAX_TRIANGLES` vertices; the engine writes the
/// first `3 * triangles_used` entries and leaves the rest untouched.
pub struct RawGeometryOut<'a> {
    pub positions: &'a mut [Vec3],
    pub normals: &'a mut [Vec3],
    pub colors: &'a mut [Vec3],
    pub uvs: &'a mut [Vec2],
}

/// The engine surface consumed by the bridge.
///
/// Calls are synchronous and blocking, and must all come from the thread
/// that ticks.
pub trait SimulationEngine {
    fn global_init(&mut self, rom: &[u8], texture_out: &mut [u8]);
    fn global_terminate(&mut self);
    fn static_surfaces_load(&mut self, surfaces: &[RawSurface]);

    fn mario_create(&mut self, x: f32, y: f32, z: f32) -> RawMarioId;
    fn mario_tick(&mut self, id: RawMarioId, inputs: &RawInputs, out: RawGeometryOut<'_>) -> RawTickOutput;
    fn mario_delete(&mut self, id: RawMarioId);

    fn set_action(&mut self, id: RawMarioId, action: u32);
    fn set_state(&mut self, id: RawMarioId, flags: u32);
    fn set_position(&mut self, id: RawMarioId, x: f32, y: f32, z: f32);
    fn set_angle(&mut self, id: RawMarioId, x: f32, y: f32, z: f32);
    fn set_face_angle(&mut self, id: RawMarioId, y: f32);
    fn set_velocity(&mut self, id: RawMarioId, x: f32, y: f32, z: f32);
    fn set_forward_velocity(&mut self, id: RawMarioId, velocity: f32);
    fn set_health(&mut self, id: RawMarioId, health: u16);
    fn heal(&mut self, id: RawMarioId, wedges: u8);
    fn take_damage(&mut self, id: RawMarioId, damage: u32, subtype: u32, x: f32, y: f32, z: f32);
    fn interact_cap(&mut self, id: RawMarioId, cap_flag: u32, cap_time: u16, play_music: bool);
    fn extend_cap(&mut self, id: RawMarioId, cap_time: u16);
    fn set_water_level(&mut self, id: RawMarioId, level: i32);
    fn set_gas_level(&mut self, id: RawMarioId, level: i32);

    /// Floor height below a point and the floor's surface type.
    fn find_floor(&mut self, x: f32, y: f32, z: f32) -> (f32, i16);
    fn play_sound_global(&mut self, sound_bits: u32);
}
