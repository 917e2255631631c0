//! World-space wrapper around a [`SimulationEngine`].
//!
//! The host world is right-handed with metres as units; the engine mirrors the
//! X axis and works in its own units. Every position crossing the bridge is
//! `(-x, y, z) * SCALE_FACTOR` on the way in and the inverse on the way out.

use glam::{EulerRot, Quat, Vec2, Vec3};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{RawGeometryOut, RawInputs, RawMarioState, RawSurface, SimulationEngine};
use crate::flags::{ActionFlags, CapKind, StateFlags, SoundId, SurfaceType};
use crate::{
    CAP_TICKS_PER_SECOND, DEAD_HEALTH_RAW, FULL_HEALTH_RAW, INVALID_MARIO_ID, MAX_HEALTH_POINTS,
    MarioId, SCALE_FACTOR,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("simulation engine is already initialized")]
    AlreadyInitialized,
    #[error("simulation engine is not initialized")]
    NotInitialized,
    #[error("engine refused to create a mario at {position}")]
    CreateFailed { position: Vec3 },
}

// ============================================================================
// Coordinate Conversion
// ============================================================================

/// World-space position to engine space.
pub fn to_sim_position(world: Vec3) -> Vec3 {
    Vec3::new(-world.x, world.y, world.z) * SCALE_FACTOR
}

/// Engine-space position to world space.
pub fn to_world_position(sim: Vec3) -> Vec3 {
    let scaled = sim / SCALE_FACTOR;
    Vec3::new(-scaled.x, scaled.y, scaled.z)
}

/// Engine face angle (radians about +Y, mirrored) to a world rotation.
pub fn face_angle_to_rotation(face_angle: f32) -> Quat {
    Quat::from_rotation_y(-face_angle)
}

/// World rotation to the engine face angle (yaw only).
pub fn rotation_to_face_angle(rotation: Quat) -> f32 {
    let (yaw, _, _) = rotation.to_euler(EulerRot::YXZ);
    -yaw
}

fn health_points_from_raw(raw: i16) -> f32 {
    (f32::from(raw.max(0)) * MAX_HEALTH_POINTS / f32::from(FULL_HEALTH_RAW)).min(MAX_HEALTH_POINTS)
}

fn health_raw_from_points(points: f32) -> u16 {
    let clamped = points.clamp(0.0, MAX_HEALTH_POINTS);
    (clamped * f32::from(FULL_HEALTH_RAW) / MAX_HEALTH_POINTS).round() as u16
}

fn cap_ticks(duration_secs: f32) -> u16 {
    (duration_secs.max(0.0) * CAP_TICKS_PER_SECOND).round().min(f32::from(u16::MAX)) as u16
}

// ============================================================================
// World-Space Types
// ============================================================================

/// Simulation input for one fixed step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarioInputs {
    /// Horizontal camera look direction, already mirrored into engine convention.
    pub cam_look: Vec2,
    pub stick: Vec2,
    pub jump: bool,
    pub punch: bool,
    pub crouch: bool,
}

impl MarioInputs {
    fn to_raw(self) -> RawInputs {
        RawInputs {
            cam_look_x: self.cam_look.x,
            cam_look_z: self.cam_look.y,
            stick_x: self.stick.x,
            stick_y: self.stick.y,
            button_a: u8::from(self.jump),
            button_b: u8::from(self.punch),
            button_z: u8::from(self.crouch),
        }
    }
}

/// One simulation-state snapshot in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarioState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Engine face angle; see [`face_angle_to_rotation`].
    pub face_angle: f32,
    pub health_points: f32,
    pub action: ActionFlags,
    pub flags: StateFlags,
    pub is_dead: bool,
}

impl Default for MarioState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            face_angle: 0.0,
            health_points: MAX_HEALTH_POINTS,
            action: ActionFlags::NONE,
            flags: StateFlags::NONE,
            is_dead: false,
        }
    }
}

impl MarioState {
    pub fn rotation(&self) -> Quat {
        face_angle_to_rotation(self.face_angle)
    }

    pub fn is_attacking(&self) -> bool {
        self.action.contains(ActionFlags::FLAG_ATTACKING)
    }

    pub fn has_cap(&self, cap: CapKind) -> bool {
        self.flags.has_cap(cap)
    }
}

impl From<RawMarioState> for MarioState {
    fn from(raw: RawMarioState) -> Self {
        let [x, y, z] = raw.position;
        let [vx, vy, vz] = raw.velocity;
        Self {
            position: to_world_position(Vec3::new(x, y, z)),
            velocity: to_world_position(Vec3::new(vx, vy, vz)),
            face_angle: raw.face_angle,
            health_points: health_points_from_raw(raw.health),
            action: ActionFlags(raw.action),
            flags: StateFlags(raw.flags),
            is_dead: raw.health < DEAD_HEALTH_RAW,
        }
    }
}

/// Result of one fixed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub state: MarioState,
    pub triangles_used: u16,
}

/// Floor classification below a world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloorInfo {
    /// World-space floor height.
    pub height: f32,
    pub surface: SurfaceType,
}

impl Default for FloorInfo {
    /// No floor anywhere below.
    fn default() -> Self {
        Self {
            height: f32::NEG_INFINITY,
            surface: SurfaceType::DEFAULT,
        }
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Owns the engine and its global-init lifecycle.
pub struct Bridge<E> {
    engine: E,
    initialized: bool,
}

impl<E: SimulationEngine> Bridge<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            initialized: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn is_global_init(&self) -> bool {
        self.initialized
    }

    /// Load the ROM-derived data and the static terrain into the engine.
    ///
    /// `texture_out` receives the texture atlas decoded from the ROM.
    pub fn global_init(
        &mut self,
        rom: &[u8],
        texture_out: &mut [u8],
        static_surfaces: &[RawSurface],
    ) -> Result<(), BridgeError> {
        if self.initialized {
            error!("global init requested while the engine is already initialized");
            return Err(BridgeError::AlreadyInitialized);
        }

        self.engine.global_init(rom, texture_out);
        self.engine.static_surfaces_load(static_surfaces);
        self.initialized = true;
        info!(surfaces = static_surfaces.len(), "simulation engine initialized");
        Ok(())
    }

    pub fn global_terminate(&mut self) {
        if !self.initialized {
            return;
        }
        self.engine.global_terminate();
        self.initialized = false;
        info!("simulation engine terminated");
    }

    /// Allocate a new engine actor at a world-space position.
    pub fn create_mario(&mut self, world_position: Vec3) -> Result<MarioId, BridgeError> {
        if !self.initialized {
            return Err(BridgeError::NotInitialized);
        }

        let sim = to_sim_position(world_position);
        let id = self.engine.mario_create(sim.x, sim.y, sim.z);
        if id < 0 || id == INVALID_MARIO_ID {
            return Err(BridgeError::CreateFailed {
                position: world_position,
            });
        }

        debug!(mario_id = id, ?sim, "engine mario created");
        Ok(id)
    }

    /// Advance one fixed step, writing geometry into `out`.
    pub fn tick(
        &mut self,
        id: MarioId,
        inputs: &MarioInputs,
        out: RawGeometryOut<'_>,
    ) -> Result<TickOutput, BridgeError> {
        if !self.initialized {
            return Err(BridgeError::NotInitialized);
        }

        let raw = self.engine.mario_tick(id, &inputs.to_raw(), out);
        Ok(TickOutput {
            state: raw.state.into(),
            triangles_used: raw.triangles_used,
        })
    }

    /// Release an engine actor. Returns `false` when the engine is no longer
    /// initialized and nothing was released.
    pub fn delete_mario(&mut self, id: MarioId) -> bool {
        if !self.initialized {
            return false;
        }
        self.engine.mario_delete(id);
        debug!(mario_id = id, "engine mario deleted");
        true
    }

    fn ready(&self, op: &'static str) -> bool {
        if !self.initialized {
            warn!(op, "engine call skipped, engine not initialized");
        }
        self.initialized
    }

    pub fn set_position(&mut self, id: MarioId, world_position: Vec3) {
        if self.ready("set_position") {
            let sim = to_sim_position(world_position);
            self.engine.set_position(id, sim.x, sim.y, sim.z);
        }
    }

    pub fn set_rotation(&mut self, id: MarioId, rotation: Quat) {
        if self.ready("set_rotation") {
            let (yaw, pitch, roll) = rotation.to_euler(EulerRot::YXZ);
            self.engine.set_angle(id, pitch, -yaw, -roll);
        }
    }

    pub fn set_face_angle(&mut self, id: MarioId, rotation: Quat) {
        if self.ready("set_face_angle") {
            self.engine.set_face_angle(id, rotation_to_face_angle(rotation));
        }
    }

    pub fn set_velocity(&mut self, id: MarioId, world_velocity: Vec3) {
        if self.ready("set_velocity") {
            let sim = to_sim_position(world_velocity);
            self.engine.set_velocity(id, sim.x, sim.y, sim.z);
        }
    }

    pub fn set_forward_velocity(&mut self, id: MarioId, world_velocity: f32) {
        if self.ready("set_forward_velocity") {
            self.engine.set_forward_velocity(id, world_velocity * SCALE_FACTOR);
        }
    }

    pub fn set_health_points(&mut self, id: MarioId, health_points: f32) {
        if self.ready("set_health_points") {
            self.engine.set_health(id, health_raw_from_points(health_points));
        }
    }

    pub fn set_action(&mut self, id: MarioId, action: ActionFlags) {
        if self.ready("set_action") {
            self.engine.set_action(id, action.bits());
        }
    }

    pub fn set_state(&mut self, id: MarioId, flags: StateFlags) {
        if self.ready("set_state") {
            self.engine.set_state(id, flags.bits());
        }
    }

    /// Apply a special cap for `duration_secs`.
    pub fn cap(&mut self, id: MarioId, cap: CapKind, duration_secs: f32, play_music: bool) {
        if self.ready("cap") {
            self.engine
                .interact_cap(id, cap.state_flag().bits(), cap_ticks(duration_secs), play_music);
        }
    }

    /// Extend the currently worn cap. Never plays the jingle.
    pub fn cap_extend(&mut self, id: MarioId, duration_secs: f32) {
        if self.ready("cap_extend") {
            self.engine.extend_cap(id, cap_ticks(duration_secs));
        }
    }

    pub fn heal(&mut self, id: MarioId, wedges: u8) {
        if self.ready("heal") {
            self.engine.heal(id, wedges);
        }
    }

    pub fn take_damage(&mut self, id: MarioId, source: Vec3, damage: u32) {
        if self.ready("take_damage") {
            let sim = to_sim_position(source);
            self.engine.take_damage(id, damage, 0, sim.x, sim.y, sim.z);
        }
    }

    pub fn set_water_level(&mut self, id: MarioId, world_level: f32) {
        if self.ready("set_water_level") {
            self.engine
                .set_water_level(id, (world_level * SCALE_FACTOR).round() as i32);
        }
    }

    pub fn set_gas_level(&mut self, id: MarioId, world_level: f32) {
        if self.ready("set_gas_level") {
            self.engine
                .set_gas_level(id, (world_level * SCALE_FACTOR).round() as i32);
        }
    }

    pub fn find_floor(&mut self, world_position: Vec3) -> FloorInfo {
        if !self.ready("find_floor") {
            return FloorInfo::default();
        }
        let sim = to_sim_position(world_position);
        let (height, surface) = self.engine.find_floor(sim.x, sim.y, sim.z);
        FloorInfo {
            height: height / SCALE_FACTOR,
            surface: SurfaceType(surface),
        }
    }

    pub fn play_sound(&mut self, sound: SoundId) {
        if self.ready("play_sound") {
            self.engine.play_sound_global(sound.bits());
        }
    }
}

impl<E> std::fmt::Debug for Bridge<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{EngineCall, ScriptedEngine};

    fn initialized_bridge() -> Bridge<ScriptedEngine> {
        let mut bridge = Bridge::new(ScriptedEngine::new());
        bridge.global_init(&[], &mut [], &[]).unwrap();
        bridge
    }

    #[test]
    fn test_position_round_trip_mirrors_x() {
        let world = Vec3::new(1.5, 2.0, -3.0);
        let sim = to_sim_position(world);
        assert_eq!(sim, Vec3::new(-1.5 * SCALE_FACTOR, 2.0 * SCALE_FACTOR, -3.0 * SCALE_FACTOR));
        assert_eq!(to_world_position(sim), world);
    }

    #[test]
    fn test_face_angle_rotation_round_trip() {
        for angle in [0.0_f32, 0.5, -1.2, 2.8] {
            let rotation = face_angle_to_rotation(angle);
            assert!((rotation_to_face_angle(rotation) - angle).abs() < 1e-5);
        }
    }

    #[test]
    fn test_double_global_init_fails() {
        let mut bridge = initialized_bridge();
        assert_eq!(
            bridge.global_init(&[], &mut [], &[]),
            Err(BridgeError::AlreadyInitialized)
        );
        assert!(bridge.is_global_init());
    }

    #[test]
    fn test_create_before_init_fails() {
        let mut bridge = Bridge::new(ScriptedEngine::new());
        assert_eq!(
            bridge.create_mario(Vec3::ZERO),
            Err(BridgeError::NotInitialized)
        );
    }

    #[test]
    fn test_create_scales_and_mirrors_position() {
        let mut bridge = initialized_bridge();
        let id = bridge.create_mario(Vec3::new(0.0, 1.0, 0.0)).unwrap();
        assert_ne!(id, INVALID_MARIO_ID);
        assert!(bridge.engine().calls().contains(&EngineCall::Create {
            position: [-0.0, SCALE_FACTOR, 0.0],
        }));
    }

    #[test]
    fn test_create_sentinel_is_error() {
        let mut bridge = initialized_bridge();
        bridge.engine_mut().fail_next_create();
        assert!(matches!(
            bridge.create_mario(Vec3::ONE),
            Err(BridgeError::CreateFailed { .. })
        ));
    }

    #[test]
    fn test_delete_after_terminate_is_skipped() {
        let mut bridge = initialized_bridge();
        let id = bridge.create_mario(Vec3::ZERO).unwrap();
        bridge.global_terminate();
        assert!(!bridge.delete_mario(id));
        assert!(!bridge.engine().calls().contains(&EngineCall::Delete { id }));
    }

    #[test]
    fn test_health_conversion() {
        assert_eq!(health_points_from_raw(FULL_HEALTH_RAW as i16), MAX_HEALTH_POINTS);
        assert_eq!(health_points_from_raw(-5), 0.0);
        assert_eq!(health_raw_from_points(MAX_HEALTH_POINTS), FULL_HEALTH_RAW);
        assert_eq!(health_raw_from_points(1000.0), FULL_HEALTH_RAW);
    }

    #[test]
    fn test_dead_below_one_wedge() {
        let raw = RawMarioState {
            health: DEAD_HEALTH_RAW - 1,
            ..Default::default()
        };
        assert!(MarioState::from(raw).is_dead);

        let alive = RawMarioState {
            health: DEAD_HEALTH_RAW,
            ..Default::default()
        };
        assert!(!MarioState::from(alive).is_dead);
    }

    #[test]
    fn test_cap_duration_in_engine_ticks() {
        let mut bridge = initialized_bridge();
        let id = bridge.create_mario(Vec3::ZERO).unwrap();
        bridge.cap(id, CapKind::Wing, 40.0, true);
        bridge.cap_extend(id, 15.0);

        let calls = bridge.engine().calls();
        assert!(calls.contains(&EngineCall::Cap {
            id,
            flag: StateFlags::WING_CAP.bits(),
            ticks: 1200,
            play_music: true,
        }));
        assert!(calls.contains(&EngineCall::CapExtend { id, ticks: 450 }));
    }

    #[test]
    fn test_floor_height_returned_in_world_units() {
        let mut bridge = initialized_bridge();
        bridge
            .engine_mut()
            .set_floor(-2.0 * SCALE_FACTOR, SurfaceType::DEATH_PLANE);
        let floor = bridge.find_floor(Vec3::ZERO);
        assert_eq!(floor.height, -2.0);
        assert!(floor.surface.is_death_plane());
    }

    #[test]
    fn test_floor_before_init_skips_engine() {
        let mut bridge = Bridge::new(ScriptedEngine::new());
        bridge
            .engine_mut()
            .set_floor(SCALE_FACTOR, SurfaceType::DEATH_PLANE);

        let floor = bridge.find_floor(Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(floor, FloorInfo::default());
        assert!(!floor.surface.is_death_plane());
        assert!(!bridge.engine().calls().contains(&EngineCall::FindFloor));
    }
}
