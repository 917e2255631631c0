//! Deterministic stand-in for the native engine.
//!
//! [`ScriptedEngine`] records every call it receives, keeps a plain copy of
//! each actor's state that setters mutate, and emits synthetic geometry whose
//! triangle count tests can script tick by tick.

use std::collections::{BTreeMap, VecDeque};

use glam::{Vec2, Vec3};

use crate::FULL_HEALTH_RAW;
use crate::engine::{
    RawGeometryOut, RawInputs, RawMarioId, RawMarioState, RawSurface, RawTickOutput,
    SimulationEngine,
};
use crate::flags::SurfaceType;

/// Raw health restored or removed per wedge.
const WEDGE_RAW: i16 = (FULL_HEALTH_RAW / 8) as i16;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    GlobalInit,
    GlobalTerminate,
    StaticSurfaces { count: usize },
    Create { position: [f32; 3] },
    Tick { id: RawMarioId, inputs: RawInputs },
    Delete { id: RawMarioId },
    SetAction { id: RawMarioId, action: u32 },
    SetState { id: RawMarioId, flags: u32 },
    SetPosition { id: RawMarioId, position: [f32; 3] },
    SetAngle { id: RawMarioId, angle: [f32; 3] },
    SetFaceAngle { id: RawMarioId, angle: f32 },
    SetVelocity { id: RawMarioId, velocity: [f32; 3] },
    SetForwardVelocity { id: RawMarioId, velocity: f32 },
    SetHealth { id: RawMarioId, health: u16 },
    Heal { id: RawMarioId, wedges: u8 },
    TakeDamage { id: RawMarioId, damage: u32, position: [f32; 3] },
    Cap { id: RawMarioId, flag: u32, ticks: u16, play_music: bool },
    CapExtend { id: RawMarioId, ticks: u16 },
    WaterLevel { id: RawMarioId, level: i32 },
    GasLevel { id: RawMarioId, level: i32 },
    FindFloor,
    PlaySound { bits: u32 },
}

impl EngineCall {
    /// Actor the call was addressed to, if any.
    pub fn mario(&self) -> Option<RawMarioId> {
        match *self {
            EngineCall::Tick { id, .. }
            | EngineCall::Delete { id }
            | EngineCall::SetAction { id, .. }
            | EngineCall::SetState { id, .. }
            | EngineCall::SetPosition { id, .. }
            | EngineCall::SetAngle { id, .. }
            | EngineCall::SetFaceAngle { id, .. }
            | EngineCall::SetVelocity { id, .. }
            | EngineCall::SetForwardVelocity { id, .. }
            | EngineCall::SetHealth { id, .. }
            | EngineCall::Heal { id, .. }
            | EngineCall::TakeDamage { id, .. }
            | EngineCall::Cap { id, .. }
            | EngineCall::CapExtend { id, .. }
            | EngineCall::WaterLevel { id, .. }
            | EngineCall::GasLevel { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ScriptedMario {
    state: RawMarioState,
    triangle_script: VecDeque<u16>,
    triangles: u16,
    ticks: u32,
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    calls: Vec<EngineCall>,
    marios: BTreeMap<RawMarioId, ScriptedMario>,
    next_id: RawMarioId,
    max_marios: usize,
    fail_next_create: bool,
    floor: (f32, i16),
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            marios: BTreeMap::new(),
            next_id: 0,
            max_marios: usize::MAX,
            fail_next_create: false,
            floor: (-10_000.0, SurfaceType::DEFAULT.0),
        }
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    /// Calls addressed to one actor.
    pub fn calls_for(&self, id: RawMarioId) -> Vec<EngineCall> {
        self.calls
            .iter()
            .filter(|call| call.mario() == Some(id))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// The next `mario_create` returns the exhaustion sentinel.
    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    pub fn set_max_marios(&mut self, max: usize) {
        self.max_marios = max;
    }

    /// Floor returned by `find_floor`, height in engine units.
    pub fn set_floor(&mut self, height: f32, surface: SurfaceType) {
        self.floor = (height, surface.0);
    }

    /// Triangle counts emitted by the next ticks of `id`, one per tick. Once
    /// exhausted the last count repeats.
    pub fn script_triangles(&mut self, id: RawMarioId, counts: &[u16]) {
        if let Some(mario) = self.marios.get_mut(&id) {
            mario.triangle_script.extend(counts.iter().copied());
        }
    }

    /// Mutable engine-side state of a live actor.
    pub fn state_mut(&mut self, id: RawMarioId) -> Option<&mut RawMarioState> {
        self.marios.get_mut(&id).map(|mario| &mut mario.state)
    }

    pub fn state(&self, id: RawMarioId) -> Option<&RawMarioState> {
        self.marios.get(&id).map(|mario| &mario.state)
    }

    pub fn is_live(&self, id: RawMarioId) -> bool {
        self.marios.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.marios.len()
    }

    /// How many times `id` was deleted.
    pub fn delete_count(&self, id: RawMarioId) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == EngineCall::Delete { id })
            .count()
    }

    fn with_state(&mut self, id: RawMarioId, apply: impl FnOnce(&mut RawMarioState)) {
        if let Some(mario) = self.marios.get_mut(&id) {
            apply(&mut mario.state);
        }
    }
}

impl SimulationEngine for ScriptedEngine {
    fn global_init(&mut self, _rom: &[u8], _texture_out: &mut [u8]) {
        self.calls.push(EngineCall::GlobalInit);
    }

    fn global_terminate(&mut self) {
        self.calls.push(EngineCall::GlobalTerminate);
        self.marios.clear();
    }

    fn static_surfaces_load(&mut self, surfaces: &[RawSurface]) {
        self.calls.push(EngineCall::StaticSurfaces {
            count: surfaces.len(),
        });
    }

    fn mario_create(&mut self, x: f32, y: f32, z: f32) -> RawMarioId {
        self.calls.push(EngineCall::Create {
            position: [x, y, z],
        });

        if self.fail_next_create || self.marios.len() >= self.max_marios {
            self.fail_next_create = false;
            return i32::MAX;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.marios.insert(
            id,
            ScriptedMario {
                state: RawMarioState {
                    position: [x, y, z],
                    health: FULL_HEALTH_RAW as i16,
                    ..Default::default()
                },
                triangle_script: VecDeque::new(),
                triangles: 0,
                ticks: 0,
            },
        );
        id
    }

    fn mario_tick(&mut self, id: RawMarioId, inputs: &RawInputs, out: RawGeometryOut<'_>) -> RawTickOutput {
        self.calls.push(EngineCall::Tick {
            id,
            inputs: *inputs,
        });

        let Some(mario) = self.marios.get_mut(&id) else {
            return RawTickOutput {
                state: RawMarioState::default(),
                triangles_used: 0,
            };
        };

        if let Some(next) = mario.triangle_script.pop_front() {
            mario.triangles = next;
        }
        mario.ticks += 1;

        let vertices = (usize::from(mario.triangles) * 3).min(out.positions.len());
        for i in 0..vertices {
            out.positions[i] = Vec3::new(i as f32 + 1.0, mario.ticks as f32, id as f32);
            out.normals[i] = Vec3::Y;
            out.colors[i] = Vec3::ONE;
            out.uvs[i] = Vec2::splat(0.5);
        }

        RawTickOutput {
            state: mario.state,
            triangles_used: mario.triangles,
        }
    }

    fn mario_delete(&mut self, id: RawMarioId) {
        self.calls.push(EngineCall::Delete { id });
        self.marios.remove(&id);
    }

    fn set_action(&mut self, id: RawMarioId, action: u32) {
        self.calls.push(EngineCall::SetAction { id, action });
        self.with_state(id, |state| state.action = action);
    }

    fn set_state(&mut self, id: RawMarioId, flags: u32) {
        self.calls.push(EngineCall::SetState { id, flags });
        self.with_state(id, |state| state.flags = flags);
    }

    fn set_position(&mut self, id: RawMarioId, x: f32, y: f32, z: f32) {
        self.calls.push(EngineCall::SetPosition {
            id,
            position: [x, y, z],
        });
        self.with_state(id, |state| state.position = [x, y, z]);
    }

    fn set_angle(&mut self, id: RawMarioId, x: f32, y: f32, z: f32) {
        self.calls.push(EngineCall::SetAngle {
            id,
            angle: [x, y, z],
        });
        self.with_state(id, |state| state.face_angle = y);
    }

    fn set_face_angle(&mut self, id: RawMarioId, y: f32) {
        self.calls.push(EngineCall::SetFaceAngle { id, angle: y });
        self.with_state(id, |state| state.face_angle = y);
    }

    fn set_velocity(&mut self, id: RawMarioId, x: f32, y: f32, z: f32) {
        self.calls.push(EngineCall::SetVelocity {
            id,
            velocity: [x, y, z],
        });
        self.with_state(id, |state| state.velocity = [x, y, z]);
    }

    fn set_forward_velocity(&mut self, id: RawMarioId, velocity: f32) {
        self.calls
            .push(EngineCall::SetForwardVelocity { id, velocity });
    }

    fn set_health(&mut self, id: RawMarioId, health: u16) {
        self.calls.push(EngineCall::SetHealth { id, health });
        self.with_state(id, |state| {
            state.health = health.min(FULL_HEALTH_RAW) as i16;
        });
    }

    fn heal(&mut self, id: RawMarioId, wedges: u8) {
        self.calls.push(EngineCall::Heal { id, wedges });
        self.with_state(id, |state| {
            let healed = state.health.saturating_add(WEDGE_RAW.saturating_mul(i16::from(wedges)));
            state.health = healed.min(FULL_HEALTH_RAW as i16);
        });
    }

    fn take_damage(&mut self, id: RawMarioId, damage: u32, _subtype: u32, x: f32, y: f32, z: f32) {
        self.calls.push(EngineCall::TakeDamage {
            id,
            damage,
            position: [x, y, z],
        });
        self.with_state(id, |state| {
            let loss = i16::try_from(damage).unwrap_or(i16::MAX);
            state.health = state.health.saturating_sub(WEDGE_RAW.saturating_mul(loss)).max(0);
        });
    }

    fn interact_cap(&mut self, id: RawMarioId, cap_flag: u32, cap_time: u16, play_music: bool) {
        self.calls.push(EngineCall::Cap {
            id,
            flag: cap_flag,
            ticks: cap_time,
            play_music,
        });
        self.with_state(id, |state| state.flags |= cap_flag);
    }

    fn extend_cap(&mut self, id: RawMarioId, cap_time: u16) {
        self.calls.push(EngineCall::CapExtend { id, ticks: cap_time });
    }

    fn set_water_level(&mut self, id: RawMarioId, level: i32) {
        self.calls.push(EngineCall::WaterLevel { id, level });
    }

    fn set_gas_level(&mut self, id: RawMarioId, level: i32) {
        self.calls.push(EngineCall::GasLevel { id, level });
    }

    fn find_floor(&mut self, _x: f32, _y: f32, _z: f32) -> (f32, i16) {
        self.calls.push(EngineCall::FindFloor);
        self.floor
    }

    fn play_sound_global(&mut self, sound_bits: u32) {
        self.calls.push(EngineCall::PlaySound { bits: sound_bits });
    }
}
