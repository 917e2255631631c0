//! libsm64 `extern "C"` surface.
//!
//! The embedding host is responsible for linking the native library; this
//! module only declares the symbols and adapts them to [`SimulationEngine`].

#![allow(unsafe_code)]

use std::ffi::c_void;

use glam::{Vec2, Vec3};
use tracing::warn;

use crate::GEO_MAX_VERTICES;
use crate::engine::{
    RawGeometryOut, RawInputs, RawMarioId, RawMarioState, RawSurface, RawTickOutput,
    SimulationEngine,
};

#[repr(C)]
struct SM64MarioGeometryBuffers {
    position: *mut f32,
    normal: *mut f32,
    color: *mut f32,
    uv: *mut f32,
    num_triangles_used: u16,
}

#[repr(C)]
#[allow(dead_code)]
struct SM64SurfaceCollisionData {
    surface_type: i16,
    force: i16,
    flags: i8,
    room: i8,
    lower_y: i32,
    upper_y: i32,
    vertex1: [i32; 3],
    vertex2: [i32; 3],
    vertex3: [i32; 3],
    normal: [f32; 3],
    origin_offset: f32,
    is_valid: u8,
    transform: *mut c_void,
    terrain: u16,
}

unsafe extern "C" {
    fn sm64_global_init(rom: *const u8, out_texture: *mut u8);
    fn sm64_global_terminate();
    fn sm64_static_surfaces_load(surfaces: *const RawSurface, num_surfaces: u32);

    fn sm64_mario_create(x: f32, y: f32, z: f32) -> i32;
    fn sm64_mario_tick(
        mario_id: i32,
        inputs: *const RawInputs,
        out_state: *mut RawMarioState,
        out_buffers: *mut SM64MarioGeometryBuffers,
    );
    fn sm64_mario_delete(mario_id: i32);

    fn sm64_set_mario_action(mario_id: i32, action: u32);
    fn sm64_set_mario_state(mario_id: i32, flags: u32);
    fn sm64_set_mario_position(mario_id: i32, x: f32, y: f32, z: f32);
    fn sm64_set_mario_angle(mario_id: i32, x: f32, y: f32, z: f32);
    fn sm64_set_mario_faceangle(mario_id: i32, y: f32);
    fn sm64_set_mario_velocity(mario_id: i32, x: f32, y: f32, z: f32);
    fn sm64_set_mario_forward_velocity(mario_id: i32, velocity: f32);
    fn sm64_set_mario_health(mario_id: i32, health: u16);
    fn sm64_mario_heal(mario_id: i32, heal_counter: u8);
    fn sm64_mario_take_damage(mario_id: i32, damage: u32, subtype: u32, x: f32, y: f32, z: f32);
    fn sm64_mario_interact_cap(mario_id: i32, cap_flag: u32, cap_time: u16, play_music: u8);
    fn sm64_mario_extend_cap(mario_id: i32, cap_time: u16);
    fn sm64_set_mario_water_level(mario_id: i32, level: i32);
    fn sm64_set_mario_gas_level(mario_id: i32, level: i32);

    fn sm64_surface_find_floor_height_and_data(
        x: f32,
        y: f32,
        z: f32,
        floor: *mut *const SM64SurfaceCollisionData,
    ) -> f32;
    fn sm64_play_sound_global(sound_bits: i32);
}

/// Native libsm64 engine. Only one may exist per process since the library
/// keeps global state.
#[derive(Debug, Default)]
pub struct NativeEngine {
    _private: (),
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimulationEngine for NativeEngine {
    fn global_init(&mut self, rom: &[u8], texture_out: &mut [u8]) {
        // SAFETY: the library reads the ROM image and writes the fixed-size
        // texture atlas into the caller buffer.
        unsafe { sm64_global_init(rom.as_ptr(), texture_out.as_mut_ptr()) }
    }

    fn global_terminate(&mut self) {
        // SAFETY: no pointers cross the boundary.
        unsafe { sm64_global_terminate() }
    }

    fn static_surfaces_load(&mut self, surfaces: &[RawSurface]) {
        let count = u32::try_from(surfaces.len()).unwrap_or(u32::MAX);
        // SAFETY: `RawSurface` matches `struct SM64Surface` and the slice
        // outlives the call; the library copies the surfaces.
        unsafe { sm64_static_surfaces_load(surfaces.as_ptr(), count) }
    }

    fn mario_create(&mut self, x: f32, y: f32, z: f32) -> RawMarioId {
        // SAFETY: plain values only.
        unsafe { sm64_mario_create(x, y, z) }
    }

    fn mario_tick(&mut self, id: RawMarioId, inputs: &RawInputs, out: RawGeometryOut<'_>) -> RawTickOutput {
        let capacity = [
            out.positions.len(),
            out.normals.len(),
            out.colors.len(),
            out.uvs.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0);
        debug_assert!(
            capacity >= GEO_MAX_VERTICES,
            "geometry buffers must hold GEO_MAX_VERTICES vertices"
        );
        if capacity < GEO_MAX_VERTICES {
            warn!(mario_id = id, capacity, "geometry buffers too small, tick skipped");
            return RawTickOutput {
                state: RawMarioState::default(),
                triangles_used: 0,
            };
        }

        let mut state = RawMarioState::default();
        let mut buffers = SM64MarioGeometryBuffers {
            position: out.positions.as_mut_ptr().cast::<f32>(),
            normal: out.normals.as_mut_ptr().cast::<f32>(),
            color: out.colors.as_mut_ptr().cast::<f32>(),
            uv: out.uvs.as_mut_ptr().cast::<f32>(),
            num_triangles_used: 0,
        };

        // SAFETY: `Vec3`/`Vec2` are `repr(C)` float triples/pairs and every
        // buffer holds the engine's maximum vertex count (checked above).
        unsafe { sm64_mario_tick(id, inputs, &mut state, &mut buffers) };

        RawTickOutput {
            state,
            triangles_used: buffers.num_triangles_used,
        }
    }

    fn mario_delete(&mut self, id: RawMarioId) {
        // SAFETY: plain values only.
        unsafe { sm64_mario_delete(id) }
    }

    fn set_action(&mut self, id: RawMarioId, action: u32) {
        unsafe { sm64_set_mario_action(id, action) }
    }

    fn set_state(&mut self, id: RawMarioId, flags: u32) {
        unsafe { sm64_set_mario_state(id, flags) }
    }

    fn set_position(&mut self, id: RawMarioId, x: f32, y: f32, z: f32) {
        unsafe { sm64_set_mario_position(id, x, y, z) }
    }

    fn set_angle(&mut self, id: RawMarioId, x: f32, y: f32, z: f32) {
        unsafe { sm64_set_mario_angle(id, x, y, z) }
    }

    fn set_face_angle(&mut self, id: RawMarioId, y: f32) {
        unsafe { sm64_set_mario_faceangle(id, y) }
    }

    fn set_velocity(&mut self, id: RawMarioId, x: f32, y: f32, z: f32) {
        unsafe { sm64_set_mario_velocity(id, x, y, z) }
    }

    fn set_forward_velocity(&mut self, id: RawMarioId, velocity: f32) {
        unsafe { sm64_set_mario_forward_velocity(id, velocity) }
    }

    fn set_health(&mut self, id: RawMarioId, health: u16) {
        unsafe { sm64_set_mario_health(id, health) }
    }

    fn heal(&mut self, id: RawMarioId, wedges: u8) {
        unsafe { sm64_mario_heal(id, wedges) }
    }

    fn take_damage(&mut self, id: RawMarioId, damage: u32, subtype: u32, x: f32, y: f32, z: f32) {
        unsafe { sm64_mario_take_damage(id, damage, subtype, x, y, z) }
    }

    fn interact_cap(&mut self, id: RawMarioId, cap_flag: u32, cap_time: u16, play_music: bool) {
        unsafe { sm64_mario_interact_cap(id, cap_flag, cap_time, u8::from(play_music)) }
    }

    fn extend_cap(&mut self, id: RawMarioId, cap_time: u16) {
        unsafe { sm64_mario_extend_cap(id, cap_time) }
    }

    fn set_water_level(&mut self, id: RawMarioId, level: i32) {
        unsafe { sm64_set_mario_water_level(id, level) }
    }

    fn set_gas_level(&mut self, id: RawMarioId, level: i32) {
        unsafe { sm64_set_mario_gas_level(id, level) }
    }

    fn find_floor(&mut self, x: f32, y: f32, z: f32) -> (f32, i16) {
        let mut floor: *const SM64SurfaceCollisionData = std::ptr::null();
        // SAFETY: the library either leaves `floor` null or points it at a
        // surface it owns for at least the duration of this call.
        let height = unsafe { sm64_surface_find_floor_height_and_data(x, y, z, &mut floor) };
        let surface_type = if floor.is_null() {
            0
        } else {
            // SAFETY: non-null pointers come from the library's surface pool.
            unsafe { (*floor).surface_type }
        };
        (height, surface_type)
    }

    fn play_sound_global(&mut self, sound_bits: u32) {
        unsafe { sm64_play_sound_global(sound_bits as i32) }
    }
}

const _: () = {
    assert!(std::mem::size_of::<Vec3>() == 12);
    assert!(std::mem::size_of::<Vec2>() == 8);
};
