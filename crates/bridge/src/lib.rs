//! sm64sync Native Simulation Bridge
//!
//! Opaque-handle access to the libsm64 character simulation engine. The
//! engine is consumed through the [`SimulationEngine`] trait; [`Bridge`] owns
//! one engine, enforces its global-init lifecycle and translates between
//! world space and simulation space.
//!
//! The engine is not reentrant: every call, including `tick`, must come from
//! the single update thread that drives the session.
//!
//! # Features
//!
//! - `native`: [`native::NativeEngine`], the `extern "C"` libsm64 surface.
//! - `testkit`: [`testkit::ScriptedEngine`], a deterministic recording engine.

#![deny(unsafe_code)]

pub mod bridge;
pub mod engine;
pub mod flags;

#[cfg(feature = "native")]
pub mod native;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use bridge::{
    Bridge, BridgeError, FloorInfo, MarioInputs, MarioState, TickOutput, face_angle_to_rotation,
    rotation_to_face_angle, to_sim_position, to_world_position,
};
pub use engine::{RawGeometryOut, RawSurface, SimulationEngine};
pub use flags::{ActionFlags, CapKind, SoundId, StateFlags, SurfaceType};

// ============================================================================
// Handles & Constants
// ============================================================================

/// Engine actor handle, unique per live actor.
pub type MarioId = i32;

/// Sentinel the engine returns when it cannot allocate another actor.
pub const INVALID_MARIO_ID: MarioId = i32::MAX;

/// Engine units per world metre.
pub const SCALE_FACTOR: f32 = 1000.0;

/// Size multiplier applied to host-side shapes sized for a unit-scale mario.
pub const MARIO_SCALE: f32 = 1000.0 / SCALE_FACTOR;

/// Maximum triangles the engine emits for one actor.
pub const GEO_MAX_TRIANGLES: usize = 1024;

/// Vertex capacity of every geometry buffer.
pub const GEO_MAX_VERTICES: usize = 3 * GEO_MAX_TRIANGLES;

/// Raw engine health of a fully healed actor (eight wedges).
pub const FULL_HEALTH_RAW: u16 = 0x880;

/// Raw engine health below which the actor is dead.
pub const DEAD_HEALTH_RAW: i16 = 0x100;

/// Health points exposed to the rest of the system.
pub const MAX_HEALTH_POINTS: f32 = 255.0;

/// Health points restored by one healed wedge.
pub const HEALTH_POINTS_PER_WEDGE: f32 = MAX_HEALTH_POINTS / 8.0;

/// Engine cap timers run at the native 30 Hz frame rate.
pub const CAP_TICKS_PER_SECOND: f32 = 30.0;
