//! sm64sync Simulation Core
//!
//! Everything one participant needs to run its copy of every actor: the tag
//! grammar and interactable registry, the double-buffered interpolation
//! buffers and the [`Mario`] state machine. The host scene, renderer and
//! replicated variable space are reached only through the traits in
//! [`host`].
//!
//! Single-threaded: every call happens on the host's update thread.
//!
//! # Features
//!
//! - `testkit`: [`testkit::TestHost`], [`testkit::RecordingRenderer`] and
//!   [`testkit::MemoryReplication`].

#![deny(unsafe_code)]

pub mod geometry;
pub mod host;
pub mod interactable;
pub mod mario;
pub mod tag;
pub mod volume;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use geometry::{FrameBuffers, lerp_unclamped};
pub use host::{
    ControllerInput, HostWorld, MarioRenderer, MarioVar, MaterialSelection, ReplicatedVars,
    Replication, Transform,
};
pub use interactable::{
    ActorStatus, Contact, Damage, Interactable, InteractableRegistry, InteractionEffect, resolve,
};
pub use mario::{
    CapOutcome, DeathTiming, DeferredAction, Liveness, LivenessToken, Mario, MarioEnv, MarioPhase,
    MarioSettings, MeleeSnapshot, Scheduled, TickReport, TickWorld, death_timing,
};
pub use tag::{InteractableType, VolumeKind, VolumeTag};
pub use volume::{Aabb, CapsuleShape};

// ============================================================================
// Identifiers
// ============================================================================

/// Host scene entity an actor is attached to.
pub type EntityId = u64;

/// Host collision volume.
pub type VolumeId = u64;

/// Session participant.
pub type UserId = u32;
