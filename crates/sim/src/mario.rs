//! The per-actor state machine.
//!
//! An actor is either the *authority* (owned by the local participant, its
//! simulation is ground truth and it publishes replicated values) or a
//! *mirror* (re-simulates locally from replicated input and flags).
//!
//! ```text
//! Uninitialized -> Active -> Dying -> Nuked
//!        \            \        \        \
//!         `------------`--------`--------`--> Disposed
//! ```

use std::cell::Cell;
use std::rc::Rc;

use glam::{Quat, Vec2, Vec3};
use sm64sync_bridge::{
    ActionFlags, Bridge, BridgeError, CapKind, MARIO_SCALE, MarioId, MarioInputs, MarioState,
    SCALE_FACTOR, SimulationEngine, SoundId, StateFlags,
};
use tracing::{debug, error, info, warn};

use crate::geometry::{FrameBuffers, lerp_unclamped};
use crate::host::{
    ControllerInput, HostWorld, MarioRenderer, MarioVar, MaterialSelection, Replication, Transform,
};
use crate::interactable::{
    ActorStatus, Contact, Interactable, InteractableRegistry, InteractionEffect, resolve,
};
use crate::volume::CapsuleShape;
use crate::{EntityId, UserId, VolumeId};

// ============================================================================
// Constants
// ============================================================================

/// Cap duration used by interactables.
pub const DEFAULT_CAP_SECS: f32 = 15.0;

/// Duration a mirror wears a replicated wing cap.
pub const MIRROR_WING_CAP_SECS: f32 = 40.0;

/// Per-tick displacement above which a release becomes a throw.
pub const THROW_THRESHOLD: f32 = 0.01;

pub const MELEE_RADIUS: f32 = 0.1 * MARIO_SCALE;
pub const MELEE_DAMAGE: u32 = 1;

/// Vertical distance to a death-plane floor that counts as falling into it.
pub const DEATH_PLANE_PROXIMITY: f32 = 15.0 / SCALE_FACTOR;

// ============================================================================
// Collaborators
// ============================================================================

/// Settings an actor consults while ticking.
#[derive(Debug, Clone, PartialEq)]
pub struct MarioSettings {
    /// Mirrors farther than this from the viewer are bypassed.
    pub cull_distance: f32,
    pub play_cap_music: bool,
    pub delete_after_death: bool,
    pub default_water_level: f32,
    pub default_gas_level: f32,
    pub render_slot_local: bool,
}

impl Default for MarioSettings {
    fn default() -> Self {
        Self {
            cull_distance: 5.0,
            play_cap_music: true,
            delete_after_death: true,
            default_water_level: -100.0,
            default_gas_level: -200.0,
            render_slot_local: true,
        }
    }
}

/// Mutable collaborators borrowed for one call.
pub struct MarioEnv<'a, E> {
    pub bridge: &'a mut Bridge<E>,
    pub host: &'a mut dyn HostWorld,
    pub replication: &'a mut dyn Replication,
    pub settings: &'a MarioSettings,
}

/// Read-only session state for one fixed tick.
#[derive(Debug, Clone, Copy)]
pub struct TickWorld<'a> {
    pub registry: &'a InteractableRegistry,
    pub water_volumes: &'a [VolumeId],
    pub gas_volumes: &'a [VolumeId],
    /// Local controller, published by the authority.
    pub local_input: ControllerInput,
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarioPhase {
    Uninitialized,
    Active,
    Dying,
    Nuked,
    Disposed,
}

/// Work an actor asks the session to run later.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeferredAction {
    PlaySound(SoundId),
    Nuke { delete: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub delay_secs: f32,
    pub action: DeferredAction,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// The engine was stepped this tick.
    pub simulated: bool,
    pub scheduled: Vec<Scheduled>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeathTiming {
    pub laugh_delay: f32,
    pub nuke_delay: f32,
}

pub fn death_timing(quicksand: bool, death_plane: bool) -> DeathTiming {
    let (laugh_delay, nuke_delay) = if quicksand {
        (0.8, 2.2)
    } else if death_plane {
        (0.4, 1.8)
    } else {
        (2.5, 12.0)
    };
    DeathTiming {
        laugh_delay,
        nuke_delay,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapOutcome {
    Applied,
    /// Already worn; the authority extended its timer.
    Extended,
    /// Already worn by a mirror, or the actor has no engine handle.
    Unchanged,
    /// Vanish and wing never coexist.
    Conflict,
}

/// Position and attack state other actors see during melee resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeleeSnapshot {
    pub entity: EntityId,
    pub position: Vec3,
    pub is_attacking: bool,
}

// ============================================================================
// Liveness
// ============================================================================

/// Owner side of a cancellable liveness flag.
#[derive(Debug)]
pub struct Liveness(Rc<Cell<bool>>);

impl Liveness {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn token(&self) -> LivenessToken {
        LivenessToken(Rc::clone(&self.0))
    }

    pub fn cancel(&self) {
        self.0.set(false);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by background work that must not outlive its actor.
#[derive(Debug, Clone)]
pub struct LivenessToken(Rc<Cell<bool>>);

impl LivenessToken {
    pub fn is_alive(&self) -> bool {
        self.0.get()
    }
}

// ============================================================================
// Mario
// ============================================================================

pub struct Mario {
    entity: EntityId,
    owner: UserId,
    is_local: bool,
    id: Option<MarioId>,
    phase: MarioPhase,
    buffers: FrameBuffers,
    renderer: Option<Box<dyn MarioRenderer>>,
    material: MaterialSelection,
    water_level: f32,
    gas_level: f32,
    last_action_flags: ActionFlags,
    was_picked_up: bool,
    over_max_distance: bool,
    over_max_count: bool,
    was_bypassed: bool,
    liveness: Liveness,
}

impl Mario {
    /// An actor with no engine handle. It never ticks or renders.
    pub fn inert(entity: EntityId, owner: UserId, local_user: UserId) -> Self {
        Self {
            entity,
            owner,
            is_local: owner == local_user,
            id: None,
            phase: MarioPhase::Uninitialized,
            buffers: FrameBuffers::new(),
            renderer: None,
            material: MaterialSelection::Normal,
            water_level: 0.0,
            gas_level: 0.0,
            last_action_flags: ActionFlags::NONE,
            was_picked_up: false,
            over_max_distance: false,
            over_max_count: false,
            was_bypassed: false,
            liveness: Liveness::new(),
        }
    }

    /// Create the engine actor at the entity's position and set up its
    /// renderer. Authority is `owner == local_user` and never changes.
    pub fn new<E: SimulationEngine>(
        entity: EntityId,
        owner: UserId,
        local_user: UserId,
        env: &mut MarioEnv<'_, E>,
    ) -> Result<Self, BridgeError> {
        let mut mario = Self::inert(entity, owner, local_user);
        info!(entity, owner, is_local = mario.is_local, "creating mario");

        let position = env.host.transform(entity).unwrap_or_default().position;
        if mario.is_local {
            env.host.configure_collider(entity, CapsuleShape::mario());
        }

        let id = env
            .bridge
            .create_mario(position)
            .inspect_err(|err| error!(entity, %err, "mario creation failed"))?;
        mario.id = Some(id);

        mario.water_level = env.settings.default_water_level;
        mario.gas_level = env.settings.default_gas_level;
        env.bridge.set_water_level(id, mario.water_level);
        env.bridge.set_gas_level(id, mario.gas_level);

        mario.renderer = Some(env.host.create_renderer(entity, env.settings.render_slot_local));
        if mario.is_local {
            env.replication.write_var(entity, MarioVar::IsShown(true));
        }

        mario.phase = MarioPhase::Active;
        info!(entity, mario_id = id, is_local = mario.is_local, "mario created");
        Ok(mario)
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn mario_id(&self) -> Option<MarioId> {
        self.id
    }

    pub fn phase(&self) -> MarioPhase {
        self.phase
    }

    pub fn is_initialized(&self) -> bool {
        self.id.is_some() && self.phase != MarioPhase::Uninitialized
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == MarioPhase::Disposed
    }

    pub fn is_bypassed(&self) -> bool {
        self.was_bypassed
    }

    pub fn buffers(&self) -> &FrameBuffers {
        &self.buffers
    }

    pub fn current_state(&self) -> &MarioState {
        self.buffers.current_state()
    }

    pub fn previous_state(&self) -> &MarioState {
        self.buffers.previous_state()
    }

    pub fn material(&self) -> MaterialSelection {
        self.material
    }

    pub fn water_level(&self) -> f32 {
        self.water_level
    }

    pub fn gas_level(&self) -> f32 {
        self.gas_level
    }

    /// Token for background work tied to this actor.
    pub fn liveness_token(&self) -> LivenessToken {
        self.liveness.token()
    }

    /// Engine handle if the actor may still tick.
    fn live_id(&self) -> Option<MarioId> {
        match self.phase {
            MarioPhase::Active | MarioPhase::Dying => self.id,
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Fixed tick
    // ------------------------------------------------------------------------

    /// One fixed simulation step. Melee is resolved separately once every
    /// actor has stepped; see [`Mario::resolve_melee`].
    pub fn fixed_tick<E: SimulationEngine>(
        &mut self,
        env: &mut MarioEnv<'_, E>,
        world: &TickWorld<'_>,
    ) -> TickReport {
        let mut report = TickReport::default();
        let Some(id) = self.live_id() else {
            return report;
        };

        self.update_is_over_max_distance(env);
        if self.was_bypassed {
            return report;
        }

        let cam_look = self.camera_look(&*env.host);
        if self.is_local {
            env.replication.write_input(self.entity, world.local_input);
        }
        let input = env.replication.read_input(self.entity);
        let inputs = MarioInputs {
            cam_look,
            stick: Vec2::new(input.joystick.x, -input.joystick.y),
            jump: input.jump,
            punch: input.punch,
            crouch: input.crouch,
        };

        let output = match env.bridge.tick(id, &inputs, self.buffers.write_slot()) {
            Ok(output) => output,
            Err(err) => {
                warn!(entity = self.entity, %err, "fixed tick skipped");
                return report;
            }
        };
        self.buffers.commit(output.state, output.triangles_used);

        if self.is_local {
            self.authority_step(id, env, world, &mut report);
        } else {
            self.mirror_step(id, env);
        }

        self.update_grab(id, env);
        self.update_fluid_levels(id, env, world);
        self.update_material(&*env.replication);

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.update_colors(self.buffers.colors(), self.buffers.uvs());
        }

        report.simulated = true;
        report
    }

    fn camera_look(&self, host: &dyn HostWorld) -> Vec2 {
        let rotation = host.view_rotation(self.owner).unwrap_or(Quat::IDENTITY);
        let mut look = rotation * Vec3::Z;
        look.y = 0.0;
        let look = look.normalize_or_zero();
        Vec2::new(-look.x, look.z)
    }

    fn authority_step<E: SimulationEngine>(
        &mut self,
        id: MarioId,
        env: &mut MarioEnv<'_, E>,
        world: &TickWorld<'_>,
        report: &mut TickReport,
    ) {
        let current = *self.buffers.current_state();
        env.replication
            .write_var(self.entity, MarioVar::StateFlags(current.flags));
        env.replication
            .write_var(self.entity, MarioVar::ActionFlags(current.action));

        for interactable in world.registry.iter() {
            self.handle_interactable(id, interactable, env);
        }

        let position = env.host.transform(self.entity).unwrap_or_default().position;
        let floor = env.bridge.find_floor(position);
        let death_plane = floor.surface.is_death_plane();
        let near_floor = (floor.height - position.y).abs() < DEATH_PLANE_PROXIMITY;

        if self.phase != MarioPhase::Dying && (current.is_dead || (near_floor && death_plane)) {
            self.phase = MarioPhase::Dying;

            let quicksand = env
                .replication
                .read_vars(self.entity)
                .action_flags
                .contains(ActionFlags::QUICKSAND_DEATH);
            let timing = death_timing(quicksand, death_plane);
            info!(
                entity = self.entity,
                quicksand,
                death_plane,
                laugh_delay = timing.laugh_delay,
                nuke_delay = timing.nuke_delay,
                "mario is dying"
            );

            report.scheduled.push(Scheduled {
                delay_secs: timing.laugh_delay,
                action: DeferredAction::PlaySound(SoundId::BowserLaugh),
            });
            report.scheduled.push(Scheduled {
                delay_secs: timing.nuke_delay,
                action: DeferredAction::Nuke { delete: true },
            });
        }
    }

    fn mirror_step<E: SimulationEngine>(&mut self, id: MarioId, env: &mut MarioEnv<'_, E>) {
        let vars = env.replication.read_vars(self.entity);

        if vars.action_flags != self.last_action_flags {
            self.last_action_flags = vars.action_flags;
            if !vars.action_flags.is_empty() {
                env.bridge.set_action(id, vars.action_flags);
            }
        }

        for cap in CapKind::REPLICATION_ORDER {
            if vars.state_flags.has_cap(cap) {
                let duration = if cap == CapKind::Wing {
                    MIRROR_WING_CAP_SECS
                } else {
                    DEFAULT_CAP_SECS
                };
                self.wear_cap(cap, duration, true, env);
            }
        }
    }

    fn handle_interactable<E: SimulationEngine>(
        &mut self,
        id: MarioId,
        interactable: &Interactable,
        env: &mut MarioEnv<'_, E>,
    ) {
        let volume = interactable.volume;
        if !env.host.is_volume_active(volume) {
            return;
        }
        let (Some(bounds), Some(own)) = (
            env.host.volume_bounds(volume),
            env.host.collider_bounds(self.entity),
        ) else {
            return;
        };
        if !bounds.overlaps(&own) {
            return;
        }

        let current = self.buffers.current_state();
        let status = ActorStatus {
            health_points: current.health_points,
            is_dead: current.is_dead,
            is_authority: self.is_local,
        };
        let contact = Contact {
            source: env.host.volume_position(volume),
            owned_by_actor: env.host.is_volume_within(volume, self.entity),
        };

        let effect = resolve(&status, interactable, &contact);
        self.apply_effect(id, volume, &effect, env);
    }

    fn apply_effect<E: SimulationEngine>(
        &mut self,
        id: MarioId,
        volume: VolumeId,
        effect: &InteractionEffect,
        env: &mut MarioEnv<'_, E>,
    ) {
        if let Some(sound) = effect.sound {
            env.bridge.play_sound(sound);
        }
        if effect.heal_wedges > 0 {
            env.bridge.heal(id, effect.heal_wedges);
        }
        if let Some(cap) = effect.cap {
            self.wear_cap(cap, DEFAULT_CAP_SECS, true, env);
        }
        if effect.stop_and_fall {
            env.bridge.set_forward_velocity(id, 0.0);
            env.bridge.set_action(id, ActionFlags::FREEFALL);
        }
        if let Some(damage) = effect.damage {
            env.bridge.take_damage(id, damage.source, damage.amount);
        }
        if effect.deactivate {
            env.host.set_volume_active(volume, false);
        }
    }

    fn update_grab<E: SimulationEngine>(&mut self, id: MarioId, env: &mut MarioEnv<'_, E>) {
        let grabbed = env.host.is_grabbed(self.entity);
        if grabbed != self.was_picked_up {
            if self.was_picked_up {
                self.throw(id, env);
            } else {
                self.hold(id, env);
            }
        }
        self.was_picked_up = grabbed;
    }

    fn hold<E: SimulationEngine>(&mut self, id: MarioId, env: &mut MarioEnv<'_, E>) {
        let current = self.buffers.current_state();
        if current.is_dead {
            return;
        }
        if current.action.contains(ActionFlags::SLEEPING) {
            env.bridge.set_action(id, ActionFlags::WAKING_UP);
        }
        env.bridge.set_action(id, ActionFlags::GRABBED);
    }

    fn throw<E: SimulationEngine>(&mut self, id: MarioId, env: &mut MarioEnv<'_, E>) {
        let current = *self.buffers.current_state();
        if current.is_dead {
            return;
        }

        let displacement = current.position - self.buffers.previous_state().position;
        if displacement.length() > THROW_THRESHOLD {
            if self.is_local {
                env.bridge.set_face_angle(id, look_rotation(displacement));
            }
            let wing = env
                .replication
                .read_vars(self.entity)
                .state_flags
                .has_cap(CapKind::Wing);
            let action = if wing {
                ActionFlags::FLYING
            } else {
                ActionFlags::THROWN_FORWARD
            };
            env.bridge.set_action(id, action);
            if self.is_local {
                env.bridge.set_velocity(id, displacement);
                env.bridge.set_forward_velocity(id, displacement.length());
            }
        } else {
            if self.is_local {
                let rotation = env
                    .host
                    .transform(self.entity)
                    .unwrap_or_default()
                    .rotation;
                env.bridge.set_face_angle(id, look_rotation(rotation * Vec3::Z));
                env.bridge.set_velocity(id, Vec3::ZERO);
                env.bridge.set_forward_velocity(id, 0.0);
            }
            env.bridge.set_action(id, ActionFlags::FREEFALL);
        }
    }

    fn update_fluid_levels<E: SimulationEngine>(
        &mut self,
        id: MarioId,
        env: &mut MarioEnv<'_, E>,
        world: &TickWorld<'_>,
    ) {
        let Some(center) = env.host.collider_bounds(self.entity).map(|b| b.center()) else {
            return;
        };
        let surface_level = |volumes: &[VolumeId], fallback: f32| {
            volumes
                .iter()
                .filter_map(|volume| env.host.volume_bounds(*volume))
                .find(|bounds| bounds.contains(center))
                .map_or(fallback, |bounds| bounds.max.y)
        };

        let water = surface_level(world.water_volumes, env.settings.default_water_level);
        let gas = surface_level(world.gas_volumes, env.settings.default_gas_level);

        if !approximately(self.water_level, water) {
            self.water_level = water;
            env.bridge.set_water_level(id, water);
        }
        if !approximately(self.gas_level, gas) {
            self.gas_level = gas;
            env.bridge.set_gas_level(id, gas);
        }
    }

    fn update_material(&mut self, replication: &dyn Replication) {
        let flags = replication.read_vars(self.entity).state_flags;
        let material = MaterialSelection::from_state_flags(flags);
        if material != self.material {
            self.material = material;
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.set_material(material);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Cross-actor
    // ------------------------------------------------------------------------

    /// What other actors see of this one, `None` if it cannot take part.
    pub fn melee_snapshot(&self, host: &dyn HostWorld) -> Option<MeleeSnapshot> {
        self.live_id()?;
        let position = host.transform(self.entity)?.position;
        Some(MeleeSnapshot {
            entity: self.entity,
            position,
            is_attacking: self.buffers.current_state().is_attacking(),
        })
    }

    /// Take damage from the first attacking actor within melee range.
    ///
    /// Every actor is checked against every other. Returns whether damage was
    /// applied.
    pub fn resolve_melee<E: SimulationEngine>(
        &mut self,
        others: &[MeleeSnapshot],
        env: &mut MarioEnv<'_, E>,
    ) -> bool {
        let Some(id) = self.live_id() else {
            return false;
        };
        let Some(own) = env.host.transform(self.entity) else {
            return false;
        };

        let attacker = others.iter().find(|other| {
            other.entity != self.entity
                && other.is_attacking
                && other.position.distance(own.position) <= MELEE_RADIUS
        });

        match attacker {
            Some(attacker) => {
                env.bridge.take_damage(id, attacker.position, MELEE_DAMAGE);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Render tick
    // ------------------------------------------------------------------------

    /// Interpolate between the last two fixed ticks. `t` is the fraction of a
    /// tick period elapsed since the last fixed tick, unclamped.
    pub fn render_tick<E: SimulationEngine>(&mut self, t: f32, env: &mut MarioEnv<'_, E>) {
        let Some(id) = self.live_id() else {
            return;
        };

        self.buffers.interpolate(t);

        if self.is_local && !env.host.is_grabbed(self.entity) {
            let previous = self.buffers.previous_state();
            let current = self.buffers.current_state();
            let transform = Transform {
                position: lerp_unclamped(previous.position, current.position, t),
                rotation: previous.rotation().lerp(current.rotation(), t),
            };
            env.host.set_transform(self.entity, transform);
        } else if let Some(transform) = env.host.transform(self.entity) {
            env.bridge.set_position(id, transform.position);
            env.bridge.set_face_angle(id, transform.rotation);
        }

        if self.is_local {
            let health = self.buffers.current_state().health_points;
            env.replication
                .write_var(self.entity, MarioVar::HealthPoints(health));
        } else {
            let health = env.replication.read_vars(self.entity).health_points;
            env.bridge.set_health_points(id, health);
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.update_mesh(self.buffers.lerp_positions(), self.buffers.lerp_normals());
        }
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Put on a cap. Vanish and wing are mutually exclusive; a cap already
    /// worn only has its timer extended, and only by the authority.
    pub fn wear_cap<E: SimulationEngine>(
        &mut self,
        cap: CapKind,
        duration_secs: f32,
        play_music: bool,
        env: &mut MarioEnv<'_, E>,
    ) -> CapOutcome {
        let Some(id) = self.id else {
            return CapOutcome::Unchanged;
        };
        let play_music = play_music && env.settings.play_cap_music;
        let flags = self.buffers.current_state().flags;

        if cap == CapKind::Normal {
            if flags.has_cap(CapKind::Normal) {
                return CapOutcome::Unchanged;
            }
            env.bridge
                .set_state(id, StateFlags::CAP_ON_HEAD | StateFlags::NORMAL_CAP);
            return CapOutcome::Applied;
        }

        let conflict = (cap == CapKind::Vanish && flags.has_cap(CapKind::Wing))
            || (cap == CapKind::Wing && flags.has_cap(CapKind::Vanish));
        if conflict {
            return CapOutcome::Conflict;
        }

        if flags.has_cap(cap) {
            if !self.is_local {
                return CapOutcome::Unchanged;
            }
            env.bridge.cap_extend(id, duration_secs);
            return CapOutcome::Extended;
        }

        env.bridge.cap(id, cap, duration_secs, play_music);
        CapOutcome::Applied
    }

    /// Heal by `wedges`. No-op for dead actors and mirrors.
    pub fn heal<E: SimulationEngine>(&mut self, wedges: u8, env: &mut MarioEnv<'_, E>) {
        let Some(id) = self.id else {
            return;
        };
        if self.buffers.current_state().is_dead || !self.is_local {
            return;
        }
        env.bridge.heal(id, wedges);
    }

    pub fn take_damage<E: SimulationEngine>(&mut self, source: Vec3, damage: u32, env: &mut MarioEnv<'_, E>) {
        if let Some(id) = self.id {
            env.bridge.take_damage(id, source, damage);
        }
    }

    pub fn teleport_start<E: SimulationEngine>(&mut self, env: &mut MarioEnv<'_, E>) {
        self.set_alive_action(ActionFlags::TELEPORT_FADE_OUT, env);
    }

    pub fn teleport_end<E: SimulationEngine>(&mut self, env: &mut MarioEnv<'_, E>) {
        self.set_alive_action(ActionFlags::TELEPORT_FADE_IN, env);
    }

    fn set_alive_action<E: SimulationEngine>(&mut self, action: ActionFlags, env: &mut MarioEnv<'_, E>) {
        if let Some(id) = self.id
            && !self.buffers.current_state().is_dead
        {
            env.bridge.set_action(id, action);
        }
    }

    // ------------------------------------------------------------------------
    // Bypass
    // ------------------------------------------------------------------------

    pub fn set_is_over_max_count(&mut self, over: bool, replication: &mut dyn Replication) {
        self.over_max_count = over;
        self.update_bypass(replication);
    }

    fn update_is_over_max_distance<E: SimulationEngine>(&mut self, env: &mut MarioEnv<'_, E>) {
        self.over_max_distance =
            !self.is_local && env.host.distance_from_viewer(self.entity) > env.settings.cull_distance;
        self.update_bypass(&mut *env.replication);
    }

    fn update_bypass(&mut self, replication: &mut dyn Replication) {
        if !self.is_initialized() {
            return;
        }
        let bypassed = self.over_max_distance || self.over_max_count;
        if bypassed == self.was_bypassed {
            return;
        }
        self.was_bypassed = bypassed;
        debug!(entity = self.entity, bypassed, "mario bypass changed");

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_enabled(!bypassed);
        }
        // A mirror's bypass only hides its own view.
        if self.is_local {
            replication.write_var(self.entity, MarioVar::IsShown(!bypassed));
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Halt ticking. Returns `true` when the actor should now be disposed.
    pub fn set_nuked(&mut self, delete: bool, settings: &MarioSettings) -> bool {
        if self.phase == MarioPhase::Disposed {
            return false;
        }
        self.phase = MarioPhase::Nuked;
        let delete = settings.delete_after_death || delete;
        debug!(entity = self.entity, delete, "mario nuked");
        delete
    }

    /// Release everything the actor owns. Idempotent; returns `true` only on
    /// the call that actually disposed.
    ///
    /// `entity_alive` is `false` when the host is already destroying the
    /// entity.
    pub fn dispose<E: SimulationEngine>(&mut self, env: &mut MarioEnv<'_, E>, entity_alive: bool) -> bool {
        if self.phase == MarioPhase::Disposed {
            return false;
        }
        self.phase = MarioPhase::Disposed;
        self.liveness.cancel();

        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy();
        }

        if self.is_local {
            env.host.destroy_visual(self.entity);
            if entity_alive {
                env.host.destroy_entity(self.entity);
            }
        }

        if let Some(id) = self.id.take()
            && env.bridge.is_global_init()
        {
            env.bridge.delete_mario(id);
        }

        debug!(entity = self.entity, "mario disposed");
        true
    }
}

impl Drop for Mario {
    fn drop(&mut self) {
        if self.phase != MarioPhase::Disposed && self.id.is_some() {
            warn!(entity = self.entity, "mario dropped without dispose, engine handle leaked");
        }
    }
}

impl std::fmt::Debug for Mario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mario")
            .field("entity", &self.entity)
            .field("owner", &self.owner)
            .field("is_local", &self.is_local)
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("bypassed", &self.was_bypassed)
            .finish_non_exhaustive()
    }
}

/// Yaw-only rotation facing `direction`.
fn look_rotation(direction: Vec3) -> Quat {
    Quat::from_rotation_y(direction.x.atan2(direction.z))
}

fn approximately(a: f32, b: f32) -> bool {
    (a - b).abs() < f32::EPSILON * 8.0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MemoryReplication, TestHost};
    use crate::volume::Aabb;
    use sm64sync_bridge::testkit::{EngineCall, ScriptedEngine};
    use sm64sync_bridge::{MAX_HEALTH_POINTS, SurfaceType};

    const LOCAL: UserId = 1;
    const REMOTE: UserId = 2;
    const ENTITY: EntityId = 100;

    struct Fixture {
        bridge: Bridge<ScriptedEngine>,
        host: TestHost,
        replication: MemoryReplication,
        settings: MarioSettings,
        registry: InteractableRegistry,
        water: Vec<VolumeId>,
        gas: Vec<VolumeId>,
        input: ControllerInput,
    }

    impl Fixture {
        fn new() -> Self {
            let mut bridge = Bridge::new(ScriptedEngine::new());
            bridge.global_init(&[], &mut [], &[]).unwrap();
            let mut host = TestHost::new();
            host.add_entity(ENTITY, Vec3::new(0.0, 1.0, 0.0));
            Self {
                bridge,
                host,
                replication: MemoryReplication::new(),
                settings: MarioSettings::default(),
                registry: InteractableRegistry::new(),
                water: Vec::new(),
                gas: Vec::new(),
                input: ControllerInput::default(),
            }
        }

        fn env(&mut self) -> MarioEnv<'_, ScriptedEngine> {
            MarioEnv {
                bridge: &mut self.bridge,
                host: &mut self.host,
                replication: &mut self.replication,
                settings: &self.settings,
            }
        }

        fn spawn(&mut self, owner: UserId) -> Mario {
            Mario::new(ENTITY, owner, LOCAL, &mut self.env()).unwrap()
        }

        fn tick(&mut self, mario: &mut Mario) -> TickReport {
            let world = TickWorld {
                registry: &self.registry,
                water_volumes: &self.water,
                gas_volumes: &self.gas,
                local_input: self.input,
            };
            let mut env = MarioEnv {
                bridge: &mut self.bridge,
                host: &mut self.host,
                replication: &mut self.replication,
                settings: &self.settings,
            };
            mario.fixed_tick(&mut env, &world)
        }

        fn engine(&mut self) -> &mut ScriptedEngine {
            self.bridge.engine_mut()
        }

        fn calls(&self) -> &[EngineCall] {
            self.bridge.engine().calls()
        }

        fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
            self.calls().iter().filter(|call| predicate(call)).count()
        }
    }

    fn id(mario: &Mario) -> MarioId {
        mario.mario_id().unwrap()
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    #[test]
    fn test_create_at_entity_position() {
        let mut fx = Fixture::new();
        let mario = fx.spawn(LOCAL);
        let id = id(&mario);

        assert!(fx.calls().contains(&EngineCall::Create {
            position: [0.0, SCALE_FACTOR, 0.0],
        }));
        assert!(fx.calls().contains(&EngineCall::WaterLevel {
            id,
            level: -100_000
        }));
        assert!(fx.calls().contains(&EngineCall::GasLevel {
            id,
            level: -200_000
        }));
        assert_eq!(mario.phase(), MarioPhase::Active);
        assert!(mario.is_local());
        assert_eq!(fx.host.collider(ENTITY), Some(CapsuleShape::mario()));
        assert!(fx.host.renderer(ENTITY).is_some());
    }

    #[test]
    fn test_mirror_has_no_collider_setup() {
        let mut fx = Fixture::new();
        let mario = fx.spawn(REMOTE);
        assert!(!mario.is_local());
        assert_eq!(fx.host.collider(ENTITY), None);
    }

    #[test]
    fn test_create_failure_is_an_error() {
        let mut fx = Fixture::new();
        fx.engine().fail_next_create();
        let result = Mario::new(ENTITY, LOCAL, LOCAL, &mut fx.env());
        assert!(matches!(result, Err(BridgeError::CreateFailed { .. })));
        assert!(fx.host.renderer(ENTITY).is_none());
    }

    #[test]
    fn test_inert_actor_never_ticks() {
        let mut fx = Fixture::new();
        let mut mario = Mario::inert(ENTITY, LOCAL, LOCAL);
        assert!(!mario.is_initialized());

        let report = fx.tick(&mut mario);
        assert!(!report.simulated);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Tick { .. })), 0);
        assert!(mario.dispose(&mut fx.env(), true));
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Delete { .. })), 0);
    }

    // ------------------------------------------------------------------------
    // Fixed tick
    // ------------------------------------------------------------------------

    #[test]
    fn test_first_tick_steps_engine_and_flips_index() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);

        let report = fx.tick(&mut mario);
        assert!(report.simulated);
        assert!(report.scheduled.is_empty());
        assert_eq!(mario.buffers().index(), 1);
        assert_eq!(mario.buffers().triangles(), 0);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Tick { .. })), 1);
    }

    #[test]
    fn test_inputs_and_camera_look() {
        let mut fx = Fixture::new();
        fx.input = ControllerInput {
            joystick: Vec2::new(0.5, 0.25),
            jump: true,
            punch: false,
            crouch: true,
        };
        fx.host
            .set_view_rotation(LOCAL, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let mut mario = fx.spawn(LOCAL);
        fx.tick(&mut mario);

        let Some(EngineCall::Tick { inputs, .. }) = fx
            .calls()
            .iter()
            .find(|c| matches!(c, EngineCall::Tick { .. }))
            .cloned()
        else {
            panic!("no tick call");
        };
        assert!((inputs.cam_look_x + 1.0).abs() < 1e-5);
        assert!(inputs.cam_look_z.abs() < 1e-5);
        assert_eq!(inputs.stick_x, 0.5);
        assert_eq!(inputs.stick_y, -0.25);
        assert_eq!((inputs.button_a, inputs.button_b, inputs.button_z), (1, 0, 1));
        assert_eq!(fx.replication.read_input(ENTITY), fx.input);
    }

    #[test]
    fn test_authority_publishes_flags() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().action = ActionFlags::IDLE.bits();

        fx.tick(&mut mario);
        assert_eq!(fx.replication.read_vars(ENTITY).action_flags, ActionFlags::IDLE);
    }

    #[test]
    fn test_mirror_reapplies_changed_action_once() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);
        fx.replication
            .write_var(ENTITY, MarioVar::ActionFlags(ActionFlags::IDLE));

        fx.tick(&mut mario);
        fx.tick(&mut mario);

        let set_idle = EngineCall::SetAction {
            id,
            action: ActionFlags::IDLE.bits(),
        };
        assert_eq!(fx.count(|c| *c == set_idle), 1);
    }

    #[test]
    fn test_mirror_wears_replicated_wing_cap_for_forty_seconds() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);
        fx.replication
            .write_var(ENTITY, MarioVar::StateFlags(StateFlags::WING_CAP));

        fx.tick(&mut mario);
        assert!(fx.calls().contains(&EngineCall::Cap {
            id,
            flag: StateFlags::WING_CAP.bits(),
            ticks: 1200,
            play_music: true,
        }));

        // The cap is now worn; mirrors never extend engine timers.
        fx.tick(&mut mario);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Cap { .. })), 1);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::CapExtend { .. })), 0);
    }

    // ------------------------------------------------------------------------
    // Caps
    // ------------------------------------------------------------------------

    #[test]
    fn test_vanish_and_wing_conflict() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().flags = StateFlags::WING_CAP.bits();
        fx.tick(&mut mario);

        let outcome = mario.wear_cap(CapKind::Vanish, DEFAULT_CAP_SECS, true, &mut fx.env());
        assert_eq!(outcome, CapOutcome::Conflict);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Cap { .. })), 0);
        assert!(mario.current_state().has_cap(CapKind::Wing));
    }

    #[test]
    fn test_same_cap_extends_without_jingle() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().flags = StateFlags::METAL_CAP.bits();
        fx.tick(&mut mario);

        let outcome = mario.wear_cap(CapKind::Metal, DEFAULT_CAP_SECS, true, &mut fx.env());
        assert_eq!(outcome, CapOutcome::Extended);
        assert!(fx.calls().contains(&EngineCall::CapExtend { id, ticks: 450 }));
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Cap { .. })), 0);
    }

    #[test]
    fn test_mirror_wearing_cap_is_unchanged() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().flags = StateFlags::METAL_CAP.bits();
        fx.tick(&mut mario);

        let outcome = mario.wear_cap(CapKind::Metal, DEFAULT_CAP_SECS, true, &mut fx.env());
        assert_eq!(outcome, CapOutcome::Unchanged);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::CapExtend { .. })), 0);
    }

    #[test]
    fn test_cap_music_gated_by_setting() {
        let mut fx = Fixture::new();
        fx.settings.play_cap_music = false;
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);

        let outcome = mario.wear_cap(CapKind::Metal, DEFAULT_CAP_SECS, true, &mut fx.env());
        assert_eq!(outcome, CapOutcome::Applied);
        assert!(fx.calls().contains(&EngineCall::Cap {
            id,
            flag: StateFlags::METAL_CAP.bits(),
            ticks: 450,
            play_music: false,
        }));
    }

    #[test]
    fn test_normal_cap_sets_state_once() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);

        assert_eq!(
            mario.wear_cap(CapKind::Normal, DEFAULT_CAP_SECS, true, &mut fx.env()),
            CapOutcome::Applied
        );
        fx.tick(&mut mario);
        assert_eq!(
            mario.wear_cap(CapKind::Normal, DEFAULT_CAP_SECS, true, &mut fx.env()),
            CapOutcome::Unchanged
        );

        let expected = EngineCall::SetState {
            id,
            flags: (StateFlags::CAP_ON_HEAD | StateFlags::NORMAL_CAP).bits(),
        };
        assert_eq!(fx.count(|c| *c == expected), 1);
    }

    // ------------------------------------------------------------------------
    // Interactables
    // ------------------------------------------------------------------------

    #[test]
    fn test_gold_coin_heals_once_and_deactivates() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        // 250 of 255 health points.
        fx.engine().state_mut(id).unwrap().health = 2133;
        fx.host.add_volume(
            1,
            Aabb::from_center_size(Vec3::new(0.0, 1.05, 0.0), Vec3::splat(0.5)),
        );
        fx.registry.register(1, "coin,0,GoldCoin,-1");

        fx.tick(&mut mario);
        assert!(fx.calls().contains(&EngineCall::Heal { id, wedges: 1 }));
        assert!(fx.calls().contains(&EngineCall::PlaySound {
            bits: SoundId::GeneralCoin.bits()
        }));
        assert!(!fx.host.volume_active(1));

        fx.tick(&mut mario);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Heal { .. })), 1);
        assert_eq!(mario.current_state().health_points, MAX_HEALTH_POINTS);
    }

    #[test]
    fn test_star_stops_and_falls() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.host
            .add_volume(3, Aabb::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE));
        fx.registry.register(3, "collectible,0,Star,-1");

        fx.tick(&mut mario);
        assert!(fx.calls().contains(&EngineCall::Heal { id, wedges: 8 }));
        assert!(fx.calls().contains(&EngineCall::SetForwardVelocity { id, velocity: 0.0 }));
        assert!(fx.calls().contains(&EngineCall::SetAction {
            id,
            action: ActionFlags::FREEFALL.bits()
        }));
    }

    #[test]
    fn test_damage_volume_retriggers() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        fx.host
            .add_volume(2, Aabb::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE));
        fx.registry.register(2, "hazard,0,Damage,3");

        fx.tick(&mut mario);
        fx.tick(&mut mario);

        assert_eq!(
            fx.count(|c| matches!(c, EngineCall::TakeDamage { damage: 3, .. })),
            2
        );
        assert!(fx.host.volume_active(2));
    }

    #[test]
    fn test_own_damage_volume_is_ignored() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        fx.host
            .add_volume(2, Aabb::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE));
        fx.host.parent_volume(2, ENTITY);
        fx.registry.register(2, "hazard,0,Damage,-1");

        fx.tick(&mut mario);
        assert_eq!(fx.count(|c| matches!(c, EngineCall::TakeDamage { .. })), 0);
    }

    #[test]
    fn test_mirror_skips_interactables() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        fx.host
            .add_volume(1, Aabb::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE));
        fx.registry.register(1, "coin,0,BlueCoin,-1");

        fx.tick(&mut mario);
        assert!(fx.host.volume_active(1));
        assert_eq!(fx.count(|c| matches!(c, EngineCall::PlaySound { .. })), 0);
    }

    // ------------------------------------------------------------------------
    // Death
    // ------------------------------------------------------------------------

    #[test]
    fn test_death_timing_table() {
        assert_eq!(
            death_timing(true, false),
            DeathTiming {
                laugh_delay: 0.8,
                nuke_delay: 2.2
            }
        );
        assert_eq!(death_timing(true, true).nuke_delay, 2.2);
        assert_eq!(
            death_timing(false, true),
            DeathTiming {
                laugh_delay: 0.4,
                nuke_delay: 1.8
            }
        );
        assert_eq!(
            death_timing(false, false),
            DeathTiming {
                laugh_delay: 2.5,
                nuke_delay: 12.0
            }
        );
    }

    #[test]
    fn test_death_plane_schedules_once() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        fx.engine().set_floor(SCALE_FACTOR, SurfaceType::DEATH_PLANE);

        let report = fx.tick(&mut mario);
        assert_eq!(mario.phase(), MarioPhase::Dying);
        assert_eq!(
            report.scheduled,
            vec![
                Scheduled {
                    delay_secs: 0.4,
                    action: DeferredAction::PlaySound(SoundId::BowserLaugh),
                },
                Scheduled {
                    delay_secs: 1.8,
                    action: DeferredAction::Nuke { delete: true },
                },
            ]
        );

        let report = fx.tick(&mut mario);
        assert!(report.simulated);
        assert!(report.scheduled.is_empty());
    }

    #[test]
    fn test_far_death_plane_is_harmless() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        fx.engine().set_floor(-5.0 * SCALE_FACTOR, SurfaceType::DEATH_PLANE);

        let report = fx.tick(&mut mario);
        assert!(report.scheduled.is_empty());
        assert_eq!(mario.phase(), MarioPhase::Active);
    }

    #[test]
    fn test_dead_actor_uses_long_delays() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().health = 0;

        let report = fx.tick(&mut mario);
        assert_eq!(report.scheduled[0].delay_secs, 2.5);
        assert_eq!(report.scheduled[1].delay_secs, 12.0);
    }

    #[test]
    fn test_quicksand_death_uses_short_delays() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        let state = fx.engine().state_mut(id).unwrap();
        state.health = 0;
        state.action = ActionFlags::QUICKSAND_DEATH.bits();

        let report = fx.tick(&mut mario);
        assert_eq!(report.scheduled[0].delay_secs, 0.8);
        assert_eq!(report.scheduled[1].delay_secs, 2.2);
    }

    #[test]
    fn test_mirror_never_schedules_death() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().health = 0;

        let report = fx.tick(&mut mario);
        assert!(report.scheduled.is_empty());
        assert_eq!(mario.phase(), MarioPhase::Active);
    }

    #[test]
    fn test_nuke_freezes_or_deletes() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);

        let keep = MarioSettings {
            delete_after_death: false,
            ..MarioSettings::default()
        };
        assert!(!mario.set_nuked(false, &keep));
        assert_eq!(mario.phase(), MarioPhase::Nuked);
        assert!(!fx.tick(&mut mario).simulated);

        assert!(mario.set_nuked(true, &keep));
        assert!(mario.set_nuked(false, &MarioSettings::default()));
    }

    // ------------------------------------------------------------------------
    // Grab / throw
    // ------------------------------------------------------------------------

    #[test]
    fn test_hold_wakes_sleeping_actor() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().action = ActionFlags::SLEEPING.bits();
        fx.tick(&mut mario);
        fx.engine().clear_calls();

        fx.host.set_grabbed(ENTITY, true);
        fx.tick(&mut mario);

        let actions: Vec<u32> = fx
            .calls()
            .iter()
            .filter_map(|c| match c {
                EngineCall::SetAction { action, .. } => Some(*action),
                _ => None,
            })
            .collect();
        assert_eq!(
            actions,
            vec![ActionFlags::WAKING_UP.bits(), ActionFlags::GRABBED.bits()]
        );
    }

    #[test]
    fn test_release_with_motion_throws() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.host.set_grabbed(ENTITY, true);
        fx.tick(&mut mario);

        fx.engine().state_mut(id).unwrap().position = [-100.0, SCALE_FACTOR, 0.0];
        fx.host.set_grabbed(ENTITY, false);
        fx.tick(&mut mario);

        assert!(fx.calls().contains(&EngineCall::SetAction {
            id,
            action: ActionFlags::THROWN_FORWARD.bits()
        }));
        assert!(fx
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::SetVelocity { .. })));
        let forward = fx.calls().iter().find_map(|c| match c {
            EngineCall::SetForwardVelocity { velocity, .. } => Some(*velocity),
            _ => None,
        });
        assert!((forward.unwrap() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_mirror_release_only_sets_action() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);
        fx.host.set_grabbed(ENTITY, true);
        fx.tick(&mut mario);
        fx.host.set_grabbed(ENTITY, false);
        fx.tick(&mut mario);

        assert!(fx.calls().contains(&EngineCall::SetAction {
            id,
            action: ActionFlags::FREEFALL.bits()
        }));
        assert_eq!(
            fx.count(|c| matches!(
                c,
                EngineCall::SetVelocity { .. }
                    | EngineCall::SetForwardVelocity { .. }
                    | EngineCall::SetFaceAngle { .. }
            )),
            0
        );
    }

    // ------------------------------------------------------------------------
    // Fluids & material
    // ------------------------------------------------------------------------

    #[test]
    fn test_water_level_pushed_only_on_change() {
        let mut fx = Fixture::new();
        fx.host.add_volume(
            5,
            Aabb::from_center_size(Vec3::new(0.0, 1.0, 0.0), Vec3::new(4.0, 2.0, 4.0)),
        );
        fx.water.push(5);
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);

        fx.tick(&mut mario);
        fx.tick(&mut mario);
        assert_eq!(mario.water_level(), 2.0);
        assert_eq!(
            fx.count(|c| *c == EngineCall::WaterLevel { id, level: 2000 }),
            1
        );

        fx.host.remove_volume(5);
        fx.tick(&mut mario);
        assert_eq!(mario.water_level(), -100.0);
    }

    #[test]
    fn test_material_follows_caps() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().flags = StateFlags::METAL_CAP.bits();

        fx.tick(&mut mario);
        fx.tick(&mut mario);
        assert_eq!(mario.material(), MaterialSelection::Metal);
        let log = fx.host.renderer(ENTITY).unwrap();
        assert_eq!(log.material_changes, vec![MaterialSelection::Metal]);
        assert_eq!(log.color_uploads, 2);
    }

    // ------------------------------------------------------------------------
    // Bypass
    // ------------------------------------------------------------------------

    #[test]
    fn test_far_mirror_is_bypassed_and_restored() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);

        fx.host.set_viewer_distance(ENTITY, 10.0);
        assert!(!fx.tick(&mut mario).simulated);
        assert!(mario.is_bypassed());
        assert!(!fx.host.renderer(ENTITY).unwrap().enabled);

        fx.host.set_viewer_distance(ENTITY, 1.0);
        assert!(fx.tick(&mut mario).simulated);
        assert!(fx.host.renderer(ENTITY).unwrap().enabled);
    }

    #[test]
    fn test_mirror_bypass_leaves_replicated_visibility() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);

        fx.host.set_viewer_distance(ENTITY, 10.0);
        fx.tick(&mut mario);
        assert!(mario.is_bypassed());
        mario.set_is_over_max_count(true, &mut fx.replication);

        assert!(fx.replication.read_vars(ENTITY).is_shown);
        assert!(!fx
            .replication
            .writes()
            .iter()
            .any(|(_, var)| matches!(var, MarioVar::IsShown(_))));
    }

    #[test]
    fn test_authority_bypass_publishes_visibility() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);

        mario.set_is_over_max_count(true, &mut fx.replication);
        assert!(!fx.replication.read_vars(ENTITY).is_shown);

        mario.set_is_over_max_count(false, &mut fx.replication);
        assert!(fx.replication.read_vars(ENTITY).is_shown);
    }

    #[test]
    fn test_local_actor_ignores_distance() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        fx.host.set_viewer_distance(ENTITY, 100.0);
        assert!(fx.tick(&mut mario).simulated);
    }

    #[test]
    fn test_over_max_count_bypasses() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);

        mario.set_is_over_max_count(true, &mut fx.replication);
        assert!(!fx.tick(&mut mario).simulated);

        mario.set_is_over_max_count(false, &mut fx.replication);
        assert!(fx.tick(&mut mario).simulated);
    }

    // ------------------------------------------------------------------------
    // Melee
    // ------------------------------------------------------------------------

    #[test]
    fn test_melee_damage_from_attacking_neighbor() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);

        let near = MeleeSnapshot {
            entity: 200,
            position: Vec3::new(0.05, 1.0, 0.0),
            is_attacking: true,
        };
        let idle = MeleeSnapshot {
            is_attacking: false,
            ..near
        };
        let far = MeleeSnapshot {
            position: Vec3::new(1.0, 1.0, 0.0),
            ..near
        };
        let itself = MeleeSnapshot {
            entity: ENTITY,
            ..near
        };

        assert!(!mario.resolve_melee(&[idle, far, itself], &mut fx.env()));
        assert!(mario.resolve_melee(&[idle, near], &mut fx.env()));
        assert!(fx.calls().contains(&EngineCall::TakeDamage {
            id,
            damage: MELEE_DAMAGE,
            position: [-50.0, SCALE_FACTOR, 0.0],
        }));
    }

    #[test]
    fn test_melee_snapshot_reports_attack() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.engine().state_mut(id).unwrap().action = ActionFlags::FLAG_ATTACKING.bits();
        fx.tick(&mut mario);

        let snapshot = mario.melee_snapshot(&fx.host).unwrap();
        assert!(snapshot.is_attacking);
        assert_eq!(snapshot.position, Vec3::new(0.0, 1.0, 0.0));
    }

    // ------------------------------------------------------------------------
    // Render tick
    // ------------------------------------------------------------------------

    #[test]
    fn test_render_tick_interpolates_local_transform() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        fx.tick(&mut mario);
        fx.engine().state_mut(id).unwrap().position = [-SCALE_FACTOR, SCALE_FACTOR, 0.0];
        fx.tick(&mut mario);

        mario.render_tick(0.5, &mut fx.env());

        let transform = fx.host.transform(ENTITY).unwrap();
        assert!((transform.position - Vec3::new(0.5, 1.0, 0.0)).length() < 1e-5);
        assert_eq!(fx.replication.read_vars(ENTITY).health_points, MAX_HEALTH_POINTS);
        assert_eq!(fx.host.renderer(ENTITY).unwrap().mesh_uploads, 1);
    }

    #[test]
    fn test_render_tick_mirror_follows_host_and_replicated_health() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);
        fx.replication
            .write_var(ENTITY, MarioVar::HealthPoints(100.0));
        fx.tick(&mut mario);
        fx.engine().clear_calls();

        mario.render_tick(0.3, &mut fx.env());

        assert!(fx.calls().contains(&EngineCall::SetPosition {
            id,
            position: [0.0, SCALE_FACTOR, 0.0],
        }));
        assert!(fx.calls().contains(&EngineCall::SetHealth { id, health: 853 }));
        assert_eq!(fx.host.transform(ENTITY).unwrap().position, Vec3::new(0.0, 1.0, 0.0));
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    #[test]
    fn test_heal_gated_for_mirrors() {
        let mut fx = Fixture::new();
        let mut mirror = fx.spawn(REMOTE);
        mirror.heal(1, &mut fx.env());
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Heal { .. })), 0);
    }

    #[test]
    fn test_teleport_actions() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        mario.teleport_start(&mut fx.env());
        mario.teleport_end(&mut fx.env());

        assert!(fx.calls().contains(&EngineCall::SetAction {
            id,
            action: ActionFlags::TELEPORT_FADE_OUT.bits()
        }));
        assert!(fx.calls().contains(&EngineCall::SetAction {
            id,
            action: ActionFlags::TELEPORT_FADE_IN.bits()
        }));
    }

    // ------------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------------

    #[test]
    fn test_dispose_is_idempotent() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        let id = id(&mario);
        let token = mario.liveness_token();

        assert!(mario.dispose(&mut fx.env(), true));
        assert!(!mario.dispose(&mut fx.env(), true));

        assert_eq!(fx.bridge.engine().delete_count(id), 1);
        assert_eq!(fx.host.destroyed_entities(), &[ENTITY]);
        assert!(fx.host.renderer(ENTITY).unwrap().destroyed);
        assert!(!token.is_alive());
        assert!(mario.is_disposed());
    }

    #[test]
    fn test_dispose_after_terminate_skips_native_delete() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(LOCAL);
        fx.bridge.global_terminate();

        assert!(mario.dispose(&mut fx.env(), true));
        assert_eq!(fx.count(|c| matches!(c, EngineCall::Delete { .. })), 0);
    }

    #[test]
    fn test_mirror_dispose_keeps_entity() {
        let mut fx = Fixture::new();
        let mut mario = fx.spawn(REMOTE);
        let id = id(&mario);

        assert!(mario.dispose(&mut fx.env(), true));
        assert!(fx.host.destroyed_entities().is_empty());
        assert_eq!(fx.bridge.engine().delete_count(id), 1);
    }
}
