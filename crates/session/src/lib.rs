//! sm64sync Session Context
//!
//! One [`SessionContext`] per shared world. It owns:
//! - The actor set, keyed by host entity and kept in creation order
//! - The interactable registry and the water, gas and terrain volume sets
//! - The fixed-tick and render-tick drivers
//! - Deferred work (death sequences, asset requests)
//! - The global actor cap and the "near any actor" presence broadcast
//! - Live configuration updates
//!
//! # Driving
//!
//! The host calls [`SessionContext::fixed_tick`] every
//! [`SessionConfig::tick_period`] and [`SessionContext::render_tick`] every
//! frame, both from its update thread. Scene changes arrive as explicit
//! events: [`SessionContext::spawn_mario`], [`SessionContext::register_volume`]
//! and [`SessionContext::on_entity_removed`].
//!
//! # Tick ordering
//!
//! Within one fixed tick every actor steps before any cross-actor query runs,
//! so melee always reads states from the same tick.

#![deny(unsafe_code)]

pub mod assets;
pub mod config;
pub mod replication;
pub mod scheduler;
pub mod validation;

use std::collections::BTreeMap;
use std::time::Duration;

use sm64sync_bridge::{Bridge, BridgeError, CapKind, RawSurface, SimulationEngine};
use sm64sync_sim::{
    CapOutcome, ControllerInput, DeferredAction, EntityId, HostWorld, InteractableRegistry, Mario,
    MarioEnv, MarioSettings, MeleeSnapshot, Replication, TickWorld, UserId, VolumeId, VolumeKind,
    VolumeTag,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use assets::{AssetError, AssetId, AssetRequest, DEFAULT_MARIO_URL};
pub use config::{ConfigError, ConfigKey, ConfigValue, SessionConfig};
pub use replication::LoopbackReplication;
pub use scheduler::Scheduler;
pub use validation::{InputValidation, validate_input};

// ============================================================================
// Parameters
// ============================================================================

/// Updates between an authority's creation and its asset request.
pub const ASSET_REQUEST_DELAY_UPDATES: u32 = 3;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("entity {0} has no mario")]
    UnknownEntity(EntityId),

    #[error("entity {0} already has a mario")]
    AlreadySpawned(EntityId),
}

// ============================================================================
// Deferred Work
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionTask {
    Mario {
        entity: EntityId,
        action: DeferredAction,
    },
    RequestAsset {
        entity: EntityId,
    },
}

impl SessionTask {
    fn entity(&self) -> EntityId {
        match *self {
            Self::Mario { entity, .. } | Self::RequestAsset { entity } => entity,
        }
    }
}

// ============================================================================
// Session Context
// ============================================================================

pub struct SessionContext<E: SimulationEngine, H: HostWorld, R: Replication> {
    config: SessionConfig,
    settings: MarioSettings,
    bridge: Bridge<E>,
    host: H,
    replication: R,
    local_user: UserId,
    registry: InteractableRegistry,
    water_volumes: Vec<VolumeId>,
    gas_volumes: Vec<VolumeId>,
    terrain_volumes: BTreeMap<VolumeId, VolumeTag>,
    marios: BTreeMap<EntityId, Mario>,
    /// Entities in creation order
    spawn_order: Vec<EntityId>,
    scheduler: Scheduler<SessionTask>,
    asset_requests: Vec<AssetRequest>,
    local_input: ControllerInput,
    last_tick: Duration,
    viewer_count: usize,
}

impl<E: SimulationEngine, H: HostWorld, R: Replication> SessionContext<E, H, R> {
    /// Create a session for `local_user`. The engine still needs
    /// [`SessionContext::global_init`] before actors can be created.
    pub fn new(config: SessionConfig, engine: E, host: H, replication: R, local_user: UserId) -> Self {
        Self {
            settings: config.mario_settings(),
            config,
            bridge: Bridge::new(engine),
            host,
            replication,
            local_user,
            registry: InteractableRegistry::new(),
            water_volumes: Vec::new(),
            gas_volumes: Vec::new(),
            terrain_volumes: BTreeMap::new(),
            marios: BTreeMap::new(),
            spawn_order: Vec::new(),
            scheduler: Scheduler::new(),
            asset_requests: Vec::new(),
            local_input: ControllerInput::default(),
            last_tick: Duration::ZERO,
            viewer_count: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    pub fn bridge(&self) -> &Bridge<E> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<E> {
        &mut self.bridge
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn replication(&self) -> &R {
        &self.replication
    }

    pub fn registry(&self) -> &InteractableRegistry {
        &self.registry
    }

    pub fn water_volumes(&self) -> &[VolumeId] {
        &self.water_volumes
    }

    pub fn gas_volumes(&self) -> &[VolumeId] {
        &self.gas_volumes
    }

    /// Terrain volumes the host bakes into engine surfaces.
    pub fn terrain_volumes(&self) -> impl Iterator<Item = (VolumeId, &VolumeTag)> {
        self.terrain_volumes.iter().map(|(volume, tag)| (*volume, tag))
    }

    pub fn mario(&self, entity: EntityId) -> Option<&Mario> {
        self.marios.get(&entity)
    }

    pub fn mario_count(&self) -> usize {
        self.marios.len()
    }

    /// Actors in creation order.
    pub fn marios(&self) -> impl Iterator<Item = &Mario> {
        self.spawn_order.iter().filter_map(|entity| self.marios.get(entity))
    }

    pub fn local_input(&self) -> ControllerInput {
        self.local_input
    }

    pub fn last_tick(&self) -> Duration {
        self.last_tick
    }

    fn env(&mut self) -> MarioEnv<'_, E> {
        MarioEnv {
            bridge: &mut self.bridge,
            host: &mut self.host,
            replication: &mut self.replication,
            settings: &self.settings,
        }
    }

    fn with_mario<T>(
        &mut self,
        entity: EntityId,
        apply: impl FnOnce(&mut Mario, &mut MarioEnv<'_, E>) -> T,
    ) -> Result<T, SessionError> {
        let mario = self
            .marios
            .get_mut(&entity)
            .ok_or(SessionError::UnknownEntity(entity))?;
        let mut env = MarioEnv {
            bridge: &mut self.bridge,
            host: &mut self.host,
            replication: &mut self.replication,
            settings: &self.settings,
        };
        Ok(apply(mario, &mut env))
    }

    // ------------------------------------------------------------------------
    // Engine lifecycle
    // ------------------------------------------------------------------------

    pub fn global_init(
        &mut self,
        rom: &[u8],
        texture_out: &mut [u8],
        static_surfaces: &[RawSurface],
    ) -> Result<(), SessionError> {
        self.bridge.global_init(rom, texture_out, static_surfaces)?;
        Ok(())
    }

    /// Dispose every actor, then shut the engine down.
    pub fn global_terminate(&mut self) {
        self.teardown();
        self.bridge.global_terminate();
    }

    /// Dispose every actor. Entities the host still has are destroyed along
    /// with their local actors.
    pub fn teardown(&mut self) {
        let entities = std::mem::take(&mut self.spawn_order);
        for entity in entities {
            let alive = self.host.transform(entity).is_some();
            self.remove_mario(entity, alive);
        }
        self.scheduler.clear();
        self.asset_requests.clear();
        info!(local_user = self.local_user, "session torn down");
    }

    // ------------------------------------------------------------------------
    // Scene events
    // ------------------------------------------------------------------------

    /// Create the actor for `entity`, owned by `owner`.
    ///
    /// When the engine refuses the actor an inert placeholder still occupies
    /// the entity, so the session keeps running and later events resolve.
    pub fn spawn_mario(&mut self, entity: EntityId, owner: UserId) -> Result<(), SessionError> {
        if self.marios.contains_key(&entity) {
            return Err(SessionError::AlreadySpawned(entity));
        }

        let local_user = self.local_user;
        let (mario, outcome) = match Mario::new(entity, owner, local_user, &mut self.env()) {
            Ok(mario) => (mario, Ok(())),
            Err(err) => (
                Mario::inert(entity, owner, local_user),
                Err(SessionError::from(err)),
            ),
        };

        if mario.is_local() && mario.is_initialized() {
            self.scheduler
                .run_in_updates(ASSET_REQUEST_DELAY_UPDATES, SessionTask::RequestAsset { entity });
        }

        self.marios.insert(entity, mario);
        self.spawn_order.push(entity);
        self.refresh_presence();
        outcome
    }

    /// The host is destroying `entity`. Returns whether it was an actor or a
    /// registered volume.
    pub fn on_entity_removed(&mut self, entity: EntityId) -> bool {
        if self.remove_mario(entity, false) {
            return true;
        }
        self.unregister_volume(entity)
    }

    /// Parse a volume's tag and track it by role, replacing any role it had.
    ///
    /// Interactables whose geometry is not readable yet are skipped; the host
    /// registers them again once it is.
    pub fn register_volume(&mut self, volume: VolumeId, raw_tag: &str) -> VolumeKind {
        self.unregister_volume(volume);
        let tag = VolumeTag::parse(raw_tag);
        let kind = tag.kind;

        match kind {
            VolumeKind::None => {}
            VolumeKind::Water => push_unique(&mut self.water_volumes, volume),
            VolumeKind::Gas => push_unique(&mut self.gas_volumes, volume),
            VolumeKind::Terrain { .. } => {
                self.terrain_volumes.insert(volume, tag);
            }
            VolumeKind::Interactable(_) => {
                if !self.host.is_volume_geometry_ready(volume) {
                    if self.config.debug_logging {
                        warn!(volume, tag = raw_tag, "interactable geometry not ready, skipping");
                    }
                    return VolumeKind::None;
                }
                self.registry.register(volume, raw_tag);
            }
        }
        kind
    }

    /// Forget a volume under every role. Absent volumes are a no-op.
    pub fn unregister_volume(&mut self, volume: VolumeId) -> bool {
        let interactable = self.registry.unregister(volume).is_some();
        let terrain = self.terrain_volumes.remove(&volume).is_some();
        let water = remove_item(&mut self.water_volumes, volume);
        let gas = remove_item(&mut self.gas_volumes, volume);
        interactable || terrain || water || gas
    }

    fn remove_mario(&mut self, entity: EntityId, entity_alive: bool) -> bool {
        let Some(mut mario) = self.marios.remove(&entity) else {
            return false;
        };
        self.spawn_order.retain(|e| *e != entity);
        self.scheduler.retain(|task| task.entity() != entity);
        self.asset_requests.retain(|request| request.entity() != entity);

        mario.dispose(&mut self.env(), entity_alive);
        if mario.is_local() {
            self.replication.forget(entity);
        }
        self.refresh_presence();
        true
    }

    // ------------------------------------------------------------------------
    // Inputs & configuration
    // ------------------------------------------------------------------------

    /// Set the local controller snapshot the local actors publish. Rejected
    /// input leaves the previous snapshot in place.
    pub fn set_local_input(&mut self, input: ControllerInput) -> InputValidation {
        let result = validate_input(input);
        if let Some(input) = result.input() {
            self.local_input = input;
        }
        result
    }

    /// Apply one live configuration change.
    pub fn on_config_changed(&mut self, key: ConfigKey, value: ConfigValue) -> Result<(), ConfigError> {
        if let Err(err) = self.config.apply(key, value) {
            warn!(%key, %err, "config change rejected");
            return Err(err);
        }
        self.settings = self.config.mario_settings();
        debug!(%key, "config change applied");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------------

    /// One fixed simulation step for every actor at time `now`.
    pub fn fixed_tick(&mut self, now: Duration) {
        for task in self.scheduler.advance(now) {
            self.run_task(task);
        }
        self.apply_max_count();

        let world = TickWorld {
            registry: &self.registry,
            water_volumes: &self.water_volumes,
            gas_volumes: &self.gas_volumes,
            local_input: self.local_input,
        };
        let mut env = MarioEnv {
            bridge: &mut self.bridge,
            host: &mut self.host,
            replication: &mut self.replication,
            settings: &self.settings,
        };

        let mut stepped = Vec::new();
        let mut scheduled = Vec::new();
        for entity in &self.spawn_order {
            let Some(mario) = self.marios.get_mut(entity) else {
                continue;
            };
            let report = mario.fixed_tick(&mut env, &world);
            if report.simulated {
                stepped.push(*entity);
            }
            scheduled.extend(report.scheduled.into_iter().map(|item| (*entity, item)));
        }

        let snapshots: Vec<MeleeSnapshot> = stepped
            .iter()
            .filter_map(|entity| self.marios.get(entity))
            .filter_map(|mario| mario.melee_snapshot(&*env.host))
            .collect();
        for entity in &stepped {
            if let Some(mario) = self.marios.get_mut(entity) {
                mario.resolve_melee(&snapshots, &mut env);
            }
        }

        for (entity, item) in scheduled {
            self.scheduler.run_in_seconds(
                item.delay_secs,
                SessionTask::Mario {
                    entity,
                    action: item.action,
                },
            );
        }
        self.last_tick = now;
    }

    /// Interpolate every actor for a frame drawn at time `now`.
    pub fn render_tick(&mut self, now: Duration) {
        let period = self.config.tick_period().as_secs_f32();
        let t = now.saturating_sub(self.last_tick).as_secs_f32() / period;

        let mut env = MarioEnv {
            bridge: &mut self.bridge,
            host: &mut self.host,
            replication: &mut self.replication,
            settings: &self.settings,
        };
        for entity in &self.spawn_order {
            if let Some(mario) = self.marios.get_mut(entity) {
                mario.render_tick(t, &mut env);
            }
        }
    }

    fn run_task(&mut self, task: SessionTask) {
        match task {
            SessionTask::Mario { entity, action } => {
                let Some(mario) = self.marios.get_mut(&entity) else {
                    return;
                };
                match action {
                    DeferredAction::PlaySound(sound) => self.bridge.play_sound(sound),
                    DeferredAction::Nuke { delete } => {
                        if mario.set_nuked(delete, &self.settings) {
                            self.remove_mario(entity, true);
                        }
                    }
                }
            }
            SessionTask::RequestAsset { entity } => {
                let Some(mario) = self.marios.get(&entity) else {
                    return;
                };
                match AssetId::parse(self.config.mario_url()) {
                    Ok(asset) => {
                        debug!(entity, %asset, "requesting mario asset");
                        self.asset_requests
                            .push(AssetRequest::new(entity, asset, mario.liveness_token()));
                    }
                    Err(err) => warn!(entity, %err, "mario asset url rejected"),
                }
            }
        }
    }

    /// Bypass initialized actors beyond the cap, in creation order.
    fn apply_max_count(&mut self) {
        let cap = self.config.max_mario_count as usize;
        let mut counted = 0usize;
        for entity in &self.spawn_order {
            let Some(mario) = self.marios.get_mut(entity) else {
                continue;
            };
            if !mario.is_initialized() {
                continue;
            }
            counted += 1;
            let over = cap > 0 && counted > cap;
            mario.set_is_over_max_count(over, &mut self.replication);
        }
    }

    // ------------------------------------------------------------------------
    // Actor commands
    // ------------------------------------------------------------------------

    pub fn wear_cap(
        &mut self,
        entity: EntityId,
        cap: CapKind,
        duration_secs: f32,
    ) -> Result<CapOutcome, SessionError> {
        self.with_mario(entity, |mario, env| mario.wear_cap(cap, duration_secs, true, env))
    }

    pub fn heal(&mut self, entity: EntityId, wedges: u8) -> Result<(), SessionError> {
        self.with_mario(entity, |mario, env| mario.heal(wedges, env))
    }

    pub fn teleport_start(&mut self, entity: EntityId) -> Result<(), SessionError> {
        self.with_mario(entity, |mario, env| mario.teleport_start(env))
    }

    pub fn teleport_end(&mut self, entity: EntityId) -> Result<(), SessionError> {
        self.with_mario(entity, |mario, env| mario.teleport_end(env))
    }

    /// Halt an actor now, disposing it when `delete` or the session's
    /// delete-after-death setting asks for it.
    pub fn nuke(&mut self, entity: EntityId, delete: bool) -> Result<(), SessionError> {
        let mario = self
            .marios
            .get_mut(&entity)
            .ok_or(SessionError::UnknownEntity(entity))?;
        if mario.set_nuked(delete, &self.settings) {
            self.remove_mario(entity, true);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------------

    /// Asset loads requested since the last call, for the host to start.
    pub fn take_asset_requests(&mut self) -> Vec<AssetRequest> {
        std::mem::take(&mut self.asset_requests)
    }

    /// Hand a finished load back. Returns whether the visual was attached.
    pub fn complete_asset(&mut self, request: AssetRequest, content: &[u8]) -> Result<bool, AssetError> {
        request.complete(content, &mut self.host)
    }

    // ------------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------------

    /// Viewer count changed. Publishes and returns whether the local viewer
    /// is within cull distance of any initialized actor.
    pub fn update_presence(&mut self, viewer_count: usize) -> bool {
        self.viewer_count = viewer_count;
        self.refresh_presence()
    }

    /// Last presence another participant published.
    pub fn presence_of(&self, user: UserId) -> Option<bool> {
        self.replication.read_presence(user)
    }

    fn refresh_presence(&mut self) -> bool {
        let cull_distance = self.config.mario_cull_distance;
        let near = self.marios.values().any(|mario| {
            mario.is_initialized()
                && !mario.is_disposed()
                && self.host.distance_from_viewer(mario.entity()) <= cull_distance
        });
        self.replication.write_presence(self.local_user, near);
        debug!(
            local_user = self.local_user,
            near,
            marios = self.marios.len(),
            viewers = self.viewer_count,
            "presence published"
        );
        near
    }
}

impl<E: SimulationEngine, H: HostWorld, R: Replication> Drop for SessionContext<E, H, R> {
    fn drop(&mut self) {
        if !self.marios.is_empty() {
            self.teardown();
        }
    }
}

impl<E: SimulationEngine, H: HostWorld, R: Replication> std::fmt::Debug for SessionContext<E, H, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("local_user", &self.local_user)
            .field("marios", &self.spawn_order)
            .field("interactables", &self.registry.len())
            .field("last_tick", &self.last_tick)
            .finish_non_exhaustive()
    }
}

fn push_unique(volumes: &mut Vec<VolumeId>, volume: VolumeId) {
    if !volumes.contains(&volume) {
        volumes.push(volume);
    }
}

fn remove_item(volumes: &mut Vec<VolumeId>, volume: VolumeId) -> bool {
    let before = volumes.len();
    volumes.retain(|v| *v != volume);
    volumes.len() != before
}

// ============================================================================
// Tests
// ============================================================================
