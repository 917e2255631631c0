//! In-memory host collaborators for tests.
//!
//! [`TestHost`] is a flat scene of entities and volumes, [`RecordingRenderer`]
//! logs what an actor pushed to its mesh, and [`MemoryReplication`] keeps the
//! replicated variable space in plain maps.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use glam::{Quat, Vec2, Vec3};

use crate::host::{
    ControllerInput, HostWorld, MarioRenderer, MarioVar, MaterialSelection, ReplicatedVars,
    Replication, Transform,
};
use crate::volume::{Aabb, CapsuleShape};
use crate::{EntityId, UserId, VolumeId};

// ============================================================================
// Renderer
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RendererLog {
    pub enabled: bool,
    pub material: MaterialSelection,
    pub material_changes: Vec<MaterialSelection>,
    pub mesh_uploads: usize,
    pub color_uploads: usize,
    pub last_positions: Vec<Vec3>,
    pub local_only: bool,
    pub destroyed: bool,
}

#[derive(Debug, Clone)]
pub struct RecordingRenderer {
    log: Rc<RefCell<RendererLog>>,
}

impl RecordingRenderer {
    pub fn new() -> (Self, Rc<RefCell<RendererLog>>) {
        let log = Rc::new(RefCell::new(RendererLog {
            enabled: true,
            ..RendererLog::default()
        }));
        (Self { log: Rc::clone(&log) }, log)
    }
}

impl MarioRenderer for RecordingRenderer {
    fn set_enabled(&mut self, enabled: bool) {
        self.log.borrow_mut().enabled = enabled;
    }

    fn set_material(&mut self, material: MaterialSelection) {
        let mut log = self.log.borrow_mut();
        log.material = material;
        log.material_changes.push(material);
    }

    fn update_mesh(&mut self, positions: &[Vec3], _normals: &[Vec3]) {
        let mut log = self.log.borrow_mut();
        log.mesh_uploads += 1;
        log.last_positions = positions.to_vec();
    }

    fn update_colors(&mut self, _colors: &[Vec3], _uvs: &[Vec2]) {
        self.log.borrow_mut().color_uploads += 1;
    }

    fn destroy(&mut self) {
        self.log.borrow_mut().destroyed = true;
    }
}

// ============================================================================
// Scene
// ============================================================================

#[derive(Debug, Clone)]
struct TestEntity {
    transform: Transform,
    grabbed: bool,
    viewer_distance: f32,
    collider: Option<CapsuleShape>,
}

#[derive(Debug, Clone)]
struct TestVolume {
    bounds: Aabb,
    active: bool,
    parent: Option<EntityId>,
    geometry_ready: bool,
}

#[derive(Debug, Default)]
pub struct TestHost {
    entities: BTreeMap<EntityId, TestEntity>,
    volumes: BTreeMap<VolumeId, TestVolume>,
    views: BTreeMap<UserId, Quat>,
    renderers: BTreeMap<EntityId, Rc<RefCell<RendererLog>>>,
    visuals: BTreeMap<EntityId, Vec<u8>>,
    destroyed_entities: Vec<EntityId>,
    destroyed_visuals: Vec<EntityId>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: EntityId, position: Vec3) {
        self.entities.insert(
            entity,
            TestEntity {
                transform: Transform {
                    position,
                    rotation: Quat::IDENTITY,
                },
                grabbed: false,
                viewer_distance: 0.0,
                collider: None,
            },
        );
    }

    pub fn remove_entity(&mut self, entity: EntityId) {
        self.entities.remove(&entity);
    }

    pub fn has_entity(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn set_position(&mut self, entity: EntityId, position: Vec3) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.transform.position = position;
        }
    }

    pub fn set_grabbed(&mut self, entity: EntityId, grabbed: bool) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.grabbed = grabbed;
        }
    }

    pub fn set_viewer_distance(&mut self, entity: EntityId, distance: f32) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.viewer_distance = distance;
        }
    }

    pub fn set_view_rotation(&mut self, user: UserId, rotation: Quat) {
        self.views.insert(user, rotation);
    }

    pub fn collider(&self, entity: EntityId) -> Option<CapsuleShape> {
        self.entities.get(&entity).and_then(|e| e.collider)
    }

    pub fn add_volume(&mut self, volume: VolumeId, bounds: Aabb) {
        self.volumes.insert(
            volume,
            TestVolume {
                bounds,
                active: true,
                parent: None,
                geometry_ready: true,
            },
        );
    }

    /// Make `volume` part of `entity`'s hierarchy.
    pub fn parent_volume(&mut self, volume: VolumeId, entity: EntityId) {
        if let Some(v) = self.volumes.get_mut(&volume) {
            v.parent = Some(entity);
        }
    }

    pub fn set_geometry_ready(&mut self, volume: VolumeId, ready: bool) {
        if let Some(v) = self.volumes.get_mut(&volume) {
            v.geometry_ready = ready;
        }
    }

    pub fn remove_volume(&mut self, volume: VolumeId) {
        self.volumes.remove(&volume);
    }

    pub fn volume_active(&self, volume: VolumeId) -> bool {
        self.volumes.get(&volume).is_some_and(|v| v.active)
    }

    /// Snapshot of what an entity's renderer received.
    pub fn renderer(&self, entity: EntityId) -> Option<RendererLog> {
        self.renderers.get(&entity).map(|log| log.borrow().clone())
    }

    pub fn visual(&self, entity: EntityId) -> Option<&[u8]> {
        self.visuals.get(&entity).map(Vec::as_slice)
    }

    pub fn destroyed_entities(&self) -> &[EntityId] {
        &self.destroyed_entities
    }

    pub fn destroyed_visuals(&self) -> &[EntityId] {
        &self.destroyed_visuals
    }
}

impl HostWorld for TestHost {
    fn transform(&self, entity: EntityId) -> Option<Transform> {
        self.entities.get(&entity).map(|e| e.transform)
    }

    fn set_transform(&mut self, entity: EntityId, transform: Transform) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.transform = transform;
        }
    }

    fn is_grabbed(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).is_some_and(|e| e.grabbed)
    }

    fn distance_from_viewer(&self, entity: EntityId) -> f32 {
        self.entities
            .get(&entity)
            .map_or(f32::INFINITY, |e| e.viewer_distance)
    }

    fn view_rotation(&self, user: UserId) -> Option<Quat> {
        self.views.get(&user).copied()
    }

    fn collider_bounds(&self, entity: EntityId) -> Option<Aabb> {
        let e = self.entities.get(&entity)?;
        let shape = e.collider.unwrap_or_else(CapsuleShape::mario);
        Some(shape.bounds_at(e.transform.position))
    }

    fn configure_collider(&mut self, entity: EntityId, shape: CapsuleShape) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.collider = Some(shape);
        }
    }

    fn volume_bounds(&self, volume: VolumeId) -> Option<Aabb> {
        self.volumes.get(&volume).map(|v| v.bounds)
    }

    fn volume_position(&self, volume: VolumeId) -> Vec3 {
        self.volumes
            .get(&volume)
            .map_or(Vec3::ZERO, |v| v.bounds.center())
    }

    fn is_volume_active(&self, volume: VolumeId) -> bool {
        self.volume_active(volume)
    }

    fn set_volume_active(&mut self, volume: VolumeId, active: bool) {
        if let Some(v) = self.volumes.get_mut(&volume) {
            v.active = active;
        }
    }

    fn is_volume_within(&self, volume: VolumeId, entity: EntityId) -> bool {
        self.volumes
            .get(&volume)
            .is_some_and(|v| v.parent == Some(entity))
    }

    fn is_volume_geometry_ready(&self, volume: VolumeId) -> bool {
        self.volumes.get(&volume).is_some_and(|v| v.geometry_ready)
    }

    fn create_renderer(&mut self, entity: EntityId, local_only: bool) -> Box<dyn MarioRenderer> {
        let (renderer, log) = RecordingRenderer::new();
        log.borrow_mut().local_only = local_only;
        self.renderers.insert(entity, log);
        Box::new(renderer)
    }

    fn attach_visual(&mut self, entity: EntityId, asset: &[u8]) {
        self.visuals.insert(entity, asset.to_vec());
    }

    fn destroy_visual(&mut self, entity: EntityId) {
        self.visuals.remove(&entity);
        self.destroyed_visuals.push(entity);
    }

    fn destroy_entity(&mut self, entity: EntityId) {
        self.entities.remove(&entity);
        self.destroyed_entities.push(entity);
    }
}

// ============================================================================
// Replication
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryReplication {
    vars: BTreeMap<EntityId, ReplicatedVars>,
    inputs: BTreeMap<EntityId, ControllerInput>,
    presence: BTreeMap<UserId, bool>,
    writes: Vec<(EntityId, MarioVar)>,
}

impl MemoryReplication {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every variable write in order.
    pub fn writes(&self) -> &[(EntityId, MarioVar)] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl Replication for MemoryReplication {
    fn read_vars(&self, entity: EntityId) -> ReplicatedVars {
        self.vars.get(&entity).copied().unwrap_or_default()
    }

    fn write_var(&mut self, entity: EntityId, var: MarioVar) {
        self.vars.entry(entity).or_default().apply(var);
        self.writes.push((entity, var));
    }

    fn read_input(&self, entity: EntityId) -> ControllerInput {
        self.inputs.get(&entity).copied().unwrap_or_default()
    }

    fn write_input(&mut self, entity: EntityId, input: ControllerInput) {
        self.inputs.insert(entity, input);
    }

    fn read_presence(&self, user: UserId) -> Option<bool> {
        self.presence.get(&user).copied()
    }

    fn write_presence(&mut self, user: UserId, near_any_mario: bool) {
        self.presence.insert(user, near_any_mario);
    }

    fn forget(&mut self, entity: EntityId) {
        self.vars.remove(&entity);
        self.inputs.remove(&entity);
    }
}
