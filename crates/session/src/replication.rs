//! In-process replication transport.
//!
//! [`LoopbackReplication`] keeps every replicated value as the encoded
//! protobuf bytes that would cross the network. Handles made with
//! [`LoopbackReplication::connect`] share one store, so several participants
//! in one process see exactly what a remote peer would decode.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use prost::Message;
use sm64sync_sim::{ControllerInput, EntityId, MarioVar, ReplicatedVars, Replication, UserId};
use sm64sync_wire::{MarioInputProto, MarioVarsProto, PresenceProto};
use tracing::warn;

use crate::validation::validate_input_proto;

#[derive(Debug, Default)]
struct Store {
    vars: BTreeMap<EntityId, Vec<u8>>,
    inputs: BTreeMap<EntityId, Vec<u8>>,
    presence: BTreeMap<UserId, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackReplication {
    store: Rc<RefCell<Store>>,
}

impl LoopbackReplication {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another participant's handle on the same variable space.
    pub fn connect(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }

    /// Bytes currently published for an actor's variables.
    pub fn encoded_vars(&self, entity: EntityId) -> Option<Vec<u8>> {
        self.store.borrow().vars.get(&entity).cloned()
    }

    /// Bytes currently published for an actor's input.
    pub fn encoded_input(&self, entity: EntityId) -> Option<Vec<u8>> {
        self.store.borrow().inputs.get(&entity).cloned()
    }

    /// Overwrite an actor's input channel with raw bytes, as a peer would.
    pub fn inject_input(&self, entity: EntityId, bytes: Vec<u8>) {
        self.store.borrow_mut().inputs.insert(entity, bytes);
    }
}

fn decode_vars(entity: EntityId, bytes: &[u8]) -> ReplicatedVars {
    let decoded = MarioVarsProto::decode(bytes)
        .map_err(|_| "undecodable vars message")
        .and_then(ReplicatedVars::try_from);
    decoded.unwrap_or_else(|reason| {
        warn!(entity, reason, "ignoring replicated vars");
        ReplicatedVars::default()
    })
}

fn decode_input(entity: EntityId, bytes: &[u8]) -> ControllerInput {
    let Ok(proto) = MarioInputProto::decode(bytes) else {
        warn!(entity, "ignoring undecodable controller input");
        return ControllerInput::default();
    };
    validate_input_proto(&proto).input().unwrap_or_default()
}

impl Replication for LoopbackReplication {
    fn read_vars(&self, entity: EntityId) -> ReplicatedVars {
        match self.store.borrow().vars.get(&entity) {
            Some(bytes) => decode_vars(entity, bytes),
            None => ReplicatedVars::default(),
        }
    }

    fn write_var(&mut self, entity: EntityId, var: MarioVar) {
        let mut vars = self.read_vars(entity);
        vars.apply(var);
        let bytes = MarioVarsProto::from(vars).encode_to_vec();
        self.store.borrow_mut().vars.insert(entity, bytes);
    }

    fn read_input(&self, entity: EntityId) -> ControllerInput {
        match self.store.borrow().inputs.get(&entity) {
            Some(bytes) => decode_input(entity, bytes),
            None => ControllerInput::default(),
        }
    }

    fn write_input(&mut self, entity: EntityId, input: ControllerInput) {
        let bytes = MarioInputProto::from(input).encode_to_vec();
        self.store.borrow_mut().inputs.insert(entity, bytes);
    }

    fn read_presence(&self, user: UserId) -> Option<bool> {
        let store = self.store.borrow();
        let bytes = store.presence.get(&user)?;
        match PresenceProto::decode(bytes.as_slice()) {
            Ok(presence) => Some(presence.near_any_mario),
            Err(_) => {
                warn!(user, "ignoring undecodable presence");
                None
            }
        }
    }

    fn write_presence(&mut self, user: UserId, near_any_mario: bool) {
        let bytes = PresenceProto::new(user, near_any_mario).encode_to_vec();
        self.store.borrow_mut().presence.insert(user, bytes);
    }

    fn forget(&mut self, entity: EntityId) {
        let mut store = self.store.borrow_mut();
        store.vars.remove(&entity);
        store.inputs.remove(&entity);
    }
}
