//! Tagged effect volumes and their resolution against an actor.

use std::collections::BTreeMap;

use glam::Vec3;
use sm64sync_bridge::{CapKind, HEALTH_POINTS_PER_WEDGE, MAX_HEALTH_POINTS, SoundId};

use crate::VolumeId;
use crate::tag::{InteractableType, VolumeTag};

/// A registered interactable volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interactable {
    pub volume: VolumeId,
    pub kind: InteractableType,
    /// Red-coin index or damage amount; `-1` when absent.
    pub sub_id: i32,
}

impl Interactable {
    pub fn from_tag(volume: VolumeId, tag: &VolumeTag) -> Self {
        Self {
            volume,
            kind: tag.interactable_type(),
            sub_id: tag.sub_id,
        }
    }
}

/// Session-owned map from volume to interactable. Actors only read it.
#[derive(Debug, Clone, Default)]
pub struct InteractableRegistry {
    interactables: BTreeMap<VolumeId, Interactable>,
}

impl InteractableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `raw_tag` and register the volume, overwriting any previous
    /// entry. Tags of other roles register as an inert interactable.
    pub fn register(&mut self, volume: VolumeId, raw_tag: &str) -> &Interactable {
        self.insert(Interactable::from_tag(volume, &VolumeTag::parse(raw_tag)))
    }

    pub fn insert(&mut self, interactable: Interactable) -> &Interactable {
        let volume = interactable.volume;
        self.interactables.insert(volume, interactable);
        &self.interactables[&volume]
    }

    pub fn unregister(&mut self, volume: VolumeId) -> Option<Interactable> {
        self.interactables.remove(&volume)
    }

    pub fn get(&self, volume: VolumeId) -> Option<&Interactable> {
        self.interactables.get(&volume)
    }

    pub fn contains(&self, volume: VolumeId) -> bool {
        self.interactables.contains_key(&volume)
    }

    pub fn len(&self) -> usize {
        self.interactables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactables.is_empty()
    }

    /// Interactables in ascending volume order.
    pub fn iter(&self) -> impl Iterator<Item = &Interactable> {
        self.interactables.values()
    }

    pub fn clear(&mut self) {
        self.interactables.clear();
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// The parts of an actor's state that resolution depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorStatus {
    pub health_points: f32,
    pub is_dead: bool,
    pub is_authority: bool,
}

/// Where the overlap happened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// World position of the interactable volume.
    pub source: Vec3,
    /// The volume belongs to the actor's own entity hierarchy.
    pub owned_by_actor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Damage {
    pub amount: u32,
    pub source: Vec3,
}

/// Side effects of one actor touching one interactable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InteractionEffect {
    pub sound: Option<SoundId>,
    /// Wedges to heal; already zero when the actor may not heal.
    pub heal_wedges: u8,
    pub cap: Option<CapKind>,
    pub damage: Option<Damage>,
    /// Zero forward velocity and enter freefall.
    pub stop_and_fall: bool,
    /// Deactivate the volume after applying the effect.
    pub deactivate: bool,
}

impl InteractionEffect {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Health after the heal is applied, clamped to full.
    pub fn resulting_health(&self, current: f32) -> f32 {
        (current + f32::from(self.heal_wedges) * HEALTH_POINTS_PER_WEDGE).min(MAX_HEALTH_POINTS)
    }
}

pub fn red_coin_sound(sub_id: i32) -> SoundId {
    match u8::try_from(sub_id) {
        Ok(index) if index <= 7 => SoundId::CollectRedCoin(index),
        _ => SoundId::GeneralRedCoin,
    }
}

/// Damage dealt by a damage volume with the given sub-id.
pub fn damage_amount(sub_id: i32) -> u32 {
    match sub_id {
        -1 => 1,
        id if id >= 10 => 1,
        id => u32::try_from(id).unwrap_or(1),
    }
}

/// Decide what `interactable` does to an actor in `status`.
pub fn resolve(status: &ActorStatus, interactable: &Interactable, contact: &Contact) -> InteractionEffect {
    let heal = |wedges: u8| {
        if status.is_dead || !status.is_authority {
            0
        } else {
            wedges
        }
    };

    let mut effect = InteractionEffect {
        deactivate: true,
        ..InteractionEffect::default()
    };

    match interactable.kind {
        InteractableType::GoldCoin => {
            effect.sound = Some(SoundId::GeneralCoin);
            effect.heal_wedges = heal(1);
        }
        InteractableType::BlueCoin => {
            effect.sound = Some(SoundId::GeneralCoin);
            effect.heal_wedges = heal(5);
        }
        InteractableType::RedCoin => {
            effect.sound = Some(red_coin_sound(interactable.sub_id));
            effect.heal_wedges = heal(2);
        }
        InteractableType::VanishCap => effect.cap = Some(CapKind::Vanish),
        InteractableType::MetalCap => effect.cap = Some(CapKind::Metal),
        InteractableType::WingCap => effect.cap = Some(CapKind::Wing),
        InteractableType::NormalCap => effect.cap = Some(CapKind::Normal),
        InteractableType::Star => {
            effect.sound = Some(SoundId::StarSound);
            effect.heal_wedges = heal(8);
            effect.stop_and_fall = true;
        }
        InteractableType::Damage => {
            if !contact.owned_by_actor {
                effect.damage = Some(Damage {
                    amount: damage_amount(interactable.sub_id),
                    source: contact.source,
                });
            }
            effect.deactivate = false;
        }
        InteractableType::None => effect.deactivate = false,
    }

    effect
}

// ============================================================================
// Tests
// ============================================================================
