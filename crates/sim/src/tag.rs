//! Volume tag grammar.
//!
//! A tag is `category,subcategory,type,subId`, e.g. `coin,0,GoldCoin,-1`.
//! Parsing never fails: a missing or malformed segment falls back to its
//! default and an unrecognized type name becomes [`VolumeKind::None`].

use sm64sync_bridge::SurfaceType;
use tracing::debug;

/// Effect-bearing interactable types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractableType {
    None,
    GoldCoin,
    BlueCoin,
    RedCoin,
    VanishCap,
    MetalCap,
    WingCap,
    NormalCap,
    Star,
    Damage,
}

/// Semantic role of a tagged volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Untagged, unknown or malformed.
    None,
    Interactable(InteractableType),
    Water,
    Gas,
    Terrain { dynamic: bool, surface: SurfaceType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTag {
    pub category: String,
    pub subcategory: i32,
    pub kind: VolumeKind,
    /// `-1` when absent.
    pub sub_id: i32,
}

impl VolumeTag {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(',').map(str::trim);
        let category = parts.next().unwrap_or_default().to_owned();
        let subcategory = parse_int(parts.next(), 0, raw);
        let type_name = parts.next().unwrap_or_default();
        let sub_id = parse_int(parts.next(), -1, raw);

        let kind = kind_from_name(type_name, sub_id);
        if kind == VolumeKind::None && !type_name.is_empty() {
            debug!(tag = raw, type_name, "unrecognized volume type, treating as untyped");
        }

        Self {
            category,
            subcategory,
            kind,
            sub_id,
        }
    }

    pub fn has_sub_id(&self) -> bool {
        self.sub_id != -1
    }

    /// Interactable type, `None` for every other role.
    pub fn interactable_type(&self) -> InteractableType {
        match self.kind {
            VolumeKind::Interactable(kind) => kind,
            _ => InteractableType::None,
        }
    }
}

fn parse_int(segment: Option<&str>, default: i32, raw: &str) -> i32 {
    match segment {
        None | Some("") => default,
        Some(text) => text.parse().unwrap_or_else(|_| {
            debug!(tag = raw, segment = text, "malformed numeric tag segment");
            default
        }),
    }
}

fn kind_from_name(name: &str, sub_id: i32) -> VolumeKind {
    let terrain_surface = || {
        i16::try_from(sub_id)
            .ok()
            .filter(|id| *id >= 0)
            .map_or(SurfaceType::DEFAULT, SurfaceType)
    };

    match name.to_ascii_lowercase().as_str() {
        "goldcoin" => VolumeKind::Interactable(InteractableType::GoldCoin),
        "bluecoin" => VolumeKind::Interactable(InteractableType::BlueCoin),
        "redcoin" => VolumeKind::Interactable(InteractableType::RedCoin),
        "vanishcap" => VolumeKind::Interactable(InteractableType::VanishCap),
        "metalcap" => VolumeKind::Interactable(InteractableType::MetalCap),
        "wingcap" => VolumeKind::Interactable(InteractableType::WingCap),
        "normalcap" => VolumeKind::Interactable(InteractableType::NormalCap),
        "star" => VolumeKind::Interactable(InteractableType::Star),
        "damage" => VolumeKind::Interactable(InteractableType::Damage),
        "water" => VolumeKind::Water,
        "gas" => VolumeKind::Gas,
        "staticterrain" | "terrain" => VolumeKind::Terrain {
            dynamic: false,
            surface: terrain_surface(),
        },
        "dynamicterrain" => VolumeKind::Terrain {
            dynamic: true,
            surface: terrain_surface(),
        },
        "deathplane" => VolumeKind::Terrain {
            dynamic: false,
            surface: SurfaceType::DEATH_PLANE,
        },
        _ => VolumeKind::None,
    }
}

// ============================================================================
// Tests
// ============================================================================
