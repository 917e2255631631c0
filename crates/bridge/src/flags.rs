//! Bit-exact action/state flag words, cap kinds, surface classes and sound ids.
//!
//! Action and state words are multi-bit enumerations, not independent booleans:
//! an action such as `QUICKSAND_DEATH` shares bits with unrelated actions, so
//! presence is always tested as an exact subset (`word & mask == mask`).

use std::ops::{BitAnd, BitOr, BitOrAssign};

// ============================================================================
// Action Flags
// ============================================================================

/// Mario action word as reported and accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActionFlags(pub u32);

impl ActionFlags {
    pub const NONE: Self = Self(0);

    // Action group attribute bits.
    pub const FLAG_STATIONARY: Self = Self(0x0000_0200);
    pub const FLAG_MOVING: Self = Self(0x0000_0400);
    pub const FLAG_AIR: Self = Self(0x0000_0800);
    pub const FLAG_INTANGIBLE: Self = Self(0x0000_1000);
    pub const FLAG_INVULNERABLE: Self = Self(0x0002_0000);
    pub const FLAG_ATTACKING: Self = Self(0x0080_0000);

    // Concrete actions.
    pub const IDLE: Self = Self(0x0C40_0201);
    pub const SLEEPING: Self = Self(0x0C00_0203);
    pub const WAKING_UP: Self = Self(0x0C00_0204);
    pub const FREEFALL: Self = Self(0x0100_088C);
    pub const FLYING: Self = Self(0x1088_0899);
    pub const THROWN_FORWARD: Self = Self(0x0102_08BE);
    pub const GRABBED: Self = Self(0x0002_0370);
    pub const QUICKSAND_DEATH: Self = Self(0x0002_1312);
    pub const TELEPORT_FADE_OUT: Self = Self(0x0000_1336);
    pub const TELEPORT_FADE_IN: Self = Self(0x0000_1337);

    /// Raw action word.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `mask` is set in `self`.
    pub const fn contains(self, mask: Self) -> bool {
        self.0 & mask.0 == mask.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// State Flags
// ============================================================================

/// Mario state word (caps, vanish/metal/wing bits, attack bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateFlags(pub u32);

impl StateFlags {
    pub const NONE: Self = Self(0);
    pub const NORMAL_CAP: Self = Self(0x0000_0001);
    pub const VANISH_CAP: Self = Self(0x0000_0002);
    pub const METAL_CAP: Self = Self(0x0000_0004);
    pub const WING_CAP: Self = Self(0x0000_0008);
    pub const CAP_ON_HEAD: Self = Self(0x0000_0010);
    pub const CAP_IN_HAND: Self = Self(0x0000_0020);
    pub const METAL_SHOCK: Self = Self(0x0000_0040);
    pub const TELEPORTING: Self = Self(0x0000_0080);
    pub const PUNCHING: Self = Self(0x0010_0000);
    pub const KICKING: Self = Self(0x0020_0000);
    pub const TRIPPING: Self = Self(0x0040_0000);

    pub const SPECIAL_CAPS: Self = Self(0x0000_000E);
    pub const CAPS: Self = Self(0x0000_000F);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `mask` is set in `self`.
    pub const fn contains(self, mask: Self) -> bool {
        self.0 & mask.0 == mask.0
    }

    /// True when the cap bit for `cap` is set.
    pub const fn has_cap(self, cap: CapKind) -> bool {
        self.contains(cap.state_flag())
    }
}

macro_rules! impl_bit_ops {
    ($ty:ty) => {
        impl BitOr for $ty {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $ty {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $ty {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }
    };
}

impl_bit_ops!(ActionFlags);
impl_bit_ops!(StateFlags);

// ============================================================================
// Caps
// ============================================================================

/// The four wearable caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapKind {
    Normal,
    Vanish,
    Metal,
    Wing,
}

impl CapKind {
    /// Order in which mirrors re-apply replicated caps.
    pub const REPLICATION_ORDER: [CapKind; 4] =
        [CapKind::Vanish, CapKind::Metal, CapKind::Wing, CapKind::Normal];

    pub const fn state_flag(self) -> StateFlags {
        match self {
            CapKind::Normal => StateFlags::NORMAL_CAP,
            CapKind::Vanish => StateFlags::VANISH_CAP,
            CapKind::Metal => StateFlags::METAL_CAP,
            CapKind::Wing => StateFlags::WING_CAP,
        }
    }
}

// ============================================================================
// Surfaces
// ============================================================================

/// Floor/terrain classification understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceType(pub i16);

impl SurfaceType {
    pub const DEFAULT: Self = Self(0x0000);
    pub const BURNING: Self = Self(0x0001);
    pub const DEATH_PLANE: Self = Self(0x000A);
    pub const SHALLOW_QUICKSAND: Self = Self(0x0021);
    pub const DEEP_QUICKSAND: Self = Self(0x0022);
    pub const INSTANT_QUICKSAND: Self = Self(0x0023);
    pub const ICE: Self = Self(0x002E);
    pub const HARD: Self = Self(0x0030);
    pub const NOT_SLIPPERY: Self = Self(0x0015);
    pub const SLIPPERY: Self = Self(0x0014);
    pub const VERY_SLIPPERY: Self = Self(0x0013);

    pub const fn is_death_plane(self) -> bool {
        self.0 == Self::DEATH_PLANE.0
    }
}

// ============================================================================
// Sounds
// ============================================================================

/// Symbolic global sounds played through the engine's sound bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundId {
    GeneralCoin,
    GeneralRedCoin,
    /// Indexed red-coin jingle, 0..=7.
    CollectRedCoin(u8),
    StarSound,
    BowserLaugh,
}

/// Packs a sound descriptor the way the engine's sound bank expects it.
const fn sound_arg_load(bank: u32, play_flags: u32, sound_id: u32, priority: u32, flags2: u32) -> u32 {
    (bank << 28) | (play_flags << 24) | (sound_id << 16) | (priority << 8) | (flags2 << 4) | 1
}

impl SoundId {
    /// Raw sound bits passed to the engine.
    pub const fn bits(self) -> u32 {
        match self {
            SoundId::GeneralCoin => sound_arg_load(3, 8, 0x11, 0x80, 8),
            SoundId::GeneralRedCoin => sound_arg_load(3, 8, 0x68, 0x90, 8),
            SoundId::CollectRedCoin(index) => sound_arg_load(7, 8, 0x28 + index as u32, 0x90, 8),
            SoundId::StarSound => sound_arg_load(7, 0, 0x1E, 0xFF, 8),
            SoundId::BowserLaugh => sound_arg_load(5, 0, 0x38, 0x80, 8),
        }
    }
}
