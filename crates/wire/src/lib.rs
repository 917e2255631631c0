//! sm64sync Wire Types
//!
//! Protobuf messages for every value that crosses between participants. Each
//! replicated channel of an actor is one message:
//!
//! - [`MarioVarsProto`]: authority-published health, flags and visibility
//! - [`MarioInputProto`]: the authority's controller snapshot
//! - [`PresenceProto`]: whether a participant is near any actor
//!
//! Domain types convert with `From` on the way out and `TryFrom` on the way in.

#![deny(unsafe_code)]

use glam::Vec2;
use prost::Message;
use sm64sync_bridge::{ActionFlags, StateFlags};
use sm64sync_sim::{ControllerInput, ReplicatedVars, UserId};

// ============================================================================
// Messages
// ============================================================================

/// Values the authority publishes for one actor.
#[derive(Clone, PartialEq, Message)]
pub struct MarioVarsProto {
    /// Health on the 0..=255 scale.
    #[prost(float, tag = "1")]
    pub health_points: f32,

    /// Raw engine action word.
    #[prost(uint32, tag = "2")]
    pub action_flags: u32,

    /// Raw engine state word (cap bits).
    #[prost(uint32, tag = "3")]
    pub state_flags: u32,

    #[prost(bool, tag = "4")]
    pub is_shown: bool,
}

/// Controller snapshot driving an actor.
#[derive(Clone, PartialEq, Message)]
pub struct MarioInputProto {
    /// Stick [x, y].
    #[prost(float, repeated, tag = "1")]
    pub joystick: Vec<f32>,

    #[prost(bool, tag = "2")]
    pub jump: bool,

    #[prost(bool, tag = "3")]
    pub punch: bool,

    #[prost(bool, tag = "4")]
    pub crouch: bool,
}

/// "Am I near any actor", broadcast per participant.
#[derive(Clone, PartialEq, Message)]
pub struct PresenceProto {
    #[prost(uint32, tag = "1")]
    pub user_id: UserId,

    #[prost(bool, tag = "2")]
    pub near_any_mario: bool,
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<ReplicatedVars> for MarioVarsProto {
    fn from(v: ReplicatedVars) -> Self {
        Self {
            health_points: v.health_points,
            action_flags: v.action_flags.bits(),
            state_flags: v.state_flags.bits(),
            is_shown: v.is_shown,
        }
    }
}

impl TryFrom<MarioVarsProto> for ReplicatedVars {
    type Error = &'static str;

    fn try_from(v: MarioVarsProto) -> Result<Self, Self::Error> {
        if !v.health_points.is_finite() {
            return Err("health_points must be finite");
        }
        Ok(Self {
            health_points: v.health_points,
            action_flags: ActionFlags(v.action_flags),
            state_flags: StateFlags(v.state_flags),
            is_shown: v.is_shown,
        })
    }
}

impl From<ControllerInput> for MarioInputProto {
    fn from(i: ControllerInput) -> Self {
        Self {
            joystick: i.joystick.to_array().to_vec(),
            jump: i.jump,
            punch: i.punch,
            crouch: i.crouch,
        }
    }
}

impl TryFrom<MarioInputProto> for ControllerInput {
    type Error = &'static str;

    fn try_from(i: MarioInputProto) -> Result<Self, Self::Error> {
        if i.joystick.len() != 2 {
            return Err("joystick must have exactly 2 elements");
        }
        Ok(Self {
            joystick: Vec2::new(i.joystick[0], i.joystick[1]),
            jump: i.jump,
            punch: i.punch,
            crouch: i.crouch,
        })
    }
}

impl PresenceProto {
    pub fn new(user_id: UserId, near_any_mario: bool) -> Self {
        Self {
            user_id,
            near_any_mario,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vars_survive_encoding() {
        let vars = ReplicatedVars {
            health_points: 127.5,
            action_flags: ActionFlags::QUICKSAND_DEATH,
            state_flags: StateFlags::WING_CAP | StateFlags::CAP_ON_HEAD,
            is_shown: false,
        };
        let encoded = MarioVarsProto::from(vars).encode_to_vec();
        let decoded = MarioVarsProto::decode(encoded.as_slice()).unwrap();
        assert_eq!(ReplicatedVars::try_from(decoded), Ok(vars));
    }

    #[test]
    fn test_vars_reject_non_finite_health() {
        let proto = MarioVarsProto {
            health_points: f32::NAN,
            ..MarioVarsProto::default()
        };
        assert!(ReplicatedVars::try_from(proto).is_err());
    }

    #[test]
    fn test_flag_words_keep_every_bit() {
        let proto = MarioVarsProto::from(ReplicatedVars {
            action_flags: ActionFlags(0xFFFF_FFFF),
            ..ReplicatedVars::default()
        });
        assert_eq!(proto.action_flags, u32::MAX);
    }

    #[test]
    fn test_input_requires_two_axes() {
        let short = MarioInputProto {
            joystick: vec![0.5],
            jump: true,
            punch: false,
            crouch: false,
        };
        assert_eq!(
            ControllerInput::try_from(short),
            Err("joystick must have exactly 2 elements")
        );

        let input = ControllerInput {
            joystick: Vec2::new(-0.25, 1.0),
            jump: false,
            punch: true,
            crouch: false,
        };
        let encoded = MarioInputProto::from(input).encode_to_vec();
        let decoded = MarioInputProto::decode(encoded.as_slice()).unwrap();
        assert_eq!(ControllerInput::try_from(decoded), Ok(input));
    }

    #[test]
    fn test_presence_roundtrip() {
        let msg = PresenceProto::new(7, true);
        let decoded = PresenceProto::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }
}
