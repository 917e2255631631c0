//! Controller input validation.
//!
//! Applied to the local controller before it is published and to every
//! input read back off the wire:
//! - Stick axis count other than two: DROP
//! - NaN/Inf on either stick axis: DROP + LOG
//! - Stick magnitude > 1.0: CLAMP + LOG

use glam::Vec2;
use sm64sync_sim::ControllerInput;
use sm64sync_wire::MarioInputProto;
use tracing::warn;

/// Result of input validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValidation {
    Accepted(ControllerInput),
    /// Accepted with the stick scaled back to unit length.
    AcceptedWithClamp(ControllerInput),
    /// Dropped: NaN or Inf on a stick axis.
    DroppedNanInf,
    /// Dropped: the stick did not carry exactly two axes.
    DroppedMalformed,
}

impl InputValidation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::AcceptedWithClamp(_))
    }

    /// The input to use, if any survived.
    pub fn input(&self) -> Option<ControllerInput> {
        match *self {
            Self::Accepted(input) | Self::AcceptedWithClamp(input) => Some(input),
            Self::DroppedNanInf | Self::DroppedMalformed => None,
        }
    }
}

/// Validate a controller snapshot.
pub fn validate_input(input: ControllerInput) -> InputValidation {
    let stick = input.joystick;
    if !stick.is_finite() {
        warn!(x = stick.x, y = stick.y, "dropping controller input with non-finite stick");
        return InputValidation::DroppedNanInf;
    }

    if needs_magnitude_clamp(stick) {
        warn!(magnitude = stick.length(), "clamping controller stick to unit length");
        return InputValidation::AcceptedWithClamp(ControllerInput {
            joystick: stick.normalize_or_zero(),
            ..input
        });
    }

    InputValidation::Accepted(input)
}

/// Validate an input message received from another participant.
pub fn validate_input_proto(proto: &MarioInputProto) -> InputValidation {
    match ControllerInput::try_from(proto.clone()) {
        Ok(input) => validate_input(input),
        Err(reason) => {
            warn!(reason, "dropping malformed controller input");
            InputValidation::DroppedMalformed
        }
    }
}

fn needs_magnitude_clamp(stick: Vec2) -> bool {
    stick.length_squared() > 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stick(x: f32, y: f32) -> ControllerInput {
        ControllerInput {
            joystick: Vec2::new(x, y),
            jump: true,
            ..ControllerInput::default()
        }
    }

    #[test]
    fn test_nan_rejection() {
        assert_eq!(validate_input(stick(f32::NAN, 0.0)), InputValidation::DroppedNanInf);
    }

    #[test]
    fn test_inf_rejection() {
        assert_eq!(
            validate_input(stick(0.0, f32::NEG_INFINITY)),
            InputValidation::DroppedNanInf
        );
    }

    #[test]
    fn test_valid_input_accepted() {
        let input = stick(0.6, -0.8);
        assert_eq!(validate_input(input), InputValidation::Accepted(input));
    }

    #[test]
    fn test_magnitude_clamping() {
        let result = validate_input(stick(3.0, 4.0));
        assert!(matches!(result, InputValidation::AcceptedWithClamp(_)));

        let input = result.input().unwrap();
        assert!((input.joystick - Vec2::new(0.6, 0.8)).length() < 1e-6);
        assert!(input.jump);
    }

    #[test]
    fn test_proto_with_wrong_axis_count_dropped() {
        let proto = MarioInputProto {
            joystick: vec![1.0],
            ..MarioInputProto::default()
        };
        let result = validate_input_proto(&proto);
        assert_eq!(result, InputValidation::DroppedMalformed);
        assert!(!result.is_accepted());
    }

    #[test]
    fn test_malformed_inputs_no_panic() {
        for joystick in [
            vec![],
            vec![f32::NAN, f32::NAN],
            vec![f32::INFINITY, 0.0],
            vec![1e30, 1e30],
            vec![0.0, 0.0, 0.0],
        ] {
            let proto = MarioInputProto {
                joystick,
                ..MarioInputProto::default()
            };
            let _ = validate_input_proto(&proto);
        }
    }
}
