// Differential-drive inverse kinematics and RPM limiting.
// Converts a body velocity command (linear m/s, angular rad/s) into left/right wheel RPM targets.

use std::f32::consts::PI;

/// Physical description of the drive base
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotGeometry {
    pub wheel_diameter: f32, // meters
    pub track_width: f32,    // meters, wheel-to-wheel
    pub gear_ratio: f32,     // motor revolutions per wheel revolution
    pub max_rpm: f32,        // motor shaft limit
}

/// Signed RPM for both wheels (positive = forward rotation)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelRpmPair {
    pub left: f32,
    pub right: f32,
}

impl WheelRpmPair {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// RPM limiting strategy applied after kinematics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClampPolicy {
    /// Each wheel clamped on its own
    Simple,
    /// Keep the turning component, give up forward speed first
    #[default]
    RotationPriority,
}

impl ClampPolicy {
    pub fn apply(self, rpm: WheelRpmPair, max_rpm: f32) -> WheelRpmPair {
        match self {
            ClampPolicy::Simple => clamp_rpm_simple(rpm, max_rpm),
            ClampPolicy::RotationPriority => clamp_rpm_rotation_priority(rpm, max_rpm),
        }
    }
}

/// Convert a body velocity command into unclamped wheel RPM targets
///
/// # Arguments
/// * `linear_velocity` - Forward velocity in m/s
/// * `angular_velocity` - Yaw rate in rad/s (positive = counter-clockwise)
///
/// A zero wheel diameter yields non-finite RPM; geometry validity is the caller's job.
pub fn compute_wheel_targets(
    linear_velocity: f32,
    angular_velocity: f32,
    geometry: &RobotGeometry,
) -> WheelRpmPair {
    let half_track = geometry.track_width / 2.0;
    let left_velocity = linear_velocity - angular_velocity * half_track;
    let right_velocity = linear_velocity + angular_velocity * half_track;

    // m/s at the tread -> wheel rev/min -> motor rev/min
    let velocity_to_rpm = 60.0 / (PI * geometry.wheel_diameter) * geometry.gear_ratio;

    WheelRpmPair {
        left: left_velocity * velocity_to_rpm,
        right: right_velocity * velocity_to_rpm,
    }
}

/// Clamp each wheel independently to +/- max_rpm, keeping its sign
pub fn clamp_rpm_simple(rpm: WheelRpmPair, max_rpm: f32) -> WheelRpmPair {
    let clamp_one = |value: f32| {
        if value.abs() >= max_rpm {
            value.signum() * max_rpm
        } else {
            value
        }
    };

    WheelRpmPair {
        left: clamp_one(rpm.left),
        right: clamp_one(rpm.right),
    }
}

/// Clamp with the rotational component taking precedence over translation
///
/// The pair is split into translation `(r + l) / 2` and rotation `(r - l) / 2`.
/// Rotation is limited to +/- max_rpm first, and translation only gets the budget that is left.
pub fn clamp_rpm_rotation_priority(rpm: WheelRpmPair, max_rpm: f32) -> WheelRpmPair {
    let v_trans = (rpm.right + rpm.left) / 2.0;
    let v_rot = (rpm.right - rpm.left) / 2.0;

    let clamped_rot = clamp_symmetric(v_rot, max_rpm);
    let trans_limit = max_rpm - clamped_rot.abs();
    let clamped_trans = clamp_symmetric(v_trans, trans_limit);

    WheelRpmPair {
        left: clamped_trans - clamped_rot,
        right: clamped_trans + clamped_rot,
    }
}

// f32::clamp panics on an inverted range; a negative limit must not take the loop down
fn clamp_symmetric(value: f32, limit: f32) -> f32 {
    value.min(limit).max(-limit)
}
