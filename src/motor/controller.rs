// Two-wheel motor control loop: kinematics -> clamp -> PID -> driver, with encoder feedback

use tracing::{debug, trace};

use super::driver::MotorDriver;
use super::encoder::Encoder;
use super::kinematics::{compute_wheel_targets, ClampPolicy, RobotGeometry, WheelRpmPair};
use super::pid::PidController;
use crate::config::RobotConfig;

/// Hardware attached to one wheel
pub struct WheelIo {
    pub encoder: Box<dyn Encoder + Send>,
    pub driver: Box<dyn MotorDriver + Send>,
}

impl WheelIo {
    pub fn new(encoder: impl Encoder + Send + 'static, driver: impl MotorDriver + Send + 'static) -> Self {
        Self {
            encoder: Box::new(encoder),
            driver: Box::new(driver),
        }
    }
}

/// Lifecycle of the controller; `Stopped` goes back to `Running` on the next command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stopped,
}

/// Differential-drive motor controller
///
/// Without wheel hardware attached the controller still computes targets,
/// but [`tick`](Self::tick) does nothing (logic-only mode).
pub struct MotorController {
    geometry: RobotGeometry,
    clamp_policy: ClampPolicy,
    target: WheelRpmPair,
    current: WheelRpmPair,
    pid_left: PidController,
    pid_right: PidController,
    left: Option<WheelIo>,
    right: Option<WheelIo>,
    state: ControllerState,
}

impl MotorController {
    /// Logic-only controller built from a configuration
    pub fn new(config: &RobotConfig) -> Self {
        let geometry = config.geometry();
        let pid = PidController::new(config.pid_kp, config.pid_ki, config.pid_kd)
            .with_output_limits(-geometry.max_rpm, geometry.max_rpm);

        Self {
            geometry,
            clamp_policy: ClampPolicy::default(),
            target: WheelRpmPair::zero(),
            current: WheelRpmPair::zero(),
            pid_left: pid.clone(),
            pid_right: pid,
            left: None,
            right: None,
            state: ControllerState::Idle,
        }
    }

    /// Attach encoders and drivers for both wheels
    pub fn with_hardware(mut self, left: WheelIo, right: WheelIo) -> Self {
        self.left = Some(left);
        self.right = Some(right);
        self
    }

    pub fn with_clamp_policy(mut self, policy: ClampPolicy) -> Self {
        self.clamp_policy = policy;
        self
    }

    /// Set a new velocity command (m/s, rad/s); only the RPM targets change
    pub fn set_command(&mut self, linear_velocity: f32, angular_velocity: f32) {
        let raw = compute_wheel_targets(linear_velocity, angular_velocity, &self.geometry);
        self.target = self.clamp_policy.apply(raw, self.geometry.max_rpm);
        self.state = ControllerState::Running;
        trace!(
            "Command v={} w={} -> target L={} R={}",
            linear_velocity, angular_velocity, self.target.left, self.target.right
        );
    }

    /// Run one control step of `dt` seconds
    pub fn tick(&mut self, dt: f32) {
        let (Some(left), Some(right)) = (self.left.as_mut(), self.right.as_mut()) else {
            return;
        };

        self.current.left = left.encoder.sample_rpm(dt);
        self.current.right = right.encoder.sample_rpm(dt);

        let output_left = self.pid_left.compute(self.target.left, self.current.left, dt);
        let output_right = self.pid_right.compute(self.target.right, self.current.right, dt);

        // PID works in RPM; the driver wants [-1, 1]
        let scale = if self.geometry.max_rpm > 0.0 {
            1.0 / self.geometry.max_rpm
        } else {
            0.0
        };
        left.driver.set_normalized_speed(output_left * scale);
        right.driver.set_normalized_speed(output_right * scale);

        trace!(
            "Tick dt={}: target=({}, {}) measured=({}, {}) out=({}, {})",
            dt,
            self.target.left,
            self.target.right,
            self.current.left,
            self.current.right,
            output_left,
            output_right
        );
    }

    /// Zero the targets, cut both drivers and clear PID history
    pub fn stop(&mut self) {
        if self.state != ControllerState::Stopped {
            debug!("Stopping motors");
        }
        self.target = WheelRpmPair::zero();
        for io in [self.left.as_mut(), self.right.as_mut()].into_iter().flatten() {
            io.driver.stop();
        }
        self.pid_left.reset();
        self.pid_right.reset();
        self.state = ControllerState::Stopped;
    }

    /// Read both encoders without driving; keeps the sample snapshot and
    /// `current_rpm` fresh while stopped, so the next tick measures only its own period
    pub fn sample_feedback(&mut self, dt: f32) {
        let (Some(left), Some(right)) = (self.left.as_mut(), self.right.as_mut()) else {
            return;
        };
        self.current.left = left.encoder.sample_rpm(dt);
        self.current.right = right.encoder.sample_rpm(dt);
    }

    /// Apply a new configuration; PID history and current targets are kept
    pub fn reconfigure(&mut self, config: &RobotConfig) {
        self.geometry = config.geometry();
        let max_rpm = self.geometry.max_rpm;
        for pid in [&mut self.pid_left, &mut self.pid_right] {
            pid.set_gains(config.pid_kp, config.pid_ki, config.pid_kd);
            pid.set_output_limits(-max_rpm, max_rpm);
        }
        for io in [self.left.as_mut(), self.right.as_mut()].into_iter().flatten() {
            io.encoder.set_pulses_per_revolution(config.encoder_ppr);
        }
        debug!("Controller reconfigured: {:?}", self.geometry);
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn geometry(&self) -> &RobotGeometry {
        &self.geometry
    }

    pub fn target_rpm(&self) -> WheelRpmPair {
        self.target
    }

    pub fn current_rpm(&self) -> WheelRpmPair {
        self.current
    }

    /// Cumulative encoder counts (left, right); 0 without hardware
    pub fn encoder_counts(&self) -> (i32, i32) {
        let count = |io: &Option<WheelIo>| io.as_ref().map_or(0, |io| io.encoder.cumulative_count());
        (count(&self.left), count(&self.right))
    }

    /// Last normalized driver outputs (left, right); 0.0 without hardware
    pub fn outputs(&self) -> (f32, f32) {
        let output = |io: &Option<WheelIo>| io.as_ref().map_or(0.0, |io| io.driver.current_speed());
        (output(&self.left), output(&self.right))
    }

    pub fn has_hardware(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

impl Drop for MotorController {
    fn drop(&mut self) {
        self.stop();
    }
}
