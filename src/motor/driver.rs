// Motor driver for a direction + PWM H-bridge
//
// The control loop hands over a normalized speed in [-1.0, 1.0]; this layer turns it into
// a direction level and an 8-bit duty cycle and writes both to a PwmOutput.

use tracing::{debug, trace};

/// Full-scale PWM duty
pub const PWM_MAX: u8 = 255;

/// Actuation side of one wheel, as seen by the control loop
pub trait MotorDriver {
    /// Drive at a normalized speed; values outside [-1.0, 1.0] are clamped
    fn set_normalized_speed(&mut self, speed: f32);

    /// Cut the output
    fn stop(&mut self);

    /// Last normalized speed actually applied
    fn current_speed(&self) -> f32;
}

/// Pin-level sink for a direction + duty pair (GPIO/PWM peripheral or a simulated plant)
pub trait PwmOutput {
    /// `reverse` selects the DIR level (true = HIGH = reverse), `duty` is 0..=255
    fn write(&mut self, reverse: bool, duty: u8);
}

/// Clamp a speed command to [-1.0, 1.0]
pub fn clamp_speed(speed: f32) -> f32 {
    if speed > 1.0 {
        1.0
    } else if speed < -1.0 {
        -1.0
    } else {
        speed
    }
}

/// DIR level for a speed: reverse (true) only for negative speeds
pub fn direction(speed: f32) -> bool {
    speed < 0.0
}

/// 8-bit duty for a speed in [-1.0, 1.0], rounded to nearest
pub fn pwm_duty(speed: f32) -> u8 {
    (speed.abs() * PWM_MAX as f32 + 0.5) as u8
}

/// [`MotorDriver`] on top of a [`PwmOutput`]
pub struct PwmMotorDriver<O: PwmOutput> {
    output: O,
    current_speed: f32,
    reverse: bool,
}

impl<O: PwmOutput> PwmMotorDriver<O> {
    /// Wrap an output and make sure it starts stopped
    pub fn new(output: O) -> Self {
        let mut driver = Self {
            output,
            current_speed: 0.0,
            reverse: false,
        };
        driver.stop();
        driver
    }

    /// Equivalent to [`MotorDriver::stop`] until a driver with active braking is fitted
    pub fn brake(&mut self) {
        self.stop();
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

impl<O: PwmOutput> MotorDriver for PwmMotorDriver<O> {
    fn set_normalized_speed(&mut self, speed: f32) {
        let speed = clamp_speed(speed);
        self.current_speed = speed;
        self.reverse = direction(speed);
        let duty = pwm_duty(speed);
        trace!("PWM out: reverse={}, duty={}", self.reverse, duty);
        self.output.write(self.reverse, duty);
    }

    fn stop(&mut self) {
        self.current_speed = 0.0;
        self.output.write(self.reverse, 0);
    }

    fn current_speed(&self) -> f32 {
        self.current_speed
    }
}

impl<O: PwmOutput> Drop for PwmMotorDriver<O> {
    fn drop(&mut self) {
        // Never leave a bridge energized behind a dropped driver
        debug!("Motor driver dropped, cutting PWM");
        self.stop();
    }
}
