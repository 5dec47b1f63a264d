// Per-wheel PID regulator with conditional-integration anti-windup

/// PID controller with optional output clamping
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,

    integral: f32,
    previous_error: f32,
    is_first_sample: bool,

    output_min: f32,
    output_max: f32,
    has_limits: bool,
}

impl PidController {
    /// Create an unclamped controller
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            previous_error: 0.0,
            is_first_sample: true,
            output_min: 0.0,
            output_max: 0.0,
            has_limits: false,
        }
    }

    /// Builder-style variant of [`PidController::set_output_limits`]
    pub fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.set_output_limits(min, max);
        self
    }

    /// Run one control step
    ///
    /// `dt` is the step in seconds. A non-positive `dt` returns 0.0 and leaves the state untouched.
    /// The derivative term is suppressed on the first sample after construction or [`reset`](Self::reset).
    /// While the output is saturated in the direction the error pushes, integration is skipped.
    pub fn compute(&mut self, setpoint: f32, measured: f32, dt: f32) -> f32 {
        if dt <= 0.0 {
            return 0.0;
        }

        let error = setpoint - measured;
        let p_term = self.kp * error;

        let d_term = if self.is_first_sample {
            self.is_first_sample = false;
            0.0
        } else {
            self.kd * (error - self.previous_error) / dt
        };
        self.previous_error = error;

        // Trial output with the integral from before this step
        let pre_output = p_term + self.ki * self.integral + d_term;
        let saturated = self.has_limits
            && ((pre_output > self.output_max && error > 0.0)
                || (pre_output < self.output_min && error < 0.0));
        if !saturated {
            self.integral += error * dt;
        }

        let raw_output = p_term + self.ki * self.integral + d_term;
        if !self.has_limits {
            return raw_output;
        }
        if raw_output > self.output_max {
            self.output_max
        } else if raw_output < self.output_min {
            self.output_min
        } else {
            raw_output
        }
    }

    /// Replace the gains; accumulated state is kept
    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Enable output clamping to `[min, max]`; accumulated state is kept
    pub fn set_output_limits(&mut self, min: f32, max: f32) {
        self.output_min = min;
        self.output_max = max;
        self.has_limits = true;
    }

    /// Clear integral and derivative history
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.is_first_sample = true;
    }

    pub fn gains(&self) -> (f32, f32, f32) {
        (self.kp, self.ki, self.kd)
    }

    pub fn output_limits(&self) -> Option<(f32, f32)> {
        self.has_limits.then_some((self.output_min, self.output_max))
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }
}
