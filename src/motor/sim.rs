// Simulated wheel for running the control loop without hardware
//
// First-order motor model: at full duty the shaft settles at `free_rpm` with time constant `tau`.
// As the shaft turns, quadrature phase states are fed into an EdgeCounter exactly like the
// edge interrupt would on the real board.

use std::sync::{Arc, Mutex, PoisonError};

use super::controller::WheelIo;
use super::driver::{PwmMotorDriver, PwmOutput, PWM_MAX};
use super::encoder::{EdgeCounter, QuadratureEncoder};

/// Gray-code order of the forward phase sequence
const PHASE_SEQUENCE: [u8; 4] = [0b00, 0b01, 0b11, 0b10];

#[derive(Debug, Default)]
struct PlantState {
    duty: f32,     // signed, -1.0..=1.0
    rpm: f32,
    position: f64, // counts, fractional
    step: i64,     // counts already emitted
}

/// Simulated motor + encoder for one wheel
#[derive(Debug)]
pub struct SimulatedWheel {
    free_rpm: f32,
    time_constant: f32,
    pulses_per_revolution: u16,
    counter: Arc<EdgeCounter>,
    state: Mutex<PlantState>,
}

impl SimulatedWheel {
    pub fn new(free_rpm: f32, time_constant: f32, pulses_per_revolution: u16) -> Arc<Self> {
        Arc::new(Self {
            free_rpm,
            time_constant,
            pulses_per_revolution,
            counter: Arc::new(EdgeCounter::with_phase(PHASE_SEQUENCE[0])),
            state: Mutex::new(PlantState::default()),
        })
    }

    /// Encoder and PWM driver wired to this wheel
    pub fn wheel_io(self: &Arc<Self>) -> WheelIo {
        WheelIo::new(
            QuadratureEncoder::new(self.counter.clone(), self.pulses_per_revolution),
            PwmMotorDriver::new(SimOutput(self.clone())),
        )
    }

    pub fn counter(&self) -> &Arc<EdgeCounter> {
        &self.counter
    }

    pub fn rpm(&self) -> f32 {
        self.lock().rpm
    }

    /// Integrate the plant over `dt` seconds, emitting one edge per whole count travelled
    pub fn advance(&self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let mut state = self.lock();

        let alpha = if self.time_constant > 0.0 {
            (dt / self.time_constant).min(1.0)
        } else {
            1.0
        };
        state.rpm += (state.duty * self.free_rpm - state.rpm) * alpha;
        state.position += state.rpm as f64 / 60.0 * self.pulses_per_revolution as f64 * dt as f64;

        let goal = state.position.floor() as i64;
        while state.step != goal {
            state.step += if goal > state.step { 1 } else { -1 };
            self.counter
                .on_edge(PHASE_SEQUENCE[state.step.rem_euclid(4) as usize]);
        }
    }

    fn set_duty(&self, duty: f32) {
        self.lock().duty = duty;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// PWM sink that feeds the simulated plant
#[derive(Debug, Clone)]
pub struct SimOutput(Arc<SimulatedWheel>);

impl PwmOutput for SimOutput {
    fn write(&mut self, reverse: bool, duty: u8) {
        let magnitude = duty as f32 / PWM_MAX as f32;
        self.0.set_duty(if reverse { -magnitude } else { magnitude });
    }
}
