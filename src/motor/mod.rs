// Motor control for the differential-drive base
//
// Provides:
// - Differential kinematics and RPM clamping (velocity command -> wheel RPM)
// - Quadrature decoding and RPM estimation
// - Per-wheel PID regulation
// - Direction + PWM motor driver logic
// - The control loop tying them together, plus a simulated wheel for host runs

pub mod controller;
pub mod driver;
pub mod encoder;
pub mod kinematics;
pub mod pid;
pub mod sim;

pub use controller::{ControllerState, MotorController, WheelIo};
pub use driver::{MotorDriver, PwmMotorDriver, PwmOutput};
pub use encoder::{EdgeCounter, Encoder, QuadratureEncoder};
pub use kinematics::{compute_wheel_targets, ClampPolicy, RobotGeometry, WheelRpmPair};
pub use pid::PidController;
pub use sim::SimulatedWheel;
