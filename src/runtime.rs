// Two independent loops sharing whole-record snapshots:
// - protocol context (blocking thread): reads host packets, answers them, runs the failsafe check
// - control context (100 Hz task): applies the latest command and ticks the motor controller
//
// Failsafe: if no valid motor command arrives within the timeout the protocol context
// latches `failsafe_active` and zeroes the command; the control loop then calls stop().

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{
    LoopTiming, RobotConfig, SERIAL_TIMEOUT, SIM_PERIOD, VERSION_MAJOR, VERSION_MINOR,
    VERSION_PATCH,
};
use crate::messages::{CommandRecord, SharedState, StateRecord, SystemStatus, VelocityCommand};
use crate::motor::{MotorController, SimulatedWheel};
use crate::protocol::{
    self, ConfigData, ConfigResult, DebugOutputResponse, ErrorCode, MotorCommandResponse,
    Payload, Request, StatusFlags, StatusResponse, VersionResponse, MAX_PACKET_SIZE,
};
use crate::transport::{self, PacketLink, SerialLink};

// Simulated plant: headroom above max_rpm so the PID can reach full speed
const SIM_FREE_RPM_RATIO: f32 = 1.25;
const SIM_TIME_CONSTANT: f32 = 0.05; // seconds

/// Protocol-side coordinator: sole writer of the command record and the system status
pub struct Coordinator {
    shared: Arc<SharedState>,
    status: SystemStatus,
    config: RobotConfig,
    config_path: Option<PathBuf>,
    failsafe_timeout: Duration,
    started_at: Instant,
    last_command_at: Option<Instant>,
}

impl Coordinator {
    /// Starts with the failsafe latched and no configuration file
    pub fn new(
        shared: Arc<SharedState>,
        config: RobotConfig,
        failsafe_timeout: Duration,
        now: Instant,
    ) -> Self {
        let mut status = SystemStatus::default();
        status.flags.insert(StatusFlags::FAILSAFE);
        status.flags.insert(StatusFlags::CONFIG_EMPTY);

        // the shared command starts latched; keep them in agreement
        shared.command.write_whole(CommandRecord::failsafe());

        Self {
            shared,
            status,
            config,
            config_path: None,
            failsafe_timeout,
            started_at: now,
            last_command_at: None,
        }
    }

    /// Persist accepted SetConfig requests to `path`; `loaded` tells whether
    /// the running configuration came from that file
    pub fn with_config_file(mut self, path: PathBuf, loaded: bool) -> Self {
        self.config_path = Some(path);
        self.status.flags.set(StatusFlags::CONFIG_EMPTY, !loaded);
        self
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn failsafe_active(&self) -> bool {
        self.status.flags.contains(StatusFlags::FAILSAFE)
    }

    /// Handle one de-framed packet; returns the response to send, if any
    pub fn handle_packet(&mut self, packet: &[u8], now: Instant) -> Option<Vec<u8>> {
        let parsed = match protocol::parse_request(packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.status.record_error(e.error_code());
                warn!(
                    "Dropping request: {} ({} errors)",
                    e, self.status.comm_error_count
                );
                return None;
            }
        };

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = match parsed.request {
            Request::MotorCommand(Payload::Complete(cmd)) => {
                self.on_motor_command(cmd, now);
                let state = self.shared.state.read_snapshot();
                let response = MotorCommandResponse {
                    encoder_count_left: state.encoder_count_left,
                    encoder_count_right: state.encoder_count_right,
                    status: self.status.flags,
                };
                protocol::create_motor_command_response(&response, &mut buf)
            }
            Request::MotorCommand(Payload::Insufficient) => {
                self.status.record_error(ErrorCode::Payload);
                warn!(
                    "Motor command with {} byte payload ({} errors)",
                    parsed.payload_length, self.status.comm_error_count
                );
                return None;
            }
            Request::GetVersion => {
                let version = VersionResponse {
                    major: VERSION_MAJOR,
                    minor: VERSION_MINOR,
                    patch: VERSION_PATCH,
                };
                protocol::create_version_response(&version, &mut buf)
            }
            Request::GetStatus => {
                let response = StatusResponse {
                    status: self.status.flags,
                    error_code: self.status.last_error_code,
                    comm_error_count: self.status.comm_error_count,
                    // wraps after ~49 days like any u32 millisecond counter
                    uptime_ms: now.saturating_duration_since(self.started_at).as_millis() as u32,
                };
                protocol::create_status_response(&response, &mut buf)
            }
            Request::GetConfig => protocol::create_config_response(&self.config, &mut buf),
            Request::SetConfig(payload) => {
                let result = self.apply_config(payload);
                protocol::create_set_config_response(result, &mut buf)
            }
            Request::GetDebugOutput => {
                let state = self.shared.state.read_snapshot();
                protocol::create_debug_output_response(&debug_output(&state), &mut buf)
            }
        };

        (len > 0).then(|| buf[..len].to_vec())
    }

    /// Latch the failsafe once the last command is older than the timeout
    pub fn check_failsafe(&mut self, now: Instant) {
        if self.failsafe_active() {
            return;
        }
        let Some(last) = self.last_command_at else {
            return;
        };
        let age = now.saturating_duration_since(last);
        if age > self.failsafe_timeout {
            self.shared.command.write_whole(CommandRecord::failsafe());
            self.status.flags.insert(StatusFlags::FAILSAFE);
            warn!("No motor command for {:?}, failsafe active", age);
        }
    }

    fn on_motor_command(&mut self, cmd: VelocityCommand, now: Instant) {
        self.shared.command.write_whole(CommandRecord::from_command(cmd));
        self.last_command_at = Some(now);
        if self.failsafe_active() {
            self.status.flags.remove(StatusFlags::FAILSAFE);
            info!("Motor command received, failsafe cleared");
        }
    }

    fn apply_config(&mut self, payload: Payload<ConfigData>) -> ConfigResult {
        let Some(config) = payload.complete() else {
            warn!("SetConfig rejected: payload too short");
            return ConfigResult::InvalidValue;
        };
        if let Err(e) = config.validate() {
            warn!("SetConfig rejected: {}", e);
            return ConfigResult::InvalidValue;
        }

        self.config = config;
        self.shared.pending_config.write_whole(Some(config));
        info!("SetConfig accepted: {:?}", config);

        let Some(path) = &self.config_path else {
            debug!("No configuration file, new configuration is not persisted");
            return ConfigResult::Success;
        };
        match config.save(path) {
            Ok(()) => {
                self.status.flags.remove(StatusFlags::FLASH_ERROR);
                self.status.flags.remove(StatusFlags::CONFIG_EMPTY);
                ConfigResult::Success
            }
            Err(e) => {
                warn!("Failed to save configuration to {}: {}", path.display(), e);
                self.status.flags.insert(StatusFlags::FLASH_ERROR);
                self.status.last_error_code = ErrorCode::Flash;
                ConfigResult::FlashError
            }
        }
    }
}

fn debug_output(state: &StateRecord) -> DebugOutputResponse {
    DebugOutputResponse {
        encoder_count_left: state.encoder_count_left,
        encoder_count_right: state.encoder_count_right,
        target_rpm_left: state.target_rpm_left,
        target_rpm_right: state.target_rpm_right,
        current_rpm_left: state.current_rpm_left,
        current_rpm_right: state.current_rpm_right,
        pwm_duty_left: state.duty_left,
        pwm_duty_right: state.duty_right,
    }
}

/// Control-side loop body: sole owner of the motor controller, sole writer of the state record
pub struct ControlLoop {
    controller: MotorController,
    shared: Arc<SharedState>,
}

impl ControlLoop {
    pub fn new(controller: MotorController, shared: Arc<SharedState>) -> Self {
        Self { controller, shared }
    }

    pub fn controller(&self) -> &MotorController {
        &self.controller
    }

    /// One control period of `dt` seconds
    pub fn step(&mut self, dt: f32) {
        // configuration changes land between ticks, never inside one
        if let Some(config) = self.shared.pending_config.replace(None) {
            self.controller.reconfigure(&config);
            info!("Applied new configuration");
        }

        let cmd = self.shared.command.read_snapshot();
        if cmd.failsafe_active {
            self.controller.stop();
            self.controller.sample_feedback(dt);
        } else {
            self.controller
                .set_command(cmd.linear_velocity, cmd.angular_velocity);
            self.controller.tick(dt);
        }

        self.publish_state();
    }

    fn publish_state(&self) {
        let (count_left, count_right) = self.controller.encoder_counts();
        let (duty_left, duty_right) = self.controller.outputs();
        let target = self.controller.target_rpm();
        let current = self.controller.current_rpm();
        self.shared.state.write_whole(StateRecord {
            encoder_count_left: count_left,
            encoder_count_right: count_right,
            target_rpm_left: target.left,
            target_rpm_right: target.right,
            current_rpm_left: current.left,
            current_rpm_right: current.right,
            duty_left,
            duty_right,
        });
    }
}

/// Serve the host link until `shutdown` is set or the link fails
pub fn serve_link(
    mut coordinator: Coordinator,
    link: &mut dyn PacketLink,
    check_period: Duration,
    shutdown: &AtomicBool,
) -> transport::Result<()> {
    let mut last_check = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        if let Some(packet) = link.recv_packet()? {
            if let Some(response) = coordinator.handle_packet(&packet, Instant::now()) {
                link.send_packet(&response)?;
            }
        }

        let now = Instant::now();
        if now.duration_since(last_check) >= check_period {
            coordinator.check_failsafe(now);
            last_check = now;
        }
    }
    debug!("Protocol loop stopped");
    Ok(())
}

/// Runtime options, usually from the command line
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub baudrate: u32,
    pub config_path: Option<PathBuf>,
    pub timing: LoopTiming,
    pub simulate: bool,
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (config, loaded) = match &options.config_path {
        Some(path) if path.exists() => (RobotConfig::load(path)?, true),
        Some(path) => {
            info!("{} does not exist yet, using defaults", path.display());
            (RobotConfig::default(), false)
        }
        None => {
            info!("No configuration file, using defaults");
            (RobotConfig::default(), false)
        }
    };
    let timing = options.timing;
    let mut link = SerialLink::open(&options.port, options.baudrate, SERIAL_TIMEOUT)?;

    let shared = Arc::new(SharedState::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    // Control context
    let mut controller = MotorController::new(&config);
    let mut sim_wheels = None;
    if options.simulate {
        let free_rpm = config.max_rpm * SIM_FREE_RPM_RATIO;
        let left = SimulatedWheel::new(free_rpm, SIM_TIME_CONSTANT, config.encoder_ppr);
        let right = SimulatedWheel::new(free_rpm, SIM_TIME_CONSTANT, config.encoder_ppr);
        controller = controller.with_hardware(left.wheel_io(), right.wheel_io());
        sim_wheels = Some((left, right));
        info!("Simulated wheels attached ({} rpm free-running)", free_rpm);
    } else {
        warn!("No motor hardware attached, control loop runs logic-only");
    }
    let mut control = ControlLoop::new(controller, shared.clone());

    let sim_task = sim_wheels.map(|(left, right)| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = interval(SIM_PERIOD);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            while !shutdown.load(Ordering::Relaxed) {
                tick.tick().await;
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;
                left.advance(dt);
                right.advance(dt);
            }
        })
    });

    let control_shutdown = shutdown.clone();
    let control_period = timing.control_period;
    let control_task = tokio::spawn(async move {
        let mut tick = interval(control_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        while !control_shutdown.load(Ordering::Relaxed) {
            tick.tick().await;
            let now = Instant::now();
            control.step(now.duration_since(last).as_secs_f32());
            last = now;
        }
        // dropping the loop drops the controller, which stops the motors
        drop(control);
    });

    // Protocol context
    let mut coordinator =
        Coordinator::new(shared.clone(), config, timing.failsafe_timeout, Instant::now());
    if let Some(path) = options.config_path.clone() {
        coordinator = coordinator.with_config_file(path, loaded);
    }
    let protocol_shutdown = shutdown.clone();
    let check_period = timing.failsafe_check_period;
    let mut protocol_task = tokio::task::spawn_blocking(move || {
        serve_link(coordinator, &mut link, check_period, &protocol_shutdown)
    });

    info!(
        "Runtime started on {} @ {} baud: control every {:?}, failsafe {:?} (checked every {:?})",
        options.port,
        options.baudrate,
        timing.control_period,
        timing.failsafe_timeout,
        timing.failsafe_check_period
    );

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            None
        }
        joined = &mut protocol_task => Some(joined),
    };

    shutdown.store(true, Ordering::Relaxed);
    control_task.await?;
    if let Some(task) = sim_task {
        task.await?;
    }

    let served = match outcome {
        Some(joined) => joined?,
        None => protocol_task.await?,
    };
    served?;
    info!("Runtime stopped");
    Ok(())
}
