// Records shared between the protocol context and the control context
//
// Each record has exactly one writer. Readers and writers only ever copy whole
// records in or out under the lock; no field-level access crosses a context.

use std::sync::{Mutex, PoisonError};

use crate::config::RobotConfig;
use crate::protocol::{ErrorCode, StatusFlags};

/// Velocity command from the host (m/s, rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityCommand {
    pub linear_velocity: f32,
    pub angular_velocity: f32,
}

// protocol context -> control context
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommandRecord {
    pub linear_velocity: f32,
    pub angular_velocity: f32,
    pub failsafe_active: bool,
}

impl CommandRecord {
    pub fn from_command(cmd: VelocityCommand) -> Self {
        Self {
            linear_velocity: cmd.linear_velocity,
            angular_velocity: cmd.angular_velocity,
            failsafe_active: false,
        }
    }

    /// Zero velocity with the failsafe latched
    pub fn failsafe() -> Self {
        Self {
            failsafe_active: true,
            ..Self::default()
        }
    }
}

// control context -> protocol context
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateRecord {
    pub encoder_count_left: i32,
    pub encoder_count_right: i32,
    pub target_rpm_left: f32,
    pub target_rpm_right: f32,
    pub current_rpm_left: f32,
    pub current_rpm_right: f32,
    pub duty_left: f32,
    pub duty_right: f32,
}

/// Owned by the protocol context, never shared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStatus {
    pub flags: StatusFlags,
    pub last_error_code: ErrorCode,
    pub comm_error_count: u16,
}

impl SystemStatus {
    /// Count a dropped request; the counter saturates instead of wrapping
    pub fn record_error(&mut self, code: ErrorCode) {
        self.last_error_code = code;
        self.comm_error_count = self.comm_error_count.saturating_add(1);
    }
}

/// Whole-record snapshot exchange between two contexts
#[derive(Debug, Default)]
pub struct SharedRecord<T: Copy> {
    inner: Mutex<T>,
}

impl<T: Copy> SharedRecord<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn read_snapshot(&self) -> T {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_whole(&self, value: T) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Swap in a new value and return the previous one
    pub fn replace(&self, value: T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, value)
    }
}

/// Everything the two contexts exchange
#[derive(Debug, Default)]
pub struct SharedState {
    pub command: SharedRecord<CommandRecord>,
    pub state: SharedRecord<StateRecord>,
    // protocol context publishes, control context takes at the start of a tick
    pub pending_config: SharedRecord<Option<RobotConfig>>,
}

impl SharedState {
    /// Start with the failsafe latched so nothing moves before the first command
    pub fn new() -> Self {
        Self {
            command: SharedRecord::new(CommandRecord::failsafe()),
            ..Self::default()
        }
    }
}
