// Host <-> controller request/response protocol
//
// Packet format (little-endian):
// [request_type: u8][payload_length: u8][checksum_lo: u8][checksum_hi: u8][payload...]
// Checksum = 16-bit wrapping sum of the payload bytes only.
// Responses echo the request type in the first header byte.

mod codec;

pub use codec::{
    calculate_checksum, create_config_response, create_debug_output_response,
    create_motor_command_response, create_request, create_set_config_response,
    create_status_response, create_version_response, parse_request,
};

use crate::config::RobotConfig;
use crate::messages::VelocityCommand;

/// Header length in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest packet a one-byte length field allows
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + u8::MAX as usize;

/// Payload sizes fixed by the protocol
pub mod payload_len {
    pub const MOTOR_COMMAND_REQUEST: usize = 8;
    pub const CONFIG: usize = 30;
    pub const MOTOR_COMMAND_RESPONSE: usize = 10;
    pub const VERSION: usize = 4;
    pub const STATUS: usize = 12;
    pub const DEBUG_OUTPUT: usize = 32;
    pub const SET_CONFIG_RESULT: usize = 1;
}

/// Request (and matching response) types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    MotorCommand = 0x00,
    GetVersion = 0x01,
    GetStatus = 0x02,
    GetConfig = 0x03,
    SetConfig = 0x04,
    GetDebugOutput = 0x05,
}

impl TryFrom<u8> for RequestType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => RequestType::MotorCommand,
            0x01 => RequestType::GetVersion,
            0x02 => RequestType::GetStatus,
            0x03 => RequestType::GetConfig,
            0x04 => RequestType::SetConfig,
            0x05 => RequestType::GetDebugOutput,
            other => return Err(ParseError::InvalidType(other)),
        })
    }
}

bitflags::bitflags! {
    /// Status bits reported in MOTOR_COMMAND and GET_STATUS responses
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct StatusFlags: u16 {
        const FAILSAFE = 1 << 0;
        const ENCODER_L_ERROR = 1 << 1;
        const ENCODER_R_ERROR = 1 << 2;
        const MOTOR_L_ERROR = 1 << 3;
        const MOTOR_R_ERROR = 1 << 4;
        const CONFIG_EMPTY = 1 << 5;
        const FLASH_ERROR = 1 << 6;
        const OVERTEMP = 1 << 7;
        const OVERCURRENT = 1 << 8;
        const LOW_VOLTAGE = 1 << 9;
        const CONFIG_MODE = 1 << 15;
    }
}

/// Last error code reported in GET_STATUS
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorCode {
    #[default]
    None = 0x00,
    Checksum = 0x01,
    InvalidCommand = 0x02,
    Payload = 0x03,
    EncoderTimeout = 0x10,
    Flash = 0x20,
}

/// SET_CONFIG outcome
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResult {
    Success = 0x00,
    FlashError = 0x01,
    InvalidValue = 0x02,
}

/// Framing and validation failures; the request is dropped and no response is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Packet too small: {len} bytes, header needs 4")]
    TooSmall { len: usize },

    #[error("Unknown request type 0x{0:02X}")]
    InvalidType(u8),

    #[error("Payload length {declared} exceeds the {available} bytes received")]
    SizeMismatch { declared: usize, available: usize },

    #[error("Checksum mismatch: header 0x{declared:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch { declared: u16, computed: u16 },
}

impl ParseError {
    /// Code stored as the last error in the system status
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ParseError::TooSmall { .. } | ParseError::SizeMismatch { .. } => ErrorCode::Payload,
            ParseError::InvalidType(_) => ErrorCode::InvalidCommand,
            ParseError::ChecksumMismatch { .. } => ErrorCode::Checksum,
        }
    }
}

/// Typed payload of a request, or a marker that too few bytes were sent to decode it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<T> {
    Complete(T),
    Insufficient,
}

impl<T> Payload<T> {
    pub fn complete(self) -> Option<T> {
        match self {
            Payload::Complete(value) => Some(value),
            Payload::Insufficient => None,
        }
    }
}

/// GET_CONFIG / SET_CONFIG payload
pub type ConfigData = RobotConfig;

/// A decoded request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    MotorCommand(Payload<VelocityCommand>),
    GetVersion,
    GetStatus,
    GetConfig,
    SetConfig(Payload<ConfigData>),
    GetDebugOutput,
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::MotorCommand(_) => RequestType::MotorCommand,
            Request::GetVersion => RequestType::GetVersion,
            Request::GetStatus => RequestType::GetStatus,
            Request::GetConfig => RequestType::GetConfig,
            Request::SetConfig(_) => RequestType::SetConfig,
            Request::GetDebugOutput => RequestType::GetDebugOutput,
        }
    }
}

/// Result of [`parse_request`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedRequest {
    pub payload_length: u8,
    pub request: Request,
}

impl ParsedRequest {
    pub fn request_type(&self) -> RequestType {
        self.request.request_type()
    }
}

/// MOTOR_COMMAND response payload (10 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorCommandResponse {
    pub encoder_count_left: i32,
    pub encoder_count_right: i32,
    pub status: StatusFlags,
}

/// GET_VERSION response payload (3 bytes + 1 reserved)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionResponse {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// GET_STATUS response payload (12 bytes including reserved padding)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: StatusFlags,
    pub error_code: ErrorCode,
    pub comm_error_count: u16,
    pub uptime_ms: u32,
}

/// GET_DEBUG_OUTPUT response payload (32 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DebugOutputResponse {
    pub encoder_count_left: i32,
    pub encoder_count_right: i32,
    pub target_rpm_left: f32,
    pub target_rpm_right: f32,
    pub current_rpm_left: f32,
    pub current_rpm_right: f32,
    pub pwm_duty_left: f32,
    pub pwm_duty_right: f32,
}
