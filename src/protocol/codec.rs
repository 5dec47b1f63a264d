// Packet parsing and building
//
// Builders write the payload first, checksum it, then fill in the header.
// They return the packet length, or 0 without touching the buffer when it is too small.

use super::{
    payload_len, ConfigData, ConfigResult, DebugOutputResponse, MotorCommandResponse,
    ParseError, ParsedRequest, Payload, Request, RequestType, StatusResponse, VersionResponse,
    HEADER_SIZE,
};
use crate::messages::VelocityCommand;

// Header byte offsets
const HEADER_REQUEST_TYPE: usize = 0;
const HEADER_PAYLOAD_LENGTH: usize = 1;
const HEADER_CHECKSUM: usize = 2;

/// 16-bit additive checksum (no carry folding, no complement)
pub fn calculate_checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}

/// Validate a de-framed packet and decode its payload
pub fn parse_request(packet: &[u8]) -> Result<ParsedRequest, ParseError> {
    if packet.len() < HEADER_SIZE {
        return Err(ParseError::TooSmall { len: packet.len() });
    }

    let request_type = RequestType::try_from(packet[HEADER_REQUEST_TYPE])?;
    let payload_length = packet[HEADER_PAYLOAD_LENGTH];
    let declared = u16::from_le_bytes([packet[HEADER_CHECKSUM], packet[HEADER_CHECKSUM + 1]]);

    let end = HEADER_SIZE + payload_length as usize;
    if packet.len() < end {
        return Err(ParseError::SizeMismatch {
            declared: payload_length as usize,
            available: packet.len() - HEADER_SIZE,
        });
    }

    let payload = &packet[HEADER_SIZE..end];
    let computed = calculate_checksum(payload);
    if declared != computed {
        return Err(ParseError::ChecksumMismatch { declared, computed });
    }

    let request = match request_type {
        RequestType::MotorCommand => Request::MotorCommand(decode_motor_command(payload)),
        RequestType::GetVersion => Request::GetVersion,
        RequestType::GetStatus => Request::GetStatus,
        RequestType::GetConfig => Request::GetConfig,
        RequestType::SetConfig => Request::SetConfig(decode_config(payload)),
        RequestType::GetDebugOutput => Request::GetDebugOutput,
    };

    Ok(ParsedRequest {
        payload_length,
        request,
    })
}

fn decode_motor_command(payload: &[u8]) -> Payload<VelocityCommand> {
    if payload.len() < payload_len::MOTOR_COMMAND_REQUEST {
        return Payload::Insufficient;
    }
    let mut r = Reader::new(payload);
    Payload::Complete(VelocityCommand {
        linear_velocity: r.f32(),
        angular_velocity: r.f32(),
    })
}

fn decode_config(payload: &[u8]) -> Payload<ConfigData> {
    if payload.len() < payload_len::CONFIG {
        return Payload::Insufficient;
    }
    let mut r = Reader::new(payload);
    Payload::Complete(ConfigData {
        pid_kp: r.f32(),
        pid_ki: r.f32(),
        pid_kd: r.f32(),
        max_rpm: r.f32(),
        encoder_ppr: r.u16(),
        gear_ratio: r.f32(),
        wheel_diameter: r.f32(),
        track_width: r.f32(),
    })
}

fn write_config(w: &mut Writer, data: &ConfigData) {
    w.f32(data.pid_kp);
    w.f32(data.pid_ki);
    w.f32(data.pid_kd);
    w.f32(data.max_rpm);
    w.u16(data.encoder_ppr);
    w.f32(data.gear_ratio);
    w.f32(data.wheel_diameter);
    w.f32(data.track_width);
}

pub fn create_motor_command_response(data: &MotorCommandResponse, buffer: &mut [u8]) -> usize {
    write_packet(
        RequestType::MotorCommand,
        payload_len::MOTOR_COMMAND_RESPONSE,
        buffer,
        |w| {
            w.i32(data.encoder_count_left);
            w.i32(data.encoder_count_right);
            w.u16(data.status.bits());
        },
    )
}

pub fn create_version_response(data: &VersionResponse, buffer: &mut [u8]) -> usize {
    write_packet(RequestType::GetVersion, payload_len::VERSION, buffer, |w| {
        w.u8(data.major);
        w.u8(data.minor);
        w.u8(data.patch);
        w.skip(1);
    })
}

pub fn create_status_response(data: &StatusResponse, buffer: &mut [u8]) -> usize {
    write_packet(RequestType::GetStatus, payload_len::STATUS, buffer, |w| {
        w.u16(data.status.bits());
        w.u8(data.error_code as u8);
        w.skip(1);
        w.u16(data.comm_error_count);
        w.skip(2);
        w.u32(data.uptime_ms);
    })
}

pub fn create_config_response(data: &ConfigData, buffer: &mut [u8]) -> usize {
    write_packet(RequestType::GetConfig, payload_len::CONFIG, buffer, |w| {
        write_config(w, data)
    })
}

pub fn create_debug_output_response(data: &DebugOutputResponse, buffer: &mut [u8]) -> usize {
    write_packet(RequestType::GetDebugOutput, payload_len::DEBUG_OUTPUT, buffer, |w| {
        w.i32(data.encoder_count_left);
        w.i32(data.encoder_count_right);
        w.f32(data.target_rpm_left);
        w.f32(data.target_rpm_right);
        w.f32(data.current_rpm_left);
        w.f32(data.current_rpm_right);
        w.f32(data.pwm_duty_left);
        w.f32(data.pwm_duty_right);
    })
}

pub fn create_set_config_response(result: ConfigResult, buffer: &mut [u8]) -> usize {
    write_packet(RequestType::SetConfig, payload_len::SET_CONFIG_RESULT, buffer, |w| {
        w.u8(result as u8)
    })
}

/// Build a request packet (host side of the link)
///
/// Payload-less requests, and typed requests marked `Insufficient`, get an empty payload.
pub fn create_request(request: &Request, buffer: &mut [u8]) -> usize {
    let kind = request.request_type();
    match request {
        Request::MotorCommand(Payload::Complete(cmd)) => {
            write_packet(kind, payload_len::MOTOR_COMMAND_REQUEST, buffer, |w| {
                w.f32(cmd.linear_velocity);
                w.f32(cmd.angular_velocity);
            })
        }
        Request::SetConfig(Payload::Complete(config)) => {
            write_packet(kind, payload_len::CONFIG, buffer, |w| write_config(w, config))
        }
        _ => write_packet(kind, 0, buffer, |_| {}),
    }
}

fn write_packet(
    kind: RequestType,
    payload_length: usize,
    buffer: &mut [u8],
    fill: impl FnOnce(&mut Writer),
) -> usize {
    let packet_length = HEADER_SIZE + payload_length;
    if buffer.len() < packet_length || payload_length > u8::MAX as usize {
        return 0;
    }

    let payload = &mut buffer[HEADER_SIZE..packet_length];
    payload.fill(0); // reserved bytes go out as zero
    fill(&mut Writer::new(payload));
    let checksum = calculate_checksum(payload);

    buffer[HEADER_REQUEST_TYPE] = kind as u8;
    buffer[HEADER_PAYLOAD_LENGTH] = payload_length as u8;
    buffer[HEADER_CHECKSUM..HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());
    packet_length
}

/// Little-endian cursor over a payload already checked to be long enough
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

/// Little-endian cursor over a payload slice of exactly the right size
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    fn u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.put(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.put(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCode, StatusFlags, MAX_PACKET_SIZE};

    fn packet(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![kind, payload.len() as u8];
        p.extend_from_slice(&calculate_checksum(payload).to_le_bytes());
        p.extend_from_slice(payload);
        p
    }

    fn sample_config() -> ConfigData {
        ConfigData {
            pid_kp: 1.5,
            pid_ki: 0.25,
            pid_kd: 0.02,
            max_rpm: 130.0,
            encoder_ppr: 2048,
            gear_ratio: 30.0,
            wheel_diameter: 0.12,
            track_width: 0.38,
        }
    }

    #[test]
    fn test_checksum() {
        assert_eq!(calculate_checksum(&[0x01, 0x02, 0x03, 0x04]), 0x0A);
        assert_eq!(calculate_checksum(&[]), 0);
        assert_eq!(calculate_checksum(&[0xFF, 0xFF]), 0x01FE);
        // 258 * 255 = 65790 -> truncated to 16 bits, no folding
        assert_eq!(calculate_checksum(&[0xFF; 258]), (65790u32 & 0xFFFF) as u16);
    }

    #[test]
    fn test_parse_get_version() {
        let parsed = parse_request(&[0x01, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(parsed.request_type(), RequestType::GetVersion);
        assert_eq!(parsed.payload_length, 0);
        assert_eq!(parsed.request, Request::GetVersion);
    }

    #[test]
    fn test_parse_too_small() {
        assert_eq!(parse_request(&[]), Err(ParseError::TooSmall { len: 0 }));
        assert_eq!(parse_request(&[0x01, 0x00, 0x00]), Err(ParseError::TooSmall { len: 3 }));
    }

    #[test]
    fn test_parse_invalid_type() {
        assert_eq!(parse_request(&[0x06, 0, 0, 0]), Err(ParseError::InvalidType(0x06)));
        // type is checked before the length
        assert_eq!(parse_request(&[0x42, 200, 0, 0]), Err(ParseError::InvalidType(0x42)));
    }

    #[test]
    fn test_parse_size_mismatch() {
        let mut p = packet(0x00, &[0u8; 8]);
        p.truncate(10);
        assert_eq!(
            parse_request(&p),
            Err(ParseError::SizeMismatch { declared: 8, available: 6 })
        );
    }

    #[test]
    fn test_parse_checksum_mismatch() {
        let mut p = packet(0x00, &[1, 2, 3, 4, 5, 6, 7, 8]);
        p[2] ^= 0x01;
        assert_eq!(
            parse_request(&p),
            Err(ParseError::ChecksumMismatch { declared: 0x25, computed: 0x24 })
        );
    }

    #[test]
    fn test_parse_ignores_trailing_bytes() {
        let mut p = packet(0x02, &[]);
        p.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(parse_request(&p).unwrap().request, Request::GetStatus);
    }

    #[test]
    fn test_parse_motor_command() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0.25f32.to_le_bytes());
        payload.extend_from_slice(&(-1.5f32).to_le_bytes());
        let parsed = parse_request(&packet(0x00, &payload)).unwrap();
        assert_eq!(parsed.payload_length, 8);
        assert_eq!(
            parsed.request,
            Request::MotorCommand(Payload::Complete(VelocityCommand {
                linear_velocity: 0.25,
                angular_velocity: -1.5,
            }))
        );
    }

    #[test]
    fn test_parse_insufficient_payload() {
        let parsed = parse_request(&packet(0x00, &[0u8; 7])).unwrap();
        assert_eq!(parsed.request, Request::MotorCommand(Payload::Insufficient));

        let parsed = parse_request(&packet(0x04, &[0u8; 29])).unwrap();
        assert_eq!(parsed.request, Request::SetConfig(Payload::Insufficient));
    }

    #[test]
    fn test_set_config_round_trip() {
        let config = sample_config();

        let mut response = [0u8; 64];
        let n = create_config_response(&config, &mut response);
        assert_eq!(n, HEADER_SIZE + 30);

        // same payload bytes under the SET_CONFIG type decode to the same record
        let mut request = response[..n].to_vec();
        request[0] = RequestType::SetConfig as u8;
        let parsed = parse_request(&request).unwrap();
        assert_eq!(parsed.request, Request::SetConfig(Payload::Complete(config)));

        let mut built = [0u8; 64];
        let m = create_request(&Request::SetConfig(Payload::Complete(config)), &mut built);
        assert_eq!(&built[..m], &request[..]);
    }

    #[test]
    fn test_config_byte_layout() {
        let config = sample_config();
        let mut buf = [0u8; 34];
        assert_eq!(create_config_response(&config, &mut buf), 34);
        let payload = &buf[HEADER_SIZE..];
        assert_eq!(&payload[12..16], &130.0f32.to_le_bytes());
        assert_eq!(&payload[16..18], &2048u16.to_le_bytes());
        assert_eq!(&payload[26..30], &0.38f32.to_le_bytes());
    }

    #[test]
    fn test_motor_command_response() {
        let data = MotorCommandResponse {
            encoder_count_left: 1000,
            encoder_count_right: -2000,
            status: StatusFlags::FAILSAFE,
        };
        let mut buf = [0u8; 32];
        let n = create_motor_command_response(&data, &mut buf);
        assert_eq!(n, 14);
        assert_eq!(buf[0], 0x00);
        assert_eq!(buf[1], 10);
        let payload = &buf[4..14];
        assert_eq!(&payload[0..4], &1000i32.to_le_bytes());
        assert_eq!(&payload[4..8], &(-2000i32).to_le_bytes());
        assert_eq!(&payload[8..10], &[0x01, 0x00]);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), calculate_checksum(payload));
    }

    #[test]
    fn test_version_response() {
        let mut buf = [0xEEu8; 8];
        let data = VersionResponse { major: 0, minor: 1, patch: 0 };
        assert_eq!(create_version_response(&data, &mut buf), 8);
        assert_eq!(buf, [0x01, 4, 0x01, 0x00, 0, 1, 0, 0]);
    }

    #[test]
    fn test_status_response() {
        let data = StatusResponse {
            status: StatusFlags::FAILSAFE | StatusFlags::CONFIG_EMPTY | StatusFlags::CONFIG_MODE,
            error_code: ErrorCode::Checksum,
            comm_error_count: 0x0102,
            uptime_ms: 0x0A0B0C0D,
        };
        let mut buf = [0xEEu8; 16];
        assert_eq!(create_status_response(&data, &mut buf), 16);
        assert_eq!(
            &buf[4..],
            &[0x21, 0x80, 0x01, 0x00, 0x02, 0x01, 0x00, 0x00, 0x0D, 0x0C, 0x0B, 0x0A]
        );
    }

    #[test]
    fn test_debug_output_response() {
        let data = DebugOutputResponse {
            encoder_count_left: 5,
            encoder_count_right: -5,
            target_rpm_left: 10.0,
            target_rpm_right: 20.0,
            current_rpm_left: 9.5,
            current_rpm_right: 19.5,
            pwm_duty_left: 0.1,
            pwm_duty_right: -0.2,
        };
        let mut buf = [0u8; 36];
        assert_eq!(create_debug_output_response(&data, &mut buf), 36);
        assert_eq!(buf[0], RequestType::GetDebugOutput as u8);
        assert_eq!(buf[1], 32);
        assert_eq!(&buf[32..36], &(-0.2f32).to_le_bytes());
    }

    #[test]
    fn test_set_config_response() {
        let mut buf = [0u8; 5];
        assert_eq!(create_set_config_response(ConfigResult::FlashError, &mut buf), 5);
        assert_eq!(buf, [0x04, 1, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_builders_refuse_small_buffer() {
        let mut buf = [0xEEu8; 13];
        assert_eq!(create_motor_command_response(&MotorCommandResponse::default(), &mut buf), 0);
        assert_eq!(create_config_response(&sample_config(), &mut buf), 0);
        assert_eq!(create_debug_output_response(&DebugOutputResponse::default(), &mut buf), 0);
        assert_eq!(create_status_response(&StatusResponse::default(), &mut buf), 0);
        assert_eq!(create_set_config_response(ConfigResult::Success, &mut buf[..4]), 0);
        // nothing was written
        assert_eq!(buf, [0xEEu8; 13]);
    }

    #[test]
    fn test_build_then_parse_motor_command() {
        let cmd = VelocityCommand {
            linear_velocity: 0.3,
            angular_velocity: 0.1,
        };
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = create_request(&Request::MotorCommand(Payload::Complete(cmd)), &mut buf);
        assert_eq!(n, 12);
        let parsed = parse_request(&buf[..n]).unwrap();
        assert_eq!(parsed.request, Request::MotorCommand(Payload::Complete(cmd)));

        let n = create_request(&Request::GetDebugOutput, &mut buf);
        assert_eq!(&buf[..n], &[0x05, 0, 0, 0]);
    }
}
