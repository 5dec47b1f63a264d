// Host link: whole packets over a byte stream
//
// Each packet is COBS-encoded and terminated with a 0x00 byte, so a frame
// boundary can be found again after line noise or a dropped byte.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, warn};

use crate::protocol::MAX_PACKET_SIZE;

const DELIMITER: u8 = 0x00;

// COBS adds one byte per 254 plus the leading code byte
const MAX_FRAME_SIZE: usize = MAX_PACKET_SIZE + MAX_PACKET_SIZE / 254 + 1;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid frame: {0}")]
    Framing(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Delivers de-framed request packets and sends response packets
pub trait PacketLink: Send {
    /// Next complete packet, or `None` if nothing arrived before the read timeout
    fn recv_packet(&mut self) -> Result<Option<Vec<u8>>>;

    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;
}

/// COBS framing over any byte stream
pub struct FramedLink<S> {
    stream: S,
    rx: Vec<u8>,
    resync: bool,
    dropped_frames: u32,
}

/// Framed link over a serial port
pub type SerialLink = FramedLink<Box<dyn SerialPort>>;

impl SerialLink {
    /// Open the host serial port
    pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;
        debug!("Opened {} at {} baud", port_name, baudrate);
        Ok(Self::new(port))
    }
}

impl<S: Read + Write> FramedLink<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            rx: Vec::with_capacity(MAX_FRAME_SIZE),
            resync: false,
            dropped_frames: 0,
        }
    }

    /// Frames discarded for bad encoding or overflow
    pub fn dropped_frames(&self) -> u32 {
        self.dropped_frames
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Pull the next decodable frame already sitting in the buffer
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        // after an overflow everything up to the next delimiter is a fragment
        if self.resync {
            match self.rx.iter().position(|&b| b == DELIMITER) {
                Some(end) => {
                    self.rx.drain(..=end);
                    self.resync = false;
                }
                None => {
                    self.rx.clear();
                    return None;
                }
            }
        }

        while let Some(end) = self.rx.iter().position(|&b| b == DELIMITER) {
            let frame: Vec<u8> = self.rx.drain(..=end).collect();
            let encoded = &frame[..end];
            if encoded.is_empty() {
                continue; // back-to-back delimiters
            }
            match decode_frame(encoded) {
                Ok(packet) => return Some(packet),
                Err(e) => {
                    self.dropped_frames += 1;
                    warn!("Dropping frame: {}", e);
                }
            }
        }
        None
    }
}

impl<S: Read + Write + Send> PacketLink for FramedLink<S> {
    fn recv_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; 64];
        loop {
            if let Some(packet) = self.take_frame() {
                return Ok(Some(packet));
            }

            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.rx.extend_from_slice(&chunk[..n]);

            // no delimiter within a maximal frame means we lost sync
            if self.rx.len() > MAX_FRAME_SIZE && !self.rx.contains(&DELIMITER) {
                self.dropped_frames += 1;
                warn!("Receive buffer overflow, discarding {} bytes", self.rx.len());
                self.rx.clear();
                self.resync = true;
            }
        }
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        let mut frame = cobs::encode_vec(packet);
        frame.push(DELIMITER);
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }
}

fn decode_frame(encoded: &[u8]) -> Result<Vec<u8>> {
    cobs::decode_vec(encoded)
        .map_err(|_| TransportError::Framing(format!("bad COBS encoding ({} bytes)", encoded.len())))
}
