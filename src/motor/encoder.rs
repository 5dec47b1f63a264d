// Quadrature encoder decoding
//
// Phase state is the 2-bit code (A << 1) | B.
// Forward sequence:  00 -> 01 -> 11 -> 10 -> 00  (+1 per step)
// Reverse sequence:  00 -> 10 -> 11 -> 01 -> 00  (-1 per step)
// Two-step skips (00 <-> 11, 01 <-> 10) are noise and count as 0.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

/// DECODE_TABLE[prev][curr] = count delta
const DECODE_TABLE: [[i8; 4]; 4] = [
    //  curr: 00  01  10  11
    [0, 1, -1, 0],  // prev 00
    [-1, 0, 0, 1],  // prev 01
    [1, 0, 0, -1],  // prev 10
    [0, -1, 1, 0],  // prev 11
];

/// Build a phase state from the two channel levels
pub fn phase_state(a: bool, b: bool) -> u8 {
    ((a as u8) << 1) | (b as u8)
}

/// Count delta for a transition between two phase states (only the low 2 bits are used)
pub fn decode_transition(prev_state: u8, curr_state: u8) -> i8 {
    DECODE_TABLE[(prev_state & 0x03) as usize][(curr_state & 0x03) as usize]
}

/// RPM from a count delta over `dt` seconds; 0.0 when `dt <= 0` or `ppr == 0`
pub fn compute_rpm(count_delta: i32, pulses_per_revolution: u16, dt: f32) -> f32 {
    if dt <= 0.0 || pulses_per_revolution == 0 {
        return 0.0;
    }
    count_delta as f32 * 60.0 / (pulses_per_revolution as f32 * dt)
}

/// Feedback source consumed by the control loop
pub trait Encoder {
    /// RPM since the previous sample; `dt` is the time since that sample in seconds
    fn sample_rpm(&mut self, dt: f32) -> f32;

    /// Cumulative signed count since the last reset
    fn cumulative_count(&self) -> i32;

    fn set_pulses_per_revolution(&mut self, ppr: u16);
}

/// Edge counter shared with the asynchronous edge source (interrupt, PIO, simulator)
///
/// [`EdgeCounter::on_edge`] is the only writer of the phase and the only incremental
/// writer of the count. The one other store is [`QuadratureEncoder::reset`], which
/// zeroes the count from the control context: an edge landing concurrently is either
/// erased by the reset or counted after it, never half-applied. Share it with `Arc`
/// between the edge source and the [`QuadratureEncoder`] that samples it.
#[derive(Debug, Default)]
pub struct EdgeCounter {
    count: AtomicI32,
    phase: AtomicU8,
}

impl EdgeCounter {
    /// Start from a known phase state (the channel levels read at startup)
    pub fn with_phase(phase: u8) -> Self {
        Self {
            count: AtomicI32::new(0),
            phase: AtomicU8::new(phase & 0x03),
        }
    }

    /// Feed a new phase state; returns the applied delta
    pub fn on_edge(&self, phase: u8) -> i8 {
        let curr = phase & 0x03;
        let prev = self.phase.swap(curr, Ordering::AcqRel);
        let delta = decode_transition(prev, curr);
        if delta != 0 {
            self.count.fetch_add(delta as i32, Ordering::AcqRel);
        }
        delta
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> u8 {
        self.phase.load(Ordering::Acquire)
    }

    // reset only; see the type docs
    fn clear(&self) {
        self.count.store(0, Ordering::Release);
    }
}

/// Quadrature encoder on top of a shared [`EdgeCounter`]
///
/// The sample snapshot lives here and is touched only by the control context.
#[derive(Debug)]
pub struct QuadratureEncoder {
    counter: Arc<EdgeCounter>,
    previous_count: i32,
    pulses_per_revolution: u16,
}

impl QuadratureEncoder {
    pub fn new(counter: Arc<EdgeCounter>, pulses_per_revolution: u16) -> Self {
        let previous_count = counter.count();
        Self {
            counter,
            previous_count,
            pulses_per_revolution,
        }
    }

    pub fn pulses_per_revolution(&self) -> u16 {
        self.pulses_per_revolution
    }

    pub fn counter(&self) -> &Arc<EdgeCounter> {
        &self.counter
    }

    /// Zero the cumulative count and the sample snapshot
    pub fn reset(&mut self) {
        self.counter.clear();
        self.previous_count = 0;
    }
}

impl Encoder for QuadratureEncoder {
    fn sample_rpm(&mut self, dt: f32) -> f32 {
        let current = self.counter.count();
        let delta = current.wrapping_sub(self.previous_count);
        self.previous_count = current;
        compute_rpm(delta, self.pulses_per_revolution, dt)
    }

    fn cumulative_count(&self) -> i32 {
        self.counter.count()
    }

    fn set_pulses_per_revolution(&mut self, ppr: u16) {
        self.pulses_per_revolution = ppr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORWARD: [u8; 5] = [0b00, 0b01, 0b11, 0b10, 0b00];
    const REVERSE: [u8; 5] = [0b00, 0b10, 0b11, 0b01, 0b00];

    fn cycle_sum(sequence: &[u8]) -> i32 {
        sequence
            .windows(2)
            .map(|w| decode_transition(w[0], w[1]) as i32)
            .sum()
    }

    #[test]
    fn test_forward_cycle() {
        for w in FORWARD.windows(2) {
            assert_eq!(decode_transition(w[0], w[1]), 1, "{:02b} -> {:02b}", w[0], w[1]);
        }
        assert_eq!(cycle_sum(&FORWARD), 4);
    }

    #[test]
    fn test_reverse_cycle() {
        for w in REVERSE.windows(2) {
            assert_eq!(decode_transition(w[0], w[1]), -1, "{:02b} -> {:02b}", w[0], w[1]);
        }
        assert_eq!(cycle_sum(&REVERSE), -4);
    }

    #[test]
    fn test_no_change_and_skips() {
        for s in 0..4 {
            assert_eq!(decode_transition(s, s), 0);
        }
        assert_eq!(decode_transition(0b00, 0b11), 0);
        assert_eq!(decode_transition(0b11, 0b00), 0);
        assert_eq!(decode_transition(0b01, 0b10), 0);
        assert_eq!(decode_transition(0b10, 0b01), 0);
    }

    #[test]
    fn test_high_bits_ignored() {
        assert_eq!(decode_transition(0b1100, 0b0101), 1);
    }

    #[test]
    fn test_phase_state() {
        assert_eq!(phase_state(false, false), 0b00);
        assert_eq!(phase_state(false, true), 0b01);
        assert_eq!(phase_state(true, false), 0b10);
        assert_eq!(phase_state(true, true), 0b11);
    }

    #[test]
    fn test_compute_rpm() {
        // one revolution in one second
        assert!((compute_rpm(1024, 1024, 1.0) - 60.0).abs() < 1e-4);
        // half a revolution backwards in 10 ms
        assert!((compute_rpm(-512, 1024, 0.01) + 3000.0).abs() < 1e-2);
        assert_eq!(compute_rpm(0, 1024, 0.01), 0.0);
    }

    #[test]
    fn test_compute_rpm_guards() {
        assert_eq!(compute_rpm(100, 1024, 0.0), 0.0);
        assert_eq!(compute_rpm(100, 1024, -0.01), 0.0);
        assert_eq!(compute_rpm(100, 0, 0.01), 0.0);
    }

    #[test]
    fn test_edge_counter_accumulates() {
        let counter = EdgeCounter::default();
        for _ in 0..3 {
            for &phase in &FORWARD[1..] {
                counter.on_edge(phase);
            }
        }
        assert_eq!(counter.count(), 12);

        for &phase in &REVERSE[1..] {
            counter.on_edge(phase);
        }
        assert_eq!(counter.count(), 8);

        // skip is dropped but the phase still advances
        assert_eq!(counter.on_edge(0b11), 0);
        assert_eq!(counter.phase(), 0b11);
        assert_eq!(counter.on_edge(0b10), 1);
        assert_eq!(counter.count(), 9);
    }

    #[test]
    fn test_sample_rpm_uses_delta() {
        let counter = Arc::new(EdgeCounter::default());
        let mut encoder = QuadratureEncoder::new(counter.clone(), 4);

        // one full forward cycle = one revolution at ppr 4
        for &phase in &FORWARD[1..] {
            counter.on_edge(phase);
        }
        assert!((encoder.sample_rpm(0.5) - 120.0).abs() < 1e-4);
        // nothing moved since the previous sample
        assert_eq!(encoder.sample_rpm(0.5), 0.0);
        assert_eq!(encoder.cumulative_count(), 4);
    }

    #[test]
    fn test_sample_rpm_irregular_intervals() {
        let counter = Arc::new(EdgeCounter::default());
        let mut encoder = QuadratureEncoder::new(counter.clone(), 4);

        for &phase in &FORWARD[1..3] {
            counter.on_edge(phase);
        }
        assert!((encoder.sample_rpm(0.25) - 120.0).abs() < 1e-4);

        for &phase in &FORWARD[3..] {
            counter.on_edge(phase);
        }
        assert!((encoder.sample_rpm(1.0) - 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_sample_rpm_invalid_dt_still_consumes_delta() {
        let counter = Arc::new(EdgeCounter::default());
        let mut encoder = QuadratureEncoder::new(counter.clone(), 4);
        counter.on_edge(0b01);
        assert_eq!(encoder.sample_rpm(0.0), 0.0);
        assert_eq!(encoder.sample_rpm(0.1), 0.0);
    }

    #[test]
    fn test_reset() {
        let counter = Arc::new(EdgeCounter::default());
        let mut encoder = QuadratureEncoder::new(counter.clone(), 1024);
        for &phase in &REVERSE[1..] {
            counter.on_edge(phase);
        }
        assert_eq!(encoder.cumulative_count(), -4);

        encoder.reset();
        assert_eq!(encoder.cumulative_count(), 0);
        assert_eq!(encoder.sample_rpm(0.01), 0.0);

        // phase survives the reset, so the next edge still decodes against it
        assert_eq!(counter.on_edge(0b01), 1);
        assert_eq!(encoder.cumulative_count(), 1);
    }

    #[test]
    fn test_set_ppr() {
        let counter = Arc::new(EdgeCounter::default());
        let mut encoder = QuadratureEncoder::new(counter.clone(), 1024);
        encoder.set_pulses_per_revolution(4);
        assert_eq!(encoder.pulses_per_revolution(), 4);
        for &phase in &FORWARD[1..] {
            counter.on_edge(phase);
        }
        assert!((encoder.sample_rpm(1.0) - 60.0).abs() < 1e-4);
    }
}
