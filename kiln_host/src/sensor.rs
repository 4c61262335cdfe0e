//! Thermocouple sampling: frame decoding and the 250 ms sampler.

use kiln_shared::{Clock, ProbeError, TcFault, ThermocoupleProbe, ThermocoupleReading};
use std::sync::{Arc, Mutex};

/// Decode a raw MAX31855 frame.
///
/// Thermocouple value: sign-extended 14-bit two's complement from bits
/// 31..18, 0.25 °C per LSB. Cold junction: sign-extended 12-bit from
/// bits 15..4, 0.0625 °C per LSB. Bit 16 flags a fault, detailed in the
/// three LSBs; a faulted frame reports 0 °C on both channels.
pub fn decode_frame(raw: u32, timestamp_us: i64) -> ThermocoupleReading {
    let mut reading = ThermocoupleReading {
        timestamp_us,
        ..Default::default()
    };

    if raw & (1 << 16) != 0 {
        reading.fault = TcFault((raw & 0x07) as u8);
        return reading;
    }

    let mut tc_raw = ((raw >> 18) & 0x3FFF) as i16;
    if tc_raw & 0x2000 != 0 {
        tc_raw |= !0x3FFF; // sign extend
    }
    reading.temperature_c = tc_raw as f32 * 0.25;

    let mut cj_raw = ((raw >> 4) & 0x0FFF) as i16;
    if cj_raw & 0x0800 != 0 {
        cj_raw |= !0x0FFF;
    }
    reading.cold_junction_c = cj_raw as f32 * 0.0625;

    reading
}

/// Latest-sample cell: single writer (the sampler), many readers, copy
/// in and out under a short lock with no I/O inside.
#[derive(Debug, Default)]
pub struct ReadingCell {
    inner: Mutex<ThermocoupleReading>,
}

impl ReadingCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_latest(&self) -> ThermocoupleReading {
        *self.inner.lock().expect("reading lock poisoned")
    }

    pub fn store(&self, reading: ThermocoupleReading) {
        *self.inner.lock().expect("reading lock poisoned") = reading;
    }
}

/// Periodic sampler. A bus error keeps the previous cached reading; a
/// faulted frame still updates the cell so downstream code observes the
/// fault flags.
pub struct SensorSampler {
    probe: Box<dyn ThermocoupleProbe>,
    cell: Arc<ReadingCell>,
    clock: Arc<dyn Clock>,
}

impl SensorSampler {
    pub fn new(
        probe: Box<dyn ThermocoupleProbe>,
        cell: Arc<ReadingCell>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { probe, cell, clock }
    }

    /// One 250 ms sampling step.
    pub fn sample_once(&mut self) {
        match self.probe.read_frame() {
            Ok(raw) => {
                let reading = decode_frame(raw, self.clock.monotonic_us());
                if reading.fault.is_fault() {
                    tracing::warn!(fault = reading.fault.0, "thermocouple fault");
                }
                self.cell.store(reading);
            }
            Err(ProbeError::Bus(e)) => {
                tracing::error!("SPI read failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_positive_frame() {
        // 1000.00 °C = 4000 quarter-degrees; 25.0 °C = 400 sixteenths.
        let raw = (4000u32 << 18) | (400u32 << 4);
        let r = decode_frame(raw, 42);
        assert_eq!(r.temperature_c, 1000.0);
        assert_eq!(r.cold_junction_c, 25.0);
        assert!(!r.fault.is_fault());
        assert_eq!(r.timestamp_us, 42);
    }

    #[test]
    fn decodes_negative_temperatures() {
        // -0.25 °C: all-ones 14-bit value.
        let raw = 0x3FFFu32 << 18;
        let r = decode_frame(raw, 0);
        assert_eq!(r.temperature_c, -0.25);

        // Cold junction -1.0 °C = -16 sixteenths.
        let raw = (0x0FFFu32 - 15) << 4;
        let r = decode_frame(raw, 0);
        assert_eq!(r.cold_junction_c, -1.0);
    }

    #[test]
    fn fault_frame_reports_zero_and_flags() {
        let raw = (4000u32 << 18) | (1 << 16) | 0b011;
        let r = decode_frame(raw, 7);
        assert_eq!(r.temperature_c, 0.0);
        assert_eq!(r.cold_junction_c, 0.0);
        assert!(r.fault.open_circuit());
        assert!(r.fault.short_to_gnd());
        assert!(!r.fault.short_to_vcc());
    }

    #[test]
    fn bus_error_keeps_cached_reading() {
        struct FlakyProbe {
            calls: u32,
        }
        impl ThermocoupleProbe for FlakyProbe {
            fn read_frame(&mut self) -> Result<u32, ProbeError> {
                self.calls += 1;
                if self.calls > 1 {
                    Err(ProbeError::Bus("gone".to_string()))
                } else {
                    Ok(2000u32 << 18) // 500 °C
                }
            }
        }
        struct FixedClock(i64);
        impl Clock for FixedClock {
            fn monotonic_us(&self) -> i64 {
                self.0
            }
            fn wallclock_epoch_s(&self) -> i64 {
                0
            }
        }

        let cell = Arc::new(ReadingCell::new());
        let mut sampler = SensorSampler::new(
            Box::new(FlakyProbe { calls: 0 }),
            cell.clone(),
            Arc::new(FixedClock(99)),
        );
        sampler.sample_once();
        assert_eq!(cell.get_latest().temperature_c, 500.0);
        sampler.sample_once();
        // Unchanged, including the timestamp.
        let r = cell.get_latest();
        assert_eq!(r.temperature_c, 500.0);
        assert_eq!(r.timestamp_us, 99);
    }
}
