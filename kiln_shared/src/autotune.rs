//! Relay-method PID auto-tune (Åström–Hägglund).
//!
//! The element is driven bang-bang around a setpoint; the sustained
//! oscillation's period and amplitude give the ultimate gain, and
//! classical Ziegler–Nichols rules produce the PID gains.

use crate::pid::PidGains;
use thiserror::Error;

/// Full relay cycles averaged before computing gains.
pub const DEFAULT_CYCLES: u32 = 5;

/// Wall time after which a tune that has not converged fails.
pub const DEFAULT_TIMEOUT_US: i64 = 60 * 60 * 1_000_000;

/// Oscillations smaller than this cannot be measured reliably.
pub const MIN_AMPLITUDE_C: f32 = 0.1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AutotuneError {
    #[error("setpoint and hysteresis must be positive")]
    InvalidArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutotunePhase {
    #[default]
    Idle,
    HeatingToSetpoint,
    RelayCycling,
    Complete,
    Failed,
}

/// Output of one auto-tune step.
#[derive(Debug, Clone, Copy)]
pub struct AutotuneStep {
    /// Relay duty to apply this tick (0.0 or 1.0).
    pub duty: f32,
    /// True once the tuner has finished, successfully or not.
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct PidAutotuner {
    phase: AutotunePhase,
    setpoint_c: f32,
    hysteresis_c: f32,
    cycles_needed: u32,
    cycles_done: u32,
    period_sum_s: f32,
    amplitude_sum: f32,
    relay_on: bool,
    above_setpoint: bool,
    half_cycles: u32,
    peak_high: f32,
    peak_low: f32,
    last_crossing_us: i64,
    start_time_us: i64,
    timeout_us: i64,
    result: Option<PidGains>,
}

impl Default for PidAutotuner {
    fn default() -> Self {
        Self::new()
    }
}

impl PidAutotuner {
    pub fn new() -> Self {
        Self {
            phase: AutotunePhase::Idle,
            setpoint_c: 0.0,
            hysteresis_c: 0.0,
            cycles_needed: DEFAULT_CYCLES,
            cycles_done: 0,
            period_sum_s: 0.0,
            amplitude_sum: 0.0,
            relay_on: false,
            above_setpoint: false,
            half_cycles: 0,
            peak_high: 0.0,
            peak_low: 0.0,
            last_crossing_us: 0,
            start_time_us: 0,
            timeout_us: DEFAULT_TIMEOUT_US,
            result: None,
        }
    }

    pub fn phase(&self) -> AutotunePhase {
        self.phase
    }

    pub fn setpoint_c(&self) -> f32 {
        self.setpoint_c
    }

    /// Gains from the last completed tune.
    pub fn result(&self) -> Option<PidGains> {
        self.result
    }

    pub fn start(
        &mut self,
        setpoint_c: f32,
        hysteresis_c: f32,
        now_us: i64,
    ) -> Result<(), AutotuneError> {
        if setpoint_c <= 0.0 || hysteresis_c <= 0.0 {
            return Err(AutotuneError::InvalidArg);
        }
        *self = Self::new();
        self.phase = AutotunePhase::HeatingToSetpoint;
        self.setpoint_c = setpoint_c;
        self.hysteresis_c = hysteresis_c;
        self.relay_on = true;
        self.start_time_us = now_us;
        tracing::info!(setpoint_c, hysteresis_c, "auto-tune started");
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.phase = AutotunePhase::Idle;
        tracing::info!("auto-tune cancelled");
    }

    /// Advance the tuner with the latest measurement. Call at the engine
    /// tick rate; the returned duty goes straight to the supervisor.
    pub fn update(&mut self, temp_c: f32, now_us: i64) -> AutotuneStep {
        match self.phase {
            AutotunePhase::Idle | AutotunePhase::Complete | AutotunePhase::Failed => {
                return AutotuneStep {
                    duty: 0.0,
                    finished: true,
                };
            }
            _ => {}
        }

        if now_us - self.start_time_us > self.timeout_us {
            tracing::warn!("auto-tune timed out");
            self.phase = AutotunePhase::Failed;
            return AutotuneStep {
                duty: 0.0,
                finished: true,
            };
        }

        match self.phase {
            AutotunePhase::HeatingToSetpoint => {
                // Full power until we are within the hysteresis band.
                if temp_c >= self.setpoint_c - self.hysteresis_c {
                    self.phase = AutotunePhase::RelayCycling;
                    self.relay_on = false;
                    self.above_setpoint = true;
                    self.last_crossing_us = now_us;
                    self.peak_high = temp_c;
                    self.peak_low = temp_c;
                    tracing::info!("reached setpoint, starting relay cycling");
                }
                AutotuneStep {
                    duty: 1.0,
                    finished: false,
                }
            }
            AutotunePhase::RelayCycling => self.cycle(temp_c, now_us),
            _ => unreachable!(),
        }
    }

    fn cycle(&mut self, temp_c: f32, now_us: i64) -> AutotuneStep {
        if temp_c > self.peak_high {
            self.peak_high = temp_c;
        }
        if temp_c < self.peak_low {
            self.peak_low = temp_c;
        }

        let now_above = temp_c > self.setpoint_c;
        if now_above != self.above_setpoint {
            self.half_cycles += 1;
            self.above_setpoint = now_above;

            // Two half-cycles make one full cycle: commit a sample.
            if self.half_cycles >= 2 {
                let period_s = (now_us - self.last_crossing_us) as f32 / 1_000_000.0;
                let amplitude = (self.peak_high - self.peak_low) / 2.0;

                self.period_sum_s += period_s;
                self.amplitude_sum += amplitude;
                self.cycles_done += 1;
                self.half_cycles = 0;
                self.last_crossing_us = now_us;
                self.peak_high = temp_c;
                self.peak_low = temp_c;

                tracing::info!(
                    cycle = self.cycles_done,
                    needed = self.cycles_needed,
                    period_s,
                    amplitude,
                    "auto-tune cycle committed"
                );

                if self.cycles_done >= self.cycles_needed {
                    return self.finish();
                }
            }
        }

        // Relay with hysteresis around the setpoint.
        if temp_c < self.setpoint_c - self.hysteresis_c {
            self.relay_on = true;
        } else if temp_c > self.setpoint_c + self.hysteresis_c {
            self.relay_on = false;
        }
        AutotuneStep {
            duty: if self.relay_on { 1.0 } else { 0.0 },
            finished: false,
        }
    }

    fn finish(&mut self) -> AutotuneStep {
        let avg_period = self.period_sum_s / self.cycles_done as f32;
        let avg_amplitude = self.amplitude_sum / self.cycles_done as f32;

        if avg_amplitude < MIN_AMPLITUDE_C {
            tracing::warn!(avg_amplitude, "auto-tune failed: amplitude too small");
            self.phase = AutotunePhase::Failed;
            return AutotuneStep {
                duty: 0.0,
                finished: true,
            };
        }

        // Relay amplitude d is 1.0 (full duty), so Ku = 4 / (pi * a).
        let ku = 4.0 / (std::f32::consts::PI * avg_amplitude);
        let tu = avg_period;

        let gains = PidGains::new(0.6 * ku, 1.2 * ku / tu, 0.075 * ku * tu);
        tracing::info!(
            kp = gains.kp,
            ki = gains.ki,
            kd = gains.kd,
            "auto-tune complete"
        );
        self.result = Some(gains);
        self.phase = AutotunePhase::Complete;
        AutotuneStep {
            duty: 0.0,
            finished: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000;

    /// Drive the tuner with a synthetic oscillation: period 100 s,
    /// swinging ±5 °C around a 500 °C setpoint, sampled at 1 Hz.
    fn synthetic_wave(t_s: i64) -> f32 {
        let phase = (t_s % 100) as f32 / 100.0 * std::f32::consts::TAU;
        500.0 + 5.0 * phase.sin()
    }

    #[test]
    fn rejects_degenerate_arguments() {
        let mut at = PidAutotuner::new();
        assert_eq!(at.start(0.0, 5.0, 0), Err(AutotuneError::InvalidArg));
        assert_eq!(at.start(500.0, 0.0, 0), Err(AutotuneError::InvalidArg));
    }

    #[test]
    fn heats_at_full_power_until_near_setpoint() {
        let mut at = PidAutotuner::new();
        at.start(500.0, 5.0, 0).unwrap();
        let step = at.update(20.0, SEC);
        assert_eq!(step.duty, 1.0);
        assert!(!step.finished);
        assert_eq!(at.phase(), AutotunePhase::HeatingToSetpoint);

        at.update(496.0, 2 * SEC);
        assert_eq!(at.phase(), AutotunePhase::RelayCycling);
    }

    #[test]
    fn known_oscillation_yields_ziegler_nichols_gains() {
        let mut at = PidAutotuner::new();
        at.start(500.0, 5.0, 0).unwrap();

        let mut finished = false;
        for t_s in 1..2000 {
            let temp = if at.phase() == AutotunePhase::HeatingToSetpoint {
                // Jump into the band so cycling starts at t=1.
                500.0
            } else {
                synthetic_wave(t_s)
            };
            let step = at.update(temp, t_s * SEC);
            if step.finished {
                finished = true;
                break;
            }
        }

        assert!(finished);
        assert_eq!(at.phase(), AutotunePhase::Complete);
        let gains = at.result().unwrap();

        // a = 5 °C, Tu = 100 s: Ku = 4/(pi*5) ≈ 0.2546.
        assert!((gains.kp - 0.1528).abs() < 0.01, "kp = {}", gains.kp);
        assert!((gains.ki - 3.055e-3).abs() < 3e-4, "ki = {}", gains.ki);
        assert!((gains.kd - 1.910).abs() < 0.15, "kd = {}", gains.kd);
    }

    #[test]
    fn times_out_after_an_hour() {
        let mut at = PidAutotuner::new();
        at.start(500.0, 5.0, 0).unwrap();
        let step = at.update(20.0, DEFAULT_TIMEOUT_US + SEC);
        assert!(step.finished);
        assert_eq!(at.phase(), AutotunePhase::Failed);
        assert!(at.result().is_none());
    }

    #[test]
    fn tiny_amplitude_fails_the_tune() {
        let mut at = PidAutotuner::new();
        at.start(500.0, 0.001, 0).unwrap();
        at.update(500.0, SEC); // enters cycling at the setpoint

        // Oscillate by ±0.01 °C: crossings happen but amplitude is noise.
        let mut t = 2;
        let mut finished = false;
        for _ in 0..40 {
            for temp in [500.01_f32, 499.99] {
                let step = at.update(temp, t * SEC);
                t += 1;
                if step.finished {
                    finished = true;
                    break;
                }
            }
            if finished {
                break;
            }
        }
        assert!(finished);
        assert_eq!(at.phase(), AutotunePhase::Failed);
        assert!(at.result().is_none());
    }
}
