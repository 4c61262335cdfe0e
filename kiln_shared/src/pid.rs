//! Discrete PID controller for the SSR duty output.
//!
//! Error is setpoint − measured; output is clamped to the configured
//! bounds with back-calculation anti-windup. Gains persist as scaled
//! integers (× 10000) so flash storage never holds floats.

/// Scale factor for persisted gains.
pub const GAIN_STORE_SCALE: f32 = 10_000.0;

pub const DEFAULT_KP: f32 = 2.0;
pub const DEFAULT_KI: f32 = 0.01;
pub const DEFAULT_KD: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
        }
    }
}

impl PidGains {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    /// Storage representation: three i32 values scaled by 10000.
    pub fn to_scaled(self) -> (i32, i32, i32) {
        (
            (self.kp * GAIN_STORE_SCALE) as i32,
            (self.ki * GAIN_STORE_SCALE) as i32,
            (self.kd * GAIN_STORE_SCALE) as i32,
        )
    }

    pub fn from_scaled(kp: i32, ki: i32, kd: i32) -> Self {
        Self {
            kp: kp as f32 / GAIN_STORE_SCALE,
            ki: ki as f32 / GAIN_STORE_SCALE,
            kd: kd as f32 / GAIN_STORE_SCALE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    output_min: f32,
    output_max: f32,
    integral: f32,
    prev_error: f32,
    first_run: bool,
}

impl PidController {
    pub fn new(gains: PidGains, output_min: f32, output_max: f32) -> Self {
        Self {
            gains,
            output_min,
            output_max,
            integral: 0.0,
            prev_error: 0.0,
            first_run: true,
        }
    }

    /// Clear the integrator and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.first_run = true;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Replace the gains and reset accumulated state.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
        self.reset();
    }

    /// One control step. `dt_s <= 0` returns the lower bound without
    /// touching the integrator.
    pub fn compute(&mut self, setpoint: f32, measured: f32, dt_s: f32) -> f32 {
        if dt_s <= 0.0 {
            return self.output_min;
        }

        let error = setpoint - measured;

        let p_term = self.gains.kp * error;

        self.integral += error * dt_s;
        let i_term = self.gains.ki * self.integral;

        // Derivative on error; skipped on the first step after a reset.
        let d_term = if self.first_run {
            0.0
        } else {
            self.gains.kd * (error - self.prev_error) / dt_s
        };
        self.first_run = false;
        self.prev_error = error;

        let mut output = p_term + i_term + d_term;

        // Back-calculation anti-windup: when clamped, unwind the integral
        // only if the error would push further past the active bound.
        if output > self.output_max {
            output = self.output_max;
            if error > 0.0 {
                self.integral -= error * dt_s;
            }
        } else if output < self.output_min {
            output = self.output_min;
            if error < 0.0 {
                self.integral -= error * dt_s;
            }
        }

        output
    }
}
