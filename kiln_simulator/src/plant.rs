//! First-order thermal model of a kiln chamber.
//!
//! The chamber relaxes toward an equilibrium set by the element drive:
//! ambient + drive × element_rise_c. Heating and cooling use separate
//! time constants since an insulated kiln loses heat far slower than the
//! element adds it.

use rand::Rng;

#[derive(Debug, Clone)]
pub struct FirstOrderPlant {
    temp_c: f64,
    pub ambient_c: f64,
    /// Steady-state rise above ambient at full drive.
    pub element_rise_c: f64,
    pub tau_heat_s: f64,
    pub tau_cool_s: f64,
    /// Peak-to-peak measurement noise; 0 keeps runs deterministic.
    pub noise_c: f64,
}

impl FirstOrderPlant {
    pub fn new(start_temp_c: f64) -> Self {
        Self {
            temp_c: start_temp_c,
            ambient_c: 20.0,
            element_rise_c: 1480.0,
            tau_heat_s: 120.0,
            tau_cool_s: 300.0,
            noise_c: 0.0,
        }
    }

    pub fn temp_c(&self) -> f64 {
        self.temp_c
    }

    /// Clamp-free override, for injecting fault scenarios.
    pub fn set_temp_c(&mut self, temp_c: f64) {
        self.temp_c = temp_c;
    }

    /// Advance the model by `dt_s` with the element driven at `drive`
    /// (0.0 = off, 1.0 = full on).
    pub fn step(&mut self, drive: f64, dt_s: f64) {
        let equilibrium = self.ambient_c + drive.clamp(0.0, 1.0) * self.element_rise_c;
        let tau = if equilibrium > self.temp_c {
            self.tau_heat_s
        } else {
            self.tau_cool_s
        };
        self.temp_c += (equilibrium - self.temp_c) * (dt_s / tau);
    }

    /// What the thermocouple sees, including configured noise.
    pub fn measured_c(&self) -> f64 {
        if self.noise_c > 0.0 {
            let half = self.noise_c / 2.0;
            self.temp_c + rand::thread_rng().gen_range(-half..half)
        } else {
            self.temp_c
        }
    }
}
