//! Simulated MAX31855 probe and on/off switch outputs.
//!
//! The probe produces bit-exact 32-bit frames from the plant temperature
//! so the host exercises its real decoder; faults and bus errors can be
//! injected per-read.

use crate::plant::FirstOrderPlant;
use kiln_shared::{ProbeError, SwitchOutput, ThermocoupleProbe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

pub type SharedPlant = Arc<Mutex<FirstOrderPlant>>;

/// Build a MAX31855 frame: 14-bit thermocouple value in bits 31..18
/// (0.25 °C steps), 12-bit cold junction in bits 15..4 (0.0625 °C
/// steps), fault summary in bit 16 with detail in bits 2..0.
pub fn encode_frame(temp_c: f32, cold_junction_c: f32, fault: u8) -> u32 {
    let mut frame = 0u32;
    let tc_raw = ((temp_c / 0.25).round() as i32) & 0x3FFF;
    frame |= (tc_raw as u32) << 18;
    let cj_raw = ((cold_junction_c / 0.0625).round() as i32) & 0x0FFF;
    frame |= (cj_raw as u32) << 4;
    if fault != 0 {
        frame |= 1 << 16;
        frame |= (fault & 0x07) as u32;
    }
    frame
}

pub struct SimProbe {
    plant: SharedPlant,
    cold_junction_c: f32,
    fault_bits: Arc<AtomicU8>,
    bus_error: Arc<AtomicBool>,
}

impl SimProbe {
    pub fn new(plant: SharedPlant) -> Self {
        Self {
            plant,
            cold_junction_c: 25.0,
            fault_bits: Arc::new(AtomicU8::new(0)),
            bus_error: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for injecting thermocouple faults mid-run.
    pub fn fault_bits(&self) -> Arc<AtomicU8> {
        self.fault_bits.clone()
    }

    /// Handle for injecting SPI bus failures mid-run.
    pub fn bus_error(&self) -> Arc<AtomicBool> {
        self.bus_error.clone()
    }
}

impl ThermocoupleProbe for SimProbe {
    fn read_frame(&mut self) -> Result<u32, ProbeError> {
        if self.bus_error.load(Ordering::SeqCst) {
            return Err(ProbeError::Bus("simulated SPI failure".to_string()));
        }
        let temp = self.plant.lock().expect("plant lock poisoned").measured_c() as f32;
        let fault = self.fault_bits.load(Ordering::SeqCst);
        Ok(encode_frame(temp, self.cold_junction_c, fault))
    }
}

/// Simulated relay/GPIO line. Cloning shares the level, so the plant can
/// watch the line the supervisor drives.
#[derive(Debug, Clone)]
pub struct SimSwitch {
    level: Arc<AtomicBool>,
    name: &'static str,
}

impl SimSwitch {
    pub fn new(name: &'static str) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(false)),
            name,
        }
    }

    pub fn level_handle(&self) -> Arc<AtomicBool> {
        self.level.clone()
    }
}

impl SwitchOutput for SimSwitch {
    fn set_high(&mut self) {
        if !self.level.swap(true, Ordering::SeqCst) {
            tracing::trace!(line = self.name, "switch high");
        }
    }

    fn set_low(&mut self) {
        if self.level.swap(false, Ordering::SeqCst) {
            tracing::trace!(line = self.name, "switch low");
        }
    }

    fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}
