// Trait-based interfaces for the hardware and persistence seams, so the
// control core runs against real drivers or deterministic fakes.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ProbeError {
    #[error("SPI bus error: {0}")]
    Bus(String),
}

/// MAX31855-style thermocouple front-end: one 32-bit frame per read.
/// SPI mode 0, clock at or below 5 MHz; decoding happens host-side.
pub trait ThermocoupleProbe: Send {
    fn read_frame(&mut self) -> Result<u32, ProbeError>;
}

/// A single on/off output: SSR, vent relay, alarm.
pub trait SwitchOutput: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn is_high(&self) -> bool;

    fn set_level(&mut self, high: bool) {
        if high {
            self.set_high()
        } else {
            self.set_low()
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("corrupt value for {0}: {1}")]
    Corrupt(String, String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Namespaced key-value persistence, the shape of the original NVS layout:
/// scalar values plus opaque blobs. Handles are per-operation; nothing is
/// held across task boundaries. Missing keys read as `None`.
pub trait KeyValueStore: Send + Sync {
    fn get_i32(&self, namespace: &str, key: &str) -> Option<i32>;
    fn set_i32(&self, namespace: &str, key: &str, value: i32) -> Result<(), StoreError>;

    fn get_u32(&self, namespace: &str, key: &str) -> Option<u32>;
    fn set_u32(&self, namespace: &str, key: &str, value: u32) -> Result<(), StoreError>;

    fn get_u8(&self, namespace: &str, key: &str) -> Option<u8>;
    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError>;

    fn get_string(&self, namespace: &str, key: &str) -> Option<String>;
    fn set_string(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_blob(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;
    fn set_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removing a missing key is a no-op success.
    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}
