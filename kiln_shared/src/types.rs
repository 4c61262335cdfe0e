//! Core firing types shared between the host, simulator and tests.

use crate::pid::PidGains;
use serde::{Deserialize, Serialize};

/// Hard ceiling of the heating element and refractory. Never overridable.
pub const HARDWARE_MAX_TEMP_C: f32 = 1400.0;

/// Lowest configurable safety ceiling.
pub const MIN_SAFE_TEMP_C: f32 = 100.0;

pub const MAX_SEGMENTS: usize = 16;
pub const MAX_PROFILES: usize = 20;
pub const MAX_PROFILE_ID_LEN: usize = 39;

/// One leg of a firing curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringSegment {
    pub id: String,
    pub name: String,
    /// °C per hour; negative means controlled cooling.
    pub ramp_rate_c_per_h: f32,
    pub target_temp_c: f32,
    /// Minutes to hold at target. 0 = hold until explicitly skipped.
    pub hold_minutes: u16,
}

/// A complete multi-segment firing curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    pub segments: Vec<FiringSegment>,
    /// Cached: max target across all segments.
    pub max_temp_c: f32,
    /// Cached: rough ramp+hold time from a 20 °C start.
    pub estimated_duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiringStatus {
    #[default]
    Idle,
    Heating,
    Holding,
    Cooling,
    Complete,
    Error,
    Paused,
    Autotune,
}

/// Observer snapshot of the active firing. Copied out under a short lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiringProgress {
    pub is_active: bool,
    pub profile_id: String,
    pub current_temp_c: f32,
    pub target_temp_c: f32,
    pub current_segment: u8,
    pub total_segments: u8,
    pub elapsed_s: u32,
    pub estimated_remaining_s: u32,
    pub status: FiringStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TempUnit {
    #[default]
    C,
    F,
}

/// User-adjustable settings. The API token is write-only: snapshots handed
/// to observers carry an empty token with `api_token_set` reporting presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KilnSettings {
    pub temp_unit: TempUnit,
    /// Clamped to [100, 1400] on write; the 1400 hardware ceiling wins.
    pub max_safe_temp_c: f32,
    pub alarm_enabled: bool,
    pub auto_shutdown: bool,
    pub notifications_enabled: bool,
    /// Calibration offset added to the raw thermocouple reading.
    pub tc_offset_c: f32,
    pub webhook_url: String,
    pub api_token: String,
    pub api_token_set: bool,
    pub element_watts: f32,
    pub electricity_cost_per_kwh: f32,
}

impl Default for KilnSettings {
    fn default() -> Self {
        Self {
            temp_unit: TempUnit::C,
            max_safe_temp_c: 1300.0,
            alarm_enabled: true,
            auto_shutdown: true,
            notifications_enabled: true,
            tc_offset_c: 0.0,
            webhook_url: String::new(),
            api_token: String::new(),
            api_token_set: false,
            element_watts: 0.0,
            electricity_cost_per_kwh: 0.0,
        }
    }
}

impl KilnSettings {
    /// Clamp the safety ceiling into its legal range.
    pub fn clamp_limits(&mut self) {
        if !self.max_safe_temp_c.is_finite() {
            self.max_safe_temp_c = 1300.0;
        }
        self.max_safe_temp_c = self
            .max_safe_temp_c
            .clamp(MIN_SAFE_TEMP_C, HARDWARE_MAX_TEMP_C);
    }

    /// Copy for observers: the token itself is never returned.
    pub fn public_view(&self) -> KilnSettings {
        let mut view = self.clone();
        view.api_token_set = !view.api_token.is_empty();
        view.api_token = String::new();
        view
    }
}

/// Thermocouple fault mask, straight from the MAX31855 frame LSBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcFault(pub u8);

impl TcFault {
    pub const OPEN_CIRCUIT: u8 = 1 << 0;
    pub const SHORT_GND: u8 = 1 << 1;
    pub const SHORT_VCC: u8 = 1 << 2;

    pub fn is_fault(self) -> bool {
        self.0 != 0
    }

    pub fn open_circuit(self) -> bool {
        self.0 & Self::OPEN_CIRCUIT != 0
    }

    pub fn short_to_gnd(self) -> bool {
        self.0 & Self::SHORT_GND != 0
    }

    pub fn short_to_vcc(self) -> bool {
        self.0 & Self::SHORT_VCC != 0
    }
}

/// One decoded thermocouple sample. Temperature reads 0 while faulted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThermocoupleReading {
    pub temperature_c: f32,
    pub cold_junction_c: f32,
    pub fault: TcFault,
    /// Monotonic microseconds at sample time; 0 = never sampled.
    pub timestamp_us: i64,
}

/// Why a firing ended in `Error` (or why a command was refused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringErrorCode {
    #[default]
    None,
    EmergencyStop,
    /// Sensor open/short, or readings stale for more than 5 s.
    TempFault,
    OverTemp,
    /// Heating segment failed the 15-minute rise check.
    NotRising,
    /// Observed ramp exceeded twice the programmed rate.
    Runaway,
    AutotuneFailed,
    QueueFull,
}

impl FiringErrorCode {
    /// Numeric code used in persisted history records.
    pub fn code(self) -> i32 {
        match self {
            FiringErrorCode::None => 0,
            FiringErrorCode::EmergencyStop => 1,
            FiringErrorCode::TempFault => 2,
            FiringErrorCode::OverTemp => 3,
            FiringErrorCode::NotRising => 4,
            FiringErrorCode::Runaway => 5,
            FiringErrorCode::AutotuneFailed => 6,
            FiringErrorCode::QueueFull => 7,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => FiringErrorCode::EmergencyStop,
            2 => FiringErrorCode::TempFault,
            3 => FiringErrorCode::OverTemp,
            4 => FiringErrorCode::NotRising,
            5 => FiringErrorCode::Runaway,
            6 => FiringErrorCode::AutotuneFailed,
            7 => FiringErrorCode::QueueFull,
            _ => FiringErrorCode::None,
        }
    }
}

/// Commands accepted by the firing engine's bounded inbox.
#[derive(Debug, Clone)]
pub enum FiringCommand {
    Start {
        profile: FiringProfile,
        delay_minutes: u32,
    },
    Stop,
    Pause,
    Resume,
    SkipSegment,
    AutotuneStart {
        setpoint_c: f32,
        hysteresis_c: f32,
    },
    AutotuneStop,
}

/// State-transition outputs published on the event bus. The alarm chime,
/// webhook notification and vent update are driven from these, not from
/// the observer broadcast path.
#[derive(Debug, Clone)]
pub enum KilnEvent {
    FiringStarted {
        profile_id: String,
        profile_name: String,
    },
    SegmentAdvanced {
        segment: u8,
        total: u8,
    },
    FiringComplete {
        profile_name: String,
        peak_temp_c: f32,
        duration_s: u32,
    },
    FiringError {
        code: FiringErrorCode,
    },
    AutotuneComplete {
        gains: PidGains,
    },
    AutotuneFailed,
    EmergencyStop {
        code: FiringErrorCode,
    },
    EmergencyCleared,
}
