//! Safety supervisor: the only writer of the SSR line.
//!
//! Everything that can de-energize the element lives here: the hard
//! temperature ceiling, the sensor-fault deadline and the emergency
//! latch, along with the time-proportional translation from duty to
//! SSR level.

use crate::events::{EventBus, EVT_EMERGENCY_STOP, EVT_TEMP_FAULT};
use crate::sensor::ReadingCell;
use kiln_shared::types::HARDWARE_MAX_TEMP_C;
use kiln_shared::{Clock, FiringErrorCode, KilnEvent, SwitchOutput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// No fault-free sample for this long latches a TempFault stop.
const TEMP_FAULT_TIMEOUT_US: i64 = 5_000_000;

/// Vent relay runs while firing below this temperature.
const VENT_MAX_TEMP_C: f32 = 700.0;

#[derive(Debug)]
struct SsrState {
    duty: f32,
    window_start_us: i64,
}

pub struct SafetySupervisor {
    ssr_state: Mutex<SsrState>,
    ssr_pin: Mutex<Box<dyn SwitchOutput>>,
    vent_pin: Option<Mutex<Box<dyn SwitchOutput>>>,
    max_safe_temp_c: Mutex<f32>,
    window_us: i64,
    firing_active: AtomicBool,
    last_valid_us: Mutex<i64>,
    events: Arc<EventBus>,
    reading_cell: Arc<ReadingCell>,
    clock: Arc<dyn Clock>,
}

impl SafetySupervisor {
    pub fn new(
        ssr_pin: Box<dyn SwitchOutput>,
        vent_pin: Option<Box<dyn SwitchOutput>>,
        max_safe_temp_c: f32,
        window_ms: u64,
        events: Arc<EventBus>,
        reading_cell: Arc<ReadingCell>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.monotonic_us();
        Self {
            ssr_state: Mutex::new(SsrState {
                duty: 0.0,
                window_start_us: now,
            }),
            ssr_pin: Mutex::new(ssr_pin),
            vent_pin: vent_pin.map(Mutex::new),
            max_safe_temp_c: Mutex::new(max_safe_temp_c.min(HARDWARE_MAX_TEMP_C)),
            window_us: (window_ms * 1000) as i64,
            firing_active: AtomicBool::new(false),
            last_valid_us: Mutex::new(now),
            events,
            reading_cell,
            clock,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.events.is_set(EVT_EMERGENCY_STOP)
    }

    pub fn set_max_temp(&self, max_safe_temp_c: f32) {
        let clamped = max_safe_temp_c.min(HARDWARE_MAX_TEMP_C);
        *self.max_safe_temp_c.lock().expect("ceiling lock poisoned") = clamped;
    }

    pub fn max_temp(&self) -> f32 {
        *self.max_safe_temp_c.lock().expect("ceiling lock poisoned")
    }

    /// Engine reports firing activity; the vent relay follows it.
    pub fn set_firing_active(&self, active: bool) {
        self.firing_active.store(active, Ordering::SeqCst);
    }

    pub fn ssr_duty(&self) -> f32 {
        self.ssr_state.lock().expect("ssr lock poisoned").duty
    }

    pub fn ssr_is_high(&self) -> bool {
        self.ssr_pin.lock().expect("ssr pin lock poisoned").is_high()
    }

    /// Set the duty cycle and refresh the line. Forced to 0 while the
    /// emergency latch holds.
    pub fn set_ssr(&self, duty: f32) {
        if self.is_emergency() {
            self.drive_ssr(false);
            return;
        }
        let duty = duty.clamp(0.0, 1.0);
        {
            let mut state = self.ssr_state.lock().expect("ssr lock poisoned");
            state.duty = duty;
        }
        self.apply_window();
    }

    /// Time-proportional translation: high while elapsed < duty × window,
    /// window restarting once exceeded. The GPIO write happens outside
    /// the critical section.
    fn apply_window(&self) {
        let now = self.clock.monotonic_us();
        let level = {
            let mut state = self.ssr_state.lock().expect("ssr lock poisoned");
            let mut elapsed = now - state.window_start_us;
            if elapsed >= self.window_us {
                state.window_start_us = now;
                elapsed = 0;
            }
            let on_time_us = (state.duty as f64 * self.window_us as f64) as i64;
            elapsed < on_time_us
        };
        self.drive_ssr(level && !self.is_emergency());
    }

    fn drive_ssr(&self, high: bool) {
        self.ssr_pin
            .lock()
            .expect("ssr pin lock poisoned")
            .set_level(high);
    }

    fn drive_vent(&self, high: bool) {
        if let Some(pin) = &self.vent_pin {
            pin.lock().expect("vent pin lock poisoned").set_level(high);
        }
    }

    /// Latch the emergency: SSR low immediately, duty zeroed, vent
    /// opened. Only `clear_emergency` releases the latch.
    pub fn emergency_stop(&self, code: FiringErrorCode) {
        self.drive_ssr(false);
        {
            let mut state = self.ssr_state.lock().expect("ssr lock poisoned");
            state.duty = 0.0;
        }
        self.drive_vent(true);
        self.events.set_error(code);
        self.events.set_bits(EVT_EMERGENCY_STOP);
        self.events.publish(KilnEvent::EmergencyStop { code });
        tracing::error!(?code, "EMERGENCY STOP activated");
    }

    pub fn clear_emergency(&self) {
        self.events.clear_bits(EVT_EMERGENCY_STOP);
        self.events.publish(KilnEvent::EmergencyCleared);
        tracing::info!("emergency stop cleared");
    }

    /// One 500 ms supervision step.
    pub fn poll(&self) {
        let reading = self.reading_cell.get_latest();
        let now = self.clock.monotonic_us();

        if reading.fault.is_fault() {
            let last_valid = *self.last_valid_us.lock().expect("valid lock poisoned");
            if now - last_valid > TEMP_FAULT_TIMEOUT_US {
                tracing::error!("thermocouple fault persisted >5s, emergency stop");
                self.events.set_bits(EVT_TEMP_FAULT);
                self.emergency_stop(FiringErrorCode::TempFault);
            }
        } else {
            if reading.timestamp_us > 0 {
                *self.last_valid_us.lock().expect("valid lock poisoned") = reading.timestamp_us;
            }
            self.events.clear_bits(EVT_TEMP_FAULT);

            if reading.temperature_c > self.max_temp() || reading.temperature_c > HARDWARE_MAX_TEMP_C
            {
                tracing::error!(
                    temp = reading.temperature_c,
                    limit = self.max_temp(),
                    "over-temperature"
                );
                self.emergency_stop(FiringErrorCode::OverTemp);
            }
        }

        // Stale cell: the sampler itself has stopped delivering.
        if reading.timestamp_us > 0 && now - reading.timestamp_us > TEMP_FAULT_TIMEOUT_US {
            tracing::error!("no thermocouple data for >5s, emergency stop");
            self.events.set_bits(EVT_TEMP_FAULT);
            self.emergency_stop(FiringErrorCode::TempFault);
        }

        // Keep the time-proportional output moving between engine ticks.
        if !self.is_emergency() {
            self.apply_window();
        }

        let vent = self.is_emergency()
            || (self.firing_active.load(Ordering::SeqCst)
                && reading.temperature_c < VENT_MAX_TEMP_C);
        self.drive_vent(vent);
    }
}
