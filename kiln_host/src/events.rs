//! Safety event group and state-transition event bus.
//!
//! Latched conditions live in an atomic bit set that any task can poll
//! cheaply; richer transition events (completion, errors, auto-tune
//! results) go out on a broadcast channel for subscribers such as the
//! alarm task or a notification forwarder.

use kiln_shared::{FiringErrorCode, KilnEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub const EVT_EMERGENCY_STOP: u32 = 1 << 0;
pub const EVT_TEMP_FAULT: u32 = 1 << 1;
pub const EVT_FIRING_COMPLETE: u32 = 1 << 2;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct EventBus {
    bits: AtomicU32,
    last_error: Mutex<FiringErrorCode>,
    tx: broadcast::Sender<KilnEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            bits: AtomicU32::new(0),
            last_error: Mutex::new(FiringErrorCode::None),
            tx,
        }
    }

    pub fn set_bits(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::SeqCst);
    }

    pub fn clear_bits(&self, bits: u32) {
        self.bits.fetch_and(!bits, Ordering::SeqCst);
    }

    pub fn is_set(&self, bits: u32) -> bool {
        self.bits.load(Ordering::SeqCst) & bits != 0
    }

    pub fn set_error(&self, code: FiringErrorCode) {
        *self.last_error.lock().expect("error lock poisoned") = code;
    }

    pub fn last_error(&self) -> FiringErrorCode {
        *self.last_error.lock().expect("error lock poisoned")
    }

    /// Fire-and-forget publish; having no subscribers is not an error.
    pub fn publish(&self, event: KilnEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KilnEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
