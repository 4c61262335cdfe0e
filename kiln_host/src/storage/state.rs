//! Small persisted controller state: PID gains and element-on seconds.

use kiln_shared::{KeyValueStore, PidGains, StoreError};

const NS_PID: &str = "pid";
const NS_STATE: &str = "state";

/// Load gains; defaults apply per-value when absent.
pub fn load_gains(store: &dyn KeyValueStore) -> PidGains {
    let defaults = PidGains::default();
    let (dkp, dki, dkd) = defaults.to_scaled();
    PidGains::from_scaled(
        store.get_i32(NS_PID, "kp").unwrap_or(dkp),
        store.get_i32(NS_PID, "ki").unwrap_or(dki),
        store.get_i32(NS_PID, "kd").unwrap_or(dkd),
    )
}

pub fn save_gains(store: &dyn KeyValueStore, gains: PidGains) -> Result<(), StoreError> {
    let (kp, ki, kd) = gains.to_scaled();
    store.set_i32(NS_PID, "kp", kp)?;
    store.set_i32(NS_PID, "ki", ki)?;
    store.set_i32(NS_PID, "kd", kd)?;
    tracing::info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "PID gains saved");
    Ok(())
}

pub fn load_element_seconds(store: &dyn KeyValueStore) -> u32 {
    store.get_u32(NS_STATE, "elem_s").unwrap_or(0)
}

pub fn save_element_seconds(store: &dyn KeyValueStore, seconds: u32) -> Result<(), StoreError> {
    store.set_u32(NS_STATE, "elem_s", seconds)
}
