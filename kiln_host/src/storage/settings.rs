//! Settings persistence: scalar values in the `kiln_set` namespace.
//!
//! Floats are stored as scaled integers (offset ×100, cost ×1000) so the
//! on-flash format stays integer-only.

use kiln_shared::{KeyValueStore, KilnSettings, StoreError, TempUnit};

const NS: &str = "kiln_set";

/// Load settings, falling back to defaults for any missing value.
pub fn load_settings(store: &dyn KeyValueStore) -> KilnSettings {
    let mut settings = KilnSettings::default();

    if let Some(unit) = store.get_u8(NS, "unit") {
        settings.temp_unit = if unit == b'F' { TempUnit::F } else { TempUnit::C };
    }
    if let Some(max) = store.get_i32(NS, "max_temp") {
        settings.max_safe_temp_c = max as f32;
    }
    if let Some(v) = store.get_u8(NS, "alarm") {
        settings.alarm_enabled = v != 0;
    }
    if let Some(v) = store.get_u8(NS, "autoshut") {
        settings.auto_shutdown = v != 0;
    }
    if let Some(v) = store.get_u8(NS, "notif") {
        settings.notifications_enabled = v != 0;
    }
    if let Some(v) = store.get_i32(NS, "tc_offset") {
        settings.tc_offset_c = v as f32 / 100.0;
    }
    if let Some(v) = store.get_string(NS, "webhook") {
        settings.webhook_url = v;
    }
    if let Some(v) = store.get_string(NS, "api_token") {
        settings.api_token = v;
    }
    if let Some(v) = store.get_i32(NS, "elem_watts") {
        settings.element_watts = v as f32;
    }
    if let Some(v) = store.get_i32(NS, "cost_kwh") {
        settings.electricity_cost_per_kwh = v as f32 / 1000.0;
    }

    settings.clamp_limits();
    settings
}

pub fn save_settings(store: &dyn KeyValueStore, settings: &KilnSettings) -> Result<(), StoreError> {
    let unit = match settings.temp_unit {
        TempUnit::C => b'C',
        TempUnit::F => b'F',
    };
    store.set_u8(NS, "unit", unit)?;
    store.set_i32(NS, "max_temp", settings.max_safe_temp_c as i32)?;
    store.set_u8(NS, "alarm", settings.alarm_enabled as u8)?;
    store.set_u8(NS, "autoshut", settings.auto_shutdown as u8)?;
    store.set_u8(NS, "notif", settings.notifications_enabled as u8)?;
    store.set_i32(NS, "tc_offset", (settings.tc_offset_c * 100.0).round() as i32)?;
    store.set_string(NS, "webhook", &settings.webhook_url)?;
    store.set_string(NS, "api_token", &settings.api_token)?;
    store.set_i32(NS, "elem_watts", settings.element_watts as i32)?;
    store.set_i32(
        NS,
        "cost_kwh",
        (settings.electricity_cost_per_kwh * 1000.0).round() as i32,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirKvStore;
    use tempfile::tempdir;

    #[test]
    fn missing_store_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = DirKvStore::open(dir.path()).unwrap();
        let settings = load_settings(&store);
        assert_eq!(settings, KilnSettings::default());
    }

    #[test]
    fn settings_round_trip_through_scaled_integers() {
        let dir = tempdir().unwrap();
        let store = DirKvStore::open(dir.path()).unwrap();

        let mut settings = KilnSettings {
            temp_unit: TempUnit::F,
            max_safe_temp_c: 1250.0,
            alarm_enabled: false,
            auto_shutdown: true,
            notifications_enabled: false,
            tc_offset_c: -2.5,
            webhook_url: "http://hook".to_string(),
            api_token: "tok".to_string(),
            api_token_set: false,
            element_watts: 9600.0,
            electricity_cost_per_kwh: 0.182,
        };
        save_settings(&store, &settings).unwrap();

        let loaded = load_settings(&store);
        settings.clamp_limits();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn out_of_range_ceiling_is_clamped_on_load() {
        let dir = tempdir().unwrap();
        let store = DirKvStore::open(dir.path()).unwrap();
        store.set_i32("kiln_set", "max_temp", 9999).unwrap();
        assert_eq!(load_settings(&store).max_safe_temp_c, 1400.0);
        store.set_i32("kiln_set", "max_temp", 5).unwrap();
        assert_eq!(load_settings(&store).max_safe_temp_c, 100.0);
    }
}
