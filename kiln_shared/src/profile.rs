//! Profile validation, persistence-key sanitization, duration estimation
//! and the built-in default profile set.

use crate::types::{FiringProfile, FiringSegment, MAX_PROFILE_ID_LEN, MAX_SEGMENTS};
use thiserror::Error;

/// Key length limit imposed by the underlying key-value store.
pub const STORE_KEY_LEN: usize = 15;

/// Ramp rates beyond this are not physically meaningful for a kiln.
pub const MAX_RAMP_C_PER_H: f32 = 600.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile id is empty or longer than {MAX_PROFILE_ID_LEN} characters")]
    InvalidId,
    #[error("profile must have between 1 and {MAX_SEGMENTS} segments")]
    InvalidSegmentCount,
    #[error("segment {0}: numeric field is not finite")]
    NonFiniteField(usize),
    #[error("segment {0}: ramp rate exceeds {MAX_RAMP_C_PER_H} °C/h")]
    RampTooSteep(usize),
}

/// Reduce a profile id to the store's key alphabet: truncate to 15 bytes,
/// map anything outside `[A-Za-z0-9_]` to `_`.
pub fn sanitize_store_key(id: &str) -> String {
    id.chars()
        .take(STORE_KEY_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn validate(profile: &FiringProfile) -> Result<(), ProfileError> {
    if profile.id.is_empty() || profile.id.len() > MAX_PROFILE_ID_LEN {
        return Err(ProfileError::InvalidId);
    }
    if profile.segments.is_empty() || profile.segments.len() > MAX_SEGMENTS {
        return Err(ProfileError::InvalidSegmentCount);
    }
    for (i, seg) in profile.segments.iter().enumerate() {
        if !seg.ramp_rate_c_per_h.is_finite() || !seg.target_temp_c.is_finite() {
            return Err(ProfileError::NonFiniteField(i));
        }
        if seg.ramp_rate_c_per_h.abs() > MAX_RAMP_C_PER_H {
            return Err(ProfileError::RampTooSteep(i));
        }
    }
    Ok(())
}

/// Ramp time from the previous target (20 °C for the first segment) at
/// the segment's rate, plus its hold, summed over the profile.
pub fn estimate_duration_minutes(segments: &[FiringSegment]) -> u32 {
    let mut total_min = 0.0f32;
    let mut cur_temp = 20.0f32;
    for seg in segments {
        let rate = seg.ramp_rate_c_per_h;
        if rate.abs() > 0.1 {
            total_min += ((seg.target_temp_c - cur_temp) / rate).abs() * 60.0;
        }
        total_min += seg.hold_minutes as f32;
        cur_temp = seg.target_temp_c;
    }
    total_min.round() as u32
}

/// Refresh the cached max-temperature and duration fields.
pub fn recompute_cached(profile: &mut FiringProfile) {
    profile.max_temp_c = profile
        .segments
        .iter()
        .map(|s| s.target_temp_c)
        .fold(f32::MIN, f32::max);
    profile.estimated_duration_minutes = estimate_duration_minutes(&profile.segments);
}

fn segment(id: &str, name: &str, ramp: f32, target: f32, hold: u16) -> FiringSegment {
    FiringSegment {
        id: id.to_string(),
        name: name.to_string(),
        ramp_rate_c_per_h: ramp,
        target_temp_c: target,
        hold_minutes: hold,
    }
}

fn profile(
    id: &str,
    name: &str,
    description: &str,
    segments: Vec<FiringSegment>,
) -> FiringProfile {
    let mut p = FiringProfile {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        segments,
        max_temp_c: 0.0,
        estimated_duration_minutes: 0,
    };
    recompute_cached(&mut p);
    p
}

/// The factory profile set, seeded on first boot with an empty store.
pub fn default_profiles() -> Vec<FiringProfile> {
    vec![
        profile(
            "bisque-04",
            "Bisque Cone 04",
            "Standard bisque firing to cone 04",
            vec![
                segment("1", "Warm-up", 100.0, 200.0, 60),
                segment("2", "Water smoke", 50.0, 600.0, 30),
                segment("3", "Ramp to top", 150.0, 1060.0, 15),
            ],
        ),
        profile(
            "glaze-6",
            "Glaze Cone 6",
            "Mid-fire glaze for stoneware",
            vec![
                segment("1", "Initial heat", 150.0, 600.0, 0),
                segment("2", "Medium ramp", 100.0, 1000.0, 0),
                segment("3", "Final ramp", 80.0, 1222.0, 10),
            ],
        ),
        profile(
            "glaze-10",
            "Glaze Cone 10",
            "High-fire glaze for porcelain",
            vec![
                segment("1", "Low heat", 120.0, 500.0, 0),
                segment("2", "Medium heat", 150.0, 1000.0, 15),
                segment("3", "High heat", 100.0, 1305.0, 20),
            ],
        ),
        profile(
            "low-fire",
            "Low Fire Cone 06",
            "Low temp for earthenware and decals",
            vec![
                segment("1", "Warm-up", 100.0, 400.0, 30),
                segment("2", "Ramp to top", 120.0, 999.0, 10),
            ],
        ),
        profile(
            "crystalline",
            "Crystalline Glaze",
            "Controlled cooling for crystal growth",
            vec![
                segment("1", "Initial ramp", 200.0, 1260.0, 30),
                segment("2", "Crystal growth", -200.0, 1100.0, 120),
                segment("3", "Cool down", -150.0, 800.0, 0),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_to_key_alphabet() {
        assert_eq!(sanitize_store_key("bisque-04"), "bisque_04");
        assert_eq!(sanitize_store_key("cone-05-5-Fast"), "cone_05_5_Fast");
        assert_eq!(
            sanitize_store_key("a-very-long-profile-identifier"),
            "a_very_long_pro"
        );
    }

    #[test]
    fn defaults_validate_and_cache_consistently() {
        let profiles = default_profiles();
        assert_eq!(profiles.len(), 5);
        for p in &profiles {
            validate(p).unwrap();
            let expected_max = p
                .segments
                .iter()
                .map(|s| s.target_temp_c)
                .fold(f32::MIN, f32::max);
            assert_eq!(p.max_temp_c, expected_max);
        }
    }

    #[test]
    fn validate_rejects_bad_profiles() {
        let mut p = default_profiles().remove(0);
        p.segments.clear();
        assert_eq!(validate(&p), Err(ProfileError::InvalidSegmentCount));

        let mut p = default_profiles().remove(0);
        p.segments[1].target_temp_c = f32::INFINITY;
        assert_eq!(validate(&p), Err(ProfileError::NonFiniteField(1)));

        let mut p = default_profiles().remove(0);
        p.segments[0].ramp_rate_c_per_h = -700.0;
        assert_eq!(validate(&p), Err(ProfileError::RampTooSteep(0)));

        let mut p = default_profiles().remove(0);
        p.id = "x".repeat(MAX_PROFILE_ID_LEN + 1);
        assert_eq!(validate(&p), Err(ProfileError::InvalidId));
    }

    #[test]
    fn crystalline_cooling_counts_toward_duration() {
        // 20→1260 @200 = 372 min, +30 hold; 1260→1100 @-200 = 48 min,
        // +120 hold; 1100→800 @-150 = 120 min. Total 690.
        let p = &default_profiles()[4];
        assert_eq!(p.estimated_duration_minutes, 690);
    }
}
