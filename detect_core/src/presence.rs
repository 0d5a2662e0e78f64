//! Range-window presence check on a single range profile.

use sensor_models::PresenceParams;

use crate::error::{DetectError, Result};
use crate::types::PresenceResult;

/// Flag any bin within `[min_range, max_range]` whose level exceeds
/// `threshold_db`, reporting the distance of the strongest such bin
/// (first one on ties).
pub fn detect_presence(
    profile_db: &[f64],
    range_axis: &[f64],
    min_range: f64,
    max_range: f64,
    threshold_db: f64,
) -> Result<PresenceResult> {
    if profile_db.len() != range_axis.len() {
        return Err(DetectError::ShapeMismatch {
            stage: "presence",
            expected: vec![range_axis.len()],
            actual: vec![profile_db.len()],
        });
    }

    let mut strongest: Option<(f64, f64)> = None;
    let mut above = false;
    for (&level, &range) in profile_db.iter().zip(range_axis) {
        if range < min_range || range > max_range {
            continue;
        }
        above |= level > threshold_db;
        if strongest.map_or(true, |(best, _)| level > best) {
            strongest = Some((level, range));
        }
    }

    Ok(match strongest {
        Some((_, range)) if above => PresenceResult {
            detected: true,
            distance: Some(range),
        },
        _ => PresenceResult::default(),
    })
}

/// [`detect_presence`] with the window and threshold taken from config.
pub fn detect_presence_with(
    profile_db: &[f64],
    range_axis: &[f64],
    params: &PresenceParams,
) -> Result<PresenceResult> {
    detect_presence(
        profile_db,
        range_axis,
        params.min_range_m,
        params.max_range_m,
        params.threshold_db,
    )
}
