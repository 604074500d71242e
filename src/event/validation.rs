use super::PositionEvent;
use thiserror::Error;

/// Validation errors for PositionEvent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("entity_id is required")]
    MissingEntityId,

    #[error("timestamp must be positive, got {0}")]
    InvalidTimestamp(i64),

    #[error("latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("longitude out of range: {0}")]
    LongitudeOutOfRange(f64),
}

/// Validates a PositionEvent before it enters the dataflow.
///
/// Validation rules:
/// - entity_id: non-empty after trimming
/// - timestamp: positive Unix epoch milliseconds
/// - latitude in [-90, 90], longitude in [-180, 180], both finite
pub fn validate(event: &PositionEvent) -> Result<(), ValidationError> {
    if event.entity_id.trim().is_empty() {
        return Err(ValidationError::MissingEntityId);
    }

    if event.timestamp <= 0 {
        return Err(ValidationError::InvalidTimestamp(event.timestamp));
    }

    if !event.latitude.is_finite() || !(-90.0..=90.0).contains(&event.latitude) {
        return Err(ValidationError::LatitudeOutOfRange(event.latitude));
    }

    if !event.longitude.is_finite() || !(-180.0..=180.0).contains(&event.longitude) {
        return Err(ValidationError::LongitudeOutOfRange(event.longitude));
    }

    Ok(())
}
