use chrono::{DateTime, Utc};

/// Epoch values at or above this are milliseconds; smaller values are seconds.
/// 10^11 seconds is roughly the year 5138, 10^11 ms is early 1973.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Convert an epoch number from the server into a UTC timestamp.
///
/// Servers have shipped both second and millisecond resolution, so the unit
/// is inferred from the magnitude.
pub fn epoch_to_datetime(value: i64) -> DateTime<Utc> {
    let millis = if value.abs() >= MILLIS_THRESHOLD {
        value
    } else {
        value.saturating_mul(1000)
    };
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Same as [`epoch_to_datetime`] but accepts the floating point values some
/// server builds emit.
pub fn epoch_f64_to_datetime(value: f64) -> DateTime<Utc> {
    if !value.is_finite() {
        return DateTime::<Utc>::UNIX_EPOCH;
    }
    let millis = if value.abs() >= MILLIS_THRESHOLD as f64 {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Read an epoch timestamp out of a JSON value (integer or float).
pub fn epoch_from_json(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(n) = value.as_i64() {
        return Some(epoch_to_datetime(n));
    }
    value.as_f64().map(epoch_f64_to_datetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_and_millis_agree() {
        let secs = epoch_to_datetime(1_700_000_000);
        let millis = epoch_to_datetime(1_700_000_000_000);
        assert_eq!(secs, millis);
    }

    #[test]
    fn fractional_seconds_keep_millis() {
        let dt = epoch_f64_to_datetime(1_700_000_000.25);
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn json_numbers_parse() {
        let v = serde_json::json!(1_700_000_000_123i64);
        assert_eq!(
            epoch_from_json(&v).map(|d| d.timestamp_millis()),
            Some(1_700_000_000_123)
        );
        assert!(epoch_from_json(&serde_json::json!("nope")).is_none());
    }
}
