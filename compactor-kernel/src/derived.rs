//! Epoch-relative timing fields.

use serde_json::Value;
use time::OffsetDateTime;

/// Whole seconds from `epoch` to `ts`. Anything before the epoch is reported
/// as -1 so its magnitude does not leak; a missing timestamp stays missing.
pub fn seconds_since(epoch: OffsetDateTime, ts: Option<OffsetDateTime>) -> Option<i64> {
    ts.map(|ts| {
        let seconds = (ts - epoch).whole_seconds();
        if seconds < 0 {
            -1
        } else {
            seconds
        }
    })
}

/// Whole seconds between start and finish, missing when either end is.
pub fn duration_seconds(start: Option<OffsetDateTime>, finish: Option<OffsetDateTime>) -> Option<i64> {
    match (start, finish) {
        (Some(start), Some(finish)) => Some((finish - start).whole_seconds()),
        _ => None,
    }
}

pub fn seconds_value(seconds: Option<i64>) -> Value {
    seconds.map(Value::from).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const EPOCH: OffsetDateTime = datetime!(2015-09-06 23:31:16 UTC);

    #[test]
    fn test_seconds_since_epoch() {
        assert_eq!(seconds_since(EPOCH, Some(EPOCH)), Some(0));
        assert_eq!(
            seconds_since(EPOCH, Some(datetime!(2015-09-07 23:31:16 UTC))),
            Some(86_400)
        );
    }

    #[test]
    fn test_pre_epoch_clamped() {
        assert_eq!(seconds_since(EPOCH, Some(datetime!(2014-01-01 00:00 UTC))), Some(-1));
        assert_eq!(seconds_since(EPOCH, Some(datetime!(2015-09-06 23:31:15 UTC))), Some(-1));
    }

    #[test]
    fn test_missing_timestamp_is_null_not_zero() {
        assert_eq!(seconds_since(EPOCH, None), None);
        assert_eq!(seconds_value(None), Value::Null);
        assert_eq!(seconds_value(Some(0)), Value::from(0));
    }

    #[test]
    fn test_duration() {
        let start = datetime!(2016-01-01 00:00 UTC);
        assert_eq!(duration_seconds(Some(start), Some(datetime!(2016-01-01 00:01:30 UTC))), Some(90));
        assert_eq!(duration_seconds(Some(start), None), None);
    }
}
