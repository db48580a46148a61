//! Staleness gate
//!
//! An incoming record may only be written when nothing is stored under its
//! key, or when its timestamp is strictly newer than the stored row's.
//! Equal timestamps are rejected, so replaying a record (or receiving the
//! echo of our own outbound write) is a no-op.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No stored row; write as a new row.
    Insert,
    /// Stored row is older; overwrite it.
    Update,
    /// Stored row is as new or newer; drop the incoming record.
    Stale { stored: DateTime<Utc> },
}

impl GateDecision {
    pub fn admits(&self) -> bool {
        !matches!(self, GateDecision::Stale { .. })
    }
}

/// Decide whether `incoming` may replace the row stored at `stored`.
pub fn admit(incoming: DateTime<Utc>, stored: Option<DateTime<Utc>>) -> GateDecision {
    match stored {
        None => GateDecision::Insert,
        Some(stored) if incoming.timestamp_millis() > stored.timestamp_millis() => {
            GateDecision::Update
        }
        Some(stored) => GateDecision::Stale { stored },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(v).unwrap()
    }

    #[test]
    fn test_absent_row_is_inserted() {
        assert_eq!(admit(ms(0), None), GateDecision::Insert);
    }

    #[test]
    fn test_newer_record_updates() {
        assert_eq!(admit(ms(2_000), Some(ms(1_000))), GateDecision::Update);
    }

    #[test]
    fn test_equal_and_older_records_are_stale() {
        let equal = admit(ms(1_000), Some(ms(1_000)));
        assert_eq!(equal, GateDecision::Stale { stored: ms(1_000) });
        assert!(!equal.admits());

        let older = admit(ms(999), Some(ms(1_000)));
        assert!(!older.admits());
    }

    #[test]
    fn test_sub_millisecond_difference_is_not_newer() {
        let stored = ms(1_000);
        let incoming = stored + chrono::Duration::microseconds(500);
        assert!(!admit(incoming, Some(stored)).admits());
    }
}
