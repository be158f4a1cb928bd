/*!
 * Time-bucket partition keys
 *
 * A row's designated timestamp is floored to the configured bucket and the
 * bucket label doubles as the partition directory name. Labels sort
 * lexicographically in chronological order.
 */

use chrono::{DateTime, Utc};

use crate::config::PartitionBy;

/// Label used for unpartitioned tables
pub const DEFAULT_PARTITION: &str = "default";

/// Derive the partition label for a timestamp in epoch microseconds.
pub fn partition_key(scheme: PartitionBy, micros: i64) -> String {
    if scheme == PartitionBy::None {
        return DEFAULT_PARTITION.to_string();
    }

    let ts: DateTime<Utc> = DateTime::from_timestamp_micros(micros)
        .unwrap_or_else(|| DateTime::from_timestamp_micros(0).expect("epoch is representable"));

    match scheme {
        PartitionBy::None => unreachable!("handled above"),
        PartitionBy::Hour => ts.format("%Y-%m-%dT%H").to_string(),
        PartitionBy::Day => ts.format("%Y-%m-%d").to_string(),
        PartitionBy::Month => ts.format("%Y-%m").to_string(),
        PartitionBy::Year => ts.format("%Y").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MICROS: i64 = 3_600_000_000;

    #[test]
    fn day_floors_to_date() {
        assert_eq!(partition_key(PartitionBy::Day, 0), "1970-01-01");
        assert_eq!(
            partition_key(PartitionBy::Day, 36_000_000),
            "1970-01-01"
        );
        assert_eq!(
            partition_key(PartitionBy::Day, 24 * HOUR_MICROS),
            "1970-01-02"
        );
    }

    #[test]
    fn hour_label_includes_hour() {
        assert_eq!(partition_key(PartitionBy::Hour, 0), "1970-01-01T00");
        assert_eq!(
            partition_key(PartitionBy::Hour, HOUR_MICROS),
            "1970-01-01T01"
        );
    }

    #[test]
    fn month_and_year_labels() {
        let feb = 32 * 24 * HOUR_MICROS;
        assert_eq!(partition_key(PartitionBy::Month, feb), "1970-02");
        assert_eq!(partition_key(PartitionBy::Year, feb), "1970");
    }

    #[test]
    fn none_uses_default_label() {
        assert_eq!(partition_key(PartitionBy::None, 123), DEFAULT_PARTITION);
    }

    #[test]
    fn labels_sort_chronologically() {
        let a = partition_key(PartitionBy::Day, 0);
        let b = partition_key(PartitionBy::Day, 40 * 24 * HOUR_MICROS);
        assert!(a < b);
    }
}
