//! Descriptive statistics over sensor reading windows.

use serde::Serialize;

use crate::models::SensorReading;

// ---

/// Min / max / average of one measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStats {
    // ---
    pub min: f64,
    pub max: f64,
    /// Arithmetic mean rounded to 2 decimal places.
    pub avg: f64,
}

/// Per-channel statistics over a reading window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStatistics {
    // ---
    pub count: usize,
    pub air_temp: ChannelStats,
    pub process_temp: ChannelStats,
    pub rotational_speed: ChannelStats,
    pub torque: ChannelStats,
    pub tool_wear: ChannelStats,
}

/// Summarize a sequence of values.
///
/// Returns `None` for an empty sequence. `avg` is the mean rounded to two
/// decimals, so it may sit up to 0.005 outside `[min, max]` when every value
/// carries more decimals than that.
pub fn summarize<I>(values: I) -> Option<ChannelStats>
where
    I: IntoIterator<Item = f64>,
{
    // ---
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for v in values {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }

    if count == 0 {
        return None;
    }

    let avg = round2(sum / count as f64);
    Some(ChannelStats { min, max, avg })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ReadingStatistics {
    // ---
    /// Compute statistics for all five channels over the same readings.
    pub fn from_readings(readings: &[SensorReading]) -> Option<Self> {
        // ---
        let channel = |f: fn(&SensorReading) -> f64| summarize(readings.iter().map(f));

        Some(ReadingStatistics {
            count: readings.len(),
            air_temp: channel(|r| r.air_temp)?,
            process_temp: channel(|r| r.process_temp)?,
            rotational_speed: channel(|r| f64::from(r.rotational_speed))?,
            torque: channel(|r| r.torque)?,
            tool_wear: channel(|r| f64::from(r.tool_wear))?,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn reading(air: f64, speed: i32, wear: i32) -> SensorReading {
        SensorReading {
            id: 1,
            machine_id: Uuid::nil(),
            timestamp: Utc::now(),
            air_temp: air,
            process_temp: air + 10.0,
            rotational_speed: speed,
            torque: 40.0,
            tool_wear: wear,
        }
    }

    #[test]
    fn test_empty_sequence_has_no_stats() {
        // ---
        assert_eq!(summarize(Vec::<f64>::new()), None);
        assert_eq!(ReadingStatistics::from_readings(&[]), None);
    }

    #[test]
    fn test_single_value() {
        // ---
        let s = summarize([42.5]).unwrap();
        assert_eq!(s, ChannelStats { min: 42.5, max: 42.5, avg: 42.5 });
    }

    #[test]
    fn test_average_rounded_to_two_decimals() {
        // ---
        let s = summarize([1.0, 2.0, 2.0]).unwrap();
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 2.0);
        assert_eq!(s.avg, 1.67);

        let s = summarize([298.1, 298.2, 298.4]).unwrap();
        assert_eq!(s.avg, 298.23);
    }

    #[test]
    fn test_average_is_not_clamped_into_range() {
        // ---
        let s = summarize([0.004, 0.004, 0.004]).unwrap();
        assert_eq!(s.min, 0.004);
        assert_eq!(s.avg, 0.0);
    }

    #[test]
    fn test_min_le_avg_le_max() {
        // ---
        let sequences: [&[f64]; 5] = [
            &[3.0, -1.0, 7.5, 2.25],
            &[1500.0, 1551.0, 1408.0],
            &[0.004, 0.004, 0.004],
            &[1.005, 1.005],
            &[310.0, 295.0, 320.0, 301.337],
        ];
        for seq in sequences {
            let s = summarize(seq.iter().copied()).unwrap();
            // Within rounding of the range
            assert!(
                s.min - 0.005 <= s.avg && s.avg <= s.max + 0.005,
                "{:?} -> {:?}",
                seq,
                s
            );
        }
    }

    #[test]
    fn test_order_does_not_matter() {
        // ---
        let a = summarize([5.0, 1.0, 3.0]).unwrap();
        let b = summarize([1.0, 3.0, 5.0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.avg, 3.0);
    }

    #[test]
    fn test_reading_statistics_per_channel() {
        // ---
        let readings = vec![reading(300.0, 1000, 10), reading(302.0, 2000, 20)];
        let stats = ReadingStatistics::from_readings(&readings).unwrap();

        assert_eq!(stats.count, 2);
        assert_eq!(stats.air_temp.avg, 301.0);
        assert_eq!(stats.process_temp.min, 310.0);
        assert_eq!(stats.rotational_speed.max, 2000.0);
        assert_eq!(stats.tool_wear.avg, 15.0);
        assert_eq!(stats.torque.avg, 40.0);
    }

    #[test]
    fn test_statistics_serialize_camel_case() {
        // ---
        let stats = ReadingStatistics::from_readings(&[reading(300.0, 1000, 10)]).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["rotationalSpeed"]["max"], 1000.0);
        assert!(json.get("toolWear").is_some());
    }
}
