//! Static threshold anomaly detection for sensor readings.
//!
//! Thresholds are process-wide constants, not per-machine configuration.
//! Every check is an independent strict inequality, so a value sitting
//! exactly on a bound is never reported.

use std::fmt;

use crate::models::Measurements;

// ---

/// Operating bounds used to flag anomalous readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyThresholds {
    // ---
    pub air_temp_min: f64,
    pub air_temp_max: f64,
    pub process_temp_max: f64,
    pub rotational_speed_max: f64,
    pub tool_wear_max: f64,
    pub torque_min: f64,
    pub torque_max: f64,
}

pub const DEFAULT_THRESHOLDS: AnomalyThresholds = AnomalyThresholds {
    air_temp_min: 295.0,
    air_temp_max: 310.0,
    process_temp_max: 320.0,
    rotational_speed_max: 3000.0,
    tool_wear_max: 200.0,
    torque_min: 20.0,
    torque_max: 70.0,
};

impl Default for AnomalyThresholds {
    fn default() -> Self {
        DEFAULT_THRESHOLDS
    }
}

/// Which bound a measurement breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    AirTempLow,
    AirTempHigh,
    ProcessTempHigh,
    RotationalSpeedHigh,
    ToolWearHigh,
    TorqueLow,
    TorqueHigh,
}

/// A single threshold breach.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    // ---
    pub kind: ViolationKind,
    pub value: f64,
    pub bound: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let (v, b) = (self.value, self.bound);
        match self.kind {
            ViolationKind::AirTempLow => write!(f, "Air temperature too low: {v}K (min: {b}K)"),
            ViolationKind::AirTempHigh => write!(f, "Air temperature too high: {v}K (max: {b}K)"),
            ViolationKind::ProcessTempHigh => {
                write!(f, "Process temperature too high: {v}K (max: {b}K)")
            }
            ViolationKind::RotationalSpeedHigh => {
                write!(f, "Rotational speed too high: {v} RPM (max: {b} RPM)")
            }
            ViolationKind::ToolWearHigh => write!(f, "Tool wear critical: {v} min (max: {b} min)"),
            ViolationKind::TorqueLow => write!(f, "Torque too low: {v} Nm (min: {b} Nm)"),
            ViolationKind::TorqueHigh => write!(f, "Torque too high: {v} Nm (max: {b} Nm)"),
        }
    }
}

/// Evaluate a reading against the thresholds.
///
/// Violations come back in a fixed order: air-temp-low, air-temp-high,
/// process-temp-high, rotational-speed-high, tool-wear-high, torque-low,
/// torque-high.
pub fn evaluate(m: &Measurements, t: &AnomalyThresholds) -> Vec<Violation> {
    // ---
    let speed = f64::from(m.rotational_speed);
    let wear = f64::from(m.tool_wear);

    let checks = [
        (ViolationKind::AirTempLow, m.air_temp, t.air_temp_min, m.air_temp < t.air_temp_min),
        (ViolationKind::AirTempHigh, m.air_temp, t.air_temp_max, m.air_temp > t.air_temp_max),
        (
            ViolationKind::ProcessTempHigh,
            m.process_temp,
            t.process_temp_max,
            m.process_temp > t.process_temp_max,
        ),
        (
            ViolationKind::RotationalSpeedHigh,
            speed,
            t.rotational_speed_max,
            speed > t.rotational_speed_max,
        ),
        (ViolationKind::ToolWearHigh, wear, t.tool_wear_max, wear > t.tool_wear_max),
        (ViolationKind::TorqueLow, m.torque, t.torque_min, m.torque < t.torque_min),
        (ViolationKind::TorqueHigh, m.torque, t.torque_max, m.torque > t.torque_max),
    ];

    checks
        .into_iter()
        .filter(|(_, _, _, breached)| *breached)
        .map(|(kind, value, bound, _)| Violation { kind, value, bound })
        .collect()
}

/// Evaluate a reading and render each violation as a description.
pub fn detect(m: &Measurements, t: &AnomalyThresholds) -> Vec<String> {
    evaluate(m, t).iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn m(air: f64, process: f64, speed: i32, torque: f64, wear: i32) -> Measurements {
        Measurements {
            air_temp: air,
            process_temp: process,
            rotational_speed: speed,
            torque,
            tool_wear: wear,
        }
    }

    fn kinds(m: &Measurements) -> Vec<ViolationKind> {
        evaluate(m, &DEFAULT_THRESHOLDS)
            .into_iter()
            .map(|v| v.kind)
            .collect()
    }

    #[test]
    fn test_normal_reading_has_no_anomalies() {
        // ---
        assert!(detect(&m(300.0, 310.0, 1500, 40.0, 50), &DEFAULT_THRESHOLDS).is_empty());
    }

    #[test]
    fn test_air_temp_high_only() {
        // ---
        let reading = m(330.0, 300.0, 1000, 40.0, 50);
        assert_eq!(kinds(&reading), vec![ViolationKind::AirTempHigh]);
        assert_eq!(
            detect(&reading, &DEFAULT_THRESHOLDS),
            vec!["Air temperature too high: 330K (max: 310K)".to_string()]
        );
    }

    #[test]
    fn test_rotational_speed_high_only() {
        // ---
        let reading = m(300.0, 300.0, 3500, 40.0, 50);
        assert_eq!(kinds(&reading), vec![ViolationKind::RotationalSpeedHigh]);
        assert_eq!(
            detect(&reading, &DEFAULT_THRESHOLDS),
            vec!["Rotational speed too high: 3500 RPM (max: 3000 RPM)".to_string()]
        );
    }

    #[test]
    fn test_boundary_values_are_not_anomalies() {
        // ---
        let t = DEFAULT_THRESHOLDS;
        assert!(kinds(&m(t.air_temp_max, t.process_temp_max, 3000, t.torque_max, 200)).is_empty());
        assert!(kinds(&m(t.air_temp_min, 300.0, 0, t.torque_min, 0)).is_empty());
    }

    #[test]
    fn test_all_violations_reported_in_fixed_order() {
        // ---
        let low = m(280.0, 300.0, 1000, 10.0, 50);
        assert_eq!(
            kinds(&low),
            vec![ViolationKind::AirTempLow, ViolationKind::TorqueLow]
        );

        let high = m(315.0, 330.0, 3200, 90.0, 250);
        assert_eq!(
            kinds(&high),
            vec![
                ViolationKind::AirTempHigh,
                ViolationKind::ProcessTempHigh,
                ViolationKind::RotationalSpeedHigh,
                ViolationKind::ToolWearHigh,
                ViolationKind::TorqueHigh,
            ]
        );
    }

    #[test]
    fn test_detection_is_deterministic() {
        // ---
        let reading = m(315.5, 321.25, 3001, 70.5, 201);
        let first = detect(&reading, &DEFAULT_THRESHOLDS);
        for _ in 0..10 {
            assert_eq!(detect(&reading, &DEFAULT_THRESHOLDS), first);
        }
        assert_eq!(first.len(), 5);
        assert_eq!(first[1], "Process temperature too high: 321.25K (max: 320K)");
        assert_eq!(first[4], "Torque too high: 70.5 Nm (max: 70 Nm)");
    }

    #[test]
    fn test_custom_thresholds() {
        // ---
        let strict = AnomalyThresholds {
            tool_wear_max: 100.0,
            ..DEFAULT_THRESHOLDS
        };
        let reading = m(300.0, 300.0, 1000, 40.0, 150);
        assert_eq!(
            detect(&reading, &strict),
            vec!["Tool wear critical: 150 min (max: 100 min)".to_string()]
        );
        assert!(detect(&reading, &DEFAULT_THRESHOLDS).is_empty());
    }
}
