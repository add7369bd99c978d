//! Synthetic sensor data for the `seed` and `simulate` tools.
//!
//! Each machine type runs around its own baseline: higher quality variants
//! run warmer and faster. Normal readings stay inside the anomaly
//! thresholds apart from tool wear, which grows with the reading index.
//! Forced anomalies breach the temperature and torque thresholds at once;
//! the high quality variant also overspeeds.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{
    CreateMachineRequest, MachineType, Measurements, AIR_TEMP_RANGE, PROCESS_TEMP_RANGE,
    ROTATIONAL_SPEED_RANGE, TOOL_WEAR_RANGE, TORQUE_RANGE,
};

/// Machines created by the seed tool.
pub const SEED_MACHINES: [(&str, MachineType); 3] = [
    ("H29424", MachineType::H),
    ("M14860", MachineType::M),
    ("L47181", MachineType::L),
];

pub const HISTORY_PER_MACHINE: usize = 100;
pub const HISTORY_SPACING_MINUTES: i64 = 5;

/// Chance that a live reading is a forced anomaly.
pub const ANOMALY_RATE: f64 = 0.1;

// ---

/// Operating point of one machine type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    // ---
    pub air_temp: f64,
    pub rotational_speed: f64,
}

pub fn baseline(machine_type: MachineType) -> Baseline {
    // ---
    match machine_type {
        MachineType::H => Baseline {
            air_temp: 305.0,
            rotational_speed: 2000.0,
        },
        MachineType::M => Baseline {
            air_temp: 300.0,
            rotational_speed: 1500.0,
        },
        MachineType::L => Baseline {
            air_temp: 298.0,
            rotational_speed: 1000.0,
        },
    }
}

pub fn seed_machines() -> Vec<CreateMachineRequest> {
    SEED_MACHINES
        .iter()
        .map(|(product_id, machine_type)| CreateMachineRequest {
            product_id: product_id.to_string(),
            machine_type: *machine_type,
        })
        .collect()
}

/// Random reading source; seedable so runs can be replayed.
pub struct ReadingGenerator {
    rng: StdRng,
}

impl ReadingGenerator {
    // ---
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Roll the live anomaly dice.
    pub fn roll_anomaly(&mut self) -> bool {
        self.rng.gen_bool(ANOMALY_RATE)
    }

    /// Normal reading for position `index` of a machine's history.
    pub fn historical(&mut self, machine_type: MachineType, index: usize) -> Measurements {
        // ---
        let base = baseline(machine_type);
        let wear = 50.0 + index as f64 * 1.5 + self.rng.gen_range(0.0..10.0);
        self.normal(base, wear)
    }

    /// Reading for tick `tick` of the live simulator.
    pub fn live(&mut self, machine_type: MachineType, anomaly: bool, tick: u64) -> Measurements {
        // ---
        let base = baseline(machine_type);
        let wear = 100.0 + tick as f64 * 2.0 + self.rng.gen_range(0.0..20.0);
        if !anomaly {
            return self.normal(base, wear);
        }

        let swing = if self.rng.gen_bool(0.5) { 15.0 } else { -15.0 };
        bounded(
            base.air_temp + swing,
            base.air_temp + 25.0,
            base.rotational_speed + 1500.0,
            75.0 + self.rng.gen_range(0.0..10.0),
            wear,
        )
    }

    fn normal(&mut self, base: Baseline, wear: f64) -> Measurements {
        // ---
        bounded(
            base.air_temp + self.rng.gen_range(-2.5..2.5),
            base.air_temp + 10.0 + self.rng.gen_range(-2.5..2.5),
            base.rotational_speed + self.rng.gen_range(-100.0..100.0),
            40.0 + self.rng.gen_range(-10.0..10.0),
            wear,
        )
    }
}

impl Default for ReadingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp into the accepted ranges; integer channels are floored.
fn bounded(air: f64, process: f64, speed: f64, torque: f64, wear: f64) -> Measurements {
    // ---
    let clamp = |value: f64, min: f64, max: f64| value.max(min).min(max);
    Measurements {
        air_temp: clamp(air, AIR_TEMP_RANGE.min, AIR_TEMP_RANGE.max),
        process_temp: clamp(process, PROCESS_TEMP_RANGE.min, PROCESS_TEMP_RANGE.max),
        rotational_speed: clamp(speed.floor(), ROTATIONAL_SPEED_RANGE.min, ROTATIONAL_SPEED_RANGE.max)
            as i32,
        torque: clamp(torque, TORQUE_RANGE.min, TORQUE_RANGE.max),
        tool_wear: clamp(wear.floor(), TOOL_WEAR_RANGE.min, TOOL_WEAR_RANGE.max) as i32,
    }
}
