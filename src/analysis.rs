use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{RegionMap, SensorLayout};
use crate::sensors::PressureFrame;

/// Pressure-weighted centroid of the active sensor positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CopEstimate {
    pub x: f64,
    pub y: f64,
}

/// Per-region mean of the member sensors' calibrated pressures.
/// A region with no member sensors averages to 0.
pub fn region_averages(frame: &PressureFrame, regions: &RegionMap) -> BTreeMap<String, f64> {
    let mut result = BTreeMap::new();
    for (name, sensors) in regions.iter() {
        let average = if sensors.is_empty() {
            0.0
        } else {
            let sum: f64 = sensors.iter().map(|id| frame.get(id)).sum();
            sum / sensors.len() as f64
        };
        result.insert(name.to_string(), average);
    }
    result
}

/// Sum of calibrated pressures over every sensor in the layout, including
/// sensors that belong to no region.
pub fn total_pressure(frame: &PressureFrame, layout: &SensorLayout) -> f64 {
    layout.sensor_ids().map(|id| frame.get(id)).sum()
}

/// Highest calibrated pressure over every sensor in the layout.
pub fn max_pressure(frame: &PressureFrame, layout: &SensorLayout) -> f64 {
    layout
        .sensor_ids()
        .map(|id| frame.get(id))
        .fold(0.0, f64::max)
}

/// Weighted centroid over sensors whose pressure strictly exceeds the
/// contact threshold. `None` when no sensor qualifies: a lifted foot has no
/// center of pressure, which is distinct from one at (0, 0).
pub fn center_of_pressure(
    frame: &PressureFrame,
    layout: &SensorLayout,
    threshold_kpa: f64,
) -> Option<CopEstimate> {
    let mut weighted_x = 0.0;
    let mut weighted_y = 0.0;
    let mut weight = 0.0;

    for (id, coord) in layout.iter() {
        let kpa = frame.get(id);
        if kpa > threshold_kpa {
            weighted_x += coord.x * kpa;
            weighted_y += coord.y * kpa;
            weight += kpa;
        }
    }

    if weight > 0.0 {
        Some(CopEstimate {
            x: weighted_x / weight,
            y: weighted_y / weight,
        })
    } else {
        None
    }
}

/// One timestamped, fully derived summary stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Epoch seconds.
    pub timestamp: f64,
    /// Sum over all layout sensors, kPa.
    pub total: f64,
    /// Per-region averages, kPa.
    pub regions: BTreeMap<String, f64>,
}

impl Snapshot {
    /// Fan one calibrated frame into the total and per-region reductions.
    pub fn from_frame(
        frame: &PressureFrame,
        layout: &SensorLayout,
        regions: &RegionMap,
        timestamp: f64,
    ) -> Self {
        Snapshot {
            timestamp,
            total: total_pressure(frame, layout),
            regions: region_averages(frame, regions),
        }
    }
}
