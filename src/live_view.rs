use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

/// Display-state handoff for the UI collaborator, dumped as JSON once every
/// few ticks and once at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveView {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub tick_count: u64,
    pub fetch_failures: u64,
    pub writes_skipped: u64,
    pub write_failures: u64,
    pub samples_persisted: u64,
    /// Running-max watermark, kPa.
    pub max_pressure_kpa: f64,
    /// Total of the current frame, kPa.
    pub total_kpa: f64,
    pub cop_contact: bool,
    pub cop_x: f64,
    pub cop_y: f64,
    pub region_averages: BTreeMap<String, f64>,
    /// Current per-sensor calibrated pressures, kPa.
    pub sensor_kpa: BTreeMap<String, f64>,
    pub history_len: usize,
}

impl LiveView {
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
