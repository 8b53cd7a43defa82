use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Command;

use crate::calibration::Calibration;

/// One raw insole reading: sensor id -> voltage-like ADC value.
///
/// Missing sensor ids read as 0; the calibration clamps negatives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFrame(BTreeMap<String, f64>);

impl RawFrame {
    pub fn new() -> Self {
        RawFrame(BTreeMap::new())
    }

    pub fn set(&mut self, sensor_id: impl Into<String>, value: f64) {
        self.0.insert(sensor_id.into(), value);
    }

    pub fn get(&self, sensor_id: &str) -> f64 {
        self.0.get(sensor_id).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(id, value)| (id.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the per-channel calibration, producing a frame in kPa.
    pub fn calibrate(&self, calibration: Calibration) -> PressureFrame {
        PressureFrame(
            self.0
                .iter()
                .map(|(id, raw)| (id.clone(), calibration.apply(*raw)))
                .collect(),
        )
    }
}

impl FromIterator<(String, f64)> for RawFrame {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        RawFrame(iter.into_iter().collect())
    }
}

/// Calibrated frame in kPa, keyed like the raw frame it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PressureFrame(BTreeMap<String, f64>);

impl PressureFrame {
    pub fn get(&self, sensor_id: &str) -> f64 {
        self.0.get(sensor_id).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(id, value)| (id.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// External source of raw frames, polled once per acquisition tick.
pub trait SensorSource: Send {
    /// Poll the source once. `None` means nothing usable arrived this tick;
    /// the caller logs and waits for the next tick.
    fn fetch_current_reading(&mut self) -> BoxFuture<'_, Option<RawFrame>>;
}

/// Reads frames by invoking an external reader command that prints a single
/// JSON object per invocation, e.g. `{"fsr0": 1.2, "fsr1": 0.0, ...}`.
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    /// Split a command line into program + args.
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        CommandSource {
            program,
            args: parts.collect(),
        }
    }

    fn read_once(&self) -> Option<RawFrame> {
        let output = Command::new(&self.program).args(&self.args).output().ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines().find_map(parse_frame_line)
    }
}

impl SensorSource for CommandSource {
    fn fetch_current_reading(&mut self) -> BoxFuture<'_, Option<RawFrame>> {
        let frame = self.read_once();
        Box::pin(async move { frame })
    }
}

/// Parse one serial-style line into a frame. Lines that are not a complete
/// JSON object of numbers are skipped.
pub fn parse_frame_line(line: &str) -> Option<RawFrame> {
    let trimmed = line.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    serde_json::from_str::<RawFrame>(trimmed).ok()
}

/// Fallback source generating plausible per-sensor voltages in [0, 5] V.
/// Deterministic (phase-shifted sines per channel) so runs are repeatable.
pub struct SimulatedInsole {
    sensor_ids: Vec<String>,
    counter: u64,
}

impl SimulatedInsole {
    pub fn new(sensor_ids: impl IntoIterator<Item = String>) -> Self {
        SimulatedInsole {
            sensor_ids: sensor_ids.into_iter().collect(),
            counter: 0,
        }
    }

    fn next_frame(&mut self) -> RawFrame {
        let t = self.counter as f64 * 0.5;
        self.counter += 1;

        self.sensor_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let phase = i as f64 * 0.9;
                let volts = 2.5 + 2.25 * (t * 0.7 + phase).sin();
                (id.clone(), volts.clamp(0.0, 5.0))
            })
            .collect()
    }
}

impl SensorSource for SimulatedInsole {
    fn fetch_current_reading(&mut self) -> BoxFuture<'_, Option<RawFrame>> {
        let frame = self.next_frame();
        Box::pin(async move { Some(frame) })
    }
}
