use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::calibration::Calibration;
use crate::config::{RegionMap, SensorLayout};
use crate::error::{TrackerError, TrackerResult};
use crate::sensors::RawFrame;

/// Session roll-up maintained by the persistence collaborator. The stored
/// `max_pressure_kpa` feeds the tracker's running-max watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub sample_count: u64,
    pub max_pressure_kpa: f64,
    pub duration_seconds: Option<f64>,
    pub region_averages: BTreeMap<String, f64>,
}

/// One persisted raw frame with its capture time (epoch seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    pub timestamp: f64,
    pub pressures: RawFrame,
}

/// Full session payload used for hydration and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub samples: Vec<StoredSample>,
}

impl SessionDetail {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Persistence collaborator consumed by the acquisition loop. Futures are
/// `'static` so a write can be spawned and settle behind the loop.
pub trait SessionStore: Send + Sync {
    fn append_sample(
        &self,
        session_id: &str,
        frame: RawFrame,
        timestamp: f64,
    ) -> BoxFuture<'static, TrackerResult<SessionSummary>>;

    fn load_session(&self, session_id: &str) -> BoxFuture<'static, TrackerResult<SessionDetail>>;

    fn end_session(&self, session_id: &str) -> BoxFuture<'static, TrackerResult<SessionSummary>>;
}

struct SessionRecord {
    id: String,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    sample_count: u64,
    max_pressure_kpa: f64,
    samples: Vec<StoredSample>,
}

/// In-process store with the reference backend's semantics: one open session
/// at a time, appends refused after end, running max raised per append, and
/// whole-session region averages in every summary.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, SessionRecord>>>,
    calibration: Calibration,
    layout: SensorLayout,
    regions: RegionMap,
}

impl MemoryStore {
    pub fn new(calibration: Calibration, layout: SensorLayout, regions: RegionMap) -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(BTreeMap::new())),
            calibration,
            layout,
            regions,
        }
    }

    /// Open a new session. Refused while another session is still open.
    pub fn start_session(&self) -> TrackerResult<SessionSummary> {
        let mut sessions = self.lock()?;
        if sessions.values().any(|record| record.end.is_none()) {
            return Err(TrackerError::AlreadyRunning);
        }

        let record = SessionRecord {
            id: format!("session_{}", Utc::now().timestamp_millis()),
            start: Utc::now(),
            end: None,
            sample_count: 0,
            max_pressure_kpa: 0.0,
            samples: Vec::new(),
        };
        let summary = self.summarize(&record);
        sessions.insert(record.id.clone(), record);
        Ok(summary)
    }

    fn lock(
        &self,
    ) -> TrackerResult<std::sync::MutexGuard<'_, BTreeMap<String, SessionRecord>>> {
        self.inner
            .lock()
            .map_err(|_| TrackerError::StorageError("store lock poisoned".to_string()))
    }

    fn append_sync(
        &self,
        session_id: &str,
        frame: RawFrame,
        timestamp: f64,
    ) -> TrackerResult<SessionSummary> {
        let mut sessions = self.lock()?;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| TrackerError::SessionNotFound(session_id.to_string()))?;
        if record.end.is_some() {
            return Err(TrackerError::SessionEnded);
        }

        let frame_max = self
            .layout
            .sensor_ids()
            .map(|id| self.calibration.apply(frame.get(id)))
            .fold(0.0, f64::max);

        record.samples.push(StoredSample {
            timestamp,
            pressures: frame,
        });
        record.sample_count += 1;
        if frame_max > record.max_pressure_kpa {
            record.max_pressure_kpa = frame_max;
        }

        Ok(self.summarize(record))
    }

    fn load_sync(&self, session_id: &str) -> TrackerResult<SessionDetail> {
        let sessions = self.lock()?;
        let record = sessions
            .get(session_id)
            .ok_or_else(|| TrackerError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionDetail {
            summary: self.summarize(record),
            samples: record.samples.clone(),
        })
    }

    fn end_sync(&self, session_id: &str) -> TrackerResult<SessionSummary> {
        let mut sessions = self.lock()?;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| TrackerError::SessionNotFound(session_id.to_string()))?;
        if record.end.is_none() {
            record.end = Some(Utc::now());
        }
        Ok(self.summarize(record))
    }

    fn summarize(&self, record: &SessionRecord) -> SessionSummary {
        let mut region_totals: BTreeMap<String, f64> =
            self.regions.names().map(|n| (n.to_string(), 0.0)).collect();

        for sample in &record.samples {
            for (name, sensors) in self.regions.iter() {
                if sensors.is_empty() {
                    continue;
                }
                let sum: f64 = sensors
                    .iter()
                    .map(|id| self.calibration.apply(sample.pressures.get(id)))
                    .sum();
                *region_totals.entry(name.to_string()).or_insert(0.0) +=
                    sum / sensors.len() as f64;
            }
        }

        let region_averages = if record.samples.is_empty() {
            region_totals
        } else {
            let count = record.samples.len() as f64;
            region_totals
                .into_iter()
                .map(|(name, total)| (name, round2(total / count)))
                .collect()
        };

        SessionSummary {
            id: record.id.clone(),
            start_time: record.start.to_rfc3339(),
            end_time: record.end.map(|end| end.to_rfc3339()),
            sample_count: record.sample_count,
            max_pressure_kpa: round2(record.max_pressure_kpa),
            duration_seconds: record
                .end
                .map(|end| round2((end - record.start).num_milliseconds() as f64 / 1000.0)),
            region_averages,
        }
    }
}

impl SessionStore for MemoryStore {
    fn append_sample(
        &self,
        session_id: &str,
        frame: RawFrame,
        timestamp: f64,
    ) -> BoxFuture<'static, TrackerResult<SessionSummary>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        Box::pin(async move { store.append_sync(&session_id, frame, timestamp) })
    }

    fn load_session(&self, session_id: &str) -> BoxFuture<'static, TrackerResult<SessionDetail>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        Box::pin(async move { store.load_sync(&session_id) })
    }

    fn end_session(&self, session_id: &str) -> BoxFuture<'static, TrackerResult<SessionSummary>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        Box::pin(async move { store.end_sync(&session_id) })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
