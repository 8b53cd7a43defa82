use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use crate::analysis::{
    center_of_pressure, max_pressure, region_averages, total_pressure, CopEstimate, Snapshot,
};
use crate::calibration::Calibration;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::heatmap::{HeatmapRenderer, HeatmapSurface};
use crate::history::{HistoryBuffer, PressureWatermark};
use crate::live_view::{current_timestamp, LiveView};
use crate::sensors::{PressureFrame, RawFrame, SensorSource};
use crate::session::{SessionDetail, SessionStore, SessionSummary};

/// Acquisition loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    /// Created but not polling
    Idle,
    /// Fixed-period ticks running
    Polling,
    /// Torn down; a new activation requires a new tracker
    Ended,
}

/// Acquisition pipeline for one active session view.
///
/// Exclusively owns the history buffer, watermark, current display frame
/// and heatmap surface; no external writer mutates them concurrently. One
/// persistence write may be outstanding at a time; further writes are
/// skipped (not queued) until it settles.
pub struct PressureTracker {
    config: TrackerConfig,
    calibration: Calibration,
    state: TrackerState,
    source: Box<dyn SensorSource>,
    store: Arc<dyn SessionStore>,
    session_id: String,
    summary: SessionSummary,
    history: HistoryBuffer,
    watermark: PressureWatermark,
    renderer: HeatmapRenderer,
    surface: HeatmapSurface,
    current_raw: Option<RawFrame>,
    current_frame: Option<PressureFrame>,
    cop: Option<CopEstimate>,
    region_breakdown: BTreeMap<String, f64>,
    update_seq: u64,
    write_in_flight: Arc<AtomicBool>,
    write_tx: mpsc::UnboundedSender<TrackerResult<SessionSummary>>,
    write_rx: mpsc::UnboundedReceiver<TrackerResult<SessionSummary>>,
    started_at: f64,
    tick_count: u64,
    fetch_failures: u64,
    writes_skipped: u64,
    write_failures: u64,
}

impl PressureTracker {
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn SessionStore>,
        source: Box<dyn SensorSource>,
        summary: SessionSummary,
    ) -> Self {
        let calibration = Calibration::new(config.calibration_gain, config.calibration_exponent);
        let history = HistoryBuffer::new(config.history_capacity);
        let renderer = HeatmapRenderer::from_config(&config);
        let surface = HeatmapSurface::new(config.surface_width, config.surface_height);
        let region_breakdown = config.regions.names().map(|n| (n.to_string(), 0.0)).collect();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        PressureTracker {
            session_id: summary.id.clone(),
            calibration,
            state: TrackerState::Idle,
            source,
            store,
            summary,
            history,
            watermark: PressureWatermark::new(),
            renderer,
            surface,
            current_raw: None,
            current_frame: None,
            cop: None,
            region_breakdown,
            update_seq: 0,
            write_in_flight: Arc::new(AtomicBool::new(false)),
            write_tx,
            write_rx,
            started_at: current_timestamp(),
            tick_count: 0,
            fetch_failures: 0,
            writes_skipped: 0,
            write_failures: 0,
            config,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn watermark_kpa(&self) -> f64 {
        self.watermark.kpa()
    }

    pub fn cop(&self) -> Option<CopEstimate> {
        self.cop
    }

    pub fn region_breakdown(&self) -> &BTreeMap<String, f64> {
        &self.region_breakdown
    }

    pub fn current_frame(&self) -> Option<&PressureFrame> {
        self.current_frame.as_ref()
    }

    pub fn surface(&self) -> &HeatmapSurface {
        &self.surface
    }

    /// Idle -> Polling, refused once the session carries an end time.
    pub fn activate(&mut self) -> TrackerResult<()> {
        if self.state != TrackerState::Idle {
            return Err(TrackerError::InvalidState(format!(
                "cannot activate from {:?}",
                self.state
            )));
        }
        if self.summary.end_time.is_some() {
            return Err(TrackerError::SessionEnded);
        }
        info!("[{}] polling started", self.session_id);
        self.state = TrackerState::Polling;
        Ok(())
    }

    /// Replace the history wholesale from a persisted sample log, seed the
    /// watermark and the live-display fields from it, and arm suppression
    /// for the next pipeline pass so the same data is not appended twice.
    pub fn hydrate(&mut self, detail: &SessionDetail) {
        self.summary = detail.summary.clone();
        self.watermark.observe(detail.summary.max_pressure_kpa);

        if detail.samples.is_empty() {
            return;
        }

        let mut snapshots = Vec::with_capacity(detail.samples.len());
        let mut stored_max = 0.0_f64;
        for sample in &detail.samples {
            let frame = sample.pressures.calibrate(self.calibration);
            stored_max = stored_max.max(max_pressure(&frame, &self.config.layout));
            snapshots.push(Snapshot::from_frame(
                &frame,
                &self.config.layout,
                &self.config.regions,
                sample.timestamp,
            ));
        }
        self.watermark.observe(stored_max);
        self.history.hydrate(snapshots);

        if let Some(last) = detail.samples.last() {
            let frame = last.pressures.calibrate(self.calibration);
            self.region_breakdown = region_averages(&frame, &self.config.regions);
            self.cop =
                center_of_pressure(&frame, &self.config.layout, self.config.contact_threshold_kpa);
            self.renderer.render(&frame, &mut self.surface);
            self.current_frame = Some(frame);
            self.current_raw = Some(last.pressures.clone());
        }

        self.history.suppress_next(self.update_seq + 1);
        info!(
            "[{}] hydrated {} snapshots from persisted log",
            self.session_id,
            self.history.len()
        );
    }

    /// One acquisition cycle: fetch, derive, display, then hand off to
    /// persistence unless a previous write is still outstanding. Every
    /// failure is absorbed here; nothing escapes to corrupt buffer or
    /// watermark invariants.
    pub async fn tick(&mut self) {
        if self.state != TrackerState::Polling {
            return;
        }
        self.tick_count += 1;

        self.drain_write_results();
        if self.state != TrackerState::Polling {
            return;
        }

        let raw = match self.source.fetch_current_reading().await {
            Some(raw) => raw,
            None => {
                self.fetch_failures += 1;
                warn!(
                    "[{}] sensor fetch returned nothing; waiting for next tick",
                    self.session_id
                );
                return;
            }
        };

        let timestamp = current_timestamp();
        self.process_frame(raw, timestamp);
        self.persist_current(timestamp);
    }

    /// Polling -> Ended. In-flight writes are not cancelled; their results
    /// are discarded on arrival since ticks no longer drain them.
    pub fn end(&mut self) {
        if self.state == TrackerState::Ended {
            return;
        }
        info!(
            "[{}] polling ended after {} ticks",
            self.session_id, self.tick_count
        );
        self.state = TrackerState::Ended;
    }

    /// Drive ticks at the configured period until the loop ends.
    pub async fn run(&mut self) {
        let mut ticker = interval(Duration::from_millis(self.config.tick_period_ms));
        while self.state == TrackerState::Polling {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub fn live_view(&self) -> LiveView {
        let now = current_timestamp();
        let total_kpa = self
            .current_frame
            .as_ref()
            .map(|frame| total_pressure(frame, &self.config.layout))
            .unwrap_or(0.0);
        let sensor_kpa = self
            .current_frame
            .as_ref()
            .map(|frame| frame.iter().map(|(id, v)| (id.to_string(), v)).collect())
            .unwrap_or_default();

        LiveView {
            timestamp: now,
            uptime_seconds: (now - self.started_at).max(0.0) as u64,
            tick_count: self.tick_count,
            fetch_failures: self.fetch_failures,
            writes_skipped: self.writes_skipped,
            write_failures: self.write_failures,
            samples_persisted: self.summary.sample_count,
            max_pressure_kpa: self.watermark.kpa(),
            total_kpa,
            cop_contact: self.cop.is_some(),
            cop_x: self.cop.map(|c| c.x).unwrap_or(0.0),
            cop_y: self.cop.map(|c| c.y).unwrap_or(0.0),
            region_averages: self.region_breakdown.clone(),
            sensor_kpa,
            history_len: self.history.len(),
        }
    }

    fn process_frame(&mut self, raw: RawFrame, timestamp: f64) {
        let frame = raw.calibrate(self.calibration);
        let snapshot = Snapshot::from_frame(
            &frame,
            &self.config.layout,
            &self.config.regions,
            timestamp,
        );

        self.watermark
            .observe(max_pressure(&frame, &self.config.layout));
        self.cop = center_of_pressure(&frame, &self.config.layout, self.config.contact_threshold_kpa);
        self.region_breakdown = snapshot.regions.clone();

        self.update_seq += 1;
        self.history.push_live(snapshot, self.update_seq);

        self.renderer.render(&frame, &mut self.surface);
        self.current_frame = Some(frame);
        self.current_raw = Some(raw);
    }

    fn persist_current(&mut self, timestamp: f64) {
        let Some(raw) = self.current_raw.clone() else {
            return;
        };

        if self.write_in_flight.load(Ordering::Acquire) {
            self.writes_skipped += 1;
            debug!(
                "[{}] persistence write outstanding; skipping this tick's write",
                self.session_id
            );
            return;
        }

        self.write_in_flight.store(true, Ordering::Release);
        let guard = Arc::clone(&self.write_in_flight);
        let tx = self.write_tx.clone();
        let write = self.store.append_sample(&self.session_id, raw, timestamp);
        tokio::spawn(async move {
            let result = write.await;
            // Cleared whether the write succeeded or failed.
            guard.store(false, Ordering::Release);
            let _ = tx.send(result);
        });
    }

    fn drain_write_results(&mut self) {
        while let Ok(result) = self.write_rx.try_recv() {
            match result {
                Ok(summary) => {
                    self.watermark.observe(summary.max_pressure_kpa);
                    let ended = summary.end_time.is_some();
                    self.summary = summary;
                    if ended {
                        self.end();
                    }
                }
                Err(err) => {
                    self.write_failures += 1;
                    warn!("[{}] persistence write failed: {err}", self.session_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryStore, StoredSample};
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    fn test_frame(volts: f64) -> RawFrame {
        let mut frame = RawFrame::new();
        frame.set("fsr0", volts);
        frame
    }

    fn test_summary(id: &str, max_kpa: f64, end_time: Option<&str>) -> SessionSummary {
        SessionSummary {
            id: id.to_string(),
            start_time: "2026-08-06T10:00:00+00:00".to_string(),
            end_time: end_time.map(str::to_string),
            sample_count: 0,
            max_pressure_kpa: max_kpa,
            duration_seconds: None,
            region_averages: BTreeMap::new(),
        }
    }

    /// Source replaying a fixed script; an exhausted script reads as a
    /// fetch failure.
    struct ScriptedSource {
        frames: VecDeque<Option<RawFrame>>,
    }

    impl ScriptedSource {
        fn new(frames: impl IntoIterator<Item = Option<RawFrame>>) -> Self {
            ScriptedSource {
                frames: frames.into_iter().collect(),
            }
        }
    }

    impl SensorSource for ScriptedSource {
        fn fetch_current_reading(&mut self) -> BoxFuture<'_, Option<RawFrame>> {
            let frame = self.frames.pop_front().flatten();
            Box::pin(async move { frame })
        }
    }

    struct RepeatingSource {
        frame: RawFrame,
    }

    impl SensorSource for RepeatingSource {
        fn fetch_current_reading(&mut self) -> BoxFuture<'_, Option<RawFrame>> {
            let frame = self.frame.clone();
            Box::pin(async move { Some(frame) })
        }
    }

    /// Store whose writes block on a semaphore until the test releases them.
    struct GatedStore {
        gate: Arc<Semaphore>,
        appended: Arc<Mutex<Vec<f64>>>,
        summary: SessionSummary,
    }

    impl SessionStore for GatedStore {
        fn append_sample(
            &self,
            _session_id: &str,
            _frame: RawFrame,
            timestamp: f64,
        ) -> BoxFuture<'static, TrackerResult<SessionSummary>> {
            let gate = self.gate.clone();
            let appended = self.appended.clone();
            let summary = self.summary.clone();
            Box::pin(async move {
                let permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|_| TrackerError::StorageError("gate closed".to_string()))?;
                permit.forget();
                appended.lock().unwrap().push(timestamp);
                Ok(summary)
            })
        }

        fn load_session(
            &self,
            session_id: &str,
        ) -> BoxFuture<'static, TrackerResult<SessionDetail>> {
            let session_id = session_id.to_string();
            Box::pin(async move { Err(TrackerError::SessionNotFound(session_id)) })
        }

        fn end_session(
            &self,
            _session_id: &str,
        ) -> BoxFuture<'static, TrackerResult<SessionSummary>> {
            Box::pin(async move {
                Err(TrackerError::StorageError("not supported".to_string()))
            })
        }
    }

    fn tracker_with_gated_store(
        summary: SessionSummary,
        permits: usize,
    ) -> (PressureTracker, Arc<Semaphore>, Arc<Mutex<Vec<f64>>>) {
        let gate = Arc::new(Semaphore::new(permits));
        let appended = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(GatedStore {
            gate: gate.clone(),
            appended: appended.clone(),
            summary: summary.clone(),
        });
        let source = Box::new(RepeatingSource {
            frame: test_frame(1.0),
        });
        let tracker = PressureTracker::new(TrackerConfig::default(), store, source, summary);
        (tracker, gate, appended)
    }

    #[tokio::test]
    async fn test_outstanding_write_skips_but_display_updates() {
        let summary = test_summary("session_1", 250.0, None);
        let (mut tracker, gate, appended) = tracker_with_gated_store(summary, 0);
        tracker.activate().unwrap();

        // First tick spawns a write that stays blocked on the gate.
        tracker.tick().await;
        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.live_view().writes_skipped, 0);

        // Second tick: write still outstanding, so it skips its own write
        // while the display frame still advances.
        tracker.tick().await;
        assert_eq!(tracker.history().len(), 2);
        assert_eq!(tracker.live_view().writes_skipped, 1);
        assert!(appended.lock().unwrap().is_empty());

        // Release the delayed write and let it settle.
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(appended.lock().unwrap().len(), 1);

        // A subsequent tick is free to write again.
        tracker.tick().await;
        assert_eq!(tracker.live_view().writes_skipped, 1);
        assert_eq!(tracker.history().len(), 3);
        // The settled summary raised the watermark past the frame max.
        assert_eq!(tracker.watermark_kpa(), 250.0);
    }

    #[tokio::test]
    async fn test_fetch_failure_mutates_nothing() {
        let summary = test_summary("session_1", 0.0, None);
        let gate = Arc::new(Semaphore::new(1000));
        let appended = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(GatedStore {
            gate,
            appended: appended.clone(),
            summary: summary.clone(),
        });
        let source = Box::new(ScriptedSource::new([None, Some(test_frame(1.0))]));
        let mut tracker =
            PressureTracker::new(TrackerConfig::default(), store, source, summary);
        tracker.activate().unwrap();

        tracker.tick().await;
        let view = tracker.live_view();
        assert_eq!(view.fetch_failures, 1);
        assert_eq!(view.history_len, 0);
        assert_eq!(tracker.watermark_kpa(), 0.0);
        assert!(tracker.cop().is_none());
        assert!(appended.lock().unwrap().is_empty());

        // The loop keeps going: the next tick processes normally.
        tracker.tick().await;
        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.watermark_kpa(), 100.0);
    }

    #[tokio::test]
    async fn test_hydration_suppresses_duplicate_append() {
        let config = TrackerConfig::default();
        let store = Arc::new(MemoryStore::new(
            Calibration::default(),
            config.layout.clone(),
            config.regions.clone(),
        ));
        let summary = store.start_session().unwrap();
        for i in 0..50 {
            store
                .append_sample(&summary.id, test_frame(1.0), i as f64)
                .await
                .unwrap();
        }
        let detail = store.load_session(&summary.id).await.unwrap();

        let source = Box::new(RepeatingSource {
            frame: test_frame(1.0),
        });
        let mut tracker = PressureTracker::new(
            config,
            store.clone(),
            source,
            detail.summary.clone(),
        );
        tracker.hydrate(&detail);
        assert_eq!(tracker.history().len(), 50);
        assert_eq!(tracker.watermark_kpa(), 100.0);
        assert!(tracker.current_frame().is_some());

        tracker.activate().unwrap();

        // The next pipeline pass re-derives the same data: display only.
        tracker.tick().await;
        assert_eq!(tracker.history().len(), 50);

        // Subsequent ticks append normally.
        tracker.tick().await;
        assert_eq!(tracker.history().len(), 51);
    }

    #[tokio::test]
    async fn test_hydration_of_empty_log_does_not_arm_suppression() {
        let summary = test_summary("session_1", 10.0, None);
        let (mut tracker, _gate, _appended) =
            tracker_with_gated_store(summary.clone(), 1000);

        tracker.hydrate(&SessionDetail {
            summary,
            samples: Vec::new(),
        });
        assert_eq!(tracker.watermark_kpa(), 10.0);

        tracker.activate().unwrap();
        tracker.tick().await;
        assert_eq!(tracker.history().len(), 1);
    }

    #[tokio::test]
    async fn test_activate_refused_for_ended_session() {
        let summary = test_summary("session_1", 0.0, Some("2026-08-06T11:00:00+00:00"));
        let (mut tracker, _gate, _appended) = tracker_with_gated_store(summary, 0);
        assert!(matches!(
            tracker.activate(),
            Err(TrackerError::SessionEnded)
        ));
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[tokio::test]
    async fn test_ended_loop_ignores_ticks() {
        let summary = test_summary("session_1", 0.0, None);
        let (mut tracker, _gate, _appended) = tracker_with_gated_store(summary, 0);
        tracker.activate().unwrap();
        tracker.end();

        tracker.tick().await;
        assert_eq!(tracker.state(), TrackerState::Ended);
        assert_eq!(tracker.live_view().tick_count, 0);
        assert_eq!(tracker.history().len(), 0);
    }

    #[tokio::test]
    async fn test_settled_summary_with_end_time_ends_loop() {
        let summary = test_summary("session_1", 5.0, Some("2026-08-06T11:00:00+00:00"));
        let (mut tracker, _gate, _appended) = tracker_with_gated_store(summary.clone(), 1000);
        // Activation happens against the open session; the store reports the
        // end time on a later write settle.
        tracker.summary.end_time = None;
        tracker.activate().unwrap();

        tracker.tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Next tick drains the ended summary and stops polling.
        tracker.tick().await;
        assert_eq!(tracker.state(), TrackerState::Ended);
        // The tick that observed the end did not fetch a new frame.
        assert_eq!(tracker.history().len(), 1);
    }

    #[tokio::test]
    async fn test_hydration_truncates_to_capacity() {
        let mut config = TrackerConfig::default();
        config.history_capacity = 10;
        let store = Arc::new(MemoryStore::new(
            Calibration::default(),
            config.layout.clone(),
            config.regions.clone(),
        ));
        let summary = store.start_session().unwrap();
        let samples: Vec<StoredSample> = (0..25)
            .map(|i| StoredSample {
                timestamp: i as f64,
                pressures: test_frame(1.0),
            })
            .collect();
        let detail = SessionDetail {
            summary: summary.clone(),
            samples,
        };

        let source = Box::new(RepeatingSource {
            frame: test_frame(1.0),
        });
        let mut tracker = PressureTracker::new(config, store, source, summary);
        tracker.hydrate(&detail);

        assert_eq!(tracker.history().len(), 10);
        assert_eq!(tracker.history().iter().next().unwrap().timestamp, 15.0);
        assert_eq!(tracker.history().latest().unwrap().timestamp, 24.0);
    }
}
