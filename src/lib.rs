// Plantar pressure insole tracking core
// Calibration, regional aggregation, center-of-pressure, heatmap
// compositing and the fixed-period acquisition loop.

pub mod acquisition;
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod error;
pub mod heatmap;
pub mod history;
pub mod live_view;
pub mod sensors;
pub mod session;

pub use acquisition::{PressureTracker, TrackerState};
pub use analysis::{
    center_of_pressure, max_pressure, region_averages, total_pressure, CopEstimate, Snapshot,
};
pub use calibration::Calibration;
pub use config::{GradientStop, RegionMap, SensorCoord, SensorLayout, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use heatmap::{interpolate_color, HeatmapRenderer, HeatmapSurface};
pub use history::{HistoryBuffer, PressureWatermark};
pub use live_view::LiveView;
pub use sensors::{
    parse_frame_line, CommandSource, PressureFrame, RawFrame, SensorSource, SimulatedInsole,
};
pub use session::{MemoryStore, SessionDetail, SessionStore, SessionSummary, StoredSample};
