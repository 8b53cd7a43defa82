use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed 2D position of a sensor on the insole surface, in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorCoord {
    pub x: f64,
    pub y: f64,
}

/// Immutable mapping from sensor id to its fixed coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLayout {
    coords: BTreeMap<String, SensorCoord>,
}

impl SensorLayout {
    pub fn new(coords: impl IntoIterator<Item = (String, SensorCoord)>) -> Self {
        SensorLayout {
            coords: coords.into_iter().collect(),
        }
    }

    pub fn coord(&self, sensor_id: &str) -> Option<SensorCoord> {
        self.coords.get(sensor_id).copied()
    }

    /// Sensor ids in stable (sorted) order.
    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.coords.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SensorCoord)> {
        self.coords.iter().map(|(id, coord)| (id.as_str(), *coord))
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Immutable mapping from region name to its member sensor ids.
/// The partition is not required to cover every sensor in the layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionMap {
    regions: BTreeMap<String, Vec<String>>,
}

impl RegionMap {
    pub fn new(regions: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        RegionMap {
            regions: regions.into_iter().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.regions
            .iter()
            .map(|(name, sensors)| (name.as_str(), sensors.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// One color stop of the heatmap ramp, `stop` in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub stop: f64,
    pub color: [u8; 3],
}

/// Static configuration for one tracked session view.
///
/// These tables were module-level constants in earlier revisions; they are
/// injected at construction and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub layout: SensorLayout,
    pub regions: RegionMap,
    /// Ordered color stops for heatmap intensity mapping.
    pub gradient: Vec<GradientStop>,
    /// Calibration gain K in `K * raw^p`.
    pub calibration_gain: f64,
    /// Calibration exponent p in `K * raw^p`.
    pub calibration_exponent: f64,
    /// Minimum per-sensor pressure (kPa) for a sensor to pull on the CoP.
    pub contact_threshold_kpa: f64,
    /// Fixed normalization ceiling for heatmap colors, independent of the
    /// running-max watermark.
    pub reference_ceiling_kpa: f64,
    /// Radius of each sensor's radial falloff on the heatmap surface.
    pub sensor_radius_px: f64,
    pub surface_width: u32,
    pub surface_height: u32,
    /// History buffer capacity (snapshots).
    pub history_capacity: usize,
    /// Acquisition tick period.
    pub tick_period_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let layout = SensorLayout::new([
            ("fsr0".to_string(), SensorCoord { x: 160.0, y: 130.0 }),
            ("fsr1".to_string(), SensorCoord { x: 230.0, y: 140.0 }),
            ("fsr2".to_string(), SensorCoord { x: 175.0, y: 210.0 }),
            ("fsr3".to_string(), SensorCoord { x: 240.0, y: 225.0 }),
            ("fsr4".to_string(), SensorCoord { x: 200.0, y: 285.0 }),
            ("fsr5".to_string(), SensorCoord { x: 180.0, y: 350.0 }),
            ("fsr6".to_string(), SensorCoord { x: 250.0, y: 350.0 }),
        ]);

        let regions = RegionMap::new([
            (
                "forefoot".to_string(),
                vec!["fsr0".to_string(), "fsr1".to_string()],
            ),
            (
                "midfoot".to_string(),
                vec!["fsr2".to_string(), "fsr3".to_string()],
            ),
            (
                "heel".to_string(),
                vec![
                    "fsr4".to_string(),
                    "fsr5".to_string(),
                    "fsr6".to_string(),
                ],
            ),
        ]);

        let gradient = vec![
            GradientStop {
                stop: 0.0,
                color: [59, 130, 246],
            },
            GradientStop {
                stop: 0.55,
                color: [22, 163, 74],
            },
            GradientStop {
                stop: 0.85,
                color: [250, 204, 21],
            },
            GradientStop {
                stop: 1.0,
                color: [239, 68, 68],
            },
        ];

        TrackerConfig {
            layout,
            regions,
            gradient,
            calibration_gain: 100.0,
            calibration_exponent: 1.5,
            contact_threshold_kpa: 5.0,
            reference_ceiling_kpa: 400.0,
            sensor_radius_px: 80.0,
            surface_width: 420,
            surface_height: 450,
            history_capacity: 120,
            tick_period_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_has_seven_sensors() {
        let config = TrackerConfig::default();
        assert_eq!(config.layout.len(), 7);
        assert_eq!(
            config.layout.coord("fsr0"),
            Some(SensorCoord { x: 160.0, y: 130.0 })
        );
        assert_eq!(config.layout.coord("fsr9"), None);
    }

    #[test]
    fn test_default_regions_partition() {
        let config = TrackerConfig::default();
        let sizes: Vec<(String, usize)> = config
            .regions
            .iter()
            .map(|(name, sensors)| (name.to_string(), sensors.len()))
            .collect();
        assert!(sizes.contains(&("forefoot".to_string(), 2)));
        assert!(sizes.contains(&("midfoot".to_string(), 2)));
        assert!(sizes.contains(&("heel".to_string(), 3)));
    }

    #[test]
    fn test_gradient_stops_are_ordered() {
        let config = TrackerConfig::default();
        for pair in config.gradient.windows(2) {
            assert!(pair[0].stop < pair[1].stop);
        }
        assert_eq!(config.gradient.first().unwrap().stop, 0.0);
        assert_eq!(config.gradient.last().unwrap().stop, 1.0);
    }
}
