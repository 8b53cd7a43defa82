/// Voltage-to-pressure transfer for a single FSR channel.
///
/// `kpa = gain * max(raw, 0)^exponent`. Monotonic non-decreasing in `raw`
/// and exactly zero at zero; negative readings clamp to zero before the
/// power is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub gain: f64,
    pub exponent: f64,
}

impl Calibration {
    pub fn new(gain: f64, exponent: f64) -> Self {
        Calibration { gain, exponent }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        self.gain * raw.max(0.0).powf(self.exponent)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            gain: 100.0,
            exponent: 1.5,
        }
    }
}
