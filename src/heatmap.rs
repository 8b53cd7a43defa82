use std::fs;
use std::io::Write as _;

use crate::config::{GradientStop, SensorLayout, TrackerConfig};
use crate::sensors::PressureFrame;

/// Map a normalized intensity in [0, 1] onto the piecewise-linear color
/// ramp. Out-of-range intensities clamp to the boundary stop's exact color.
pub fn interpolate_color(stops: &[GradientStop], value: f64) -> [u8; 3] {
    let clamped = value.clamp(0.0, 1.0);
    for pair in stops.windows(2) {
        let (current, next) = (pair[0], pair[1]);
        if clamped >= current.stop && clamped <= next.stop {
            let range = next.stop - current.stop;
            let range = if range > 0.0 { range } else { 1.0 };
            let t = (clamped - current.stop) / range;
            return [
                lerp_channel(current.color[0], next.color[0], t),
                lerp_channel(current.color[1], next.color[1], t),
                lerp_channel(current.color[2], next.color[2], t),
            ];
        }
    }
    stops.last().map(|s| s.color).unwrap_or([0, 0, 0])
}

fn lerp_channel(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round() as u8
}

/// Additive RGBA accumulation surface for the composited pressure field.
///
/// Deposits sum rather than occlude, so overlapping sensor influences blend
/// into a continuous field; quantization clamps on readout.
pub struct HeatmapSurface {
    width: u32,
    height: u32,
    accum: Vec<f32>,
}

impl HeatmapSurface {
    pub fn new(width: u32, height: u32) -> Self {
        HeatmapSurface {
            width,
            height,
            accum: vec![0.0; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn clear(&mut self) {
        self.accum.fill(0.0);
    }

    fn deposit(&mut self, x: u32, y: u32, color: [u8; 3], alpha: f64) {
        let idx = ((y * self.width + x) * 4) as usize;
        let alpha = alpha as f32;
        self.accum[idx] += color[0] as f32 * alpha;
        self.accum[idx + 1] += color[1] as f32 * alpha;
        self.accum[idx + 2] += color[2] as f32 * alpha;
        self.accum[idx + 3] += alpha;
    }

    /// Raw accumulated RGBA at one pixel (unclamped).
    pub fn rgba_at(&self, x: u32, y: u32) -> [f32; 4] {
        let idx = ((y * self.width + x) * 4) as usize;
        [
            self.accum[idx],
            self.accum[idx + 1],
            self.accum[idx + 2],
            self.accum[idx + 3],
        ]
    }

    /// Quantize to 8-bit RGBA, clamping each channel.
    pub fn rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.accum.len());
        for pixel in self.accum.chunks_exact(4) {
            out.push(pixel[0].min(255.0) as u8);
            out.push(pixel[1].min(255.0) as u8);
            out.push(pixel[2].min(255.0) as u8);
            out.push((pixel[3] * 255.0).min(255.0) as u8);
        }
        out
    }

    /// Dump the surface as a binary PPM (RGB over black) for inspection.
    pub fn write_ppm(&self, path: &str) -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        write!(file, "P6\n{} {}\n255\n", self.width, self.height)?;
        let rgba = self.rgba8();
        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        for pixel in rgba.chunks_exact(4) {
            rgb.extend_from_slice(&pixel[..3]);
        }
        file.write_all(&rgb)
    }
}

/// Composites each active sensor as a radial falloff centered at its layout
/// coordinate. Rendering is a pure function of the frame: the surface is
/// cleared first, so calling it again for the same snapshot is idempotent.
pub struct HeatmapRenderer {
    layout: SensorLayout,
    stops: Vec<GradientStop>,
    radius: f64,
    ceiling_kpa: f64,
}

impl HeatmapRenderer {
    pub fn new(
        layout: SensorLayout,
        stops: Vec<GradientStop>,
        radius: f64,
        ceiling_kpa: f64,
    ) -> Self {
        HeatmapRenderer {
            layout,
            stops,
            radius,
            ceiling_kpa,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        HeatmapRenderer::new(
            config.layout.clone(),
            config.gradient.clone(),
            config.sensor_radius_px,
            config.reference_ceiling_kpa,
        )
    }

    pub fn render(&self, frame: &PressureFrame, surface: &mut HeatmapSurface) {
        surface.clear();

        for (id, coord) in self.layout.iter() {
            let kpa = frame.get(id);
            if kpa <= 0.0 {
                continue;
            }

            let intensity = (kpa / self.ceiling_kpa).min(1.0);
            let color = interpolate_color(&self.stops, intensity);
            let inner_alpha = (0.35 + intensity).min(0.85);

            let x0 = (coord.x - self.radius).floor().max(0.0) as u32;
            let y0 = (coord.y - self.radius).floor().max(0.0) as u32;
            let x1 = ((coord.x + self.radius).ceil() as u32).min(surface.width().saturating_sub(1));
            let y1 = ((coord.y + self.radius).ceil() as u32).min(surface.height().saturating_sub(1));

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let dx = x as f64 - coord.x;
                    let dy = y as f64 - coord.y;
                    let dist = (dx * dx + dy * dy).sqrt();
                    if dist >= self.radius {
                        continue;
                    }
                    let alpha = inner_alpha * (1.0 - dist / self.radius);
                    surface.deposit(x, y, color, alpha);
                }
            }
        }
    }
}
