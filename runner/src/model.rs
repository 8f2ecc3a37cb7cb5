use std::{fmt, path::PathBuf};

/// A discovered model result, replicated identically on every worker
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub name: String,
    pub path: PathBuf,
    pub color: Color,
    // data files of the model, already narrowed down by extension and filter
    pub files: Vec<PathBuf>,
}

/// sRGB color used to tell models apart in plots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Color {
    /// convert hsv (all components in [0, 1]) into a rgb color
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let hue = (hue.rem_euclid(1.0)) * 6.0;
        let sector = hue.floor();
        let fraction = hue - sector;

        let p = value * (1.0 - saturation);
        let q = value * (1.0 - saturation * fraction);
        let t = value * (1.0 - saturation * (1.0 - fraction));

        let (r, g, b) = match sector as u8 {
            0 => (value, t, p),
            1 => (q, value, p),
            2 => (p, value, t),
            3 => (p, q, value),
            4 => (t, p, value),
            _ => (value, p, q),
        };

        let channel = |value: f64| (value * 255.0).round().clamp(0.0, 255.0) as u8;

        Self {
            r: channel(r),
            g: channel(g),
            b: channel(b),
        }
    }
}

/// Generate `count` colors with evenly spaced hues
///
/// Neighbouring hues alternate between two brightness levels so that adjacent
/// models stay distinguishable even for large palettes.
pub fn distinct_colors(count: usize) -> Vec<Color> {
    (0..count)
        .map(|index| {
            let hue = index as f64 / count as f64;
            let value = if index % 2 == 0 { 0.95 } else { 0.7 };

            Color::from_hsv(hue, 0.8, value)
        })
        .collect()
}
