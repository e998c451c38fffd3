//! RGB to device-native color conversion
//!
//! Hue lights take hue/saturation/brightness on their own integer scales
//! (hue 0-65535, sat and bri 0-254). Nanoleaf panels are commanded with RGB
//! at this layer; the session scales it to the panel's HSB wire format.

use serde::Serialize;

use crate::error::LightError;

pub const HUB_HUE_MAX: u16 = 65535;
pub const HUB_SAT_MAX: u8 = 254;
pub const HUB_BRI_MAX: u8 = 254;

/// Validated RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Fallback when a request carries no color, so a bare "on" looks sane
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    pub fn new(r: i64, g: i64, b: i64) -> Result<Self, LightError> {
        Ok(Rgb {
            r: channel("r", r)?,
            g: channel("g", g)?,
            b: channel("b", b)?,
        })
    }

    /// Parse the `[r, g, b]` array form used by request bodies
    pub fn from_components(components: &[i64]) -> Result<Self, LightError> {
        match components {
            [r, g, b] => Rgb::new(*r, *g, *b),
            other => Err(LightError::InvalidColor(format!(
                "expected 3 components, got {}",
                other.len()
            ))),
        }
    }

    /// Standard RGB to HSV, each component in `[0, 1]` (hue wraps below 1)
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let v = max;
        if max == min {
            return (0.0, 0.0, v);
        }

        let delta = max - min;
        let s = delta / max;
        let rc = (max - r) / delta;
        let gc = (max - g) / delta;
        let bc = (max - b) / delta;

        let h = if r == max {
            bc - gc
        } else if g == max {
            2.0 + rc - bc
        } else {
            4.0 + gc - rc
        };

        ((h / 6.0).rem_euclid(1.0), s, v)
    }
}

fn channel(name: &str, value: i64) -> Result<u8, LightError> {
    u8::try_from(value)
        .map_err(|_| LightError::InvalidColor(format!("{name}={value} is outside 0-255")))
}

/// Color part of a Hue light state write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubColorCommand {
    pub hue: u16,
    pub sat: u8,
    pub bri: u8,
}

/// Nanoleaf color call; the panel consumes RGB directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PanelColorCommand {
    pub rgb: Rgb,
}

impl PanelColorCommand {
    /// Panel wire scale: hue 0-360, saturation and brightness 0-100
    pub fn wire_hsb(&self) -> (u16, u8, u8) {
        let (h, s, v) = self.rgb.to_hsv();
        (
            scale(h, 360.0) as u16,
            scale(s, 100.0) as u8,
            scale(v, 100.0) as u8,
        )
    }
}

fn scale(unit: f64, max: f64) -> f64 {
    (unit * max).round().clamp(0.0, max)
}

/// Hue-angle, saturation and brightness on the bridge's integer scales.
/// Range checking already happened when the `Rgb` was built.
pub fn to_hub_command(rgb: Rgb) -> HubColorCommand {
    let (h, s, v) = rgb.to_hsv();
    HubColorCommand {
        hue: scale(h, f64::from(HUB_HUE_MAX)) as u16,
        sat: scale(s, f64::from(HUB_SAT_MAX)) as u8,
        bri: scale(v, f64::from(HUB_BRI_MAX)) as u8,
    }
}

pub fn to_panel_color(rgb: Rgb) -> PanelColorCommand {
    PanelColorCommand { rgb }
}
