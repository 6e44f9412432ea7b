//! Pen state and the color model behind it.
//!
//! Color is kept as four 0–100 components (hue, saturation, brightness,
//! transparency). The RGBA handed to the renderer is always derived from
//! them on demand.

use crate::host_api::PenAttributes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub const PEN_SIZE_MIN: f64 = 1.0;
pub const PEN_SIZE_MAX: f64 = 1200.0;
pub const DEFAULT_COLOR: f64 = 66.66;
pub const DEFAULT_SHADE: f64 = 50.0;

pub const RGB_BLACK: Rgb = Rgb {
    r: 0.0,
    g: 0.0,
    b: 0.0,
};
pub const RGB_WHITE: Rgb = Rgb {
    r: 255.0,
    g: 255.0,
    b: 255.0,
};

/// RGB with channels in `0.0..=255.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// Hue in degrees, saturation and value in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

/// Channels are floored to whole 0–255 steps.
pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    let mut h = hsv.h % 360.0;
    if h < 0.0 {
        h += 360.0;
    }
    let s = hsv.s.clamp(0.0, 1.0);
    let v = hsv.v.clamp(0.0, 1.0);

    let i = (h / 60.0).floor();
    let f = h / 60.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match i as i32 {
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        5 => (v, p, q),
        _ => (v, t, p),
    };

    Rgb {
        r: (r * 255.0).floor(),
        g: (g * 255.0).floor(),
        b: (b * 255.0).floor(),
    }
}

pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let r = rgb.r / 255.0;
    let g = rgb.g / 255.0;
    let b = rgb.b / 255.0;
    let x = r.min(g).min(b);
    let v = r.max(g).max(b);

    let mut h = 0.0;
    let mut s = 0.0;
    if x != v {
        let f = if r == x {
            g - b
        } else if g == x {
            b - r
        } else {
            r - g
        };
        let i = if r == x {
            3.0
        } else if g == x {
            5.0
        } else {
            1.0
        };
        h = ((i - f / (v - x)) * 60.0) % 360.0;
        s = (v - x) / v;
    }

    Hsv { h, s, v }
}

/// Linear mix; `fraction1` is the weight of `rgb1`.
pub fn mix_rgb(rgb0: Rgb, rgb1: Rgb, fraction1: f64) -> Rgb {
    if fraction1 <= 0.0 {
        return rgb0;
    }
    if fraction1 >= 1.0 {
        return rgb1;
    }
    let fraction0 = 1.0 - fraction1;
    Rgb {
        r: fraction0 * rgb0.r + fraction1 * rgb1.r,
        g: fraction0 * rgb0.g + fraction1 * rgb1.g,
        b: fraction0 * rgb0.b + fraction1 * rgb1.b,
    }
}

/// Wraps `n` into `[min, max]` where the range is inclusive of both ends.
pub fn wrap_clamp(n: f64, min: f64, max: f64) -> f64 {
    let range = (max - min) + 1.0;
    n - ((n - min) / range).floor() * range
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorParam {
    Color,
    Saturation,
    Brightness,
    Transparency,
}

impl ColorParam {
    pub const ALL: [ColorParam; 4] = [
        ColorParam::Color,
        ColorParam::Saturation,
        ColorParam::Brightness,
        ColorParam::Transparency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColorParam::Color => "color",
            ColorParam::Saturation => "saturation",
            ColorParam::Brightness => "brightness",
            ColorParam::Transparency => "transparency",
        }
    }
}

impl fmt::Display for ColorParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown color parameter: {0}")]
pub struct UnknownColorParam(pub String);

impl FromStr for ColorParam {
    type Err = UnknownColorParam;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "color" => Ok(ColorParam::Color),
            "saturation" => Ok(ColorParam::Saturation),
            "brightness" => Ok(ColorParam::Brightness),
            "transparency" => Ok(ColorParam::Transparency),
            other => Err(UnknownColorParam(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PenState {
    pub pen_down: bool,
    color: f64,
    saturation: f64,
    brightness: f64,
    transparency: f64,
    /// Last legacy shade; it cannot be recovered from the HSV components.
    shade: f64,
    diameter: f64,
}

impl Default for PenState {
    fn default() -> Self {
        Self {
            pen_down: false,
            color: DEFAULT_COLOR,
            saturation: 100.0,
            brightness: 100.0,
            transparency: 0.0,
            shade: DEFAULT_SHADE,
            diameter: 1.0,
        }
    }
}

impl PenState {
    pub fn color(&self) -> f64 {
        self.color
    }

    pub fn saturation(&self) -> f64 {
        self.saturation
    }

    pub fn brightness(&self) -> f64 {
        self.brightness
    }

    pub fn transparency(&self) -> f64 {
        self.transparency
    }

    pub fn shade(&self) -> f64 {
        self.shade
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn rgba(&self) -> [f64; 4] {
        let rgb = hsv_to_rgb(Hsv {
            h: self.color * 360.0 / 100.0,
            s: self.saturation / 100.0,
            v: self.brightness / 100.0,
        });
        [
            rgb.r / 255.0,
            rgb.g / 255.0,
            rgb.b / 255.0,
            1.0 - self.transparency / 100.0,
        ]
    }

    pub fn attributes(&self) -> PenAttributes {
        PenAttributes {
            color4f: self.rgba(),
            diameter: self.diameter,
        }
    }

    /// Replaces the color components with the HSV reading of `rgba`.
    pub fn set_rgba(&mut self, rgba: [f64; 4]) {
        let hsv = rgb_to_hsv(Rgb {
            r: rgba[0] * 255.0,
            g: rgba[1] * 255.0,
            b: rgba[2] * 255.0,
        });
        self.color = 100.0 * hsv.h / 360.0;
        self.saturation = 100.0 * hsv.s;
        self.brightness = 100.0 * hsv.v;
        self.transparency = ((1.0 - rgba[3]) * 100.0).clamp(0.0, 100.0);
    }

    pub fn set_or_change(&mut self, param: ColorParam, value: f64, change: bool) {
        match param {
            ColorParam::Color => {
                let base = if change { self.color } else { 0.0 };
                self.color = wrap_clamp(value + base, 0.0, 100.0);
            }
            ColorParam::Saturation => {
                let base = if change { self.saturation } else { 0.0 };
                self.saturation = (value + base).clamp(0.0, 100.0);
            }
            ColorParam::Brightness => {
                let base = if change { self.brightness } else { 0.0 };
                self.brightness = (value + base).clamp(0.0, 100.0);
            }
            ColorParam::Transparency => {
                let base = if change { self.transparency } else { 0.0 };
                self.transparency = (value + base).clamp(0.0, 100.0);
            }
        }
    }

    /// Like [`set_or_change`](Self::set_or_change) but takes the menu value as text.
    pub fn set_or_change_named(&mut self, param: &str, value: f64, change: bool) {
        match param.parse::<ColorParam>() {
            Ok(param) => self.set_or_change(param, value, change),
            Err(e) => warn!("tried to set or change {e}"),
        }
    }

    pub fn set_diameter(&mut self, size: f64) {
        self.diameter = size.clamp(PEN_SIZE_MIN, PEN_SIZE_MAX);
    }

    pub fn change_diameter(&mut self, delta: f64) {
        self.set_diameter(self.diameter + delta);
    }

    /// Legacy hue is twice the color scale; also resets transparency.
    pub fn set_legacy_hue(&mut self, hue: f64) {
        self.set_or_change(ColorParam::Color, hue / 2.0, false);
        self.set_or_change(ColorParam::Transparency, 0.0, false);
        self.legacy_update();
    }

    pub fn change_legacy_hue(&mut self, delta: f64) {
        self.set_or_change(ColorParam::Color, delta / 2.0, true);
        self.legacy_update();
    }

    pub fn set_legacy_shade(&mut self, shade: f64) {
        let mut shade = shade % 200.0;
        if shade < 0.0 {
            shade += 200.0;
        }
        self.shade = shade;
        self.legacy_update();
    }

    pub fn change_legacy_shade(&mut self, delta: f64) {
        self.set_legacy_shade(self.shade + delta);
    }

    fn legacy_update(&mut self) {
        let mut rgb = hsv_to_rgb(Hsv {
            h: self.color * 360.0 / 100.0,
            s: 1.0,
            v: 1.0,
        });
        let shade = if self.shade > 100.0 {
            200.0 - self.shade
        } else {
            self.shade
        };
        rgb = if shade < 50.0 {
            mix_rgb(RGB_BLACK, rgb, (10.0 + shade) / 60.0)
        } else {
            mix_rgb(rgb, RGB_WHITE, (shade - 50.0) / 60.0)
        };

        let hsv = rgb_to_hsv(rgb);
        self.color = 100.0 * hsv.h / 360.0;
        self.saturation = 100.0 * hsv.s;
        self.brightness = 100.0 * hsv.v;
    }
}
