//! Marker derivation: position and popup label computed from one reading.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Message;

/// Title shown at the top of every marker popup.
pub const LABEL_TITLE: &str = "Weather Data";

/// Convert degrees Celsius to degrees Fahrenheit.
///
/// Total over `f64`: NaN and infinities propagate unchanged in kind.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

// ─── Identity & Position ──────────────────────────────────────────

/// Monotonic insertion number assigned by the owning store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(u64);

impl MarkerId {
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Map position in longitude-first order, as map surfaces expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

// ─── Label ────────────────────────────────────────────────────────

/// Popup content for a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerLabel {
    pub title: String,
    pub celsius: f64,
    pub fahrenheit: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl MarkerLabel {
    pub fn from_message(msg: &Message) -> Self {
        Self {
            title: LABEL_TITLE.to_owned(),
            celsius: msg.ambient_temp,
            fahrenheit: celsius_to_fahrenheit(msg.ambient_temp),
            latitude: msg.latitude,
            longitude: msg.longitude,
        }
    }

    /// Body lines below the title. Fahrenheit is rounded to two decimals,
    /// the raw Celsius value is shown as received.
    pub fn lines(&self) -> [String; 3] {
        [
            format!(
                "Temperature: {}°C / {:.2}°F",
                self.celsius, self.fahrenheit
            ),
            format!("Latitude: {}", self.latitude),
            format!("Longitude: {}", self.longitude),
        ]
    }
}

impl fmt::Display for MarkerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)?;
        for line in self.lines() {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

// ─── Marker ───────────────────────────────────────────────────────

/// Renderable point annotation derived from exactly one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    pub position: LngLat,
    pub label: MarkerLabel,
}

impl Marker {
    pub fn from_message(id: MarkerId, msg: &Message) -> Self {
        Self {
            id,
            position: LngLat::new(msg.longitude, msg.latitude),
            label: MarkerLabel::from_message(msg),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
