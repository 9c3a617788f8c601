//! Automation envelopes
//!
//! An envelope is a piecewise-linear curve over one automation cycle. Its
//! value (0.0-1.0) scales a control's base value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TemperaError;

/// Breakpoint; both coordinates are normalized to 0.0-1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub time: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    #[serde(deserialize_with = "sorted_points")]
    points: Vec<EnvelopePoint>,
    pub enabled: bool,
}

fn sorted_points<'de, D>(deserializer: D) -> Result<Vec<EnvelopePoint>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut points = Vec::<EnvelopePoint>::deserialize(deserializer)?;
    for point in &mut points {
        point.time = point.time.clamp(0.0, 1.0);
        point.value = point.value.clamp(0.0, 1.0);
    }
    points.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(points)
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled envelope through `points`, in any order
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let mut envelope = Self {
            points: Vec::with_capacity(points.len()),
            enabled: true,
        };
        for &(time, value) in points {
            envelope.add_point(time, value);
        }
        envelope
    }

    pub fn from_preset(preset: EnvelopePreset, per_cell: bool) -> Self {
        Self::from_points(&preset.points(per_cell))
    }

    /// Insert a point, clamping both coordinates into 0.0-1.0.
    pub fn add_point(&mut self, time: f64, value: f64) {
        let point = EnvelopePoint {
            time: time.clamp(0.0, 1.0),
            value: value.clamp(0.0, 1.0),
        };
        // After any existing points at the same time
        let index = self.points.partition_point(|p| p.time <= point.time);
        self.points.insert(index, point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[EnvelopePoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Curve value at `time`, 1.0 when there are no points
    pub fn value_at(&self, time: f64) -> f64 {
        let time = time.clamp(0.0, 1.0);

        let split = self.points.partition_point(|p| p.time <= time);
        let before = split.checked_sub(1).map(|i| self.points[i]);
        let after = self.points.get(split).copied();

        match (before, after) {
            (None, None) => 1.0,
            (None, Some(after)) => after.value,
            (Some(before), None) => before.value,
            (Some(before), Some(after)) => {
                let span = after.time - before.time;
                if span <= 0.0 {
                    return before.value;
                }
                let t = (time - before.time) / span;
                before.value + t * (after.value - before.value)
            }
        }
    }

    /// Scale `base` by the curve at `position`; disabled envelopes pass it through.
    pub fn apply(&self, base: u8, position: f64) -> u8 {
        if !self.enabled {
            return base;
        }
        // Truncate toward zero; the factor is at most 1.0 so this stays in range.
        (f64::from(base) * self.value_at(position)) as u8
    }
}

/// Stock curve shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopePreset {
    RampUp,
    RampDown,
    Triangle,
    SCurve,
    Square,
    Sawtooth,
}

/// Cells per automation cycle when a preset repeats per cell
const CELLS_PER_CYCLE: usize = 8;

impl EnvelopePreset {
    pub const ALL: &'static [EnvelopePreset] = &[
        EnvelopePreset::RampUp,
        EnvelopePreset::RampDown,
        EnvelopePreset::Triangle,
        EnvelopePreset::SCurve,
        EnvelopePreset::Square,
        EnvelopePreset::Sawtooth,
    ];

    fn shape(&self) -> &'static [(f64, f64)] {
        match self {
            EnvelopePreset::RampUp => &[(0.0, 0.0), (1.0, 1.0)],
            EnvelopePreset::RampDown => &[(0.0, 1.0), (1.0, 0.0)],
            EnvelopePreset::Triangle => &[(0.0, 0.0), (0.5, 1.0), (1.0, 0.0)],
            EnvelopePreset::SCurve => &[(0.0, 0.0), (0.25, 0.1), (0.5, 0.5), (0.75, 0.9), (1.0, 1.0)],
            EnvelopePreset::Square => &[(0.0, 1.0), (0.49, 1.0), (0.5, 0.0), (1.0, 0.0)],
            EnvelopePreset::Sawtooth => &[(0.0, 0.0), (0.9, 1.0), (0.91, 0.0), (1.0, 0.0)],
        }
    }

    /// Breakpoints for one cycle, or the shape squeezed into each of the 8 cells.
    pub fn points(&self, per_cell: bool) -> Vec<(f64, f64)> {
        let shape = self.shape();
        if !per_cell {
            return shape.to_vec();
        }

        let width = 1.0 / CELLS_PER_CYCLE as f64;
        (0..CELLS_PER_CYCLE)
            .flat_map(|cell| {
                let start = cell as f64 * width;
                shape
                    .iter()
                    .map(move |&(time, value)| (start + time * width, value))
            })
            .collect()
    }

    pub fn key(&self) -> &'static str {
        match self {
            EnvelopePreset::RampUp => "ramp_up",
            EnvelopePreset::RampDown => "ramp_down",
            EnvelopePreset::Triangle => "triangle",
            EnvelopePreset::SCurve => "s_curve",
            EnvelopePreset::Square => "square",
            EnvelopePreset::Sawtooth => "sawtooth",
        }
    }
}

impl fmt::Display for EnvelopePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for EnvelopePreset {
    type Err = TemperaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvelopePreset::ALL
            .iter()
            .copied()
            .find(|preset| preset.key() == s)
            .ok_or_else(|| TemperaError::InvalidTarget(format!("unknown envelope preset '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_envelope_is_identity() {
        let mut envelope = Envelope::new();
        envelope.enabled = true;
        assert_eq!(envelope.value_at(0.3), 1.0);
        assert_eq!(envelope.apply(100, 0.3), 100);
    }

    #[test]
    fn test_disabled_envelope_passes_base_through() {
        let mut envelope = Envelope::from_points(&[(0.0, 0.0), (1.0, 0.0)]);
        envelope.enabled = false;
        assert_eq!(envelope.apply(77, 0.5), 77);
    }

    #[test]
    fn test_linear_interpolation() {
        let envelope = Envelope::from_points(&[(0.0, 0.0), (1.0, 1.0)]);
        assert!(approx(envelope.value_at(0.5), 0.5));
        assert!(approx(envelope.value_at(0.25), 0.25));
        assert_eq!(envelope.apply(100, 0.5), 50);
        // Truncates rather than rounds.
        assert_eq!(envelope.apply(101, 0.5), 50);
    }

    #[test]
    fn test_flat_outside_points() {
        let envelope = Envelope::from_points(&[(0.25, 0.2), (0.75, 0.8)]);
        assert!(approx(envelope.value_at(0.0), 0.2));
        assert!(approx(envelope.value_at(0.1), 0.2));
        assert!(approx(envelope.value_at(0.9), 0.8));
        assert!(approx(envelope.value_at(1.0), 0.8));
        assert!(approx(envelope.value_at(0.5), 0.5));
    }

    #[test]
    fn test_points_sorted_and_clamped() {
        let mut envelope = Envelope::new();
        envelope.add_point(0.8, 0.5);
        envelope.add_point(-1.0, 2.0);
        envelope.add_point(0.4, 0.1);

        let times: Vec<f64> = envelope.points().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 0.4, 0.8]);
        assert_eq!(envelope.points()[0].value, 1.0);

        envelope.clear();
        assert!(envelope.is_empty());
    }

    #[test]
    fn test_vertical_step() {
        let envelope = EnvelopePreset::Square.points(false);
        let envelope = Envelope::from_points(&envelope);
        assert!(approx(envelope.value_at(0.2), 1.0));
        assert!(approx(envelope.value_at(0.7), 0.0));
    }

    #[test]
    fn test_presets_per_cell() {
        for preset in EnvelopePreset::ALL {
            let single = preset.points(false);
            let repeated = preset.points(true);
            assert_eq!(repeated.len(), single.len() * 8);
            assert!(repeated.iter().all(|(t, v)| (0.0..=1.0).contains(t) && (0.0..=1.0).contains(v)));
            assert_eq!(preset.key().parse::<EnvelopePreset>().unwrap(), *preset);
        }

        let ramp = Envelope::from_preset(EnvelopePreset::RampUp, true);
        // Halfway through the second cell
        assert!(approx(ramp.value_at(1.5 / 8.0), 0.5));
        assert!("zigzag".parse::<EnvelopePreset>().is_err());
    }

    #[test]
    fn test_serde_shape() {
        let envelope = Envelope::from_points(&[(0.0, 0.0), (1.0, 1.0)]);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["enabled"], true);
        assert_eq!(json["points"][1]["value"], 1.0);

        let parsed: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, envelope);

        let unsorted: Envelope = serde_json::from_str(
            r#"{"points": [{"time": 1.0, "value": 1.0}, {"time": 0.0, "value": 0.0}], "enabled": true}"#,
        )
        .unwrap();
        assert!(approx(unsorted.value_at(0.5), 0.5));
    }
}
