//! Voices: independently configured rhythmic generators
//!
//! A voice carries its own configuration (channel, subdivision, probability,
//! register, transposition, velocity bounds) plus its phase accumulator.
//! Configuration is only ever changed through [`VoiceUpdate`], which checks
//! every field before touching the voice.

use crate::error::{MapleError, MapleResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Highest usable MIDI channel (zero-based)
pub const MAX_CHANNEL: u8 = 15;

/// Register filter applied to the global scale before pitch selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    #[default]
    All,
    Low,
    High,
}

impl FromStr for Register {
    type Err = MapleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Register::All),
            "low" => Ok(Register::Low),
            "high" => Ok(Register::High),
            other => Err(MapleError::invalid(
                "register",
                format!("expected all, low or high, got '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::All => write!(f, "all"),
            Register::Low => write!(f, "low"),
            Register::High => write!(f, "high"),
        }
    }
}

/// Inclusive velocity bounds for randomized note-on velocity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityRange {
    pub min: u8,
    pub max: u8,
}

impl Default for VelocityRange {
    fn default() -> Self {
        Self { min: 70, max: 110 }
    }
}

impl VelocityRange {
    pub fn new(min: u8, max: u8) -> MapleResult<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    fn validate(&self) -> MapleResult<()> {
        if self.min == 0 || self.max > 127 {
            return Err(MapleError::invalid(
                "velocity_range",
                format!("bounds must lie in 1..=127, got {}..={}", self.min, self.max),
            ));
        }
        if self.min > self.max {
            return Err(MapleError::invalid(
                "velocity_range",
                format!("min {} exceeds max {}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// One rhythmic generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Voice {
    pub id: u32,
    pub name: String,
    pub active: bool,
    #[serde(alias = "instrument_channel")]
    pub channel: u8,
    /// 1.0 = quarter, 0.5 = half, 2.0 = eighth
    pub division: f64,
    pub probability: f64,
    pub transpose: i32,
    pub register: Register,
    pub velocity_range: VelocityRange,
    /// Elapsed time inside the current beat window
    #[serde(skip)]
    pub phase: Duration,
}

impl Default for Voice {
    fn default() -> Self {
        Self::new(0, "Voice")
    }
}

impl Voice {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
            channel: 0,
            division: 1.0,
            probability: 0.5,
            transpose: 0,
            register: Register::All,
            velocity_range: VelocityRange::default(),
            phase: Duration::ZERO,
        }
    }

    /// The five voices a fresh session starts with
    pub fn default_set() -> Vec<Voice> {
        ["Left Bottom", "Left Top", "Center", "Right Top", "Right Bottom"]
            .iter()
            .enumerate()
            .map(|(id, name)| Voice::new(id as u32, *name))
            .collect()
    }

    /// Validate and apply an update. Nothing is changed if any field is rejected.
    pub fn apply(&mut self, update: &VoiceUpdate) -> MapleResult<()> {
        let checked = update.validated()?;

        if let Some(name) = &checked.name {
            self.name = name.clone();
        }
        if let Some(active) = checked.active {
            self.active = active;
        }
        if let Some(channel) = checked.channel {
            self.channel = channel;
        }
        if let Some(division) = checked.division {
            self.division = division;
        }
        if let Some(probability) = checked.probability {
            self.probability = probability;
        }
        if let Some(transpose) = checked.transpose {
            self.transpose = transpose;
        }
        if let Some(register) = checked.register {
            self.register = register;
        }
        if let Some(range) = checked.velocity_range {
            self.velocity_range = range;
        }
        Ok(())
    }

    /// Clamp loaded values into their legal ranges
    pub(crate) fn sanitize(&mut self) {
        self.channel = self.channel.min(MAX_CHANNEL);
        if !self.division.is_finite() || self.division <= 0.0 {
            self.division = 1.0;
        }
        self.probability = if self.probability.is_finite() {
            self.probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.transpose = self.transpose.clamp(-127, 127);
        if self.velocity_range.validate().is_err() {
            self.velocity_range = VelocityRange::default();
        }
        self.phase = Duration::ZERO;
    }
}

/// Partial voice configuration change
///
/// Deserialization rejects keys outside the declared field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transpose: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<Register>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_range: Option<VelocityRange>,
}

impl VoiceUpdate {
    /// Returns a copy with clamped values, or the first rejected field
    fn validated(&self) -> MapleResult<VoiceUpdate> {
        let mut out = self.clone();

        if let Some(channel) = self.channel {
            if channel > MAX_CHANNEL {
                return Err(MapleError::invalid(
                    "channel",
                    format!("must be 0..={}, got {}", MAX_CHANNEL, channel),
                ));
            }
        }
        if let Some(division) = self.division {
            if !division.is_finite() || division <= 0.0 {
                return Err(MapleError::invalid(
                    "division",
                    format!("must be positive, got {}", division),
                ));
            }
        }
        if let Some(probability) = self.probability {
            if probability.is_nan() {
                return Err(MapleError::invalid("probability", "NaN"));
            }
            out.probability = Some(probability.clamp(0.0, 1.0));
        }
        if let Some(transpose) = self.transpose {
            if !(-127..=127).contains(&transpose) {
                return Err(MapleError::invalid(
                    "transpose",
                    format!("must be within +/-127 semitones, got {}", transpose),
                ));
            }
        }
        if let Some(range) = &self.velocity_range {
            range.validate()?;
        }
        Ok(out)
    }
}
