//! Musical data model shared across MusicFlow services
//!
//! `Note` and `GeneratedTrack` mirror the JSON contract of the external
//! generation collaborator; `Track` is the latest accepted content for a
//! logical track name, owned by the task registry.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One musical event, positioned in beats
///
/// Immutable value type: normalization and repetition build new notes rather
/// than mutating existing ones. Serde defaults match the collaborator's
/// contract, which may omit any field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch (0-127, 60 = middle C)
    #[serde(default = "default_pitch")]
    pub pitch: u8,

    /// MIDI velocity (0-127)
    #[serde(default = "default_velocity")]
    pub velocity: u8,

    /// Onset in beats from clip start
    #[serde(default)]
    pub start: f64,

    /// Length in beats
    #[serde(default = "default_duration")]
    pub duration: f64,
}

fn default_pitch() -> u8 {
    60
}

fn default_velocity() -> u8 {
    100
}

fn default_duration() -> f64 {
    0.5
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start: f64, duration: f64) -> Self {
        Self {
            pitch,
            velocity,
            start,
            duration,
        }
    }

    /// End of the note in beats (`start + duration`)
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Copy of this note shifted forward by `beats`
    pub fn shifted(&self, beats: f64) -> Self {
        Self {
            start: self.start + beats,
            ..*self
        }
    }
}

/// Time signature, carried in the collaborator contract as a `"4/4"` string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Beats per bar as used for clip-length math (the numerator)
    pub fn beats_per_bar(&self) -> u32 {
        self.numerator
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("Invalid time signature: {}", s)))?;
        let numerator: u32 = num
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid time signature numerator: {}", s)))?;
        let denominator: u32 = den.trim().parse().map_err(|_| {
            Error::InvalidInput(format!("Invalid time signature denominator: {}", s))
        })?;
        if numerator == 0 || denominator == 0 {
            return Err(Error::InvalidInput(format!(
                "Time signature components must be positive: {}",
                s
            )));
        }
        Ok(Self::new(numerator, denominator))
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(ts: TimeSignature) -> Self {
        ts.to_string()
    }
}

/// Structured output of the external generation collaborator
///
/// Field defaults cover partial responses; a response with no notes is valid
/// and normalizes to a marker-only clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTrack {
    /// Tempo in beats per minute
    #[serde(default = "default_bpm")]
    pub bpm: f64,

    /// Time signature (e.g. "4/4")
    #[serde(default)]
    pub time_signature: TimeSignature,

    /// Requested clip length in bars (>= 1)
    #[serde(default = "default_clip_length_bars")]
    pub clip_length_bars: u32,

    /// Note sequence in the collaborator's emission order
    #[serde(default)]
    pub notes: Vec<Note>,

    /// Free-text description of the generated content
    #[serde(default)]
    pub description: String,
}

fn default_bpm() -> f64 {
    120.0
}

fn default_clip_length_bars() -> u32 {
    4
}

impl Default for GeneratedTrack {
    fn default() -> Self {
        Self {
            bpm: default_bpm(),
            time_signature: TimeSignature::default(),
            clip_length_bars: default_clip_length_bars(),
            notes: Vec::new(),
            description: String::new(),
        }
    }
}

/// Latest accepted musical content for a logical track name
///
/// Owned exclusively by the task registry and replaced wholesale (never
/// merged) each time a task for the name completes successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique key, case-sensitive
    pub name: String,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub clip_length_bars: u32,
    /// Insertion order, not sorted
    pub notes: Vec<Note>,
    pub description: String,
}

impl Track {
    /// Build a track from a collaborator result, adopting its metadata
    pub fn from_generated(name: impl Into<String>, generated: &GeneratedTrack) -> Self {
        Self {
            name: name.into(),
            bpm: generated.bpm,
            time_signature: generated.time_signature,
            clip_length_bars: generated.clip_length_bars,
            notes: generated.notes.clone(),
            description: generated.description.clone(),
        }
    }

    /// Target clip duration in beats
    pub fn clip_length_beats(&self) -> f64 {
        (self.clip_length_bars * self.time_signature.beats_per_bar()) as f64
    }
}
