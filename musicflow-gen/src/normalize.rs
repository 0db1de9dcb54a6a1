//! Clip-length normalization
//!
//! Generated note sequences rarely land exactly on the requested clip length.
//! This pass repairs coverage without ever discarding musical content:
//! short clips get a near-silent end marker (and, when the material is thin
//! enough, pattern repetition), overlong clips are flagged for the caller to
//! tag distinctly, sparse bars are reported but never auto-filled.
//!
//! Pure and deterministic: the input notes are copied, never mutated.

use musicflow_common::Note;
use serde::{Deserialize, Serialize};

/// A clip covering less than this fraction of its bars is "sparse"
pub const SPARSE_COVERAGE_THRESHOLD: f64 = 0.75;

/// A clip ending before this fraction of the target length is "short"
pub const SHORT_TOLERANCE: f64 = 0.95;

/// A clip ending after this fraction of the target length is "long"
pub const LONG_TOLERANCE: f64 = 1.05;

/// Width of the end marker note in beats
pub const MARKER_EPSILON_BEATS: f64 = 0.001;

/// Marker note pitch (lowest) and velocity (minimum audible)
pub const MARKER_PITCH: u8 = 0;
pub const MARKER_VELOCITY: u8 = 1;

/// Normalization result: the repaired note sequence plus the conformance
/// verdict. Conformance is information, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClip {
    /// Possibly extended note sequence (original notes always intact)
    pub notes: Vec<Note>,
    /// Less than 75% of bars contain a note
    pub sparse: bool,
    /// Last note ended before 95% of the target length
    pub short: bool,
    /// Last note ends past 105% of the target length; nothing was truncated
    pub long: bool,
    /// Fraction of bars containing at least one overlapping note
    pub coverage_ratio: f64,
    /// 1-indexed bars with no overlapping note; populated only when sparse
    pub empty_bars: Vec<usize>,
}

/// Serializable conformance verdict, carried on completed task snapshots and
/// surfaced to the front end as metadata (never an error)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipConformance {
    pub sparse: bool,
    pub short: bool,
    pub long: bool,
    pub coverage_ratio: f64,
    pub empty_bars: Vec<usize>,
}

impl NormalizedClip {
    pub fn conformance(&self) -> ClipConformance {
        ClipConformance {
            sparse: self.sparse,
            short: self.short,
            long: self.long,
            coverage_ratio: self.coverage_ratio,
            empty_bars: self.empty_bars.clone(),
        }
    }
}

/// Repair a note sequence so it plausibly fills `clip_length_bars` bars of
/// `beats_per_bar` beats each.
///
/// The algorithm:
/// 1. Mark every bar a note's `[start, end)` interval overlaps (inclusive of
///    the bar containing `end`) as covered.
/// 2. Short clips get a near-silent marker at the very end so duration
///    derived from the last event equals the target.
/// 3. A clip that is both short and sparse, and whose material spans less
///    than half the target, is treated as a repeatable pattern and tiled
///    forward. The tiling may still over- or under-shoot the target; that is
///    an accepted approximation.
/// 4. Overlong clips are flagged, never truncated.
///
/// `beats_per_bar` must be positive; an empty input is always Short and
/// yields a marker-only clip.
pub fn normalize_clip(notes: &[Note], clip_length_bars: u32, beats_per_bar: u32) -> NormalizedClip {
    debug_assert!(beats_per_bar > 0, "beats_per_bar must be positive");
    debug_assert!(clip_length_bars > 0, "clip_length_bars must be positive");

    let bar_width = beats_per_bar as f64;
    let clip_length_beats = (clip_length_bars * beats_per_bar) as f64;
    let total_sections = (clip_length_beats / bar_width).floor() as usize;

    // Bar coverage over [start, end), inclusive of the bar containing end
    let mut covered = vec![false; total_sections];
    for note in notes {
        if note.start < 0.0 {
            continue;
        }
        let first = (note.start / bar_width).floor() as usize;
        let last = (note.end() / bar_width).floor() as usize;
        for bar in covered.iter_mut().take(last + 1).skip(first) {
            *bar = true;
        }
    }
    let covered_count = covered.iter().filter(|c| **c).count();
    let coverage_ratio = covered_count as f64 / total_sections as f64;

    let last_end = notes.iter().map(Note::end).fold(0.0_f64, f64::max);

    let sparse = coverage_ratio < SPARSE_COVERAGE_THRESHOLD;
    let short = last_end < SHORT_TOLERANCE * clip_length_beats;
    let long = last_end > LONG_TOLERANCE * clip_length_beats;

    let empty_bars = if sparse {
        covered
            .iter()
            .enumerate()
            .filter(|(_, c)| !**c)
            .map(|(i, _)| i + 1)
            .collect()
    } else {
        Vec::new()
    };

    let mut out = notes.to_vec();

    if short {
        // Thin material spanning under half the target: tile it forward as a
        // repeating pattern of length last_end. No trimming afterwards.
        if sparse && last_end > 0.0 && last_end < clip_length_beats / 2.0 {
            let repeat_times = (clip_length_beats / last_end).floor() as usize;
            for k in 1..repeat_times {
                let shift = k as f64 * last_end;
                for note in notes {
                    out.push(note.shifted(shift));
                }
            }
            tracing::debug!(
                repeat_times,
                pattern_beats = last_end,
                "Tiled sparse short clip to fill target length"
            );
        }

        // End marker so duration derived from the last event hits the target
        out.push(Note::new(
            MARKER_PITCH,
            MARKER_VELOCITY,
            clip_length_beats - MARKER_EPSILON_BEATS,
            MARKER_EPSILON_BEATS,
        ));
    }

    if long {
        tracing::info!(
            last_end,
            clip_length_beats,
            "Clip overshoots its target length; keeping all notes and flagging overlong"
        );
    }

    NormalizedClip {
        notes: out,
        sparse,
        short,
        long,
        coverage_ratio,
        empty_bars,
    }
}
