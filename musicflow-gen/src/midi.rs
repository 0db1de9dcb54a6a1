//! Standard MIDI File rendering for stored tracks
//!
//! Renders a [`Track`] to a single-track SMF the DAW bridge can import:
//! tempo and time-signature meta events up front, a General MIDI program
//! chosen from the track name, note events at 480 ticks per beat. Drum-like
//! tracks go to channel 10 (index 9) per the GM convention and skip the
//! program change.
//!
//! File names are deterministic so the bridge can find a clip from the track
//! name alone: `{name}.mid`, with a `_{bars}bars` tag when the clip is not
//! the default four bars and a `_long` tag when the clip overshoots its
//! declared length.

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use musicflow_common::{Error, Result, Track};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// SMF resolution in ticks per quarter note
pub const TICKS_PER_BEAT: u16 = 480;

/// Default clip length; clips of this length carry no bar tag in their name
const DEFAULT_CLIP_BARS: u32 = 4;

/// General MIDI program by track-name keyword
const GM_PROGRAMS: &[(&str, u8)] = &[
    ("bass", 33),  // Electric Bass (finger)
    ("lead", 80),  // Lead 1 (square)
    ("pad", 88),   // Pad 1 (new age)
    ("keys", 0),   // Acoustic Grand Piano
    ("perc", 112), // Tinkle Bell bank start
];

/// GM percussion channel (zero-indexed)
const DRUM_CHANNEL: u8 = 9;

fn is_drum_track(name: &str) -> bool {
    name.to_ascii_lowercase().contains("drum")
}

fn program_for(name: &str) -> Option<u8> {
    let lower = name.to_ascii_lowercase();
    GM_PROGRAMS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, program)| *program)
}

/// Deterministic clip file name for a track
///
/// `bass` at 4 bars → `bass.mid`; at 8 bars → `bass_8bars.mid`; an overlong
/// 8-bar clip → `bass_8bars_long.mid`.
pub fn clip_file_name(track_name: &str, clip_length_bars: u32, overlong: bool) -> String {
    let mut name = track_name.to_string();
    if clip_length_bars != DEFAULT_CLIP_BARS {
        name.push_str(&format!("_{}bars", clip_length_bars));
    }
    if overlong {
        name.push_str("_long");
    }
    name.push_str(".mid");
    name
}

/// A note boundary in absolute ticks; offs sort before ons at the same tick
/// so retriggered pitches release before they restrike
#[derive(Debug, Clone, Copy)]
struct NoteBoundary {
    tick: u32,
    on: bool,
    pitch: u8,
    velocity: u8,
}

fn note_boundaries(track: &Track) -> Vec<NoteBoundary> {
    let mut boundaries = Vec::with_capacity(track.notes.len() * 2);
    for note in &track.notes {
        if note.start < 0.0 || note.duration <= 0.0 {
            continue;
        }
        let on_tick = (note.start * TICKS_PER_BEAT as f64).round() as u32;
        // A sub-tick note still occupies one tick so the off lands after the on
        let off_tick = ((note.end() * TICKS_PER_BEAT as f64).round() as u32).max(on_tick + 1);
        let pitch = note.pitch.min(127);
        boundaries.push(NoteBoundary {
            tick: on_tick,
            on: true,
            pitch,
            velocity: note.velocity.min(127),
        });
        boundaries.push(NoteBoundary {
            tick: off_tick,
            on: false,
            pitch,
            velocity: 0,
        });
    }
    boundaries.sort_by_key(|b| (b.tick, b.on));
    boundaries
}

/// SMF tempo is a 24-bit microseconds-per-beat field; bpm below ~3.6 would
/// overflow it
const MAX_TEMPO_MICROS: f64 = 0xFF_FFFF as f64;

/// Encode a track as SMF bytes
pub fn render_clip(track: &Track) -> Result<Vec<u8>> {
    if !track.bpm.is_finite() || track.bpm <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "Cannot render track '{}' with non-positive bpm {}",
            track.name, track.bpm
        )));
    }
    if 60_000_000.0 / track.bpm > MAX_TEMPO_MICROS {
        return Err(Error::InvalidInput(format!(
            "Cannot render track '{}': bpm {} is below the SMF tempo range",
            track.name, track.bpm
        )));
    }

    let channel = if is_drum_track(&track.name) {
        u4::new(DRUM_CHANNEL)
    } else {
        u4::new(0)
    };

    let mut events: Vec<TrackEvent> = Vec::new();

    let name_bytes = track.name.as_bytes();
    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(name_bytes)),
    });

    let micros_per_beat = (60_000_000.0 / track.bpm).round() as u32;
    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_beat))),
    });

    // SMF encodes the denominator as a power of two
    let denominator_pow2 = track.time_signature.denominator.max(1).ilog2() as u8;
    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
            track.time_signature.numerator.min(255) as u8,
            denominator_pow2,
            24,
            8,
        )),
    });

    if !is_drum_track(&track.name) {
        if let Some(program) = program_for(&track.name) {
            events.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(program),
                    },
                },
            });
        }
    }

    let mut prev_tick = 0u32;
    for boundary in note_boundaries(track) {
        let delta = boundary.tick - prev_tick;
        prev_tick = boundary.tick;
        let message = if boundary.on {
            MidiMessage::NoteOn {
                key: u7::new(boundary.pitch),
                vel: u7::new(boundary.velocity),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(boundary.pitch),
                vel: u7::new(0),
            }
        };
        events.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(TICKS_PER_BEAT))),
        tracks: vec![events],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| Error::Internal(format!("SMF encoding failed: {}", e)))?;
    Ok(bytes)
}

/// Write a track's clip into `dir`, creating the directory if needed
///
/// Returns the full path of the written file. An existing file for the same
/// name is replaced, matching the wholesale-replacement rule of the track
/// store itself.
pub fn write_clip(dir: &Path, track: &Track, overlong: bool) -> Result<PathBuf> {
    let bytes = render_clip(track)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(clip_file_name(&track.name, track.clip_length_bars, overlong));
    fs::write(&path, &bytes)?;
    info!(
        track = %track.name,
        path = %path.display(),
        bytes = bytes.len(),
        "Wrote MIDI clip"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use musicflow_common::{GeneratedTrack, Note, TimeSignature};

    fn test_track(name: &str, notes: Vec<Note>) -> Track {
        let mut track = Track::from_generated(
            name,
            &GeneratedTrack {
                bpm: 120.0,
                notes,
                ..GeneratedTrack::default()
            },
        );
        track.time_signature = TimeSignature::new(4, 4);
        track
    }

    #[test]
    fn test_clip_file_name_tags() {
        assert_eq!(clip_file_name("bass", 4, false), "bass.mid");
        assert_eq!(clip_file_name("bass", 8, false), "bass_8bars.mid");
        assert_eq!(clip_file_name("bass", 4, true), "bass_long.mid");
        assert_eq!(clip_file_name("bass", 8, true), "bass_8bars_long.mid");
    }

    #[test]
    fn test_rendered_clip_parses_back() {
        let track = test_track("bass", vec![Note::new(36, 110, 0.0, 0.5), Note::new(36, 90, 1.0, 0.5)]);
        let bytes = render_clip(&track).unwrap();

        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(TICKS_PER_BEAT)));
        assert_eq!(smf.tracks.len(), 1);

        let events = &smf.tracks[0];
        // 120 bpm = 500000 us per beat
        assert!(events.iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t == u24::new(500_000)
        )));
        // bass keyword maps to GM 33
        assert!(events.iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Midi {
                message: MidiMessage::ProgramChange { program },
                ..
            } if program == u7::new(33)
        )));

        let note_ons = events
            .iter()
            .filter(|e| matches!(e.kind, TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. }))
            .count();
        let note_offs = events
            .iter()
            .filter(|e| matches!(e.kind, TrackEventKind::Midi { message: MidiMessage::NoteOff { .. }, .. }))
            .count();
        assert_eq!(note_ons, 2);
        assert_eq!(note_offs, 2);
    }

    #[test]
    fn test_drum_track_uses_channel_ten_without_program() {
        let track = test_track("drums", vec![Note::new(36, 100, 0.0, 0.25)]);
        let bytes = render_clip(&track).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let events = &smf.tracks[0];

        assert!(!events.iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Midi { message: MidiMessage::ProgramChange { .. }, .. }
        )));
        assert!(events.iter().all(|e| match e.kind {
            TrackEventKind::Midi { channel, .. } => channel == u4::new(9),
            _ => true,
        }));
    }

    #[test]
    fn test_note_timing_in_ticks() {
        // One beat at 480 ticks: on at 0, off at 480.
        let track = test_track("lead", vec![Note::new(72, 100, 0.0, 1.0)]);
        let bytes = render_clip(&track).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let mut tick = 0u32;
        let mut on_tick = None;
        let mut off_tick = None;
        for event in &smf.tracks[0] {
            tick += event.delta.as_int();
            match event.kind {
                TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. } => {
                    on_tick = Some(tick)
                }
                TrackEventKind::Midi { message: MidiMessage::NoteOff { .. }, .. } => {
                    off_tick = Some(tick)
                }
                _ => {}
            }
        }
        assert_eq!(on_tick, Some(0));
        assert_eq!(off_tick, Some(480));
    }

    #[test]
    fn test_simultaneous_retrigger_releases_before_restrike() {
        // Back-to-back same-pitch notes share tick 240: the off must precede
        // the on there.
        let track = test_track(
            "keys",
            vec![Note::new(60, 100, 0.0, 0.5), Note::new(60, 100, 0.5, 0.5)],
        );
        let bytes = render_clip(&track).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let mut tick = 0u32;
        let mut order_at_240 = Vec::new();
        for event in &smf.tracks[0] {
            tick += event.delta.as_int();
            if tick == 240 {
                match event.kind {
                    TrackEventKind::Midi { message: MidiMessage::NoteOff { .. }, .. } => {
                        order_at_240.push("off")
                    }
                    TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. } => {
                        order_at_240.push("on")
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(order_at_240, vec!["off", "on"]);
    }

    #[test]
    fn test_marker_note_survives_rendering() {
        // The end marker is sub-tick wide; it still emits a one-tick note.
        let track = test_track("pad", vec![Note::new(0, 1, 15.999, 0.001)]);
        let bytes = render_clip(&track).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let note_events = smf.tracks[0]
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TrackEventKind::Midi {
                        message: MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(note_events, 2);
    }

    #[test]
    fn test_write_clip_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut track = test_track("bass", vec![Note::new(36, 100, 0.0, 0.5)]);
        track.clip_length_bars = 8;

        let path = write_clip(dir.path(), &track, false).unwrap();
        assert_eq!(path.file_name().unwrap(), "bass_8bars.mid");
        assert!(path.exists());

        let bytes = fs::read(&path).unwrap();
        assert!(Smf::parse(&bytes).is_ok());
    }

    #[test]
    fn test_non_positive_bpm_rejected() {
        let mut track = test_track("bass", vec![]);
        track.bpm = 0.0;
        assert!(render_clip(&track).is_err());
        track.bpm = f64::NAN;
        assert!(render_clip(&track).is_err());
    }

    #[test]
    fn test_bpm_below_smf_tempo_range_rejected() {
        // 2 bpm needs 30,000,000 us per beat, past the 24-bit tempo field
        let mut track = test_track("bass", vec![Note::new(36, 100, 0.0, 0.5)]);
        track.bpm = 2.0;
        assert!(matches!(
            render_clip(&track),
            Err(Error::InvalidInput(_))
        ));

        // 4 bpm still fits (15,000,000 us) and must round-trip
        track.bpm = 4.0;
        let bytes = render_clip(&track).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert!(smf.tracks[0].iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t == u24::new(15_000_000)
        )));
    }

    #[test]
    fn test_negative_start_notes_skipped() {
        let track = test_track("lead", vec![Note::new(60, 100, -1.0, 0.5), Note::new(62, 100, 0.0, 0.5)]);
        let bytes = render_clip(&track).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let note_ons = smf.tracks[0]
            .iter()
            .filter(|e| matches!(e.kind, TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. }))
            .count();
        assert_eq!(note_ons, 1);
    }
}
