//! # MusicFlow Generation Service
//!
//! Core of the prompt-to-clip pipeline:
//! - **Task registry & scheduler** (`registry`): accepts generation/update
//!   requests, enforces at-most-one-in-flight per track name, runs accepted
//!   work on a fixed-size worker pool, publishes status and results.
//! - **Clip normalizer** (`normalize`): pure repair pass that makes a
//!   generated note sequence plausibly fill its declared clip length.
//! - **MIDI clip writer** (`midi`): renders a stored track to a Standard MIDI
//!   File with the deterministic naming scheme the DAW bridge expects.
//!
//! The LLM call, prompt templating, the DAW control link, and the console
//! front end are external collaborators; the generation side is reached
//! through the [`generator::TrackGenerator`] trait.

pub mod generator;
pub mod midi;
pub mod normalize;
pub mod registry;
pub mod task;

pub use generator::{GenerationRequest, TrackGenerator};
pub use midi::{clip_file_name, write_clip};
pub use normalize::{normalize_clip, ClipConformance, NormalizedClip};
pub use registry::{RegistryConfig, TaskRegistry};
pub use task::{Task, TaskCallback, TaskId, TaskOutcome, TaskStatus, TaskSummary};
