//! # MusicFlow Common Library
//!
//! Shared code for the MusicFlow services including:
//! - Musical data model (notes, time signatures, tracks)
//! - Event types (FlowEvent enum) and the broadcast EventBus
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;

pub use error::{Error, Result};
pub use model::{GeneratedTrack, Note, TimeSignature, Track};
