//! Generation collaborator seam
//!
//! The registry never talks to the LLM directly; it drives an injected
//! [`TrackGenerator`]. The call may block for seconds, so it runs only on
//! worker tasks, never under the registry lock. Cancellation is cooperative:
//! the token is offered to the implementation, which may ignore it.

use futures::future::BoxFuture;
use musicflow_common::{GeneratedTrack, Result};
use tokio_util::sync::CancellationToken;

/// One request handed to the collaborator
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub track_name: String,
    pub prompt: String,
    /// True when refreshing an existing track (the collaborator is expected
    /// to keep bpm and time signature stable)
    pub is_update: bool,
}

/// External generation collaborator contract
///
/// `generate` returns the structured track description or an error; errors
/// surface as the task's FAILED state and are never retried by the registry.
pub trait TrackGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<GeneratedTrack>>;
}
