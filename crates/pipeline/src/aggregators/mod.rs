//! Context aggregator pair
//!
//! Two stages share one transcript:
//! - [`UserContextAggregator`] seals user speech once the turn coordinator
//!   reports the end of the user's turn
//! - [`AssistantContextAggregator`] seals each generated response
//!
//! All transcript writes go through the pair. Other stages read snapshots
//! through a [`TranscriptReader`].

mod assistant;
mod transcript;
mod user;

pub use assistant::AssistantContextAggregator;
pub use transcript::TranscriptReader;
pub use user::{UserAggregatorParams, UserContextAggregator};

use transcript::TranscriptWriter;
use voice_bridge_core::TranscriptEntry;

/// Owner of the shared transcript
pub struct ContextAggregatorPair {
    writer: TranscriptWriter,
}

impl ContextAggregatorPair {
    /// Create the pair, seeding the transcript with the persona entry
    pub fn new(
        system_prompt: impl Into<String>,
        params: UserAggregatorParams,
    ) -> (Self, UserContextAggregator, AssistantContextAggregator) {
        let writer = TranscriptWriter::new();
        writer.append(TranscriptEntry::system(system_prompt));

        let user = UserContextAggregator::new(writer.clone(), params);
        let assistant = AssistantContextAggregator::new(writer.clone());
        (Self { writer }, user, assistant)
    }

    /// Append a system entry
    ///
    /// Returns once the entry is visible to readers, so a frame queued
    /// afterwards always observes it.
    pub fn seed_system(&self, content: impl Into<String>) {
        self.writer.append(TranscriptEntry::system(content));
    }

    /// Copy of the transcript
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.writer.reader().snapshot()
    }

    /// Read-only handle for the language stage
    pub fn reader(&self) -> TranscriptReader {
        self.writer.reader()
    }
}
