//! Transcript ownership
//!
//! The transcript is written only through [`TranscriptWriter`], which is held
//! by the aggregator pair. Everyone else gets a [`TranscriptReader`].

use parking_lot::RwLock;
use std::sync::Arc;
use voice_bridge_core::{Role, TranscriptEntry};

/// Append-only conversation history
#[derive(Debug, Default)]
struct Transcript {
    entries: Vec<TranscriptEntry>,
}

/// Exclusive append handle, kept inside this module's aggregators
#[derive(Debug, Clone)]
pub(crate) struct TranscriptWriter {
    inner: Arc<RwLock<Transcript>>,
}

impl TranscriptWriter {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Transcript::default())),
        }
    }

    /// Append one sealed entry; returns its index
    pub(crate) fn append(&self, entry: TranscriptEntry) -> usize {
        let mut transcript = self.inner.write();
        transcript.entries.push(entry);
        transcript.entries.len() - 1
    }

    pub(crate) fn reader(&self) -> TranscriptReader {
        TranscriptReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of the transcript
#[derive(Debug, Clone)]
pub struct TranscriptReader {
    inner: Arc<RwLock<Transcript>>,
}

impl TranscriptReader {
    /// Copy of all entries in append order
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.inner.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent entry for a role
    pub fn last_of(&self, role: Role) -> Option<TranscriptEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .find(|e| e.role == role)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let writer = TranscriptWriter::new();
        let reader = writer.reader();

        assert_eq!(writer.append(TranscriptEntry::system("persona")), 0);
        assert_eq!(writer.append(TranscriptEntry::user("hi")), 1);
        writer.append(TranscriptEntry::assistant("hello"));
        writer.append(TranscriptEntry::user("hi"));

        let roles: Vec<Role> = reader.snapshot().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        // Duplicates are kept
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.last_of(Role::Assistant).unwrap().content, "hello");
    }
}
