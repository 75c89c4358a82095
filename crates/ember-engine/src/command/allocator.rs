use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Backing store for recorded commands.
///
/// Remembers the submission serial of the last list recorded from it, so a
/// reset while that list may still be executing is caught.
#[derive(Debug, Clone)]
pub struct CommandAllocator {
    name: String,
    last_submitted: Arc<AtomicU64>,
}

impl CommandAllocator {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            last_submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serial of the last command list submitted from this allocator (0 if none).
    pub fn last_submitted(&self) -> u64 {
        self.last_submitted.load(Ordering::Acquire)
    }

    pub(crate) fn tracker(&self) -> Arc<AtomicU64> {
        self.last_submitted.clone()
    }
}
