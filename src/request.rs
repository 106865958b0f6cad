//! Thumbnail work items.

use crate::targets::{TargetId, ThumbnailTarget};
use std::fmt;
use std::sync::Arc;

/// Urgency of a thumbnail request. Declared low to high so `Ord` matches urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// "Produce or refresh the thumbnail for `target`."
///
/// Two requests are equal when they are for the same target, whatever their
/// priority or force flag.
#[derive(Clone)]
pub struct ThumbnailRequest {
    pub target: Arc<dyn ThumbnailTarget>,
    pub priority: Priority,
    /// Regenerate even if the existing thumbnail looks current.
    pub force: bool,
}

impl ThumbnailRequest {
    pub fn new(target: Arc<dyn ThumbnailTarget>, priority: Priority) -> Self {
        Self {
            target,
            priority,
            force: false,
        }
    }

    pub fn forced(target: Arc<dyn ThumbnailTarget>, priority: Priority) -> Self {
        Self {
            target,
            priority,
            force: true,
        }
    }

    pub fn target_id(&self) -> TargetId {
        self.target.id()
    }
}

impl PartialEq for ThumbnailRequest {
    fn eq(&self, other: &Self) -> bool {
        self.target_id() == other.target_id()
    }
}

impl Eq for ThumbnailRequest {}

impl fmt::Debug for ThumbnailRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailRequest")
            .field("target", &self.target_id())
            .field("priority", &self.priority)
            .field("force", &self.force)
            .finish()
    }
}
