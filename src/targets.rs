//! Things that need thumbnails.
//!
//! The pipeline never sees the application's collection tree directly. It
//! talks to each node through [`ThumbnailTarget`], which exposes just the
//! metadata thumbnail production needs: where the original lives, how it is
//! rotated, where its thumbnail is stored, and a sink for "thumbnail changed".
//!
//! [`PictureTarget`] and [`GroupTarget`] are ready-made implementations used
//! by the CLI and the tests. Applications with their own node types implement
//! the trait directly.

use crate::sync::lock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of a target. Requests are deduplicated by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl TargetId {
    pub fn next() -> Self {
        Self(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A single picture with an original image.
    Picture,
    /// A container whose thumbnail is a mosaic of its children.
    Group,
    /// Anything else. Requests for these are rejected.
    Other,
}

/// Metadata accessors for a node that can carry a thumbnail.
pub trait ThumbnailTarget: Send + Sync + fmt::Debug {
    fn id(&self) -> TargetId;

    fn kind(&self) -> TargetKind;

    /// Stable name used to derive fresh thumbnail filenames.
    fn label(&self) -> String {
        self.original_location()
            .unwrap_or_else(|| format!("target-{}", self.id().0))
    }

    /// Location of the original image. `None` for groups.
    fn original_location(&self) -> Option<String> {
        None
    }

    /// Clockwise rotation applied to the original, in degrees.
    fn rotation(&self) -> f64 {
        0.0
    }

    fn thumbnail_location(&self) -> Option<String>;

    fn set_thumbnail_location(&self, location: String);

    /// Child targets of a group, in display order.
    fn children(&self) -> Vec<Arc<dyn ThumbnailTarget>> {
        Vec::new()
    }

    /// Called after a new thumbnail was written for this target.
    fn thumbnail_changed(&self);
}

/// Fan-out of "thumbnail changed" notifications.
#[derive(Debug, Default)]
struct ChangeListeners(Mutex<Vec<Sender<TargetId>>>);

impl ChangeListeners {
    fn subscribe(&self) -> Receiver<TargetId> {
        let (tx, rx) = channel();
        lock(&self.0).push(tx);
        rx
    }

    fn notify(&self, id: TargetId) {
        lock(&self.0).retain(|tx| tx.send(id).is_ok());
    }
}

#[derive(Debug)]
pub struct PictureTarget {
    id: TargetId,
    original: String,
    rotation: f64,
    thumbnail: Mutex<Option<String>>,
    listeners: ChangeListeners,
}

impl PictureTarget {
    pub fn new(original: impl Into<String>, rotation: f64) -> Self {
        Self {
            id: TargetId::next(),
            original: original.into(),
            rotation,
            thumbnail: Mutex::new(None),
            listeners: ChangeListeners::default(),
        }
    }

    pub fn with_thumbnail(self, location: impl Into<String>) -> Self {
        *lock(&self.thumbnail) = Some(location.into());
        self
    }

    /// Receive this target's id every time its thumbnail changes.
    pub fn subscribe_changes(&self) -> Receiver<TargetId> {
        self.listeners.subscribe()
    }
}

impl ThumbnailTarget for PictureTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Picture
    }

    fn original_location(&self) -> Option<String> {
        Some(self.original.clone())
    }

    fn rotation(&self) -> f64 {
        self.rotation
    }

    fn thumbnail_location(&self) -> Option<String> {
        lock(&self.thumbnail).clone()
    }

    fn set_thumbnail_location(&self, location: String) {
        *lock(&self.thumbnail) = Some(location);
    }

    fn thumbnail_changed(&self) {
        self.listeners.notify(self.id);
    }
}

#[derive(Debug)]
pub struct GroupTarget {
    id: TargetId,
    name: String,
    thumbnail: Mutex<Option<String>>,
    children: Mutex<Vec<Arc<dyn ThumbnailTarget>>>,
    listeners: ChangeListeners,
}

impl GroupTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TargetId::next(),
            name: name.into(),
            thumbnail: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            listeners: ChangeListeners::default(),
        }
    }

    pub fn with_thumbnail(self, location: impl Into<String>) -> Self {
        *lock(&self.thumbnail) = Some(location.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_child(&self, child: Arc<dyn ThumbnailTarget>) {
        lock(&self.children).push(child);
    }

    pub fn subscribe_changes(&self) -> Receiver<TargetId> {
        self.listeners.subscribe()
    }
}

impl ThumbnailTarget for GroupTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Group
    }

    fn label(&self) -> String {
        format!("group:{}", self.name)
    }

    fn thumbnail_location(&self) -> Option<String> {
        lock(&self.thumbnail).clone()
    }

    fn set_thumbnail_location(&self, location: String) {
        *lock(&self.thumbnail) = Some(location);
    }

    fn children(&self) -> Vec<Arc<dyn ThumbnailTarget>> {
        lock(&self.children).clone()
    }

    fn thumbnail_changed(&self) {
        self.listeners.notify(self.id);
    }
}
