//! Producing thumbnails for queued requests.
//!
//! [`ThumbnailFactory`] decides, per request, whether the thumbnail already on
//! disk can be reused or must be rebuilt, and rebuilds it when needed.
//! [`WorkerPool`] runs a fixed number of threads that claim requests from a
//! [`ThumbnailQueue`] and feed them to the factory.
//!
//! ## Picture targets
//!
//! ```text
//! force? ──yes──────────────────────────────────────────────┐
//!   │no                                                     │
//! persist? ──no─────────────────────────────────────────────┤
//!   │yes                                                    │
//! thumbnail readable? ──no──────────────────────────────────┤
//!   │yes                                                    │
//! original reachable? ──no──▶ use existing thumbnail        │
//!   │yes                                                    │
//! thumbnail older than original (and original not          │
//! from the future)? ──yes───────────────────────────────────┤
//!   │no                                                     │
//! size within tolerance? ──yes──▶ use existing thumbnail    │
//!   │no                                                     │
//! smaller than the box, and so                              │
//! is the rotated original? ──no─────────────────────────────┤
//!   │yes                                                    ▼
//! use existing thumbnail                                regenerate
//! ```
//!
//! Regenerating loads the original with its rotation, fits it into a
//! `size x size` box and, when persisting, writes it to the target's thumbnail
//! location. A location that is remote, read-only or fails to write is
//! replaced by a fresh file in the thumbnail directory (one retry).
//!
//! ## Group targets
//!
//! A group's thumbnail is a mosaic of its first picture children, drawn onto
//! the configured template or a plain canvas. The staleness check compares
//! the mosaic against the newest child original or child thumbnail.
//!
//! Every processed request produces exactly one [`ThumbnailEvent`]. Errors are
//! reported as [`ThumbnailOutcome::Broken`] and never retried automatically.

use crate::cache::ImageCache;
use crate::identity::ImageIdentity;
use crate::imaging::calculations::{
    fitted_dimensions, is_thumbnail_size_ok, is_undersized, rotated_bounds,
};
use crate::imaging::codec;
use crate::imaging::operations::{MosaicConfig, compose_mosaic};
use crate::imaging::{
    ByteSource, Dimensions, PictureError, Quality, ScaleMode, ScaleSettings, TargetMode,
};
use crate::naming::{ThumbnailNamer, writable_path};
use crate::queue::{Claim, ThumbnailQueue};
use crate::request::ThumbnailRequest;
use crate::scalable::ScalableImage;
use crate::source::SourceImage;
use crate::targets::{TargetId, TargetKind, ThumbnailTarget};
use image::RgbImage;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, PictureError>;

/// Policy for producing thumbnails.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailSettings {
    /// Edge of the square box thumbnails are fitted into.
    pub size: u32,
    /// Write thumbnails to disk and reuse them across requests.
    pub persist: bool,
    pub quality: Quality,
    pub mode: ScaleMode,
    pub steps: u32,
    pub dont_enlarge: bool,
    pub size_tolerance: f64,
    pub require_both_dimensions: bool,
    pub max_alloc: Option<u64>,
    pub mosaic: MosaicConfig,
    /// Background image for group mosaics.
    pub group_template: Option<String>,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            size: 350,
            persist: true,
            quality: Quality::default(),
            mode: ScaleMode::Fast,
            steps: 1,
            dont_enlarge: true,
            size_tolerance: 1.02,
            require_both_dimensions: true,
            max_alloc: None,
            mosaic: MosaicConfig::default(),
            group_template: None,
        }
    }
}

impl ThumbnailSettings {
    /// Scale settings fitting an original into the thumbnail box.
    pub fn scale_settings(&self) -> ScaleSettings {
        ScaleSettings {
            target: TargetMode::fit_box(self.size, self.size),
            mode: self.mode,
            steps: self.steps,
            dont_enlarge: self.dont_enlarge,
            quality: self.quality,
            max_alloc: self.max_alloc,
        }
    }
}

/// Where a delivered thumbnail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailOrigin {
    /// The existing file was current and reused.
    Disk,
    /// A new thumbnail was rendered.
    Regenerated,
}

/// A thumbnail ready for display.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bitmap: Arc<RgbImage>,
    pub origin: ThumbnailOrigin,
    /// Where it is stored, if it was persisted.
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ThumbnailOutcome {
    Loaded(Thumbnail),
    /// Show a broken-image placeholder. Carries the reason.
    Broken(String),
}

/// Result of one processed request, delivered on the factory's event channel.
#[derive(Debug, Clone)]
pub struct ThumbnailEvent {
    pub target: TargetId,
    pub outcome: ThumbnailOutcome,
}

pub struct ThumbnailFactory {
    settings: ThumbnailSettings,
    source: Arc<dyn ByteSource>,
    namer: ThumbnailNamer,
    cache: Option<ImageCache>,
    events: Option<Sender<ThumbnailEvent>>,
}

impl std::fmt::Debug for ThumbnailFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailFactory")
            .field("settings", &self.settings)
            .field("namer", &self.namer)
            .finish()
    }
}

impl ThumbnailFactory {
    pub fn new(
        settings: ThumbnailSettings,
        source: Arc<dyn ByteSource>,
        namer: ThumbnailNamer,
    ) -> Self {
        Self {
            settings,
            source,
            namer,
            cache: None,
            events: None,
        }
    }

    /// Decode originals through `cache`, and clear it when a thumbnail runs
    /// out of memory.
    pub fn with_cache(mut self, cache: ImageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Deliver a [`ThumbnailEvent`] for every handled request.
    pub fn with_events(mut self, events: Sender<ThumbnailEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    /// Process `request` and report the outcome on the event channel.
    pub fn handle(&self, request: &ThumbnailRequest) -> ThumbnailOutcome {
        let target = request.target_id();
        let outcome = match self.process(request) {
            Ok(thumbnail) => {
                debug!(%target, origin = ?thumbnail.origin, "thumbnail delivered");
                ThumbnailOutcome::Loaded(thumbnail)
            }
            Err(err) => {
                error!(%target, label = %request.target.label(), error = %err, "thumbnail broken");
                if err.is_out_of_memory()
                    && let Some(cache) = &self.cache
                {
                    cache.clear();
                }
                ThumbnailOutcome::Broken(err.to_string())
            }
        };
        if let Some(events) = &self.events {
            // A gone receiver just means nobody is listening any more
            let _ = events.send(ThumbnailEvent {
                target,
                outcome: outcome.clone(),
            });
        }
        outcome
    }

    /// Produce the thumbnail for `request`.
    pub fn process(&self, request: &ThumbnailRequest) -> Result<Thumbnail> {
        match request.target.kind() {
            TargetKind::Picture => self.picture(request),
            TargetKind::Group => self.group(request),
            TargetKind::Other => Err(PictureError::InvalidTarget(format!(
                "{} has no image role",
                request.target.label()
            ))),
        }
    }

    // =========================================================================
    // Pictures
    // =========================================================================

    fn picture(&self, request: &ThumbnailRequest) -> Result<Thumbnail> {
        let target = request.target.as_ref();
        let original = target.original_location().ok_or_else(|| {
            PictureError::InvalidTarget(format!("{} has no original", target.label()))
        })?;

        if !request.force
            && self.settings.persist
            && let Some(existing) = self.reusable_picture_thumbnail(target, &original)
        {
            return Ok(existing);
        }

        info!(original = %original, force = request.force, "regenerating thumbnail");
        let identity = ImageIdentity::new(original.as_str(), target.rotation());
        let mut image = ScalableImage::new(self.settings.scale_settings());
        match &self.cache {
            Some(cache) => {
                image = image.with_cache(cache.clone());
                image.load_cached(&identity)?;
            }
            None => image.load(self.source.as_ref(), identity)?,
        }
        image.scale()?;
        let bitmap = image
            .take_scaled()
            .ok_or_else(|| PictureError::NotReady(format!("{original} produced no bitmap")))?;
        self.deliver_regenerated(target, bitmap)
    }

    fn reusable_picture_thumbnail(
        &self,
        target: &dyn ThumbnailTarget,
        original: &str,
    ) -> Option<Thumbnail> {
        let location = target.thumbnail_location()?;
        let thumb_modified = self.source.modified(&location).ok()?;

        match self.source.modified(original) {
            Ok(original_modified) => {
                if is_stale(thumb_modified, original_modified) {
                    debug!(%location, "thumbnail older than original");
                    return None;
                }
            }
            Err(err) => {
                warn!(%original, error = %err, "original unreachable, keeping existing thumbnail");
                return self.load_existing(&location);
            }
        }

        let existing = self.load_existing(&location)?;
        let actual = Dimensions::new(existing.bitmap.width(), existing.bitmap.height());
        let desired = Dimensions::new(self.settings.size, self.settings.size);
        let tolerance = self.settings.size_tolerance;
        let require_both = self.settings.require_both_dimensions;
        if is_thumbnail_size_ok(actual, desired, tolerance, require_both) {
            return Some(existing);
        }
        if !(self.settings.dont_enlarge && is_undersized(actual, desired, tolerance)) {
            debug!(%location, %actual, %desired, "thumbnail size off");
            return None;
        }

        // Small is fine only if the original is that small too
        let original_size = match self.original_dimensions(original, target.rotation()) {
            Ok(size) => size,
            Err(err) => {
                warn!(
                    %original,
                    error = %err,
                    "original header unreadable, keeping existing thumbnail"
                );
                return Some(existing);
            }
        };
        let expected = fitted_dimensions(original_size, desired, true);
        if !is_thumbnail_size_ok(actual, expected, tolerance, require_both) {
            debug!(%location, %actual, %expected, "thumbnail smaller than its original allows");
            return None;
        }
        Some(existing)
    }

    /// Rotated pixel size of `original`, read from its header.
    fn original_dimensions(&self, original: &str, rotation: f64) -> Result<Dimensions> {
        let mut stream = self.source.open(original)?;
        let mut bytes = Vec::new();
        stream.reader.read_to_end(&mut bytes)?;
        Ok(rotated_bounds(codec::dimensions(&bytes)?, rotation))
    }

    fn load_existing(&self, location: &str) -> Option<Thumbnail> {
        match self.decode(location, 0.0) {
            Ok(bitmap) => Some(Thumbnail {
                bitmap,
                origin: ThumbnailOrigin::Disk,
                location: Some(location.to_string()),
            }),
            Err(err) => {
                debug!(%location, error = %err, "existing thumbnail unreadable");
                None
            }
        }
    }

    fn decode(&self, location: &str, rotation: f64) -> Result<Arc<RgbImage>> {
        SourceImage::new(ImageIdentity::new(location, rotation), self.settings.max_alloc)
            .load(self.source.as_ref())
    }

    // =========================================================================
    // Groups
    // =========================================================================

    fn group(&self, request: &ThumbnailRequest) -> Result<Thumbnail> {
        let target = request.target.as_ref();
        let template = self
            .settings
            .group_template
            .as_deref()
            .map(|t| self.decode(t, 0.0))
            .transpose()?;
        let canvas = template
            .as_ref()
            .map(|t| Dimensions::new(t.width(), t.height()))
            .unwrap_or(self.settings.mosaic.canvas);
        let capacity = self.settings.mosaic.layout(canvas).capacity() as usize;
        let children: Vec<_> = target
            .children()
            .into_iter()
            .filter(|c| c.kind() == TargetKind::Picture)
            .take(capacity)
            .collect();

        if !request.force
            && self.settings.persist
            && let Some(existing) = self.reusable_group_thumbnail(target, &children, canvas)
        {
            return Ok(existing);
        }

        info!(group = %target.label(), children = children.len(), "composing group mosaic");
        let minis: Vec<RgbImage> = children
            .iter()
            .filter_map(|child| match self.mini_for(child.as_ref()) {
                Ok(bitmap) => Some(Arc::unwrap_or_clone(bitmap)),
                Err(err) => {
                    warn!(child = %child.label(), error = %err, "skipping child in mosaic");
                    None
                }
            })
            .collect();
        let (mosaic, _) = compose_mosaic(
            template.as_deref(),
            &minis,
            &self.settings.mosaic,
            self.settings.max_alloc,
        )?;
        self.deliver_regenerated(target, mosaic)
    }

    /// A child's existing thumbnail, or its rotated original.
    fn mini_for(&self, child: &dyn ThumbnailTarget) -> Result<Arc<RgbImage>> {
        if let Some(location) = child.thumbnail_location()
            && let Ok(bitmap) = self.decode(&location, 0.0)
        {
            return Ok(bitmap);
        }
        let original = child.original_location().ok_or_else(|| {
            PictureError::InvalidTarget(format!("{} has no original", child.label()))
        })?;
        match &self.cache {
            Some(cache) => cache.get_or_load(&ImageIdentity::new(original, child.rotation())),
            None => self.decode(&original, child.rotation()),
        }
    }

    fn reusable_group_thumbnail(
        &self,
        target: &dyn ThumbnailTarget,
        children: &[Arc<dyn ThumbnailTarget>],
        canvas: Dimensions,
    ) -> Option<Thumbnail> {
        let location = target.thumbnail_location()?;
        let thumb_modified = self.source.modified(&location).ok()?;

        let newest_child = children
            .iter()
            .flat_map(|c| [c.original_location(), c.thumbnail_location()])
            .flatten()
            .filter_map(|l| self.source.modified(&l).ok())
            .max();
        if let Some(newest) = newest_child
            && is_stale(thumb_modified, newest)
        {
            debug!(%location, "group mosaic older than its children");
            return None;
        }

        let existing = self.load_existing(&location)?;
        let actual = Dimensions::new(existing.bitmap.width(), existing.bitmap.height());
        if !is_thumbnail_size_ok(actual, canvas, self.settings.size_tolerance, true) {
            return None;
        }
        Some(existing)
    }

    // =========================================================================
    // Storing
    // =========================================================================

    fn deliver_regenerated(
        &self,
        target: &dyn ThumbnailTarget,
        bitmap: RgbImage,
    ) -> Result<Thumbnail> {
        let location = if self.settings.persist {
            let location = self.store(target, &bitmap)?;
            target.set_thumbnail_location(location.clone());
            target.thumbnail_changed();
            Some(location)
        } else {
            None
        };
        Ok(Thumbnail {
            bitmap: Arc::new(bitmap),
            origin: ThumbnailOrigin::Regenerated,
            location,
        })
    }

    /// Write `bitmap` for `target`, falling back to a fresh path once.
    fn store(&self, target: &dyn ThumbnailTarget, bitmap: &RgbImage) -> Result<String> {
        let label = target.label();
        let preferred = target
            .thumbnail_location()
            .and_then(|l| writable_path(&l));

        let path = match preferred {
            Some(path) => match self.write_jpeg(&path, bitmap) {
                Ok(()) => path,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "thumbnail not writable, using a fresh path"
                    );
                    self.write_fresh(&label, bitmap)?
                }
            },
            None => self.write_fresh(&label, bitmap)?,
        };
        Ok(path.display().to_string())
    }

    fn write_fresh(&self, label: &str, bitmap: &RgbImage) -> Result<PathBuf> {
        std::fs::create_dir_all(self.namer.directory())?;
        let path = self.namer.fresh_path(label);
        self.write_jpeg(&path, bitmap)?;
        Ok(path)
    }

    fn write_jpeg(&self, path: &Path, bitmap: &RgbImage) -> Result<()> {
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        codec::encode_jpeg(bitmap, self.settings.quality, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// A thumbnail is stale when its source changed after it was written, unless
/// the source claims to come from the future (which would regenerate forever).
fn is_stale(thumbnail: SystemTime, source: SystemTime) -> bool {
    thumbnail < source && source <= SystemTime::now()
}

/// Fixed-size pool of threads draining a [`ThumbnailQueue`].
pub struct WorkerPool {
    queue: ThumbnailQueue,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `count` workers. Idle workers re-check the queue every `poll_interval`.
    pub fn start(
        count: usize,
        poll_interval: Duration,
        queue: ThumbnailQueue,
        factory: Arc<ThumbnailFactory>,
    ) -> std::io::Result<Self> {
        let mut pool = Self {
            queue,
            handles: Vec::with_capacity(count),
        };
        for i in 0..count.max(1) {
            let queue = pool.queue.clone();
            let factory = Arc::clone(&factory);
            let handle = std::thread::Builder::new()
                .name(format!("thumbnail-worker-{i}"))
                .spawn(move || work(&queue, &factory, poll_interval))?;
            pool.handles.push(handle);
        }
        debug!(workers = pool.handles.len(), "thumbnail workers started");
        Ok(pool)
    }

    pub fn queue(&self) -> &ThumbnailQueue {
        &self.queue
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for every worker to finish its current request.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.queue.close();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("thumbnail worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn work(queue: &ThumbnailQueue, factory: &ThumbnailFactory, poll_interval: Duration) {
    loop {
        match queue.claim(poll_interval) {
            Claim::Request(claimed) => {
                factory.handle(&claimed);
            }
            Claim::Idle => {}
            Claim::Closed => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockSource;
    use crate::request::Priority;
    use crate::targets::{GroupTarget, PictureTarget};
    use std::sync::mpsc::channel;
    use tempfile::TempDir;

    const ORIGINAL: &str = "mem://photos/a.jpg";
    const THUMB: &str = "mem://thumbs/a.jpg";

    fn secs(s: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(s)
    }

    /// Original 700x466 at t=1000.
    fn source_with_original() -> Arc<MockSource> {
        Arc::new(MockSource::new().with_jpeg(ORIGINAL, 700, 466))
    }

    fn factory(source: Arc<MockSource>, tmp: &TempDir) -> ThumbnailFactory {
        ThumbnailFactory::new(
            ThumbnailSettings::default(),
            source,
            ThumbnailNamer::new(tmp.path().join("thumbs"), "Thumbnail_"),
        )
    }

    fn picture_with_thumb() -> Arc<PictureTarget> {
        Arc::new(PictureTarget::new(ORIGINAL, 0.0).with_thumbnail(THUMB))
    }

    fn request(target: Arc<dyn ThumbnailTarget>) -> ThumbnailRequest {
        ThumbnailRequest::new(target, Priority::Medium)
    }

    fn origin(outcome: &ThumbnailOutcome) -> ThumbnailOrigin {
        match outcome {
            ThumbnailOutcome::Loaded(t) => t.origin,
            ThumbnailOutcome::Broken(why) => panic!("thumbnail broken: {why}"),
        }
    }

    // =========================================================================
    // Staleness
    // =========================================================================

    #[test]
    fn fresh_thumbnail_is_reused_without_decoding_original() {
        let tmp = TempDir::new().unwrap();
        let source = source_with_original();
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(350, 233), secs(2_000));

        let outcome = factory(source.clone(), &tmp).handle(&request(picture_with_thumb()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Disk);
        assert_eq!(source.open_count(ORIGINAL), 0);
    }

    #[test]
    fn older_thumbnail_is_regenerated() {
        let tmp = TempDir::new().unwrap();
        let source = source_with_original();
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(350, 233), secs(500));
        let target = picture_with_thumb();
        let changes = target.subscribe_changes();

        let outcome = factory(source.clone(), &tmp).handle(&request(target.clone()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Regenerated);
        assert_eq!(source.open_count(ORIGINAL), 1);
        // mem:// is not writable, so a fresh file was minted
        let location = target.thumbnail_location().unwrap();
        assert!(location.starts_with(tmp.path().join("thumbs").to_str().unwrap()));
        assert_eq!(
            crate::test_helpers::image_size(Path::new(&location)),
            (350, 233)
        );
        assert_eq!(changes.try_recv().unwrap(), target.id());
    }

    #[test]
    fn original_from_the_future_does_not_force_regeneration() {
        let tmp = TempDir::new().unwrap();
        let source = source_with_original();
        source.set_modified(ORIGINAL, SystemTime::now() + Duration::from_secs(86_400));
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(350, 233), secs(2_000));

        let outcome = factory(source.clone(), &tmp).handle(&request(picture_with_thumb()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Disk);
        assert_eq!(source.open_count(ORIGINAL), 0);
    }

    #[test]
    fn unreachable_original_keeps_existing_thumbnail() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new());
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(100, 50), secs(2_000));

        let outcome = factory(source, &tmp).handle(&request(picture_with_thumb()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Disk);
    }

    #[test]
    fn wrong_size_thumbnail_is_regenerated() {
        let tmp = TempDir::new().unwrap();
        let source = source_with_original();
        // Way off, and larger than the box so "don't enlarge" does not apply
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(500, 333), secs(2_000));

        let outcome = factory(source.clone(), &tmp).handle(&request(picture_with_thumb()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Regenerated);
    }

    #[test]
    fn undersized_thumbnail_of_large_original_is_regenerated() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new().with_jpeg(ORIGINAL, 1500, 1000));
        // Left over from when thumbnails were 150 wide
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(150, 100), secs(2_000));

        let outcome = factory(source.clone(), &tmp).handle(&request(picture_with_thumb()));

        let ThumbnailOutcome::Loaded(thumb) = outcome else {
            panic!("expected a thumbnail");
        };
        assert_eq!(thumb.origin, ThumbnailOrigin::Regenerated);
        assert_eq!((thumb.bitmap.width(), thumb.bitmap.height()), (350, 233));
    }

    #[test]
    fn thumbnail_of_small_original_keeps_its_size() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new().with_jpeg(ORIGINAL, 200, 100));
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(200, 100), secs(2_000));

        let outcome = factory(source.clone(), &tmp).handle(&request(picture_with_thumb()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Disk);
        // Only the header was read, nothing was rendered
        assert_eq!(source.open_count(ORIGINAL), 1);
    }

    #[test]
    fn small_original_with_shrunken_thumbnail_is_regenerated() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new().with_jpeg(ORIGINAL, 200, 100));
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(120, 60), secs(2_000));

        let outcome = factory(source.clone(), &tmp).handle(&request(picture_with_thumb()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Regenerated);
    }

    #[test]
    fn force_skips_the_staleness_check() {
        let tmp = TempDir::new().unwrap();
        let source = source_with_original();
        source.insert(THUMB, crate::test_helpers::jpeg_bytes(350, 233), secs(2_000));

        let forced = ThumbnailRequest::forced(picture_with_thumb(), Priority::High);
        let outcome = factory(source.clone(), &tmp).handle(&forced);

        assert_eq!(origin(&outcome), ThumbnailOrigin::Regenerated);
        assert_eq!(source.open_count(ORIGINAL), 1);
    }

    // =========================================================================
    // Regeneration
    // =========================================================================

    #[test]
    fn missing_thumbnail_location_mints_fresh_file() {
        let tmp = TempDir::new().unwrap();
        let target = Arc::new(PictureTarget::new(ORIGINAL, 90.0));

        let outcome = factory(source_with_original(), &tmp).handle(&request(target.clone()));

        let ThumbnailOutcome::Loaded(thumb) = outcome else {
            panic!("expected a thumbnail");
        };
        // Rotated 90°: 466x700 fitted into 350x350
        assert_eq!((thumb.bitmap.width(), thumb.bitmap.height()), (233, 350));
        assert_eq!(thumb.location, target.thumbnail_location());
    }

    #[test]
    fn writable_location_is_overwritten_in_place() {
        let tmp = TempDir::new().unwrap();
        let existing = tmp.path().join("mine.jpg");
        std::fs::write(&existing, b"stale").unwrap();
        let target = Arc::new(
            PictureTarget::new(ORIGINAL, 0.0).with_thumbnail(existing.display().to_string()),
        );

        factory(source_with_original(), &tmp).handle(&request(target.clone()));

        assert_eq!(
            target.thumbnail_location(),
            Some(existing.display().to_string())
        );
        assert_eq!(crate::test_helpers::image_size(&existing), (350, 233));
    }

    #[test]
    fn without_persist_nothing_is_written() {
        let tmp = TempDir::new().unwrap();
        let mut settings = ThumbnailSettings::default();
        settings.persist = false;
        let factory = ThumbnailFactory::new(
            settings,
            source_with_original(),
            ThumbnailNamer::new(tmp.path().join("thumbs"), "T_"),
        );
        let target = Arc::new(PictureTarget::new(ORIGINAL, 0.0));

        let outcome = factory.handle(&request(target.clone()));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Regenerated);
        assert_eq!(target.thumbnail_location(), None);
        assert!(!tmp.path().join("thumbs").exists());
    }

    #[test]
    fn cache_shares_decoded_original_between_requests() {
        let tmp = TempDir::new().unwrap();
        let source = source_with_original();
        let cache = ImageCache::new(4, source.clone(), None).unwrap();
        let factory = factory(source.clone(), &tmp).with_cache(cache.clone());
        let target = Arc::new(PictureTarget::new(ORIGINAL, 0.0));

        for _ in 0..2 {
            let forced = ThumbnailRequest::forced(target.clone(), Priority::Medium);
            assert_eq!(origin(&factory.handle(&forced)), ThumbnailOrigin::Regenerated);
        }

        assert_eq!(source.open_count(ORIGINAL), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn unreadable_original_is_broken() {
        let tmp = TempDir::new().unwrap();
        let target = Arc::new(PictureTarget::new("mem://missing.jpg", 0.0));
        let (tx, rx) = channel();
        let factory = factory(Arc::new(MockSource::new()), &tmp).with_events(tx);

        let outcome = factory.handle(&request(target.clone()));

        assert!(matches!(outcome, ThumbnailOutcome::Broken(_)));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.target, target.id());
        assert!(matches!(event.outcome, ThumbnailOutcome::Broken(_)));
    }

    #[test]
    fn target_without_image_role_is_invalid() {
        #[derive(Debug)]
        struct Folder;

        impl ThumbnailTarget for Folder {
            fn id(&self) -> TargetId {
                TargetId(7)
            }
            fn kind(&self) -> TargetKind {
                TargetKind::Other
            }
            fn thumbnail_location(&self) -> Option<String> {
                None
            }
            fn set_thumbnail_location(&self, _location: String) {}
            fn thumbnail_changed(&self) {}
        }

        let tmp = TempDir::new().unwrap();
        let result = factory(source_with_original(), &tmp).process(&request(Arc::new(Folder)));
        assert!(matches!(result, Err(PictureError::InvalidTarget(_))));
    }

    // =========================================================================
    // Groups
    // =========================================================================

    #[test]
    fn group_mosaic_is_composed_and_stored() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(
            MockSource::new()
                .with_jpeg("mem://g/1.jpg", 400, 300)
                .with_jpeg("mem://g/2.jpg", 300, 400),
        );
        let group = Arc::new(GroupTarget::new("Holidays"));
        group.add_child(Arc::new(PictureTarget::new("mem://g/1.jpg", 0.0)));
        group.add_child(Arc::new(PictureTarget::new("mem://g/2.jpg", 0.0)));
        group.add_child(Arc::new(GroupTarget::new("Nested")));

        let outcome = factory(source, &tmp).handle(&request(group.clone()));

        let ThumbnailOutcome::Loaded(thumb) = outcome else {
            panic!("expected a mosaic");
        };
        assert_eq!((thumb.bitmap.width(), thumb.bitmap.height()), (350, 300));
        let location = group.thumbnail_location().unwrap();
        assert_eq!(
            crate::test_helpers::image_size(Path::new(&location)),
            (350, 300)
        );
    }

    #[test]
    fn current_group_mosaic_is_reused() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new().with_jpeg("mem://g/1.jpg", 400, 300));
        source.insert(
            "mem://g/mosaic.jpg",
            crate::test_helpers::jpeg_bytes(350, 300),
            secs(5_000),
        );
        let group = Arc::new(GroupTarget::new("Holidays").with_thumbnail("mem://g/mosaic.jpg"));
        group.add_child(Arc::new(PictureTarget::new("mem://g/1.jpg", 0.0)));

        let outcome = factory(source.clone(), &tmp).handle(&request(group));

        assert_eq!(origin(&outcome), ThumbnailOrigin::Disk);
        assert_eq!(source.open_count("mem://g/1.jpg"), 0);
    }

    // =========================================================================
    // Worker pool
    // =========================================================================

    #[test]
    fn pool_processes_every_request_once() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(
            MockSource::new()
                .with_jpeg("mem://p/1.jpg", 200, 100)
                .with_jpeg("mem://p/2.jpg", 200, 100)
                .with_jpeg("mem://p/3.jpg", 200, 100),
        );
        let (tx, rx) = channel();
        let factory = Arc::new(factory(source.clone(), &tmp).with_events(tx));
        let queue = ThumbnailQueue::new();
        let pool = WorkerPool::start(2, Duration::from_millis(20), queue.clone(), factory).unwrap();
        assert_eq!(pool.size(), 2);

        let targets: Vec<Arc<PictureTarget>> = (1..=3)
            .map(|i| Arc::new(PictureTarget::new(format!("mem://p/{i}.jpg"), 0.0)))
            .collect();
        for t in &targets {
            queue.enqueue(request(t.clone()));
        }

        let mut seen: Vec<TargetId> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(30)).unwrap().target)
            .collect();
        seen.sort();
        let mut expected: Vec<TargetId> = targets.iter().map(|t| t.id()).collect();
        expected.sort();
        assert_eq!(seen, expected);

        pool.shutdown();
        assert!(queue.is_closed());
        for i in 1..=3 {
            assert_eq!(source.open_count(&format!("mem://p/{i}.jpg")), 1);
        }
    }
}
