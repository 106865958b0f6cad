//! Producing a scaled bitmap from a decoded original.
//!
//! A [`ScalableImage`] pairs a [`SourceImage`] with a [`TargetMode`] and
//! turns the source bitmap into a derived one. It can be driven in two ways:
//!
//! - **Synchronously** ([`load`](ScalableImage::load) + [`scale`](ScalableImage::scale)),
//!   on the caller's thread and without touching the shared cache. Batch export
//!   and the thumbnail workers use this path.
//! - **In the background** ([`scale_in_background`](ScalableImage::scale_in_background),
//!   [`load_and_scale_in_background`](ScalableImage::load_and_scale_in_background)),
//!   on a dedicated thread that takes ownership of the image and hands it back
//!   through the join handle. Interactive viewers use this path together with
//!   an [`ImageCache`].
//!
//! Status changes are published as [`ScaleEvent`]s to every subscriber.
//! Running out of memory while scaling drops the scaled bitmap, clears the
//! shared cache and emits [`ScaleEvent::OutOfMemory`] before the final `Error`.

use crate::cache::ImageCache;
use crate::identity::ImageIdentity;
use crate::imaging::calculations::fit_box_factor;
use crate::imaging::codec;
use crate::imaging::{
    ByteSource, Dimensions, PictureError, Quality, ScaleMode, ScaleSettings, TargetMode,
};
use crate::request::Priority;
use crate::source::{SourceEvent, SourceImage, SourceStatus};
use image::RgbImage;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// How often a background scale re-checks a source it is forwarding progress for.
const SOURCE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleStatus {
    Uninitialised,
    /// Memory is being reclaimed after an out-of-memory failure.
    GarbageCollection,
    Loading,
    Loaded,
    Scaling,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScaleEvent {
    Status(ScaleStatus, String),
    /// Load progress of the underlying source, in percent.
    SourceProgress(u8),
    /// Scaling ran out of memory. Consumers should warn the user and may retry smaller.
    OutOfMemory,
}

pub struct ScalableImage {
    settings: ScaleSettings,
    cache: Option<ImageCache>,
    source: Option<Arc<SourceImage>>,
    scaled: Option<RgbImage>,
    factor: Option<f64>,
    status: ScaleStatus,
    message: String,
    subscribers: Vec<Sender<ScaleEvent>>,
}

impl std::fmt::Debug for ScalableImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalableImage")
            .field("settings", &self.settings)
            .field("source", &self.source)
            .field("status", &self.status)
            .field("scaled", &self.scaled_dimensions())
            .finish()
    }
}

impl ScalableImage {
    pub fn new(settings: ScaleSettings) -> Self {
        Self {
            settings,
            cache: None,
            source: None,
            scaled: None,
            factor: None,
            status: ScaleStatus::Uninitialised,
            message: String::new(),
            subscribers: Vec::new(),
        }
    }

    /// Route loads through `cache` and clear it on memory pressure.
    pub fn with_cache(mut self, cache: ImageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn subscribe(&mut self) -> Receiver<ScaleEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: ScaleEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&mut self, status: ScaleStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        debug!(?status, message = %self.message, "scale status");
        self.emit(ScaleEvent::Status(status, self.message.clone()));
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set the target. Degenerate fit boxes are replaced by 100x100.
    pub fn set_target(&mut self, target: TargetMode) {
        self.settings.target = match target {
            TargetMode::FitBox { width, height } => TargetMode::fit_box(width, height),
            explicit => explicit,
        };
    }

    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        self.settings.mode = mode;
    }

    pub fn set_scale_steps(&mut self, steps: u32) {
        self.settings.steps = steps.max(1);
    }

    pub fn set_dont_enlarge(&mut self, dont_enlarge: bool) {
        self.settings.dont_enlarge = dont_enlarge;
    }

    pub fn set_quality(&mut self, quality: Quality) {
        self.settings.quality = quality;
    }

    pub fn settings(&self) -> &ScaleSettings {
        &self.settings
    }

    /// Use an already loaded (or loading) source. Any previous scale result is dropped.
    pub fn set_source(&mut self, source: Arc<SourceImage>) {
        self.source = Some(source);
        self.scaled = None;
        self.factor = None;
    }

    pub fn source(&self) -> Option<&Arc<SourceImage>> {
        self.source.as_ref()
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Decode `identity` on this thread, bypassing the cache.
    pub fn load(
        &mut self,
        bytes: &dyn ByteSource,
        identity: ImageIdentity,
    ) -> Result<(), PictureError> {
        let max_alloc = self.settings.max_alloc;
        let source = Arc::new(SourceImage::new(identity, max_alloc));
        self.set_source(Arc::clone(&source));
        self.set_status(ScaleStatus::Loading, "Loading");
        match source.load(bytes) {
            Ok(_) => {
                self.set_status(ScaleStatus::Loaded, source.status_message());
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Fetch `identity` through the cache and wait for it.
    pub fn load_cached(&mut self, identity: &ImageIdentity) -> Result<(), PictureError> {
        let Some(cache) = self.cache.clone() else {
            return Err(self.fail(PictureError::NotReady("no image cache configured".into())));
        };
        let source = cache.get_or_create(identity);
        self.set_source(Arc::clone(&source));
        self.set_status(ScaleStatus::Loading, "Loading");
        match self.await_source(&source) {
            Ok(_) => {
                self.set_status(ScaleStatus::Loaded, source.status_message());
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Block on `source`, forwarding its progress to our subscribers.
    fn await_source(&mut self, source: &SourceImage) -> Result<Arc<RgbImage>, PictureError> {
        let rx = source.subscribe();
        while source.status().is_busy() {
            match rx.recv_timeout(SOURCE_POLL) {
                Ok(SourceEvent::Progress(p)) => self.emit(ScaleEvent::SourceProgress(p)),
                Ok(SourceEvent::Status(status, _)) if status.is_terminal() => break,
                Ok(SourceEvent::Status(..)) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        source.wait()
    }

    /// Abort the source load unless it is for `keep`.
    pub fn stop_loading_except(&self, keep: &ImageIdentity) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| s.stop_loading_except(keep))
    }

    // =========================================================================
    // Scaling
    // =========================================================================

    /// Scale factor the current target implies for `source`.
    pub fn factor_for(&self, source: Dimensions) -> f64 {
        match self.settings.target {
            TargetMode::ExplicitFactor(f) => f,
            TargetMode::FitBox { width, height } => fit_box_factor(
                source,
                Dimensions::new(width, height),
                self.settings.dont_enlarge,
            ),
        }
    }

    /// Scale the ready source on this thread.
    pub fn scale(&mut self) -> Result<(), PictureError> {
        let Some(source) = self.source.clone() else {
            return Err(self.fail(PictureError::NotReady("no source image".into())));
        };
        let Some(bitmap) = source.bitmap() else {
            let err = PictureError::NotReady(format!("{} is not loaded", source.identity()));
            return Err(self.fail(err));
        };

        let factor = self.factor_for(Dimensions::new(bitmap.width(), bitmap.height()));
        if !(factor.is_finite() && factor > 0.0) {
            let err = PictureError::InvalidTarget(format!("scale factor {factor} is not positive"));
            return Err(self.fail(err));
        }

        self.set_status(ScaleStatus::Scaling, format!("Scaling: {}", source.identity()));
        let result = codec::scale(
            &bitmap,
            factor,
            self.settings.mode,
            self.settings.steps,
            self.settings.max_alloc,
        );
        drop(bitmap);

        match result {
            Ok(scaled) => {
                let message = format!("Scaled to {} x {}", scaled.width(), scaled.height());
                self.scaled = Some(scaled);
                self.factor = Some(factor);
                self.set_status(ScaleStatus::Ready, message);
                Ok(())
            }
            Err(err) if err.is_out_of_memory() => Err(self.out_of_memory(err)),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn out_of_memory(&mut self, err: PictureError) -> PictureError {
        warn!(error = %err, "out of memory while scaling");
        self.set_status(ScaleStatus::GarbageCollection, "Freeing memory");
        self.scaled = None;
        self.factor = None;
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        self.emit(ScaleEvent::OutOfMemory);
        self.fail(err)
    }

    fn fail(&mut self, err: PictureError) -> PictureError {
        let message = match &err {
            PictureError::Aborted => "Aborted".to_string(),
            other => other.to_string(),
        };
        self.scaled = None;
        self.factor = None;
        self.set_status(ScaleStatus::Error, message);
        err
    }

    /// Scale on a new thread, waiting for the source first if it is still loading.
    ///
    /// The image is handed back through the join handle once it settles.
    /// `priority` names the thread (`scale-high`, ...) so it shows up in
    /// traces and debuggers; std threads cannot be reprioritised portably.
    pub fn scale_in_background(mut self, priority: Priority) -> std::io::Result<JoinHandle<Self>> {
        debug!(%priority, "scaling in background");
        std::thread::Builder::new()
            .name(format!("scale-{priority}"))
            .spawn(move || {
                self.run_background(None);
                self
            })
    }

    /// Load `identity` through the cache and scale it, on a new thread.
    pub fn load_and_scale_in_background(
        mut self,
        identity: ImageIdentity,
    ) -> std::io::Result<JoinHandle<Self>> {
        std::thread::Builder::new()
            .name("load-and-scale".into())
            .spawn(move || {
                self.run_background(Some(identity));
                self
            })
    }

    fn run_background(&mut self, identity: Option<ImageIdentity>) {
        if let Some(identity) = identity
            && self.load_cached(&identity).is_err()
        {
            return;
        }
        let Some(source) = self.source.clone() else {
            self.fail(PictureError::NotReady("no source image".into()));
            return;
        };
        if source.status() != SourceStatus::Ready {
            self.set_status(ScaleStatus::Loading, "Loading");
            if let Err(err) = self.await_source(&source) {
                self.fail(err);
                return;
            }
            self.set_status(ScaleStatus::Loaded, source.status_message());
        }
        // Errors are already reflected in the status
        let _ = self.scale();
    }

    // =========================================================================
    // Results
    // =========================================================================

    pub fn status(&self) -> ScaleStatus {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.message
    }

    pub fn scaled(&self) -> Option<&RgbImage> {
        self.scaled.as_ref()
    }

    pub fn take_scaled(&mut self) -> Option<RgbImage> {
        self.factor = None;
        self.scaled.take()
    }

    pub fn scale_factor(&self) -> Option<f64> {
        self.factor
    }

    pub fn scaled_dimensions(&self) -> Option<Dimensions> {
        self.scaled
            .as_ref()
            .map(|s| Dimensions::new(s.width(), s.height()))
    }

    /// Load progress of the source in percent, 0 without a source.
    pub fn percent_loaded(&self) -> u8 {
        self.source.as_ref().map_or(0, |s| s.percent_loaded())
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Encode the scaled bitmap as JPEG into `writer`.
    pub fn encode_to<W: Write>(&self, writer: W, quality: Quality) -> Result<(), PictureError> {
        let scaled = self
            .scaled
            .as_ref()
            .ok_or_else(|| PictureError::NotReady("image has not been scaled".into()))?;
        codec::encode_jpeg(scaled, quality, writer)
    }

    /// Encode into memory, e.g. for attaching to a message.
    pub fn encode_to_vec(&self, quality: Quality) -> Result<Vec<u8>, PictureError> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf, quality)?;
        Ok(buf)
    }

    /// Encode into the file at `path`, replacing it.
    pub fn write_to_file(&self, path: &Path, quality: Quality) -> Result<(), PictureError> {
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        self.encode_to(&mut writer, quality)?;
        writer.flush()?;
        Ok(())
    }
}
