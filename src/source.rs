//! Decoding a single original into a bitmap.
//!
//! A [`SourceImage`] owns one decode of one [`ImageIdentity`]. Its status
//! moves `Uninitialised → Loading → (Rotating) → Ready | Error` within a load
//! attempt; starting a new load resets it to `Loading`.
//!
//! Observers call [`SourceImage::subscribe`] and receive an ordered stream of
//! [`SourceEvent`]s that ends in exactly one terminal `Ready` or `Error`
//! status per load. Events are sent from whichever thread runs the load.
//!
//! Cancellation is cooperative: [`SourceImage::abort`] raises a flag that is
//! checked after every chunk read, after decoding and after rotating. An
//! aborted load ends in `Error` with the message `"Aborted"`.

use crate::identity::ImageIdentity;
use crate::imaging::codec;
use crate::imaging::{ByteSource, Dimensions, PictureError};
use crate::sync::{lock, wait};
use image::RgbImage;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Uninitialised,
    Loading,
    Rotating,
    Ready,
    Error,
}

impl SourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Loading | Self::Rotating)
    }
}

/// Notification sent to subscribers of a [`SourceImage`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Status(SourceStatus, String),
    /// Percentage of the encoded bytes read so far.
    Progress(u8),
}

/// Result of a background load.
pub type LoadHandle = JoinHandle<Result<Arc<RgbImage>, PictureError>>;

struct SourceState {
    status: SourceStatus,
    message: String,
    percent: u8,
    bitmap: Option<Arc<RgbImage>>,
    failure: Option<PictureError>,
    load_time: Option<Duration>,
}

pub struct SourceImage {
    identity: ImageIdentity,
    max_alloc: Option<u64>,
    state: Mutex<SourceState>,
    settled: Condvar,
    abort: AtomicBool,
    subscribers: Mutex<Vec<Sender<SourceEvent>>>,
}

impl std::fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceImage")
            .field("identity", &self.identity)
            .field("status", &self.status())
            .finish()
    }
}

impl SourceImage {
    pub fn new(identity: ImageIdentity, max_alloc: Option<u64>) -> Self {
        Self {
            identity,
            max_alloc,
            state: Mutex::new(SourceState {
                status: SourceStatus::Uninitialised,
                message: String::new(),
                percent: 0,
                bitmap: None,
                failure: None,
                load_time: None,
            }),
            settled: Condvar::new(),
            abort: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<SourceEvent> {
        let (tx, rx) = channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn emit(&self, event: SourceEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&self, status: SourceStatus, message: String) {
        {
            let mut state = lock(&self.state);
            state.status = status;
            state.message = message.clone();
        }
        debug!(identity = %self.identity, ?status, "source status");
        self.emit(SourceEvent::Status(status, message));
    }

    /// Reset to `Loading` without reading anything yet.
    ///
    /// Lets a caller publish the busy state synchronously before handing the
    /// actual work to another thread.
    pub fn begin_load(&self) {
        self.abort.store(false, Ordering::SeqCst);
        {
            let mut state = lock(&self.state);
            state.status = SourceStatus::Loading;
            state.message = "Loading".to_string();
            state.percent = 0;
            state.bitmap = None;
            state.failure = None;
        }
        debug!(identity = %self.identity, "source loading");
        self.emit(SourceEvent::Status(SourceStatus::Loading, "Loading".into()));
    }

    /// Read, decode and rotate on the calling thread. Call after [`begin_load`](Self::begin_load).
    pub fn run_load(&self, source: &dyn ByteSource) -> Result<Arc<RgbImage>, PictureError> {
        let started = Instant::now();
        match self.decode_from(source) {
            Ok(bitmap) => {
                let bitmap = Arc::new(bitmap);
                let message = format!("Loaded: {}", self.identity.location());
                {
                    let mut state = lock(&self.state);
                    state.status = SourceStatus::Ready;
                    state.message = message.clone();
                    state.percent = 100;
                    state.bitmap = Some(Arc::clone(&bitmap));
                    state.load_time = Some(started.elapsed());
                }
                self.settled.notify_all();
                debug!(identity = %self.identity, elapsed = ?started.elapsed(), "source ready");
                self.emit(SourceEvent::Status(SourceStatus::Ready, message));
                Ok(bitmap)
            }
            Err(err) => {
                self.fail(err.duplicate());
                Err(err)
            }
        }
    }

    /// Move to `Error`, dropping any bitmap.
    pub(crate) fn fail(&self, err: PictureError) {
        let message = match &err {
            PictureError::Aborted => "Aborted".to_string(),
            other => format!("Error while reading {}: {other}", self.identity.location()),
        };
        {
            let mut state = lock(&self.state);
            state.status = SourceStatus::Error;
            state.message = message.clone();
            state.bitmap = None;
            state.failure = Some(err);
        }
        self.settled.notify_all();
        debug!(identity = %self.identity, %message, "source failed");
        self.emit(SourceEvent::Status(SourceStatus::Error, message));
    }

    fn check_abort(&self) -> Result<(), PictureError> {
        if self.abort.load(Ordering::SeqCst) {
            Err(PictureError::Aborted)
        } else {
            Ok(())
        }
    }

    fn decode_from(&self, source: &dyn ByteSource) -> Result<RgbImage, PictureError> {
        self.check_abort()?;
        let mut stream = source.open(self.identity.location())?;

        let mut bytes = Vec::with_capacity(stream.length.unwrap_or(0).min(64 << 20) as usize);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut last_percent = 0u8;
        loop {
            let n = stream.reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            self.check_abort()?;

            if let Some(total) = stream.length.filter(|&t| t > 0) {
                let percent = ((bytes.len() as u64 * 100 / total).min(99)) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    lock(&self.state).percent = percent;
                    self.emit(SourceEvent::Progress(percent));
                }
            }
        }

        let mut bitmap = codec::decode(&bytes, self.max_alloc)?;
        drop(bytes);
        self.check_abort()?;
        lock(&self.state).percent = 100;
        self.emit(SourceEvent::Progress(100));

        if self.identity.is_rotated() {
            self.set_status(
                SourceStatus::Rotating,
                format!("Rotating: {}", self.identity.location()),
            );
            bitmap = codec::rotate(&bitmap, self.identity.rotation(), self.max_alloc)?;
            self.check_abort()?;
        }
        Ok(bitmap)
    }

    /// Load synchronously on the calling thread.
    pub fn load(&self, source: &dyn ByteSource) -> Result<Arc<RgbImage>, PictureError> {
        self.begin_load();
        self.run_load(source)
    }

    /// Load on a dedicated thread. The status is `Loading` when this returns.
    pub fn load_in_background(
        self: &Arc<Self>,
        source: Arc<dyn ByteSource>,
    ) -> Result<LoadHandle, PictureError> {
        self.begin_load();
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name("source-load".into())
            .spawn(move || this.run_load(source.as_ref()))
            .map_err(|e| {
                self.fail(PictureError::Io(std::io::Error::new(e.kind(), e.to_string())));
                PictureError::Io(e)
            })
    }

    /// Request cooperative cancellation of the current load.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Abort the current load unless it is for `keep`.
    ///
    /// Returns `true` if an in-flight load was asked to stop.
    pub fn stop_loading_except(&self, keep: &ImageIdentity) -> bool {
        if self.identity == *keep || !self.status().is_busy() {
            return false;
        }
        debug!(identity = %self.identity, keep = %keep, "stopping stale load");
        self.abort();
        true
    }

    /// Block until the current load settles.
    ///
    /// Fails with [`PictureError::NotReady`] if no load was ever started.
    pub fn wait(&self) -> Result<Arc<RgbImage>, PictureError> {
        let mut state = lock(&self.state);
        while state.status.is_busy() {
            state = wait(&self.settled, state);
        }
        match state.status {
            SourceStatus::Ready => state.bitmap.clone().ok_or_else(|| {
                PictureError::NotReady(format!("{} has no bitmap", self.identity))
            }),
            SourceStatus::Error => Err(state
                .failure
                .as_ref()
                .map(PictureError::duplicate)
                .unwrap_or_else(|| PictureError::Decode(state.message.clone()))),
            _ => Err(PictureError::NotReady(format!(
                "{} was never loaded",
                self.identity
            ))),
        }
    }

    pub fn status(&self) -> SourceStatus {
        lock(&self.state).status
    }

    pub fn status_message(&self) -> String {
        lock(&self.state).message.clone()
    }

    pub fn percent_loaded(&self) -> u8 {
        lock(&self.state).percent
    }

    /// The decoded bitmap, present only while `Ready`.
    pub fn bitmap(&self) -> Option<Arc<RgbImage>> {
        lock(&self.state).bitmap.clone()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.bitmap()
            .map(|b| Dimensions::new(b.width(), b.height()))
    }

    /// Wall time of the last successful load.
    pub fn load_time(&self) -> Option<Duration> {
        lock(&self.state).load_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockSource;
    use crate::imaging::SourceStream;
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    fn drain(rx: &Receiver<SourceEvent>) -> Vec<SourceEvent> {
        rx.try_iter().collect()
    }

    fn statuses(events: &[SourceEvent]) -> Vec<SourceStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                SourceEvent::Status(s, _) => Some(*s),
                SourceEvent::Progress(_) => None,
            })
            .collect()
    }

    /// Byte source whose streams fail halfway through.
    struct BrokenSource;

    impl ByteSource for BrokenSource {
        fn open(&self, _location: &str) -> Result<SourceStream, PictureError> {
            Err(PictureError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "unreachable",
            )))
        }

        fn modified(&self, _location: &str) -> Result<SystemTime, PictureError> {
            Ok(SystemTime::UNIX_EPOCH)
        }
    }

    /// Serves one stream `step` bytes at a time. Every read after the first
    /// blocks until the test sends on the gate.
    struct GatedSource {
        bytes: Vec<u8>,
        step: usize,
        reads: Arc<AtomicUsize>,
        gate: Mutex<Option<Receiver<()>>>,
    }

    struct GatedReader {
        bytes: std::io::Cursor<Vec<u8>>,
        step: usize,
        reads: Arc<AtomicUsize>,
        gate: Receiver<()>,
    }

    impl Read for GatedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.reads.fetch_add(1, Ordering::SeqCst) > 0 {
                let _ = self.gate.recv();
            }
            let n = buf.len().min(self.step);
            self.bytes.read(&mut buf[..n])
        }
    }

    impl ByteSource for GatedSource {
        fn open(&self, location: &str) -> Result<SourceStream, PictureError> {
            let gate = lock(&self.gate).take().ok_or_else(|| {
                PictureError::Io(std::io::Error::other(format!("{location} opened twice")))
            })?;
            Ok(SourceStream {
                length: Some(self.bytes.len() as u64),
                reader: Box::new(GatedReader {
                    bytes: std::io::Cursor::new(self.bytes.clone()),
                    step: self.step,
                    reads: Arc::clone(&self.reads),
                    gate,
                }),
            })
        }

        fn modified(&self, _location: &str) -> Result<SystemTime, PictureError> {
            Ok(SystemTime::UNIX_EPOCH)
        }
    }

    // =========================================================================
    // Status machine
    // =========================================================================

    #[test]
    fn new_image_is_uninitialised() {
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);
        assert_eq!(image.status(), SourceStatus::Uninitialised);
        assert!(image.bitmap().is_none());
        assert!(matches!(image.wait(), Err(PictureError::NotReady(_))));
    }

    #[test]
    fn load_reaches_ready_with_bitmap() {
        let source = MockSource::new().with_jpeg("mem://a", 64, 48);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);
        let rx = image.subscribe();

        let bitmap = image.load(&source).unwrap();

        assert_eq!((bitmap.width(), bitmap.height()), (64, 48));
        assert_eq!(image.status(), SourceStatus::Ready);
        assert_eq!(image.status_message(), "Loaded: mem://a");
        assert_eq!(image.percent_loaded(), 100);
        assert!(image.load_time().is_some());

        let events = drain(&rx);
        assert_eq!(
            statuses(&events),
            vec![SourceStatus::Loading, SourceStatus::Ready]
        );
        assert!(events.contains(&SourceEvent::Progress(100)));
    }

    #[test]
    fn rotated_load_passes_through_rotating() {
        let source = MockSource::new().with_jpeg("mem://a", 64, 48);
        let image = SourceImage::new(ImageIdentity::new("mem://a", 90.0), None);
        let rx = image.subscribe();

        let bitmap = image.load(&source).unwrap();

        assert_eq!((bitmap.width(), bitmap.height()), (48, 64));
        assert_eq!(
            statuses(&drain(&rx)),
            vec![
                SourceStatus::Loading,
                SourceStatus::Rotating,
                SourceStatus::Ready
            ]
        );
    }

    #[test]
    fn zero_rotation_keeps_dimensions() {
        let source = MockSource::new().with_jpeg("mem://a", 64, 48);
        let image = SourceImage::new(ImageIdentity::new("mem://a", 0.0), None);
        assert_eq!(image.load(&source).unwrap().dimensions(), (64, 48));
    }

    #[test]
    fn io_failure_ends_in_error_without_bitmap() {
        let image = SourceImage::new(ImageIdentity::unrotated("http://x/a.jpg"), None);
        let result = image.load(&BrokenSource);

        assert!(matches!(result, Err(PictureError::Io(_))));
        assert_eq!(image.status(), SourceStatus::Error);
        assert!(image.bitmap().is_none());
        assert!(
            image
                .status_message()
                .starts_with("Error while reading http://x/a.jpg")
        );
        assert!(matches!(image.wait(), Err(PictureError::Io(_))));
    }

    #[test]
    fn corrupt_bytes_are_decode_error() {
        let source = MockSource::new();
        source.insert("mem://bad", b"not a jpeg".to_vec(), SystemTime::UNIX_EPOCH);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://bad"), None);
        assert!(matches!(image.load(&source), Err(PictureError::Decode(_))));
    }

    #[test]
    fn allocation_limit_is_out_of_memory() {
        let source = MockSource::new().with_jpeg("mem://a", 200, 200);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), Some(1024));
        let err = image.load(&source).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(image.status(), SourceStatus::Error);
    }

    #[test]
    fn reload_resets_to_loading() {
        let source = MockSource::new().with_jpeg("mem://a", 16, 16);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);
        image.load(&source).unwrap();

        image.begin_load();
        assert_eq!(image.status(), SourceStatus::Loading);
        assert!(image.bitmap().is_none());
        image.run_load(&source).unwrap();
        assert_eq!(source.open_count("mem://a"), 2);
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[test]
    fn stop_loading_except_other_identity_aborts() {
        let source = MockSource::new().with_jpeg("mem://a", 32, 32);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);
        let rx = image.subscribe();

        image.begin_load();
        assert!(image.stop_loading_except(&ImageIdentity::unrotated("mem://b")));
        let result = image.run_load(&source);

        assert!(matches!(result, Err(PictureError::Aborted)));
        assert_eq!(image.status(), SourceStatus::Error);
        assert_eq!(image.status_message(), "Aborted");
        assert!(image.bitmap().is_none());
        let events = drain(&rx);
        assert_eq!(
            events.last(),
            Some(&SourceEvent::Status(SourceStatus::Error, "Aborted".into()))
        );
    }

    #[test]
    fn abort_between_chunks_stops_reading() {
        let (release, gate) = channel();
        let bytes = crate::test_helpers::jpeg_bytes(64, 48);
        let step = bytes.len() / 8;
        let source = Arc::new(GatedSource {
            bytes,
            step,
            reads: Arc::new(AtomicUsize::new(0)),
            gate: Mutex::new(Some(gate)),
        });
        let image = Arc::new(SourceImage::new(ImageIdentity::unrotated("mem://a"), None));
        let rx = image.subscribe();

        let handle = image.load_in_background(source.clone()).unwrap();
        // Progress means the first chunk is in and the second read is pending
        loop {
            let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            if let SourceEvent::Progress(percent) = event {
                assert!(percent < 100);
                break;
            }
        }
        image.abort();
        release.send(()).unwrap();
        let result = handle.join().unwrap();

        assert!(matches!(result, Err(PictureError::Aborted)));
        assert_eq!(image.status_message(), "Aborted");
        assert!(image.percent_loaded() < 100);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_loading_except_same_identity_keeps_loading() {
        let source = MockSource::new().with_jpeg("mem://a", 32, 32);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);

        image.begin_load();
        assert!(!image.stop_loading_except(&ImageIdentity::unrotated("mem://a")));
        assert!(image.run_load(&source).is_ok());
    }

    #[test]
    fn stop_loading_except_when_idle_is_noop() {
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);
        assert!(!image.stop_loading_except(&ImageIdentity::unrotated("mem://b")));
    }

    #[test]
    fn new_load_clears_previous_abort() {
        let source = MockSource::new().with_jpeg("mem://a", 32, 32);
        let image = SourceImage::new(ImageIdentity::unrotated("mem://a"), None);
        image.abort();
        assert!(image.load(&source).is_ok());
    }

    // =========================================================================
    // Background
    // =========================================================================

    #[test]
    fn background_load_settles_for_waiters() {
        let source: Arc<dyn ByteSource> = Arc::new(MockSource::new().with_jpeg("mem://a", 40, 30));
        let image = Arc::new(SourceImage::new(ImageIdentity::unrotated("mem://a"), None));

        let handle = image.load_in_background(Arc::clone(&source)).unwrap();
        let waited = image.wait().unwrap();
        let joined = handle.join().unwrap().unwrap();

        assert!(Arc::ptr_eq(&waited, &joined));
        assert_eq!(image.dimensions(), Some(Dimensions::new(40, 30)));
    }
}
