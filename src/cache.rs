//! Shared cache of decoded originals.
//!
//! Decoding a multi-megapixel JPEG costs far more than scaling it, and the
//! same original is typically requested several times in quick succession
//! (thumbnail, preview, full view). [`ImageCache`] keeps the most recently
//! used [`SourceImage`]s so those requests share one decode.
//!
//! # Guarantees
//!
//! - **At most one decode per identity.** Lookup and insertion happen under
//!   one lock, and a new entry is marked `Loading` before the lock is
//!   released, so concurrent callers for the same identity all get the same
//!   handle.
//! - **Bounded.** Once `capacity` is exceeded the least recently used entry
//!   is dropped. Consumers still holding its handle keep the bitmap alive
//!   until they let go. An evicted entry that is still loading and that
//!   nobody holds is aborted.
//! - **Bounded loading.** Loads run on a fixed pool of loader threads; a
//!   burst of misses queues up instead of decoding all at once.
//! - **Failures are not sticky.** An entry that ended in `Error` is replaced
//!   by a fresh load on the next request.
//! - **Memory pressure.** A load that fails with out-of-memory clears the
//!   whole cache.

use crate::identity::ImageIdentity;
use crate::imaging::{ByteSource, PictureError};
use crate::source::{SourceImage, SourceStatus};
use crate::sync::lock;
use image::RgbImage;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Loader threads used by [`ImageCache::new`].
pub const DEFAULT_LOADERS: usize = 2;

struct CacheState {
    entries: LruCache<ImageIdentity, Arc<SourceImage>>,
    stats: CacheStats,
}

struct CacheInner {
    capacity: usize,
    max_alloc: Option<u64>,
    source: Arc<dyn ByteSource>,
    loaders: rayon::ThreadPool,
    state: Mutex<CacheState>,
}

/// Bounded LRU mapping of [`ImageIdentity`] to [`SourceImage`].
///
/// Cloning is cheap and every clone refers to the same cache.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("capacity", &self.inner.capacity)
            .field("loaders", &self.inner.loaders.current_num_threads())
            .field("len", &self.len())
            .finish()
    }
}

/// Entries in `Error` or never loaded are replaced instead of reused.
fn is_usable(image: &SourceImage) -> bool {
    !matches!(
        image.status(),
        SourceStatus::Error | SourceStatus::Uninitialised
    )
}

impl ImageCache {
    /// Cache with [`DEFAULT_LOADERS`] loader threads.
    pub fn new(
        capacity: usize,
        source: Arc<dyn ByteSource>,
        max_alloc: Option<u64>,
    ) -> Result<Self, PictureError> {
        Self::with_loaders(capacity, DEFAULT_LOADERS, source, max_alloc)
    }

    /// Cache that decodes at most `loaders` originals at a time.
    pub fn with_loaders(
        capacity: usize,
        loaders: usize,
        source: Arc<dyn ByteSource>,
        max_alloc: Option<u64>,
    ) -> Result<Self, PictureError> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let loaders = rayon::ThreadPoolBuilder::new()
            .num_threads(loaders.max(1))
            .thread_name(|i| format!("image-cache-load-{i}"))
            .build()
            .map_err(|e| PictureError::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                capacity: capacity.get(),
                max_alloc,
                source,
                loaders,
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    stats: CacheStats::default(),
                }),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn loaders(&self) -> usize {
        self.inner.loaders.current_num_threads()
    }

    pub fn byte_source(&self) -> Arc<dyn ByteSource> {
        Arc::clone(&self.inner.source)
    }

    /// Handle for `identity`, queueing a background load if it is not cached.
    pub fn get_or_create(&self, identity: &ImageIdentity) -> Arc<SourceImage> {
        let mut state = lock(&self.inner.state);

        let cached = state
            .entries
            .get(identity)
            .filter(|image| is_usable(image))
            .cloned();
        if let Some(image) = cached {
            state.stats.hits += 1;
            debug!(%identity, "image cache hit");
            return image;
        }

        let image = Arc::new(SourceImage::new(identity.clone(), self.inner.max_alloc));
        image.begin_load();
        state.stats.misses += 1;
        if let Some((evicted, old)) = state.entries.push(identity.clone(), Arc::clone(&image))
            && evicted != *identity
        {
            state.stats.evictions += 1;
            debug!(identity = %evicted, "evicting from image cache");
            // Held by nobody but this scope and its queued load
            if old.status().is_busy() && Arc::strong_count(&old) <= 2 {
                old.abort();
            }
        }

        debug!(%identity, "image cache miss, queueing load");
        self.queue_load(Arc::clone(&image));
        image
    }

    /// Queue `image` on the loader pool. Called with the state lock held so
    /// eviction sees the queued task's handle.
    fn queue_load(&self, image: Arc<SourceImage>) {
        let source = Arc::clone(&self.inner.source);
        let cache = Arc::downgrade(&self.inner);
        self.inner.loaders.spawn(move || load(&image, source.as_ref(), &cache));
    }

    /// Look up or load `identity` and block until its bitmap is available.
    pub fn get_or_load(&self, identity: &ImageIdentity) -> Result<Arc<RgbImage>, PictureError> {
        self.get_or_create(identity).wait()
    }

    /// Whether `identity` has a usable (loading or ready) entry.
    pub fn is_cached(&self, identity: &ImageIdentity) -> bool {
        lock(&self.inner.state)
            .entries
            .peek(identity)
            .is_some_and(|image| is_usable(image))
    }

    pub fn remove(&self, identity: &ImageIdentity) -> bool {
        lock(&self.inner.state).entries.pop(identity).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        clear_entries(&self.inner);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.inner.state).stats.clone()
    }
}

fn clear_entries(inner: &CacheInner) {
    let mut state = lock(&inner.state);
    let dropped = state.entries.len();
    state.entries.clear();
    debug!(dropped, "image cache cleared");
}

/// Body of a queued load. Holds the cache weakly so pending work does not
/// keep a dropped cache alive.
fn load(image: &SourceImage, source: &dyn ByteSource, cache: &Weak<CacheInner>) {
    if let Err(err) = image.run_load(source)
        && err.is_out_of_memory()
    {
        warn!(
            identity = %image.identity(),
            "out of memory while decoding, clearing image cache"
        );
        if let Some(inner) = cache.upgrade() {
            clear_entries(&inner);
        }
    }
}

/// Summary of cache performance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub evictions: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.evictions > 0 {
            write!(
                f,
                "{} cached, {} decoded, {} evicted ({} total)",
                self.hits,
                self.misses,
                self.evictions,
                self.total()
            )
        } else if self.hits > 0 {
            write!(
                f,
                "{} cached, {} decoded ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} decoded", self.misses)
        }
    }
}
