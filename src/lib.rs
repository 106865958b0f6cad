//! # Picture Pipeline
//!
//! Picture loading, scaling and thumbnail production for applications that
//! manage large photo collections. Originals are decoded once, shared through
//! a bounded cache, scaled to an explicit factor or into a bounding box, and
//! turned into persisted JPEG thumbnails by a pool of background workers.
//!
//! # Architecture: Decode → Scale → Deliver
//!
//! ```text
//!                  ┌──────────────┐
//! ByteSource ────▶ │ SourceImage  │  decode + rotate, one per (location, rotation)
//!                  └──────┬───────┘
//!                         │ shared via ImageCache (LRU, one decode per identity)
//!                  ┌──────▼───────┐
//!                  │ScalableImage │  factor or fit-box, fast or multi-step
//!                  └──────┬───────┘
//!                         │
//!  ThumbnailQueue ──▶ WorkerPool ──▶ ThumbnailFactory ──▶ ThumbnailEvent
//!   (priority,          (N threads)    (reuse or regenerate,
//!    dedup)                             write JPEG, notify target)
//! ```
//!
//! Every stage reports progress as events on `std::sync::mpsc` channels, so
//! a caller can drive a UI without polling shared state.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Byte sources (files, URLs), decode, rotate, scale, encode, mosaic |
//! | [`identity`] | `ImageIdentity`: location + normalized rotation, the cache key |
//! | [`source`] | `SourceImage`: one decoded original and its status events |
//! | [`cache`] | `ImageCache`: bounded LRU of `SourceImage`s loaded on a fixed pool |
//! | [`scalable`] | `ScalableImage`: a scaled rendition with sync and background scaling |
//! | [`request`] | `Priority` and `ThumbnailRequest` |
//! | [`queue`] | `ThumbnailQueue`: priority order, deduplication, per-target exclusion |
//! | [`targets`] | `ThumbnailTarget` trait plus picture and group targets |
//! | [`worker`] | `ThumbnailFactory` decision logic and the `WorkerPool` |
//! | [`naming`] | Location resolution and fresh thumbnail filenames |
//! | [`index`] | Persisted original → thumbnail index for the CLI |
//! | [`batch`] | Synchronous scale-to-file/bytes and parallel directory export |
//! | [`config`] | `config.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//! | [`logging`] | `tracing-subscriber` setup for the binary |
//!
//! # Design Decisions
//!
//! ## Out-of-Memory Is an Error, Not an Abort
//!
//! Decoding runs under `image::Limits`, and every scale target is probed with
//! `Vec::try_reserve_exact` before any pixels are touched. Either failure
//! becomes `PictureError::OutOfMemory`, the cache is dropped, and the request
//! that hit it is reported broken. The process keeps running.
//!
//! ## Thumbnails Are Checked, Not Trusted
//!
//! An existing thumbnail is reused only while it is newer than its original
//! and its size is within tolerance of the configured box. Originals with a
//! modification time in the future do not count as newer, otherwise they
//! would be regenerated on every request forever.
//!
//! ## Threads, Not Async
//!
//! Decoding and scaling are CPU-bound. Workers are plain `std::thread`s fed by
//! a condvar-backed queue. Cache loads run on a fixed rayon pool, so a burst
//! of misses waits its turn instead of decoding all at once; directory export
//! uses rayon too. Remote originals go through reqwest's blocking client, and
//! no async API is exposed.

pub mod batch;
pub mod cache;
pub mod config;
pub mod identity;
pub mod imaging;
pub mod index;
pub mod logging;
pub mod naming;
pub mod output;
pub mod queue;
pub mod request;
pub mod scalable;
pub mod source;
pub mod targets;
pub mod worker;

mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;
