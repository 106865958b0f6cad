//! Byte-source seam and shared error types.
//!
//! The [`ByteSource`] trait is the only way the pipeline reaches original
//! image bytes. Given a location (a local path, a `file://` URL, or anything a
//! custom provider understands) it hands back a readable stream plus, when
//! known, its length and last modification time.
//!
//! [`FileSource`] serves local files; remote URLs go through
//! [`HttpSource`](super::remote::HttpSource). Tests swap in a recording mock
//! so decode counts can be asserted without touching the filesystem.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PictureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    #[error("Aborted")]
    Aborted,
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    #[error("Image not ready: {0}")]
    NotReady(String),
}

impl PictureError {
    /// Rebuild an equivalent error. `io::Error` is not `Clone`, so the kind
    /// and message are carried over instead.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Decode(m) => Self::Decode(m.clone()),
            Self::OutOfMemory(m) => Self::OutOfMemory(m.clone()),
            Self::Aborted => Self::Aborted,
            Self::InvalidTarget(m) => Self::InvalidTarget(m.clone()),
            Self::NotReady(m) => Self::NotReady(m.clone()),
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}

/// Pixel dimensions of a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x {}", self.width, self.height)
    }
}

/// An opened original: the byte stream and its length if the provider knows it.
pub struct SourceStream {
    pub reader: Box<dyn Read + Send>,
    pub length: Option<u64>,
}

/// Provider of original image bytes.
///
/// Implementations must be shareable across the worker pool, hence `Send + Sync`.
pub trait ByteSource: Send + Sync {
    /// Open the bytes behind `location` for reading.
    fn open(&self, location: &str) -> Result<SourceStream, PictureError>;

    /// Last modification time of the original behind `location`.
    fn modified(&self, location: &str) -> Result<SystemTime, PictureError>;
}

/// Serves local files. Accepts plain paths and `file://` URLs; any other
/// scheme is reported as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }

    fn resolve(location: &str) -> Result<PathBuf, PictureError> {
        crate::naming::local_path(location).ok_or_else(|| {
            PictureError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("not a local file: {location}"),
            ))
        })
    }
}

impl ByteSource for FileSource {
    fn open(&self, location: &str) -> Result<SourceStream, PictureError> {
        let path = Self::resolve(location)?;
        let file = File::open(&path)?;
        let length = file.metadata().ok().map(|m| m.len());
        Ok(SourceStream {
            reader: Box::new(io::BufReader::new(file)),
            length,
        })
    }

    fn modified(&self, location: &str) -> Result<SystemTime, PictureError> {
        let path = Self::resolve(location)?;
        Ok(std::fs::metadata(path)?.modified()?)
    }
}
