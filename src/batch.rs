//! Synchronous batch API on top of [`ScalableImage`].
//!
//! Callers that just want "this picture, scaled, as a JPEG" do not need the
//! queue or the cache. [`scale_to_file`] and [`scale_to_bytes`] run the whole
//! load → scale → encode sequence on the calling thread.
//!
//! [`export_directory`] applies the same to every supported image below a
//! directory, in parallel on the rayon pool:
//!
//! ```text
//! photos/                        export/
//! ├── 2023/                      ├── 2023/
//! │   ├── beach.png      ──▶     │   ├── beach.jpg
//! │   └── notes.txt              │   └── ...
//! └── dawn.jpg           ──▶     ├── dawn.jpg
//!                                └── export.json
//! ```
//!
//! Progress is streamed as [`BatchEvent`]s; the returned [`BatchSummary`] is
//! also written to `export.json` in the output directory.

use crate::identity::ImageIdentity;
use crate::imaging::{
    ByteSource, Dimensions, FileSource, PictureError, ScaleSettings, is_supported_image,
};
use crate::naming::local_path;
use crate::scalable::ScalableImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Name of the summary written next to exported images.
pub const EXPORT_MANIFEST: &str = "export.json";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image processing failed: {0}")]
    Picture(#[from] PictureError),
    #[error("Source image not found: {0}")]
    SourceNotFound(PathBuf),
}

/// Load, scale and encode `location` into a JPEG at `output`.
///
/// Returns the dimensions of the written image.
pub fn scale_to_file(
    source: &dyn ByteSource,
    identity: ImageIdentity,
    settings: &ScaleSettings,
    output: &Path,
) -> Result<Dimensions, BatchError> {
    let image = load_and_scale(source, identity, settings)?;
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    image.write_to_file(output, settings.quality)?;
    image
        .scaled_dimensions()
        .ok_or_else(|| PictureError::NotReady(output.display().to_string()).into())
}

/// Load, scale and encode `location` into an in-memory JPEG.
pub fn scale_to_bytes(
    source: &dyn ByteSource,
    identity: ImageIdentity,
    settings: &ScaleSettings,
) -> Result<Vec<u8>, BatchError> {
    let image = load_and_scale(source, identity, settings)?;
    Ok(image.encode_to_vec(settings.quality)?)
}

fn load_and_scale(
    source: &dyn ByteSource,
    identity: ImageIdentity,
    settings: &ScaleSettings,
) -> Result<ScalableImage, BatchError> {
    if let Some(path) = local_path(identity.location())
        && !path.exists()
    {
        return Err(BatchError::SourceNotFound(path));
    }
    let mut image = ScalableImage::new(settings.clone());
    image.load(source, identity)?;
    image.scale()?;
    Ok(image)
}

// ============================================================================
// Directory export
// ============================================================================

/// Progress of a directory export.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// Emitted once the input directory has been walked.
    Started { total: usize },
    Exported {
        index: usize,
        source: PathBuf,
        output: PathBuf,
        dimensions: Dimensions,
    },
    Failed {
        index: usize,
        source: PathBuf,
        error: String,
    },
}

/// A successfully exported image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedImage {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedImage {
    pub source: PathBuf,
    pub error: String,
}

/// Outcome of [`export_directory`], in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub exported: Vec<ExportedImage>,
    pub failed: Vec<FailedImage>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} exported, {} failed",
            self.exported.len(),
            self.failed.len()
        )
    }
}

/// Supported images below `input`, sorted by path.
pub fn collect_images(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Scale every supported image below `input` into `output`, mirroring the
/// directory structure. Outputs are always JPEG.
///
/// A failing image is reported and skipped; only I/O on the output side and
/// a missing input directory abort the export.
pub fn export_directory(
    input: &Path,
    output: &Path,
    settings: &ScaleSettings,
    events: Option<Sender<BatchEvent>>,
) -> Result<BatchSummary, BatchError> {
    if !input.is_dir() {
        return Err(BatchError::SourceNotFound(input.to_path_buf()));
    }
    std::fs::create_dir_all(output)?;

    let files = collect_images(input);
    debug!(input = %input.display(), count = files.len(), "exporting directory");
    if let Some(tx) = &events {
        tx.send(BatchEvent::Started { total: files.len() }).ok();
    }

    let source = FileSource::new();
    let results: Vec<Result<ExportedImage, FailedImage>> = files
        .par_iter()
        .enumerate()
        .map(|(i, file)| {
            let target = export_path(input, output, file);
            let identity = ImageIdentity::unrotated(file.display().to_string());
            match scale_to_file(&source, identity, settings, &target) {
                Ok(dimensions) => {
                    if let Some(tx) = &events {
                        tx.send(BatchEvent::Exported {
                            index: i + 1,
                            source: file.clone(),
                            output: target.clone(),
                            dimensions,
                        })
                        .ok();
                    }
                    Ok(ExportedImage {
                        source: file.clone(),
                        output: target,
                        width: dimensions.width,
                        height: dimensions.height,
                    })
                }
                Err(err) => {
                    warn!(source = %file.display(), error = %err, "export failed");
                    if let Some(tx) = &events {
                        tx.send(BatchEvent::Failed {
                            index: i + 1,
                            source: file.clone(),
                            error: err.to_string(),
                        })
                        .ok();
                    }
                    Err(FailedImage {
                        source: file.clone(),
                        error: err.to_string(),
                    })
                }
            }
        })
        .collect();

    let mut summary = BatchSummary::default();
    for result in results {
        match result {
            Ok(exported) => summary.exported.push(exported),
            Err(failed) => summary.failed.push(failed),
        }
    }

    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(output.join(EXPORT_MANIFEST), json)?;
    Ok(summary)
}

/// `output/<path relative to input>.jpg`
fn export_path(input: &Path, output: &Path, file: &Path) -> PathBuf {
    let relative = file.strip_prefix(input).unwrap_or(file);
    output.join(relative).with_extension("jpg")
}
