//! CLI output formatting for pipeline events.
//!
//! # Information-First Display
//!
//! Every processed picture is shown by its positional index and file name,
//! with the result and any paths as indented context lines. This keeps the
//! output readable as an inventory while still letting users trace each line
//! back to a file.
//!
//! # Output Format
//!
//! ## Thumbnails
//!
//! ```text
//! 001 dawn.jpg
//!     Thumbnail: current (350 x 233)
//! 002 beach.jpg
//!     Thumbnail: regenerated (350 x 262)
//!     Stored: /tmp/picture-pipeline-thumbnails/Thumbnail_1f0c3a9e2b7d4c11.jpg
//! 003 broken.jpg
//!     Broken: Decode error: ...
//! ```
//!
//! ## Export
//!
//! ```text
//! Exporting 3 images
//! 001 2023/beach.png → 2023/beach.jpg (1024 x 683)
//! 002 notes.jpg
//!     Failed: Image processing failed: ...
//! ```
//!
//! # Architecture
//!
//! Each event has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure,
//! no I/O and no side effects.

use crate::batch::{BatchEvent, BatchSummary};
use crate::cache::CacheStats;
use crate::imaging::Dimensions;
use crate::worker::{ThumbnailOrigin, ThumbnailOutcome};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Last path component, or the whole string if there is none.
fn file_name(location: &str) -> String {
    Path::new(location)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string())
}

/// `path` relative to `root` when it lies below it.
fn relative(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|r| path.strip_prefix(r).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

// ============================================================================
// Thumbnails
// ============================================================================

/// Format the outcome of one thumbnail request.
///
/// `label` is the picture's original location or the group name.
pub fn format_thumbnail_event(
    index: usize,
    label: &str,
    outcome: &ThumbnailOutcome,
) -> Vec<String> {
    let mut lines = vec![format!("{} {}", format_index(index), file_name(label))];
    match outcome {
        ThumbnailOutcome::Loaded(thumb) => {
            let status = match thumb.origin {
                ThumbnailOrigin::Disk => "current",
                ThumbnailOrigin::Regenerated => "regenerated",
            };
            let size = Dimensions::new(thumb.bitmap.width(), thumb.bitmap.height());
            lines.push(format!("{}Thumbnail: {} ({})", indent(1), status, size));
            if thumb.origin == ThumbnailOrigin::Regenerated
                && let Some(location) = &thumb.location
            {
                lines.push(format!("{}Stored: {}", indent(1), location));
            }
        }
        ThumbnailOutcome::Broken(reason) => {
            lines.push(format!("{}Broken: {}", indent(1), reason));
        }
    }
    lines
}

pub fn print_thumbnail_event(index: usize, label: &str, outcome: &ThumbnailOutcome) {
    for line in format_thumbnail_event(index, label, outcome) {
        println!("{}", line);
    }
}

/// One-line summary after a thumbnail run.
///
/// ```text
/// 4 thumbnails: 1 current, 2 regenerated, 1 broken
/// ```
pub fn format_thumbnail_summary(outcomes: &[ThumbnailOutcome]) -> String {
    let (mut current, mut regenerated, mut broken) = (0, 0, 0);
    for outcome in outcomes {
        match outcome {
            ThumbnailOutcome::Loaded(t) if t.origin == ThumbnailOrigin::Disk => current += 1,
            ThumbnailOutcome::Loaded(_) => regenerated += 1,
            ThumbnailOutcome::Broken(_) => broken += 1,
        }
    }
    format!(
        "{} thumbnails: {} current, {} regenerated, {} broken",
        outcomes.len(),
        current,
        regenerated,
        broken
    )
}

/// Cache statistics line, shown after runs that decode originals.
pub fn format_cache_stats(stats: &CacheStats) -> String {
    format!("Cache: {}", stats)
}

// ============================================================================
// Scale & export
// ============================================================================

/// ```text
/// dawn.jpg → dawn-small.jpg (800 x 533)
/// ```
pub fn format_scale_result(source: &str, output: &Path, dimensions: Dimensions) -> String {
    format!(
        "{} → {} ({})",
        file_name(source),
        output.display(),
        dimensions
    )
}

/// Format a single export progress event as display lines.
///
/// Paths are shown relative to `input` / `output` when given.
pub fn format_batch_event(
    event: &BatchEvent,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Vec<String> {
    match event {
        BatchEvent::Started { total } => vec![match total {
            1 => "Exporting 1 image".to_string(),
            n => format!("Exporting {} images", n),
        }],
        BatchEvent::Exported {
            index,
            source,
            output: target,
            dimensions,
        } => vec![format!(
            "{} {} → {} ({})",
            format_index(*index),
            relative(source, input),
            relative(target, output),
            dimensions
        )],
        BatchEvent::Failed {
            index,
            source,
            error,
        } => vec![
            format!("{} {}", format_index(*index), relative(source, input)),
            format!("{}Failed: {}", indent(1), error),
        ],
    }
}

pub fn print_batch_summary(summary: &BatchSummary) {
    println!("Export: {}", summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Thumbnail;
    use image::RgbImage;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn loaded(origin: ThumbnailOrigin, location: Option<&str>) -> ThumbnailOutcome {
        ThumbnailOutcome::Loaded(Thumbnail {
            bitmap: Arc::new(RgbImage::new(350, 233)),
            origin,
            location: location.map(String::from),
        })
    }

    #[test]
    fn format_index_pads_to_three_digits() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn file_name_of_url_and_bare_name() {
        assert_eq!(file_name("/photos/dawn.jpg"), "dawn.jpg");
        assert_eq!(file_name("group:Holidays"), "group:Holidays");
    }

    // =========================================================================
    // Thumbnail formatting tests
    // =========================================================================

    #[test]
    fn format_current_thumbnail() {
        let lines = format_thumbnail_event(
            1,
            "/photos/dawn.jpg",
            &loaded(ThumbnailOrigin::Disk, Some("/t/a.jpg")),
        );
        assert_eq!(lines, vec!["001 dawn.jpg", "    Thumbnail: current (350 x 233)"]);
    }

    #[test]
    fn format_regenerated_thumbnail_shows_location() {
        let lines = format_thumbnail_event(
            2,
            "/photos/beach.jpg",
            &loaded(ThumbnailOrigin::Regenerated, Some("/t/b.jpg")),
        );
        assert_eq!(lines[1], "    Thumbnail: regenerated (350 x 233)");
        assert_eq!(lines[2], "    Stored: /t/b.jpg");
    }

    #[test]
    fn format_broken_thumbnail() {
        let lines = format_thumbnail_event(
            3,
            "/photos/x.jpg",
            &ThumbnailOutcome::Broken("Decode error: bad".into()),
        );
        assert_eq!(lines, vec!["003 x.jpg", "    Broken: Decode error: bad"]);
    }

    #[test]
    fn thumbnail_summary_counts_each_outcome() {
        let outcomes = vec![
            loaded(ThumbnailOrigin::Disk, None),
            loaded(ThumbnailOrigin::Regenerated, None),
            loaded(ThumbnailOrigin::Regenerated, None),
            ThumbnailOutcome::Broken("x".into()),
        ];
        assert_eq!(
            format_thumbnail_summary(&outcomes),
            "4 thumbnails: 1 current, 2 regenerated, 1 broken"
        );
    }

    // =========================================================================
    // Export formatting tests
    // =========================================================================

    #[test]
    fn format_export_started() {
        let lines = format_batch_event(&BatchEvent::Started { total: 3 }, None, None);
        assert_eq!(lines, vec!["Exporting 3 images"]);
        let lines = format_batch_event(&BatchEvent::Started { total: 1 }, None, None);
        assert_eq!(lines, vec!["Exporting 1 image"]);
    }

    #[test]
    fn format_export_relative_paths() {
        let event = BatchEvent::Exported {
            index: 1,
            source: PathBuf::from("/in/2023/beach.png"),
            output: PathBuf::from("/out/2023/beach.jpg"),
            dimensions: Dimensions::new(100, 50),
        };
        let lines = format_batch_event(&event, Some(Path::new("/in")), Some(Path::new("/out")));
        assert_eq!(lines, vec!["001 2023/beach.png → 2023/beach.jpg (100 x 50)"]);
    }

    #[test]
    fn format_export_failure() {
        let event = BatchEvent::Failed {
            index: 2,
            source: PathBuf::from("/in/notes.jpg"),
            error: "bad".into(),
        };
        let lines = format_batch_event(&event, Some(Path::new("/in")), None);
        assert_eq!(lines, vec!["002 notes.jpg", "    Failed: bad"]);
    }

    #[test]
    fn format_scale_line() {
        assert_eq!(
            format_scale_result(
                "/photos/dawn.jpg",
                Path::new("small.jpg"),
                Dimensions::new(800, 533)
            ),
            "dawn.jpg → small.jpg (800 x 533)"
        );
    }
}
