//! Pipeline configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialized to a TOML table, the user's file is merged on top key by key,
//! and the result is deserialized and validated.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [thumbnails]
//! size = 350                 # Thumbnails fit a size x size box
//! persist = true             # Keep thumbnails on disk between runs
//! # directory = "..."        # Defaults to <tmp>/picture-pipeline-thumbnails
//! prefix = "Thumbnail_"
//! quality = 0.8              # JPEG quality (0.0-1.0)
//! fast_scale = true          # Nearest-neighbour scaling for thumbnails
//! size_tolerance = 1.02
//! require_both_dimensions = true
//!
//! [scaling]
//! steps = 1                  # Incremental steps in quality mode
//! dont_enlarge = true
//! max_alloc_mb = 512         # Decode/scale allocation ceiling (0 = unlimited)
//!
//! [cache]
//! capacity = 4               # Decoded originals kept in memory
//!
//! [workers]
//! # count = 2                # Omit for auto (2, capped at CPU cores)
//! poll_interval_ms = 500
//!
//! [groups]
//! # template = "folder.jpg"  # Mosaic background; omit for a plain canvas
//! width = 350
//! height = 300
//! mini_width = 100
//! mini_height = 75
//! left_margin = 15
//! top_margin = 65
//! margin = 10
//! background = [238, 238, 238]
//! ```
//!
//! Config files are sparse, override just the values you want. Unknown keys
//! are rejected to catch typos early.

use crate::imaging::{Dimensions, MosaicConfig, Quality, ScaleMode, ScaleSettings, TargetMode};
use crate::naming::ThumbnailNamer;
use crate::worker::ThumbnailSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Thumbnail size, persistence and staleness policy.
    pub thumbnails: ThumbnailsConfig,
    /// Scaling behaviour shared by thumbnails and explicit scales.
    pub scaling: ScalingConfig,
    /// Decoded image cache.
    pub cache: CacheConfig,
    /// Thumbnail worker pool.
    pub workers: WorkersConfig,
    /// Group mosaic geometry.
    pub groups: GroupsConfig,
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thumbnails;
        if !(0.0..=1.0).contains(&t.quality) {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 0.0-1.0".into(),
            ));
        }
        if t.size == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.size must be non-zero".into(),
            ));
        }
        if t.size_tolerance.is_nan() || t.size_tolerance < 1.0 {
            return Err(ConfigError::Validation(
                "thumbnails.size_tolerance must be at least 1.0".into(),
            ));
        }
        if self.scaling.steps == 0 {
            return Err(ConfigError::Validation(
                "scaling.steps must be non-zero".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Validation(
                "cache.capacity must be non-zero".into(),
            ));
        }
        if self.workers.count == Some(0) {
            return Err(ConfigError::Validation(
                "workers.count must be non-zero".into(),
            ));
        }
        let g = &self.groups;
        if g.mini_width == 0 || g.mini_height == 0 {
            return Err(ConfigError::Validation(
                "groups.mini_width and groups.mini_height must be non-zero".into(),
            ));
        }
        // A template decides its own canvas size at runtime
        if g.template.is_none() {
            let mosaic = g.mosaic_config();
            if mosaic.layout(mosaic.canvas).capacity() == 0 {
                return Err(ConfigError::Validation(format!(
                    "groups canvas {} cannot hold a single {} thumbnail",
                    mosaic.canvas, mosaic.mini
                )));
            }
        }
        Ok(())
    }

    /// Thumbnail policy for [`ThumbnailFactory`](crate::worker::ThumbnailFactory).
    pub fn thumbnail_settings(&self) -> ThumbnailSettings {
        let t = &self.thumbnails;
        ThumbnailSettings {
            size: t.size,
            persist: t.persist,
            quality: Quality::new(t.quality),
            mode: if t.fast_scale {
                ScaleMode::Fast
            } else {
                ScaleMode::Quality
            },
            steps: self.scaling.steps,
            dont_enlarge: self.scaling.dont_enlarge,
            size_tolerance: t.size_tolerance,
            require_both_dimensions: t.require_both_dimensions,
            max_alloc: self.scaling.max_alloc(),
            mosaic: self.groups.mosaic_config(),
            group_template: self.groups.template.clone(),
        }
    }

    /// Quality-mode settings for explicit scaling towards `target`.
    pub fn scale_settings(&self, target: TargetMode) -> ScaleSettings {
        ScaleSettings {
            target,
            mode: ScaleMode::Quality,
            steps: self.scaling.steps,
            dont_enlarge: self.scaling.dont_enlarge,
            quality: Quality::new(self.thumbnails.quality),
            max_alloc: self.scaling.max_alloc(),
        }
    }

    pub fn namer(&self) -> ThumbnailNamer {
        ThumbnailNamer::new(
            self.thumbnails.thumbnail_directory(),
            self.thumbnails.prefix.clone(),
        )
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Edge of the square box thumbnails are fitted into.
    pub size: u32,
    /// Write thumbnails to disk and reuse them.
    pub persist: bool,
    /// Where fresh thumbnails are created. `None` uses the system temp dir.
    pub directory: Option<PathBuf>,
    /// Filename prefix for fresh thumbnails.
    pub prefix: String,
    /// JPEG quality, 0.0 (worst) to 1.0 (best).
    pub quality: f32,
    /// Nearest-neighbour scaling instead of bicubic.
    pub fast_scale: bool,
    /// Ratio within which an existing thumbnail still counts as the right size.
    pub size_tolerance: f64,
    /// Both edges must be within tolerance, not just one.
    pub require_both_dimensions: bool,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            size: 350,
            persist: true,
            directory: None,
            prefix: "Thumbnail_".to_string(),
            quality: 0.8,
            fast_scale: true,
            size_tolerance: 1.02,
            require_both_dimensions: true,
        }
    }
}

impl ThumbnailsConfig {
    pub fn thumbnail_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("picture-pipeline-thumbnails"))
    }
}

/// Scaling behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalingConfig {
    /// Number of incremental steps in quality mode.
    pub steps: u32,
    /// Never scale above the original size when fitting a box.
    pub dont_enlarge: bool,
    /// Allocation ceiling in MiB for a single decode or scale. 0 disables it.
    pub max_alloc_mb: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            steps: 1,
            dont_enlarge: true,
            max_alloc_mb: 512,
        }
    }
}

impl ScalingConfig {
    pub fn max_alloc(&self) -> Option<u64> {
        (self.max_alloc_mb > 0).then(|| self.max_alloc_mb.saturating_mul(1024 * 1024))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of decoded originals kept in memory.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 4 }
    }
}

/// Thumbnail worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads.
    /// When absent, defaults to 2. Values larger than the core count are clamped down.
    pub count: Option<usize>,
    /// How often an idle worker re-checks the queue.
    pub poll_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: None,
            poll_interval_ms: 500,
        }
    }
}

impl WorkersConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

const DEFAULT_WORKERS: usize = 2;

/// Resolve the effective worker count from config.
///
/// - `None` → 2
/// - `Some(n)` → `n`
///
/// Either way capped at the number of cores.
pub fn effective_workers(config: &WorkersConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.count.unwrap_or(DEFAULT_WORKERS).min(cores).max(1)
}

/// Group mosaic geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupsConfig {
    /// Background image location. The canvas takes its size.
    pub template: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mini_width: u32,
    pub mini_height: u32,
    pub left_margin: u32,
    pub top_margin: u32,
    pub margin: u32,
    /// Plain canvas colour as `[r, g, b]`.
    pub background: [u8; 3],
}

impl Default for GroupsConfig {
    fn default() -> Self {
        let mosaic = MosaicConfig::default();
        Self {
            template: None,
            width: mosaic.canvas.width,
            height: mosaic.canvas.height,
            mini_width: mosaic.mini.width,
            mini_height: mosaic.mini.height,
            left_margin: mosaic.left_margin,
            top_margin: mosaic.top_margin,
            margin: mosaic.margin,
            background: mosaic.background.0,
        }
    }
}

impl GroupsConfig {
    pub fn mosaic_config(&self) -> MosaicConfig {
        MosaicConfig {
            canvas: Dimensions::new(self.width, self.height),
            mini: Dimensions::new(self.mini_width, self.mini_height),
            left_margin: self.left_margin,
            top_margin: self.top_margin,
            margin: self.margin,
            background: image::Rgb(self.background),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(PipelineConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<PipelineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the TOML file at `path`.
///
/// A missing file yields the stock defaults. Unknown keys and out-of-range
/// values are errors.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Picture Pipeline Configuration
# ==============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# Thumbnails are fitted into a size x size box.
size = 350

# Write thumbnails to disk and reuse them while they are current.
persist = true

# Directory for newly created thumbnails.
# Omit to use <system temp dir>/picture-pipeline-thumbnails.
# directory = "/var/cache/picture-pipeline"

# Filename prefix for newly created thumbnails.
prefix = "Thumbnail_"

# JPEG quality (0.0 = worst, 1.0 = best).
quality = 0.8

# Nearest-neighbour scaling. Set to false for smoother, slower thumbnails.
fast_scale = true

# An existing thumbnail is kept while its size is within this ratio of the box.
size_tolerance = 1.02

# Require both width and height within tolerance (false: either one).
require_both_dimensions = true

# ---------------------------------------------------------------------------
# Scaling
# ---------------------------------------------------------------------------
[scaling]
# Number of incremental steps for quality scaling.
steps = 1

# Never enlarge an image when fitting it into a box.
dont_enlarge = true

# Allocation ceiling in MiB for one decode or scale (0 = unlimited).
max_alloc_mb = 512

# ---------------------------------------------------------------------------
# Cache
# ---------------------------------------------------------------------------
[cache]
# Decoded originals kept in memory.
capacity = 4

# ---------------------------------------------------------------------------
# Workers
# ---------------------------------------------------------------------------
[workers]
# Thumbnail worker threads.
# Omit or comment out for the default (2, capped at the number of CPU cores).
# count = 2

# Milliseconds an idle worker waits before re-checking the queue.
poll_interval_ms = 500

# ---------------------------------------------------------------------------
# Group mosaics
# ---------------------------------------------------------------------------
[groups]
# Background image for group thumbnails; the canvas takes its size.
# Omit for a plain canvas of width x height.
# template = "folder.jpg"
width = 350
height = 300

# Mini thumbnail box inside the mosaic.
mini_width = 100
mini_height = 75

# Offsets of the first slot and spacing between slots.
left_margin = 15
top_margin = 65
margin = 10

# Plain canvas colour as [r, g, b].
background = [238, 238, 238]
"##
}
