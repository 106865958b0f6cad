use clap::{Parser, Subcommand, ValueEnum};
use picture_pipeline::batch;
use picture_pipeline::cache::ImageCache;
use picture_pipeline::config::{self, PipelineConfig};
use picture_pipeline::identity::ImageIdentity;
use picture_pipeline::imaging::{ByteSource, RoutingSource, TargetMode};
use picture_pipeline::index::ThumbnailIndex;
use picture_pipeline::logging;
use picture_pipeline::output;
use picture_pipeline::queue::ThumbnailQueue;
use picture_pipeline::request::{Priority, ThumbnailRequest};
use picture_pipeline::targets::{
    GroupTarget, PictureTarget, TargetId, TargetKind, ThumbnailTarget,
};
use picture_pipeline::worker::{ThumbnailFactory, ThumbnailOutcome, WorkerPool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "picture-pipeline")]
#[command(about = "Scale pictures and maintain persisted thumbnails")]
#[command(long_about = "\
Scale pictures and maintain persisted thumbnails

Thumbnails are written once and reused while they are newer than their
original and still the configured size. Every directory passed to
'thumbnails' also gets a group thumbnail: a mosaic of its first pictures.

Run 'picture-pipeline gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (missing file = stock defaults)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Log debug output (overridden by PICTURE_PIPELINE_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scale one picture into a JPEG
    Scale {
        /// Picture path or http(s) URL
        input: PathBuf,
        output: PathBuf,
        /// Explicit scale factor, e.g. 0.5
        #[arg(long, conflicts_with_all = ["width", "height"])]
        factor: Option<f64>,
        /// Bounding box width
        #[arg(long, default_value_t = 1024)]
        width: u32,
        /// Bounding box height
        #[arg(long, default_value_t = 1024)]
        height: u32,
        /// Clockwise rotation in degrees
        #[arg(long, default_value_t = 0.0)]
        rotate: f64,
    },
    /// Create or refresh thumbnails for every picture in the given directories
    Thumbnails {
        #[arg(required = true)]
        directories: Vec<PathBuf>,
        /// Regenerate even when the existing thumbnail is current
        #[arg(long)]
        force: bool,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
    },
    /// Scale every picture below a directory into another directory
    Export {
        input: PathBuf,
        output: PathBuf,
        /// Bounding box edge for exported pictures
        #[arg(long, default_value_t = 1024)]
        size: u32,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::High => Priority::High,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Command::Scale {
            input,
            output: out,
            factor,
            width,
            height,
            rotate,
        } => {
            let target = match factor {
                Some(f) => TargetMode::ExplicitFactor(f),
                None => TargetMode::fit_box(width, height),
            };
            let location = input.display().to_string();
            let dimensions = batch::scale_to_file(
                &RoutingSource::new()?,
                ImageIdentity::new(location.as_str(), rotate),
                &config.scale_settings(target),
                &out,
            )?;
            println!("{}", output::format_scale_result(&location, &out, dimensions));
        }
        Command::Thumbnails {
            directories,
            force,
            priority,
        } => {
            run_thumbnails(&config, &directories, force, priority.into())?;
        }
        Command::Export {
            input,
            output: out,
            size,
        } => {
            let settings = config.scale_settings(TargetMode::fit_box(size, size));
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = {
                let (input, out) = (input.clone(), out.clone());
                std::thread::spawn(move || {
                    for event in rx {
                        let lines = output::format_batch_event(
                            &event,
                            Some(input.as_path()),
                            Some(out.as_path()),
                        );
                        for line in lines {
                            println!("{}", line);
                        }
                    }
                })
            };
            let result = batch::export_directory(&input, &out, &settings, Some(tx));
            printer.join().ok();
            output::print_batch_summary(&result?);
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Queue every picture and one group per directory, then wait for all of them.
fn run_thumbnails(
    config: &PipelineConfig,
    directories: &[PathBuf],
    force: bool,
    priority: Priority,
) -> Result<(), Box<dyn std::error::Error>> {
    let namer = config.namer();
    let index_dir = namer.directory().to_path_buf();
    let mut index = ThumbnailIndex::load(&index_dir);
    let pruned = index.prune_missing();
    if pruned > 0 {
        tracing::debug!(pruned, "dropped index entries for deleted thumbnails");
    }

    let mut targets: Vec<Arc<dyn ThumbnailTarget>> = Vec::new();
    for dir in directories {
        targets.extend(directory_targets(dir, &index));
    }
    if targets.is_empty() {
        println!("No pictures found");
        return Ok(());
    }

    let source: Arc<dyn ByteSource> = Arc::new(RoutingSource::new()?);
    let workers = config::effective_workers(&config.workers);
    let cache = ImageCache::with_loaders(
        config.cache.capacity,
        workers,
        Arc::clone(&source),
        config.scaling.max_alloc(),
    )?;
    let (tx, rx) = std::sync::mpsc::channel();
    let factory = ThumbnailFactory::new(config.thumbnail_settings(), source, namer)
        .with_cache(cache.clone())
        .with_events(tx);

    let queue = ThumbnailQueue::new();
    let pool = WorkerPool::start(
        workers,
        config.workers.poll_interval(),
        queue.clone(),
        Arc::new(factory),
    )?;

    let by_id: HashMap<TargetId, Arc<dyn ThumbnailTarget>> =
        targets.iter().map(|t| (t.id(), Arc::clone(t))).collect();
    for target in &targets {
        // Pictures first so group mosaics can reuse their fresh thumbnails
        let priority = match target.kind() {
            TargetKind::Group => Priority::Low,
            _ => priority,
        };
        let request = if force {
            ThumbnailRequest::forced(Arc::clone(target), priority)
        } else {
            ThumbnailRequest::new(Arc::clone(target), priority)
        };
        queue.enqueue(request);
    }

    let mut outcomes = Vec::with_capacity(by_id.len());
    for i in 1..=by_id.len() {
        let Ok(event) = rx.recv_timeout(Duration::from_secs(600)) else {
            tracing::error!("timed out waiting for thumbnail workers");
            break;
        };
        let Some(target) = by_id.get(&event.target) else {
            continue;
        };
        output::print_thumbnail_event(i, &target.label(), &event.outcome);
        if let ThumbnailOutcome::Loaded(thumb) = &event.outcome
            && let Some(location) = &thumb.location
        {
            index.insert(target.label(), location.clone(), target.rotation());
        }
        outcomes.push(event.outcome);
    }
    pool.shutdown();

    if config.thumbnails.persist {
        index.save(&index_dir)?;
    }
    println!("{}", output::format_thumbnail_summary(&outcomes));
    println!("{}", output::format_cache_stats(&cache.stats()));
    Ok(())
}

/// Picture targets for the supported images directly inside `dir`, plus a
/// group target holding them.
fn directory_targets(dir: &Path, index: &ThumbnailIndex) -> Vec<Arc<dyn ThumbnailTarget>> {
    let mut pictures: Vec<Arc<dyn ThumbnailTarget>> = Vec::new();
    for path in batch::collect_images(dir) {
        if path.parent() != Some(dir) {
            continue;
        }
        let original = path.display().to_string();
        let mut picture = PictureTarget::new(original.as_str(), 0.0);
        if let Some(thumb) = index.thumbnail_for(&original, 0.0) {
            picture = picture.with_thumbnail(thumb);
        }
        pictures.push(Arc::new(picture));
    }
    if pictures.is_empty() {
        return pictures;
    }

    let mut group = GroupTarget::new(dir.display().to_string());
    let group_label = format!("group:{}", group.name());
    if let Some(thumb) = index.thumbnail_for(&group_label, 0.0) {
        group = group.with_thumbnail(thumb);
    }
    for picture in &pictures {
        group.add_child(Arc::clone(picture));
    }
    pictures.push(Arc::new(group));
    pictures
}
