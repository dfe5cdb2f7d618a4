use std::{io::Write, path::PathBuf, process::ExitCode};

use chrono::Local;
use clap::{Parser, ValueEnum};
use env_logger::Builder;
use log::LevelFilter;
use serde::Serialize;
use thiserror::Error;

use pcd_core::{
    camera::{CameraPose, ProjectionMode},
    limits::format_size,
    pointcloud::{
        bounds::BoundingVolume,
        metrics::PointCloudMetrics,
        point::Metadata,
        progress::{LoadingProgress, LoadingStage},
    },
};
use pcd_loader::{LoadError, LoadSource, LoadedCloud, LoaderConfig, PointCloudLoader};
use pcd_parser::parsers::ColorDepth;

#[derive(Parser, Debug)]
#[command(
    name = "pcview",
    about = "Loads a LAS/LAZ/PTS/PTX point cloud and reports what a viewer would display",
    author = "MIERUNE Inc.",
    version = "0.0.1"
)]
struct Cli {
    /// Local path, http(s) URL, Yandex Disk or Google Drive share link
    #[arg(value_name = "SOURCE")]
    source: String,

    /// File name used for format detection when the source has none
    #[arg(long)]
    name: Option<String>,

    #[arg(long, value_name = "POINTS")]
    budget: Option<usize>,

    #[arg(long, value_enum)]
    projection: Option<Projection>,

    #[arg(long, value_enum)]
    color_depth: Option<Depth>,

    /// JSON file with loader settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the load report as JSON on stdout
    #[arg(long)]
    json: bool,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Projection {
    Orthographic,
    FirstPerson,
}

impl From<Projection> for ProjectionMode {
    fn from(value: Projection) -> Self {
        match value {
            Projection::Orthographic => ProjectionMode::Orthographic,
            Projection::FirstPerson => ProjectionMode::FirstPerson,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Depth {
    #[value(name = "8")]
    Eight,
    #[value(name = "16")]
    Sixteen,
    Auto,
}

impl From<Depth> for ColorDepth {
    fn from(value: Depth) -> Self {
        match value {
            Depth::Eight => ColorDepth::Eight,
            Depth::Sixteen => ColorDepth::Sixteen,
            Depth::Auto => ColorDepth::Auto,
        }
    }
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Failed to write report: {0}")]
    Report(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct LoadReport<'a> {
    source: &'a str,
    name: &'a str,
    point_budget: usize,
    has_color: bool,
    bounds: Option<&'a BoundingVolume>,
    metrics: &'a PointCloudMetrics,
    camera: &'a CameraPose,
    size_warning: Option<&'a str>,
    metadata: &'a Metadata,
}

/// Logs each stage once and then at every tenth of its progress.
struct ProgressLog {
    stage: Option<LoadingStage>,
    decile: u32,
}

impl ProgressLog {
    fn new() -> Self {
        Self {
            stage: None,
            decile: 0,
        }
    }

    fn update(&mut self, progress: LoadingProgress) {
        let decile = (progress.percentage / 10.0).floor() as u32;
        if self.stage != Some(progress.stage) {
            self.stage = Some(progress.stage);
            self.decile = decile;
            log::info!("{}: {:.0}%", progress.stage, progress.percentage);
        } else if decile > self.decile {
            self.decile = decile;
            log::info!(
                "{}: {:.0}% ({} / {})",
                progress.stage,
                progress.percentage,
                progress.loaded,
                progress.total
            );
        }
    }
}

fn init_logger(level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}

fn build_config(args: &Cli) -> Result<LoaderConfig, LoadError> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_json_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(budget) = args.budget {
        config.point_budget = budget;
    }
    if let Some(projection) = args.projection {
        config.projection = projection.into();
    }
    if let Some(depth) = args.color_depth {
        config.color_depth = depth.into();
    }
    config.validate()?;
    Ok(config)
}

fn print_summary(cloud: &LoadedCloud, point_budget: usize) {
    let metrics = &cloud.metrics;
    println!("{} ({})", cloud.name, metrics.format);
    println!("  points:     {}", metrics.total_points);
    println!(
        "  visible:    {} (budget {})",
        metrics.visible_points, point_budget
    );
    println!("  file size:  {}", format_size(metrics.file_size));
    println!("  load time:  {:.2?}", metrics.load_time);
    println!(
        "  colors:     {}",
        if cloud.data.has_color() { "yes" } else { "no" }
    );
    if let Some(bounds) = cloud.data.bounds() {
        println!("  bounds:     {:?} .. {:?}", bounds.min, bounds.max);
    }
    match cloud.camera {
        CameraPose::Orthographic {
            position,
            target,
            zoom,
        } => println!(
            "  camera:     orthographic at {:?} looking at {:?}, zoom {:.2}",
            position, target, zoom
        ),
        CameraPose::FirstPerson {
            position,
            yaw,
            pitch,
        } => println!(
            "  camera:     first person at {:?}, yaw {} pitch {}",
            position, yaw, pitch
        ),
    }
    if let Some(warning) = &cloud.size_warning {
        println!("  warning:    {}", warning);
    }
}

fn run(args: &Cli) -> Result<(), AppError> {
    let config = build_config(args)?;
    log::debug!("loader config: {:?}", config);

    let mut source = LoadSource::detect(&args.source);
    if let Some(name) = &args.name {
        source = source.with_filename(name.as_str());
    }

    let mut loader = PointCloudLoader::new(config);
    let mut progress_log = ProgressLog::new();
    loader.load(source, |progress| progress_log.update(progress))?;

    let point_budget = loader.point_budget();
    if let Some(cloud) = loader.current() {
        if args.json {
            let report = LoadReport {
                source: &args.source,
                name: &cloud.name,
                point_budget,
                has_color: cloud.data.has_color(),
                bounds: cloud.data.bounds(),
                metrics: &cloud.metrics,
                camera: &cloud.camera,
                size_warning: cloud.size_warning.as_deref(),
                metadata: &cloud.data.metadata,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_summary(cloud, point_budget);
        }
    }

    loader.dispose();
    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    init_logger(level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let args = Cli::try_parse_from([
            "pcview",
            "scan.las",
            "--budget",
            "500000",
            "--projection",
            "first-person",
            "--color-depth",
            "16",
        ])
        .unwrap();

        let config = build_config(&args).unwrap();
        assert_eq!(config.point_budget, 500_000);
        assert_eq!(config.projection, ProjectionMode::FirstPerson);
        assert_eq!(config.color_depth, ColorDepth::Sixteen);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let args = Cli::try_parse_from(["pcview", "scan.las", "--budget", "0"]).unwrap();
        assert!(matches!(build_config(&args), Err(LoadError::Config(_))));
    }

    #[test]
    fn progress_log_tracks_deciles() {
        let mut log = ProgressLog::new();
        log.update(LoadingProgress::new(LoadingStage::Parsing, 5, 100));
        assert_eq!(log.decile, 0);
        log.update(LoadingProgress::new(LoadingStage::Parsing, 35, 100));
        assert_eq!(log.decile, 3);
        log.update(LoadingProgress::new(LoadingStage::Processing, 0, 100));
        assert_eq!(log.stage, Some(LoadingStage::Processing));
        assert_eq!(log.decile, 0);
    }
}
