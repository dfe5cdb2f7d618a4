//! Load orchestration: source → bytes → background parse → downsample →
//! camera fit → metrics.

use std::{fs, path::Path, time::Instant};

use bytes::Bytes;

use pcd_core::{
    camera::{fit_camera, CameraPose, ProjectionMode},
    pointcloud::{
        decimation::decimator::{apply_lod, lod_count, LodResult},
        metrics::PointCloudMetrics,
        point::PointCloudData,
        progress::{LoadingProgress, LoadingStage},
    },
};
use pcd_parser::{Extension, ParseError};

use crate::{
    config::{AutoDownsample, LoaderConfig},
    error::LoadError,
    remote::{self, RemoteFile},
    source::LoadSource,
    worker::{ParseTask, ParseWorker, RequestId},
};

/// The cloud currently on display together with its derived state.
#[derive(Debug, Clone)]
pub struct LoadedCloud {
    pub name: String,
    pub data: PointCloudData,
    pub metrics: PointCloudMetrics,
    pub camera: CameraPose,
    /// Set when the file was above the warning threshold.
    pub size_warning: Option<String>,
}

struct LoadInfo {
    name: String,
    file_size: u64,
    size_warning: Option<String>,
    started: Instant,
}

/// A load whose parse is running on the worker thread.
pub struct PendingLoad {
    task: ParseTask,
    info: Option<LoadInfo>,
}

impl PendingLoad {
    pub fn id(&self) -> RequestId {
        self.task.id()
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Forwards queued progress without blocking.
    ///
    /// Returns the outcome exactly once, after the worker has answered;
    /// on success `loader` then holds the new cloud. `None` while the parse
    /// is still running and after the outcome has been taken.
    pub fn poll<'l>(
        &mut self,
        loader: &'l mut PointCloudLoader,
        mut on_progress: impl FnMut(LoadingProgress),
    ) -> Option<Result<&'l LoadedCloud, LoadError>> {
        let parsed = self.task.poll(&mut on_progress)?;
        let info = self.info.take()?;
        Some(loader.finish(info, parsed, &mut on_progress))
    }
}

fn fail(error: LoadError, on_progress: &mut dyn FnMut(LoadingProgress)) -> LoadError {
    on_progress(LoadingProgress::stage(LoadingStage::Error));
    log::error!("Load failed: {}", error);
    error
}

struct FetchedFile {
    name: String,
    bytes: Bytes,
    size_warning: Option<String>,
}

pub struct PointCloudLoader {
    config: LoaderConfig,
    point_budget: usize,
    worker: ParseWorker,
    current: Option<LoadedCloud>,
}

impl PointCloudLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            point_budget: config.point_budget.max(1),
            config,
            worker: ParseWorker::new(),
            current: None,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn point_budget(&self) -> usize {
        self.point_budget
    }

    pub fn projection_mode(&self) -> ProjectionMode {
        self.config.projection
    }

    pub fn current(&self) -> Option<&LoadedCloud> {
        self.current.as_ref()
    }

    /// Loads `source` and makes it the current cloud, blocking until the
    /// parse is done.
    ///
    /// Progress goes through `Downloading`, `Parsing` and `Processing` and
    /// ends with either `Complete` or `Error`. On failure the previously
    /// loaded cloud stays untouched.
    pub fn load(
        &mut self,
        source: LoadSource,
        mut on_progress: impl FnMut(LoadingProgress),
    ) -> Result<&LoadedCloud, LoadError> {
        let started = Instant::now();
        log::info!("Loading {}", source);

        let (task, info) = self
            .submit(source, started, &mut on_progress)
            .map_err(|e| fail(e, &mut on_progress))?;
        let parsed = task.wait(&mut on_progress);
        self.finish(info, parsed, &mut on_progress)
    }

    /// Fetches `source` on the calling thread and hands it to the parse
    /// worker without waiting for the result.
    ///
    /// Drive the returned [`PendingLoad`] with [`PendingLoad::poll`]; the
    /// current cloud is replaced only once the parse has finished.
    pub fn begin_load(
        &mut self,
        source: LoadSource,
        mut on_progress: impl FnMut(LoadingProgress),
    ) -> Result<PendingLoad, LoadError> {
        let started = Instant::now();
        log::info!("Loading {}", source);

        let (task, info) = self
            .submit(source, started, &mut on_progress)
            .map_err(|e| fail(e, &mut on_progress))?;
        Ok(PendingLoad {
            task,
            info: Some(info),
        })
    }

    fn submit(
        &mut self,
        source: LoadSource,
        started: Instant,
        on_progress: &mut dyn FnMut(LoadingProgress),
    ) -> Result<(ParseTask, LoadInfo), LoadError> {
        let fetched = self.fetch(source, on_progress)?;
        let info = LoadInfo {
            name: fetched.name,
            file_size: fetched.bytes.len() as u64,
            size_warning: fetched.size_warning,
            started,
        };
        let task =
            self.worker
                .submit(info.name.clone(), fetched.bytes, self.config.parse_options())?;

        Ok((task, info))
    }

    fn finish(
        &mut self,
        info: LoadInfo,
        parsed: Result<PointCloudData, LoadError>,
        on_progress: &mut dyn FnMut(LoadingProgress),
    ) -> Result<&LoadedCloud, LoadError> {
        match parsed.and_then(|data| self.assemble(info, data, on_progress)) {
            Ok((loaded, point_budget)) => {
                on_progress(LoadingProgress::stage(LoadingStage::Complete));
                log::info!(
                    "Loaded {}: {} points ({} visible) in {:?}",
                    loaded.name,
                    loaded.metrics.total_points,
                    loaded.metrics.visible_points,
                    loaded.metrics.load_time
                );
                self.point_budget = point_budget;
                let loaded: &LoadedCloud = self.current.insert(loaded);
                Ok(loaded)
            }
            Err(e) => Err(fail(e, on_progress)),
        }
    }

    /// Downsampling, camera fit and metrics for a freshly parsed cloud.
    fn assemble(
        &self,
        info: LoadInfo,
        data: PointCloudData,
        on_progress: &mut dyn FnMut(LoadingProgress),
    ) -> Result<(LoadedCloud, usize), LoadError> {
        let total_points = data.count();
        on_progress(LoadingProgress::new(
            LoadingStage::Processing,
            total_points as u64,
            total_points as u64,
        ));
        let (data, point_budget) =
            auto_downsample(data, self.point_budget, &self.config.auto_downsample);

        let bounds = data
            .bounds()
            .ok_or_else(|| ParseError::malformed("No valid points found in file"))?;
        let camera = fit_camera(bounds, self.config.projection);

        let metrics = PointCloudMetrics::new(
            total_points,
            lod_count(data.count(), point_budget),
            info.file_size,
            info.started.elapsed(),
            data.format(),
        );

        Ok((
            LoadedCloud {
                name: info.name,
                data,
                metrics,
                camera,
                size_warning: info.size_warning,
            },
            point_budget,
        ))
    }

    fn fetch(
        &self,
        source: LoadSource,
        on_progress: &mut dyn FnMut(LoadingProgress),
    ) -> Result<FetchedFile, LoadError> {
        match source {
            LoadSource::File(path) => self.read_file(&path, on_progress),
            LoadSource::Bytes { filename, bytes } => self.accept_bytes(filename, bytes),
            LoadSource::Url { url, filename } => self.download(&url, filename, on_progress),
            LoadSource::YandexDisk {
                share_url,
                filename,
            } => {
                let href = remote::resolve_yandex_disk(&share_url, self.config.http_timeout())?;
                self.download(&href, filename, on_progress)
            }
            LoadSource::GoogleDrive {
                share_url,
                filename,
            } => {
                let url = remote::google_drive_download_url(&share_url)?;
                self.download(&url, filename, on_progress)
            }
        }
    }

    fn read_file(
        &self,
        path: &Path,
        on_progress: &mut dyn FnMut(LoadingProgress),
    ) -> Result<FetchedFile, LoadError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Extension::from_filename(&name)?;

        let size = fs::metadata(path)?.len();
        let size_warning = self.check_size(size)?;
        on_progress(LoadingProgress::new(LoadingStage::Downloading, 0, size));
        let bytes = Bytes::from(fs::read(path)?);
        on_progress(LoadingProgress::new(
            LoadingStage::Downloading,
            bytes.len() as u64,
            bytes.len() as u64,
        ));

        Ok(FetchedFile {
            name,
            bytes,
            size_warning,
        })
    }

    fn accept_bytes(&self, name: String, bytes: Bytes) -> Result<FetchedFile, LoadError> {
        Extension::from_filename(&name)?;
        let size_warning = self.check_size(bytes.len() as u64)?;
        Ok(FetchedFile {
            name,
            bytes,
            size_warning,
        })
    }

    fn download(
        &self,
        url: &str,
        filename: Option<String>,
        on_progress: &mut dyn FnMut(LoadingProgress),
    ) -> Result<FetchedFile, LoadError> {
        if let Some(name) = &filename {
            Extension::from_filename(name)?;
        }

        let RemoteFile {
            bytes,
            filename: announced,
            ..
        } = remote::fetch_url(url, &self.config.limits, self.config.http_timeout(), on_progress)?;
        let name = filename
            .or(announced)
            .or_else(|| remote::filename_from_url(url))
            .ok_or_else(|| {
                LoadError::RemoteFetchFailure(format!(
                    "cannot tell the file name of {}; pass one explicitly",
                    url
                ))
            })?;
        Extension::from_filename(&name)?;
        let size_warning = self.check_size(bytes.len() as u64)?;

        Ok(FetchedFile {
            name,
            bytes,
            size_warning,
        })
    }

    fn check_size(&self, size: u64) -> Result<Option<String>, LoadError> {
        let check = self.config.limits.check(size);
        if !check.ok {
            return Err(LoadError::OversizeFile {
                size,
                limit: self.config.limits.max_file_size,
            });
        }
        if let Some(message) = &check.message {
            log::warn!("{}", message);
        }
        Ok(check.message)
    }

    /// The current cloud reduced to the active point budget.
    pub fn lod(&self) -> Option<LodResult<'_>> {
        self.current
            .as_ref()
            .map(|cloud| apply_lod(cloud.data.points(), cloud.data.colors(), self.point_budget))
    }

    /// Budgets below one are raised to one.
    pub fn set_point_budget(&mut self, point_budget: usize) {
        self.point_budget = point_budget.max(1);
        if let Some(cloud) = &mut self.current {
            cloud.metrics = cloud
                .metrics
                .with_visible_points(lod_count(cloud.data.count(), self.point_budget));
        }
    }

    /// Switches projection and refits the camera to the current cloud.
    pub fn set_projection_mode(&mut self, mode: ProjectionMode) {
        self.config.projection = mode;
        if let Some(cloud) = &mut self.current {
            if let Some(bounds) = cloud.data.bounds() {
                cloud.camera = fit_camera(bounds, mode);
            }
        }
    }

    /// Forgets the current cloud.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Stops the parse worker. Loading again restarts it.
    pub fn dispose(&mut self) {
        self.worker.dispose();
    }
}

/// Reduces very large clouds right after parsing.
///
/// Above `policy.threshold` points the cloud is decimated to
/// `min(point_budget, policy.ceiling)` and that value becomes the new
/// budget. Smaller clouds and the budget pass through unchanged.
pub fn auto_downsample(
    data: PointCloudData,
    point_budget: usize,
    policy: &AutoDownsample,
) -> (PointCloudData, usize) {
    let total = data.count();
    if total <= policy.threshold {
        return (data, point_budget);
    }

    let budget = point_budget.min(policy.ceiling).max(1);
    log::warn!(
        "{} points exceed the auto-downsample threshold of {}; reducing to a budget of {}",
        total,
        policy.threshold,
        budget
    );

    let format = data.format();
    let mut metadata = data.metadata.clone();
    metadata
        .other
        .insert("downsampled_from".to_string(), total.to_string());
    let (points, colors) = apply_lod(data.points(), data.colors(), budget).into_owned();

    (
        PointCloudData::from_buffers(points, colors, format, metadata),
        budget,
    )
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use pcd_core::pointcloud::{point::Metadata, point::PointFormat};

    use super::*;

    fn pts_text(rows: usize) -> String {
        let mut text = format!("{}\n", rows);
        for i in 0..rows {
            text.push_str(&format!("{} {} {} 0 255 128 0\n", i, i * 2, i % 5));
        }
        text
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "cloud.pts", &pts_text(100));

        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        let mut stages = Vec::new();
        let loaded = loader
            .load(LoadSource::File(path), |p| stages.push(p.stage))
            .unwrap();

        assert_eq!(loaded.name, "cloud.pts");
        assert_eq!(loaded.data.count(), 100);
        assert_eq!(loaded.metrics.total_points, 100);
        assert_eq!(loaded.metrics.visible_points, 100);
        assert_eq!(loaded.metrics.format, PointFormat::Pts);
        assert_eq!(loaded.metrics.file_size, pts_text(100).len() as u64);
        assert!(loaded.size_warning.is_none());
        assert!(matches!(loaded.camera, CameraPose::Orthographic { .. }));

        assert_eq!(stages.first(), Some(&LoadingStage::Downloading));
        assert!(stages.contains(&LoadingStage::Parsing));
        assert!(stages.contains(&LoadingStage::Processing));
        assert_eq!(stages.last(), Some(&LoadingStage::Complete));
    }

    #[test]
    fn failed_load_keeps_previous_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(&dir, "good.pts", &pts_text(10));
        let broken = write_file(&dir, "broken.pts", "no numbers here\n");

        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        loader.load(LoadSource::File(good), |_| {}).unwrap();

        let mut last_stage = None;
        let result = loader.load(LoadSource::File(broken), |p| last_stage = Some(p.stage));
        assert!(matches!(
            result,
            Err(LoadError::Parse(ParseError::MalformedFile(_)))
        ));
        assert_eq!(last_stage, Some(LoadingStage::Error));

        let current = loader.current().unwrap();
        assert_eq!(current.name, "good.pts");
        assert_eq!(current.data.count(), 10);
    }

    #[test]
    fn unsupported_extension_fails_before_reading() {
        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        let result = loader.load(LoadSource::File("missing/scan.e57".into()), |_| {});
        assert!(matches!(
            result,
            Err(LoadError::Parse(ParseError::UnsupportedFormat { ref extension })) if extension == "e57"
        ));
        assert!(!loader.worker.is_running());
    }

    #[test]
    fn size_limits_apply() {
        let text = pts_text(50);
        let mut config = LoaderConfig::default();
        config.limits.max_file_size = (text.len() - 1) as u64;
        config.limits.warn_file_size = 10;
        let mut loader = PointCloudLoader::new(config);

        let result = loader.load(
            LoadSource::Bytes {
                filename: "big.pts".into(),
                bytes: Bytes::from(text.clone()),
            },
            |_| {},
        );
        assert!(matches!(result, Err(LoadError::OversizeFile { .. })));
        assert!(loader.current().is_none());

        let mut config = LoaderConfig::default();
        config.limits.warn_file_size = 10;
        let mut loader = PointCloudLoader::new(config);
        let loaded = loader
            .load(
                LoadSource::Bytes {
                    filename: "big.pts".into(),
                    bytes: Bytes::from(text),
                },
                |_| {},
            )
            .unwrap();
        assert!(loaded.size_warning.is_some());
        assert_eq!(loaded.data.count(), 50);
    }

    #[test]
    fn budget_controls_lod_and_visible_points() {
        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        loader
            .load(
                LoadSource::Bytes {
                    filename: "cloud.pts".into(),
                    bytes: Bytes::from(pts_text(10)),
                },
                |_| {},
            )
            .unwrap();

        loader.set_point_budget(3);
        let lod = loader.lod().unwrap();
        assert_eq!(lod.count, 3);
        assert_eq!(&lod.positions[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&lod.positions[3..6], &[4.0, 8.0, 4.0]);
        assert_eq!(lod.colors.as_ref().map(|c| c.len()), Some(9));
        assert_eq!(loader.current().unwrap().metrics.visible_points, 3);
        assert_eq!(loader.current().unwrap().metrics.total_points, 10);

        loader.set_point_budget(0);
        assert_eq!(loader.point_budget(), 1);
        assert_eq!(loader.lod().unwrap().count, 1);
    }

    #[test]
    fn projection_switch_refits_camera() {
        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        loader
            .load(
                LoadSource::Bytes {
                    filename: "cloud.pts".into(),
                    bytes: Bytes::from(pts_text(10)),
                },
                |_| {},
            )
            .unwrap();

        loader.set_projection_mode(ProjectionMode::FirstPerson);
        assert_eq!(loader.projection_mode(), ProjectionMode::FirstPerson);
        assert!(matches!(
            loader.current().unwrap().camera,
            CameraPose::FirstPerson { yaw, pitch, .. } if yaw == 0.0 && pitch == 0.0
        ));

        loader.reset();
        assert!(loader.current().is_none());
        assert!(loader.lod().is_none());
        loader.set_projection_mode(ProjectionMode::Orthographic);
    }

    #[test]
    fn large_cloud_lowers_active_budget() {
        let mut config = LoaderConfig::default();
        config.point_budget = 100;
        config.auto_downsample = AutoDownsample {
            threshold: 50,
            ceiling: 20,
        };
        let mut loader = PointCloudLoader::new(config);

        let loaded = loader
            .load(
                LoadSource::Bytes {
                    filename: "cloud.pts".into(),
                    bytes: Bytes::from(pts_text(200)),
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(loaded.data.count(), 20);
        assert_eq!(loaded.metrics.total_points, 200);
        assert_eq!(loaded.metrics.visible_points, 20);
        assert_eq!(loader.point_budget(), 20);
    }

    fn poll_until_done(
        pending: &mut PendingLoad,
        loader: &mut PointCloudLoader,
        stages: &mut Vec<LoadingStage>,
    ) -> Result<usize, LoadError> {
        for _ in 0..6_000 {
            if let Some(result) = pending.poll(loader, |p| stages.push(p.stage)) {
                return result.map(|cloud| cloud.data.count());
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("parse did not finish");
    }

    #[test]
    fn begin_load_returns_while_parsing() {
        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        let mut pending = loader
            .begin_load(
                LoadSource::Bytes {
                    filename: "big.pts".into(),
                    bytes: Bytes::from(pts_text(300_000)),
                },
                |_| {},
            )
            .unwrap();
        assert!(loader.current().is_none());

        let mut stages = Vec::new();
        assert!(pending
            .poll(&mut loader, |p| stages.push(p.stage))
            .is_none());

        let count = poll_until_done(&mut pending, &mut loader, &mut stages).unwrap();
        assert_eq!(count, 300_000);
        assert!(stages.contains(&LoadingStage::Parsing));
        assert!(stages.contains(&LoadingStage::Processing));
        assert_eq!(stages.last(), Some(&LoadingStage::Complete));
        assert_eq!(loader.current().unwrap().name, "big.pts");
        assert!(pending.poll(&mut loader, |_| {}).is_none());
    }

    #[test]
    fn superseded_pending_load_leaves_state_alone() {
        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        let mut stale = loader
            .begin_load(
                LoadSource::Bytes {
                    filename: "big.pts".into(),
                    bytes: Bytes::from(pts_text(400_000)),
                },
                |_| {},
            )
            .unwrap();
        let mut fresh = loader
            .begin_load(
                LoadSource::Bytes {
                    filename: "small.pts".into(),
                    bytes: Bytes::from(pts_text(20)),
                },
                |_| {},
            )
            .unwrap();
        assert!(fresh.id() > stale.id());

        let mut stages = Vec::new();
        assert!(matches!(
            poll_until_done(&mut stale, &mut loader, &mut stages),
            Err(LoadError::Parse(ParseError::Cancelled))
        ));
        assert_eq!(stages.last(), Some(&LoadingStage::Error));
        assert!(loader.current().is_none());

        assert_eq!(
            poll_until_done(&mut fresh, &mut loader, &mut stages).unwrap(),
            20
        );
        assert_eq!(loader.current().unwrap().name, "small.pts");
    }

    #[test]
    fn dispose_then_load_again() {
        let mut loader = PointCloudLoader::new(LoaderConfig::default());
        let source = LoadSource::Bytes {
            filename: "cloud.pts".into(),
            bytes: Bytes::from(pts_text(5)),
        };
        loader.load(source.clone(), |_| {}).unwrap();
        loader.dispose();
        assert_eq!(loader.load(source, |_| {}).unwrap().data.count(), 5);
    }

    #[test]
    fn auto_downsample_large_cloud() {
        let total = 3_000_000;
        let points: Vec<f32> = (0..total).flat_map(|i| [i as f32, 0.0, 1.0]).collect();
        let data = PointCloudData::from_buffers(points, None, PointFormat::Las, Metadata::default());

        let (reduced, budget) = auto_downsample(data, 2_000_000, &AutoDownsample::default());
        assert_eq!(budget, 1_000_000);
        assert!(reduced.count() <= 1_000_000);
        assert_eq!(reduced.format(), PointFormat::Las);
        assert_eq!(
            reduced.metadata.other.get("downsampled_from").map(String::as_str),
            Some("3000000")
        );
        assert_eq!(reduced.points()[3], 3.0);
    }

    #[test]
    fn auto_downsample_keeps_small_clouds_and_low_budgets() {
        let points: Vec<f32> = (0..10).flat_map(|i| [i as f32, 0.0, 0.0]).collect();
        let data = PointCloudData::from_buffers(points, None, PointFormat::Pts, Metadata::default());
        let (same, budget) = auto_downsample(data, 5, &AutoDownsample::default());
        assert_eq!(same.count(), 10);
        assert_eq!(budget, 5);

        let points: Vec<f32> = (0..10).flat_map(|i| [i as f32, 0.0, 0.0]).collect();
        let data = PointCloudData::from_buffers(points, None, PointFormat::Pts, Metadata::default());
        let policy = AutoDownsample {
            threshold: 4,
            ceiling: 8,
        };
        let (reduced, budget) = auto_downsample(data, 2, &policy);
        assert_eq!(budget, 2);
        assert_eq!(reduced.count(), 2);
    }
}
