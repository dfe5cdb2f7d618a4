pub mod config;
pub mod error;
pub mod pipeline;
pub mod remote;
pub mod source;
pub mod worker;

pub use config::{AutoDownsample, LoaderConfig};
pub use error::LoadError;
pub use pipeline::{auto_downsample, LoadedCloud, PendingLoad, PointCloudLoader};
pub use source::LoadSource;
pub use worker::{ParseTask, ParseWorker, RequestId, WorkerMessage};
