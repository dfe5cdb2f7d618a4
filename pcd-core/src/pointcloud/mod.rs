pub mod bounds;
pub mod decimation;
pub mod metrics;
pub mod point;
pub mod progress;
