pub mod camera;
pub mod limits;
pub mod pointcloud;
