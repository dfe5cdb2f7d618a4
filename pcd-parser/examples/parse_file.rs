use std::path::PathBuf;

use bytes::Bytes;
use pcd_parser::{dispatch, ParseOptions, ProgressReporter};

fn main() {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("examples/data/sample.pts"));
    let filename = path.file_name().unwrap().to_string_lossy().to_string();
    let bytes = Bytes::from(std::fs::read(&path).unwrap());

    let mut reporter = ProgressReporter::new(|p| println!("{} {:.1}%", p.stage, p.percentage));
    let point_cloud = dispatch(&filename, bytes, &ParseOptions::default(), &mut reporter).unwrap();

    println!("Number of points: {}", point_cloud.count());
    println!("Bounds: {:?}", point_cloud.bounds());
    println!("First point: {:?}", point_cloud.iter().next());
}
