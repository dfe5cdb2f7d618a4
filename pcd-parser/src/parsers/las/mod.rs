use std::{io::Cursor, time::Instant};

use bytes::Bytes;
use las::Reader;
use serde::{Deserialize, Serialize};

use pcd_core::pointcloud::{
    bounds::BoundsAccumulator,
    point::{Metadata, PointCloudData, PointFormat},
    progress::LoadingStage,
};

use super::{capacity_hint, Parser};
use crate::{
    error::ParseError,
    progress::{ProgressReporter, PROGRESS_INTERVAL},
};

const SIGNATURE: &[u8; 4] = b"LASF";
const VERSION_MAJOR_OFFSET: usize = 24;
const VERSION_MINOR_OFFSET: usize = 25;
const SYSTEM_IDENTIFIER: std::ops::Range<usize> = 26..58;
const GENERATING_SOFTWARE: std::ops::Range<usize> = 58..90;
const POINT_FORMAT_OFFSET: usize = 104;
const MAX_SUPPORTED_MINOR: u8 = 3;
/// Point data format 0 record length, the shortest uncompressed record.
const MIN_RECORD_BYTES: usize = 20;

pub const VERSION_REMEDIATION: &str = "Only LAS/LAZ versions 1.0 to 1.3 are supported. \
Convert the file to LAS 1.2 and load it again, for example with LAStools \
(`las2las -i input.las -o output.las -set_version 1.2`), PDAL \
(`pdal translate input.las output.las --writers.las.minor_version=2`) \
or CloudCompare (save as LAS 1.2).";

/// How raw LAS color channels are normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorDepth {
    /// Channels hold 0-255.
    #[default]
    Eight,
    /// Channels hold 0-65535.
    Sixteen,
    /// 16-bit if any channel exceeds 255.
    Auto,
}

impl ColorDepth {
    fn divisor(&self, max_channel: u16) -> f32 {
        match self {
            ColorDepth::Eight => 255.0,
            ColorDepth::Sixteen => 65535.0,
            ColorDepth::Auto if max_channel > 255 => 65535.0,
            ColorDepth::Auto => 255.0,
        }
    }
}

pub struct LasParser {
    pub format: PointFormat,
    pub color_depth: ColorDepth,
}

impl Parser for LasParser {
    fn parse(
        &self,
        bytes: Bytes,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<PointCloudData, ParseError> {
        let start = Instant::now();
        reporter.report(LoadingStage::Parsing, 0, 0);

        let (major, minor) = check_version(&bytes)?;
        let point_format_id = bytes.get(POINT_FORMAT_OFFSET).copied();
        let system_identifier = header_text(&bytes, SYSTEM_IDENTIFIER);
        let generating_software = header_text(&bytes, GENERATING_SOFTWARE);

        let reader_input_len = bytes.len();
        let mut reader = Reader::new(Cursor::new(bytes)).map_err(decode_error)?;
        let header = reader.header();
        let total = header.number_of_points();
        let has_color = header.point_format().has_color;
        log::debug!(
            "LAS {}.{}: {} points, point format {:?}, color: {}",
            major,
            minor,
            total,
            point_format_id,
            has_color
        );
        reporter.report(LoadingStage::Parsing, 0, total);

        let reserve = capacity_hint(total, reader_input_len, MIN_RECORD_BYTES);
        let mut points: Vec<f32> = Vec::with_capacity(reserve * 3);
        let mut raw_colors: Vec<u16> = if has_color {
            Vec::with_capacity(reserve * 3)
        } else {
            Vec::new()
        };
        let mut max_channel = 0u16;
        let mut bounds = BoundsAccumulator::new();
        let mut skipped = 0u64;

        for (index, point) in reader.points().enumerate() {
            if (index + 1) % PROGRESS_INTERVAL == 0 {
                reporter.checkpoint(index as u64 + 1, total)?;
            }
            let point = point.map_err(decode_error)?;

            let (x, y, z) = (point.x as f32, point.y as f32, point.z as f32);
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                skipped += 1;
                continue;
            }

            bounds.update(x, y, z);
            points.extend_from_slice(&[x, y, z]);
            if has_color {
                let rgb = point
                    .color
                    .map(|c| [c.red, c.green, c.blue])
                    .unwrap_or([0; 3]);
                max_channel = max_channel.max(rgb[0]).max(rgb[1]).max(rgb[2]);
                raw_colors.extend_from_slice(&rgb);
            }
        }

        reporter.ensure_not_cancelled()?;
        reporter.report(LoadingStage::Processing, total, total);

        let count = points.len() / 3;
        if count == 0 {
            return Err(ParseError::malformed("LAS/LAZ file contains no position data"));
        }
        if skipped > 0 {
            log::warn!("LAS: skipped {} points with non-finite coordinates", skipped);
        }

        let colors = has_color.then(|| {
            let divisor = self.color_depth.divisor(max_channel);
            raw_colors
                .iter()
                .map(|&c| (c as f32 / divisor).min(1.0))
                .collect::<Vec<f32>>()
        });

        let mut metadata = Metadata {
            parse_time: start.elapsed(),
            declared_point_count: Some(total),
            skipped_records: skipped,
            ..Default::default()
        };
        metadata
            .other
            .insert("version".to_string(), format!("{}.{}", major, minor));
        if let Some(id) = point_format_id {
            metadata
                .other
                .insert("point_format".to_string(), id.to_string());
        }
        for (key, value) in [
            ("system_identifier", system_identifier),
            ("generating_software", generating_software),
        ] {
            if let Some(value) = value {
                metadata.other.insert(key.to_string(), value);
            }
        }
        log::info!(
            "{}: parsed {} points in {:?}",
            self.format.as_str().to_uppercase(),
            count,
            metadata.parse_time
        );

        Ok(PointCloudData::new(
            points,
            colors,
            bounds.finish(),
            self.format,
            metadata,
        ))
    }
}

/// Reads the container version straight from the public header block.
pub fn check_version(bytes: &[u8]) -> Result<(u8, u8), ParseError> {
    if bytes.len() <= VERSION_MINOR_OFFSET || &bytes[..4] != SIGNATURE {
        return Err(ParseError::malformed(
            "not a LAS/LAZ file (missing LASF signature)",
        ));
    }

    let major = bytes[VERSION_MAJOR_OFFSET];
    let minor = bytes[VERSION_MINOR_OFFSET];
    if major != 1 || minor > MAX_SUPPORTED_MINOR {
        return Err(ParseError::UnsupportedFormatVersion {
            version: format!("{}.{}", major, minor),
            remediation: VERSION_REMEDIATION.to_string(),
        });
    }

    Ok((major, minor))
}

/// NUL-padded ASCII field of the public header block.
fn header_text(bytes: &[u8], range: std::ops::Range<usize>) -> Option<String> {
    let field = bytes.get(range)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = String::from_utf8_lossy(&field[..end]).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn decode_error(err: las::Error) -> ParseError {
    ParseError::malformed(format!("LAS/LAZ decoding failed: {}", err))
}
