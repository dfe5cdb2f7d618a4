use std::time::Instant;

use bytes::Bytes;

use pcd_core::pointcloud::{
    bounds::BoundsAccumulator,
    point::{Metadata, PointCloudData, PointFormat, ScanHeader},
    progress::LoadingStage,
};

use super::{
    capacity_hint,
    text::{
        channel_from_u8, decode_text, intensity_to_gray, parse_numbers, single_integer,
        token_count,
    },
    Parser,
};
use crate::{
    error::ParseError,
    progress::{ProgressReporter, PROGRESS_INTERVAL},
};

pub const HEADER_LINES: usize = 10;

/// Shortest possible row: `0 0 0 0` plus a line break.
const MIN_RECORD_BYTES: usize = 8;

/// Leica PTX: a 10 line scan header followed by `x y z intensity [r g b]` rows.
///
/// Several scans may follow each other in one file. Points at the origin are
/// "no return" placeholders and are dropped.
pub struct PtxParser;

impl Parser for PtxParser {
    fn parse(
        &self,
        bytes: Bytes,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<PointCloudData, ParseError> {
        let start = Instant::now();
        reporter.report(LoadingStage::Parsing, 0, 0);

        let text = decode_text(&bytes);
        let mut lines = text.lines().peekable();

        let first = lines
            .next()
            .ok_or_else(|| ParseError::malformed("PTX file is empty"))?;
        let header = parse_scan_header(first, &mut lines)?;
        let mut expected = header.expected_points();
        let mut scans = vec![header];
        reporter.report(LoadingStage::Parsing, 0, expected);

        let reserve = capacity_hint(expected, bytes.len(), MIN_RECORD_BYTES);
        let mut points: Vec<f32> = Vec::with_capacity(reserve * 3);
        let mut colors: Vec<f32> = Vec::with_capacity(reserve * 3);
        let mut bounds = BoundsAccumulator::new();
        let mut skipped = 0u64;
        let mut sentinels = 0u64;
        let mut records = 0usize;
        let mut values = Vec::with_capacity(8);

        while let Some(line) = lines.next() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if single_integer(line).is_some()
                && lines.peek().is_some_and(|next| single_integer(next).is_some())
            {
                let header = parse_scan_header(line, &mut lines)?;
                log::debug!(
                    "PTX: scan {} ({} x {})",
                    scans.len() + 1,
                    header.columns,
                    header.rows
                );
                expected += header.expected_points();
                scans.push(header);
                continue;
            }

            records += 1;
            if records % PROGRESS_INTERVAL == 0 {
                reporter.checkpoint(records as u64, expected)?;
            }

            parse_numbers(line, &mut values);
            if values.len() < 4 {
                log::debug!("PTX: skipping row with {} values: {:?}", values.len(), line);
                skipped += 1;
                continue;
            }

            let (x, y, z) = (values[0] as f32, values[1] as f32, values[2] as f32);
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                skipped += 1;
                continue;
            }
            if x == 0.0 && y == 0.0 && z == 0.0 {
                sentinels += 1;
                continue;
            }

            let rgb = if values.len() >= 7 {
                [
                    channel_from_u8(values[4]),
                    channel_from_u8(values[5]),
                    channel_from_u8(values[6]),
                ]
            } else {
                [intensity_to_gray(values[3]); 3]
            };

            bounds.update(x, y, z);
            points.extend_from_slice(&[x, y, z]);
            colors.extend_from_slice(&rgb);
        }

        reporter.ensure_not_cancelled()?;
        reporter.report(LoadingStage::Processing, records as u64, expected);

        let count = points.len() / 3;
        if count == 0 {
            return Err(ParseError::malformed("no valid points found in PTX file"));
        }
        if skipped > 0 {
            log::warn!("PTX: skipped {} malformed rows", skipped);
        }

        let mut metadata = Metadata {
            parse_time: start.elapsed(),
            declared_point_count: Some(expected),
            skipped_records: skipped,
            scans,
            ..Default::default()
        };
        metadata
            .other
            .insert("sentinel_points".to_string(), sentinels.to_string());
        log::info!(
            "PTX: parsed {} points from {} scan(s) in {:?}",
            count,
            metadata.scans.len(),
            metadata.parse_time
        );

        Ok(PointCloudData::new(
            points,
            Some(colors),
            bounds.finish(),
            PointFormat::Ptx,
            metadata,
        ))
    }
}

/// Reads one scan header whose first line has already been taken from `rest`.
fn parse_scan_header<'a>(
    first: &'a str,
    rest: &mut impl Iterator<Item = &'a str>,
) -> Result<ScanHeader, ParseError> {
    let mut lines = Vec::with_capacity(HEADER_LINES);
    lines.push(first);
    lines.extend(rest.take(HEADER_LINES - 1));
    if lines.len() < HEADER_LINES {
        return Err(ParseError::malformed(format!(
            "PTX header too short: expected {} lines, found {}",
            HEADER_LINES,
            lines.len()
        )));
    }

    let columns = single_integer(lines[0]).ok_or_else(|| {
        ParseError::malformed(format!("invalid PTX column count: {:?}", lines[0].trim()))
    })?;
    let rows = single_integer(lines[1]).ok_or_else(|| {
        ParseError::malformed(format!("invalid PTX row count: {:?}", lines[1].trim()))
    })?;

    let mut values = Vec::with_capacity(4);
    let mut vec3 = |line: &str| {
        parse_numbers(line, &mut values);
        let mut out = [0.0; 3];
        for (dst, src) in out.iter_mut().zip(values.iter()) {
            *dst = *src;
        }
        out
    };
    let scanner_position = vec3(lines[2]);
    let scanner_axes = [vec3(lines[3]), vec3(lines[4]), vec3(lines[5])];

    let mut transform = [[0.0; 4]; 4];
    for (row, line) in transform.iter_mut().zip(&lines[6..HEADER_LINES]) {
        parse_numbers(line, &mut values);
        let tokens = token_count(line);
        if tokens != 4 || values.len() != 4 {
            return Err(ParseError::malformed(format!(
                "PTX transform row must have 4 numbers, found {:?}",
                line.trim()
            )));
        }
        row.copy_from_slice(&values);
    }

    Ok(ScanHeader {
        columns,
        rows,
        scanner_position,
        scanner_axes,
        transform,
    })
}
