use std::time::Instant;

use bytes::Bytes;

use pcd_core::pointcloud::{
    bounds::BoundsAccumulator,
    point::{Metadata, PointCloudData, PointFormat},
    progress::LoadingStage,
};

use super::{
    capacity_hint,
    text::{channel_from_u8, decode_text, intensity_to_gray, parse_numbers, single_number},
    Parser,
};
use crate::{
    error::ParseError,
    progress::{ProgressReporter, PROGRESS_INTERVAL},
};

/// Shortest possible record: `0 0 0` plus a line break.
const MIN_RECORD_BYTES: usize = 6;

/// Whitespace separated `x y z [intensity] [r g b]` records with an optional
/// point-count header line.
pub struct PtsParser;

impl Parser for PtsParser {
    fn parse(
        &self,
        bytes: Bytes,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<PointCloudData, ParseError> {
        let start = Instant::now();
        let total_bytes = bytes.len() as u64;
        reporter.report(LoadingStage::Parsing, 0, total_bytes);

        let text = decode_text(&bytes);

        let mut points: Vec<f32> = Vec::new();
        let mut colors: Vec<f32> = Vec::new();
        let mut bounds = BoundsAccumulator::new();
        let mut any_color = false;
        let mut declared_point_count = None;
        let mut header_checked = false;
        let mut skipped = 0u64;
        let mut records = 0usize;
        let mut offset = 0u64;
        let mut values = Vec::with_capacity(8);

        for (line_no, line) in text.lines().enumerate() {
            offset += line.len() as u64 + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if !header_checked {
                header_checked = true;
                if let Some(count) = single_number(line) {
                    log::debug!("PTS header announces {} points", count);
                    if count >= 0.0 && count.fract() == 0.0 {
                        declared_point_count = Some(count as u64);
                        let reserve = capacity_hint(count as u64, bytes.len(), MIN_RECORD_BYTES);
                        points.reserve(reserve * 3);
                    }
                    continue;
                }
            }

            records += 1;
            if records % PROGRESS_INTERVAL == 0 {
                reporter.checkpoint(offset, total_bytes)?;
            }

            parse_numbers(line, &mut values);
            if values.len() < 3 {
                log::debug!(
                    "PTS line {}: expected at least 3 numbers, found {}",
                    line_no + 1,
                    values.len()
                );
                skipped += 1;
                continue;
            }

            let (x, y, z) = (values[0] as f32, values[1] as f32, values[2] as f32);
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                log::debug!("PTS line {}: non-finite coordinate", line_no + 1);
                skipped += 1;
                continue;
            }

            let rgb = match values.len() {
                n if n >= 6 => Some([
                    channel_from_u8(values[n - 3]),
                    channel_from_u8(values[n - 2]),
                    channel_from_u8(values[n - 1]),
                ]),
                4 | 5 => Some([intensity_to_gray(values[3]); 3]),
                _ => None,
            };

            if rgb.is_some() && !any_color {
                any_color = true;
                // rows before the first colored one are white
                colors.reserve(points.capacity());
                colors.resize(points.len(), 1.0);
            }

            bounds.update(x, y, z);
            points.extend_from_slice(&[x, y, z]);
            if any_color {
                colors.extend_from_slice(&rgb.unwrap_or([1.0; 3]));
            }
        }

        reporter.ensure_not_cancelled()?;
        reporter.report(LoadingStage::Processing, total_bytes, total_bytes);

        let count = points.len() / 3;
        if count == 0 {
            return Err(ParseError::malformed("no valid points found in PTS file"));
        }
        if skipped > 0 {
            log::warn!("PTS: skipped {} malformed lines", skipped);
        }
        if let Some(declared) = declared_point_count {
            if declared != count as u64 {
                log::warn!(
                    "PTS header announces {} points but {} were parsed",
                    declared,
                    count
                );
            }
        }

        let metadata = Metadata {
            parse_time: start.elapsed(),
            declared_point_count,
            skipped_records: skipped,
            ..Default::default()
        };
        log::info!("PTS: parsed {} points in {:?}", count, metadata.parse_time);

        Ok(PointCloudData::new(
            points,
            any_color.then_some(colors),
            bounds.finish(),
            PointFormat::Pts,
            metadata,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<PointCloudData, ParseError> {
        PtsParser.parse(
            Bytes::copy_from_slice(text.as_bytes()),
            &mut ProgressReporter::silent(),
        )
    }

    fn assert_shape(pc: &PointCloudData) {
        assert_eq!(pc.points().len(), pc.count() * 3);
        if let Some(colors) = pc.colors() {
            assert_eq!(colors.len() / 3, pc.count());
        }
        let bounds = pc.bounds().unwrap();
        for p in pc.iter() {
            assert!(bounds.contains(p));
        }
    }

    #[test]
    fn header_line_is_skipped() {
        let mut text = String::from("500\n");
        for i in 0..500 {
            text.push_str(&format!("{} {} {}\n", i, i * 2, i % 7));
        }
        let pc = parse(&text).unwrap();

        assert_eq!(pc.count(), 500);
        assert_eq!(pc.metadata.declared_point_count, Some(500));
        assert!(!pc.has_color());
        assert_shape(&pc);
    }

    #[test]
    fn first_record_is_not_a_header() {
        let pc = parse("1 2 3 255 0 0\n4 5 6 0 255 0\n").unwrap();

        assert_eq!(pc.count(), 2);
        assert_eq!(pc.metadata.declared_point_count, None);
        assert_eq!(pc.points(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(pc.colors().unwrap(), &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_shape(&pc);
    }

    #[test]
    fn column_rules() {
        let pc = parse(
            "3\n\
             0 0 0 10 255 255 0\n\
             1 1 1 51\n\
             2 2 2\n",
        )
        .unwrap();
        let colors = pc.colors().unwrap();

        // 7 columns: last three are rgb
        assert_eq!(&colors[0..3], &[1.0, 1.0, 0.0]);
        // 4 columns: intensity as gray
        assert_eq!(&colors[3..6], &[0.2, 0.2, 0.2]);
        // 3 columns: white
        assert_eq!(&colors[6..9], &[1.0, 1.0, 1.0]);
        assert_shape(&pc);
    }

    #[test]
    fn oversized_header_count_is_only_a_hint() {
        let pc = parse("50000000\n1 2 3\n").unwrap();
        assert_eq!(pc.count(), 1);
        assert_eq!(pc.metadata.declared_point_count, Some(50_000_000));
        assert!(pc.colors().is_none());
    }

    #[test]
    fn rows_before_first_color_become_white() {
        let pc = parse("1 2 3\n4 5 6\n7 8 9 255 0 0\n").unwrap();
        assert_eq!(
            pc.colors().unwrap(),
            &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn bad_lines_are_skipped() {
        let pc = parse(
            "1 2 3\n\
             garbage\n\
             4 5\n\
             nan 1 1\n\
             7 8 9\n",
        )
        .unwrap();

        assert_eq!(pc.count(), 2);
        assert_eq!(pc.metadata.skipped_records, 3);
        assert_shape(&pc);
    }

    #[test]
    fn crlf_and_commas() {
        let pc = parse("2\r\n1,2,3\r\n4,5,6\r\n").unwrap();
        assert_eq!(pc.count(), 2);
        assert_eq!(pc.points()[5], 6.0);
    }

    #[test]
    fn no_points_is_malformed() {
        assert!(matches!(parse(""), Err(ParseError::MalformedFile(_))));
        assert!(matches!(parse("10\nfoo\n"), Err(ParseError::MalformedFile(_))));
    }

    #[test]
    fn progress_is_reported_in_batches() {
        let mut text = String::new();
        for i in 0..25_000 {
            text.push_str(&format!("{} 0 0\n", i));
        }

        let mut stages = Vec::new();
        let result = {
            let mut reporter = ProgressReporter::new(|p| stages.push(p));
            PtsParser.parse(Bytes::from(text), &mut reporter)
        };
        assert_eq!(result.unwrap().count(), 25_000);

        let parsing = stages
            .iter()
            .filter(|p| p.stage == LoadingStage::Parsing)
            .count();
        // initial report + one per 10,000 records
        assert_eq!(parsing, 3);
        assert_eq!(stages.last().unwrap().stage, LoadingStage::Processing);
        assert!(stages.iter().all(|p| (0.0..=100.0).contains(&p.percentage)));
    }

    #[test]
    fn cancellation_stops_the_parse() {
        let mut text = String::new();
        for i in 0..20_000 {
            text.push_str(&format!("{} 0 0\n", i));
        }
        let token = crate::progress::CancellationToken::new();
        token.cancel();
        let mut reporter = ProgressReporter::silent().with_cancellation(token);
        assert_eq!(
            PtsParser.parse(Bytes::from(text), &mut reporter).unwrap_err(),
            ParseError::Cancelled
        );
    }
}
