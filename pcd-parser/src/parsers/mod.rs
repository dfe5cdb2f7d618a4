use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use pcd_core::pointcloud::point::{PointCloudData, PointFormat};

use crate::{error::ParseError, progress::ProgressReporter};

pub mod las;
pub mod pts;
pub mod ptx;
mod text;

pub use las::ColorDepth;

pub trait Parser {
    fn parse(
        &self,
        bytes: Bytes,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<PointCloudData, ParseError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub color_depth: ColorDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Las,
    Laz,
    Pts,
    Ptx,
}

impl Extension {
    pub fn from_filename(filename: &str) -> Result<Self, ParseError> {
        Self::from_path(Path::new(filename))
    }

    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        get_extension(extension)
    }

    pub fn format(&self) -> PointFormat {
        match self {
            Extension::Las => PointFormat::Las,
            Extension::Laz => PointFormat::Laz,
            Extension::Pts => PointFormat::Pts,
            Extension::Ptx => PointFormat::Ptx,
        }
    }
}

pub fn get_extension(extension: &str) -> Result<Extension, ParseError> {
    match extension.to_ascii_lowercase().as_str() {
        "las" => Ok(Extension::Las),
        "laz" => Ok(Extension::Laz),
        "pts" => Ok(Extension::Pts),
        "ptx" => Ok(Extension::Ptx),
        _ => Err(ParseError::UnsupportedFormat {
            extension: extension.to_string(),
        }),
    }
}

pub fn select_parser(
    filename: &str,
    options: &ParseOptions,
) -> Result<Box<dyn Parser>, ParseError> {
    let parser: Box<dyn Parser> = match Extension::from_filename(filename)? {
        Extension::Las => Box::new(las::LasParser {
            format: PointFormat::Las,
            color_depth: options.color_depth,
        }),
        Extension::Laz => Box::new(las::LasParser {
            format: PointFormat::Laz,
            color_depth: options.color_depth,
        }),
        Extension::Pts => Box::new(pts::PtsParser),
        Extension::Ptx => Box::new(ptx::PtxParser),
    };
    Ok(parser)
}

/// Upper bound on points reserved up front, whatever a header claims.
const MAX_RESERVED_POINTS: usize = 50_000_000;

/// Points worth reserving for a header that declares `declared` points.
///
/// Header counts are hints only: the reservation never exceeds what
/// `input_len` bytes can hold at `min_record_bytes` per point.
pub(crate) fn capacity_hint(declared: u64, input_len: usize, min_record_bytes: usize) -> usize {
    let declared = usize::try_from(declared).unwrap_or(usize::MAX);
    declared
        .min(input_len / min_record_bytes.max(1))
        .min(MAX_RESERVED_POINTS)
}

/// Picks the parser for `filename` and runs it.
///
/// An unsupported extension fails before any parser exists, so nothing is
/// reported through `reporter` in that case.
pub fn dispatch(
    filename: &str,
    bytes: Bytes,
    options: &ParseOptions,
    reporter: &mut ProgressReporter<'_>,
) -> Result<PointCloudData, ParseError> {
    let parser = select_parser(filename, options)?;
    log::debug!("parsing {} ({} bytes)", filename, bytes.len());
    parser.parse(bytes, reporter)
}
