pub mod error;
pub mod parsers;
pub mod progress;

pub use error::ParseError;
pub use parsers::{dispatch, get_extension, select_parser, Extension, ParseOptions, Parser};
pub use progress::{CancellationToken, ProgressReporter, PROGRESS_INTERVAL};
