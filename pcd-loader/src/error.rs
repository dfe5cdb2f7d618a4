use pcd_parser::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("File is too large: {size} bytes exceeds the limit of {limit} bytes")]
    OversizeFile { size: u64, limit: u64 },
    #[error("Failed to download file: {0}")]
    RemoteFetchFailure(String),
    #[error("Failed to resolve share link: {0}")]
    ShareLinkResolutionFailure(String),
    #[error("Invalid share URL: {0}")]
    InvalidShareUrl(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse worker stopped without answering the request")]
    WorkerUnavailable,
    #[error("Invalid configuration: {0}")]
    Config(String),
}
