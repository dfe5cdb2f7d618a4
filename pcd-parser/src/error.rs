use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unsupported file format '.{extension}'. Supported formats: .las, .laz, .pts, .ptx")]
    UnsupportedFormat { extension: String },
    #[error("Malformed file: {0}")]
    MalformedFile(String),
    #[error("Unsupported LAS/LAZ version {version}. {remediation}")]
    UnsupportedFormatVersion {
        version: String,
        remediation: String,
    },
    #[error("Parsing was cancelled")]
    Cancelled,
}

impl ParseError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ParseError::MalformedFile(message.into())
    }
}
