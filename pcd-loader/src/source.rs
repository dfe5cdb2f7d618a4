use std::{fmt, path::PathBuf};

use bytes::Bytes;

/// Where a point cloud comes from.
#[derive(Debug, Clone)]
pub enum LoadSource {
    File(PathBuf),
    /// Contents already in memory, e.g. from a file picker.
    Bytes { filename: String, bytes: Bytes },
    Url {
        url: String,
        filename: Option<String>,
    },
    YandexDisk {
        share_url: String,
        filename: Option<String>,
    },
    GoogleDrive {
        share_url: String,
        filename: Option<String>,
    },
}

impl LoadSource {
    /// Classifies user input: http(s) URLs by host, anything else is a path.
    pub fn detect(input: &str) -> Self {
        let input = input.trim();
        let lower = input.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return LoadSource::File(PathBuf::from(input));
        }

        let host = lower
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(lower.as_str())
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        let host = host.rsplit('@').next().unwrap_or(host);
        let host = host.split(':').next().unwrap_or(host);

        let share_url = input.to_string();
        if host == "yadi.sk" || host.starts_with("disk.yandex.") {
            LoadSource::YandexDisk {
                share_url,
                filename: None,
            }
        } else if host == "drive.google.com" || host == "docs.google.com" {
            LoadSource::GoogleDrive {
                share_url,
                filename: None,
            }
        } else {
            LoadSource::Url {
                url: share_url,
                filename: None,
            }
        }
    }

    /// Overrides the file name used for format detection.
    pub fn with_filename(self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self {
            LoadSource::File(path) => LoadSource::File(path),
            LoadSource::Bytes { bytes, .. } => LoadSource::Bytes {
                filename: name,
                bytes,
            },
            LoadSource::Url { url, .. } => LoadSource::Url {
                url,
                filename: Some(name),
            },
            LoadSource::YandexDisk { share_url, .. } => LoadSource::YandexDisk {
                share_url,
                filename: Some(name),
            },
            LoadSource::GoogleDrive { share_url, .. } => LoadSource::GoogleDrive {
                share_url,
                filename: Some(name),
            },
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, LoadSource::File(_) | LoadSource::Bytes { .. })
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::File(path) => write!(f, "{}", path.display()),
            LoadSource::Bytes { filename, bytes } => {
                write!(f, "{} ({} bytes in memory)", filename, bytes.len())
            }
            LoadSource::Url { url, .. } => write!(f, "{}", url),
            LoadSource::YandexDisk { share_url, .. } => write!(f, "Yandex Disk {}", share_url),
            LoadSource::GoogleDrive { share_url, .. } => write!(f, "Google Drive {}", share_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_source_kind() {
        assert!(matches!(
            LoadSource::detect("data/scan.las"),
            LoadSource::File(path) if path == PathBuf::from("data/scan.las")
        ));
        assert!(matches!(
            LoadSource::detect("https://disk.yandex.ru/d/AbCdEf"),
            LoadSource::YandexDisk { .. }
        ));
        assert!(matches!(
            LoadSource::detect("https://yadi.sk/d/AbCdEf"),
            LoadSource::YandexDisk { .. }
        ));
        assert!(matches!(
            LoadSource::detect("https://drive.google.com/file/d/xyz/view"),
            LoadSource::GoogleDrive { .. }
        ));
        assert!(matches!(
            LoadSource::detect("HTTP://Example.com/cloud.pts"),
            LoadSource::Url { url, .. } if url == "HTTP://Example.com/cloud.pts"
        ));
        // host match only, not path
        assert!(matches!(
            LoadSource::detect("https://example.com/drive.google.com/x.las"),
            LoadSource::Url { .. }
        ));
    }

    #[test]
    fn filename_override() {
        let source = LoadSource::detect("https://example.com/download?id=7").with_filename("room.ptx");
        assert!(matches!(
            source,
            LoadSource::Url { filename: Some(ref name), .. } if name == "room.ptx"
        ));
        assert!(source.is_remote());

        let local = LoadSource::detect("a.pts").with_filename("b.pts");
        assert!(matches!(local, LoadSource::File(ref path) if path == &PathBuf::from("a.pts")));
        assert!(!local.is_remote());
    }
}
