//! HTTP download and cloud share link resolution.

use std::{
    io::{ErrorKind, Read},
    sync::OnceLock,
    time::Duration,
};

use bytes::Bytes;
use regex_lite::Regex;
use serde::Deserialize;

use pcd_core::{
    limits::FileSizeLimits,
    pointcloud::progress::{LoadingProgress, LoadingStage},
};

use crate::error::LoadError;

pub const YANDEX_DOWNLOAD_API: &str =
    "https://cloud-api.yandex.net/v1/disk/public/resources/download";
pub const GOOGLE_DRIVE_DOWNLOAD: &str = "https://drive.google.com/uc?export=download&id=";

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_STEP: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub url: String,
    pub bytes: Bytes,
    /// Name announced by the server in `Content-Disposition`.
    pub filename: Option<String>,
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Downloads `url` into memory, streaming `Downloading` progress.
///
/// The size limit is checked against `Content-Length` before the body is
/// read and again while reading, since servers may omit or understate it.
pub fn fetch_url(
    url: &str,
    limits: &FileSizeLimits,
    timeout: Duration,
    on_progress: &mut dyn FnMut(LoadingProgress),
) -> Result<RemoteFile, LoadError> {
    log::info!("downloading {}", url);
    let response = match agent(timeout).get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            return Err(LoadError::RemoteFetchFailure(format!(
                "{} returned HTTP {} {}",
                url,
                code,
                response.status_text()
            )));
        }
        Err(e) => return Err(LoadError::RemoteFetchFailure(format!("{}: {}", url, e))),
    };

    let declared = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    if let Some(size) = declared {
        if size > limits.max_file_size {
            return Err(LoadError::OversizeFile {
                size,
                limit: limits.max_file_size,
            });
        }
    }
    let filename = response
        .header("Content-Disposition")
        .and_then(filename_from_content_disposition);
    let total = declared.unwrap_or(0);

    let capacity = declared.unwrap_or(0).min(limits.max_file_size) as usize;
    let mut body = Vec::with_capacity(capacity);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut reader = response.into_reader();
    let mut last_report = 0;
    on_progress(LoadingProgress::new(LoadingStage::Downloading, 0, total));

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(LoadError::RemoteFetchFailure(format!("{}: {}", url, e))),
        };
        body.extend_from_slice(&chunk[..n]);

        if body.len() as u64 > limits.max_file_size {
            return Err(LoadError::OversizeFile {
                size: body.len() as u64,
                limit: limits.max_file_size,
            });
        }
        if body.len() - last_report >= PROGRESS_STEP {
            last_report = body.len();
            on_progress(LoadingProgress::new(
                LoadingStage::Downloading,
                body.len() as u64,
                total,
            ));
        }
    }

    let loaded = body.len() as u64;
    on_progress(LoadingProgress::new(
        LoadingStage::Downloading,
        loaded,
        total.max(loaded),
    ));
    log::debug!("downloaded {} bytes from {}", loaded, url);

    Ok(RemoteFile {
        url: url.to_string(),
        bytes: Bytes::from(body),
        filename,
    })
}

#[derive(Debug, Deserialize)]
struct YandexDownloadLink {
    href: Option<String>,
}

/// Asks the Yandex Disk public API for a direct download link.
pub fn resolve_yandex_disk(share_url: &str, timeout: Duration) -> Result<String, LoadError> {
    let response = match agent(timeout)
        .get(YANDEX_DOWNLOAD_API)
        .query("public_key", share_url)
        .call()
    {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            return Err(LoadError::ShareLinkResolutionFailure(format!(
                "Yandex Disk API returned HTTP {}: {}",
                code,
                body.trim()
            )));
        }
        Err(e) => return Err(LoadError::ShareLinkResolutionFailure(e.to_string())),
    };

    let body = response
        .into_string()
        .map_err(|e| LoadError::ShareLinkResolutionFailure(e.to_string()))?;
    let href = yandex_href(&body)?;
    log::debug!("resolved Yandex Disk link {} to {}", share_url, href);
    Ok(href)
}

/// Extracts `href` from a Yandex Disk download API response body.
pub fn yandex_href(body: &str) -> Result<String, LoadError> {
    let link: YandexDownloadLink = serde_json::from_str(body)
        .map_err(|e| LoadError::ShareLinkResolutionFailure(format!("unexpected response: {}", e)))?;
    match link.href {
        Some(href) if !href.is_empty() => Ok(href),
        _ => Err(LoadError::ShareLinkResolutionFailure(
            "response does not contain a download link".into(),
        )),
    }
}

fn drive_id_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"/d/([A-Za-z0-9_-]+)").expect("valid file path pattern"),
            Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("valid id query pattern"),
        ]
    })
}

/// Rewrites a Google Drive share link into its direct download form.
pub fn google_drive_download_url(share_url: &str) -> Result<String, LoadError> {
    let id = drive_id_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(share_url))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| LoadError::InvalidShareUrl(share_url.to_string()))?;
    Ok(format!("{}{}", GOOGLE_DRIVE_DOWNLOAD, id))
}

/// Pulls the file name out of a `Content-Disposition` header value.
///
/// Plain `filename=` wins over the RFC 5987 `filename*=` form; only the
/// latter's UTF-8 prefix is stripped, percent escapes are kept.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut extended = None;
    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" if !value.is_empty() => return Some(value.to_string()),
            "filename*" => {
                let value = value.rsplit_once("''").map_or(value, |(_, name)| name);
                if !value.is_empty() {
                    extended = Some(value.to_string());
                }
            }
            _ => {}
        }
    }
    extended
}

/// Derives a file name from a URL: the `filename` query parameter if
/// present, otherwise the last path segment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };

    if let Some(query) = query {
        let from_query = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "filename")
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty());
        if let Some(name) = from_query {
            return Some(name.to_string());
        }
    }

    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let (_, path) = path.split_once('/')?;
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_drive_links() {
        let expected = "https://drive.google.com/uc?export=download&id=1AbC-d_E";
        assert_eq!(
            google_drive_download_url("https://drive.google.com/file/d/1AbC-d_E/view?usp=sharing")
                .unwrap(),
            expected
        );
        assert_eq!(
            google_drive_download_url("https://drive.google.com/open?id=1AbC-d_E").unwrap(),
            expected
        );
        assert_eq!(
            google_drive_download_url("https://drive.google.com/uc?export=download&id=1AbC-d_E")
                .unwrap(),
            expected
        );
        assert!(matches!(
            google_drive_download_url("https://drive.google.com/drive/my-drive"),
            Err(LoadError::InvalidShareUrl(_))
        ));
    }

    #[test]
    fn yandex_response() {
        let body = r#"{"href":"https://downloader.disk.yandex.ru/disk/abc?filename=scan.las","method":"GET","templated":false}"#;
        assert_eq!(
            yandex_href(body).unwrap(),
            "https://downloader.disk.yandex.ru/disk/abc?filename=scan.las"
        );

        assert!(matches!(
            yandex_href(r#"{"error":"DiskNotFoundError","description":"Resource not found."}"#),
            Err(LoadError::ShareLinkResolutionFailure(_))
        ));
        assert!(matches!(
            yandex_href(r#"{"href":""}"#),
            Err(LoadError::ShareLinkResolutionFailure(_))
        ));
        assert!(matches!(
            yandex_href("<html>"),
            Err(LoadError::ShareLinkResolutionFailure(_))
        ));
    }

    #[test]
    fn content_disposition() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="scan.las""#).as_deref(),
            Some("scan.las")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename*=UTF-8''room.ptx").as_deref(),
            Some("room.ptx")
        );
        assert_eq!(
            filename_from_content_disposition(
                r#"attachment; filename*=UTF-8''a.pts; filename="b.pts""#
            )
            .as_deref(),
            Some("b.pts")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    #[test]
    fn url_filenames() {
        assert_eq!(
            filename_from_url("https://example.com/data/scan.laz").as_deref(),
            Some("scan.laz")
        );
        assert_eq!(
            filename_from_url("https://example.com/data/scan.laz?token=1#top").as_deref(),
            Some("scan.laz")
        );
        assert_eq!(
            filename_from_url("https://downloader.disk.yandex.ru/disk/abc?filename=scan.las&x=1")
                .as_deref(),
            Some("scan.las")
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
        assert_eq!(filename_from_url("https://example.com"), None);
    }
}
