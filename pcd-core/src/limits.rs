use serde::{Deserialize, Serialize};

pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub const WARN_FILE_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSizeLimits {
    pub max_file_size: u64,
    pub warn_file_size: u64,
}

impl Default for FileSizeLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            warn_file_size: WARN_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSizeCheck {
    pub ok: bool,
    pub warning: bool,
    pub message: Option<String>,
}

impl FileSizeLimits {
    /// Hard failure strictly above `max_file_size`, warning strictly above
    /// `warn_file_size`.
    pub fn check(&self, bytes: u64) -> FileSizeCheck {
        if bytes > self.max_file_size {
            return FileSizeCheck {
                ok: false,
                warning: false,
                message: Some(format!(
                    "File is too large ({}). The maximum supported size is {}.",
                    format_size(bytes),
                    format_size(self.max_file_size)
                )),
            };
        }

        if bytes > self.warn_file_size {
            return FileSizeCheck {
                ok: true,
                warning: true,
                message: Some(format!(
                    "Large file ({}). Loading may take a while and use a lot of memory.",
                    format_size(bytes)
                )),
            };
        }

        FileSizeCheck {
            ok: true,
            warning: false,
            message: None,
        }
    }
}

pub fn check_file_size(bytes: u64) -> FileSizeCheck {
    FileSizeLimits::default().check(bytes)
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
