/// Downloader configuration, read from the environment (after `.env`).
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use hermes_shared::ConfigError;

use crate::coordinator::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloaderConfig {
    /// Number of ranges a resource is split into.
    pub workers: usize,
    /// Concurrent range requests; `None` means one per range.
    pub max_connections: Option<usize>,
    pub segment_retries: u32,
    pub retry_backoff: Duration,
    /// Deadline around the fetch stage.
    pub run_timeout: Option<Duration>,
    pub output_dir: PathBuf,
    pub temp_root: PathBuf,
    /// Keep slots of a failed fetch run on disk.
    pub keep_temp: bool,
    pub ytdlp_bin: String,
    pub ytdlp_format: String,
    pub ffmpeg_bin: String,
    pub ffmpeg_path: Option<PathBuf>,
    pub output_ext: String,
    /// Keep the merged artifact after a successful transcode.
    pub keep_source: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_connections: None,
            segment_retries: 0,
            retry_backoff: Duration::from_millis(500),
            run_timeout: None,
            output_dir: PathBuf::from("./downloads"),
            temp_root: std::env::temp_dir(),
            keep_temp: false,
            ytdlp_bin: "yt-dlp".to_string(),
            ytdlp_format: "bestaudio".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffmpeg_path: None,
            output_ext: "mp3".to_string(),
            keep_source: false,
        }
    }
}

impl DownloaderConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset or blank keys take their default; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let workers = parse_or(&get, "HERMES_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::TooSmall {
                key: "HERMES_WORKERS".into(),
                min: 1,
            });
        }

        let max_connections = parse_opt::<usize>(&get, "HERMES_MAX_CONNECTIONS")?;
        if max_connections == Some(0) {
            return Err(ConfigError::TooSmall {
                key: "HERMES_MAX_CONNECTIONS".into(),
                min: 1,
            });
        }

        let run_timeout = match parse_opt::<u64>(&get, "HERMES_RUN_TIMEOUT_SECS")? {
            Some(0) => {
                return Err(ConfigError::TooSmall {
                    key: "HERMES_RUN_TIMEOUT_SECS".into(),
                    min: 1,
                })
            }
            other => other.map(Duration::from_secs),
        };

        Ok(Self {
            workers,
            max_connections,
            segment_retries: parse_or(&get, "HERMES_SEGMENT_RETRIES", defaults.segment_retries)?,
            retry_backoff: Duration::from_millis(parse_or(&get, "HERMES_RETRY_BACKOFF_MS", 500u64)?),
            run_timeout,
            output_dir: get("DOWNLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            temp_root: get("HERMES_TEMP_DIR").map(PathBuf::from).unwrap_or(defaults.temp_root),
            keep_temp: parse_flag(&get, "HERMES_KEEP_TEMP", defaults.keep_temp)?,
            ytdlp_bin: get("YTDLP_BIN").unwrap_or(defaults.ytdlp_bin),
            ytdlp_format: get("YTDLP_FORMAT").unwrap_or(defaults.ytdlp_format),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffmpeg_path: get("FFMPEG_PATH").map(PathBuf::from),
            output_ext: get("HERMES_OUTPUT_EXT")
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .unwrap_or(defaults.output_ext),
            keep_source: parse_flag(&get, "HERMES_KEEP_SOURCE", defaults.keep_source)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.segment_retries,
            backoff: self.retry_backoff,
        }
    }
}

fn parse_opt<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    match get(key) {
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        None => Ok(None),
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        },
    }
}
