/// External collaborators: URL resolution (yt-dlp) and transcoding (ffmpeg).
///
/// Both tools run as child processes. Their stderr is forwarded to tracing
/// line by line, and the tail of it is kept for error reports.
use std::collections::VecDeque;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use hermes_shared::ToolError;

use crate::naming::{sanitize_title, title_from_url};

/// Stderr lines kept for error messages.
const STDERR_TAIL: usize = 8;

/// A direct, range-capable locator plus a display title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub url: String,
    pub title: String,
}

/// Turns a user-supplied source reference into a direct locator.
pub trait Resolver: Send + Sync {
    fn resolve(&self, reference: &str) -> impl Future<Output = Result<Resolved, ToolError>> + Send;
}

/// Converts the merged artifact into the final deliverable.
pub trait Transcoder: Send + Sync {
    /// Extension of the deliverable, or `None` when the artifact is delivered as is.
    fn target_extension(&self) -> Option<&str>;

    fn transcode(
        &self,
        input: &Path,
        output: &Path,
    ) -> impl Future<Output = Result<(), ToolError>> + Send;
}

/// Extra directories searched for external tools.
///
/// `configured` (from `FFMPEG_PATH`) comes first, then common install
/// locations that actually contain `binary`.
pub fn discover_extra_paths(configured: Option<&Path>, binary: &str) -> Vec<PathBuf> {
    let mut extra = Vec::new();

    if let Some(dir) = configured {
        extra.push(dir.to_path_buf());
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[r"C:\ffmpeg\bin", r"C:\Program Files\ffmpeg\bin"]
    } else {
        &[
            "/usr/local/bin",
            "/usr/bin",
            "/snap/bin",
            "/opt/homebrew/bin",
            "/home/linuxbrew/.linuxbrew/bin",
        ]
    };
    let file_name = if cfg!(target_os = "windows") {
        format!("{}.exe", binary)
    } else {
        binary.to_string()
    };

    for dir in candidates {
        let dir = PathBuf::from(dir);
        if dir.join(&file_name).exists() && !extra.contains(&dir) {
            extra.push(dir);
        }
    }

    extra
}

/// Runs an external binary with an augmented `PATH`.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    binary: String,
    extra_paths: Vec<PathBuf>,
}

impl ToolRunner {
    pub fn new(binary: impl Into<String>, extra_paths: Vec<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_paths,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn augmented_path(&self) -> Option<OsString> {
        if self.extra_paths.is_empty() {
            return None;
        }
        let current = std::env::var_os("PATH").unwrap_or_default();
        let mut paths: Vec<PathBuf> = std::env::split_paths(&current).collect();
        paths.extend(self.extra_paths.iter().cloned());
        std::env::join_paths(paths).ok()
    }

    /// Run to completion and return trimmed stdout.
    pub async fn run<I, A>(&self, args: I) -> Result<String, ToolError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = self.augmented_path() {
            command.env("PATH", path);
        }

        let mut child = command.spawn().map_err(|e| ToolError::SpawnFailed {
            tool: self.binary.clone(),
            message: e.to_string(),
        })?;
        debug!("Spawned {} (pid: {:?})", self.binary, child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tool = self.binary.clone();

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "external_tool", "[{}] {}", tool, line);
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut output = String::new();
        if let Some(mut stdout) = stdout {
            stdout
                .read_to_string(&mut output)
                .await
                .map_err(|e| ToolError::SpawnFailed {
                    tool: self.binary.clone(),
                    message: format!("reading stdout: {}", e),
                })?;
        }

        let status = child.wait().await.map_err(|e| ToolError::SpawnFailed {
            tool: self.binary.clone(),
            message: e.to_string(),
        })?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(ToolError::Exited {
                tool: self.binary.clone(),
                code: status.code(),
                stderr: stderr_tail,
            });
        }

        Ok(output.trim().to_string())
    }
}

/// Resolves video pages to a direct audio stream with yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    runner: ToolRunner,
    format: String,
}

impl YtDlpResolver {
    pub fn new(runner: ToolRunner, format: impl Into<String>) -> Self {
        Self {
            runner,
            format: format.into(),
        }
    }

    fn first_line(&self, output: &str) -> Result<String, ToolError> {
        output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ToolError::EmptyOutput {
                tool: self.runner.binary().to_string(),
            })
    }
}

impl Resolver for YtDlpResolver {
    async fn resolve(&self, reference: &str) -> Result<Resolved, ToolError> {
        info!("Resolving {} with {}", reference, self.runner.binary());
        let url_output = self
            .runner
            .run(["-f", self.format.as_str(), "--get-url", reference])
            .await?;
        let url = self.first_line(&url_output)?;

        let title_output = self.runner.run(["--get-title", reference]).await?;
        let title = self.first_line(&title_output)?;

        Ok(Resolved {
            url,
            title: sanitize_title(&title),
        })
    }
}

/// Treats the reference itself as the direct locator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

impl Resolver for DirectResolver {
    async fn resolve(&self, reference: &str) -> Result<Resolved, ToolError> {
        let invalid = |reason: &str| ToolError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };
        let url = reqwest::Url::parse(reference).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("only http and https URLs can be fetched directly"));
        }

        Ok(Resolved {
            title: sanitize_title(&title_from_url(&url)),
            url: url.to_string(),
        })
    }
}

/// Transcodes with ffmpeg, dropping any video stream.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    runner: ToolRunner,
    extension: String,
}

impl FfmpegTranscoder {
    pub fn new(runner: ToolRunner, extension: impl Into<String>) -> Self {
        Self {
            runner,
            extension: extension.into(),
        }
    }

    /// ffmpeg arguments. MP3 targets get LAME at VBR quality 2; any other
    /// container lets ffmpeg pick its default audio codec.
    fn arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-vn".into(),
        ];
        if self.extension.eq_ignore_ascii_case("mp3") {
            args.extend(["-c:a", "libmp3lame", "-q:a", "2"].map(OsString::from));
        }
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn target_extension(&self) -> Option<&str> {
        Some(&self.extension)
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        info!("Transcoding {} -> {}", input.display(), output.display());
        self.runner.run(self.arguments(input, output)).await.map(|_| ())
    }
}

/// Delivers the merged artifact unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTranscoder;

impl Transcoder for NoopTranscoder {
    fn target_extension(&self) -> Option<&str> {
        None
    }

    async fn transcode(&self, _input: &Path, _output: &Path) -> Result<(), ToolError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_resolver_uses_last_path_segment() {
        let resolved = DirectResolver
            .resolve("https://cdn.example.com/media/My%20Song.webm?sig=abc")
            .await
            .unwrap();
        assert_eq!(resolved.title, "My Song");
        assert!(resolved.url.starts_with("https://cdn.example.com/media/"));
    }

    #[tokio::test]
    async fn test_direct_resolver_rejects_non_http() {
        let err = DirectResolver.resolve("ftp://example.com/a.webm").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidReference { .. }));

        let err = DirectResolver.resolve("not a url").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let runner = ToolRunner::new("hermes-definitely-missing-tool", Vec::new());
        let err = runner.run(["--version"]).await.unwrap_err();
        assert!(matches!(err, ToolError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_captures_stdout() {
        let runner = ToolRunner::new("sh", Vec::new());
        let out = runner.run(["-c", "echo '  hello  '"]).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reports_exit_code_and_stderr() {
        let runner = ToolRunner::new("sh", Vec::new());
        let err = runner
            .run(["-c", "echo 'ERROR: Video unavailable' >&2; exit 3"])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Exited {
                tool: "sh".into(),
                code: Some(3),
                stderr: "ERROR: Video unavailable".into(),
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ytdlp_resolver_with_stub_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("yt-dlp");
        std::fs::write(
            &script,
            r#"#!/bin/sh
for a in "$@"; do
  case "$a" in
    --get-url) printf '%s\n' 'https://media.example.com/audio.webm'; exit 0;;
    --get-title) printf '%s\n' 'AC/DC - Back\In Black'; exit 0;;
  esac
done
exit 2
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let resolver = YtDlpResolver::new(
            ToolRunner::new(script.to_string_lossy(), Vec::new()),
            "bestaudio",
        );
        let resolved = resolver.resolve("https://youtu.be/abc12345678").await.unwrap();
        assert_eq!(resolved.url, "https://media.example.com/audio.webm");
        assert_eq!(resolved.title, "AC-DC - Back-In Black");
    }

    /// Fake ffmpeg that writes its argument list into the output file.
    #[cfg(unix)]
    fn recording_ffmpeg(dir: &Path) -> ToolRunner {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\nfor a in \"$@\"; do last=\"$a\"; done\nprintf '%s\\n' \"$@\" > \"$last\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        ToolRunner::new(script.to_string_lossy(), Vec::new())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_mp3_uses_lame() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("song.webm");
        let output = dir.path().join("song.mp3");
        let transcoder = FfmpegTranscoder::new(recording_ffmpeg(dir.path()), "mp3");

        transcoder.transcode(&input, &output).await.unwrap();

        let recorded = std::fs::read_to_string(&output).unwrap();
        let args: Vec<&str> = recorded.lines().collect();
        let (input, output) = (input.to_string_lossy(), output.to_string_lossy());
        assert_eq!(
            args,
            vec!["-y", "-i", &*input, "-vn", "-c:a", "libmp3lame", "-q:a", "2", &*output]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_other_container_keeps_default_codec() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("song.webm");
        let output = dir.path().join("song.ogg");
        let transcoder = FfmpegTranscoder::new(recording_ffmpeg(dir.path()), "ogg");

        transcoder.transcode(&input, &output).await.unwrap();

        let recorded = std::fs::read_to_string(&output).unwrap();
        let args: Vec<&str> = recorded.lines().collect();
        let (input, output) = (input.to_string_lossy(), output.to_string_lossy());
        assert_eq!(args, vec!["-y", "-i", &*input, "-vn", &*output]);
        assert!(!recorded.contains("libmp3lame"));
    }

    #[test]
    fn test_discover_extra_paths_keeps_configured_first() {
        let configured = PathBuf::from("/opt/ffmpeg/bin");
        let paths = discover_extra_paths(Some(&configured), "hermes-definitely-missing-tool");
        assert_eq!(paths, vec![configured]);
    }

    #[test]
    fn test_noop_transcoder_has_no_target() {
        assert_eq!(NoopTranscoder.target_extension(), None);
    }
}
