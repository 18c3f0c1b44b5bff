/// File naming for artifacts and deliverables.
use std::borrow::Cow;
use std::path::{Path, PathBuf};

const FALLBACK_TITLE: &str = "download";
const FALLBACK_EXTENSION: &str = "webm";

/// Make a display title safe to use as a file name.
///
/// Path separators become `-`, control characters are dropped and the result
/// is trimmed. An empty result falls back to `download`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' => '-',
            other => other,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();

    if trimmed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Title derived from the last path segment of a URL, without its extension.
pub fn title_from_url(url: &reqwest::Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let decoded = urlencoding::decode(last)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| last.to_string());
    match Path::new(&decoded).file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => String::new(),
    }
}

/// Container extension of the resource behind `url`, defaulting to `webm`.
pub fn source_extension(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Where the merged artifact is written.
///
/// When the deliverable would have the same name, the artifact gets a `.src`
/// infix so the transcoder never reads and writes one file.
pub fn artifact_path(dir: &Path, title: &str, source_ext: &str, target_ext: Option<&str>) -> PathBuf {
    match target_ext {
        Some(target) if target.eq_ignore_ascii_case(source_ext) => {
            dir.join(format!("{}.src.{}", title, source_ext))
        }
        _ => dir.join(format!("{}.{}", title, source_ext)),
    }
}

pub fn deliverable_path(dir: &Path, title: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", title, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("AC/DC - Back\\In Black"), "AC-DC - Back-In Black");
        assert_eq!(sanitize_title("  Line\nBreak\t "), "LineBreak");
        assert_eq!(sanitize_title("   "), "download");
        assert_eq!(sanitize_title(".."), "download");
    }

    #[test]
    fn test_title_from_url() {
        let url = reqwest::Url::parse("https://cdn.example.com/a/Song%20Name.m4a?x=1").unwrap();
        assert_eq!(title_from_url(&url), "Song Name");

        let url = reqwest::Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(title_from_url(&url), "");
    }

    #[test]
    fn test_title_from_url_keeps_undecodable_segment() {
        let url = reqwest::Url::parse("https://cdn.example.com/a/Caf%E9%20Mix.webm").unwrap();
        assert_eq!(title_from_url(&url), "Caf%E9%20Mix");

        let url = reqwest::Url::parse("https://cdn.example.com/a/Caf%C3%A9%20Mix.webm").unwrap();
        assert_eq!(title_from_url(&url), "Café Mix");
    }

    #[test]
    fn test_source_extension() {
        assert_eq!(source_extension("https://x.example/audio.M4A?sig=1"), "m4a");
        assert_eq!(source_extension("https://rr1.googlevideo.com/videoplayback?mime=audio%2Fwebm"), "webm");
        assert_eq!(source_extension("https://x.example/file.not-an-ext"), "webm");
    }

    #[test]
    fn test_artifact_path_avoids_clash() {
        let dir = Path::new("/music");
        assert_eq!(
            artifact_path(dir, "song", "webm", Some("mp3")),
            PathBuf::from("/music/song.webm")
        );
        assert_eq!(
            artifact_path(dir, "song", "mp3", Some("mp3")),
            PathBuf::from("/music/song.src.mp3")
        );
        assert_eq!(artifact_path(dir, "song", "mp3", None), PathBuf::from("/music/song.mp3"));
    }
}
