// Media model: paths, input/output media, streams and chapters
// Input types mirror the probe's JSON document; output types are built by the planner

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Stream codec type as reported by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Video,
    Audio,
    Subtitle,
    Attachment,
    Data,
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecType::Video => "video",
            CodecType::Audio => "audio",
            CodecType::Subtitle => "subtitle",
            CodecType::Attachment => "attachment",
            CodecType::Data => "data",
        };
        write!(f, "{}", name)
    }
}

/// A file location kept relative to a base directory
///
/// The parent/filename/extension split lets the planner rewrite any of the
/// three parts independently; absolute paths only exist at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPath {
    /// Directory part, relative to the base directory
    pub parent: PathBuf,

    /// File stem, without extension
    pub filename: String,

    /// Extension, without the leading dot; may be empty
    pub extension: String,
}

impl MediaPath {
    pub fn new(parent: impl Into<PathBuf>, filename: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            filename: filename.into(),
            extension: extension.into(),
        }
    }

    /// Split a file under `base` into its relative parent, stem and extension
    pub fn from_file(base: &Path, file: &Path) -> Result<Self> {
        let relative = file.strip_prefix(base).map_err(|_| {
            CoreError::FileSystemError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' is not under '{}'", file.display(), base.display()),
            ))
        })?;

        let parent = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        let filename = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let extension = relative
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self { parent, filename, extension })
    }

    /// The `filename.extension` part, without the parent
    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.filename.clone()
        } else {
            format!("{}.{}", self.filename, self.extension)
        }
    }

    /// Path relative to the base directory
    pub fn relative(&self) -> PathBuf {
        self.parent.join(self.file_name())
    }

    /// Absolute path under the given base directory
    pub fn resolve(&self, base: &Path) -> PathBuf {
        base.join(self.relative())
    }

    /// Derive `parent/filename.<suffix>.<extension>` next to this path
    pub fn sibling(&self, suffix: &str, extension: &str) -> MediaPath {
        MediaPath {
            parent: self.parent.clone(),
            filename: format!("{}.{}", self.filename, suffix),
            extension: extension.to_string(),
        }
    }
}

/// A single stream of an input file, as reported by the probe
///
/// Fields the planner does not interpret (avg_frame_rate, bit_rate, …) are
/// kept in `extra` and stay visible to snippets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputStream {
    pub index: u32,

    #[serde(default)]
    pub codec_name: String,

    pub codec_type: CodecType,

    /// Disposition flags (`default`, `forced`, `hearing_impaired`, …) as 0/1
    #[serde(default)]
    pub disposition: Map<String, Value>,

    /// Stream tags (`language`, `title`, …)
    #[serde(default)]
    pub tags: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputStream {
    /// Rational average framerate of the stream, when the probe reported one
    pub fn avg_frame_rate(&self) -> Option<f64> {
        self.extra
            .get("avg_frame_rate")
            .and_then(Value::as_str)
            .and_then(crate::utils::parse_rational)
    }
}

/// A chapter of an input file
///
/// `number` is not part of the probe document; the planner injects it,
/// 1-based, after chapter normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default)]
    pub number: u32,

    /// Rational tick unit, e.g. `"1/1000000000"`
    pub time_base: String,

    pub start: i64,
    pub start_time: String,
    pub end: i64,
    pub end_time: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chapter {
    pub fn start_seconds(&self) -> Option<f64> {
        self.start_time.parse().ok()
    }

    pub fn end_seconds(&self) -> Option<f64> {
        self.end_time.parse().ok()
    }
}

/// An input file after probing
///
/// Immutable once built, except for `params` which the input parameter
/// resolver rewrites exactly once before planning.
#[derive(Debug, Clone, Serialize)]
pub struct InputMedia {
    /// 0 for the primary input
    pub id: u32,

    pub path: MediaPath,

    /// Input-side transcoder options, resolved from the profile
    pub params: Vec<String>,

    pub streams: Vec<InputStream>,

    /// Container metadata; `duration` is the field the planner relies on
    pub format: Map<String, Value>,

    pub chapters: Vec<Chapter>,
}

impl InputMedia {
    /// Container duration in seconds, when the probe reported one
    pub fn duration(&self) -> Option<f64> {
        match self.format.get("duration") {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// First video stream, used for framerate estimation
    pub fn first_video_stream(&self) -> Option<&InputStream> {
        self.streams.iter().find(|s| s.codec_type == CodecType::Video)
    }

    pub fn stream(&self, index: u32) -> Option<&InputStream> {
        self.streams.iter().find(|s| s.index == index)
    }
}

/// One planned output file
///
/// Created by the mapping builder with unresolved parameter templates;
/// the post resolver substitutes them in place. `source` is the id of the
/// InputMedia the output was derived from (a non-owning back-reference).
#[derive(Debug, Clone, Serialize)]
pub struct OutputMedia {
    /// Sequential id, contiguous from 0 across one plan
    pub id: u32,

    pub source: u32,

    pub path: MediaPath,

    /// Media-level command-line parameters
    pub params: Vec<String>,

    pub streams: Vec<OutputStream>,

    /// Set when the output was expanded from a chapter; narrows the
    /// post-resolution context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<Chapter>,
}

/// One stream of a planned output file
#[derive(Debug, Clone, Serialize)]
pub struct OutputStream {
    /// Sequential per-output index, contiguous from 0
    pub index: u32,

    /// Index of the source InputStream (non-owning back-reference)
    pub source: u32,

    pub params: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_path_from_file() {
        let path = MediaPath::from_file(
            Path::new("/library/in"),
            Path::new("/library/in/shows/s01/ep01.mkv"),
        )
        .unwrap();

        assert_eq!(path.parent, Path::new("shows/s01"));
        assert_eq!(path.filename, "ep01");
        assert_eq!(path.extension, "mkv");
        assert_eq!(path.relative(), Path::new("shows/s01/ep01.mkv"));
        assert_eq!(
            path.resolve(Path::new("/library/out")),
            Path::new("/library/out/shows/s01/ep01.mkv")
        );
    }

    #[test]
    fn test_path_outside_base_is_rejected() {
        assert!(MediaPath::from_file(Path::new("/library/in"), Path::new("/elsewhere/ep01.mkv")).is_err());
    }

    #[test]
    fn test_path_sibling() {
        let path = MediaPath::new("movies", "film", "mkv");
        let log = path.sibling("20240101-120000000", "log");
        assert_eq!(log.relative(), Path::new("movies/film.20240101-120000000.log"));
    }

    #[test]
    fn test_file_name_without_extension() {
        let path = MediaPath::new("", "cover", "");
        assert_eq!(path.file_name(), "cover");
    }

    #[test]
    fn test_duration_from_string_or_number() {
        let mut format = Map::new();
        format.insert("duration".into(), Value::String("1253.440000".into()));
        let media = InputMedia {
            id: 0,
            path: MediaPath::new("", "film", "mkv"),
            params: vec![],
            streams: vec![],
            format,
            chapters: vec![],
        };
        assert_eq!(media.duration(), Some(1253.44));

        let mut format = Map::new();
        format.insert("duration".into(), serde_json::json!(90.5));
        let media = InputMedia { format, ..media };
        assert_eq!(media.duration(), Some(90.5));
    }

    #[test]
    fn test_stream_avg_frame_rate() {
        let stream: InputStream = serde_json::from_value(serde_json::json!({
            "index": 0,
            "codec_name": "h264",
            "codec_type": "video",
            "avg_frame_rate": "30000/1001"
        }))
        .unwrap();
        let rate = stream.avg_frame_rate().unwrap();
        assert!((rate - 29.97).abs() < 0.01);
    }
}
