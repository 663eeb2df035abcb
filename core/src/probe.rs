// ffprobe integration for extracting media file metadata
// Runs the probe as a subprocess and parses its JSON output

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::constants::transcoder::FFPROBE;
use crate::error::{CoreError, Result};
use crate::media::{Chapter, InputStream};

/// Raw probe document: streams, container format and chapters
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<InputStream>,

    #[serde(default)]
    pub format: Map<String, Value>,

    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl ProbeData {
    /// Container duration in seconds, when the probe reported one
    pub fn duration(&self) -> Option<f64> {
        match self.format.get("duration") {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

/// Run ffprobe on a media file and parse the returned document
///
/// Always requests the format and stream sections; callers append extra
/// sections (e.g. `-show_chapters`) through `extra_args`.
///
/// # Errors
/// `CoreError::ProbeFailed` when the probe cannot be executed or exits
/// non-zero, `CoreError::ParseError` when its output is not valid JSON.
pub async fn probe(file: &Path, extra_args: &[&str]) -> Result<ProbeData> {
    let output = Command::new(FFPROBE)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .args(extra_args)
        .arg(file)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| CoreError::ProbeFailed(format!("failed to run {}: {}", FFPROBE, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::ProbeFailed(format!(
            "{} failed for '{}': {}",
            FFPROBE,
            file.display(),
            stderr.trim()
        )));
    }

    let json = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&json)
        .map_err(|e| CoreError::ParseError(format!("invalid probe JSON for '{}': {}", file.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_document() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_name": "h264", "codec_type": "video",
                 "avg_frame_rate": "24/1",
                 "disposition": {"default": 1, "forced": 0}},
                {"index": 1, "codec_name": "aac", "codec_type": "audio",
                 "tags": {"language": "eng"}}
            ],
            "format": {"format_name": "matroska,webm", "duration": "1253.440000"},
            "chapters": [
                {"id": 0, "time_base": "1/1000000000", "start": 0,
                 "start_time": "0.000000", "end": 600000000000, "end_time": "600.000000"}
            ]
        }"#;

        let data: ProbeData = serde_json::from_str(json).unwrap();
        assert_eq!(data.streams.len(), 2);
        assert_eq!(data.streams[0].codec_name, "h264");
        assert_eq!(data.streams[1].tags.get("language").and_then(Value::as_str), Some("eng"));
        assert_eq!(data.duration(), Some(1253.44));
        assert_eq!(data.chapters.len(), 1);
        assert_eq!(data.chapters[0].end_seconds(), Some(600.0));
    }

    #[test]
    fn test_missing_sections_default() {
        let data: ProbeData = serde_json::from_str("{}").unwrap();
        assert!(data.streams.is_empty());
        assert!(data.chapters.is_empty());
        assert_eq!(data.duration(), None);
    }
}
