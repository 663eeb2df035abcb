// Watcher filter chain: decides which stabilized files get scheduled
// Asynchronous, short-circuiting on the first rejection

use async_trait::async_trait;
use log::warn;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::constants::state::EXCLUDE_LIST_FILE;
use crate::error::{CoreError, Result};
use crate::probe::probe;

/// One link of the filter chain
#[async_trait]
pub trait PathFilter: Send + Sync {
    /// `None` passes the file on; `Some(reason)` rejects it
    async fn check(&self, file: &Path) -> Result<Option<String>>;
}

/// Rejects inputs already recorded in the output directory's exclude list
///
/// The list is re-read on every check so concurrent appends are observed.
/// A missing list passes everything.
pub struct ExcludeListFilter {
    exclude_list: PathBuf,
    input_root: PathBuf,
}

impl ExcludeListFilter {
    pub fn new(input_root: &Path, output_root: &Path) -> Self {
        Self {
            exclude_list: output_root.join(EXCLUDE_LIST_FILE),
            input_root: input_root.to_path_buf(),
        }
    }
}

#[async_trait]
impl PathFilter for ExcludeListFilter {
    async fn check(&self, file: &Path) -> Result<Option<String>> {
        let relative = file.strip_prefix(&self.input_root).unwrap_or(file);

        let contents = match tokio::fs::read_to_string(&self.exclude_list).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoreError::FileSystemError(e)),
        };

        if contents.lines().any(|line| Path::new(line.trim()) == relative) {
            Ok(Some("already processed".to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Filters on the dot-stripped file extension
///
/// With both regexes set, a file passes when `include` matches **or**
/// `exclude` does not match (inclusive union).
pub struct ExtensionFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl ExtensionFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        let compile = |pattern: Option<&str>| -> Result<Option<Regex>> {
            pattern
                .map(|p| {
                    Regex::new(p)
                        .map_err(|e| CoreError::InvalidProfile(format!("bad extension regex: {}", e)))
                })
                .transpose()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    fn allows(&self, extension: &str) -> bool {
        match (&self.include, &self.exclude) {
            (Some(include), Some(exclude)) => {
                include.is_match(extension) || !exclude.is_match(extension)
            }
            (Some(include), None) => include.is_match(extension),
            (None, Some(exclude)) => !exclude.is_match(extension),
            (None, None) => true,
        }
    }
}

#[async_trait]
impl PathFilter for ExtensionFilter {
    async fn check(&self, file: &Path) -> Result<Option<String>> {
        let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("");
        if self.allows(extension) {
            Ok(None)
        } else {
            Ok(Some(format!("extension '{}' not allowed", extension)))
        }
    }
}

/// Accepts only files the probe recognizes as media with a finite duration
pub struct ProbeFilter;

#[async_trait]
impl PathFilter for ProbeFilter {
    async fn check(&self, file: &Path) -> Result<Option<String>> {
        match probe(file, &["-show_chapters"]).await {
            Ok(data) => {
                if data.duration().map(f64::is_finite).unwrap_or(false) {
                    Ok(None)
                } else {
                    Ok(Some("no duration: not a media".to_string()))
                }
            }
            Err(e) => {
                warn!("probe rejected '{}': {}", file.display(), e);
                Ok(Some(format!("probe failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exclude_list_rejects_listed_file() {
        let dir = TempDir::new().unwrap();
        let input_root = dir.path().join("in");
        let output_root = dir.path().join("out");
        std::fs::create_dir_all(&output_root).unwrap();
        std::fs::write(output_root.join(EXCLUDE_LIST_FILE), "subdir/film.mp4\n").unwrap();

        let filter = ExcludeListFilter::new(&input_root, &output_root);

        let listed = input_root.join("subdir/film.mp4");
        assert!(filter.check(&listed).await.unwrap().is_some());

        let other = input_root.join("subdir/other.mp4");
        assert!(filter.check(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_exclude_list_passes() {
        let dir = TempDir::new().unwrap();
        let filter = ExcludeListFilter::new(dir.path(), &dir.path().join("absent"));
        assert!(filter.check(&dir.path().join("film.mp4")).await.unwrap().is_none());
    }

    #[test]
    fn test_extension_include_only() {
        let filter = ExtensionFilter::new(Some("mkv|mp4"), None).unwrap();
        assert!(filter.allows("mkv"));
        assert!(filter.allows("mp4"));
        assert!(!filter.allows("srt"));
    }

    #[test]
    fn test_extension_exclude_only() {
        let filter = ExtensionFilter::new(None, Some("tmp|part")).unwrap();
        assert!(filter.allows("mkv"));
        assert!(!filter.allows("tmp"));
    }

    #[test]
    fn test_extension_both_is_inclusive_union() {
        // pass when include matches OR exclude does not match
        let filter = ExtensionFilter::new(Some("mkv"), Some("mkv|tmp")).unwrap();
        assert!(filter.allows("mkv")); // include matches
        assert!(filter.allows("mp4")); // exclude does not match
        assert!(!filter.allows("tmp")); // include misses and exclude matches
    }

    #[tokio::test]
    async fn test_extension_check_reports_reason() {
        let filter = ExtensionFilter::new(Some("mkv"), None).unwrap();
        let reason = filter.check(Path::new("/in/film.srt")).await.unwrap();
        assert_eq!(reason.as_deref(), Some("extension 'srt' not allowed"));
    }

    #[test]
    fn test_bad_pattern_is_invalid_profile() {
        assert!(matches!(
            ExtensionFilter::new(Some("("), None),
            Err(CoreError::InvalidProfile(_))
        ));
    }
}
