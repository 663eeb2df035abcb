// Profile model: the declarative transformation document
// Loaded once at startup, validated, then shared read-only

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::media::CodecType;

/// A snippet string, or a sequence of them
///
/// Sequences are joined with a single space before resolution; predicates
/// AND-compose their elements instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Snippets {
    One(String),
    Many(Vec<String>),
}

impl Snippets {
    pub fn items(&self) -> &[String] {
        match self {
            Snippets::One(s) => std::slice::from_ref(s),
            Snippets::Many(v) => v.as_slice(),
        }
    }
}

/// Value of a task's `on` field: which part of the input the rule applies to
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StreamSelector {
    /// The whole input
    #[default]
    None,
    /// One output per chapter
    Chapters,
    /// Every stream
    All,
    /// Streams of one codec type
    Codec(CodecType),
    /// Streams of any of the listed codec types
    Codecs(Vec<CodecType>),
}

impl StreamSelector {
    pub fn is_none(&self) -> bool {
        *self == StreamSelector::None
    }

    pub fn is_chapters(&self) -> bool {
        *self == StreamSelector::Chapters
    }

    /// Whether a stream of the given codec type is selected
    ///
    /// `None` and `Chapters` never select individual streams.
    pub fn matches(&self, codec_type: CodecType) -> bool {
        match self {
            StreamSelector::None | StreamSelector::Chapters => false,
            StreamSelector::All => true,
            StreamSelector::Codec(c) => *c == codec_type,
            StreamSelector::Codecs(cs) => cs.contains(&codec_type),
        }
    }
}

impl<'de> Deserialize<'de> for StreamSelector {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => match s.as_str() {
                "none" => Ok(StreamSelector::None),
                "chapters" => Ok(StreamSelector::Chapters),
                "all" => Ok(StreamSelector::All),
                other => serde_json::from_value(serde_json::Value::String(other.to_string()))
                    .map(StreamSelector::Codec)
                    .map_err(|_| D::Error::custom(format!("unknown stream selector '{}'", other))),
            },
            serde_json::Value::Array(items) => {
                let codecs = items
                    .into_iter()
                    .map(|item| {
                        serde_json::from_value::<CodecType>(item.clone())
                            .map_err(|_| D::Error::custom(format!("unknown codec type '{}'", item)))
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(StreamSelector::Codecs(codecs))
            }
            other => Err(D::Error::custom(format!(
                "stream selector must be a string or array, got {}",
                other
            ))),
        }
    }
}

impl Serialize for StreamSelector {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            StreamSelector::None => serializer.serialize_str("none"),
            StreamSelector::Chapters => serializer.serialize_str("chapters"),
            StreamSelector::All => serializer.serialize_str("all"),
            StreamSelector::Codec(c) => c.serialize(serializer),
            StreamSelector::Codecs(cs) => cs.serialize(serializer),
        }
    }
}

/// Input half of a profile: where files come from and how they are selected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConfig {
    /// Input root; may be omitted in the document and injected from the CLI
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Regex over the dot-stripped extension; pass on match
    #[serde(default)]
    pub include: Option<String>,

    /// Regex over the dot-stripped extension; pass on non-match
    #[serde(default)]
    pub exclude: Option<String>,

    /// Input-side transcoder options, as snippets
    #[serde(default)]
    pub params: Vec<String>,

    /// Unlink the input file after a successful transcode
    #[serde(default)]
    pub delete_after_process: bool,
}

/// Output half of a profile: where files go and how they are derived
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Output root; may be omitted in the document and injected from the CLI
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Extension for outputs whose mapping sets no `format`
    #[serde(default = "default_extension")]
    pub default_extension: String,

    /// Write the transcoder log next to the outputs on success
    #[serde(default)]
    pub write_log: bool,

    pub mappings: Vec<Mapping>,
}

fn default_extension() -> String {
    "mkv".to_string()
}

/// One rule producing zero or more output files from an input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub id: String,

    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub on: StreamSelector,

    /// Predicate snippet(s); missing means always
    #[serde(default)]
    pub when: Option<Snippets>,

    /// Media-level command-line parameters, as snippets
    #[serde(default)]
    pub params: Vec<String>,

    /// Snippet resolving to the output filename stem
    #[serde(default)]
    pub output: Option<String>,

    /// Extension override for this mapping's outputs
    #[serde(default)]
    pub format: Option<String>,

    /// Codec-type ordering of the output streams; unlisted types go last
    #[serde(default)]
    pub order: Option<Vec<CodecType>>,

    #[serde(default)]
    pub options: Vec<MappingOption>,
}

/// A sub-rule inside a Mapping, contributing parameters conditionally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingOption {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub on: StreamSelector,

    #[serde(default)]
    pub when: Option<Snippets>,

    #[serde(default)]
    pub params: Vec<String>,

    /// Emit an extra output stream instead of amending the matched one
    #[serde(default)]
    pub duplicate: bool,

    /// Omit matched streams from the output entirely
    #[serde(default)]
    pub exclude: bool,
}

/// The full transformation profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub input: InputConfig,
    pub output: OutputConfig,
}

impl Profile {
    /// Load a profile document, choosing the parser by file extension
    ///
    /// YAML is the native profile format; JSON and TOML documents are
    /// accepted as well.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidProfile(format!("failed to read '{}': {}", path.display(), e))
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let profile: Profile = match extension.as_str() {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| CoreError::InvalidProfile(format!("failed to parse '{}': {}", path.display(), e)))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| CoreError::InvalidProfile(format!("failed to parse '{}': {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&contents)
                .map_err(|e| CoreError::InvalidProfile(format!("failed to parse '{}': {}", path.display(), e)))?,
        };

        Ok(profile)
    }

    /// Inject the directories given on the command line
    pub fn with_directories(mut self, input: PathBuf, output: PathBuf) -> Self {
        self.input.directory = Some(input);
        self.output.directory = Some(output);
        self
    }

    /// Mappings that survive the `skip` flag, in declaration order
    pub fn retained_mappings(&self) -> Vec<&Mapping> {
        self.output.mappings.iter().filter(|m| !m.skip).collect()
    }

    pub fn input_directory(&self) -> &Path {
        self.input.directory.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub fn output_directory(&self) -> &Path {
        self.output.directory.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Reject malformed profiles before any work
    pub fn validate(&self) -> Result<()> {
        if self.input.directory.is_none() {
            return Err(CoreError::InvalidProfile("input directory is not set".into()));
        }
        if self.output.directory.is_none() {
            return Err(CoreError::InvalidProfile("output directory is not set".into()));
        }

        if self.input.include.is_none() && self.input.exclude.is_none() {
            return Err(CoreError::InvalidProfile(
                "input requires at least one of 'include' or 'exclude'".into(),
            ));
        }

        for (field, pattern) in [("include", &self.input.include), ("exclude", &self.input.exclude)] {
            if let Some(pattern) = pattern {
                regex::Regex::new(pattern).map_err(|e| {
                    CoreError::InvalidProfile(format!("input.{} is not a valid regex: {}", field, e))
                })?;
            }
        }

        if self.output.default_extension.is_empty() {
            return Err(CoreError::InvalidProfile("output.defaultExtension is empty".into()));
        }

        let retained = self.retained_mappings();
        if retained.is_empty() {
            return Err(CoreError::InvalidProfile(
                "output.mappings contains no active mapping".into(),
            ));
        }

        for mapping in retained {
            let output = mapping.output.as_deref().unwrap_or("");
            if output.trim().is_empty() {
                return Err(CoreError::InvalidProfile(format!(
                    "mapping '{}' has no output",
                    mapping.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_YAML: &str = r#"
id: series
input:
  include: "mkv|mp4"
  params: ["-stats"]
output:
  writeLog: true
  mappings:
    - id: m1
      output: "{fn}"
      format: mkv
    - id: skipped
      skip: true
      output: "{fn}.bak"
"#;

    fn loaded(yaml: &str) -> Profile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_load_yaml_profile() {
        let profile = loaded(PROFILE_YAML)
            .with_directories(PathBuf::from("/in"), PathBuf::from("/out"));

        profile.validate().unwrap();
        assert_eq!(profile.id, "series");
        assert!(profile.output.write_log);
        assert_eq!(profile.output.default_extension, "mkv");
        assert_eq!(profile.retained_mappings().len(), 1);
    }

    #[test]
    fn test_selector_forms() {
        let mapping: Mapping =
            serde_yaml::from_str("{id: a, on: audio, output: x}").unwrap();
        assert_eq!(mapping.on, StreamSelector::Codec(CodecType::Audio));

        let mapping: Mapping =
            serde_yaml::from_str("{id: a, on: [audio, subtitle], output: x}").unwrap();
        assert_eq!(
            mapping.on,
            StreamSelector::Codecs(vec![CodecType::Audio, CodecType::Subtitle])
        );

        let mapping: Mapping = serde_yaml::from_str("{id: a, on: chapters, output: x}").unwrap();
        assert!(mapping.on.is_chapters());

        let mapping: Mapping = serde_yaml::from_str("{id: a, output: x}").unwrap();
        assert!(mapping.on.is_none());
    }

    #[test]
    fn test_selector_matching() {
        assert!(StreamSelector::All.matches(CodecType::Data));
        assert!(StreamSelector::Codec(CodecType::Audio).matches(CodecType::Audio));
        assert!(!StreamSelector::Codec(CodecType::Audio).matches(CodecType::Video));
        assert!(!StreamSelector::None.matches(CodecType::Video));
        assert!(!StreamSelector::Chapters.matches(CodecType::Video));
    }

    #[test]
    fn test_validate_requires_include_or_exclude() {
        let mut profile = loaded(PROFILE_YAML)
            .with_directories(PathBuf::from("/in"), PathBuf::from("/out"));
        profile.input.include = None;
        profile.input.exclude = None;
        assert!(matches!(profile.validate(), Err(CoreError::InvalidProfile(_))));
    }

    #[test]
    fn test_validate_rejects_empty_mappings() {
        let mut profile = loaded(PROFILE_YAML)
            .with_directories(PathBuf::from("/in"), PathBuf::from("/out"));
        for mapping in &mut profile.output.mappings {
            mapping.skip = true;
        }
        assert!(matches!(profile.validate(), Err(CoreError::InvalidProfile(_))));
    }

    #[test]
    fn test_validate_rejects_missing_output() {
        let mut profile = loaded(PROFILE_YAML)
            .with_directories(PathBuf::from("/in"), PathBuf::from("/out"));
        profile.output.mappings[0].output = None;
        assert!(matches!(profile.validate(), Err(CoreError::InvalidProfile(_))));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let mut profile = loaded(PROFILE_YAML)
            .with_directories(PathBuf::from("/in"), PathBuf::from("/out"));
        profile.input.include = Some("(".into());
        assert!(matches!(profile.validate(), Err(CoreError::InvalidProfile(_))));
    }

    #[test]
    fn test_directories_must_be_injected() {
        let profile = loaded(PROFILE_YAML);
        assert!(matches!(profile.validate(), Err(CoreError::InvalidProfile(_))));
    }
}
