// Profile mapper: turns one scheduled file into a running transcode
// probe -> InputMedia -> mapping builder -> post resolver -> worker

use async_trait::async_trait;
use log::info;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::listeners::register_default_listeners;
use crate::mapping::{MappingBuilder, PostResolver};
use crate::media::{InputMedia, MediaPath, OutputMedia};
use crate::probe::probe;
use crate::profile::Profile;
use crate::scheduler::Processor;
use crate::snippet::context::bind;
use crate::snippet::{SnippetContext, SnippetResolver};
use crate::worker::Worker;

/// The scheduler's processor: plans and executes one file per task
pub struct ProfileMapper {
    profile: Arc<Profile>,
    resolver: SnippetResolver,
}

impl ProfileMapper {
    pub fn new(profile: Arc<Profile>) -> Self {
        Self {
            profile,
            resolver: SnippetResolver::new(),
        }
    }

    /// Probe a file and build its InputMedia, with input params resolved
    async fn probe_input(&self, file: &Path) -> Result<InputMedia> {
        let data = probe(file, &["-show_chapters"]).await?;
        let path = MediaPath::from_file(self.profile.input_directory(), file)?;

        let mut input = InputMedia {
            id: 0,
            path,
            params: Vec::new(),
            streams: data.streams,
            format: data.format,
            chapters: data.chapters,
        };
        input.params = self.resolve_input_params(&input)?;
        Ok(input)
    }

    /// Resolve the profile's input-side parameters, once per file
    fn resolve_input_params(&self, input: &InputMedia) -> Result<Vec<String>> {
        let ctx = SnippetContext::new(bind(self.profile.as_ref()), bind(input));
        self.profile
            .input
            .params
            .iter()
            .map(|param| self.resolver.resolve_string(param, &ctx))
            .collect()
    }

    /// Build the fully resolved plan for a file
    pub async fn plan(&self, file: &Path) -> Result<(InputMedia, Vec<OutputMedia>)> {
        let input = self.probe_input(file).await?;

        let builder = MappingBuilder::new(&self.profile, &self.resolver);
        let mut outputs = builder.build(&input)?;
        PostResolver::new(&self.profile, &self.resolver).resolve_plan(&input, &mut outputs)?;

        Ok((input, outputs))
    }
}

#[async_trait]
impl Processor for ProfileMapper {
    async fn process(&self, file: &Path) -> Result<()> {
        let (input, outputs) = self.plan(file).await?;

        if outputs.is_empty() {
            info!("'{}': No output: skip", file.display());
            return Ok(());
        }

        let mut worker = Worker::new(
            input,
            outputs,
            self.profile.input_directory(),
            self.profile.output_directory(),
        );
        register_default_listeners(&mut worker, &self.profile);
        worker.execute().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::path::PathBuf;

    fn profile() -> Arc<Profile> {
        let yaml = r#"
id: test
input:
  include: "mkv|mp4"
  params: ["-analyzeduration 50M", "-metadata source={fn}"]
output:
  mappings:
    - {id: m1, output: "{fn}"}
"#;
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        Arc::new(profile.with_directories(PathBuf::from("/in"), PathBuf::from("/out")))
    }

    #[test]
    fn test_input_params_resolved_once() {
        let mapper = ProfileMapper::new(profile());
        let input = InputMedia {
            id: 0,
            path: MediaPath::new("", "film", "mp4"),
            params: Vec::new(),
            streams: vec![],
            format: Map::new(),
            chapters: vec![],
        };

        let params = mapper.resolve_input_params(&input).unwrap();
        assert_eq!(params, vec!["-analyzeduration 50M", "-metadata source=film"]);
    }
}
