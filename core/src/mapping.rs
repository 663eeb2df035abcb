// Mapping builder: expands profile mappings into a plan of output files
// Dispatches each mapping to one of three strategies, then a post pass
// substitutes the remaining snippets inside the built parameter lists

use log::{debug, warn};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::media::{Chapter, InputMedia, InputStream, MediaPath, OutputMedia, OutputStream};
use crate::predicate::Predicate;
use crate::profile::{Mapping, MappingOption, Profile, StreamSelector};
use crate::snippet::context::bind;
use crate::snippet::{SnippetContext, SnippetResolver};
use crate::utils::parse_rational;

/// Codec-name patterns that imply an output extension, first declared wins
const CODEC_EXTENSIONS: &[(&str, &str)] = &[("subrip", "srt")];

/// Chapter end times within this many seconds of the container duration are
/// considered equal
const CHAPTER_END_TOLERANCE: f64 = 1e-6;

/// Expands the profile's mappings for one probed input
///
/// The returned outputs still carry unresolved parameter templates; run the
/// [`PostResolver`] over them before handing the plan to a worker.
pub struct MappingBuilder<'a> {
    profile: &'a Profile,
    resolver: &'a SnippetResolver,
}

impl<'a> MappingBuilder<'a> {
    pub fn new(profile: &'a Profile, resolver: &'a SnippetResolver) -> Self {
        Self { profile, resolver }
    }

    /// Build the ordered list of outputs for an input
    ///
    /// Output ids are assigned sequentially from 0 across the whole plan;
    /// stream indices restart at 0 inside each output.
    pub fn build(&self, input: &InputMedia) -> Result<Vec<OutputMedia>> {
        let retained = self.profile.retained_mappings();
        if retained.is_empty() {
            return Err(CoreError::InvalidProfile("no active mapping".into()));
        }
        for mapping in &retained {
            if mapping.output.as_deref().unwrap_or("").trim().is_empty() {
                return Err(CoreError::InvalidProfile(format!(
                    "mapping '{}' has no output",
                    mapping.id
                )));
            }
        }

        let ctx = SnippetContext::new(bind(self.profile), bind(input));

        let mut outputs: Vec<OutputMedia> = Vec::new();
        for mapping in retained {
            let next_id = outputs.len() as u32;
            match &mapping.on {
                StreamSelector::None => {
                    if let Some(output) = self.build_single(&ctx, mapping, input, next_id)? {
                        outputs.push(output);
                    }
                }
                StreamSelector::Chapters => {
                    outputs.extend(self.build_chapters(&ctx, mapping, input, next_id)?);
                }
                _ => {
                    outputs.extend(self.build_many(&ctx, mapping, input, next_id)?);
                }
            }
        }

        Ok(outputs)
    }

    /// One output from the whole input
    fn build_single(
        &self,
        ctx: &SnippetContext,
        mapping: &Mapping,
        input: &InputMedia,
        id: u32,
    ) -> Result<Option<OutputMedia>> {
        if !Predicate::new(mapping.when.as_ref()).eval(self.resolver, ctx)? {
            debug!("mapping '{}': condition not met, skipped", mapping.id);
            return Ok(None);
        }

        let active: Vec<&MappingOption> = mapping.options.iter().filter(|o| !o.skip).collect();

        // Media-level parameters: the mapping's own, then each whole-input
        // option whose condition holds
        let mut global_params = mapping.params.clone();
        for option in active.iter().filter(|o| o.on.is_none()) {
            if Predicate::new(option.when.as_ref()).eval(self.resolver, ctx)? {
                global_params.extend(option.params.iter().cloned());
            }
        }

        let task_options: Vec<&MappingOption> =
            active.iter().filter(|o| !o.on.is_none()).copied().collect();

        // Stream ordering: listed codec types first, unlisted last, stable
        // within a group
        let mut ordered: Vec<&InputStream> = input.streams.iter().collect();
        if let Some(order) = &mapping.order {
            ordered.sort_by_key(|s| {
                order
                    .iter()
                    .position(|c| *c == s.codec_type)
                    .unwrap_or(order.len())
            });
        }

        let mut streams: Vec<OutputStream> = Vec::new();
        for stream in ordered {
            let stream_ctx = ctx.with_stream(bind(stream));

            let mut matched: Vec<&MappingOption> = Vec::new();
            for option in &task_options {
                if option.on.matches(stream.codec_type)
                    && Predicate::new(option.when.as_ref()).eval(self.resolver, &stream_ctx)?
                {
                    matched.push(option);
                }
            }

            if matched.iter().any(|o| o.exclude) {
                debug!(
                    "mapping '{}': stream #{} excluded",
                    mapping.id, stream.index
                );
                continue;
            }

            let mut accumulated: Vec<String> = Vec::new();
            for option in &matched {
                if option.duplicate {
                    streams.push(OutputStream {
                        index: 0,
                        source: stream.index,
                        params: option.params.clone(),
                    });
                } else {
                    accumulated.extend(option.params.iter().cloned());
                }
            }

            let params = if matched.is_empty() {
                // no rule claimed the stream: map it and copy its codec
                vec!["-map {iid}".to_string(), "-c:{oid} copy".to_string()]
            } else {
                let mut params = vec!["-map {iid}".to_string()];
                params.extend(accumulated);
                params
            };
            streams.push(OutputStream {
                index: 0,
                source: stream.index,
                params,
            });
        }

        if streams.is_empty() {
            debug!("mapping '{}': no streams retained, skipped", mapping.id);
            return Ok(None);
        }
        for (index, stream) in streams.iter_mut().enumerate() {
            stream.index = index as u32;
        }

        let filename = self
            .resolver
            .resolve_string(mapping.output.as_deref().unwrap_or(""), ctx)?;
        let extension = mapping
            .format
            .clone()
            .unwrap_or_else(|| self.profile.output.default_extension.clone());

        Ok(Some(OutputMedia {
            id,
            source: input.id,
            path: MediaPath::new(input.path.parent.clone(), filename, extension),
            params: global_params,
            streams,
            chapter: None,
        }))
    }

    /// One output per chapter, delegating each to the single strategy
    fn build_chapters(
        &self,
        ctx: &SnippetContext,
        mapping: &Mapping,
        input: &InputMedia,
        next_id: u32,
    ) -> Result<Vec<OutputMedia>> {
        if input.chapters.is_empty() {
            warn!(
                "mapping '{}': input '{}' has no chapters",
                mapping.id,
                input.path.file_name()
            );
            return Ok(Vec::new());
        }

        let chapters = normalize_chapters(&input.chapters, input.duration());

        let mut outputs = Vec::new();
        let mut id = next_id;
        for chapter in chapters {
            let chapter_ctx = ctx.with_chapter(bind(&chapter));
            if let Some(mut output) = self.build_single(&chapter_ctx, mapping, input, id)? {
                output.chapter = Some(chapter);
                id += 1;
                outputs.push(output);
            }
        }
        Ok(outputs)
    }

    /// One output per matching input stream
    fn build_many(
        &self,
        ctx: &SnippetContext,
        mapping: &Mapping,
        input: &InputMedia,
        next_id: u32,
    ) -> Result<Vec<OutputMedia>> {
        if !mapping.options.is_empty() {
            warn!(
                "mapping '{}': options are ignored for per-stream mappings",
                mapping.id
            );
        }

        let when = Predicate::new(mapping.when.as_ref());

        let mut outputs = Vec::new();
        let mut id = next_id;
        for stream in &input.streams {
            if !mapping.on.matches(stream.codec_type) {
                continue;
            }
            let stream_ctx = ctx.with_stream(bind(stream));
            if !when.eval(self.resolver, &stream_ctx)? {
                continue;
            }

            let mut params = vec!["-map {iid}".to_string()];
            params.extend(mapping.params.iter().cloned());

            let filename = self
                .resolver
                .resolve_string(mapping.output.as_deref().unwrap_or(""), &stream_ctx)?;
            let extension = mapping
                .format
                .clone()
                .unwrap_or_else(|| codec_extension(&stream.codec_name));

            outputs.push(OutputMedia {
                id,
                source: input.id,
                path: MediaPath::new(input.path.parent.clone(), filename, extension),
                params: Vec::new(),
                streams: vec![OutputStream {
                    index: 0,
                    source: stream.index,
                    params,
                }],
                chapter: None,
            });
            id += 1;
        }
        Ok(outputs)
    }
}

/// Second pass: substitute the snippets left inside built parameter lists
///
/// Media-level parameters see `{profile, input, output, chapter?}`; stream
/// parameters additionally see the source stream and the output stream.
pub struct PostResolver<'a> {
    profile: &'a Profile,
    resolver: &'a SnippetResolver,
}

impl<'a> PostResolver<'a> {
    pub fn new(profile: &'a Profile, resolver: &'a SnippetResolver) -> Self {
        Self { profile, resolver }
    }

    /// Resolve every parameter of every output in place
    ///
    /// After this pass no parameter contains a brace-delimited token; a
    /// leftover fails with `UnresolvedSnippet`.
    pub fn resolve_plan(&self, input: &InputMedia, outputs: &mut [OutputMedia]) -> Result<()> {
        let base = SnippetContext::new(bind(self.profile), bind(input));
        for output in outputs {
            self.resolve_media(&base, input, output)?;
        }
        Ok(())
    }

    fn resolve_media(
        &self,
        base: &SnippetContext,
        input: &InputMedia,
        output: &mut OutputMedia,
    ) -> Result<()> {
        let mut ctx = base.with_output(bind(output));
        if let Some(chapter) = &output.chapter {
            ctx = ctx.with_chapter(bind(chapter));
        }

        for param in &mut output.params {
            *param = self.resolver.resolve_string(param, &ctx)?;
        }

        for stream in &mut output.streams {
            let source = input.stream(stream.source).map(bind).unwrap_or(Value::Null);
            let stream_ctx = ctx.with_stream(source).with_output_stream(bind(&*stream));
            for param in &mut stream.params {
                *param = self.resolver.resolve_string(param, &stream_ctx)?;
            }
        }

        Ok(())
    }
}

/// Ensure the chapter list covers the whole container
///
/// When the last chapter ends before the container does, a synthetic tail
/// chapter is appended in the same time base. Numbers are (re)assigned
/// 1-based across the final list.
fn normalize_chapters(chapters: &[Chapter], duration: Option<f64>) -> Vec<Chapter> {
    let mut list = chapters.to_vec();

    let synthetic = match (list.last(), duration) {
        (Some(last), Some(duration)) => {
            let end = last.end_seconds().unwrap_or(0.0);
            if (duration - end).abs() > CHAPTER_END_TOLERANCE {
                let tick = parse_rational(&last.time_base).unwrap_or(1.0);
                let end_ticks = if tick != 0.0 {
                    (duration / tick).round() as i64
                } else {
                    duration as i64
                };
                Some(Chapter {
                    number: 0,
                    time_base: last.time_base.clone(),
                    start: last.end,
                    start_time: last.end_time.clone(),
                    end: end_ticks,
                    end_time: format!("{:.6}", duration),
                    extra: serde_json::Map::new(),
                })
            } else {
                None
            }
        }
        _ => None,
    };
    if let Some(chapter) = synthetic {
        list.push(chapter);
    }

    for (index, chapter) in list.iter_mut().enumerate() {
        chapter.number = (index + 1) as u32;
    }
    list
}

/// Extension for per-stream outputs without an explicit `format`
///
/// First declared pattern wins; several matches get a warning, none falls
/// back to the codec name itself.
fn codec_extension(codec_name: &str) -> String {
    let matches: Vec<&(&str, &str)> = CODEC_EXTENSIONS
        .iter()
        .filter(|(pattern, _)| {
            regex::Regex::new(pattern)
                .map(|re| re.is_match(codec_name))
                .unwrap_or(false)
        })
        .collect();

    match matches.as_slice() {
        [] => {
            debug!("no extension mapping for codec '{}', using the codec name", codec_name);
            codec_name.to_string()
        }
        [(_, extension)] => extension.to_string(),
        several => {
            let patterns: Vec<&str> = several.iter().map(|(p, _)| *p).collect();
            warn!(
                "codec '{}' matches several extension patterns ({}), using the first",
                codec_name,
                patterns.join(", ")
            );
            several[0].1.to_string()
        }
    }
}
