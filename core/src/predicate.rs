// Predicate compilation: snippet strings as boolean guards
// A sequence AND-composes; a missing predicate is the constant true

use crate::error::Result;
use crate::profile::Snippets;
use crate::snippet::{expr, SnippetContext, SnippetResolver};

/// A compiled `when` guard
///
/// Elements containing snippet syntax go through the full resolver; bare
/// elements are evaluated directly as expressions, where a null result is
/// simply false.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    sources: Vec<String>,
}

impl Predicate {
    /// Compile a snippet or sequence; `None` yields the constant true
    ///
    /// Empty strings in a sequence are discarded.
    pub fn new(when: Option<&Snippets>) -> Self {
        let sources = when
            .map(|w| {
                w.items()
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self { sources }
    }

    pub fn is_always(&self) -> bool {
        self.sources.is_empty()
    }

    /// Evaluate the guard against a context
    pub fn eval(&self, resolver: &SnippetResolver, ctx: &SnippetContext) -> Result<bool> {
        for source in &self.sources {
            let value = if source.contains('{') {
                resolver.resolve(source, ctx)?
            } else {
                expr::evaluate(source, ctx)?
            };
            if !expr::truthy(&value) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> SnippetContext {
        let mut ctx = SnippetContext::new(
            json!({"id": "p"}),
            json!({"id": 0, "format": {"duration": "1200.000000"}}),
        );
        ctx.stream = json!({
            "index": 1,
            "codec_type": "audio",
            "tags": {"language": "eng"}
        });
        ctx
    }

    #[test]
    fn test_missing_is_true() {
        let predicate = Predicate::new(None);
        assert!(predicate.is_always());
        assert!(predicate.eval(&SnippetResolver::new(), &ctx()).unwrap());
    }

    #[test]
    fn test_bare_expression() {
        let resolver = SnippetResolver::new();
        let long = Predicate::new(Some(&Snippets::One("input.format.duration > 3600".into())));
        assert!(!long.eval(&resolver, &ctx()).unwrap());

        let short = Predicate::new(Some(&Snippets::One("input.format.duration > 600".into())));
        assert!(short.eval(&resolver, &ctx()).unwrap());
    }

    #[test]
    fn test_null_result_is_false() {
        let resolver = SnippetResolver::new();
        let predicate = Predicate::new(Some(&Snippets::One("stream.tags.missing".into())));
        assert!(!predicate.eval(&resolver, &ctx()).unwrap());
    }

    #[test]
    fn test_sequence_and_composes() {
        let resolver = SnippetResolver::new();
        let both = Predicate::new(Some(&Snippets::Many(vec![
            "stream.codec_type === 'audio'".into(),
            "stream.tags.language === 'eng'".into(),
        ])));
        assert!(both.eval(&resolver, &ctx()).unwrap());

        let one_fails = Predicate::new(Some(&Snippets::Many(vec![
            "stream.codec_type === 'audio'".into(),
            "stream.tags.language === 'fra'".into(),
        ])));
        assert!(!one_fails.eval(&resolver, &ctx()).unwrap());
    }

    #[test]
    fn test_empty_strings_discarded() {
        let resolver = SnippetResolver::new();
        let predicate = Predicate::new(Some(&Snippets::Many(vec!["".into(), "  ".into()])));
        assert!(predicate.is_always());
        assert!(predicate.eval(&resolver, &ctx()).unwrap());
    }

    #[test]
    fn test_snippet_syntax_goes_through_resolver() {
        let resolver = SnippetResolver::new();
        let predicate = Predicate::new(Some(&Snippets::One("{{stream.index === 1}}".into())));
        assert!(predicate.eval(&resolver, &ctx()).unwrap());
    }
}
