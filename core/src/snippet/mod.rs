// Snippet resolution: literals, shortcut tokens and function snippets
// Turns profile strings into concrete values against a context

pub mod context;
pub mod expr;

use log::trace;
use regex::{Captures, Regex};
use serde_json::Value;

pub use context::SnippetContext;
pub use expr::{evaluate, stringify, truthy};

use crate::error::{CoreError, Result};

/// A named replacement template, registered once and substituted during
/// resolution
#[derive(Debug, Clone)]
struct Shortcut {
    name: String,
    replacement: String,
    pattern: Regex,
}

/// Resolves snippet strings against a [`SnippetContext`]
///
/// The pipeline, in order: boolean literals, number literals, shortcut
/// tokens (declaration order), function snippets, residual check, cast.
#[derive(Debug, Clone)]
pub struct SnippetResolver {
    shortcuts: Vec<Shortcut>,
    bool_re: Regex,
    number_re: Regex,
    function_re: Regex,
    residual_re: Regex,
}

impl Default for SnippetResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SnippetResolver {
    /// A resolver with the built-in shortcut table
    pub fn new() -> Self {
        let mut resolver = Self {
            shortcuts: Vec::new(),
            bool_re: Regex::new(r"\{(true|false)\}").unwrap(),
            number_re: Regex::new(r"\{(\d+(?:\.\d+)?)\}").unwrap(),
            function_re: Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap(),
            residual_re: Regex::new(r"\{[^{}]+\}").unwrap(),
        };

        resolver.register("iid", "{{input.id}}:{{stream.index}}");
        resolver.register("oid", "{{outputStream.index}}");
        resolver.register("fn", "{{input.path.filename}}");
        resolver.register(
            "lng",
            "{{ stream.tags && stream.tags.language ? stream.tags.language : 'und' }}",
        );
        resolver.register(
            "label",
            "{{ (stream.disposition && stream.disposition.forced===1) || (stream.tags && stream.tags.title && stream.tags.title.match(/forced/i)) ? 'forced' : (stream.disposition && stream.disposition.hearing_impaired===1) || (stream.tags && stream.tags.title && stream.tags.title.match(/hi|sdh/i)) ? 'sdh' : '' }}",
        );

        resolver
    }

    /// Register a shortcut; applied after the ones registered before it
    ///
    /// Matches `{name}` with an optional leading or trailing separator
    /// (`-`, `.` or `_`), case-insensitively. The separators survive the
    /// substitution unless the replacement resolves to an empty string.
    pub fn register(&mut self, name: &str, replacement: &str) {
        let pattern = Regex::new(&format!(r"(?i)\{{([-._])?{}([-._])?\}}", regex::escape(name)))
            .expect("shortcut name forms a valid pattern");
        self.shortcuts.push(Shortcut {
            name: name.to_string(),
            replacement: replacement.to_string(),
            pattern,
        });
    }

    /// Resolve a single snippet string into a value
    pub fn resolve(&self, snippet: &str, ctx: &SnippetContext) -> Result<Value> {
        // 1-2. literal passthroughs, braces stripped
        let text = self.bool_re.replace_all(snippet, "$1").into_owned();
        let text = self.number_re.replace_all(&text, "$1").into_owned();

        // 3. shortcuts, in declaration order
        let mut text = text;
        for shortcut in &self.shortcuts {
            text = replace_fallible(&shortcut.pattern, &text, |caps| {
                trace!("applying shortcut '{}'", shortcut.name);
                let leading = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let trailing = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                let replaced = self.resolve_functions(&shortcut.replacement, ctx)?;
                if replaced.is_empty() {
                    Ok(String::new())
                } else {
                    Ok(format!("{}{}{}", leading, replaced, trailing))
                }
            })?;
        }

        // 4. function snippets
        let text = self.resolve_functions(&text, ctx)?;

        // 5. nothing brace-delimited may remain
        let residuals: Vec<String> = self
            .residual_re
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .collect();
        if !residuals.is_empty() {
            return Err(CoreError::UnresolvedSnippet(residuals, snippet.to_string()));
        }

        // 6. cast whole-string booleans and numbers
        Ok(cast(text))
    }

    /// Resolve a sequence by joining it with a single space first
    pub fn resolve_seq(&self, snippets: &[String], ctx: &SnippetContext) -> Result<Value> {
        self.resolve(&snippets.join(" "), ctx)
    }

    /// Resolve a snippet and render the result as a string
    pub fn resolve_string(&self, snippet: &str, ctx: &SnippetContext) -> Result<String> {
        Ok(stringify(&self.resolve(snippet, ctx)?))
    }

    fn resolve_functions(&self, text: &str, ctx: &SnippetContext) -> Result<String> {
        replace_fallible(&self.function_re, text, |caps| {
            let source = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
            let value = expr::evaluate(source, ctx)?;
            if value.is_null() {
                return Err(CoreError::SnippetEvalError(format!(
                    "expression '{}' yielded null/undefined",
                    source
                )));
            }
            Ok(stringify(&value))
        })
    }

    #[cfg(test)]
    fn shortcut_names(&self) -> Vec<&str> {
        self.shortcuts.iter().map(|s| s.name.as_str()).collect()
    }
}

/// `replace_all` with a fallible replacement closure
fn replace_fallible<F>(re: &Regex, text: &str, mut replace: F) -> Result<String>
where
    F: FnMut(&Captures) -> Result<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let matched = caps.get(0).expect("group 0 always matches");
        out.push_str(&text[last..matched.start()]);
        out.push_str(&replace(&caps)?);
        last = matched.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn cast(text: String) -> Value {
    if text == "true" {
        return Value::Bool(true);
    }
    if text == "false" {
        return Value::Bool(false);
    }
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = text.parse::<i64>() {
            return Value::Number(i.into());
        }
    }
    if let Some((whole, frac)) = text.split_once('.') {
        let numeric = !whole.is_empty()
            && !frac.is_empty()
            && whole.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit());
        if numeric {
            if let Ok(f) = text.parse::<f64>() {
                if let Some(n) = serde_json::Number::from_f64(f) {
                    return Value::Number(n);
                }
            }
        }
    }
    Value::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> SnippetContext {
        let mut ctx = SnippetContext::new(
            json!({"id": "series"}),
            json!({
                "id": 0,
                "path": {"parent": "", "filename": "ep01", "extension": "mp4"},
                "format": {"duration": "1200.000000"}
            }),
        );
        ctx.stream = json!({
            "index": 2,
            "codec_type": "audio",
            "disposition": {"forced": 0, "hearing_impaired": 0},
            "tags": {"language": "eng", "title": "Stereo"}
        });
        ctx.output_stream = json!({"index": 1});
        ctx
    }

    #[test]
    fn test_literal_passthroughs() {
        let resolver = SnippetResolver::new();
        assert_eq!(resolver.resolve("{true}", &ctx()).unwrap(), json!(true));
        assert_eq!(resolver.resolve("{false}", &ctx()).unwrap(), json!(false));
        assert_eq!(resolver.resolve("{42}", &ctx()).unwrap(), json!(42));
        assert_eq!(resolver.resolve("{3.5}", &ctx()).unwrap(), json!(3.5));
    }

    #[test]
    fn test_builtin_shortcuts() {
        let resolver = SnippetResolver::new();
        assert_eq!(resolver.resolve_string("{fn}", &ctx()).unwrap(), "ep01");
        assert_eq!(resolver.resolve_string("{iid}", &ctx()).unwrap(), "0:2");
        assert_eq!(resolver.resolve_string("{oid}", &ctx()).unwrap(), "1");
        assert_eq!(resolver.resolve_string("{lng}", &ctx()).unwrap(), "eng");
    }

    #[test]
    fn test_shortcut_separators_survive() {
        let resolver = SnippetResolver::new();
        assert_eq!(resolver.resolve_string("{fn}{.lng}", &ctx()).unwrap(), "ep01.eng");
        assert_eq!(resolver.resolve_string("{fn}{_lng}", &ctx()).unwrap(), "ep01_eng");
    }

    #[test]
    fn test_empty_replacement_drops_separators() {
        // Stereo audio with no forced/sdh markers: {label} resolves empty
        let resolver = SnippetResolver::new();
        assert_eq!(resolver.resolve_string("{fn}{.label}", &ctx()).unwrap(), "ep01");
    }

    #[test]
    fn test_label_forced_and_sdh() {
        let resolver = SnippetResolver::new();

        let mut forced = ctx();
        forced.stream = json!({
            "index": 3,
            "codec_type": "subtitle",
            "disposition": {"forced": 1},
            "tags": {"language": "fra"}
        });
        assert_eq!(resolver.resolve_string("{label}", &forced).unwrap(), "forced");

        let mut sdh = ctx();
        sdh.stream = json!({
            "index": 4,
            "codec_type": "subtitle",
            "disposition": {},
            "tags": {"title": "English [SDH]"}
        });
        assert_eq!(resolver.resolve_string("{label}", &sdh).unwrap(), "sdh");
    }

    #[test]
    fn test_shortcuts_are_case_insensitive() {
        let resolver = SnippetResolver::new();
        assert_eq!(resolver.resolve_string("{FN}", &ctx()).unwrap(), "ep01");
    }

    #[test]
    fn test_function_snippet() {
        let resolver = SnippetResolver::new();
        assert_eq!(
            resolver.resolve_string("-metadata title={{input.path.filename}}", &ctx()).unwrap(),
            "-metadata title=ep01"
        );
    }

    #[test]
    fn test_sequence_joins_with_space() {
        let resolver = SnippetResolver::new();
        let joined = resolver.resolve_seq(&["a".into(), "b".into()], &ctx()).unwrap();
        assert_eq!(joined, resolver.resolve("a b", &ctx()).unwrap());
    }

    #[test]
    fn test_residual_braces_fail() {
        let resolver = SnippetResolver::new();
        let err = resolver.resolve("x {nope} y {alsonope}", &ctx()).unwrap_err();
        match err {
            CoreError::UnresolvedSnippet(residuals, _) => {
                assert_eq!(residuals, vec!["{nope}", "{alsonope}"]);
            }
            other => panic!("expected UnresolvedSnippet, got {}", other),
        }
    }

    #[test]
    fn test_top_level_null_fails() {
        let resolver = SnippetResolver::new();
        let err = resolver.resolve("{{chapter.number}}", &ctx()).unwrap_err();
        assert!(matches!(err, CoreError::SnippetEvalError(_)));
    }

    #[test]
    fn test_whole_string_cast() {
        let resolver = SnippetResolver::new();
        assert_eq!(resolver.resolve("{{input.id}}", &ctx()).unwrap(), json!(0));
        // not a whole-string number: stays a string
        assert_eq!(resolver.resolve("{{input.id}}x", &ctx()).unwrap(), json!("0x"));
    }

    #[test]
    fn test_custom_shortcut_declaration_order() {
        let mut resolver = SnippetResolver::new();
        resolver.register("show", "{{profile.id}}");
        assert_eq!(resolver.resolve_string("{show}-{fn}", &ctx()).unwrap(), "series-ep01");
        assert!(resolver.shortcut_names().ends_with(&["show"]));
    }

    #[test]
    fn test_determinism() {
        let resolver = SnippetResolver::new();
        let first = resolver.resolve_string("{fn}{.lng}.{{outputStream.index}}", &ctx()).unwrap();
        let second = resolver.resolve_string("{fn}{.lng}.{{outputStream.index}}", &ctx()).unwrap();
        assert_eq!(first, second);
    }
}
