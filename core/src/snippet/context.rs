// Snippet evaluation context
// A record of JSON bindings, one per context slot, populated as scope narrows

use serde::Serialize;
use serde_json::Value;

/// JSON view of a model, ready to bind into a context slot
pub fn bind<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// The set of bindings visible to a snippet during evaluation
///
/// Slots hold JSON views of the profile and media models; an absent slot is
/// `Null` and behaves as the undefined value inside expressions.
#[derive(Debug, Clone, Default)]
pub struct SnippetContext {
    pub profile: Value,
    pub input: Value,
    pub output: Value,
    pub stream: Value,
    pub output_stream: Value,
    pub chapter: Value,
}

impl SnippetContext {
    pub fn new(profile: Value, input: Value) -> Self {
        Self {
            profile,
            input,
            ..Default::default()
        }
    }

    pub fn with_output(&self, output: Value) -> Self {
        Self {
            output,
            ..self.clone()
        }
    }

    pub fn with_stream(&self, stream: Value) -> Self {
        Self {
            stream,
            ..self.clone()
        }
    }

    pub fn with_output_stream(&self, output_stream: Value) -> Self {
        Self {
            output_stream,
            ..self.clone()
        }
    }

    pub fn with_chapter(&self, chapter: Value) -> Self {
        Self {
            chapter,
            ..self.clone()
        }
    }

    /// Look up a slot by its expression-language name
    ///
    /// Returns None for identifiers that are not context slots.
    pub fn slot(&self, name: &str) -> Option<&Value> {
        match name {
            "profile" => Some(&self.profile),
            "input" => Some(&self.input),
            "output" => Some(&self.output),
            "stream" => Some(&self.stream),
            "outputStream" => Some(&self.output_stream),
            "chapter" => Some(&self.chapter),
            _ => None,
        }
    }
}
