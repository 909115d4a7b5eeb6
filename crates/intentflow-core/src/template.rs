//! Placeholder templates for step configuration.
//!
//! Strings may reference runtime values with `{namespace.key}` where the
//! namespace is one of:
//!
//! | Namespace | Source |
//! |-----------|--------|
//! | `intent`  | the intent's `parameters`, then its own fields |
//! | `context` | the camelCase JSON form of the [`UserContext`] |
//! | `result`  | the results of earlier steps, keyed by step id |
//!
//! Keys may be dotted paths (`{result.fetch.data.id}`).  Braced text that
//! does not match this shape is left untouched, so resolving a string with
//! no recognized placeholder returns it unchanged.
//!
//! A string is parsed once into a [`Template`] (literal and placeholder
//! segments) and rendered against a [`TemplateScope`].  In
//! [`ResolveMode::Lenient`] a missing key renders as `""`; in
//! [`ResolveMode::Strict`] it is an error.

use serde_json::{Map, Value};

use crate::context::UserContext;
use crate::error::{CoreError, Result};
use crate::intent::{Intent, descend, split_path};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Intent,
    Context,
    Result,
}

impl Namespace {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "intent" => Some(Self::Intent),
            "context" => Some(Self::Context),
            "result" => Some(Self::Result),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Context => "context",
            Self::Result => "result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder { namespace: Namespace, key: String },
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal_start = 0;
        let mut cursor = 0;

        while let Some(open) = input[cursor..].find('{').map(|i| cursor + i) {
            let Some(close) = input[open + 1..].find('}').map(|i| open + 1 + i) else {
                break;
            };
            match parse_placeholder(&input[open + 1..close]) {
                Some((namespace, key)) => {
                    if open > literal_start {
                        segments.push(Segment::Literal(input[literal_start..open].to_string()));
                    }
                    segments.push(Segment::Placeholder {
                        namespace,
                        key: key.to_string(),
                    });
                    cursor = close + 1;
                    literal_start = cursor;
                }
                // Re-scan from the next byte so `{{intent.x}` still matches.
                None => cursor = open + 1,
            }
        }

        if literal_start < input.len() {
            segments.push(Segment::Literal(input[literal_start..].to_string()));
        }

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder { .. }))
    }

    pub fn render(&self, scope: &TemplateScope<'_>, mode: ResolveMode) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { namespace, key } => match scope.lookup(*namespace, key) {
                    Some(value) => out.push_str(&value_to_text(&value)),
                    None if mode == ResolveMode::Strict => {
                        return Err(CoreError::MissingPlaceholder {
                            namespace: namespace.as_str().into(),
                            key: key.clone(),
                        });
                    }
                    None => {}
                },
            }
        }
        Ok(out)
    }
}

/// `namespace.key[.key...]` where each key part is `[A-Za-z0-9_-]+`.
fn parse_placeholder(inner: &str) -> Option<(Namespace, &str)> {
    let (ns, key) = inner.split_once('.')?;
    let namespace = Namespace::parse(ns)?;
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    };
    key.split('.').all(valid_part).then_some((namespace, key))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    #[default]
    Lenient,
    Strict,
}

/// Values visible to placeholder resolution.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub intent: &'a Intent,
    pub context: &'a UserContext,
    pub results: &'a Map<String, Value>,
}

impl<'a> TemplateScope<'a> {
    pub fn new(
        intent: &'a Intent,
        context: &'a UserContext,
        results: &'a Map<String, Value>,
    ) -> Self {
        Self {
            intent,
            context,
            results,
        }
    }

    pub fn lookup(&self, namespace: Namespace, key: &str) -> Option<Value> {
        match namespace {
            Namespace::Intent => self.intent.lookup(key),
            Namespace::Context => self.context.lookup(key),
            Namespace::Result => {
                let (head, rest) = split_path(key);
                self.results.get(head).and_then(|v| descend(v, rest)).cloned()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve placeholders in a single string.  Strings without a recognized
/// placeholder are returned as-is.
pub fn resolve_str(input: &str, scope: &TemplateScope<'_>, mode: ResolveMode) -> Result<String> {
    if !input.contains('{') {
        return Ok(input.to_string());
    }
    let template = Template::parse(input);
    if !template.has_placeholders() {
        return Ok(input.to_string());
    }
    template.render(scope, mode)
}

/// Recursively resolve every string inside a JSON value, preserving the
/// structure.  Object keys are not templated.
pub fn resolve_value(value: &Value, scope: &TemplateScope<'_>, mode: ResolveMode) -> Result<Value> {
    match value {
        Value::String(s) => resolve_str(s, scope, mode).map(Value::String),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, scope, mode))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, scope, mode)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use serde_json::json;

    struct Fixture {
        intent: Intent,
        context: UserContext,
        results: Map<String, Value>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut intent = Intent::fallback();
            intent.parameters.insert("doctor".into(), json!("Dr. Lee"));
            intent.parameters.insert("slot".into(), json!({"day": "Friday", "hour": 14}));

            let mut context = UserContext::new("user-1");
            context.preferences.notification_channels = vec!["sms".into()];

            let mut results = Map::new();
            results.insert("book".into(), json!({"success": true, "data": {"id": 99}}));

            Self {
                intent,
                context,
                results,
            }
        }

        fn scope(&self) -> TemplateScope<'_> {
            TemplateScope::new(&self.intent, &self.context, &self.results)
        }
    }

    #[test]
    fn parse_splits_literals_and_placeholders() {
        let t = Template::parse("Hi {context.userId}, see {intent.doctor}!");
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("Hi ".into()),
                Segment::Placeholder {
                    namespace: Namespace::Context,
                    key: "userId".into()
                },
                Segment::Literal(", see ".into()),
                Segment::Placeholder {
                    namespace: Namespace::Intent,
                    key: "doctor".into()
                },
                Segment::Literal("!".into()),
            ]
        );
    }

    #[test]
    fn resolves_all_namespaces() {
        let f = Fixture::new();
        let out = resolve_str(
            "{intent.doctor} on {intent.slot.day} for {context.userId} ref {result.book.data.id}",
            &f.scope(),
            ResolveMode::Lenient,
        )
        .unwrap();
        assert_eq!(out, "Dr. Lee on Friday for user-1 ref 99");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let f = Fixture::new();
        let out = resolve_str("{intent.slot}", &f.scope(), ResolveMode::Lenient).unwrap();
        assert_eq!(out, r#"{"day":"Friday","hour":14}"#);
    }

    #[test]
    fn missing_key_is_empty_in_lenient_mode() {
        let f = Fixture::new();
        let out = resolve_str("[{intent.nothing}]", &f.scope(), ResolveMode::Lenient).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn missing_key_errors_in_strict_mode() {
        let f = Fixture::new();
        let err = resolve_str("{result.ghost}", &f.scope(), ResolveMode::Strict).unwrap_err();
        assert!(matches!(err, CoreError::MissingPlaceholder { ref key, .. } if key == "ghost"));
    }

    #[test]
    fn unrecognized_braces_are_left_alone() {
        let f = Fixture::new();
        let inputs = [
            "plain text",
            "{not a placeholder}",
            "{user.name}",
            "{}",
            "json: {\"a\": 1}",
        ];
        for input in inputs {
            let out = resolve_str(input, &f.scope(), ResolveMode::Strict).unwrap();
            assert_eq!(out, input);
        }
    }

    #[test]
    fn resolving_twice_equals_resolving_once() {
        let f = Fixture::new();
        let input = json!({"msg": "Booked with {intent.doctor}", "n": [1, "{context.userId}"]});
        let once = resolve_value(&input, &f.scope(), ResolveMode::Lenient).unwrap();
        let twice = resolve_value(&once, &f.scope(), ResolveMode::Lenient).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn resolve_value_preserves_structure() {
        let f = Fixture::new();
        let input = json!({
            "url": "https://api/{context.userId}",
            "headers": {"X-Ref": "{result.book.data.id}"},
            "list": ["{intent.doctor}", 3, true, null],
            "{intent.doctor}": "keys stay"
        });
        let out = resolve_value(&input, &f.scope(), ResolveMode::Lenient).unwrap();
        assert_eq!(
            out,
            json!({
                "url": "https://api/user-1",
                "headers": {"X-Ref": "99"},
                "list": ["Dr. Lee", 3, true, null],
                "{intent.doctor}": "keys stay"
            })
        );
    }
}
