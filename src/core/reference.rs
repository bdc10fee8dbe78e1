//! `${step.path}` references between step parameters and prior outputs.
//!
//! A string that is exactly one reference is replaced by the referenced JSON
//! value. A string with references embedded in other text is interpolated.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static WHOLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{\s*([^{}]+?)\s*\}$").unwrap());

static EMBEDDED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*([^{}]+?)\s*\}").unwrap());

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());

/// A parsed `step.field.sub` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Step id or declaration index, as written.
    pub step: String,
    /// Object keys or array indices below the step output.
    pub path: Vec<String>,
}

impl Reference {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let mut segments = expr.trim().split('.');
        let step = segments.next().unwrap_or_default().to_string();
        let path: Vec<String> = segments.map(str::to_string).collect();

        if step.is_empty() {
            return Err("missing step name".to_string());
        }
        for segment in std::iter::once(&step).chain(path.iter()) {
            if !SEGMENT_RE.is_match(segment) {
                return Err(format!("invalid segment '{}'", segment));
            }
        }
        Ok(Self { step, path })
    }

    /// Walk `path` inside `output`. Missing keys yield `None`.
    pub fn lookup<'a>(&self, output: &'a Value) -> Option<&'a Value> {
        self.path.iter().try_fold(output, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.step)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

/// True if `s` is exactly one `${...}` reference.
pub fn is_whole_reference(s: &str) -> bool {
    WHOLE_RE.is_match(s)
}

/// Every reference expression in `value`, recursing into arrays and objects.
pub fn collect(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_into(value, &mut found);
    found
}

fn collect_into(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            found.extend(EMBEDDED_RE.captures_iter(s).map(|c| c[1].to_string()));
        }
        Value::Array(items) => items.iter().for_each(|item| collect_into(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect_into(item, found)),
        _ => {}
    }
}

/// Replace references in `value` using `resolve`.
///
/// `resolve` returns `None` when the reference cannot be satisfied, which is
/// reported as an error naming the reference.
pub fn substitute<F>(value: &Value, resolve: &F) -> Result<Value, String>
where
    F: Fn(&Reference) -> Option<Value>,
{
    match value {
        Value::String(s) => {
            if let Some(captures) = WHOLE_RE.captures(s) {
                let reference = Reference::parse(&captures[1])?;
                return resolve(&reference)
                    .ok_or_else(|| format!("reference '{}' did not resolve", reference));
            }
            if !EMBEDDED_RE.is_match(s) {
                return Ok(value.clone());
            }
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for captures in EMBEDDED_RE.captures_iter(s) {
                let whole = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
                let reference = Reference::parse(&captures[1])?;
                let resolved = resolve(&reference)
                    .ok_or_else(|| format!("reference '{}' did not resolve", reference))?;
                out.push_str(&s[last..whole.start]);
                out.push_str(&render(&resolved));
                last = whole.end;
            }
            out.push_str(&s[last..]);
            Ok(Value::String(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, resolve))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| substitute(v, resolve).map(|v| (k.clone(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Text form of a value for interpolation: strings verbatim, everything else
/// as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
