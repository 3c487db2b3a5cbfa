//! Micro-templating over label maps
//!
//! Supports `{{ $labels.<name> }}`, `{{ $values.<ref> }}` and
//! `{{ $value }}` directives. A reference to a missing key is a hard error,
//! never an empty substitution.

use std::collections::HashMap;

use regex::Regex;

use crate::model::LabelSet;

/// Template expansion errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TemplateError {
    #[error("template references missing label {0:?}")]
    MissingLabel(String),

    #[error("template references missing value {0:?}")]
    MissingValue(String),
}

const DIRECTIVE_PATTERN: &str =
    r"\{\{\s*\$(?:(labels|values)\.([A-Za-z0-9_]+)|(value))\s*\}\}";

/// Expand every directive in `text` against the instance's labels, captured
/// numeric values and the evaluation summary string.
pub fn expand(
    text: &str,
    labels: &LabelSet,
    values: &HashMap<String, Option<f64>>,
    value_string: &str,
) -> Result<String, TemplateError> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let re = Regex::new(DIRECTIVE_PATTERN).map_err(|_| {
        // The pattern is a constant; this arm is unreachable.
        TemplateError::MissingLabel(String::new())
    })?;

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("match always has group 0");
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        match (caps.get(1).map(|m| m.as_str()), caps.get(2), caps.get(3)) {
            (Some("labels"), Some(name), _) => {
                let value = labels
                    .get(name.as_str())
                    .ok_or_else(|| TemplateError::MissingLabel(name.as_str().to_string()))?;
                out.push_str(value);
            }
            (Some("values"), Some(name), _) => {
                let value = values
                    .get(name.as_str())
                    .ok_or_else(|| TemplateError::MissingValue(name.as_str().to_string()))?;
                out.push_str(&format_value(*value));
            }
            (_, _, Some(_)) => out.push_str(value_string),
            _ => unreachable!("pattern has exactly three alternatives"),
        }
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// A captured value with no data renders as NaN, not as an error: the
/// reference itself existed.
fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}", v),
        None => "NaN".to_string(),
    }
}
