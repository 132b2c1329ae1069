//! Output reference templates.
//!
//! Step arguments, inputs and stdin text may point at another step's declared
//! outputs with `{{outputs.NAME}}` (primary output) or `{{outputs.NAME[N]}}`
//! (N-th output, zero based). Anything else between braces is left alone so
//! tools with their own `{{...}}` syntax keep working.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

static OUTPUT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*outputs\.([A-Za-z0-9_.\-]+?)(?:\[(\d+)\])?\s*\}\}")
        .expect("output reference pattern is valid")
});

static OUTPUT_REF_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*outputs\.").expect("output reference opener pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputRef {
    pub step: String,
    pub index: usize,
}

impl OutputRef {
    pub fn primary(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            index: 0,
        }
    }

    /// Canonical token for this reference.
    pub fn token(&self) -> String {
        if self.index == 0 {
            format!("{{{{outputs.{}}}}}", self.step)
        } else {
            format!("{{{{outputs.{}[{}]}}}}", self.step, self.index)
        }
    }

    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        let step = caps.get(1)?.as_str().to_string();
        let index = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(Self { step, index })
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// All output references embedded in a template, in order of appearance.
pub fn output_refs(template: &str) -> Vec<OutputRef> {
    OUTPUT_REF
        .captures_iter(template)
        .filter_map(|caps| OutputRef::from_captures(&caps))
        .collect()
}

/// Parse a template that is exactly one output reference.
pub fn parse_output_ref(template: &str) -> Option<OutputRef> {
    let trimmed = template.trim();
    let caps = OUTPUT_REF.captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != trimmed.len() {
        return None;
    }
    OutputRef::from_captures(&caps)
}

/// Returns true when the template opens an output reference it never completes,
/// e.g. `{{outputs.}}` or `{{outputs.a[x]}}`.
pub fn has_malformed_ref(template: &str) -> bool {
    OUTPUT_REF_OPENER.find_iter(template).count() != output_refs(template).len()
}

/// Substitute every output reference using `lookup`.
///
/// Returns the first reference `lookup` could not satisfy.
pub fn render_output_refs<F>(template: &str, lookup: F) -> std::result::Result<String, OutputRef>
where
    F: Fn(&OutputRef) -> Option<String>,
{
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for caps in OUTPUT_REF.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(reference) = OutputRef::from_captures(&caps) else {
            continue;
        };
        let value = lookup(&reference).ok_or_else(|| reference.clone())?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(&value);
        last = whole.end();
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primary_and_indexed_refs() {
        assert_eq!(parse_output_ref("{{outputs.heat-docs}}"), Some(OutputRef::primary("heat-docs")));
        assert_eq!(
            parse_output_ref("{{ outputs.app.files[2] }}"),
            Some(OutputRef {
                step: "app.files".to_string(),
                index: 2
            })
        );
    }

    #[test]
    fn embedded_ref_is_not_a_whole_token_ref() {
        assert!(parse_output_ref("--output={{outputs.a}}").is_none());
        assert_eq!(output_refs("--output={{outputs.a}}"), vec![OutputRef::primary("a")]);
    }

    #[test]
    fn foreign_braces_are_left_alone() {
        assert!(output_refs("--format={{.Name}}").is_empty());
        assert!(!has_malformed_ref("--format={{.Name}}"));
        let rendered = render_output_refs("--format={{.Name}}", |_| None).unwrap();
        assert_eq!(rendered, "--format={{.Name}}");
    }

    #[test]
    fn detects_malformed_refs() {
        assert!(has_malformed_ref("{{outputs.}}"));
        assert!(has_malformed_ref("{{outputs.a[x]}}"));
        assert!(has_malformed_ref("{{outputs.a"));
        assert!(!has_malformed_ref("{{outputs.a[1]}} and {{outputs.b}}"));
    }

    #[test]
    fn renders_every_reference() {
        let rendered = render_output_refs("{{outputs.a}}:{{outputs.b[1]}}", |r| {
            Some(format!("{}#{}", r.step, r.index))
        })
        .unwrap();
        assert_eq!(rendered, "a#0:b#1");
    }

    #[test]
    fn render_reports_unresolved_reference() {
        let missing = render_output_refs("x {{outputs.gone}}", |_| None).unwrap_err();
        assert_eq!(missing, OutputRef::primary("gone"));
    }

    #[test]
    fn token_round_trips_through_parser() {
        let reference = OutputRef {
            step: "heat".to_string(),
            index: 3,
        };
        assert_eq!(parse_output_ref(&reference.token()), Some(reference));
    }
}
