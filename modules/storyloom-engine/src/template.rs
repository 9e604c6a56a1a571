//! `{{name}}` placeholder templates.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static VERSION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*Version:\*\*\s*(v\d+)").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unclosed template variable: {{{{{0}")]
    Unclosed(String),

    #[error("Unknown template variable: {{{{{name}}}}}. Allowed: {allowed:?}")]
    Unknown { name: String, allowed: Vec<String> },
}

enum Segment<'a> {
    Text(&'a str),
    Var(&'a str),
}

fn segments(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push(Segment::Text(&rest[..start]));
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            let preview: String = after.chars().take(24).collect();
            return Err(TemplateError::Unclosed(preview));
        };
        out.push(Segment::Var(after[..end].trim()));
        rest = &after[end + 2..];
    }
    out.push(Segment::Text(rest));
    Ok(out)
}

/// Substitute placeholders. Unknown names are left in place; a malformed
/// template is returned unchanged.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let Ok(parts) = segments(template) else {
        return template.to_string();
    };
    let mut out = String::with_capacity(template.len());
    for part in parts {
        match part {
            Segment::Text(text) => out.push_str(text),
            Segment::Var(name) => match vars.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    out.push_str("{{");
                    out.push_str(name);
                    out.push_str("}}");
                }
            },
        }
    }
    out
}

/// Every placeholder must be closed and named in `allowed`.
pub fn validate_template(template: &str, allowed: &[&str]) -> Result<(), TemplateError> {
    for part in segments(template)? {
        if let Segment::Var(name) = part {
            if !allowed.contains(&name) {
                return Err(TemplateError::Unknown {
                    name: name.to_string(),
                    allowed: allowed.iter().map(|s| s.to_string()).collect(),
                });
            }
        }
    }
    Ok(())
}

/// Version from the `**Version:** vN` marker, `v0` when absent.
pub fn template_version(template: &str) -> String {
    VERSION_MARKER
        .captures(template)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "v0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_vars() {
        let vars = HashMap::from([("beat", "hook".to_string()), ("words", "120".to_string())]);
        assert_eq!(
            render("Beat {{beat}} in {{ words }} words", &vars),
            "Beat hook in 120 words"
        );
    }

    #[test]
    fn leaves_unknown_vars_intact() {
        let vars = HashMap::new();
        assert_eq!(render("Keep {{this}}", &vars), "Keep {{this}}");
    }

    #[test]
    fn malformed_template_is_returned_as_is() {
        let vars = HashMap::from([("a", "x".to_string())]);
        assert_eq!(render("{{a}} and {{b", &vars), "{{a}} and {{b");
    }

    #[test]
    fn validates_placeholders() {
        assert!(validate_template("{{a}} {{b}}", &["a", "b"]).is_ok());
        assert!(matches!(
            validate_template("{{c}}", &["a"]),
            Err(TemplateError::Unknown { .. })
        ));
        assert!(matches!(
            validate_template("{{a", &["a"]),
            Err(TemplateError::Unclosed(_))
        ));
    }

    #[test]
    fn reads_version_marker() {
        assert_eq!(template_version("# T\n\n**Version:** v3\n"), "v3");
        assert_eq!(template_version("no marker"), "v0");
    }
}
