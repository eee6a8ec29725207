//! Callback route templates.
//!
//! A template such as `store:buy:{item_id}` is split at `{name}` boundaries
//! into literal and variable segments. Literals match verbatim; a variable
//! matches one or more characters, as few as possible, up to the next literal
//! (or the end of the payload for a trailing variable). The whole payload
//! must match.

use ferrogram_core::RouteError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One piece of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

/// A compiled callback route template.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    source: String,
    segments: Vec<Segment>,
    matcher: Regex,
}

impl RouteTemplate {
    /// Parses and compiles `template`.
    pub fn compile(template: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidTemplate {
            template: template.to_owned(),
            reason: reason.to_owned(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(invalid("nested `{`")),
                            Some(c) => name.push(c),
                            None => return Err(invalid("unclosed `{`")),
                        }
                    }
                    if name.is_empty() {
                        return Err(invalid("empty variable name"));
                    }
                    if !is_identifier(&name) {
                        return Err(invalid(&format!("invalid variable name `{name}`")));
                    }
                    let duplicate = segments
                        .iter()
                        .any(|s| matches!(s, Segment::Variable(v) if *v == name));
                    if duplicate {
                        return Err(RouteError::DuplicateVariable {
                            template: template.to_owned(),
                            name,
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name));
                }
                '}' => return Err(invalid("unmatched `}`")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if segments.is_empty() {
            return Err(invalid("empty template"));
        }

        // `s`: a variable may span line breaks.
        let mut pattern = String::from("(?s)^");
        for segment in &segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Variable(name) => {
                    pattern.push_str("(?P<");
                    pattern.push_str(name);
                    pattern.push_str(">.+?)");
                }
            }
        }
        pattern.push('$');
        let matcher = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            source: template.to_owned(),
            segments,
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn variable_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Variable(_)))
            .count()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Matches the entire `payload`, extracting variables by name.
    pub fn matches(&self, payload: &str) -> Option<RouteParams> {
        let captures = self.matcher.captures(payload)?;
        let values = self
            .variables()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_owned(), m.as_str().to_owned()))
            })
            .collect();
        Some(RouteParams { values })
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for RouteTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for RouteTemplate {}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Failure to read a route variable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("route variable `{0}` is not present")]
    Missing(String),

    #[error("route variable `{name}` = `{value}` could not be parsed: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Variables extracted from a callback payload, in template order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    values: Vec<(String, String)>,
}

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parses variable `name` into `T`.
    pub fn parse<T>(&self, name: &str) -> Result<T, ParamError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self
            .get(name)
            .ok_or_else(|| ParamError::Missing(name.to_owned()))?;
        value.parse().map_err(|e: T::Err| ParamError::Invalid {
            name: name.to_owned(),
            value: value.to_owned(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_match_across_line_breaks() {
        let template = RouteTemplate::compile("note:{text}:save").unwrap();
        let params = template.matches("note:first\nsecond:save").unwrap();
        assert_eq!(params.get("text"), Some("first\nsecond"));
        assert!(template.matches("note:a:save\n").is_none());
    }

    #[test]
    fn splits_literals_and_variables() {
        let template = RouteTemplate::compile("store:buy:{item_id}").unwrap();
        assert_eq!(
            template.segments(),
            &[
                Segment::Literal("store:buy:".into()),
                Segment::Variable("item_id".into()),
            ]
        );
        assert_eq!(template.variable_count(), 1);
    }

    #[test]
    fn round_trip_extracts_variables() {
        let template = RouteTemplate::compile("item:{id}:view").unwrap();
        let params = template.matches("item:42:view").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.parse::<u64>("id"), Ok(42));
        assert!(template.matches("item:view").is_none());
        assert!(template.matches("item:42:view:extra").is_none());
    }

    #[test]
    fn variables_are_non_greedy() {
        let template = RouteTemplate::compile("{a}:{b}").unwrap();
        let params = template.matches("x:y:z").unwrap();
        assert_eq!(params.get("a"), Some("x"));
        assert_eq!(params.get("b"), Some("y:z"));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let template = RouteTemplate::compile("page.{n}+").unwrap();
        assert!(template.matches("page.3+").is_some());
        assert!(template.matches("pageX3+").is_none());
    }

    #[test]
    fn rejects_malformed_templates() {
        for bad in ["a:{", "a:}", "a:{}", "a:{1x}", "a:{x{y}}", ""] {
            assert!(
                matches!(
                    RouteTemplate::compile(bad),
                    Err(RouteError::InvalidTemplate { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_duplicate_variables() {
        let err = RouteTemplate::compile("{id}:{id}").unwrap_err();
        assert_eq!(
            err,
            RouteError::DuplicateVariable {
                template: "{id}:{id}".into(),
                name: "id".into(),
            }
        );
    }

    #[test]
    fn parse_reports_missing_and_invalid() {
        let params = RouteTemplate::compile("n:{n}")
            .unwrap()
            .matches("n:abc")
            .unwrap();
        assert!(matches!(params.parse::<i32>("n"), Err(ParamError::Invalid { .. })));
        assert_eq!(
            params.parse::<i32>("m"),
            Err(ParamError::Missing("m".into()))
        );
    }
}
