//! Path template compilation and matching.
//!
//! A template such as `/group/chat/{groupId}` is split on `/` into literal
//! and parameter segments. Matching is purely structural: segment counts must
//! agree, literals compare byte-for-byte and each `{name}` binds one
//! non-empty segment. There is no wildcard or catch-all segment.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use super::params::RouteParameters;

/// Errors raised while compiling a path template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template `{template}` has an empty parameter name")]
    EmptyParameter { template: String },

    #[error("template `{template}` declares parameter `{name}` more than once")]
    DuplicateParameter { template: String, name: String },

    #[error("template `{template}` has invalid parameter name `{name}`")]
    InvalidParameterName { template: String, name: String },

    #[error("template `{template}` has malformed segment `{segment}`")]
    MalformedSegment { template: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled, immutable path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
    required_query: BTreeSet<String>,
}

impl PathTemplate {
    /// Compile `template`, additionally requiring every name in
    /// `required_query` to be present in the request's query string.
    pub fn compile<I, S>(template: &str, required_query: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segments = Vec::new();
        let mut names = BTreeSet::new();

        for segment in template.split('/') {
            let parsed = parse_segment(template, segment)?;
            if let Segment::Param(name) = &parsed {
                if !names.insert(name.clone()) {
                    return Err(TemplateError::DuplicateParameter {
                        template: template.to_string(),
                        name: name.clone(),
                    });
                }
            }
            segments.push(parsed);
        }

        let mut required = BTreeSet::new();
        for name in required_query {
            let name = name.into();
            validate_name(template, &name)?;
            if names.contains(&name) || !required.insert(name.clone()) {
                return Err(TemplateError::DuplicateParameter {
                    template: template.to_string(),
                    name,
                });
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
            required_query: required,
        })
    }

    /// The template string this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn required_query(&self) -> impl Iterator<Item = &str> {
        self.required_query.iter().map(String::as_str)
    }

    /// Names bound by path segments, in template order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a request path and query against this template.
    ///
    /// On success the returned parameters hold every path parameter followed
    /// by the query parameters whose names the path did not already bind.
    pub fn matches(&self, path: &str, query: &HashMap<String, String>) -> Option<RouteParameters> {
        let mut params = RouteParameters::new();
        let mut request_segments = path.split('/');

        for segment in &self.segments {
            let actual = request_segments.next()?;
            match segment {
                Segment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), actual);
                }
            }
        }

        if request_segments.next().is_some() {
            return None;
        }

        if !self.required_query.iter().all(|name| query.contains_key(name)) {
            return None;
        }

        for (name, value) in query {
            params.insert(name.clone(), value.clone());
        }

        Some(params)
    }
}

fn parse_segment(template: &str, segment: &str) -> Result<Segment, TemplateError> {
    let has_braces = segment.contains('{') || segment.contains('}');
    if !has_braces {
        return Ok(Segment::Literal(segment.to_string()));
    }

    let inner = segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|inner| !inner.contains('{') && !inner.contains('}'))
        .ok_or_else(|| TemplateError::MalformedSegment {
            template: template.to_string(),
            segment: segment.to_string(),
        })?;

    validate_name(template, inner)?;
    Ok(Segment::Param(inner.to_string()))
}

fn validate_name(template: &str, name: &str) -> Result<(), TemplateError> {
    if name.is_empty() {
        return Err(TemplateError::EmptyParameter {
            template: template.to_string(),
        });
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TemplateError::InvalidParameterName {
            template: template.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}
