//! Request matching logic.
//!
//! Matches incoming requests against mock definitions. Definitions are tried
//! in store order and the first one satisfying path, method, query and
//! conditions wins, so registration order acts as priority.

use crate::condition;
use crate::model::{MockDefinition, MockRequest};
use std::collections::BTreeMap;

/// Marker that turns a path segment into a positional parameter.
pub const PARAM_MARKER: char = ':';

/// Result of matching a request against definitions.
#[derive(Debug)]
pub struct MatchResult<'a> {
    /// The matched definition
    pub mock: &'a MockDefinition,
    /// Parameters bound by the definition's path pattern
    pub params: BTreeMap<String, String>,
}

/// Request matcher engine.
pub struct Matcher {
    /// Compiled path patterns, one per definition
    path_patterns: Vec<PathPattern>,
}

/// A definition path split into literal and parameter segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_segments(pattern)
            .map(|segment| match segment.strip_prefix(PARAM_MARKER) {
                Some(name) => PathSegment::Param(name.to_string()),
                None => PathSegment::Literal(segment.to_string()),
            })
            .collect();

        Self { segments }
    }

    /// Match a request path, returning the bound parameters.
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let actual: Vec<&str> = split_segments(path).collect();
        if actual.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                PathSegment::Literal(lit) => {
                    if lit != value {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    params.insert(name.clone(), value.to_string());
                }
            }
        }

        Some(params)
    }
}

impl Matcher {
    /// Create a new matcher from mock definitions.
    pub fn new(mocks: &[MockDefinition]) -> Self {
        let path_patterns = mocks
            .iter()
            .map(|mock| PathPattern::parse(&mock.path))
            .collect();

        Self { path_patterns }
    }

    /// Find the first matching definition for a request.
    ///
    /// `mocks` must be the slice the matcher was built from.
    pub fn find_match<'a>(
        &self,
        mocks: &'a [MockDefinition],
        request: &MockRequest,
    ) -> Option<MatchResult<'a>> {
        mocks
            .iter()
            .zip(&self.path_patterns)
            .filter(|(mock, _)| mock.active)
            .find_map(|(mock, pattern)| {
                self.matches_request(mock, pattern, request)
                    .map(|params| MatchResult { mock, params })
            })
    }

    fn matches_request(
        &self,
        mock: &MockDefinition,
        pattern: &PathPattern,
        request: &MockRequest,
    ) -> Option<BTreeMap<String, String>> {
        let params = pattern.matches(&request.path)?;

        if !mock.method.eq_ignore_ascii_case(&request.method) {
            return None;
        }

        if !self.matches_query(&mock.query_params, &request.query) {
            return None;
        }

        if !condition::all_hold(&mock.conditions, request, &params) {
            return None;
        }

        Some(params)
    }

    fn matches_query(
        &self,
        required: &BTreeMap<String, String>,
        query: &BTreeMap<String, String>,
    ) -> bool {
        required
            .iter()
            .all(|(name, value)| query.get(name) == Some(value))
    }
}
