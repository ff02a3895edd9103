//! Name-path patterns such as `Class/method`, `/Class/method` or `f[1]`

use once_cell::sync::Lazy;
use regex::Regex;

use super::model::Symbol;
use crate::error::{Result, SymbolsError};

static OVERLOAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)\[(\d+)\]$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    name: String,
    overload: Option<usize>,
}

impl Segment {
    fn parse(raw: &str) -> Option<Segment> {
        let (name, overload) = match OVERLOAD.captures(raw) {
            Some(captures) => (
                captures.get(1).map_or("", |m| m.as_str()),
                captures.get(2).and_then(|m| m.as_str().parse().ok()),
            ),
            None => (raw, None),
        };
        (!name.is_empty()).then(|| Segment {
            name: name.to_string(),
            overload,
        })
    }
}

/// A parsed name-path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePathPattern {
    raw: String,
    absolute: bool,
    /// Segmentations to try; more than one only for dotted patterns
    alternatives: Vec<Vec<Segment>>,
}

impl NamePathPattern {
    /// Parse a pattern
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        let invalid = || SymbolsError::InvalidArgument(format!("Invalid name path pattern '{}'", pattern));

        let absolute = trimmed.starts_with('/');
        let body = trimmed.trim_start_matches('/').trim_end_matches('/');
        if body.is_empty() {
            return Err(invalid());
        }

        let segments = body
            .split('/')
            .map(Segment::parse)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;
        let mut alternatives = vec![segments];

        if !trimmed.contains('/') && body.contains('.') {
            if let Some(dotted) = body.split('.').map(Segment::parse).collect::<Option<Vec<_>>>() {
                alternatives.push(dotted);
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            absolute,
            alternatives,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern must match from the outermost container
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Name of the final segment, used as a workspace symbol query
    pub fn last_name(&self) -> &str {
        self.alternatives
            .last()
            .and_then(|segments| segments.last())
            .map_or("", |segment| segment.name.as_str())
    }

    /// Whether `symbol` matches; with `substring` the final segment only needs
    /// to occur in the symbol's name
    pub fn matches(&self, symbol: &Symbol, substring: bool) -> bool {
        self.alternatives
            .iter()
            .any(|segments| self.matches_segments(segments, symbol, substring))
    }

    fn matches_segments(&self, segments: &[Segment], symbol: &Symbol, substring: bool) -> bool {
        let depth = symbol.container_path.len() + 1;
        if segments.len() > depth || (self.absolute && segments.len() != depth) {
            return false;
        }

        let Some((last, parents)) = segments.split_last() else {
            return false;
        };

        let offset = depth - segments.len();
        let containers_match = parents
            .iter()
            .zip(&symbol.container_path[offset..])
            .all(|(segment, name)| segment.name == *name);
        if !containers_match {
            return false;
        }

        let name_matches = if substring {
            symbol.name.contains(&last.name)
        } else {
            symbol.name == last.name
        };
        let overload_matches = last
            .overload
            .map_or(true, |index| symbol.overload_index.unwrap_or(0) == index);

        name_matches && overload_matches
    }
}
