//! Positions in source files and the sources they refer to.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::Rejection;

/// Identity of a [`Source`] within one debugging target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A position in a source file.
///
/// Locations are plain values: two locations are equal iff every field matches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub source_id: SourceId,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Location {
    pub fn new(source_id: impl Into<SourceId>, line: u32) -> Self {
        Self {
            source_id: source_id.into(),
            line,
            column: None,
        }
    }

    pub fn with_column(self, column: u32) -> Self {
        Self {
            column: Some(column),
            ..self
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.source_id, self.line, column),
            None => write!(f, "{}:{}", self.source_id, self.line),
        }
    }
}

/// Classification attached to a source by static analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Framework the source was detected to belong to, e.g. "React"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: SourceId,
    pub url: String,
    #[serde(default)]
    pub is_black_boxed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SourceMetadata>,
}

impl Source {
    pub fn new(id: impl Into<SourceId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            is_black_boxed: false,
            metadata: None,
        }
    }
}

/// Where the user is looking, either resolved to a known source or waiting for
/// a source with the given url to be discovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Selection {
    Resolved {
        source_id: SourceId,
        line: Option<u32>,
    },
    Pending {
        url: String,
        line: Option<u32>,
    },
}

/// All sources discovered for the current target
#[derive(Debug, Clone, Default)]
pub struct Sources {
    sources: BTreeMap<SourceId, Source>,
    selection: Option<Selection>,
}

impl Sources {
    pub fn get(&self, id: &SourceId) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.sources.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn find_by_url(&self, url: &str) -> Option<&Source> {
        self.sources.values().find(|s| s.url == url)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Record a newly discovered source, returning true if it was not known before.
    ///
    /// A rediscovered source keeps the blackbox flag and metadata it already had.
    pub(crate) fn insert(&mut self, source: Source) -> bool {
        let is_new = match self.sources.get_mut(&source.id) {
            Some(existing) => {
                existing.url = source.url.clone();
                false
            }
            None => {
                self.sources.insert(source.id.clone(), source.clone());
                true
            }
        };

        if let Some(Selection::Pending { url, line }) = &self.selection {
            if *url == source.url {
                tracing::debug!(source_id = %source.id, %url, "resolved pending selection");
                self.selection = Some(Selection::Resolved {
                    source_id: source.id,
                    line: *line,
                });
            }
        }
        is_new
    }

    pub(crate) fn update(&mut self, source: Source) -> Result<(), Rejection> {
        let existing = self
            .sources
            .get_mut(&source.id)
            .ok_or_else(|| Rejection::UnknownSource(source.id.clone()))?;
        *existing = source;
        Ok(())
    }

    pub(crate) fn set_metadata(
        &mut self,
        id: &SourceId,
        metadata: SourceMetadata,
    ) -> Result<(), Rejection> {
        let source = self
            .sources
            .get_mut(id)
            .ok_or_else(|| Rejection::UnknownSource(id.clone()))?;
        source.metadata = Some(metadata);
        Ok(())
    }

    pub(crate) fn set_black_boxed(&mut self, id: &SourceId, black_boxed: bool) -> bool {
        match self.sources.get_mut(id) {
            Some(source) => {
                source.is_black_boxed = black_boxed;
                true
            }
            None => false,
        }
    }

    pub(crate) fn select_url(&mut self, url: impl Into<String>, line: Option<u32>) {
        let url = url.into();
        self.selection = Some(match self.find_by_url(&url) {
            Some(source) => Selection::Resolved {
                source_id: source.id.clone(),
                line,
            },
            None => Selection::Pending { url, line },
        });
    }

    pub(crate) fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Drop every source of the previous target.
    ///
    /// A resolved selection is turned back into a pending one keyed by url so it
    /// can be re-resolved against the new target.
    pub(crate) fn supersede(&mut self) {
        if let Some(Selection::Resolved { source_id, line }) = &self.selection {
            self.selection = self.sources.get(source_id).map(|s| Selection::Pending {
                url: s.url.clone(),
                line: *line,
            });
        }
        self.sources.clear();
    }
}
