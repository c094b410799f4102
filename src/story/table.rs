use crate::error::{StoryError, StoryResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const COLUMNS: [&str; 7] = [
    "slug",
    "category",
    "start_date",
    "mtime",
    "status",
    "last_commit",
    "path",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRow {
    pub slug: Option<String>,
    pub category: String,
    pub start_date: Option<NaiveDateTime>,
    pub mtime: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub last_commit: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Rows keyed by slug, in insertion (or last sort) order.
///
/// Rows without a slug cannot be matched by key, so they are matched by
/// `path` among the other slug-less rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoryTable {
    rows: Vec<StoryRow>,
}

impl StoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<StoryRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[StoryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn matching_indices(&self, row: &StoryRow) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, existing)| match (&row.slug, &existing.slug) {
                (Some(wanted), Some(have)) => wanted == have,
                (None, None) => existing.path == row.path,
                _ => false,
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.rows
            .iter()
            .any(|row| row.slug.as_deref() == Some(slug))
    }

    pub fn index_of(&self, slug: &str) -> StoryResult<Option<usize>> {
        let hits = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.slug.as_deref() == Some(slug))
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        match hits.as_slice() {
            [] => Ok(None),
            [idx] => Ok(Some(*idx)),
            _ => Err(StoryError::AmbiguousKey {
                slug: slug.to_string(),
                count: hits.len(),
            }),
        }
    }

    pub fn get(&self, slug: &str) -> StoryResult<Option<&StoryRow>> {
        Ok(self.index_of(slug)?.map(|idx| &self.rows[idx]))
    }

    pub fn upsert(&mut self, row: StoryRow) -> StoryResult<UpsertOutcome> {
        let hits = self.matching_indices(&row);
        match hits.as_slice() {
            [] => {
                self.rows.push(row);
                Ok(UpsertOutcome::Inserted)
            }
            [idx] => {
                self.rows[*idx] = row;
                Ok(UpsertOutcome::Updated)
            }
            _ => Err(StoryError::AmbiguousKey {
                slug: row
                    .slug
                    .unwrap_or_else(|| format!("<none> at {}", row.path.display())),
                count: hits.len(),
            }),
        }
    }

    /// Keeps only rows for which `alive(path)` holds; returns how many were dropped.
    pub fn prune<F>(&mut self, mut alive: F) -> usize
    where
        F: FnMut(&Path) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| alive(&row.path));
        before - self.rows.len()
    }

    /// Stable; rows without an mtime sort first.
    pub fn sort_by_mtime_ascending(&mut self) {
        self.rows.sort_by(|a, b| a.mtime.cmp(&b.mtime));
    }

    pub fn duplicate_slugs(&self) -> Vec<(String, usize)> {
        let mut counts = BTreeMap::<&str, usize>::new();
        for slug in self.rows.iter().filter_map(|row| row.slug.as_deref()) {
            *counts.entry(slug).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(slug, count)| (slug.to_string(), count))
            .collect()
    }
}
