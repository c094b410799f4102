use crate::error::{StoryError, StoryErrorCode, StoryResult};
use crate::story::extract::{
    derive_last_commit, derive_mtime, derive_slug, derive_status, start_date_or_created,
};
use crate::story::table::{StoryRow, StoryTable, UpsertOutcome};
use crate::story::vcs::LastCommitReader;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory names the scanner skips at both levels.
#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    names: Vec<String>,
    globs: GlobSet,
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '[', '{'])
}

impl IgnorePolicy {
    pub fn new(entries: &[String]) -> Self {
        let mut names = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            if is_glob(entry) {
                match GlobBuilder::new(entry).case_insensitive(true).build() {
                    Ok(glob) => {
                        builder.add(glob);
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(
                            pattern = entry,
                            error = %err,
                            "invalid ignore pattern, matching it literally"
                        );
                    }
                }
            }
            names.push(entry.to_lowercase());
        }
        let globs = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self { names, globs }
    }

    pub fn is_ignored(&self, dir_name: &str) -> bool {
        if dir_name.starts_with('.') {
            return true;
        }
        let lowered = dir_name.to_lowercase();
        self.names.iter().any(|name| *name == lowered) || self.globs.is_match(dir_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanWarning {
    pub code: StoryErrorCode,
    pub path: PathBuf,
    pub message: String,
}

impl ScanWarning {
    fn from_error(path: &Path, err: &StoryError) -> Self {
        Self {
            code: err.code(),
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub categories: usize,
    pub stories: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    fn warn(&mut self, path: &Path, err: &StoryError) {
        tracing::warn!(path = %path.display(), code = err.code().as_str(), "{err}");
        self.warnings.push(ScanWarning::from_error(path, err));
    }
}

/// Directory entries of `dir` that are themselves directories, sorted by name.
fn child_dirs(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            tracing::debug!(path = %path.display(), "skipping non UTF-8 directory name");
            continue;
        };
        out.push((name, path));
    }
    out.sort();
    Ok(out)
}

/// Walks `root/<category>/<story>` and upserts one row per story directory.
pub struct Scanner<'a> {
    root: &'a Path,
    ignore: &'a IgnorePolicy,
    reader: &'a dyn LastCommitReader,
}

impl<'a> Scanner<'a> {
    pub fn new(root: &'a Path, ignore: &'a IgnorePolicy, reader: &'a dyn LastCommitReader) -> Self {
        Self {
            root,
            ignore,
            reader,
        }
    }

    pub fn scan(&self, table: &mut StoryTable) -> StoryResult<ScanReport> {
        let mut report = ScanReport::default();
        let categories = child_dirs(self.root).map_err(|err| StoryError::Io {
            path: self.root.to_path_buf(),
            reason: err.to_string(),
        })?;

        for (category, category_path) in categories {
            if self.ignore.is_ignored(&category) {
                continue;
            }
            report.categories += 1;
            let stories = match child_dirs(&category_path) {
                Ok(stories) => stories,
                Err(err) => {
                    let err = StoryError::Io {
                        path: category_path.clone(),
                        reason: err.to_string(),
                    };
                    report.warn(&category_path, &err);
                    continue;
                }
            };

            for (story, story_path) in stories {
                if self.ignore.is_ignored(&story) {
                    continue;
                }
                report.stories += 1;
                let Some(row) = self.extract_row(&category, &story, &story_path, &mut report)
                else {
                    report.skipped += 1;
                    continue;
                };
                match table.upsert(row)? {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                }
            }
        }

        Ok(report)
    }

    /// `None` when the directory's metadata could not be read this pass.
    fn extract_row(
        &self,
        category: &str,
        story: &str,
        story_path: &Path,
        report: &mut ScanReport,
    ) -> Option<StoryRow> {
        let slug = derive_slug(story)
            .map_err(|err| report.warn(story_path, &err))
            .ok();
        let start_date = match start_date_or_created(story, story_path) {
            Ok(at) => Some(at),
            // The slug warning already covers a name without a date token.
            Err(_) if slug.is_none() => None,
            Err(err) => {
                report.warn(story_path, &err);
                None
            }
        };
        let mtime = derive_mtime(story_path)
            .map_err(|err| report.warn(story_path, &err))
            .ok()?;
        let status = derive_status(story_path)
            .map_err(|err| report.warn(story_path, &err))
            .ok()?;

        Some(StoryRow {
            slug,
            category: category.to_string(),
            start_date,
            mtime: Some(mtime),
            status,
            last_commit: derive_last_commit(story_path, self.reader),
            path: story_path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::vcs::NOT_A_REPOSITORY;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    struct NoRepo;

    impl LastCommitReader for NoRepo {
        fn last_commit_message(&self, _dir: &Path) -> Option<String> {
            None
        }
    }

    fn story(root: &Path, category: &str, name: &str) -> PathBuf {
        let dir = root.join(category).join(name);
        fs::create_dir_all(&dir).expect("mkdir story");
        fs::write(dir.join("draft.md"), name).expect("write draft");
        dir
    }

    #[test]
    fn ignore_policy_matches_dot_prefix_names_and_globs() {
        let policy = IgnorePolicy::new(&[
            "Archive".to_string(),
            "tmp-*".to_string(),
            " ".to_string(),
        ]);
        assert!(policy.is_ignored(".git"));
        assert!(policy.is_ignored("archive"));
        assert!(policy.is_ignored("ARCHIVE"));
        assert!(policy.is_ignored("TMP-scratch"));
        assert!(!policy.is_ignored("Archives"));
        assert!(!policy.is_ignored("Fiction"));
    }

    #[test]
    fn scan_visits_exactly_two_levels() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        let mine = story(root, "Fiction", "2023-01-05 my-story");
        fs::create_dir_all(mine.join("2023-02-02 nested-not-a-story")).expect("mkdir nested");
        fs::write(root.join("stray.txt"), "x").expect("stray file");
        fs::write(root.join("Fiction").join("notes.txt"), "x").expect("stray file");

        let ignore = IgnorePolicy::new(&[]);
        let mut table = StoryTable::new();
        let report = Scanner::new(root, &ignore, &NoRepo)
            .scan(&mut table)
            .expect("scan");

        assert_eq!(report.categories, 1);
        assert_eq!(report.stories, 1);
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.slug.as_deref(), Some("my-story"));
        assert_eq!(row.category, "Fiction");
        assert_eq!(row.last_commit, NOT_A_REPOSITORY);
        assert_eq!(row.path, mine);
    }

    #[test]
    fn ignored_directories_are_skipped_at_both_levels() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        story(root, "Archive", "2020-01-01 old");
        story(root, ".hidden", "2020-01-01 secret");
        story(root, "Fiction", "2021-01-01 kept");
        story(root, "Fiction", "templates");
        story(root, "Fiction", ".draft-cache");

        let ignore = IgnorePolicy::new(&["archive".to_string(), "Templates".to_string()]);
        let mut table = StoryTable::new();
        let report = Scanner::new(root, &ignore, &NoRepo)
            .scan(&mut table)
            .expect("scan");

        assert_eq!(report.stories, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].slug.as_deref(), Some("kept"));
    }

    #[test]
    fn undated_directory_gets_null_slug_and_warning() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        story(root, "Fiction", "randomfolder");
        story(root, "Fiction", "2023-01-05 fine");

        let ignore = IgnorePolicy::new(&[]);
        let mut table = StoryTable::new();
        let report = Scanner::new(root, &ignore, &NoRepo)
            .scan(&mut table)
            .expect("scan");

        assert_eq!(table.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, StoryErrorCode::E001Parse);
        assert!(table.rows().iter().any(|r| r.slug.is_none()));
        assert!(table.contains("fine"));
    }

    #[test]
    fn empty_story_directory_is_skipped_without_aborting_siblings() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("Fiction").join("2023-01-01 empty")).expect("mkdir");
        story(root, "Fiction", "2023-01-02 full");

        let ignore = IgnorePolicy::new(&[]);
        let mut table = StoryTable::new();
        let report = Scanner::new(root, &ignore, &NoRepo)
            .scan(&mut table)
            .expect("scan");

        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.warnings[0].code, StoryErrorCode::E002Io);
        assert!(table.contains("full"));
    }

    #[test]
    fn rescan_updates_rows_in_place() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        let dir = story(root, "Fiction", "2023-01-05 my-story");
        let ignore = IgnorePolicy::new(&[]);
        let mut table = StoryTable::new();
        Scanner::new(root, &ignore, &NoRepo)
            .scan(&mut table)
            .expect("first scan");

        fs::write(dir.join(".status"), "revising").expect("status");
        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(dir.join("draft.md"))
            .expect("open")
            .set_modified(later)
            .expect("touch");
        let report = Scanner::new(root, &ignore, &NoRepo)
            .scan(&mut table)
            .expect("second scan");

        assert_eq!(report.updated, 1);
        assert_eq!(table.len(), 1);
        let row = table.get("my-story").expect("lookup").expect("row");
        assert_eq!(row.status.as_deref(), Some("revising"));
    }
}
