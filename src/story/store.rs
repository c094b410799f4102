use crate::error::{StoryError, StoryResult};
use crate::story::config::StoreRetryConfig;
use crate::story::table::{COLUMNS, StoryRow, StoryTable};
use crate::story::util::{Attempt, RetryError, retry_with_backoff};
use chrono::NaiveDateTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SHEET_NAME: &str = "active";

#[derive(Debug, Serialize, Deserialize)]
struct StoredSheet {
    sheet: String,
    columns: Vec<String>,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    index: usize,
    slug: Option<String>,
    category: String,
    start_date: Option<NaiveDateTime>,
    mtime: Option<NaiveDateTime>,
    status: Option<String>,
    last_commit: String,
    path: PathBuf,
}

impl StoredRow {
    fn new(index: usize, row: &StoryRow) -> Self {
        Self {
            index,
            slug: row.slug.clone(),
            category: row.category.clone(),
            start_date: row.start_date,
            mtime: row.mtime,
            status: row.status.clone(),
            last_commit: row.last_commit.clone(),
            path: row.path.clone(),
        }
    }
}

impl From<StoredRow> for StoryRow {
    fn from(stored: StoredRow) -> Self {
        Self {
            slug: stored.slug,
            category: stored.category,
            start_date: stored.start_date,
            mtime: stored.mtime,
            status: stored.status,
            last_commit: stored.last_commit,
            path: stored.path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaveReceipt {
    pub path: PathBuf,
    pub bytes: usize,
    pub attempts: u32,
}

/// A table file another process may hold open.
///
/// Readers take a shared lock and writers an exclusive one; either side
/// treats a held lock as transient and backs off.
#[derive(Debug, Clone)]
pub struct TableStore {
    path: PathBuf,
    retry: StoreRetryConfig,
}

fn is_contention(err: &io::Error) -> bool {
    if err.kind() == ErrorKind::WouldBlock {
        return true;
    }
    let contended = fs2::lock_contended_error().raw_os_error();
    if err.raw_os_error().is_some() && err.raw_os_error() == contended {
        return true;
    }
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION: the file is open in a viewer.
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

/// Stages the new contents next to `target` and renames them over it, so a
/// failed write leaves the previous file intact.
fn replace_atomically<F>(target: &Path, fill: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut staged = NamedTempFile::new_in(dir)?;
    fill(staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|err| err.error)?;
    Ok(())
}

impl TableStore {
    pub fn new(path: impl Into<PathBuf>, retry: StoreRetryConfig) -> Self {
        Self {
            path: path.into(),
            retry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: impl ToString) -> StoryError {
        StoryError::Io {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }

    /// Contention is retried; anything else ends the attempt loop.
    fn classify<T>(&self, err: io::Error) -> Attempt<T, StoryError> {
        if is_contention(&err) {
            tracing::debug!(path = %self.path.display(), error = %err, "storage lock contended");
            Attempt::Retry(StoryError::LockContention {
                path: self.path.clone(),
            })
        } else {
            Attempt::Fail(self.io_error(err))
        }
    }

    fn read_locked(&self) -> Attempt<Option<String>, StoryError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Attempt::Done(None),
            Err(err) => return self.classify(err),
        };
        if let Err(err) = FileExt::try_lock_shared(&file) {
            return self.classify(err);
        }
        let mut raw = String::new();
        let read = file.read_to_string(&mut raw);
        let _ = FileExt::unlock(&file);
        match read {
            Ok(_) => Attempt::Done(Some(raw)),
            Err(err) => self.classify(err),
        }
    }

    /// Reads the table, waiting out another process's lock.
    pub fn load(&self) -> StoryResult<StoryTable> {
        let raw = retry_with_backoff(
            self.retry.load_max_attempts,
            self.retry.load_backoff(),
            |attempt| {
                if attempt > 1 {
                    tracing::debug!(
                        path = %self.path.display(),
                        attempt,
                        "storage busy, retrying load"
                    );
                }
                self.read_locked()
            },
        )
        .map_err(|err| match err {
            RetryError::Exhausted(ex) => StoryError::LoadFailed {
                path: self.path.clone(),
                attempts: ex.attempts,
                reason: ex.last.to_string(),
            },
            RetryError::Failed(err) => err,
        })?;

        let Some(raw) = raw else {
            return Ok(StoryTable::new());
        };
        if raw.trim().is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                "storage file is empty, starting from an empty table"
            );
            return Ok(StoryTable::new());
        }
        self.decode(&raw)
    }

    fn decode(&self, raw: &str) -> StoryResult<StoryTable> {
        let sheet: StoredSheet =
            serde_json::from_str(raw).map_err(|err| StoryError::InvalidStorage {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;
        if sheet.columns != COLUMNS {
            return Err(StoryError::InvalidStorage {
                path: self.path.clone(),
                reason: format!(
                    "unexpected columns [{}], want [{}]",
                    sheet.columns.join(", "),
                    COLUMNS.join(", ")
                ),
            });
        }
        let mut rows = sheet.rows;
        rows.sort_by_key(|row| row.index);
        Ok(StoryTable::from_rows(
            rows.into_iter().map(StoryRow::from).collect(),
        ))
    }

    fn encode(&self, table: &StoryTable) -> StoryResult<Vec<u8>> {
        let sheet = StoredSheet {
            sheet: SHEET_NAME.to_string(),
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: table
                .rows()
                .iter()
                .enumerate()
                .map(|(index, row)| StoredRow::new(index, row))
                .collect(),
        };
        let mut data = serde_json::to_vec_pretty(&sheet).map_err(|err| self.io_error(err))?;
        data.push(b'\n');
        Ok(data)
    }

    fn write_locked(&self, data: &[u8]) -> Attempt<(), StoryError> {
        let file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) => return self.classify(err),
        };
        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            return self.classify(err);
        }
        let written = replace_atomically(&self.path, |staged| staged.write_all(data));
        let _ = FileExt::unlock(&file);
        match written {
            Ok(()) => Attempt::Done(()),
            Err(err) => Attempt::Fail(self.io_error(err)),
        }
    }

    /// Writes the table; the file is only replaced once the exclusive lock is held.
    pub fn save(&self, table: &StoryTable) -> StoryResult<SaveReceipt> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let data = self.encode(table)?;
        let mut attempts = 0;
        retry_with_backoff(
            self.retry.save_max_attempts,
            self.retry.save_backoff(),
            |attempt| {
                attempts = attempt;
                if attempt > 1 {
                    tracing::info!(
                        path = %self.path.display(),
                        attempt,
                        "storage locked, retrying save"
                    );
                }
                self.write_locked(&data)
            },
        )
        .map_err(|err| match err {
            RetryError::Exhausted(ex) => StoryError::SaveFailed {
                path: self.path.clone(),
                attempts: ex.attempts,
                reason: ex.last.to_string(),
            },
            RetryError::Failed(err) => StoryError::SaveFailed {
                path: self.path.clone(),
                attempts,
                reason: err.to_string(),
            },
        })?;

        Ok(SaveReceipt {
            path: self.path.clone(),
            bytes: data.len(),
            attempts,
        })
    }

    /// Post-save integrity check.
    pub fn verify_nonempty(&self) -> StoryResult<bool> {
        let meta = fs::metadata(&self.path).map_err(|err| self.io_error(err))?;
        Ok(meta.len() > 0)
    }

    pub fn discard(&self) -> StoryResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}
