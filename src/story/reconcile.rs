use crate::error::{StoryError, StoryResult};
use crate::story::config::StoryConfig;
use crate::story::scan::{IgnorePolicy, ScanReport, Scanner};
use crate::story::store::{SaveReceipt, TableStore};
use crate::story::table::StoryTable;
use crate::story::vcs::{GitReflogReader, LastCommitReader};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Load/save seam of a pass.
pub trait TableStorage: Send + Sync {
    fn path(&self) -> &Path;
    fn load(&self) -> StoryResult<StoryTable>;
    fn save(&self, table: &StoryTable) -> StoryResult<SaveReceipt>;
    fn verify_nonempty(&self) -> StoryResult<bool>;
    fn discard(&self) -> StoryResult<()>;
}

impl TableStorage for TableStore {
    fn path(&self) -> &Path {
        TableStore::path(self)
    }

    fn load(&self) -> StoryResult<StoryTable> {
        TableStore::load(self)
    }

    fn save(&self, table: &StoryTable) -> StoryResult<SaveReceipt> {
        TableStore::save(self, table)
    }

    fn verify_nonempty(&self) -> StoryResult<bool> {
        TableStore::verify_nonempty(self)
    }

    fn discard(&self) -> StoryResult<()> {
        TableStore::discard(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassPhase {
    Idle,
    Loading,
    Scanning,
    Pruning,
    Sorting,
    Saving,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub storage_path: PathBuf,
    pub rows_loaded: usize,
    pub rows_saved: usize,
    pub pruned: usize,
    pub bytes_written: usize,
    pub save_attempts: u32,
    pub healed: bool,
    pub scan: ScanReport,
}

/// Runs reconciliation passes against one project root, one at a time.
pub struct Reconciler {
    project_dir: PathBuf,
    ignore: IgnorePolicy,
    storage: Box<dyn TableStorage>,
    reader: Box<dyn LastCommitReader>,
    phase: Mutex<PassPhase>,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(cfg: &StoryConfig) -> Self {
        Self::with_parts(
            cfg,
            Box::new(TableStore::new(&cfg.storage_file, cfg.store.clone())),
            Box::new(GitReflogReader),
        )
    }

    pub fn with_parts(
        cfg: &StoryConfig,
        storage: Box<dyn TableStorage>,
        reader: Box<dyn LastCommitReader>,
    ) -> Self {
        Self {
            project_dir: cfg.project_dir.clone(),
            ignore: IgnorePolicy::new(&cfg.ignore_subdirs),
            storage,
            reader,
            phase: Mutex::new(PassPhase::Idle),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> PassPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, next: PassPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*phase, to = ?next, "pass phase");
        *phase = next;
    }

    /// One full pass. Concurrent callers are serialized: a pass that starts
    /// finishes before the next one loads.
    pub fn run_pass(&self) -> StoryResult<PassOutcome> {
        let _serial = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.run_with_heal();
        match &result {
            Ok(outcome) => {
                self.enter(PassPhase::Idle);
                tracing::info!(
                    rows = outcome.rows_saved,
                    inserted = outcome.scan.inserted,
                    updated = outcome.scan.updated,
                    pruned = outcome.pruned,
                    warnings = outcome.scan.warnings.len(),
                    healed = outcome.healed,
                    "pass complete"
                );
            }
            Err(err) => {
                self.enter(PassPhase::Error);
                tracing::error!(code = err.code().as_str(), "pass failed: {err}");
            }
        }
        result
    }

    fn run_with_heal(&self) -> StoryResult<PassOutcome> {
        let outcome = self.pass_once()?;
        if self.storage.verify_nonempty()? {
            return Ok(outcome);
        }

        tracing::warn!(
            path = %self.storage.path().display(),
            "saved table is empty, discarding and re-running pass once"
        );
        self.storage.discard()?;
        let mut retried = self.pass_once()?;
        if !self.storage.verify_nonempty()? {
            self.storage.discard()?;
            return Err(StoryError::CorruptSave {
                path: self.storage.path().to_path_buf(),
            });
        }
        retried.healed = true;
        Ok(retried)
    }

    fn pass_once(&self) -> StoryResult<PassOutcome> {
        self.enter(PassPhase::Loading);
        let mut table = self.storage.load()?;
        if let Some((slug, count)) = table.duplicate_slugs().into_iter().next() {
            return Err(StoryError::AmbiguousKey { slug, count });
        }
        let rows_loaded = table.len();

        self.enter(PassPhase::Scanning);
        let scan = Scanner::new(&self.project_dir, &self.ignore, self.reader.as_ref())
            .scan(&mut table)?;

        self.enter(PassPhase::Pruning);
        let pruned = table.prune(|path| path.exists());

        self.enter(PassPhase::Sorting);
        table.sort_by_mtime_ascending();

        self.enter(PassPhase::Saving);
        let receipt = self.storage.save(&table)?;

        Ok(PassOutcome {
            storage_path: receipt.path,
            rows_loaded,
            rows_saved: table.len(),
            pruned,
            bytes_written: receipt.bytes,
            save_attempts: receipt.attempts,
            healed: false,
            scan,
        })
    }
}
