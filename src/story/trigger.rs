//! Pass scheduling: change-event filtering and the coalescing pass queue.

use crate::error::StoryResult;
use crate::story::reconcile::PassOutcome;
use crate::story::warn::{Notifier, Severity};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Decides which filesystem events start a pass.
///
/// Only file-level writes to a repository's HEAD reflog (`.git/logs/HEAD`)
/// count. Anything touching the table file, or sitting directly in the
/// table file's directory, is rejected so a save never re-triggers itself.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    storage_file: PathBuf,
    storage_dir: Option<PathBuf>,
}

fn is_head_reflog(path: &Path) -> bool {
    let tail = path
        .components()
        .rev()
        .take(3)
        .map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect::<Vec<_>>();
    tail == [
        Some(OsStr::new("HEAD")),
        Some(OsStr::new("logs")),
        Some(OsStr::new(".git")),
    ]
}

impl ChangeFilter {
    pub fn new(storage_file: impl Into<PathBuf>) -> Self {
        let storage_file = storage_file.into();
        let storage_dir = storage_file.parent().map(Path::to_path_buf);
        Self {
            storage_file,
            storage_dir,
        }
    }

    pub fn should_trigger(&self, event: &ChangeEvent) -> bool {
        if event.is_dir {
            return false;
        }
        if event.path == self.storage_file {
            return false;
        }
        if self.storage_dir.is_some() && event.path.parent() == self.storage_dir.as_deref() {
            return false;
        }
        is_head_reflog(&event.path)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: bool,
    running: bool,
    shutdown: bool,
    requested: u64,
    coalesced: u64,
}

/// At most one pass runs and at most one more waits behind it.
#[derive(Debug, Default)]
pub struct PassQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub requested: u64,
    pub coalesced: u64,
}

impl PassQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when the request folded into an already pending pass.
    pub fn request(&self) -> bool {
        let mut state = self.state();
        state.requested += 1;
        if state.pending {
            state.coalesced += 1;
            return false;
        }
        state.pending = true;
        self.changed.notify_all();
        true
    }

    pub fn shutdown(&self) {
        let mut state = self.state();
        state.shutdown = true;
        self.changed.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        QueueStats {
            requested: state.requested,
            coalesced: state.coalesced,
        }
    }

    /// Blocks until a pass is pending; `false` once shut down.
    fn begin(&self) -> bool {
        let mut state = self.state();
        while !state.pending && !state.shutdown {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.shutdown {
            return false;
        }
        state.pending = false;
        state.running = true;
        self.changed.notify_all();
        true
    }

    fn finish(&self) {
        let mut state = self.state();
        state.running = false;
        self.changed.notify_all();
    }

    /// Waits until nothing is running or pending. `false` on timeout.
    #[cfg(test)]
    pub fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state();
        while state.pending || state.running {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Sends a finished pass's per-directory warnings to the sink.
pub fn report_outcome(notifier: &dyn Notifier, outcome: &PassOutcome) {
    for warning in &outcome.scan.warnings {
        notifier.notify(Severity::Warning, warning.code.as_str(), &warning.message);
    }
    if outcome.healed {
        notifier.notify(
            Severity::Warning,
            "E007_CORRUPT_SAVE",
            &format!(
                "{} was empty after saving and has been rebuilt",
                outcome.storage_path.display()
            ),
        );
    }
}

/// Runs queued passes until shutdown or a process-fatal error.
///
/// Non-fatal pass failures are reported and the loop waits for the next
/// trigger; the previously saved table stays in place.
pub fn run_worker<F>(queue: &PassQueue, notifier: &dyn Notifier, mut pass: F) -> StoryResult<()>
where
    F: FnMut() -> StoryResult<PassOutcome>,
{
    while queue.begin() {
        let result = pass();
        queue.finish();
        match result {
            Ok(outcome) => report_outcome(notifier, &outcome),
            Err(err) if err.is_fatal_for_process() => {
                notifier.notify(Severity::Error, err.code().as_str(), &err.to_string());
                queue.shutdown();
                return Err(err);
            }
            Err(err) => {
                notifier.notify(Severity::Error, err.code().as_str(), &err.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoryError, StoryErrorCode};
    use crate::story::scan::{ScanReport, ScanWarning};
    use crate::story::warn::testing::RecordingNotifier;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn event(kind: ChangeKind, path: &str, is_dir: bool) -> ChangeEvent {
        ChangeEvent {
            kind,
            path: PathBuf::from(path),
            is_dir,
        }
    }

    fn outcome(warnings: Vec<ScanWarning>) -> PassOutcome {
        PassOutcome {
            storage_path: PathBuf::from("/p/stories.json"),
            rows_loaded: 0,
            rows_saved: 0,
            pruned: 0,
            bytes_written: 10,
            save_attempts: 1,
            healed: false,
            scan: ScanReport {
                warnings,
                ..ScanReport::default()
            },
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn filter_accepts_head_reflog_file_events_only() {
        let filter = ChangeFilter::new("/p/stories.json");
        for kind in [
            ChangeKind::Created,
            ChangeKind::Modified,
            ChangeKind::Deleted,
            ChangeKind::Moved,
        ] {
            assert!(filter.should_trigger(&event(
                kind,
                "/p/Fiction/2023-01-05 my-story/.git/logs/HEAD",
                false
            )));
        }
        assert!(!filter.should_trigger(&event(
            ChangeKind::Modified,
            "/p/Fiction/2023-01-05 my-story/.git/logs/HEAD",
            true
        )));
        assert!(!filter.should_trigger(&event(
            ChangeKind::Modified,
            "/p/Fiction/2023-01-05 my-story/draft.md",
            false
        )));
        assert!(!filter.should_trigger(&event(
            ChangeKind::Modified,
            "/p/Fiction/story/.git/logs/refs/heads/main",
            false
        )));
        assert!(!filter.should_trigger(&event(
            ChangeKind::Modified,
            "/p/Fiction/story/logs/HEAD",
            false
        )));
    }

    #[test]
    fn filter_rejects_own_storage_writes() {
        let filter = ChangeFilter::new("/p/stories.json");
        assert!(!filter.should_trigger(&event(ChangeKind::Modified, "/p/stories.json", false)));
        assert!(!filter.should_trigger(&event(ChangeKind::Created, "/p/.stories.json.swp", false)));

        // Table file living inside a repository's log directory still never loops.
        let odd = ChangeFilter::new("/p/.git/logs/HEAD");
        assert!(!odd.should_trigger(&event(ChangeKind::Modified, "/p/.git/logs/HEAD", false)));
    }

    #[test]
    fn requests_coalesce_while_pending() {
        let queue = PassQueue::new();
        assert!(queue.request());
        assert!(!queue.request());
        assert!(!queue.request());
        assert_eq!(
            queue.stats(),
            QueueStats {
                requested: 3,
                coalesced: 2
            }
        );
    }

    #[test]
    fn burst_during_inflight_pass_runs_exactly_one_more_pass() {
        let queue = Arc::new(PassQueue::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let passes = Arc::new(AtomicUsize::new(0));

        let worker = {
            let queue = queue.clone();
            let notifier = notifier.clone();
            let passes = passes.clone();
            thread::spawn(move || {
                run_worker(&queue, notifier.as_ref(), || {
                    passes.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(150));
                    Ok(outcome(Vec::new()))
                })
            })
        };

        queue.request();
        wait_until(|| queue.is_running());
        queue.request();
        queue.request();
        assert!(queue.wait_idle(Duration::from_secs(5)));

        queue.shutdown();
        worker.join().expect("join").expect("worker");
        assert_eq!(passes.load(Ordering::SeqCst), 2);
        assert!(notifier.messages().is_empty());
    }

    #[test]
    fn save_failure_is_reported_and_loop_keeps_running() {
        let queue = Arc::new(PassQueue::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let passes = Arc::new(AtomicUsize::new(0));

        let worker = {
            let queue = queue.clone();
            let notifier = notifier.clone();
            let passes = passes.clone();
            thread::spawn(move || {
                run_worker(&queue, notifier.as_ref(), || {
                    let n = passes.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        return Err(StoryError::SaveFailed {
                            path: PathBuf::from("/p/stories.json"),
                            attempts: 5,
                            reason: "locked".to_string(),
                        });
                    }
                    Ok(outcome(vec![ScanWarning {
                        code: StoryErrorCode::E001Parse,
                        path: PathBuf::from("/p/Fiction/randomfolder"),
                        message: "cannot parse story slug".to_string(),
                    }]))
                })
            })
        };

        queue.request();
        wait_until(|| passes.load(Ordering::SeqCst) == 1);
        assert!(queue.wait_idle(Duration::from_secs(5)));
        queue.request();
        assert!(queue.wait_idle(Duration::from_secs(5)));
        queue.shutdown();
        worker.join().expect("join").expect("worker");

        let seen = notifier.messages();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, Severity::Error);
        assert_eq!(seen[0].1, "E006_SAVE_FAILED");
        assert_eq!(seen[1].0, Severity::Warning);
        assert_eq!(seen[1].1, "E001_PARSE");
    }

    #[test]
    fn fatal_error_stops_the_worker() {
        let queue = PassQueue::new();
        let notifier = RecordingNotifier::default();
        queue.request();
        let err = run_worker(&queue, &notifier, || {
            Err(StoryError::AmbiguousKey {
                slug: "dup".to_string(),
                count: 2,
            })
        })
        .expect_err("fatal");
        assert!(matches!(err, StoryError::AmbiguousKey { .. }));
        assert!(queue.is_shutdown());
        assert_eq!(notifier.messages()[0].1, "E003_AMBIGUOUS_KEY");
    }
}
