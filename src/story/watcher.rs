//! Filesystem event source for the watch loop.
//!
//! Uses `notify` to watch the project root recursively and turns raw events
//! into [`ChangeEvent`]s before they reach the [`ChangeFilter`].

use crate::error::{StoryError, StoryResult};
use crate::story::trigger::{ChangeEvent, ChangeFilter, ChangeKind, PassQueue};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Moved),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn is_dir_event(kind: &EventKind, path: &Path) -> bool {
    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => true,
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => false,
        _ => path.is_dir(),
    }
}

pub fn translate(event: &Event) -> Vec<ChangeEvent> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .map(|path| ChangeEvent {
            kind,
            is_dir: is_dir_event(&event.kind, path),
            path: path.clone(),
        })
        .collect()
}

/// Whether one raw watcher delivery should start a pass.
///
/// Per-event errors (a directory vanishing mid-walk, a kernel queue overflow)
/// are logged and skipped; the next reflog write triggers a pass as usual.
pub fn accepts(filter: &ChangeFilter, result: notify::Result<Event>) -> bool {
    let event = match result {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(
                error = %err,
                paths = ?err.paths,
                "watcher reported an error, skipping event"
            );
            return false;
        }
    };
    translate(&event).iter().any(|change| {
        let hit = filter.should_trigger(change);
        if hit {
            tracing::debug!(
                path = %change.path.display(),
                kind = ?change.kind,
                "change accepted"
            );
        }
        hit
    })
}

/// Blocks, feeding accepted events into `queue` until the queue shuts down.
/// Only a failure to set up the watcher or a closed event channel is an error.
///
/// Accepted events are debounced: after the first one, further events are
/// drained for `debounce` before a single pass is requested.
pub fn run_event_loop(
    root: &Path,
    filter: &ChangeFilter,
    debounce: Duration,
    queue: &PassQueue,
) -> StoryResult<()> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(
        move |result| {
            let _ = tx.send(result);
        },
        NotifyConfig::default(),
    )
    .map_err(|err| StoryError::Watcher(err.to_string()))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|err| StoryError::Watcher(format!("watch {}: {err}", root.display())))?;
    tracing::info!(root = %root.display(), "watching for reflog changes");

    while !queue.is_shutdown() {
        let first = match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(StoryError::Watcher("event channel closed".to_string()));
            }
        };
        if !accepts(filter, first) {
            continue;
        }

        let settle_until = Instant::now() + debounce;
        loop {
            let now = Instant::now();
            if now >= settle_until {
                break;
            }
            match rx.recv_timeout(settle_until - now) {
                Ok(result) => {
                    accepts(filter, result);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(StoryError::Watcher("event channel closed".to_string()));
                }
            }
        }
        if !queue.request() {
            tracing::debug!("pass already pending, request coalesced");
        }
    }
    Ok(())
}
