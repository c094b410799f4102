use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("cannot parse {what} from directory name `{name}`")]
    Parse { what: &'static str, name: String },
    #[error("i/o failure on {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },
    #[error("found {count} records sharing slug `{slug}`")]
    AmbiguousKey { slug: String, count: usize },
    #[error("storage file {} is locked by another process", path.display())]
    LockContention { path: PathBuf },
    #[error("gave up reading {} after {attempts} attempts: {reason}", path.display())]
    LoadFailed {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },
    #[error("gave up saving {} after {attempts} attempts: {reason}", path.display())]
    SaveFailed {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },
    #[error("saved storage file {} is empty after self-healing retry", path.display())]
    CorruptSave { path: PathBuf },
    #[error("storage file {} is invalid: {reason}", path.display())]
    InvalidStorage { path: PathBuf, reason: String },
    #[error("config invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("change watcher failed: {0}")]
    Watcher(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryErrorCode {
    E001Parse,
    E002Io,
    E003AmbiguousKey,
    E004Locked,
    E005LoadFailed,
    E006SaveFailed,
    E007CorruptSave,
    E008InvalidStorage,
    E009ConfigInvalid,
    E010WatcherFailed,
}

impl StoryErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Parse => "E001_PARSE",
            Self::E002Io => "E002_IO",
            Self::E003AmbiguousKey => "E003_AMBIGUOUS_KEY",
            Self::E004Locked => "E004_LOCKED",
            Self::E005LoadFailed => "E005_LOAD_FAILED",
            Self::E006SaveFailed => "E006_SAVE_FAILED",
            Self::E007CorruptSave => "E007_CORRUPT_SAVE",
            Self::E008InvalidStorage => "E008_INVALID_STORAGE",
            Self::E009ConfigInvalid => "E009_CONFIG_INVALID",
            Self::E010WatcherFailed => "E010_WATCHER_FAILED",
        }
    }
}

impl Serialize for StoryErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl StoryError {
    pub fn code(&self) -> StoryErrorCode {
        match self {
            Self::Parse { .. } => StoryErrorCode::E001Parse,
            Self::Io { .. } => StoryErrorCode::E002Io,
            Self::AmbiguousKey { .. } => StoryErrorCode::E003AmbiguousKey,
            Self::LockContention { .. } => StoryErrorCode::E004Locked,
            Self::LoadFailed { .. } => StoryErrorCode::E005LoadFailed,
            Self::SaveFailed { .. } => StoryErrorCode::E006SaveFailed,
            Self::CorruptSave { .. } => StoryErrorCode::E007CorruptSave,
            Self::InvalidStorage { .. } => StoryErrorCode::E008InvalidStorage,
            Self::InvalidConfig(_) => StoryErrorCode::E009ConfigInvalid,
            Self::Watcher(_) => StoryErrorCode::E010WatcherFailed,
        }
    }

    /// Errors after which the watch loop must stop instead of waiting for the
    /// next trigger. Storage contention and save failures leave the previous
    /// snapshot intact, so the loop keeps running.
    pub fn is_fatal_for_process(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousKey { .. }
                | Self::InvalidStorage { .. }
                | Self::InvalidConfig(_)
                | Self::Watcher(_)
        )
    }
}

pub type StoryResult<T> = std::result::Result<T, StoryError>;
