use crate::error::StoryError;
use crate::story::paths::StoryPaths;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STORAGE_FILE: &str = "stories.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    /// Attempts to take a read lock before giving up; 0 waits forever.
    pub load_max_attempts: u32,
    pub load_backoff_ms: u64,
    pub save_max_attempts: u32,
    pub save_backoff_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            load_max_attempts: 120,
            load_backoff_ms: 500,
            save_max_attempts: 5,
            save_backoff_ms: 1_000,
        }
    }
}

impl StoreRetryConfig {
    pub fn load_backoff(&self) -> Duration {
        Duration::from_millis(self.load_backoff_ms)
    }

    pub fn save_backoff(&self) -> Duration {
        Duration::from_millis(self.save_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryWatcherConfig {
    pub debounce_ms: u64,
}

impl Default for StoryWatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl StoryWatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Settings resolved once at startup and passed by reference afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct StoryConfig {
    pub project_dir: PathBuf,
    pub ignore_subdirs: Vec<String>,
    pub storage_file: PathBuf,
    pub audit_log: PathBuf,
    pub store: StoreRetryConfig,
    pub watcher: StoryWatcherConfig,
    pub source: Option<PathBuf>,
}

impl StoryConfig {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            storage_file: project_dir.join(DEFAULT_STORAGE_FILE),
            audit_log: project_dir.join(".story-index").join("audit.log"),
            project_dir,
            ignore_subdirs: Vec::new(),
            store: StoreRetryConfig::default(),
            watcher: StoryWatcherConfig::default(),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStoryConfig {
    project_dir: Option<PathBuf>,
    ignore_subdirs: Option<Vec<String>>,
    storage_file: Option<PathBuf>,
    audit_log: Option<PathBuf>,
    store: Option<StoreRetryConfig>,
    watcher: Option<StoryWatcherConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>(),
        Err(_) => fallback.to_vec(),
    }
}

fn parse_partial(raw: &str, path: &Path) -> Result<PartialStoryConfig> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        return json5::from_str(raw)
            .map_err(|err| anyhow!("failed to parse settings {}: {err}", path.display()));
    }
    toml::from_str(raw).map_err(|err| anyhow!("failed to parse settings {}: {err}", path.display()))
}

fn resolve_config_path(paths: &StoryPaths) -> Option<PathBuf> {
    if let Some(custom) = env_path("STORY_CONFIG_PATH") {
        return Some(custom);
    }

    ["settings.toml", "settings.json"]
        .iter()
        .map(PathBuf::from)
        .chain(std::iter::once(paths.home_config_file.clone()))
        .find(|candidate| candidate.is_file())
}

/// Relative paths in a settings file are resolved against `base`.
fn anchor(path: PathBuf, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn build(
    partial: PartialStoryConfig,
    source: Option<PathBuf>,
    paths: &StoryPaths,
) -> Result<StoryConfig> {
    let project_dir = env_path("STORY_PROJECT_DIR")
        .or(partial.project_dir)
        .ok_or_else(|| {
            StoryError::InvalidConfig(
                "project_dir is required (settings file or STORY_PROJECT_DIR)".to_string(),
            )
        })?;

    let mut cfg = StoryConfig::new(project_dir);
    cfg.source = source;
    cfg.audit_log = paths.audit_log.clone();
    if let Some(ignore) = partial.ignore_subdirs {
        cfg.ignore_subdirs = ignore;
    }
    if let Some(store) = partial.store {
        cfg.store = store;
    }
    if let Some(watcher) = partial.watcher {
        cfg.watcher = watcher;
    }
    if let Some(storage) = partial.storage_file {
        cfg.storage_file = anchor(storage, &cfg.project_dir);
    }
    if let Some(audit) = partial.audit_log {
        cfg.audit_log = audit;
    }

    cfg.ignore_subdirs = env_or_csv("STORY_IGNORE_SUBDIRS", &cfg.ignore_subdirs);
    if let Some(storage) = env_path("STORY_STORAGE_FILE") {
        cfg.storage_file = anchor(storage, &cfg.project_dir);
    }
    cfg.store.load_max_attempts =
        env_or_u32("STORY_LOAD_MAX_ATTEMPTS", cfg.store.load_max_attempts);
    cfg.store.load_backoff_ms = env_or_u64("STORY_LOAD_BACKOFF_MS", cfg.store.load_backoff_ms);
    cfg.store.save_max_attempts =
        env_or_u32("STORY_SAVE_MAX_ATTEMPTS", cfg.store.save_max_attempts);
    cfg.store.save_backoff_ms = env_or_u64("STORY_SAVE_BACKOFF_MS", cfg.store.save_backoff_ms);
    cfg.watcher.debounce_ms = env_or_u64("STORY_DEBOUNCE_MS", cfg.watcher.debounce_ms);

    Ok(cfg)
}

pub fn validate(cfg: &StoryConfig) -> Result<()> {
    if !cfg.project_dir.is_dir() {
        return Err(StoryError::InvalidConfig(format!(
            "project_dir is not a directory: {}",
            cfg.project_dir.display()
        ))
        .into());
    }
    if cfg.store.save_max_attempts == 0 {
        return Err(StoryError::InvalidConfig("save_max_attempts must be >= 1".to_string()).into());
    }
    if cfg.store.save_backoff_ms == 0 || cfg.store.load_backoff_ms == 0 {
        return Err(
            StoryError::InvalidConfig("store backoff must be >= 1 millisecond".to_string()).into(),
        );
    }
    if cfg.storage_file.file_name().is_none() {
        return Err(StoryError::InvalidConfig(format!(
            "storage_file has no file name: {}",
            cfg.storage_file.display()
        ))
        .into());
    }
    Ok(())
}

pub fn load_config(paths: &StoryPaths) -> Result<StoryConfig> {
    let (partial, source) = match resolve_config_path(paths) {
        Some(path) if path.exists() => {
            let raw = fs::read_to_string(&path)
                .map_err(|err| anyhow!("failed to read settings {}: {err}", path.display()))?;
            (parse_partial(&raw, &path)?, Some(path))
        }
        _ => (PartialStoryConfig::default(), None),
    };

    let cfg = build(partial, source, paths)?;
    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn toml_settings_parse_with_nested_tables() {
        let raw = r#"
project_dir = "/srv/stories"
ignore_subdirs = ["Archive", "templates"]
storage_file = "index/stories.json"

[store]
load_max_attempts = 0
load_backoff_ms = 250
save_max_attempts = 3
save_backoff_ms = 100
"#;
        let parsed = parse_partial(raw, Path::new("settings.toml")).expect("parse");
        assert_eq!(parsed.project_dir, Some(PathBuf::from("/srv/stories")));
        assert_eq!(
            parsed.ignore_subdirs,
            Some(vec!["Archive".to_string(), "templates".to_string()])
        );
        let store = parsed.store.expect("store");
        assert_eq!(store.load_max_attempts, 0);
        assert_eq!(store.save_max_attempts, 3);
    }

    #[test]
    fn legacy_json_settings_are_accepted() {
        let raw = r#"{
            // written by the old tool
            "project_dir": "/srv/stories",
            "ignore_subdirs": ["old"],
        }"#;
        let parsed = parse_partial(raw, Path::new("settings.json")).expect("parse");
        assert_eq!(parsed.project_dir, Some(PathBuf::from("/srv/stories")));
        assert_eq!(parsed.ignore_subdirs, Some(vec!["old".to_string()]));
    }

    #[test]
    fn relative_storage_file_is_anchored_to_project_dir() {
        let got = anchor(PathBuf::from("out/stories.json"), Path::new("/srv/p"));
        assert_eq!(got, PathBuf::from("/srv/p/out/stories.json"));
        let abs = anchor(PathBuf::from("/var/stories.json"), Path::new("/srv/p"));
        assert_eq!(abs, PathBuf::from("/var/stories.json"));
    }

    #[test]
    fn validate_rejects_missing_project_dir() {
        let tmp = tempdir().expect("tempdir");
        let cfg = StoryConfig::new(tmp.path().join("missing"));
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_zero_save_attempts() {
        let tmp = tempdir().expect("tempdir");
        let mut cfg = StoryConfig::new(tmp.path());
        cfg.store.save_max_attempts = 0;
        assert!(validate(&cfg).is_err());
        cfg.store.save_max_attempts = 1;
        assert!(validate(&cfg).is_ok());
    }
}
