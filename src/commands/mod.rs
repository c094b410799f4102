pub mod list;
pub mod status;
pub mod sync;
pub mod watch;

use crate::story::config::{StoryConfig, load_config};
use crate::story::paths::{StoryPaths, resolve_paths};
use crate::story::warn::StderrNotifier;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Paths and settings every command starts from.
pub struct CommandContext {
    pub paths: StoryPaths,
    pub config: StoryConfig,
}

impl CommandContext {
    pub fn load() -> Result<Self> {
        let paths = resolve_paths()?;
        let config = load_config(&paths)?;
        Ok(Self { paths, config })
    }

    pub fn notifier(&self) -> StderrNotifier {
        StderrNotifier::new(Some(self.config.audit_log.clone()))
    }
}
