use anyhow::Result;
use std::env;

use crate::commands::{CommandContext, CommandReport};
use crate::story::store::TableStore;
use crate::story::vcs::{GitReflogReader, LastCommitReader};

mod generated_env {
    include!(concat!(env!("OUT_DIR"), "/story_env_allowlist.rs"));
}

/// `STORY_*` variables the binary reads that are set in this environment.
pub fn active_env_keys() -> Vec<&'static str> {
    generated_env::GENERATED_STORY_ENV_ALLOWLIST
        .iter()
        .copied()
        .filter(|key| env::var_os(key).is_some())
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let ctx = CommandContext::load()?;
    let cfg = &ctx.config;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("BUILD_UUID")));
    report.detail(format!("story_home={}", ctx.paths.story_home.display()));
    match &cfg.source {
        Some(source) => report.detail(format!("settings_file={}", source.display())),
        None => report.detail("settings_file=<defaults>"),
    }
    report.detail(format!("project_dir={}", cfg.project_dir.display()));
    report.detail(format!("storage_file={}", cfg.storage_file.display()));
    report.detail(format!("audit_log={}", cfg.audit_log.display()));
    report.detail(format!("ignore_subdirs={}", cfg.ignore_subdirs.join(",")));
    report.detail(format!(
        "store.load=attempts:{} backoff_ms:{}",
        cfg.store.load_max_attempts, cfg.store.load_backoff_ms
    ));
    report.detail(format!(
        "store.save=attempts:{} backoff_ms:{}",
        cfg.store.save_max_attempts, cfg.store.save_backoff_ms
    ));
    report.detail(format!("watcher.debounce_ms={}", cfg.watcher.debounce_ms));
    for key in active_env_keys() {
        report.detail(format!("env.{key}=set"));
    }

    let project_commit = GitReflogReader.last_commit_message(&cfg.project_dir);
    if let Some(message) = project_commit {
        report.detail(format!("project_last_commit={}", message.trim()));
    }

    if !cfg.storage_file.exists() {
        report.detail("storage_rows=0 (not yet written)");
        return Ok(report);
    }
    let store = TableStore::new(&cfg.storage_file, cfg.store.clone());
    match store.load() {
        Ok(table) => {
            report.detail(format!("storage_rows={}", table.len()));
            for (slug, count) in table.duplicate_slugs() {
                report.issue(format!("slug `{slug}` appears {count} times in storage"));
            }
        }
        Err(err) => report.issue(format!("load failed code={}: {err}", err.code().as_str())),
    }

    Ok(report)
}
