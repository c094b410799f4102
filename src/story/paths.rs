use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct StoryPaths {
    pub story_home: PathBuf,
    pub logs_dir: PathBuf,
    pub audit_log: PathBuf,
    pub home_config_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<StoryPaths> {
    let story_home = match env::var("STORY_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".story-index"),
    };

    let logs_dir = env_or_default_path("STORY_LOGS_DIR", story_home.join("logs"));
    let audit_log = env_or_default_path("STORY_AUDIT_LOG", logs_dir.join("audit.log"));
    let home_config_file = story_home.join("settings.toml");

    Ok(StoryPaths {
        story_home,
        logs_dir,
        audit_log,
        home_config_file,
    })
}
