use crate::error::{StoryError, StoryResult};
use crate::story::vcs::{LastCommitReader, NOT_A_REPOSITORY};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::OnceLock;
use std::time::SystemTime;
use walkdir::WalkDir;

pub const STATUS_FILE: &str = ".status";

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}\s(?P<rest>.*)").expect("slug pattern is valid")
    })
}

fn start_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<date>\d{4}-\d{2}-\d{2})\s+\w").expect("start date pattern is valid")
    })
}

fn parse_error(what: &'static str, name: &str) -> StoryError {
    StoryError::Parse {
        what,
        name: name.to_string(),
    }
}

fn io_error(path: &Path, reason: impl ToString) -> StoryError {
    StoryError::Io {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn local_naive(at: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(at).naive_local()
}

/// `"2023-01-05 my-story"` -> `"my-story"`.
pub fn derive_slug(dir_name: &str) -> StoryResult<String> {
    let rest = slug_pattern()
        .captures(dir_name)
        .and_then(|caps| caps.name("rest"))
        .map(|m| m.as_str().trim())
        .unwrap_or_default();
    if rest.is_empty() {
        return Err(parse_error("story slug", dir_name));
    }
    Ok(rest.to_string())
}

pub fn derive_start_date(dir_name: &str) -> StoryResult<NaiveDate> {
    let token = start_date_pattern()
        .captures(dir_name)
        .and_then(|caps| caps.name("date"))
        .ok_or_else(|| parse_error("start date", dir_name))?;
    NaiveDate::parse_from_str(token.as_str(), "%Y-%m-%d")
        .map_err(|_| parse_error("start date", dir_name))
}

pub fn created_at(dir_path: &Path) -> StoryResult<NaiveDateTime> {
    let meta = fs::metadata(dir_path).map_err(|err| io_error(dir_path, err))?;
    let created = meta.created().map_err(|err| io_error(dir_path, err))?;
    Ok(local_naive(created))
}

/// Name first, filesystem creation time when the name carries no usable date.
pub fn start_date_or_created(dir_name: &str, dir_path: &Path) -> StoryResult<NaiveDateTime> {
    match derive_start_date(dir_name) {
        Ok(date) => Ok(date.and_time(chrono::NaiveTime::MIN)),
        Err(parse_err) => created_at(dir_path).map_err(|_| parse_err),
    }
}

/// Latest modification time of any file below `dir_path`, at any depth.
pub fn derive_mtime(dir_path: &Path) -> StoryResult<NaiveDateTime> {
    let mut latest: Option<SystemTime> = None;
    for entry in WalkDir::new(dir_path).follow_links(false) {
        let entry = entry.map_err(|err| io_error(dir_path, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .map_err(|err| io_error(entry.path(), err))?
            .modified()
            .map_err(|err| io_error(entry.path(), err))?;
        if latest.is_none_or(|best| modified > best) {
            latest = Some(modified);
        }
    }
    latest
        .map(local_naive)
        .ok_or_else(|| io_error(dir_path, "directory contains no files"))
}

pub fn derive_status(dir_path: &Path) -> StoryResult<Option<String>> {
    let status_path = dir_path.join(STATUS_FILE);
    match fs::read_to_string(&status_path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(&status_path, err)),
    }
}

pub fn derive_last_commit(dir_path: &Path, reader: &dyn LastCommitReader) -> String {
    reader
        .last_commit_message(dir_path)
        .unwrap_or_else(|| NOT_A_REPOSITORY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set_mtime(path: &Path, at: SystemTime) {
        let file = fs::File::options().write(true).open(path).expect("open");
        file.set_modified(at).expect("set mtime");
    }

    struct FixedReader(Option<&'static str>);

    impl LastCommitReader for FixedReader {
        fn last_commit_message(&self, _dir: &Path) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn slug_is_trimmed_remainder_after_date() {
        assert_eq!(derive_slug("2023-01-05 my-story").expect("slug"), "my-story");
        assert_eq!(
            derive_slug("2023-01-05   spaced out  ").expect("slug"),
            "spaced out"
        );
        assert_eq!(
            derive_slug("draft 2021-12-31 late-entry").expect("slug"),
            "late-entry"
        );
    }

    #[test]
    fn slug_without_date_token_is_parse_error() {
        for name in ["randomfolder", "2023-01-05", "2023-01-05 ", "23-01-05 short"] {
            let err = derive_slug(name).expect_err(name);
            assert!(matches!(err, StoryError::Parse { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn start_date_requires_valid_calendar_date() {
        assert_eq!(
            derive_start_date("2023-01-05 my-story").expect("date"),
            NaiveDate::from_ymd_opt(2023, 1, 5).expect("ymd")
        );
        assert!(derive_start_date("2023-13-45 bogus").is_err());
        assert!(derive_start_date("randomfolder").is_err());
    }

    #[test]
    fn start_date_falls_back_to_creation_time() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("randomfolder");
        fs::create_dir(&dir).expect("mkdir");

        let named = start_date_or_created("2020-02-29 leap", &dir).expect("named");
        assert_eq!(named.date(), NaiveDate::from_ymd_opt(2020, 2, 29).expect("ymd"));

        // Some filesystems do not record birth time; then the parse error surfaces.
        match start_date_or_created("randomfolder", &dir) {
            Ok(created) => assert!(created.and_utc().timestamp() > 0),
            Err(err) => assert!(matches!(err, StoryError::Parse { .. })),
        }
    }

    #[test]
    fn mtime_is_max_over_nested_files() {
        let tmp = tempdir().expect("tempdir");
        let story = tmp.path().join("story");
        fs::create_dir_all(story.join("chapters/drafts")).expect("mkdir");
        let old = story.join("outline.md");
        let newest = story.join("chapters/drafts/ch1.md");
        fs::write(&old, "outline").expect("write");
        fs::write(&newest, "chapter").expect("write");

        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let t2 = t1 + Duration::from_secs(3_600);
        set_mtime(&old, t1);
        set_mtime(&newest, t2);

        assert_eq!(derive_mtime(&story).expect("mtime"), local_naive(t2));
    }

    #[test]
    fn mtime_of_empty_directory_is_io_error() {
        let tmp = tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("empty/nested")).expect("mkdir");
        let err = derive_mtime(&tmp.path().join("empty")).expect_err("no files");
        assert!(matches!(err, StoryError::Io { .. }));

        let missing = derive_mtime(&PathBuf::from("/definitely/not/here")).expect_err("missing");
        assert!(matches!(missing, StoryError::Io { .. }));
    }

    #[test]
    fn status_is_optional_sidecar_content() {
        let tmp = tempdir().expect("tempdir");
        assert_eq!(derive_status(tmp.path()).expect("status"), None);
        fs::write(tmp.path().join(STATUS_FILE), "drafting").expect("write");
        assert_eq!(
            derive_status(tmp.path()).expect("status"),
            Some("drafting".to_string())
        );
    }

    #[test]
    fn last_commit_uses_sentinel_outside_repositories() {
        let dir = Path::new("/tmp");
        assert_eq!(derive_last_commit(dir, &FixedReader(None)), NOT_A_REPOSITORY);
        assert_eq!(
            derive_last_commit(dir, &FixedReader(Some("commit: tighten intro"))),
            "commit: tighten intro"
        );
    }
}
