use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(story_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(story_home) = story_home {
        return Some(story_home.join(".env"));
    }
    Some(home_dir?.join(".story-index/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("STORY_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_prefers_story_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/workspace/story")),
            Some(PathBuf::from("/home/alice")),
        );

        let want = Some(PathBuf::from("/workspace/story/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn fallback_uses_dot_dir_in_home_when_story_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        let want = Some(PathBuf::from("/home/alice/.story-index/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn no_fallback_without_any_home() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
