//! Where crawlrag stores its own data (config, snapshot).
//!
//! Crawled pages stay in the folder the crawler writes to. We only store app state here.

use std::path::PathBuf;

/// Returns the directory where crawlrag stores config, snapshot, and other app data.
/// On Linux: `~/.local/share/crawlrag/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("dev", "crawlrag", "crawlrag")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_is_some() {
        assert!(app_data_dir().is_some());
    }
}
