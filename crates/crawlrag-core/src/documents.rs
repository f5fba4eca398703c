//! Discovering and parsing crawled pages from the crawler's output directory.
//!
//! Each page is a `.md`, `.markdown` or `.txt` file, optionally starting with
//! YAML front matter that carries the page `url` and `title`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::validate::is_valid_url;

const EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// A crawled page we found: where it came from and its text.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// Page URL from front matter, else the path relative to the scan root.
    pub source_id: String,
    pub title: Option<String>,
    /// Content without front matter.
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    url: Option<String>,
    title: Option<String>,
}

/// Scans `root` for crawled pages and returns them sorted by path.
/// Does not follow symlinks into directories (walkdir default).
pub fn scan_documents(root: &Path) -> Result<Vec<Document>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| ScanError::Walk(e.to_string()))?;
        let path = entry.path();
        if has_page_extension(path) && path.is_file() {
            let raw = std::fs::read_to_string(path).map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
            let relative = path.strip_prefix(root).unwrap_or(path);
            docs.push(parse_document(path, relative, &raw));
        }
    }
    Ok(docs)
}

/// Builds a [`Document`] from file content. `relative` is the fallback source id.
pub fn parse_document(path: &Path, relative: &Path, raw: &str) -> Document {
    let (front, body) = split_front_matter(raw);
    let meta = front
        .map(|yaml| {
            serde_yaml::from_str::<FrontMatter>(yaml).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "ignoring unreadable front matter: {e}");
                FrontMatter::default()
            })
        })
        .unwrap_or_default();
    let source_id = match meta.url {
        Some(url) if is_valid_url(&url) => url,
        _ => relative.to_string_lossy().replace('\\', "/"),
    };
    Document {
        path: path.to_path_buf(),
        source_id,
        title: meta.title,
        body: body.to_string(),
    }
}

fn has_page_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Splits optional YAML front matter (between a leading `---` line and the next `---` line).
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let s = content.trim_start();
    let Some(after_first) = s.strip_prefix("---") else {
        return (None, content);
    };
    match after_first.find("\n---") {
        Some(end) => {
            let yaml = after_first[..end].trim();
            let rest = &after_first[end + 4..];
            (Some(yaml), rest.trim_start())
        }
        None => (None, content),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_front_matter_plain() {
        let s = "Hello world.";
        assert_eq!(split_front_matter(s), (None, "Hello world."));
    }

    #[test]
    fn split_front_matter_with_yaml() {
        let s = "---\nurl: https://example.com/a\ntitle: Foo\n---\n\nActual content here.";
        let (yaml, body) = split_front_matter(s);
        assert_eq!(yaml, Some("url: https://example.com/a\ntitle: Foo"));
        assert_eq!(body, "Actual content here.");
    }

    #[test]
    fn url_from_front_matter_is_the_source_id() {
        let raw = "---\nurl: https://example.com/docs\ntitle: Docs\n---\nBody text.";
        let d = parse_document(Path::new("/crawl/docs.md"), Path::new("docs.md"), raw);
        assert_eq!(d.source_id, "https://example.com/docs");
        assert_eq!(d.title.as_deref(), Some("Docs"));
        assert_eq!(d.body, "Body text.");
    }

    #[test]
    fn invalid_url_falls_back_to_path() {
        let raw = "---\nurl: not-a-url\n---\nBody.";
        let d = parse_document(Path::new("/crawl/a/b.md"), Path::new("a/b.md"), raw);
        assert_eq!(d.source_id, "a/b.md");
    }

    #[test]
    fn scan_finds_pages_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("a.md"), "Page A").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "Page B").unwrap();
        std::fs::write(dir.path().join("c.html"), "<p>skip</p>").unwrap();
        std::fs::write(dir.path().join(".cache/d.md"), "hidden").unwrap();

        let docs = scan_documents(dir.path()).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a.md", "sub/b.txt"]);
    }

    #[test]
    fn scan_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.md");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(scan_documents(&file), Err(ScanError::NotADirectory(_))));
    }
}
