//! Object listing contract and the local directory backend.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::trace;

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full locator of the object, `/`-separated.
    pub locator: String,
    pub created: Option<DateTime<Utc>>,
    /// Locator of the container the object lives in; a prefix of `locator`.
    pub container_locator: String,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub items: Vec<RemoteObject>,
    /// Present while more pages remain, even if `items` is empty.
    pub next_token: Option<String>,
}

/// Errors from a listing backend.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("I/O error listing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid continuation token: {0}")]
    InvalidToken(String),

    #[error("remote listing failed: {0}")]
    Remote(String),

    #[error("listing returned continuation token {0:?} twice")]
    StalledToken(String),
}

impl From<ListingError> for dk_common::Error {
    fn from(err: ListingError) -> Self {
        dk_common::Error::Inventory(err.to_string())
    }
}

/// Flat, recursive, paginated object listing.
pub trait ObjectListing {
    /// Fetch the page of `directory` that starts at `token` (`None` for the first page).
    fn list(&self, directory: &str, token: Option<&str>) -> Result<ListPage, ListingError>;
}

/// Lists files below a local directory tree.
///
/// Tokens are decimal offsets into the sorted file list.
#[derive(Debug, Clone)]
pub struct LocalDirectoryListing {
    root: PathBuf,
    page_size: usize,
}

impl LocalDirectoryListing {
    pub fn new(root: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            root: root.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ListingError> {
        let entries = std::fs::read_dir(dir).map_err(|source| ListingError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| ListingError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| ListingError::Io {
                path: path.clone(),
                source,
            })?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl ObjectListing for LocalDirectoryListing {
    fn list(&self, directory: &str, token: Option<&str>) -> Result<ListPage, ListingError> {
        let offset = match token {
            None => 0,
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| ListingError::InvalidToken(t.to_string()))?,
        };

        let base = self.root.join(directory.trim_start_matches('/'));
        let mut files = Vec::new();
        if base.is_dir() {
            self.walk(&base, &mut files)?;
        }
        files.sort();

        if offset > files.len() {
            return Err(ListingError::InvalidToken(offset.to_string()));
        }
        let end = (offset + self.page_size).min(files.len());
        trace!(offset, end, total = files.len(), "local listing page");

        let container_locator = to_locator(&self.root);
        let items = files[offset..end]
            .iter()
            .map(|path| RemoteObject {
                locator: to_locator(path),
                created: created_time(path),
                container_locator: container_locator.clone(),
            })
            .collect();

        Ok(ListPage {
            items,
            next_token: (end < files.len()).then(|| end.to_string()),
        })
    }
}

fn to_locator(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn created_time(path: &Path) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    let time = meta.created().or_else(|_| meta.modified()).ok()?;
    Some(DateTime::<Utc>::from(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            let path = dir.path().join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"x").unwrap();
        }
        dir
    }

    #[test]
    fn pages_by_offset() {
        let dir = tree(&["CrashDumps/a.dmp", "CrashDumps/s/b.dmp", "CrashDumps/c.dmp"]);
        let listing = LocalDirectoryListing::new(dir.path(), 2);

        let first = listing.list("CrashDumps", None).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let second = listing.list("CrashDumps", Some("2")).unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_token.is_none());
        assert!(second.items[0]
            .locator
            .starts_with(&second.items[0].container_locator));
        assert!(second.items[0].created.is_some());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let page = LocalDirectoryListing::new(dir.path(), 10)
            .list("CrashDumps", None)
            .unwrap();
        assert_eq!(page, ListPage::default());
    }

    #[test]
    fn bad_token_rejected() {
        let dir = tree(&["CrashDumps/a.dmp"]);
        let listing = LocalDirectoryListing::new(dir.path(), 10);
        assert!(matches!(
            listing.list("CrashDumps", Some("abc")),
            Err(ListingError::InvalidToken(_))
        ));
        assert!(matches!(
            listing.list("CrashDumps", Some("5")),
            Err(ListingError::InvalidToken(_))
        ));
    }
}
