//! Location resolution and thumbnail filenames.
//!
//! Originals and thumbnails are referred to by *location* strings: a plain
//! filesystem path or a `file://` URL for local files, anything else (e.g.
//! `http://…`) for remote ones. Only local locations can be written to.
//!
//! Fresh thumbnail names are content-independent and deterministic per
//! original: `<directory>/<prefix><sha256(original)[..16]>.jpg`. When that
//! name is already taken the first free `-N` suffix is used.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Resolve `location` to a local path.
///
/// Handles these patterns:
/// - `"/photos/a.jpg"` → `/photos/a.jpg`
/// - `"file:///photos/a.jpg"` → `/photos/a.jpg`
/// - `"file://localhost/photos/a.jpg"` → `/photos/a.jpg`
/// - `"http://host/a.jpg"` → `None`
pub fn local_path(location: &str) -> Option<PathBuf> {
    if let Some(rest) = location.strip_prefix(FILE_SCHEME) {
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        return (!rest.is_empty()).then(|| PathBuf::from(rest));
    }
    if location.is_empty() || has_url_scheme(location) {
        return None;
    }
    Some(PathBuf::from(location))
}

fn has_url_scheme(location: &str) -> bool {
    match location.find("://") {
        Some(pos) => {
            let scheme = &location[..pos];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// A local path at `location` that a thumbnail can be written to.
///
/// Returns `None` for remote locations, read-only files, and paths whose
/// parent directory cannot be created.
pub fn writable_path(location: &str) -> Option<PathBuf> {
    let path = local_path(location)?;
    if let Ok(meta) = std::fs::metadata(&path) {
        if meta.permissions().readonly() || meta.is_dir() {
            return None;
        }
        return Some(path);
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).ok().map(|_| path)
        }
        _ => Some(path),
    }
}

/// Generates fresh thumbnail paths inside one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailNamer {
    directory: PathBuf,
    prefix: String,
}

impl ThumbnailNamer {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// A path for a new thumbnail of `original` that does not exist yet.
    pub fn fresh_path(&self, original: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(original.as_bytes()));
        let stem = format!("{}{}", self.prefix, &digest[..16]);

        let first = self.directory.join(format!("{stem}.jpg"));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.directory.join(format!("{stem}-{n}.jpg")))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // local_path
    // =========================================================================

    #[test]
    fn plain_path_is_local() {
        assert_eq!(local_path("/photos/a.jpg"), Some(PathBuf::from("/photos/a.jpg")));
        assert_eq!(local_path("rel/a.jpg"), Some(PathBuf::from("rel/a.jpg")));
    }

    #[test]
    fn file_url_is_local() {
        assert_eq!(
            local_path("file:///photos/a.jpg"),
            Some(PathBuf::from("/photos/a.jpg"))
        );
        assert_eq!(
            local_path("file://localhost/photos/a.jpg"),
            Some(PathBuf::from("/photos/a.jpg"))
        );
    }

    #[test]
    fn remote_and_empty_are_not_local() {
        assert_eq!(local_path("http://example.com/a.jpg"), None);
        assert_eq!(local_path("mem://a.jpg"), None);
        assert_eq!(local_path(""), None);
        assert_eq!(local_path("file://"), None);
    }

    // =========================================================================
    // writable_path
    // =========================================================================

    #[test]
    fn writable_path_creates_missing_parent() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("nested/dir/t.jpg");
        let path = writable_path(target.to_str().unwrap()).unwrap();
        assert_eq!(path, target);
        assert!(target.parent().unwrap().is_dir());
    }

    #[test]
    fn writable_path_rejects_readonly_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("t.jpg");
        std::fs::write(&target, b"x").unwrap();
        let mut perms = std::fs::metadata(&target).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&target, perms).unwrap();

        assert_eq!(writable_path(target.to_str().unwrap()), None);
    }

    #[test]
    fn writable_path_rejects_remote() {
        assert_eq!(writable_path("http://example.com/t.jpg"), None);
    }

    // =========================================================================
    // ThumbnailNamer
    // =========================================================================

    #[test]
    fn fresh_path_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let namer = ThumbnailNamer::new(tmp.path(), "Thumbnail_");
        let a = namer.fresh_path("/photos/a.jpg");
        assert_eq!(a, namer.fresh_path("/photos/a.jpg"));
        assert_ne!(a, namer.fresh_path("/photos/b.jpg"));

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Thumbnail_"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), "Thumbnail_".len() + 16 + ".jpg".len());
    }

    #[test]
    fn fresh_path_skips_taken_names() {
        let tmp = TempDir::new().unwrap();
        let namer = ThumbnailNamer::new(tmp.path(), "T_");
        let first = namer.fresh_path("/photos/a.jpg");
        std::fs::write(&first, b"x").unwrap();

        let second = namer.fresh_path("/photos/a.jpg");
        assert_ne!(first, second);
        assert!(second.to_str().unwrap().ends_with("-1.jpg"));

        std::fs::write(&second, b"x").unwrap();
        assert!(namer.fresh_path("/photos/a.jpg").to_str().unwrap().ends_with("-2.jpg"));
    }
}
