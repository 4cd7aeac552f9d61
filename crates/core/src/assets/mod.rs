use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{Result, VisualError};

/// Capability that turns an artwork URL into encoded image bytes.
///
/// Network access belongs to the host; the engine only ever asks for bytes.
pub trait ArtworkFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Resolves artwork URLs against a directory on disk. Accepts plain paths
/// and `file://` URLs; anything else is reported as unreachable.
#[derive(Debug, Clone)]
pub struct FileArtwork {
    root: PathBuf,
}

impl FileArtwork {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        if path.contains("://") {
            return Err(VisualError::msg(format!(
                "artwork `{url}` is not reachable from the local store"
            )));
        }
        let path = Path::new(path);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }
}

impl ArtworkFetcher for FileArtwork {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.resolve(url)?;
        Ok(std::fs::read(path)?)
    }
}

/// In-memory registry of artwork bytes keyed by URL.
#[derive(Debug, Default, Clone)]
pub struct ArtworkStore {
    images: HashMap<String, Vec<u8>>,
}

impl ArtworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.images.insert(url.into(), bytes);
    }

    pub fn contains(&self, url: &str) -> bool {
        self.images.contains_key(url)
    }
}

impl ArtworkFetcher for ArtworkStore {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| VisualError::msg(format!("unknown artwork `{url}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_returns_registered_bytes() {
        let mut store = ArtworkStore::new();
        store.register("cover.png", vec![1, 2, 3]);
        assert!(store.contains("cover.png"));
        assert_eq!(store.fetch("cover.png").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn store_errors_on_missing_artwork() {
        let store = ArtworkStore::new();
        let err = store.fetch("missing.png").unwrap_err();
        assert!(format!("{err}").contains("missing.png"));
    }

    #[test]
    fn file_artwork_rejects_remote_urls() {
        let files = FileArtwork::new(".");
        assert!(files.fetch("https://example.com/cover.jpg").is_err());
    }

    #[test]
    fn file_artwork_reads_relative_and_file_urls() {
        let dir = std::env::temp_dir().join(format!("backdrop-artwork-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("art.bin"), [9_u8, 8, 7]).unwrap();

        let files = FileArtwork::new(&dir);
        assert_eq!(files.fetch("art.bin").unwrap(), vec![9, 8, 7]);
        let absolute = format!("file://{}", dir.join("art.bin").display());
        assert_eq!(files.fetch(&absolute).unwrap(), vec![9, 8, 7]);
        let _ = std::fs::remove_dir_all(dir);
    }
}
