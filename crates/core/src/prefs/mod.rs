//! Host key-value preference stores.
//!
//! The engine keeps a single integer here (the selected mode index). Reads
//! are tolerant: a missing, unreadable or non-numeric entry reads as absent.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{Result, VisualError};

pub trait PreferenceStore {
    fn get_int(&self, key: &str) -> Option<i64>;

    fn set_int(&mut self, key: &str, value: i64) -> Result<()>;
}

/// In-process store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: Arc<Mutex<BTreeMap<String, i64>>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.lock().ok()?.get(key).copied()
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| VisualError::Prefs("preference store poisoned".into()))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// `key=value` text file, rewritten atomically on every change.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePreferences {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(VisualError::Prefs(format!("{}: {err}", path.display()))),
        };
        Ok(Self {
            values: parse(&text, &path),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(prefs_io)?;
            }
        }
        let mut body = String::from("# backdrop preferences v1\n");
        for (key, value) in &self.values {
            body.push_str(key);
            body.push('=');
            body.push_str(value);
            body.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(prefs_io)?;
        std::fs::rename(&tmp, &self.path).map_err(prefs_io)
    }
}

impl PreferenceStore for FilePreferences {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key)?.trim().parse().ok()
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }
}

fn parse(text: &str, path: &Path) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => tracing::warn!(path = %path.display(), line = idx + 1, "skipping malformed preference"),
        }
    }
    values
}

fn prefs_io(err: std::io::Error) -> VisualError {
    VisualError::Prefs(err.to_string())
}
