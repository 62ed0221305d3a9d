// ~/src/data_loaders/yaml.rs

use std::{
    collections::HashMap,
    fs, io,
    path::Path,
    sync::{LazyLock, RwLock},
    time::SystemTime,
};

use serde_yaml::Value;

use crate::error::SwitcherResult;

/* =========================
   CONFIG CACHE
========================= */

/// Modification time and length of a file; a change in either invalidates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileStamp {
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

// Per-file cache for YAML data
static YAML_CACHE: LazyLock<RwLock<HashMap<String, (Value, FileStamp)>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Loads a YAML document, reusing the parsed value while the file is unchanged.
/// `None` when the file is missing, unreadable or malformed.
pub fn load_yaml(path: &Path) -> Option<Value> {
    read_yaml(path).ok().flatten()
}

/// Like `load_yaml`, but only a missing file is `Ok(None)`; read and parse
/// failures are returned so callers never mistake them for an empty document.
pub fn read_yaml(path: &Path) -> SwitcherResult<Option<Value>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let stamp = FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    };
    let key = path.to_string_lossy().to_string();
    {
        let cache = YAML_CACHE.read().unwrap_or_else(|e| e.into_inner());
        if let Some((v, cached)) = cache.get(&key) {
            if *cached == stamp {
                return Ok(Some(v.clone()));
            }
        }
    }

    let txt = fs::read_to_string(path)?;
    let v: Value = if txt.trim().is_empty() {
        Value::Mapping(Default::default())
    } else {
        serde_yaml::from_str(&txt)?
    };

    let mut cache = YAML_CACHE.write().unwrap_or_else(|e| e.into_inner());
    cache.insert(key, (v.clone(), stamp));
    Ok(Some(v))
}

/// Writes `value` to `path` and returns the stamp of the written file.
pub fn save_yaml(path: &Path, value: &Value) -> SwitcherResult<Option<FileStamp>> {
    let txt = serde_yaml::to_string(value)?;
    fs::write(path, txt)?;

    let key = path.to_string_lossy().to_string();
    let mut cache = YAML_CACHE.write().unwrap_or_else(|e| e.into_inner());
    cache.remove(&key);

    Ok(FileStamp::of(path))
}
