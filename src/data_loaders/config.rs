use std::{
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use serde_yaml::{Mapping, Value};

use super::yaml::{load_yaml, read_yaml, save_yaml, FileStamp};
use crate::{
    error::{SwitcherError, SwitcherResult},
    image_classifier::ExtraFormats,
    slots::SlotId,
};

/// Shorter intervals are clamped up to this floor.
pub const MIN_INTERVAL_SECONDS: u64 = 10;

pub const KEY_BASE_PATH: &str = "BasePath";
pub const KEY_IMAGE_URL: &str = "ImageUrl";
pub const KEY_LOCK_SCREEN: &str = "LockScreen";
pub const KEY_INTERVAL: &str = "IntervalSeconds";
pub const KEY_IDLE_THRESHOLD: &str = "IdleThresholdSeconds";
pub const KEY_EXTRA_FORMAT: &str = "ExtraFormat";
pub const KEY_LOG: &str = "Log";
pub const KEY_JPG_QUALITY: &str = "JPGQuality";
pub const KEY_RETRY_AFTER: &str = "RetryAfter";
pub const KEY_CURRENT_SLOT: &str = "CurrentSlot";

#[derive(Debug, Clone, Copy)]
pub struct ConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub default: &'static str,
}

pub const CONFIG_SCHEMA: &[ConfigItem] = &[
    ConfigItem { key: KEY_BASE_PATH, description: "Folder where the two wallpaper slots are stored.", default: "" },
    ConfigItem { key: KEY_IMAGE_URL, description: "URL the wallpaper image is downloaded from.", default: "" },
    ConfigItem { key: KEY_LOCK_SCREEN, description: "Also apply the current wallpaper to the lock screen.", default: "true" },
    ConfigItem { key: KEY_INTERVAL, description: "Seconds between wallpaper switches (minimum 10).", default: "300" },
    ConfigItem { key: KEY_IDLE_THRESHOLD, description: "Stop switching after the user has been idle this many seconds (0 disables).", default: "3600" },
    ConfigItem { key: KEY_EXTRA_FORMAT, description: "Extra formats allowed as desktop wallpaper: webp, heic, avif. Separate with commas.", default: "" },
    ConfigItem { key: KEY_LOG, description: "Write informational messages to debug.log.", default: "false" },
    ConfigItem { key: KEY_JPG_QUALITY, description: "JPEG quality used when re-encoding (0-100, 100 keeps the original file).", default: "95" },
    ConfigItem { key: KEY_RETRY_AFTER, description: "Seconds to wait before retrying after a failed download.", default: "60" },
    ConfigItem { key: KEY_CURRENT_SLOT, description: "Slot currently shown. Managed by the service, do not edit.", default: "" },
];

#[derive(Debug, Clone)]
pub struct SwitcherConfig {
    pub base_path: Option<PathBuf>,
    pub image_url: Option<String>,
    pub lock_screen: bool,
    pub interval_seconds: u64,
    pub idle_threshold_seconds: u64,
    pub extra_formats: ExtraFormats,
    pub log: bool,
    pub jpg_quality: u8,
    pub retry_after_seconds: u64,
    pub current_slot: Option<SlotId>,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            image_url: None,
            lock_screen: true,
            interval_seconds: 300,
            idle_threshold_seconds: 3600,
            extra_formats: ExtraFormats::default(),
            log: false,
            jpg_quality: 95,
            retry_after_seconds: 60,
            current_slot: None,
        }
    }
}

impl SwitcherConfig {
    pub fn from_yaml(root: &Value) -> Option<Self> {
        let map = root.as_mapping()?;
        let mut config = Self::default();

        config.base_path = str_at(map, KEY_BASE_PATH).map(PathBuf::from);
        config.image_url = str_at(map, KEY_IMAGE_URL).map(str::to_string);
        config.lock_screen = bool_at(map, KEY_LOCK_SCREEN).unwrap_or(config.lock_screen);
        config.interval_seconds = u64_at(map, KEY_INTERVAL).unwrap_or(config.interval_seconds);
        config.idle_threshold_seconds =
            u64_at(map, KEY_IDLE_THRESHOLD).unwrap_or(config.idle_threshold_seconds);
        config.extra_formats = str_at(map, KEY_EXTRA_FORMAT)
            .map(ExtraFormats::parse)
            .unwrap_or_default();
        config.log = bool_at(map, KEY_LOG).unwrap_or(config.log);
        config.jpg_quality = i64_at(map, KEY_JPG_QUALITY)
            .map(|q| q.clamp(0, 100) as u8)
            .unwrap_or(config.jpg_quality);
        config.retry_after_seconds = u64_at(map, KEY_RETRY_AFTER).unwrap_or(config.retry_after_seconds);
        config.current_slot = map
            .get(Value::String(KEY_CURRENT_SLOT.to_string()))
            .and_then(|v| serde_yaml::from_value::<SlotId>(v.clone()).ok());

        Some(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(MIN_INTERVAL_SECONDS))
    }

    pub fn interval_was_clamped(&self) -> bool {
        self.interval_seconds < MIN_INTERVAL_SECONDS
    }

    /// Never zero, so a failing download cannot spin the loop.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_seconds.max(1))
    }

    /// `None` disables the idle check.
    pub fn idle_threshold(&self) -> Option<Duration> {
        (self.idle_threshold_seconds > 0).then(|| Duration::from_secs(self.idle_threshold_seconds))
    }

    pub fn require_base_path(&self) -> SwitcherResult<PathBuf> {
        self.base_path
            .clone()
            .ok_or_else(|| SwitcherError::ConfigurationMissing(KEY_BASE_PATH.to_string()))
    }

    pub fn require_image_url(&self) -> SwitcherResult<String> {
        self.image_url
            .clone()
            .ok_or_else(|| SwitcherError::ConfigurationMissing(KEY_IMAGE_URL.to_string()))
    }
}

/// The configuration file as seen by one process.
///
/// Every read goes to disk (through the stamp-keyed YAML cache) so hand edits
/// are picked up without a restart. Writes made through the store record the
/// resulting file stamp, so `poll_external_change` never reports them.
pub struct ConfigStore {
    path: PathBuf,
    last_stamp: Mutex<Option<FileStamp>>,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stamp = FileStamp::of(&path);
        Self {
            path,
            last_stamp: Mutex::new(stamp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is missing or cannot be parsed right now.
    pub fn load(&self) -> Option<SwitcherConfig> {
        let value = load_yaml(&self.path)?;
        SwitcherConfig::from_yaml(&value)
    }

    pub fn load_or_default(&self) -> SwitcherConfig {
        self.load().unwrap_or_default()
    }

    /// Sets one key, keeping every other key as it is on disk.
    ///
    /// A file that exists but does not parse is left untouched and reported,
    /// so a half-finished hand edit is never replaced by a one-key document.
    pub fn write_value(&self, key: &str, raw: &str) -> SwitcherResult<()> {
        let mut root = match read_yaml(&self.path)? {
            None | Some(Value::Null) => Mapping::new(),
            Some(Value::Mapping(map)) => map,
            Some(_) => {
                return Err(SwitcherError::InvalidArgument(format!(
                    "{} is not a key/value document",
                    self.path.display()
                )))
            }
        };

        let canonical = CONFIG_SCHEMA
            .iter()
            .find(|item| item.key.eq_ignore_ascii_case(key))
            .map(|item| item.key)
            .unwrap_or(key);

        root.insert(Value::String(canonical.to_string()), scalar_value(raw));

        let mut guard = self.last_stamp.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = save_yaml(&self.path, &Value::Mapping(root))?;
        *guard = stamp;
        Ok(())
    }

    pub fn write_current_slot(&self, slot: SlotId) -> SwitcherResult<()> {
        self.write_value(KEY_CURRENT_SLOT, slot.dir_name())
    }

    /// True once per edit made by someone other than this store.
    pub fn poll_external_change(&self) -> bool {
        let mut guard = self.last_stamp.lock().unwrap_or_else(|e| e.into_inner());
        let current = FileStamp::of(&self.path);
        if current == *guard {
            return false;
        }
        *guard = current;
        true
    }

    /// Human readable dump of every known key with its description.
    pub fn describe(&self) -> String {
        let map = load_yaml(&self.path)
            .and_then(|v| v.as_mapping().cloned())
            .unwrap_or_default();

        let mut out = String::new();
        for item in CONFIG_SCHEMA {
            let current = map
                .get(Value::String(item.key.to_string()))
                .map(display_value)
                .unwrap_or_else(|| item.default.to_string());
            out.push_str(&format!("# {}\n{}: {}\n", item.description, item.key, current));
        }
        out
    }
}

/// Content for a freshly scaffolded config file.
pub fn default_config_text() -> String {
    let mut out = String::new();
    for item in CONFIG_SCHEMA {
        out.push_str(&format!("# {}\n", item.description));
        let value = match item.default {
            "" => "\"\"".to_string(),
            v if v.parse::<i64>().is_ok() || v == "true" || v == "false" => v.to_string(),
            v => format!("\"{v}\""),
        };
        out.push_str(&format!("{}: {}\n", item.key, value));
    }
    out
}

fn scalar_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match serde_yaml::from_str::<Value>(trimmed) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(trimmed.to_string()),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn str_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(Value::String(key.to_string()))?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn bool_at(map: &Mapping, key: &str) -> Option<bool> {
    let value = map.get(Value::String(key.to_string()))?;
    if let Some(b) = value.as_bool() {
        return Some(b);
    }
    match value.as_str()?.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn i64_at(map: &Mapping, key: &str) -> Option<i64> {
    let value = map.get(Value::String(key.to_string()))?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
}

fn u64_at(map: &Mapping, key: &str) -> Option<u64> {
    i64_at(map, key).and_then(|v| if v >= 0 { Some(v as u64) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(text: &str) -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, text).unwrap();
        let store = ConfigStore::open(&path);
        (dir, store)
    }

    #[test]
    fn defaults_apply_to_missing_keys() {
        let (_dir, store) = store_with("BasePath: C:/wall\nImageUrl: https://example.com/img\n");
        let config = store.load().unwrap();

        assert_eq!(config.base_path, Some(PathBuf::from("C:/wall")));
        assert_eq!(config.interval_seconds, 300);
        assert_eq!(config.idle_threshold_seconds, 3600);
        assert_eq!(config.jpg_quality, 95);
        assert_eq!(config.retry_after_seconds, 60);
        assert!(config.lock_screen);
        assert!(!config.log);
        assert_eq!(config.current_slot, None);
    }

    #[test]
    fn string_values_are_tolerated() {
        let (_dir, store) = store_with(
            "IntervalSeconds: \"600\"\nLockScreen: \"false\"\nJPGQuality: 250\nCurrentSlot: Slot_2\n",
        );
        let config = store.load().unwrap();

        assert_eq!(config.interval_seconds, 600);
        assert!(!config.lock_screen);
        assert_eq!(config.jpg_quality, 100);
        assert_eq!(config.current_slot, Some(SlotId::B));
    }

    #[test]
    fn short_interval_is_clamped_to_floor() {
        let (_dir, store) = store_with("IntervalSeconds: 3\nRetryAfter: 0\nIdleThresholdSeconds: 0\n");
        let config = store.load().unwrap();

        assert!(config.interval_was_clamped());
        assert_eq!(config.interval(), Duration::from_secs(MIN_INTERVAL_SECONDS));
        assert_eq!(config.retry_after(), Duration::from_secs(1));
        assert_eq!(config.idle_threshold(), None);
    }

    #[test]
    fn missing_required_keys_are_reported() {
        let (_dir, store) = store_with("ImageUrl: \"\"\n");
        let config = store.load().unwrap();

        assert!(matches!(
            config.require_base_path(),
            Err(SwitcherError::ConfigurationMissing(key)) if key == KEY_BASE_PATH
        ));
        assert!(matches!(
            config.require_image_url(),
            Err(SwitcherError::ConfigurationMissing(key)) if key == KEY_IMAGE_URL
        ));
    }

    #[test]
    fn own_writes_are_not_external_changes() {
        let (_dir, store) = store_with("BasePath: /tmp/wall\n");

        store.write_current_slot(SlotId::A).unwrap();
        assert!(!store.poll_external_change());
        assert_eq!(store.load().unwrap().current_slot, Some(SlotId::A));
        assert_eq!(store.load().unwrap().base_path, Some(PathBuf::from("/tmp/wall")));

        fs::write(store.path(), "BasePath: /tmp/elsewhere\nIntervalSeconds: 42\n").unwrap();
        assert!(store.poll_external_change());
        assert!(!store.poll_external_change());
        assert_eq!(store.load().unwrap().interval_seconds, 42);
    }

    #[test]
    fn write_value_coerces_scalars_and_canonicalises_keys() {
        let (_dir, store) = store_with("");

        store.write_value("intervalseconds", "900").unwrap();
        store.write_value("ImageUrl", "https://example.com/a?b=c").unwrap();

        let raw = load_yaml(store.path()).unwrap();
        assert_eq!(raw["IntervalSeconds"].as_i64(), Some(900));
        assert_eq!(raw["ImageUrl"].as_str(), Some("https://example.com/a?b=c"));
    }

    #[test]
    fn malformed_file_is_never_overwritten() {
        let text = "BasePath: /tmp/wall\nImageUrl: https://example.com/img\nIntervalSeconds: [300\n";
        let (_dir, store) = store_with(text);

        assert!(matches!(
            store.write_current_slot(SlotId::B),
            Err(SwitcherError::Yaml(_))
        ));
        assert!(store.write_value("Log", "true").is_err());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), text);
    }

    #[test]
    fn missing_file_is_created_by_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.yaml"));

        store.write_current_slot(SlotId::B).unwrap();
        assert_eq!(store.load().unwrap().current_slot, Some(SlotId::B));
    }

    #[test]
    fn scaffolded_text_parses_to_defaults() {
        let (_dir, store) = store_with(&default_config_text());
        let config = store.load().unwrap();

        assert_eq!(config.base_path, None);
        assert_eq!(config.interval_seconds, 300);
        assert!(store.describe().contains("JPGQuality: 95"));
    }
}
