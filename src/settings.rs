//! Operator-editable detection settings.
//!
//! The record is small and read on every pipeline tick so that a change made
//! through the API takes effect on the very next frame. A malformed record is
//! an error; it is never silently replaced with defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

pub const DEFAULT_SENSITIVITY: u32 = 5;
pub const MIN_SENSITIVITY: u32 = 1;
pub const MAX_SENSITIVITY: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    #[default]
    Motion,
    Ai,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Motion => "motion",
            DetectionMode::Ai => "ai",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "motion" => Ok(DetectionMode::Motion),
            "ai" => Ok(DetectionMode::Ai),
            other => Err(anyhow!(
                "detection_mode must be \"motion\" or \"ai\", got {:?}",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub detection_mode: DetectionMode,
    pub sensitivity: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_mode: DetectionMode::Motion,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(&self.sensitivity) {
            return Err(anyhow!(
                "sensitivity must be between {} and {}, got {}",
                MIN_SENSITIVITY,
                MAX_SENSITIVITY,
                self.sensitivity
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON settings record. Both fields are required.
    pub fn parse_json(raw: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid settings record: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply a partial update and validate the result.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Settings> {
        let next = Settings {
            detection_mode: update.detection_mode.unwrap_or(self.detection_mode),
            sensitivity: update.sensitivity.unwrap_or(self.sensitivity),
        };
        next.validate()?;
        Ok(next)
    }
}

/// Fields submitted by an update request; absent fields keep their value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub detection_mode: Option<DetectionMode>,
    pub sensitivity: Option<u32>,
}

impl SettingsUpdate {
    /// Parse `application/x-www-form-urlencoded` fields.
    pub fn from_form(body: &[u8]) -> Result<Self> {
        let mut update = SettingsUpdate::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "detection_mode" => update.detection_mode = Some(value.parse()?),
                "sensitivity" => {
                    let parsed = value.trim().parse::<u32>().map_err(|_| {
                        anyhow!("sensitivity must be a positive integer, got {:?}", value)
                    })?;
                    update.sensitivity = Some(parsed);
                }
                other => return Err(anyhow!("unknown settings field {:?}", other)),
            }
        }
        update.require_any()?;
        Ok(update)
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        let update: SettingsUpdate =
            serde_json::from_slice(body).map_err(|e| anyhow!("invalid settings update: {}", e))?;
        update.require_any()?;
        Ok(update)
    }

    fn require_any(&self) -> Result<()> {
        if self.detection_mode.is_none() && self.sensitivity.is_none() {
            return Err(anyhow!(
                "settings update must contain detection_mode or sensitivity"
            ));
        }
        Ok(())
    }
}

/// Source of the current settings. Implementations hand out a whole record at
/// once so a reader never sees a mode from one write and a sensitivity from
/// another.
pub trait SettingsProvider: Send + Sync {
    fn current(&self) -> Result<Settings>;

    fn update(&self, settings: Settings) -> Result<()>;

    /// Read-modify-write as one step: no other `update` or `modify` on the
    /// same provider can land between the read and the write. Returns the
    /// stored record.
    fn modify(&self, change: &dyn Fn(Settings) -> Result<Settings>) -> Result<Settings>;
}

/// Settings persisted as a JSON file, re-read on every `current()` call.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Open the record at `path`, writing the default record if the file does
    /// not exist. An existing but malformed record is an error.
    pub fn open_or_init(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        if store.path.exists() {
            store
                .current()
                .with_context(|| format!("settings record {}", store.path.display()))?;
        } else {
            log::info!(
                "settings record {} not found; writing defaults",
                store.path.display()
            );
            store.save(&Settings::default())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate and atomically replace the record (temp file + rename).
    pub fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let _guard = self.lock_writes();
        self.write_record(settings)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds `write_lock`.
    fn write_record(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir {}", parent.display()))?;
        }
        let tmp = self.tmp_path();
        let body = serde_json::to_vec_pretty(settings)?;
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(&body)
                .with_context(|| format!("write {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("sync {}", tmp.display()))?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace settings record {}", self.path.display()))?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "settings.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SettingsProvider for FileSettingsStore {
    fn current(&self) -> Result<Settings> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read settings record {}", self.path.display()))?;
        Settings::parse_json(&raw)
            .with_context(|| format!("settings record {}", self.path.display()))
    }

    fn update(&self, settings: Settings) -> Result<()> {
        self.save(&settings)
    }

    fn modify(&self, change: &dyn Fn(Settings) -> Result<Settings>) -> Result<Settings> {
        let _guard = self.lock_writes();
        let next = change(self.current()?)?;
        next.validate()?;
        self.write_record(&next)?;
        Ok(next)
    }
}

/// In-memory settings shared between threads.
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<Settings>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(settings),
        })
    }
}

impl SettingsProvider for SharedSettings {
    fn current(&self) -> Result<Settings> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(*guard)
    }

    fn update(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = settings;
        Ok(())
    }

    fn modify(&self, change: &dyn Fn(Settings) -> Result<Settings>) -> Result<Settings> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        let next = change(*guard)?;
        next.validate()?;
        *guard = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_record() -> Result<()> {
        let settings = Settings::parse_json(r#"{"detection_mode":"ai","sensitivity":12}"#)?;
        assert_eq!(settings.detection_mode, DetectionMode::Ai);
        assert_eq!(settings.sensitivity, 12);
        Ok(())
    }

    #[test]
    fn malformed_records_are_rejected_not_defaulted() {
        for raw in [
            r#"{"detection_mode":"thermal","sensitivity":5}"#,
            r#"{"detection_mode":"motion"}"#,
            r#"{"detection_mode":"motion","sensitivity":0}"#,
            r#"{"detection_mode":"motion","sensitivity":-3}"#,
            r#"{"detection_mode":"motion","sensitivity":"high"}"#,
            "not json",
        ] {
            assert!(Settings::parse_json(raw).is_err(), "accepted {raw}");
        }
    }

    #[test]
    fn form_update_parses_fields() -> Result<()> {
        let update = SettingsUpdate::from_form(b"detection_mode=ai&sensitivity=20")?;
        assert_eq!(update.detection_mode, Some(DetectionMode::Ai));
        assert_eq!(update.sensitivity, Some(20));
        assert!(SettingsUpdate::from_form(b"sensitivity=abc").is_err());
        assert!(SettingsUpdate::from_form(b"").is_err());
        assert!(SettingsUpdate::from_form(b"color=red").is_err());
        Ok(())
    }

    #[test]
    fn apply_keeps_absent_fields() -> Result<()> {
        let next = Settings::default().apply(&SettingsUpdate {
            detection_mode: None,
            sensitivity: Some(9),
        })?;
        assert_eq!(next.detection_mode, DetectionMode::Motion);
        assert_eq!(next.sensitivity, 9);
        assert!(Settings::default()
            .apply(&SettingsUpdate {
                detection_mode: None,
                sensitivity: Some(5000),
            })
            .is_err());
        Ok(())
    }

    #[test]
    fn file_store_initializes_defaults_and_rereads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        let store = FileSettingsStore::open_or_init(&path)?;
        assert_eq!(store.current()?, Settings::default());

        std::fs::write(&path, r#"{"detection_mode":"ai","sensitivity":7}"#)?;
        assert_eq!(store.current()?.detection_mode, DetectionMode::Ai);

        store.update(Settings {
            detection_mode: DetectionMode::Motion,
            sensitivity: 42,
        })?;
        assert_eq!(store.current()?.sensitivity, 42);
        assert!(!path.with_file_name("settings.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn file_store_refuses_malformed_record_at_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"detection_mode":"motion","sensitivity":0}"#)?;
        assert!(FileSettingsStore::open_or_init(&path).is_err());
        Ok(())
    }

    #[test]
    fn invalid_update_leaves_record_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSettingsStore::open_or_init(dir.path().join("s.json"))?;
        assert!(store
            .update(Settings {
                detection_mode: DetectionMode::Ai,
                sensitivity: 0,
            })
            .is_err());
        assert_eq!(store.current()?, Settings::default());
        Ok(())
    }

    #[test]
    fn shared_settings_round_trip() -> Result<()> {
        let shared = SharedSettings::new(Settings::default())?;
        shared.update(Settings {
            detection_mode: DetectionMode::Ai,
            sensitivity: 3,
        })?;
        assert_eq!(shared.current()?.detection_mode, DetectionMode::Ai);
        Ok(())
    }

    fn bump_concurrently(provider: &dyn SettingsProvider, threads: usize, rounds: usize) {
        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    for _ in 0..rounds {
                        provider
                            .modify(&|s| s.apply(&SettingsUpdate {
                                detection_mode: None,
                                sensitivity: Some(s.sensitivity + 1),
                            }))
                            .unwrap();
                    }
                });
            }
        });
    }

    #[test]
    fn concurrent_file_modifies_never_lose_a_write() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSettingsStore::open_or_init(dir.path().join("settings.json"))?;
        bump_concurrently(&store, 4, 10);
        assert_eq!(store.current()?.sensitivity, 5 + 40);
        Ok(())
    }

    #[test]
    fn concurrent_shared_modifies_never_lose_a_write() -> Result<()> {
        let shared = SharedSettings::new(Settings::default())?;
        bump_concurrently(&shared, 4, 50);
        assert_eq!(shared.current()?.sensitivity, 5 + 200);
        Ok(())
    }

    #[test]
    fn rejected_modify_leaves_record_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSettingsStore::open_or_init(dir.path().join("settings.json"))?;
        let err = store.modify(&|s| {
            Ok(Settings {
                sensitivity: 0,
                ..s
            })
        });
        assert!(err.is_err());
        assert_eq!(store.current()?, Settings::default());
        Ok(())
    }
}
