//! Local preference store
//!
//! A small JSON file of flags that outlive a session: the MFA factor id, the
//! review-prompt launch counter and the date of the last review request.
//! Stored in the platform config directory (`~/.config/whoami/` on Linux).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Launches needed before the app may ask for a review.
pub const REVIEW_LAUNCH_THRESHOLD: u32 = 10;

/// Minimum days between two review requests.
pub const REVIEW_COOLDOWN_DAYS: i64 = 120;

const FILE_NAME: &str = "preferences.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PreferenceData {
    #[serde(default)]
    mfa_factor_id: Option<String>,
    #[serde(default)]
    review_launch_count: u32,
    #[serde(default)]
    last_review_date: Option<NaiveDate>,
    /// Free-form settings keyed by name
    #[serde(default)]
    values: BTreeMap<String, Value>,
}

/// Handle to the preference file. Clones share one in-memory copy.
#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    data: Arc<Mutex<PreferenceData>>,
}

impl Preferences {
    /// Opens the file at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Preference file unreadable, starting empty");
                PreferenceData::default()
            }),
            Err(_) => PreferenceData::default(),
        };
        Self {
            path,
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Default file location, or `None` when no home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        let dirs = ProjectDirs::from("", "", "whoami")?;
        Some(dirs.config_dir().join(FILE_NAME))
    }

    /// Opens the configured path, falling back to the platform default.
    pub fn open_configured(path: Option<&Path>) -> Option<Self> {
        match path {
            Some(path) => Some(Self::open(path)),
            None => Self::default_path().map(Self::open),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, PreferenceData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, change: impl FnOnce(&mut PreferenceData)) -> io::Result<()> {
        let snapshot = {
            let mut data = self.lock();
            change(&mut data);
            data.clone()
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, json)
    }

    // == MFA ==
    pub fn mfa_factor_id(&self) -> Option<String> {
        self.lock().mfa_factor_id.clone()
    }

    pub fn set_mfa_factor_id(&self, factor_id: Option<String>) -> io::Result<()> {
        self.update(|data| data.mfa_factor_id = factor_id)
    }

    // == Review prompt ==
    /// Counts an app launch and returns the new total.
    pub fn record_launch(&self) -> io::Result<u32> {
        let mut count = 0;
        self.update(|data| {
            data.review_launch_count = data.review_launch_count.saturating_add(1);
            count = data.review_launch_count;
        })?;
        Ok(count)
    }

    /// Whether enough launches and days have passed to ask for a review.
    pub fn should_request_review(&self, today: NaiveDate) -> bool {
        let data = self.lock();
        if data.review_launch_count < REVIEW_LAUNCH_THRESHOLD {
            return false;
        }
        match data.last_review_date {
            Some(last) => (today - last).num_days() >= REVIEW_COOLDOWN_DAYS,
            None => true,
        }
    }

    /// Records that a review was requested and restarts the launch count.
    pub fn mark_review_requested(&self, today: NaiveDate) -> io::Result<()> {
        self.update(|data| {
            data.last_review_date = Some(today);
            data.review_launch_count = 0;
        })
    }

    pub fn last_review_date(&self) -> Option<NaiveDate> {
        self.lock().last_review_date
    }

    // == Free-form values ==
    /// Reads a setting; a value of the wrong shape reads as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().values.get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> io::Result<()> {
        let value = serde_json::to_value(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.update(|data| {
            data.values.insert(key.to_string(), value);
        })
    }

    pub fn remove(&self, key: &str) -> io::Result<()> {
        self.update(|data| {
            data.values.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_prefs() -> (Preferences, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let prefs = Preferences::open(dir.path().join("nested").join(FILE_NAME));
        (prefs, dir)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_values_persist_across_handles() {
        let (prefs, _dir) = temp_prefs();
        prefs.set_mfa_factor_id(Some("factor-1".into())).unwrap();
        prefs.set("daily_reminder_hour", &8u8).unwrap();

        let reopened = Preferences::open(prefs.path());
        assert_eq!(reopened.mfa_factor_id().as_deref(), Some("factor-1"));
        assert_eq!(reopened.get::<u8>("daily_reminder_hour"), Some(8));
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let (prefs, _dir) = temp_prefs();
        assert!(prefs.mfa_factor_id().is_none());
        assert!(prefs.last_review_date().is_none());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FILE_NAME);
        fs::write(&path, "{not json").unwrap();

        let prefs = Preferences::open(&path);
        assert!(prefs.mfa_factor_id().is_none());
    }

    #[test]
    fn test_wrong_shape_reads_as_absent() {
        let (prefs, _dir) = temp_prefs();
        prefs.set("theme", &"dark").unwrap();
        assert_eq!(prefs.get::<u32>("theme"), None);
        assert_eq!(prefs.get::<String>("theme").as_deref(), Some("dark"));
    }

    #[test]
    fn test_review_prompt_needs_launches() {
        let (prefs, _dir) = temp_prefs();
        for _ in 0..REVIEW_LAUNCH_THRESHOLD - 1 {
            prefs.record_launch().unwrap();
        }
        assert!(!prefs.should_request_review(date(2024, 6, 1)));

        assert_eq!(prefs.record_launch().unwrap(), REVIEW_LAUNCH_THRESHOLD);
        assert!(prefs.should_request_review(date(2024, 6, 1)));
    }

    #[test]
    fn test_review_prompt_cooldown() {
        let (prefs, _dir) = temp_prefs();
        prefs.mark_review_requested(date(2024, 1, 1)).unwrap();
        for _ in 0..REVIEW_LAUNCH_THRESHOLD {
            prefs.record_launch().unwrap();
        }

        assert!(!prefs.should_request_review(date(2024, 3, 1)));
        assert!(prefs.should_request_review(date(2024, 5, 1)));
    }

    #[test]
    fn test_remove_value() {
        let (prefs, _dir) = temp_prefs();
        prefs.set("k", &1).unwrap();
        prefs.remove("k").unwrap();
        assert_eq!(prefs.get::<i32>("k"), None);
    }
}
