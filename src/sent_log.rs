//! Durable record of which entries have already been delivered.
//!
//! The log is a JSON object mapping identity keys to the Unix time (seconds)
//! they were last confirmed sent:
//!
//! ```json
//! { "https://example.com/a": 1746540000 }
//! ```
//!
//! Older installations wrote a bare array of keys; that form is still read
//! and every listed key counts as sent.
//!
//! The file is not locked. Two overlapping runs against the same log can
//! lose each other's updates, so scheduling must keep runs from overlapping.

use crate::models::Entry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// In-memory view of the sent log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SentLog {
    entries: BTreeMap<String, i64>,
}

/// Both on-disk shapes the log has had.
#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Map(BTreeMap<String, i64>),
    Keys(Vec<String>),
}

impl SentLog {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp recorded for `key`, if any.
    pub fn last_sent(&self, key: &str) -> Option<i64> {
        self.entries.get(key).copied()
    }

    /// Record `entries` as sent now. See [`SentLog::mark_sent_at`].
    pub fn mark_sent<'a>(&mut self, entries: impl IntoIterator<Item = &'a Entry>) -> usize {
        self.mark_sent_at(entries, Utc::now().timestamp())
    }

    /// Record `entries` as sent at `now`; returns how many keys were written.
    ///
    /// Entries with an empty identity key cannot be tracked and are skipped.
    pub fn mark_sent_at<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a Entry>,
        now: i64,
    ) -> usize {
        let mut marked = 0;
        for entry in entries {
            if !entry.is_trackable() {
                continue;
            }
            self.entries.insert(entry.identity_key.clone(), now);
            marked += 1;
        }
        marked
    }

    fn from_json(text: &str, now: i64) -> Result<Self, serde_json::Error> {
        let entries = match serde_json::from_str::<OnDisk>(text)? {
            OnDisk::Map(entries) => entries,
            OnDisk::Keys(keys) => keys.into_iter().map(|k| (k, now)).collect(),
        };
        Ok(Self { entries })
    }
}

/// File-backed store for the [`SentLog`].
#[derive(Debug, Clone)]
pub struct SentLogStore {
    path: PathBuf,
}

impl SentLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the log. A missing, unreadable or corrupt file yields an empty log.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> SentLog {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No sent log yet; starting empty");
                return SentLog::default();
            }
            Err(e) => {
                warn!(error = %e, "Failed to read sent log; starting empty");
                return SentLog::default();
            }
        };

        match SentLog::from_json(&text, Utc::now().timestamp()) {
            Ok(log) => {
                info!(keys = log.len(), "Loaded sent log");
                log
            }
            Err(e) => {
                warn!(error = %e, "Sent log is corrupt; starting empty");
                SentLog::default()
            }
        }
    }

    /// Overwrite the stored log with `log`.
    ///
    /// The JSON is written to a sibling temporary file that is then renamed
    /// over the log, so readers never observe a half-written file.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), keys = log.len()))]
    pub async fn persist(&self, log: &SentLog) -> Result<(), Box<dyn Error>> {
        let json = serde_json::to_string_pretty(log)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("Sent log written");
        Ok(())
    }
}
