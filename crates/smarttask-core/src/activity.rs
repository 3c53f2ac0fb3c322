use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::persistence::{BlobStore, PersistenceAdapter};

pub const DEFAULT_MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    #[default]
    Info,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: ActivityLevel,
    pub message: String,
}

impl ActivityEntry {
    /// `HH:MM:SS — message` in local time, the dashboard's log line format.
    pub fn display_line(&self) -> String {
        format!(
            "{} — {}",
            self.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            self.message
        )
    }
}

/// Stored logs written by the browser dashboard hold bare strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawEntry {
    Full(ActivityEntry),
    Text(String),
}

impl RawEntry {
    pub(crate) fn into_entry(self, fallback: DateTime<Utc>) -> ActivityEntry {
        match self {
            Self::Full(entry) => entry,
            Self::Text(message) => ActivityEntry {
                timestamp: fallback,
                level: ActivityLevel::Info,
                message,
            },
        }
    }
}

/// Newest-first, bounded log of state transitions.
#[derive(Debug)]
pub struct ActivityRecorder<B> {
    adapter: PersistenceAdapter<B>,
    key: String,
    max_entries: usize,
    entries: Vec<ActivityEntry>,
}

impl<B: BlobStore> ActivityRecorder<B> {
    #[tracing::instrument(skip(adapter))]
    pub fn open(adapter: PersistenceAdapter<B>, key: &str, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        let now = Utc::now();
        let loaded = adapter.load::<Vec<RawEntry>>(key);

        let mut recorder = Self {
            adapter,
            key: key.to_string(),
            max_entries,
            entries: Vec::new(),
        };

        match loaded {
            Ok(Some(raw)) => {
                recorder.entries = raw.into_iter().map(|entry| entry.into_entry(now)).collect();
                recorder.entries.truncate(max_entries);
                debug!(count = recorder.entries.len(), "loaded activity log");
            }
            Ok(None) => debug!("no activity log stored"),
            Err(err) => {
                warn!(error = %err, "activity log unreadable; starting empty");
                if let Err(err) = recorder.warn("Activity log was unreadable and has been reset") {
                    warn!(error = %err, "failed to persist reset activity log");
                }
            }
        }

        recorder
    }

    pub fn record(&mut self, message: impl Into<String>) -> StoreResult<()> {
        self.push(ActivityLevel::Info, message.into(), Utc::now())
    }

    pub fn warn(&mut self, message: impl Into<String>) -> StoreResult<()> {
        self.push(ActivityLevel::Warning, message.into(), Utc::now())
    }

    #[tracing::instrument(skip(self, message))]
    pub(crate) fn push(
        &mut self,
        level: ActivityLevel,
        message: String,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut next = Vec::with_capacity(self.entries.len() + 1);
        next.push(ActivityEntry {
            timestamp: now,
            level,
            message,
        });
        next.extend(self.entries.iter().cloned());
        next.truncate(self.max_entries);
        self.commit(next)
    }

    /// Swaps in a whole log (document import), keeping the newest entries.
    #[tracing::instrument(skip(self, entries))]
    pub fn replace(&mut self, mut entries: Vec<ActivityEntry>) -> StoreResult<()> {
        entries.truncate(self.max_entries);
        info!(count = entries.len(), "replacing activity log");
        self.commit(entries)
    }

    pub fn list(&self) -> &[ActivityEntry] {
        &self.entries
    }

    fn commit(&mut self, next: Vec<ActivityEntry>) -> StoreResult<()> {
        self.adapter.save(&self.key, &next)?;
        self.entries = next;
        Ok(())
    }
}
