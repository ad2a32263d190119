//! Durable record of trailer links per title
//!
//! Two JSON files live in the state directory:
//! - `links.json`: title → last known link, its expiry and last check time
//! - `ignored.json`: titles known to have no trailer. Hand-editable; removing
//!   an entry makes the title eligible for a fresh lookup on the next pass.
//!
//! The ignore list is authoritative for the `unavailable` flag. Both files are
//! replaced atomically (write to a temporary sibling, then rename).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::file_utils::write_atomic;
use super::identifier::ResolvedTitle;

pub const LINKS_FILE: &str = "links.json";
pub const IGNORED_FILE: &str = "ignored.json";

/// Persisted link state for one title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub unavailable: bool,
}

impl LinkRecord {
    pub fn available(
        url: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        checked: DateTime<Utc>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            expires_at,
            last_checked: checked,
            unavailable: false,
        }
    }

    pub fn unavailable(checked: DateTime<Utc>) -> Self {
        Self {
            url: None,
            expires_at: None,
            last_checked: checked,
            unavailable: true,
        }
    }

    /// Time left before the link expires, if it has a known window
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expires| expires - now)
    }

    /// Whether the link is known to have expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Whether the link can still be handed out at `now` with `margin` to spare
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match (&self.url, self.expires_at) {
            (Some(_), Some(expires)) => now < expires - margin,
            _ => false,
        }
    }
}

/// Titles marked as having no trailer
#[derive(Debug, Clone)]
pub struct IgnoreList {
    path: PathBuf,
    titles: BTreeSet<ResolvedTitle>,
}

impl IgnoreList {
    /// Load the list. A missing or unreadable file yields an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let titles: Vec<ResolvedTitle> = read_json_or_default(&path, "ignore list");
        Self {
            path,
            titles: titles.into_iter().collect(),
        }
    }

    pub async fn save(&self) -> Result<()> {
        let titles: Vec<&ResolvedTitle> = self.titles.iter().collect();
        write_json_atomic(&self.path, &titles).await
    }

    pub fn contains(&self, title: &ResolvedTitle) -> bool {
        self.titles.contains(title)
    }

    pub fn insert(&mut self, title: ResolvedTitle) -> bool {
        self.titles.insert(title)
    }

    pub fn remove(&mut self, title: &ResolvedTitle) -> bool {
        self.titles.remove(title)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct StoreState {
    records: BTreeMap<ResolvedTitle, LinkRecord>,
    ignored: IgnoreList,
}

impl StoreState {
    /// Make record flags agree with the ignore list
    fn reconcile(&mut self, now: DateTime<Utc>) {
        for (title, record) in self.records.iter_mut() {
            let ignored = self.ignored.contains(title);
            if record.unavailable && !ignored {
                info!(title = %title, "Title removed from ignore list, will re-check");
                record.unavailable = false;
                record.url = None;
                record.expires_at = None;
            } else if ignored && !record.unavailable {
                *record = LinkRecord::unavailable(record.last_checked);
            }
        }
        for title in self.ignored.titles.iter() {
            if !self.records.contains_key(title) {
                self.records
                    .insert(title.clone(), LinkRecord::unavailable(now));
            }
        }
    }
}

/// Link state store. The only writer of [LinkRecord]s.
pub struct LinkStore {
    records_path: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
    /// Serializes snapshot + write so the newest snapshot always lands last
    io: AsyncMutex<()>,
    title_locks: Mutex<HashMap<ResolvedTitle, Arc<AsyncMutex<()>>>>,
}

impl LinkStore {
    /// Open the store in `state_dir`, creating the directory if needed
    pub fn open(state_dir: &Path) -> Result<Self> {
        Self::open_with_clock(state_dir, Arc::new(SystemClock))
    }

    /// Open the store with an explicit time source for check timestamps
    pub fn open_with_clock(state_dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

        let records_path = state_dir.join(LINKS_FILE);
        let records: BTreeMap<ResolvedTitle, LinkRecord> =
            read_json_or_default(&records_path, "link records");
        let ignored = IgnoreList::load(state_dir.join(IGNORED_FILE));

        let mut state = StoreState { records, ignored };
        state.reconcile(clock.now());

        info!(
            path = %state_dir.display(),
            records = state.records.len(),
            ignored = state.ignored.len(),
            "Link store loaded"
        );

        Ok(Self {
            records_path,
            clock,
            state: Mutex::new(state),
            io: AsyncMutex::new(()),
            title_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Re-read the ignore list so manual removals take effect
    pub fn reload_ignore_list(&self) {
        let mut state = self.state.lock();
        let path = state.ignored.path().to_path_buf();
        state.ignored = IgnoreList::load(path);
        state.reconcile(self.clock.now());
    }

    pub fn get(&self, title: &ResolvedTitle) -> Option<LinkRecord> {
        self.state.lock().records.get(title).cloned()
    }

    pub async fn put(&self, title: &ResolvedTitle, record: LinkRecord) -> Result<()> {
        {
            let mut state = self.state.lock();
            if record.unavailable {
                state.ignored.insert(title.clone());
            } else {
                state.ignored.remove(title);
            }
            state.records.insert(title.clone(), record);
        }
        debug!(title = %title, "Link record stored");
        self.persist().await
    }

    pub async fn mark_unavailable(&self, title: &ResolvedTitle, now: DateTime<Utc>) -> Result<()> {
        self.put(title, LinkRecord::unavailable(now)).await
    }

    /// Hold this guard across a read-decide-write sequence for one title
    pub async fn lock_title(&self, title: &ResolvedTitle) -> OwnedMutexGuard<()> {
        let lock = self
            .title_locks
            .lock()
            .entry(title.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn persist(&self) -> Result<()> {
        let _io = self.io.lock().await;
        let (records, ignored) = {
            let state = self.state.lock();
            (state.records.clone(), state.ignored.clone())
        };
        write_json_atomic(&self.records_path, &records).await?;
        ignored.save().await
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No {} file yet, starting empty", what);
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read {}, starting empty", what);
            return T::default();
        }
    };

    if raw.trim().is_empty() {
        return T::default();
    }

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Corrupt {} file, starting empty", what);
        T::default()
    })
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
    json.push('\n');

    write_atomic(path, json).await
}
