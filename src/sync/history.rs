//! Notification history
//!
//! Remembers which message identities already raised a notification. Entries
//! carry a recency stamp: inserting or observing an identity moves it to the
//! newest position, and eviction drops the least recently observed first.
//!
//! Persisted as a JSON array of identities, oldest first, one file per
//! account. Writes go to a temporary file that is renamed over the old one.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::sync::identity::MessageIdentity;
use crate::types::error::{MonitorError, Result};

/// Set of notified identities with recency order
#[derive(Debug, Clone, Default)]
pub struct NotificationHistory {
    entries: HashMap<MessageIdentity, u64>,
    clock: u64,
}

impl NotificationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from identities ordered oldest first
    pub fn from_ordered<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = MessageIdentity>,
    {
        let mut history = Self::new();
        for identity in identities {
            history.insert(identity);
        }
        history
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &MessageIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Insert or refresh an identity; returns true if it was not present
    pub fn insert(&mut self, identity: MessageIdentity) -> bool {
        self.clock += 1;
        self.entries.insert(identity, self.clock).is_none()
    }

    /// Mark an existing identity as recently observed
    pub fn touch(&mut self, identity: &MessageIdentity) {
        self.clock += 1;
        if let Some(stamp) = self.entries.get_mut(identity) {
            *stamp = self.clock;
        }
    }

    /// Replace the whole set
    pub fn replace<I>(&mut self, identities: I)
    where
        I: IntoIterator<Item = MessageIdentity>,
    {
        *self = Self::from_ordered(identities);
    }

    /// Forget every identity; stamps keep increasing
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Current recency stamp; identities observed later carry a larger one
    pub fn stamp(&self) -> u64 {
        self.clock
    }

    /// Identities ordered oldest first
    pub fn ordered(&self) -> Vec<MessageIdentity> {
        self.ordered_entries()
            .into_iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn ordered_entries(&self) -> Vec<(&MessageIdentity, u64)> {
        let mut entries: Vec<(&MessageIdentity, u64)> =
            self.entries.iter().map(|(id, stamp)| (id, *stamp)).collect();
        entries.sort_by_key(|(_, stamp)| *stamp);
        entries
    }

    /// Evict down to half of `cap` once the set exceeds `cap`
    ///
    /// Returns the number of evicted identities.
    pub fn enforce_cap(&mut self, cap: usize) -> usize {
        self.enforce_cap_before(cap, u64::MAX)
    }

    /// Like [`enforce_cap`](Self::enforce_cap), but only identities stamped at
    /// or before `stamp` are eligible
    ///
    /// Identities observed after `stamp` are still live on the server and are
    /// kept even when that leaves the set above `cap`.
    pub fn enforce_cap_before(&mut self, cap: usize, stamp: u64) -> usize {
        if self.entries.len() <= cap {
            return 0;
        }

        let evict = self.entries.len() - cap / 2;
        let victims: Vec<MessageIdentity> = self
            .ordered_entries()
            .into_iter()
            .take_while(|(_, observed)| *observed <= stamp)
            .take(evict)
            .map(|(id, _)| id.clone())
            .collect();
        for victim in &victims {
            self.entries.remove(victim);
        }
        victims.len()
    }
}

/// Load/save collaborator for per-account histories
pub trait HistoryStore: Send + Sync {
    /// Stored history for `key`; a missing record is an empty history
    fn load(&self, key: &str) -> Result<NotificationHistory>;

    fn save(&self, key: &str, history: &NotificationHistory) -> Result<()>;
}

/// History store writing one JSON file per account
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// File holding the history of `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_filename(key)))
    }
}

impl HistoryStore for FileHistoryStore {
    fn load(&self, key: &str) -> Result<NotificationHistory> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history file for {}", key);
                return Ok(NotificationHistory::new());
            }
            Err(e) => return Err(e.into()),
        };

        let identities: Vec<MessageIdentity> = serde_json::from_str(&content)?;
        debug!("Loaded {} history entries for {}", identities.len(), key);
        Ok(NotificationHistory::from_ordered(identities))
    }

    fn save(&self, key: &str, history: &NotificationHistory) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_vec_pretty(&history.ordered())?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&data)?;
        file.as_file().sync_all()?;
        file.persist(self.path_for(key))
            .map_err(|e| MonitorError::Io(e.error.to_string()))?;

        debug!("Saved {} history entries for {}", history.len(), key);
        Ok(())
    }
}

/// Load a history and apply the cap, saving right away if anything was evicted
pub fn load_with_cleanup(
    store: &dyn HistoryStore,
    key: &str,
    cap: usize,
) -> Result<NotificationHistory> {
    let mut history = store.load(key)?;
    let before = history.len();
    let evicted = history.enforce_cap(cap);
    if evicted > 0 {
        info!(
            "[{}] Cleanup history (current: {}, max: {}, evicted: {})",
            key, before, cap, evicted
        );
        store.save(key, &history)?;
    }
    Ok(history)
}

fn sanitize_filename(key: &str) -> String {
    key.replace('@', "_at_")
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
