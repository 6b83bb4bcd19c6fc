use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::{Fingerprint, ImgbedError, ImgbedResult, RemoteKey};

/// A previously issued upload for a given content fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub fingerprint: Fingerprint,
    pub remote_key: RemoteKey,
    pub url: String,
    pub first_seen_at: DateTime<Utc>,
}

type Slot = Arc<OnceCell<DedupEntry>>;

/// Fingerprint -> upload index shared by all upload workers.
///
/// Every fingerprint owns one slot; the first worker to initialise a slot
/// performs the upload while concurrent workers for the same fingerprint wait
/// on it and reuse the result. Entries are never evicted. When disabled,
/// lookups always miss and nothing is recorded.
pub struct DedupIndex {
    enabled: bool,
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    journal: Option<Arc<Mutex<File>>>,
}

impl DedupIndex {
    /// In-memory index
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slots: Mutex::new(HashMap::new()),
            journal: None,
        }
    }

    /// Index that never hits
    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Index backed by a JSON-lines file: existing lines are loaded, new
    /// records are appended as they happen.
    pub fn open(path: &Path, enabled: bool) -> ImgbedResult<Self> {
        let mut slots = HashMap::new();

        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| ImgbedError::io(path, e))?;
            for (n, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DedupEntry>(line) {
                    Ok(entry) => {
                        slots
                            .entry(entry.fingerprint.clone())
                            .or_insert_with(|| Arc::new(OnceCell::new_with(Some(entry))));
                    }
                    Err(e) => warn!(file = %path.display(), line = n + 1, error = %e, "skipping malformed dedup entry"),
                }
            }
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ImgbedError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ImgbedError::io(path, e))?;

        debug!(file = %path.display(), entries = slots.len(), "dedup index loaded");

        Ok(Self {
            enabled,
            slots: Mutex::new(slots),
            journal: Some(Arc::new(Mutex::new(file))),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of completed entries
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed entry for a fingerprint, if any
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<DedupEntry> {
        if !self.enabled {
            return None;
        }
        self.slots
            .lock()
            .get(fingerprint)
            .and_then(|slot| slot.get().cloned())
    }

    /// Insert `entry` unless one already exists. Returns the entry that won.
    ///
    /// Journal writes happen on the calling thread.
    pub fn record(&self, entry: DedupEntry) -> DedupEntry {
        if !self.enabled {
            return entry;
        }
        let slot = self.slot(&entry.fingerprint);
        match slot.set(entry.clone()) {
            Ok(()) => {
                if let (Some(journal), Some(line)) = (&self.journal, journal_line(&entry)) {
                    append(journal, &line, &entry.fingerprint);
                }
                entry
            }
            Err(_) => slot.get().cloned().unwrap_or(entry),
        }
    }

    /// Return the entry for `fingerprint`, running `upload` to create it if
    /// this is the first request for that content.
    ///
    /// At most one `upload` runs per fingerprint at a time; callers racing on
    /// the same fingerprint wait and receive the winner's entry. If `upload`
    /// fails, the slot stays empty and the next waiter runs its own upload.
    /// The flag is true when this call's `upload` produced the entry.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        upload: F,
    ) -> ImgbedResult<(DedupEntry, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ImgbedResult<DedupEntry>>,
    {
        if !self.enabled {
            return upload().await.map(|entry| (entry, true));
        }

        let slot = self.slot(fingerprint);
        let mut created = false;
        let created_flag = &mut created;

        let entry = slot
            .get_or_try_init(move || async move {
                let entry = upload().await?;
                *created_flag = true;
                Ok::<_, ImgbedError>(entry)
            })
            .await?
            .clone();

        if created {
            self.persist(&entry).await;
        }
        Ok((entry, created))
    }

    /// Existing slot for a fingerprint, or a fresh empty one (atomic insert-if-absent)
    fn slot(&self, fingerprint: &Fingerprint) -> Slot {
        self.slots
            .lock()
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Append to the journal from the blocking pool
    async fn persist(&self, entry: &DedupEntry) {
        let (Some(journal), Some(line)) = (self.journal.clone(), journal_line(entry)) else {
            return;
        };
        let fingerprint = entry.fingerprint.clone();
        let write = tokio::task::spawn_blocking(move || append(&journal, &line, &fingerprint));
        if let Err(e) = write.await {
            warn!(error = %e, "dedup journal write did not complete");
        }
    }
}

fn journal_line(entry: &DedupEntry) -> Option<String> {
    serde_json::to_string(entry)
        .map_err(|e| warn!(error = %e, "could not encode dedup entry"))
        .ok()
}

fn append(journal: &Mutex<File>, line: &str, fingerprint: &Fingerprint) {
    let mut file = journal.lock();
    if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
        warn!(error = %e, fingerprint = %fingerprint, "could not persist dedup entry");
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(fp: &str, key: &str) -> DedupEntry {
        DedupEntry {
            fingerprint: Fingerprint::from_string(fp.to_string()),
            remote_key: RemoteKey::from_string(key.to_string()),
            url: format!("https://cdn/{key}"),
            first_seen_at: Utc::now(),
        }
    }

    #[test]
    fn record_then_lookup() {
        let index = DedupIndex::new(true);
        let fp = Fingerprint::from_string("aa".into());
        assert!(index.lookup(&fp).is_none());
        index.record(entry("aa", "k1"));
        assert_eq!(index.lookup(&fp).unwrap().remote_key.as_str(), "k1");
    }

    #[test]
    fn first_record_wins() {
        let index = DedupIndex::new(true);
        index.record(entry("aa", "k1"));
        let winner = index.record(entry("aa", "k2"));
        assert_eq!(winner.remote_key.as_str(), "k1");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn disabled_index_always_misses() {
        let index = DedupIndex::disabled();
        index.record(entry("aa", "k1"));
        assert!(index.lookup(&Fingerprint::from_string("aa".into())).is_none());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn racing_workers_upload_once() {
        let index = Arc::new(DedupIndex::new(true));
        let uploads = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::from_string("bb".into());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = index.clone();
            let uploads = uploads.clone();
            let fp = fp.clone();
            handles.push(tokio::spawn(async move {
                index
                    .get_or_insert_with(&fp, || {
                        let uploads = uploads.clone();
                        async move {
                            uploads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok(entry("bb", "winner"))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            let (entry, was_created) = handle.await.unwrap();
            assert_eq!(entry.remote_key.as_str(), "winner");
            created += was_created as usize;
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn failed_upload_leaves_slot_empty() {
        let index = DedupIndex::new(true);
        let fp = Fingerprint::from_string("cc".into());
        let err = index
            .get_or_insert_with(&fp, || async { Err(ImgbedError::provider("Denied", "no")) })
            .await
            .unwrap_err();
        assert!(err.is_provider());
        assert!(index.lookup(&fp).is_none());

        let (_, created) = index
            .get_or_insert_with(&fp, || async { Ok(entry("cc", "k")) })
            .await
            .unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn uploaded_entries_are_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.jsonl");
        let fp = Fingerprint::from_string("ee".into());

        {
            let index = DedupIndex::open(&path, true).unwrap();
            index
                .get_or_insert_with(&fp, || async { Ok(entry("ee", "k-ee")) })
                .await
                .unwrap();
        }

        let journal = std::fs::read_to_string(&path).unwrap();
        assert_eq!(journal.lines().count(), 1);
        let reopened = DedupIndex::open(&path, true).unwrap();
        assert_eq!(reopened.lookup(&fp).unwrap().remote_key.as_str(), "k-ee");
    }

    #[test]
    fn persisted_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("dedup.jsonl");

        {
            let index = DedupIndex::open(&path, true).unwrap();
            index.record(entry("dd", "k-dd"));
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "not json"))
            .unwrap();

        let reopened = DedupIndex::open(&path, true).unwrap();
        let hit = reopened.lookup(&Fingerprint::from_string("dd".into())).unwrap();
        assert_eq!(hit.url, "https://cdn/k-dd");
        assert_eq!(reopened.len(), 1);
    }
}
