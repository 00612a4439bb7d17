//! Durable history/breakpoint state.
//!
//! # Files
//! - `history.bin`: the raw history octets, served as-is.
//! - `history.sha256`: hex SHA-256 of `history.bin`.
//! - `breakpoints.json`: JSON array of event ids.
//!
//! Persistence is write-through: every mutation updates the matching
//! file synchronously.  A persistence failure logs and continues with
//! in-memory state; a corrupt file at startup is deleted and treated as
//! empty.
//!
//! # Breakpoint invalidation
//! Breakpoints are keyed to the history's content hash.  Re-uploading
//! bytes with the stored hash preserves the set; uploading different
//! bytes clears it in the same critical section as the history swap.
//! The first upload ever retains whatever set was configured.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const HISTORY_FILE: &str = "history.bin";
const HASH_FILE: &str = "history.sha256";
const BREAKPOINTS_FILE: &str = "breakpoints.json";

/// The coordination server's singleton state bundle.
#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
    history: Option<Vec<u8>>,
    history_hash: Option<String>,
    breakpoints: BTreeSet<u64>,
    highlighted_event: Option<u64>,
}

impl HistoryStore {
    /// Open the store, reloading any state persisted under `dir`.
    ///
    /// Never fails: unreadable or unparseable files are deleted and the
    /// affected piece starts empty.
    pub fn open(dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "cannot create state dir");
        }
        let history = load_bytes(&dir.join(HISTORY_FILE));
        let history_hash = load_hash(&dir.join(HASH_FILE));
        let breakpoints = load_breakpoints(&dir.join(BREAKPOINTS_FILE));
        if history.is_some() {
            info!(
                dir = %dir.display(),
                breakpoints = breakpoints.len(),
                "reloaded persisted history state"
            );
        }
        HistoryStore {
            dir: dir.to_owned(),
            history,
            history_hash,
            breakpoints,
            highlighted_event: None,
        }
    }

    pub fn history(&self) -> Option<&[u8]> {
        self.history.as_deref()
    }

    /// Store newly uploaded history bytes, applying hash-driven
    /// breakpoint invalidation.
    pub fn set_history(&mut self, bytes: Vec<u8>) {
        let new_hash = sha256_hex(&bytes);
        if let Some(stored) = &self.history_hash {
            if *stored != new_hash {
                self.breakpoints.clear();
                self.persist_breakpoints();
            }
        }
        self.history = Some(bytes);
        self.history_hash = Some(new_hash);
        self.persist_history();
        self.persist_hash();
    }

    /// Current breakpoint event ids, ascending.
    pub fn breakpoints(&self) -> Vec<u64> {
        self.breakpoints.iter().copied().collect()
    }

    pub fn set_breakpoints(&mut self, ids: impl IntoIterator<Item = u64>) {
        self.breakpoints = ids.into_iter().collect();
        self.persist_breakpoints();
    }

    pub fn highlighted_event(&self) -> Option<u64> {
        self.highlighted_event
    }

    pub fn set_highlighted_event(&mut self, event_id: Option<u64>) {
        self.highlighted_event = event_id;
    }

    fn persist_history(&self) {
        let path = self.dir.join(HISTORY_FILE);
        if let Some(bytes) = &self.history {
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!(path = %path.display(), error = %e, "history persist failed");
            }
        }
    }

    fn persist_hash(&self) {
        let path = self.dir.join(HASH_FILE);
        if let Some(hash) = &self.history_hash {
            if let Err(e) = std::fs::write(&path, hash) {
                warn!(path = %path.display(), error = %e, "hash persist failed");
            }
        }
    }

    fn persist_breakpoints(&self) {
        let path = self.dir.join(BREAKPOINTS_FILE);
        let json = serde_json::to_vec(&self.breakpoints()).unwrap_or_else(|_| b"[]".to_vec());
        if let Err(e) = std::fs::write(&path, json) {
            warn!(path = %path.display(), error = %e, "breakpoint persist failed");
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn load_bytes(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable state file, discarding");
            let _ = std::fs::remove_file(path);
            None
        }
    }
}

fn load_hash(path: &Path) -> Option<String> {
    let bytes = load_bytes(path)?;
    match String::from_utf8(bytes) {
        Ok(s) => {
            let s = s.trim().to_owned();
            if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
                Some(s)
            } else {
                warn!(path = %path.display(), "malformed hash file, discarding");
                let _ = std::fs::remove_file(path);
                None
            }
        }
        Err(_) => {
            warn!(path = %path.display(), "non-UTF-8 hash file, discarding");
            let _ = std::fs::remove_file(path);
            None
        }
    }
}

fn load_breakpoints(path: &Path) -> BTreeSet<u64> {
    let Some(bytes) = load_bytes(path) else {
        return BTreeSet::new();
    };
    match serde_json::from_slice::<Vec<u64>>(&bytes) {
        Ok(ids) => ids.into_iter().collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt breakpoint file, discarding");
            let _ = std::fs::remove_file(path);
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn re_upload_with_same_bytes_preserves_breakpoints() {
        let dir = TempDir::new().unwrap();
        let mut store = HistoryStore::open(dir.path());

        store.set_history(b"H1".to_vec());
        store.set_breakpoints([3, 9]);
        assert_eq!(store.breakpoints(), vec![3, 9]);

        store.set_history(b"H1".to_vec());
        assert_eq!(store.breakpoints(), vec![3, 9]);
    }

    #[test]
    fn upload_with_different_bytes_clears_breakpoints() {
        let dir = TempDir::new().unwrap();
        let mut store = HistoryStore::open(dir.path());

        store.set_history(b"H1".to_vec());
        store.set_breakpoints([3, 9]);

        store.set_history(b"H2".to_vec());
        assert_eq!(store.breakpoints(), Vec::<u64>::new());

        // Back to H1: the stored hash is now H2's, so this clears too.
        store.set_history(b"H1".to_vec());
        assert_eq!(store.breakpoints(), Vec::<u64>::new());
    }

    #[test]
    fn first_upload_retains_preconfigured_breakpoints() {
        let dir = TempDir::new().unwrap();
        let mut store = HistoryStore::open(dir.path());

        store.set_breakpoints([1, 2]);
        store.set_history(b"fresh".to_vec());
        assert_eq!(store.breakpoints(), vec![1, 2]);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = HistoryStore::open(dir.path());
            store.set_history(b"payload".to_vec());
            store.set_breakpoints([7]);
        }
        let store = HistoryStore::open(dir.path());
        assert_eq!(store.history(), Some(b"payload".as_slice()));
        assert_eq!(store.breakpoints(), vec![7]);

        // Same bytes again: breakpoints must survive across restart.
        let mut store = HistoryStore::open(dir.path());
        store.set_history(b"payload".to_vec());
        assert_eq!(store.breakpoints(), vec![7]);
    }

    #[test]
    fn corrupt_breakpoint_file_is_deleted_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BREAKPOINTS_FILE);
        std::fs::write(&path, b"{not json").unwrap();

        let store = HistoryStore::open(dir.path());
        assert!(store.breakpoints().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn malformed_hash_file_is_deleted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HASH_FILE);
        std::fs::write(&path, b"definitely-not-a-sha").unwrap();

        let mut store = HistoryStore::open(dir.path());
        assert!(!path.exists());
        // Without a stored hash this counts as a first upload.
        store.set_breakpoints([5]);
        store.set_history(b"anything".to_vec());
        assert_eq!(store.breakpoints(), vec![5]);
    }

    #[test]
    fn highlighted_event_is_memory_only() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = HistoryStore::open(dir.path());
            store.set_highlighted_event(Some(12));
            assert_eq!(store.highlighted_event(), Some(12));
        }
        let store = HistoryStore::open(dir.path());
        assert_eq!(store.highlighted_event(), None);
    }
}
