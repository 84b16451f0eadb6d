//! Persisted call-record storage: session snapshots and the phonebook.
//!
//! Sled is the long-term store; a DashMap hot cache fronts session reads.
//! Sessions are keyed by `thread_id`, and deleting a session is the
//! call-ended signal observed by the dialer supervision loop. The store gives
//! per-key isolation only; callers serialize turns within one session.

use crate::error::CoreResult;
use crate::language::Language;
use crate::session::ConversationSession;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_STORE_PATH: &str = "./data/parlance_store";
const SESSION_PREFIX: &str = "session/";
const PHONEBOOK_PREFIX: &str = "phonebook/";

fn session_key(thread_id: &str) -> String {
    format!("{SESSION_PREFIX}{thread_id}")
}

/// Zero-padded so sled's lexicographic order matches id order.
fn phonebook_key(id: u64) -> String {
    format!("{PHONEBOOK_PREFIX}{id:020}")
}

/// One callable number in the phonebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonebookEntry {
    pub id: u64,
    pub phone_number: String,
    pub language: Language,
    #[serde(default)]
    pub has_been_called: bool,
    #[serde(default)]
    pub last_called: Option<DateTime<Utc>>,
}

/// Sled-backed store for session snapshots and the phonebook, with an
/// in-memory hot cache for sessions.
pub struct CallStore {
    db: Db,
    cache: Arc<DashMap<String, ConversationSession>>,
}

impl CallStore {
    /// Opens or creates the store at `./data/parlance_store`.
    pub fn new() -> CoreResult<Self> {
        Self::open_path(DEFAULT_STORE_PATH)
    }

    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            cache: Arc::new(DashMap::new()),
        })
    }

    /// Persists the full session snapshot (hot cache + sled).
    pub fn save_session(&self, session: &ConversationSession) -> CoreResult<()> {
        let raw = serde_json::to_vec(session)?;
        self.db.insert(session_key(&session.thread_id), raw)?;
        self.cache
            .insert(session.thread_id.clone(), session.clone());
        Ok(())
    }

    /// Retrieves a session snapshot. Checks the hot cache first.
    pub fn get_session(&self, thread_id: &str) -> CoreResult<Option<ConversationSession>> {
        if let Some(session) = self.cache.get(thread_id) {
            return Ok(Some(session.clone()));
        }
        let Some(raw) = self.db.get(session_key(thread_id))? else {
            return Ok(None);
        };
        let session: ConversationSession = serde_json::from_slice(&raw)?;
        self.cache.insert(thread_id.to_string(), session.clone());
        Ok(Some(session))
    }

    /// True while the session snapshot exists. The dialer polls this to tell
    /// whether a call is still in progress.
    pub fn session_exists(&self, thread_id: &str) -> CoreResult<bool> {
        if self.cache.contains_key(thread_id) {
            return Ok(true);
        }
        Ok(self.db.contains_key(session_key(thread_id))?)
    }

    /// Removes the session snapshot. This is the call-ended signal.
    pub fn delete_session(&self, thread_id: &str) -> CoreResult<()> {
        self.cache.remove(thread_id);
        self.db.remove(session_key(thread_id))?;
        Ok(())
    }

    /// Inserts or replaces a phonebook entry.
    pub fn upsert_phonebook_entry(&self, entry: &PhonebookEntry) -> CoreResult<()> {
        let raw = serde_json::to_vec(entry)?;
        self.db.insert(phonebook_key(entry.id), raw)?;
        Ok(())
    }

    /// Next entry that has not been called yet, in id order.
    pub fn next_uncalled(&self) -> CoreResult<Option<PhonebookEntry>> {
        for item in self.db.scan_prefix(PHONEBOOK_PREFIX) {
            let (_, raw) = item?;
            let entry: PhonebookEntry = serde_json::from_slice(&raw)?;
            if !entry.has_been_called {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Marks an entry as called now. Unknown ids are a no-op, mirroring the
    /// dialer's tolerance for entries deleted mid-cycle.
    pub fn mark_called(&self, id: u64) -> CoreResult<()> {
        let key = phonebook_key(id);
        let Some(raw) = self.db.get(&key)? else {
            return Ok(());
        };
        let mut entry: PhonebookEntry = serde_json::from_slice(&raw)?;
        entry.has_been_called = true;
        entry.last_called = Some(Utc::now());
        self.db.insert(key, serde_json::to_vec(&entry)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::CallDirection;
    use crate::session::Message;

    fn temp_store() -> (tempfile::TempDir, CallStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CallStore::open_path(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn session_save_get_delete() {
        let (_dir, store) = temp_store();
        let mut session = ConversationSession::new(Language::En, CallDirection::Inbound);
        session.push_message(Message::user("hello"));
        store.save_session(&session).unwrap();

        assert!(store.session_exists(&session.thread_id).unwrap());
        let loaded = store.get_session(&session.thread_id).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);

        store.delete_session(&session.thread_id).unwrap();
        assert!(!store.session_exists(&session.thread_id).unwrap());
        assert!(store.get_session(&session.thread_id).unwrap().is_none());
    }

    #[test]
    fn phonebook_next_uncalled_in_id_order() {
        let (_dir, store) = temp_store();
        for (id, called) in [(2u64, false), (1, false), (3, true)] {
            store
                .upsert_phonebook_entry(&PhonebookEntry {
                    id,
                    phone_number: format!("+1650000000{id}"),
                    language: Language::En,
                    has_been_called: called,
                    last_called: None,
                })
                .unwrap();
        }

        let next = store.next_uncalled().unwrap().unwrap();
        assert_eq!(next.id, 1);

        store.mark_called(1).unwrap();
        let next = store.next_uncalled().unwrap().unwrap();
        assert_eq!(next.id, 2);

        store.mark_called(2).unwrap();
        assert!(store.next_uncalled().unwrap().is_none());
    }

    #[test]
    fn mark_called_sets_timestamp() {
        let (_dir, store) = temp_store();
        store
            .upsert_phonebook_entry(&PhonebookEntry {
                id: 7,
                phone_number: "+16503907338".to_string(),
                language: Language::Kr,
                has_been_called: false,
                last_called: None,
            })
            .unwrap();
        store.mark_called(7).unwrap();

        // Read back through the raw scan to bypass next_uncalled's filter.
        let mut seen = false;
        for item in store.db.scan_prefix(PHONEBOOK_PREFIX) {
            let (_, raw) = item.unwrap();
            let entry: PhonebookEntry = serde_json::from_slice(&raw).unwrap();
            if entry.id == 7 {
                assert!(entry.has_been_called);
                assert!(entry.last_called.is_some());
                seen = true;
            }
        }
        assert!(seen);
    }
}
