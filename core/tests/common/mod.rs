// Shared scaffolding for the integration tests: an in-memory session, a
// database-backed test folder and message fixtures.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use schedario_core::{
    Cancellable, Config, Folder, FolderRecord, FolderSummary, LocalStore, MessageRecord,
    MimeMessage, Result, Session, Store, StoreError,
};

/// Session whose address books are plain in-memory sets.
#[derive(Default)]
pub struct TestSession {
    books: Mutex<HashMap<String, HashSet<String>>>,
    pub calls: Mutex<u32>,
}

impl TestSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_book_entry(&self, book_uid: &str, email: &str) {
        self.books
            .lock()
            .unwrap()
            .entry(book_uid.to_string())
            .or_default()
            .insert(email.to_lowercase());
    }
}

impl Session for TestSession {
    fn addressbook_contains_sync(&self, book_uid: &str, email: &str) -> bool {
        *self.calls.lock().unwrap() += 1;
        self.books
            .lock()
            .unwrap()
            .get(book_uid)
            .map(|book| book.contains(&email.to_lowercase()))
            .unwrap_or(false)
    }
}

/// A folder whose metadata lives in the store database and whose message
/// content is an in-memory map.
pub struct TestFolder {
    name: String,
    store: Weak<LocalStore>,
    summary: Arc<FolderSummary>,
    messages: Mutex<HashMap<String, MimeMessage>>,
}

impl TestFolder {
    pub fn set_message(&self, uid: &str, message: MimeMessage) {
        self.messages.lock().unwrap().insert(uid.to_string(), message);
    }
}

impl Folder for TestFolder {
    fn full_name(&self) -> &str {
        &self.name
    }

    fn parent_store(&self) -> Arc<dyn Store> {
        let store: Arc<LocalStore> = self.store.upgrade().expect("store alive");
        store
    }

    fn summary(&self) -> &Arc<FolderSummary> {
        &self.summary
    }

    fn get_message_sync(
        &self,
        uid: &str,
        _cancellable: Option<&Cancellable>,
    ) -> Result<MimeMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("no message '{}'", uid)))
    }

    fn search_body_sync(&self, words: &[String]) -> Result<Vec<String>> {
        let messages = self.messages.lock().unwrap();
        let mut uids: Vec<String> = Vec::new();
        for uid in self.summary.dup_uids() {
            let Some(message) = messages.get(&uid) else { continue };
            let body = message.body().to_lowercase();
            if words.iter().all(|word| body.contains(&word.to_lowercase())) {
                uids.push(uid);
            }
        }
        Ok(uids)
    }

    fn synchronize_sync(&self, expunge: bool, _cancellable: Option<&Cancellable>) -> Result<()> {
        if expunge {
            self.summary.expunge_deleted()?;
        } else {
            self.summary.save()?;
        }
        Ok(())
    }
}

/// A fresh store over a temporary directory.
pub fn new_store(uid: &str) -> (tempfile::TempDir, Arc<LocalStore>) {
    new_store_with_session(uid, None)
}

pub fn new_store_with_session(
    uid: &str,
    session: Option<Arc<TestSession>>,
) -> (tempfile::TempDir, Arc<LocalStore>) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(dir.path(), uid);
    let session: Option<Arc<dyn Session>> = match session {
        Some(session) => Some(session),
        None => None,
    };
    let store = LocalStore::open(&config, session, None).unwrap();
    (dir, store)
}

/// Create (or fetch) a test folder of `store`, backed by the store database.
pub fn get_folder(store: &Arc<LocalStore>, name: &str) -> Arc<TestFolder> {
    let store_db = store.store_db();
    if store_db.get_folder_id(name).unwrap() == 0 {
        store_db
            .write_folder(name, &FolderRecord { folder_name: name.into(), ..Default::default() })
            .unwrap();
    }
    let folder = Arc::new(TestFolder {
        name: name.to_string(),
        store: Arc::downgrade(store),
        summary: FolderSummary::new(Arc::clone(store_db), name),
        messages: Mutex::new(HashMap::new()),
    });
    store.register_folder(Arc::clone(&folder) as Arc<dyn Folder>);
    folder
}

/// Fixture description of one message; unset fields stay at their defaults.
#[derive(Default, Clone)]
pub struct Msg {
    pub uid: &'static str,
    pub subject: &'static str,
    pub from: &'static str,
    pub to: &'static str,
    pub cc: &'static str,
    pub mlist: &'static str,
    pub part: &'static str,
    pub labels: &'static str,
    pub usertags: &'static str,
    pub flags: u32,
    pub size: u32,
    pub dsent: i64,
    pub dreceived: i64,
    pub body: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
}

/// Write fixtures straight into the folder's message table, plus content for
/// body/header scans.
pub fn add_messages(store: &Arc<LocalStore>, folder: &Arc<TestFolder>, messages: &[Msg]) {
    let store_db = store.store_db();
    for msg in messages {
        let record = MessageRecord {
            folder_id: 0,
            uid: msg.uid.to_string(),
            flags: msg.flags,
            msg_type: 0,
            dirty: 0,
            size: msg.size,
            dsent: msg.dsent,
            dreceived: msg.dreceived,
            subject: msg.subject.to_string(),
            from: msg.from.to_string(),
            to: msg.to.to_string(),
            cc: msg.cc.to_string(),
            mlist: msg.mlist.to_string(),
            part: msg.part.to_string(),
            labels: msg.labels.to_string(),
            usertags: msg.usertags.to_string(),
            cinfo: String::new(),
            bdata: String::new(),
            userheaders: String::new(),
            preview: String::new(),
        };
        store_db.write_message(folder.full_name(), &record).unwrap();

        let mut message = MimeMessage::new();
        if !msg.subject.is_empty() {
            message.add_header("Subject", msg.subject);
        }
        if !msg.from.is_empty() {
            message.add_header("From", msg.from);
        }
        if !msg.to.is_empty() {
            message.add_header("To", msg.to);
        }
        if !msg.cc.is_empty() {
            message.add_header("Cc", msg.cc);
        }
        for (name, value) in msg.headers {
            message.add_header(*name, *value);
        }
        message.set_body(msg.body);
        folder.set_message(msg.uid, message);
    }
    folder.summary().load().unwrap();
}

/// Sorted (folder_id, uid) pairs of a search result, for set comparisons.
pub fn result_pairs(items: &[schedario_core::SearchItem]) -> Vec<(u32, String)> {
    let mut pairs: Vec<(u32, String)> = items
        .iter()
        .map(|item| (item.folder_id, item.uid.clone()))
        .collect();
    pairs.sort();
    pairs
}

pub fn pairs(expected: &[(u32, &str)]) -> Vec<(u32, String)> {
    let mut pairs: Vec<(u32, String)> = expected
        .iter()
        .map(|(folder_id, uid)| (*folder_id, uid.to_string()))
        .collect();
    pairs.sort();
    pairs
}

/// The trailing two characters of a vUID: the original test UIDs are all two
/// characters long.
pub fn last2(uid: &str) -> &str {
    &uid[uid.len().saturating_sub(2)..]
}

pub fn sorted_last2(uids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = uids.iter().map(|uid| last2(uid).to_string()).collect();
    out.sort();
    out
}
