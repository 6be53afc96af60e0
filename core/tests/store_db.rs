// Store database end-to-end: legacy schema migration for every generation,
// with progress reporting and logically identical contents afterwards.

mod common;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use schedario_core::db::{quote_ident, quote_literal, Db};
use schedario_core::{Cancellable, CountKind, StoreDb};

struct LegacyFolder {
    name: &'static str,
    flags: u32,
    messages: &'static [LegacyMessage],
}

struct LegacyMessage {
    uid: &'static str,
    flags: u32,
    dirty: u32,
    size: u32,
    subject: &'static str,
    userheaders: &'static str,
    preview: &'static str,
}

const FOLDERS: &[LegacyFolder] = &[
    LegacyFolder { name: "without-messages", flags: 1, messages: &[] },
    LegacyFolder {
        name: "with/one/Message",
        flags: 11,
        messages: &[LegacyMessage {
            uid: "10",
            flags: 101,
            dirty: 103,
            size: 110,
            subject: "subject 10",
            userheaders: "userheaders 10",
            preview: "preview 10",
        }],
    },
    LegacyFolder {
        name: "with two %/mess ''/ages",
        flags: 21,
        messages: &[
            LegacyMessage {
                uid: "20",
                flags: 201,
                dirty: 203,
                size: 210,
                subject: "subject 20",
                userheaders: "userheaders 20",
                preview: "preview 20",
            },
            LegacyMessage {
                uid: "21",
                flags: 301,
                dirty: 303,
                size: 310,
                subject: "subject 21",
                userheaders: "userheaders 21",
                preview: "preview 21",
            },
        ],
    },
];

/// Build a legacy (pre-folder_id) database of the given generation.
fn create_old_data(db: &Db, version: i32) {
    db.exec_statement(
        "CREATE TABLE IF NOT EXISTS folders ( \
         folder_name TEXT PRIMARY KEY, \
         version REAL, \
         flags INTEGER, \
         nextuid INTEGER, \
         time NUMERIC, \
         saved_count INTEGER, \
         unread_count INTEGER, \
         deleted_count INTEGER, \
         junk_count INTEGER, \
         visible_count INTEGER, \
         jnd_count INTEGER, \
         bdata TEXT)",
    )
    .unwrap();

    for folder in FOLDERS {
        db.exec_statement(&format!(
            "INSERT INTO folders VALUES ({}, {}, {}, 5, 6, {}, 0, 0, 0, 0, 0, 'bdata')",
            quote_literal(folder.name),
            version,
            folder.flags,
            folder.messages.len()
        ))
        .unwrap();

        let dirty_column = if version == 0 { "msg_security" } else { "dirty" };
        let mut columns = format!(
            "uid TEXT PRIMARY KEY, flags INTEGER, msg_type INTEGER, read INTEGER, \
             deleted INTEGER, replied INTEGER, important INTEGER, junk INTEGER, \
             attachment INTEGER, {} INTEGER, size INTEGER, dsent NUMERIC, \
             dreceived NUMERIC, subject TEXT, mail_from TEXT, mail_to TEXT, \
             mail_cc TEXT, mlist TEXT, followup_flag TEXT, \
             followup_completed_on TEXT, followup_due_by TEXT, part TEXT, \
             labels TEXT, usertags TEXT, cinfo TEXT, bdata TEXT",
            dirty_column
        );
        if version >= 3 {
            columns.push_str(", userheaders TEXT, preview TEXT");
        }
        if version >= 1 {
            columns.push_str(", created TEXT, modified TEXT");
        }
        db.exec_statement(&format!(
            "CREATE TABLE {} ({})",
            quote_ident(folder.name),
            columns
        ))
        .unwrap();

        for msg in folder.messages {
            let mut values = format!(
                "{}, {}, 7, 0, 0, 0, 0, 0, 0, {}, {}, 111, 112, {}, 'from x', 'to x', \
                 'cc x', 'mlist x', '', '', '', 'part x', 'labels x', 'usertags x', \
                 'cinfo x', 'bdata x'",
                quote_literal(msg.uid),
                msg.flags,
                msg.dirty,
                msg.size,
                quote_literal(msg.subject)
            );
            if version >= 3 {
                values.push_str(&format!(
                    ", {}, {}",
                    quote_literal(msg.userheaders),
                    quote_literal(msg.preview)
                ));
            }
            if version >= 1 {
                values.push_str(", '1', '2'");
            }
            db.exec_statement(&format!(
                "INSERT INTO {} VALUES ({})",
                quote_ident(folder.name),
                values
            ))
            .unwrap();
        }

        let version_table = format!("{}_version", folder.name);
        db.exec_statement(&format!(
            "CREATE TABLE {} (version TEXT)",
            quote_ident(&version_table)
        ))
        .unwrap();
        db.exec_statement(&format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(&version_table),
            version
        ))
        .unwrap();

        if version >= 2 {
            for suffix in ["preview", "bodystructure"] {
                let side = format!("{}_{}", folder.name, suffix);
                db.exec_statement(&format!(
                    "CREATE TABLE {} (uid TEXT PRIMARY KEY, {} TEXT)",
                    quote_ident(&side),
                    suffix
                ))
                .unwrap();
            }
        }
    }
}

fn count_tables(db: &Db) -> i64 {
    let mut count = 0;
    db.exec_select(
        "SELECT COUNT(tbl_name) FROM sqlite_master WHERE type='table'",
        |row| {
            count = row.get(0)?;
            Ok(false)
        },
    )
    .unwrap();
    count
}

fn migrate_generation(version: i32) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    {
        let db = Db::open(&path).unwrap();
        create_old_data(&db, version);
    }

    let cancellable = Cancellable::new();
    let pushed = Arc::new(AtomicI32::new(0));
    let depth = Arc::new(AtomicI32::new(0));
    let percent = Arc::new(AtomicI32::new(0));
    {
        let pushed = Arc::clone(&pushed);
        let depth = Arc::clone(&depth);
        cancellable.on_message(Box::new(move |message| {
            if message.is_some() {
                pushed.fetch_add(1, Ordering::SeqCst);
                depth.fetch_add(1, Ordering::SeqCst);
            } else {
                depth.fetch_sub(1, Ordering::SeqCst);
            }
        }));
        let percent = Arc::clone(&percent);
        cancellable.on_progress(Box::new(move |value| {
            percent.store(value, Ordering::SeqCst);
        }));
    }

    let sdb = StoreDb::new(&path, Some(&cancellable)).unwrap();

    // at least one progress message, balanced, and progress reset after pop
    assert!(pushed.load(Ordering::SeqCst) >= 1);
    assert_eq!(depth.load(Ordering::SeqCst), 0);
    assert_eq!(percent.load(Ordering::SeqCst), 0);

    // only folders, keys and the renamed message tables remain
    assert_eq!(count_tables(sdb.db()) as usize, 2 + FOLDERS.len());
    assert!(sdb.db().has_table("folders").unwrap());
    assert!(sdb.db().has_table("keys").unwrap());

    for folder in FOLDERS {
        let folder_id = sdb.get_folder_id(folder.name).unwrap();
        assert_ne!(folder_id, 0, "folder '{}' has an id", folder.name);
        assert!(sdb.db().has_table(&StoreDb::table_name(folder_id)).unwrap());

        let record = sdb.read_folder(folder.name).unwrap().unwrap();
        assert_eq!(record.flags, folder.flags);
        assert_eq!(record.version, version);
        assert_eq!(record.bdata, "bdata");

        assert_eq!(
            sdb.count_messages(folder.name, CountKind::Total).unwrap() as usize,
            folder.messages.len()
        );

        for msg in folder.messages {
            let loaded = sdb.read_message(folder.name, msg.uid).unwrap();
            assert_eq!(loaded.flags, msg.flags);
            assert_eq!(loaded.dirty, msg.dirty);
            assert_eq!(loaded.size, msg.size);
            assert_eq!(loaded.subject, msg.subject);
            assert_eq!(loaded.from, "from x");
            assert_eq!(loaded.part, "part x");
            if version >= 3 {
                assert_eq!(loaded.userheaders, msg.userheaders);
                assert_eq!(loaded.preview, msg.preview);
            } else {
                assert_eq!(loaded.userheaders, "");
                assert_eq!(loaded.preview, "");
            }
        }
    }

    // idempotent: re-opening the migrated store touches nothing
    drop(sdb);
    let sdb = StoreDb::new(&path, None).unwrap();
    assert_eq!(count_tables(sdb.db()) as usize, 2 + FOLDERS.len());
    assert_eq!(
        sdb.count_messages("with two %/mess ''/ages", CountKind::Total).unwrap(),
        2
    );
}

#[test]
fn migrate_generation_0() {
    migrate_generation(0);
}

#[test]
fn migrate_generation_1() {
    migrate_generation(1);
}

#[test]
fn migrate_generation_2() {
    migrate_generation(2);
}

#[test]
fn migrate_generation_3() {
    migrate_generation(3);
}

#[test]
fn write_then_read_folder_is_bit_equal_but_id_assigned() {
    let dir = tempfile::tempdir().unwrap();
    let sdb = StoreDb::new(dir.path().join("store.db"), None).unwrap();

    let record = schedario_core::FolderRecord {
        folder_name: "Inbox/folder1".into(),
        folder_id: 0,
        version: 3,
        flags: 11,
        nextuid: 12,
        timestamp: 13,
        saved_count: 14,
        unread_count: 15,
        deleted_count: 16,
        junk_count: 17,
        visible_count: 18,
        jnd_count: 19,
        bdata: "fir1bdata".into(),
    };
    let folder_id = sdb.write_folder(&record.folder_name, &record).unwrap();
    let loaded = sdb.read_folder(&record.folder_name).unwrap().unwrap();
    assert_eq!(loaded.folder_id, folder_id);
    let mut expected = record.clone();
    expected.folder_id = folder_id;
    assert_eq!(loaded, expected);
}

#[test]
fn clear_preserves_messages_only_on_clear_not_delete() {
    let dir = tempfile::tempdir().unwrap();
    let sdb = StoreDb::new(dir.path().join("store.db"), None).unwrap();

    let folder = schedario_core::FolderRecord {
        folder_name: "f1".into(),
        ..Default::default()
    };
    sdb.write_folder("f1", &folder).unwrap();
    sdb.write_message(
        "f1",
        &schedario_core::MessageRecord { uid: "10".into(), ..Default::default() },
    )
    .unwrap();

    // clear keeps the record (and the table), delete drops the table
    sdb.clear_folder("f1").unwrap();
    assert_eq!(sdb.get_folder_id("f1").unwrap(), 1);
    assert_eq!(sdb.count_messages("f1", CountKind::Total).unwrap(), 0);

    sdb.write_message(
        "f1",
        &schedario_core::MessageRecord { uid: "11".into(), ..Default::default() },
    )
    .unwrap();
    sdb.delete_folder("f1").unwrap();
    assert_eq!(sdb.get_folder_id("f1").unwrap(), 0);
    assert!(!sdb.db().has_table("messages_1").unwrap());
}
