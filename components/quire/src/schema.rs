/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Notebook schema
//! ===============
//!
//! Three tables:
//!
//! - `books`: one row per book, keyed by uuid. `label` is unique among rows
//!   with `deleted = 0` (a partial index); a tombstoned book keeps its label
//!   until its deletion has been uploaded, and the label may be reused by a
//!   live book in the meantime.
//! - `notes`: one row per note. `id` is an autoincrement rowid used for
//!   local addressing only. `added_on`/`edited_on` are nanosecond epoch
//!   timestamps; `edited_on` stays 0 until the first edit.
//! - `system`: key/value scalars. Holds the session token and the sync
//!   watermarks (`last_sync_time`, `last_max_usn`). The column is
//!   deliberately typeless so integer watermarks round-trip without
//!   string conversion.
//!
//! Both record tables carry the sync state machine columns: `usn` (0 until
//! the server first acknowledges the record), `dirty` (local changes not yet
//! uploaded) and `deleted` (tombstone awaiting upload, after which the row is
//! expunged).

use crate::error::*;
use rusqlite::Connection;

pub(crate) const VERSION: i64 = 1;

const CREATE_BOOKS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS books (
        uuid    TEXT PRIMARY KEY,
        label   TEXT NOT NULL,
        usn     INTEGER NOT NULL DEFAULT 0,
        dirty   TINYINT NOT NULL DEFAULT 0,
        deleted TINYINT NOT NULL DEFAULT 0
    )
";

const CREATE_NOTES_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid      TEXT NOT NULL UNIQUE,
        book_uuid TEXT NOT NULL,
        body      TEXT NOT NULL DEFAULT '',
        added_on  INTEGER NOT NULL DEFAULT 0,
        edited_on INTEGER NOT NULL DEFAULT 0,
        usn       INTEGER NOT NULL DEFAULT 0,
        dirty     TINYINT NOT NULL DEFAULT 0,
        deleted   TINYINT NOT NULL DEFAULT 0
    )
";

const CREATE_SYSTEM_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS system (
        key   TEXT PRIMARY KEY,
        value NOT NULL
    )
";

const CREATE_LIVE_LABEL_INDEX_SQL: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_books_label_live
    ON books (label) WHERE deleted = 0
";

const CREATE_NOTES_BOOK_INDEX_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_notes_book_uuid
    ON notes (book_uuid)
";

pub(crate) static LAST_SYNC_META_KEY: &str = "last_sync_time";
pub(crate) static LAST_MAX_USN_META_KEY: &str = "last_max_usn";
pub(crate) static SESSION_TOKEN_META_KEY: &str = "session_token";
pub(crate) static SESSION_TOKEN_EXPIRY_META_KEY: &str = "session_token_expiry";

pub(crate) fn init(db: &Connection) -> Result<()> {
    let user_version: i64 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version == 0 {
        return create(db);
    }
    if user_version != VERSION {
        if user_version < VERSION {
            upgrade(db, user_version)?;
        } else {
            log::warn!(
                "Loaded future schema version {} (we only understand version {}). \
                 Optimistically continuing",
                user_version,
                VERSION
            );
        }
    }
    Ok(())
}

fn upgrade(db: &Connection, from: i64) -> Result<()> {
    log::debug!("Upgrading schema from {} to {}", from, VERSION);
    if from == VERSION {
        return Ok(());
    }
    for version in from..VERSION {
        upgrade_from(db, version)?;
    }
    db.execute_batch(&format!("PRAGMA user_version = {}", VERSION))?;
    Ok(())
}

fn upgrade_from(db: &Connection, from: i64) -> Result<()> {
    let _ = db;
    // No historical versions yet; version 1 is current.
    Err(Error::IncompatibleVersion(from))
}

fn create(db: &Connection) -> Result<()> {
    log::debug!("Creating schema");
    for sql in [
        CREATE_BOOKS_TABLE_SQL,
        CREATE_NOTES_TABLE_SQL,
        CREATE_SYSTEM_TABLE_SQL,
        CREATE_LIVE_LABEL_INDEX_SQL,
        CREATE_NOTES_BOOK_INDEX_SQL,
    ] {
        db.execute_batch(sql)?;
    }
    db.execute_batch(&format!("PRAGMA user_version = {}", VERSION))?;
    Ok(())
}
