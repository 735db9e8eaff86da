/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Notebook DB handling
//!
//! One `rusqlite::Connection`, opened for the life of the process. All sync
//! work runs inside a single [`UncheckedTransaction`] so a failure anywhere
//! in the download/merge/upload sequence rolls the whole sync back.

use crate::error::*;
use crate::record::{Book, Note};
use crate::schema;
use lazy_static::lazy_static;
use rusqlite::{
    named_params,
    types::{FromSql, ToSql},
    Connection, OptionalExtension,
};
use std::ops::Deref;
use std::path::Path;
use std::time::Instant;

const BOOK_COLS: &str = "uuid, label, usn, dirty, deleted";
const NOTE_COLS: &str = "id, uuid, book_uuid, body, added_on, edited_on, usn, dirty, deleted";

pub struct NotebookDb {
    pub db: Connection,
}

impl NotebookDb {
    pub fn with_connection(db: Connection) -> Result<Self> {
        // Keep temp files in memory; some targets have no usable tmp
        // partition.
        db.pragma_update(None, "temp_store", 2)?;
        let notebook = Self { db };
        let tx = notebook.unchecked_transaction()?;
        schema::init(&tx)?;
        tx.commit()?;
        Ok(notebook)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn unchecked_transaction(&self) -> Result<UncheckedTransaction<'_>> {
        UncheckedTransaction::new(&self.db)
    }
}

impl Deref for NotebookDb {
    type Target = Connection;
    #[inline]
    fn deref(&self) -> &Connection {
        &self.db
    }
}

// System scalars.

impl NotebookDb {
    pub(crate) fn put_meta(&self, key: &str, value: &dyn ToSql) -> Result<()> {
        let mut stmt = self
            .db
            .prepare_cached("REPLACE INTO system (key, value) VALUES (:key, :value)")?;
        stmt.execute(named_params! { ":key": key, ":value": value })?;
        Ok(())
    }

    pub(crate) fn get_meta<T: FromSql>(&self, key: &str) -> Result<Option<T>> {
        let mut stmt = self
            .db
            .prepare_cached("SELECT value FROM system WHERE key = :key")?;
        Ok(stmt
            .query_row(named_params! { ":key": key }, |row| row.get(0))
            .optional()?)
    }

    pub(crate) fn delete_meta(&self, key: &str) -> Result<()> {
        let mut stmt = self
            .db
            .prepare_cached("DELETE FROM system WHERE key = :key")?;
        stmt.execute(named_params! { ":key": key })?;
        Ok(())
    }
}

// Books.

lazy_static! {
    static ref GET_BOOK_SQL: String = format!(
        "SELECT {cols} FROM books WHERE uuid = :uuid",
        cols = BOOK_COLS
    );
    static ref GET_BOOK_BY_LABEL_SQL: String = format!(
        "SELECT {cols} FROM books WHERE label = :label AND deleted = 0",
        cols = BOOK_COLS
    );
    static ref GET_ALL_BOOKS_SQL: String = format!(
        "SELECT {cols} FROM books WHERE deleted = 0 ORDER BY label",
        cols = BOOK_COLS
    );
    static ref GET_DIRTY_BOOKS_SQL: String = format!(
        "SELECT {cols} FROM books WHERE dirty = 1 ORDER BY label",
        cols = BOOK_COLS
    );
    static ref INSERT_BOOK_SQL: String = format!(
        "INSERT INTO books ({cols})
         VALUES (:uuid, :label, :usn, :dirty, :deleted)",
        cols = BOOK_COLS
    );
}

impl NotebookDb {
    pub fn get_book(&self, uuid: &str) -> Result<Option<Book>> {
        let mut stmt = self.db.prepare_cached(&GET_BOOK_SQL)?;
        let mut rows = stmt.query_and_then(named_params! { ":uuid": uuid }, Book::from_row)?;
        rows.next().transpose()
    }

    pub fn get_book_by_label(&self, label: &str) -> Result<Option<Book>> {
        let mut stmt = self.db.prepare_cached(&GET_BOOK_BY_LABEL_SQL)?;
        let mut rows = stmt.query_and_then(named_params! { ":label": label }, Book::from_row)?;
        rows.next().transpose()
    }

    pub fn get_all_books(&self) -> Result<Vec<Book>> {
        let mut stmt = self.db.prepare_cached(&GET_ALL_BOOKS_SQL)?;
        let rows = stmt.query_and_then([], Book::from_row)?;
        rows.collect()
    }

    pub(crate) fn get_dirty_books(&self) -> Result<Vec<Book>> {
        let mut stmt = self.db.prepare_cached(&GET_DIRTY_BOOKS_SQL)?;
        let rows = stmt.query_and_then([], Book::from_row)?;
        rows.collect()
    }

    pub(crate) fn insert_book(&self, book: &Book) -> Result<()> {
        let mut stmt = self.db.prepare_cached(&INSERT_BOOK_SQL)?;
        stmt.execute(named_params! {
            ":uuid": book.uuid,
            ":label": book.label,
            ":usn": book.usn,
            ":dirty": book.dirty,
            ":deleted": book.deleted,
        })?;
        Ok(())
    }

    /// Writes every column of an existing row. The uuid is the row identity;
    /// use [`NotebookDb::adopt_book_uuid`] when the server reassigns it.
    pub(crate) fn save_book(&self, book: &Book) -> Result<()> {
        let mut stmt = self.db.prepare_cached(
            "UPDATE books
             SET label = :label, usn = :usn, dirty = :dirty, deleted = :deleted
             WHERE uuid = :uuid",
        )?;
        let changed = stmt.execute(named_params! {
            ":uuid": book.uuid,
            ":label": book.label,
            ":usn": book.usn,
            ":dirty": book.dirty,
            ":deleted": book.deleted,
        })?;
        if changed == 0 {
            return Err(Error::NoSuchRecord(book.uuid.clone()));
        }
        Ok(())
    }

    /// Rewrites a locally-generated book uuid to the server-assigned one,
    /// carrying every dependent note along.
    pub(crate) fn adopt_book_uuid(&self, old: &str, new: &str) -> Result<()> {
        self.db.execute(
            "UPDATE books SET uuid = :new WHERE uuid = :old",
            named_params! { ":old": old, ":new": new },
        )?;
        self.db.execute(
            "UPDATE notes SET book_uuid = :new WHERE book_uuid = :old",
            named_params! { ":old": old, ":new": new },
        )?;
        Ok(())
    }

    pub(crate) fn expunge_book(&self, uuid: &str) -> Result<()> {
        self.db.execute(
            "DELETE FROM books WHERE uuid = :uuid",
            named_params! { ":uuid": uuid },
        )?;
        Ok(())
    }

    pub(crate) fn count_live_books(&self) -> Result<u32> {
        Ok(self
            .db
            .query_row("SELECT COUNT(*) FROM books WHERE deleted = 0", [], |row| {
                row.get(0)
            })?)
    }

    /// (uuid, dirty, usn) of every book row, tombstones included.
    pub(crate) fn all_book_states(&self) -> Result<Vec<(String, bool, i64)>> {
        let mut stmt = self.db.prepare_cached("SELECT uuid, dirty, usn FROM books")?;
        let rows = stmt.query_and_then([], |row| {
            Ok::<_, Error>((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect()
    }
}

// Notes.

lazy_static! {
    static ref GET_NOTE_SQL: String = format!(
        "SELECT {cols} FROM notes WHERE uuid = :uuid",
        cols = NOTE_COLS
    );
    static ref GET_NOTE_BY_ID_SQL: String = format!(
        "SELECT {cols} FROM notes WHERE id = :id",
        cols = NOTE_COLS
    );
    static ref GET_NOTES_IN_BOOK_SQL: String = format!(
        "SELECT {cols} FROM notes
         WHERE book_uuid = :book_uuid AND deleted = 0
         ORDER BY added_on, id",
        cols = NOTE_COLS
    );
    static ref GET_DIRTY_NOTES_SQL: String = format!(
        "SELECT {cols} FROM notes WHERE dirty = 1 ORDER BY added_on",
        cols = NOTE_COLS
    );
    static ref INSERT_NOTE_SQL: String = format!(
        "INSERT INTO notes ({cols})
         VALUES (NULL, :uuid, :book_uuid, :body, :added_on, :edited_on, :usn, :dirty, :deleted)",
        cols = NOTE_COLS
    );
}

impl NotebookDb {
    pub fn get_note(&self, uuid: &str) -> Result<Option<Note>> {
        let mut stmt = self.db.prepare_cached(&GET_NOTE_SQL)?;
        let mut rows = stmt.query_and_then(named_params! { ":uuid": uuid }, Note::from_row)?;
        rows.next().transpose()
    }

    pub fn get_note_by_id(&self, id: i64) -> Result<Option<Note>> {
        let mut stmt = self.db.prepare_cached(&GET_NOTE_BY_ID_SQL)?;
        let mut rows = stmt.query_and_then(named_params! { ":id": id }, Note::from_row)?;
        rows.next().transpose()
    }

    pub fn get_notes_in_book(&self, book_uuid: &str) -> Result<Vec<Note>> {
        let mut stmt = self.db.prepare_cached(&GET_NOTES_IN_BOOK_SQL)?;
        let rows = stmt.query_and_then(named_params! { ":book_uuid": book_uuid }, Note::from_row)?;
        rows.collect()
    }

    pub(crate) fn get_dirty_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.db.prepare_cached(&GET_DIRTY_NOTES_SQL)?;
        let rows = stmt.query_and_then([], Note::from_row)?;
        rows.collect()
    }

    pub(crate) fn insert_note(&self, note: &Note) -> Result<()> {
        let mut stmt = self.db.prepare_cached(&INSERT_NOTE_SQL)?;
        stmt.execute(named_params! {
            ":uuid": note.uuid,
            ":book_uuid": note.book_uuid,
            ":body": note.body,
            ":added_on": note.added_on,
            ":edited_on": note.edited_on,
            ":usn": note.usn,
            ":dirty": note.dirty,
            ":deleted": note.deleted,
        })?;
        Ok(())
    }

    pub(crate) fn save_note(&self, note: &Note) -> Result<()> {
        let mut stmt = self.db.prepare_cached(
            "UPDATE notes
             SET book_uuid = :book_uuid,
                 body      = :body,
                 added_on  = :added_on,
                 edited_on = :edited_on,
                 usn       = :usn,
                 dirty     = :dirty,
                 deleted   = :deleted
             WHERE uuid = :uuid",
        )?;
        let changed = stmt.execute(named_params! {
            ":uuid": note.uuid,
            ":book_uuid": note.book_uuid,
            ":body": note.body,
            ":added_on": note.added_on,
            ":edited_on": note.edited_on,
            ":usn": note.usn,
            ":dirty": note.dirty,
            ":deleted": note.deleted,
        })?;
        if changed == 0 {
            return Err(Error::NoSuchRecord(note.uuid.clone()));
        }
        Ok(())
    }

    pub(crate) fn adopt_note_uuid(&self, old: &str, new: &str) -> Result<()> {
        self.db.execute(
            "UPDATE notes SET uuid = :new WHERE uuid = :old",
            named_params! { ":old": old, ":new": new },
        )?;
        Ok(())
    }

    pub(crate) fn expunge_note(&self, uuid: &str) -> Result<()> {
        self.db.execute(
            "DELETE FROM notes WHERE uuid = :uuid",
            named_params! { ":uuid": uuid },
        )?;
        Ok(())
    }

    pub(crate) fn count_live_notes(&self) -> Result<u32> {
        Ok(self
            .db
            .query_row("SELECT COUNT(*) FROM notes WHERE deleted = 0", [], |row| {
                row.get(0)
            })?)
    }

    pub(crate) fn count_dirty_notes_in_book(&self, book_uuid: &str) -> Result<u32> {
        Ok(self.db.query_row(
            "SELECT COUNT(*) FROM notes WHERE book_uuid = :book_uuid AND dirty = 1",
            named_params! { ":book_uuid": book_uuid },
            |row| row.get(0),
        )?)
    }

    /// (uuid, dirty, usn) of every note row, tombstones included.
    pub(crate) fn all_note_states(&self) -> Result<Vec<(String, bool, i64)>> {
        let mut stmt = self.db.prepare_cached("SELECT uuid, dirty, usn FROM notes")?;
        let rows = stmt.query_and_then([], |row| {
            Ok::<_, Error>((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect()
    }

    /// Resets every record to the never-uploaded state. Used when the server
    /// has been emptied and the user confirms a re-upload of local data.
    pub(crate) fn mark_all_unsent(&self) -> Result<()> {
        self.db
            .execute("UPDATE books SET dirty = 1, usn = 0", [])?;
        self.db
            .execute("UPDATE notes SET dirty = 1, usn = 0", [])?;
        Ok(())
    }

    /// Notes whose book is missing or tombstoned. These are reported, never
    /// repaired.
    pub(crate) fn orphaned_notes(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.db.prepare_cached(
            "SELECT n.uuid, n.book_uuid
             FROM notes n LEFT JOIN books b ON n.book_uuid = b.uuid
             WHERE n.deleted = 0 AND (b.uuid IS NULL OR b.deleted = 1)",
        )?;
        let rows = stmt.query_and_then([], |row| Ok::<_, Error>((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}

/// rusqlite wants a mutable reference to create a transaction, as a way to
/// save us from ourselves. The sync engine holds `&NotebookDb` through a long
/// call chain, so we side-step that with a manual BEGIN/COMMIT pair; the
/// responsibility of not nesting transactions is on our head. Dropping an
/// uncommitted transaction rolls it back.
pub struct UncheckedTransaction<'conn> {
    conn: &'conn Connection,
    started_at: Instant,
}

impl<'conn> UncheckedTransaction<'conn> {
    pub fn new(conn: &'conn Connection) -> Result<Self> {
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(UncheckedTransaction {
            conn,
            started_at: Instant::now(),
        })
    }

    pub fn commit(self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        log::trace!(
            "Transaction committed after {:?}",
            self.started_at.elapsed()
        );
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.rollback_()
    }

    fn rollback_(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl<'conn> Deref for UncheckedTransaction<'conn> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl<'conn> Drop for UncheckedTransaction<'conn> {
    fn drop(&mut self) {
        if self.conn.is_autocommit() {
            return;
        }
        if let Err(e) = self.rollback_() {
            log::warn!("Error dropping an unchecked transaction: {}", e);
        }
    }
}
