/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::db::NotebookDb;
use crate::error::*;
use crate::record::{Book, Note};
use crate::schema;
use crate::sync::client::RemoteClient;
use crate::sync::engine::{self, BootstrapPrompt, SyncOpts, SyncSummary};
use crate::util;
use interrupt_support::Interruptee;
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;

/// The public face of the notebook: local CRUD plus the sync entry point.
///
/// Every mutating operation drives the record lifecycle the sync engine
/// expects: creation leaves a record dirty with `usn = 0`, edits mark it
/// dirty without touching the usn, and removal tombstones it (clearing note
/// bodies, keeping book labels) until the server confirms the delete.
pub struct NoteStore {
    db: Mutex<NotebookDb>,
}

impl NoteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(NotebookDb::open(path)?),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(NotebookDb::open_in_memory()?),
        })
    }

    pub fn lock_db(&self) -> MutexGuard<'_, NotebookDb> {
        self.db.lock()
    }

    pub fn add_book(&self, label: &str) -> Result<Book> {
        let db = self.lock_db();
        if db.get_book_by_label(label)?.is_some() {
            return Err(Error::DuplicateLabel(label.to_string()));
        }
        let book = Book::new_local(label);
        let tx = db.unchecked_transaction()?;
        db.insert_book(&book)?;
        tx.commit()?;
        Ok(book)
    }

    pub fn add_note(&self, book_uuid: &str, body: &str) -> Result<Note> {
        let db = self.lock_db();
        match db.get_book(book_uuid)? {
            Some(book) if !book.deleted => {}
            _ => return Err(Error::NoSuchRecord(book_uuid.to_string())),
        }
        let note = Note::new_local(book_uuid, body, util::now_nanos());
        let tx = db.unchecked_transaction()?;
        db.insert_note(&note)?;
        tx.commit()?;
        Ok(note)
    }

    pub fn update_note(&self, uuid: &str, body: &str) -> Result<Note> {
        let db = self.lock_db();
        let mut note = match db.get_note(uuid)? {
            Some(n) if !n.deleted => n,
            _ => return Err(Error::NoSuchRecord(uuid.to_string())),
        };
        note.body = body.to_string();
        note.edited_on = util::now_nanos();
        note.dirty = true;
        let tx = db.unchecked_transaction()?;
        db.save_note(&note)?;
        tx.commit()?;
        Ok(note)
    }

    pub fn update_book(&self, uuid: &str, label: &str) -> Result<Book> {
        let db = self.lock_db();
        let mut book = match db.get_book(uuid)? {
            Some(b) if !b.deleted => b,
            _ => return Err(Error::NoSuchRecord(uuid.to_string())),
        };
        if let Some(other) = db.get_book_by_label(label)? {
            if other.uuid != book.uuid {
                return Err(Error::DuplicateLabel(label.to_string()));
            }
        }
        book.label = label.to_string();
        book.dirty = true;
        let tx = db.unchecked_transaction()?;
        db.save_book(&book)?;
        tx.commit()?;
        Ok(book)
    }

    /// Tombstones a note. The body is cleared immediately; the row is only
    /// expunged once the server confirms the delete.
    pub fn remove_note(&self, uuid: &str) -> Result<()> {
        let db = self.lock_db();
        let mut note = match db.get_note(uuid)? {
            Some(n) if !n.deleted => n,
            _ => return Err(Error::NoSuchRecord(uuid.to_string())),
        };
        note.body = String::new();
        note.deleted = true;
        note.dirty = true;
        let tx = db.unchecked_transaction()?;
        db.save_note(&note)?;
        tx.commit()?;
        Ok(())
    }

    /// Tombstones a book and every note in it. The label is kept so the
    /// tombstone still occupies its name on this device's history; labels are
    /// only unique among live books.
    pub fn remove_book(&self, uuid: &str) -> Result<()> {
        let db = self.lock_db();
        let mut book = match db.get_book(uuid)? {
            Some(b) if !b.deleted => b,
            _ => return Err(Error::NoSuchRecord(uuid.to_string())),
        };
        let tx = db.unchecked_transaction()?;
        for mut note in db.get_notes_in_book(uuid)? {
            note.body = String::new();
            note.deleted = true;
            note.dirty = true;
            db.save_note(&note)?;
        }
        book.deleted = true;
        book.dirty = true;
        db.save_book(&book)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_book(&self, uuid: &str) -> Result<Option<Book>> {
        self.lock_db().get_book(uuid)
    }

    pub fn get_book_by_label(&self, label: &str) -> Result<Option<Book>> {
        self.lock_db().get_book_by_label(label)
    }

    pub fn get_all_books(&self) -> Result<Vec<Book>> {
        self.lock_db().get_all_books()
    }

    pub fn get_note(&self, uuid: &str) -> Result<Option<Note>> {
        self.lock_db().get_note(uuid)
    }

    pub fn get_note_by_id(&self, id: i64) -> Result<Option<Note>> {
        self.lock_db().get_note_by_id(id)
    }

    pub fn get_notes_in_book(&self, book_uuid: &str) -> Result<Vec<Note>> {
        self.lock_db().get_notes_in_book(book_uuid)
    }

    // Session scalars. The token is handed to us by the caller; exchanging
    // credentials for one is not this crate's business.

    pub fn save_session(&self, token: &str, expiry: i64) -> Result<()> {
        let db = self.lock_db();
        let tx = db.unchecked_transaction()?;
        db.put_meta(schema::SESSION_TOKEN_META_KEY, &token)?;
        db.put_meta(schema::SESSION_TOKEN_EXPIRY_META_KEY, &expiry)?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_session(&self) -> Result<()> {
        let db = self.lock_db();
        let tx = db.unchecked_transaction()?;
        db.delete_meta(schema::SESSION_TOKEN_META_KEY)?;
        db.delete_meta(schema::SESSION_TOKEN_EXPIRY_META_KEY)?;
        tx.commit()?;
        Ok(())
    }

    pub fn session_token(&self) -> Result<Option<String>> {
        self.lock_db().get_meta(schema::SESSION_TOKEN_META_KEY)
    }

    /// Runs one full download/merge/upload cycle against `client`. See the
    /// sync module for the machinery.
    pub fn sync(
        &self,
        client: &dyn RemoteClient,
        opts: &SyncOpts,
        prompt: &dyn BootstrapPrompt,
        scope: &dyn Interruptee,
    ) -> Result<SyncSummary> {
        let db = self.lock_db();
        engine::sync(&db, client, opts, prompt, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_book_and_note_start_unsent() {
        let store = NoteStore::new_in_memory().unwrap();
        let book = store.add_book("rust").unwrap();
        assert_eq!(book.usn, 0);
        assert!(book.dirty);

        let note = store.add_note(&book.uuid, "fearless concurrency").unwrap();
        assert_eq!(note.usn, 0);
        assert!(note.dirty);
        assert_eq!(note.edited_on, 0);
        assert!(note.added_on > 0);
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let store = NoteStore::new_in_memory().unwrap();
        store.add_book("js").unwrap();
        let err = store.add_book("js").unwrap_err();
        assert!(matches!(err, Error::DuplicateLabel(_)));
    }

    #[test]
    fn test_add_note_requires_live_book() {
        let store = NoteStore::new_in_memory().unwrap();
        assert!(matches!(
            store.add_note("missing", "text").unwrap_err(),
            Error::NoSuchRecord(_)
        ));
        let book = store.add_book("paused").unwrap();
        store.remove_book(&book.uuid).unwrap();
        assert!(matches!(
            store.add_note(&book.uuid, "text").unwrap_err(),
            Error::NoSuchRecord(_)
        ));
    }

    #[test]
    fn test_update_note_marks_dirty_and_stamps_edit() {
        let store = NoteStore::new_in_memory().unwrap();
        let book = store.add_book("log").unwrap();
        let note = store.add_note(&book.uuid, "v1").unwrap();

        let updated = store.update_note(&note.uuid, "v2").unwrap();
        assert_eq!(updated.body, "v2");
        assert!(updated.dirty);
        assert!(updated.edited_on > 0);
        assert_eq!(updated.usn, note.usn);
    }

    #[test]
    fn test_remove_note_clears_body() {
        let store = NoteStore::new_in_memory().unwrap();
        let book = store.add_book("log").unwrap();
        let note = store.add_note(&book.uuid, "secret").unwrap();
        store.remove_note(&note.uuid).unwrap();

        let tombstone = store.get_note(&note.uuid).unwrap().unwrap();
        assert!(tombstone.deleted);
        assert!(tombstone.dirty);
        assert_eq!(tombstone.body, "");
        // No longer listed.
        assert!(store.get_notes_in_book(&book.uuid).unwrap().is_empty());
    }

    #[test]
    fn test_remove_book_tombstones_notes_and_keeps_label() {
        let store = NoteStore::new_in_memory().unwrap();
        let book = store.add_book("todo").unwrap();
        let note = store.add_note(&book.uuid, "buy milk").unwrap();
        store.remove_book(&book.uuid).unwrap();

        let tombstone = store.get_book(&book.uuid).unwrap().unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.label, "todo");
        let note = store.get_note(&note.uuid).unwrap().unwrap();
        assert!(note.deleted);
        assert_eq!(note.body, "");
        // The label is free again for a live book.
        store.add_book("todo").unwrap();
    }

    #[test]
    fn test_rename_book() {
        let store = NoteStore::new_in_memory().unwrap();
        let book = store.add_book("misc").unwrap();
        store.add_book("taken").unwrap();

        assert!(matches!(
            store.update_book(&book.uuid, "taken").unwrap_err(),
            Error::DuplicateLabel(_)
        ));
        let renamed = store.update_book(&book.uuid, "misc2").unwrap();
        assert_eq!(renamed.label, "misc2");
        assert!(renamed.dirty);
        // Renaming to the current label is allowed.
        store.update_book(&book.uuid, "misc2").unwrap();
    }

    #[test]
    fn test_session_round_trip() {
        let store = NoteStore::new_in_memory().unwrap();
        assert_eq!(store.session_token().unwrap(), None);
        store.save_session("token-1", 12345).unwrap();
        assert_eq!(store.session_token().unwrap().as_deref(), Some("token-1"));
        store.clear_session().unwrap();
        assert_eq!(store.session_token().unwrap(), None);
    }
}
