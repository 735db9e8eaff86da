/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Propagating locally-dirty records to the server.
//!
//! Books go first so that new notes always reference a server-resolved book
//! uuid. Every successful call returns the record's new USN; if the USNs
//! stop being contiguous with our `last_max_usn` watermark someone else has
//! written to the account, and the orchestrator schedules another
//! download/upload pass. A 409 means the same thing, except the record also
//! stays dirty for that second pass.

use crate::db::NotebookDb;
use crate::error::*;
use crate::schema;
use crate::sync::client::RemoteClient;
use interrupt_support::Interruptee;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct UploadOutcome {
    pub is_behind: bool,
    pub books: usize,
    pub notes: usize,
}

pub(super) fn upload_all(
    db: &NotebookDb,
    client: &dyn RemoteClient,
    scope: &dyn Interruptee,
) -> Result<UploadOutcome> {
    let mut uploader = Uploader {
        db,
        client,
        scope,
        last_max_usn: db.get_meta(schema::LAST_MAX_USN_META_KEY)?.unwrap_or(0),
        is_behind: false,
    };
    let books = uploader.upload_books()?;
    let notes = uploader.upload_notes()?;
    Ok(UploadOutcome {
        is_behind: uploader.is_behind,
        books,
        notes,
    })
}

struct Uploader<'a> {
    db: &'a NotebookDb,
    client: &'a dyn RemoteClient,
    scope: &'a dyn Interruptee,
    last_max_usn: i64,
    is_behind: bool,
}

impl<'a> Uploader<'a> {
    /// A contiguous response USN advances the watermark; a gap means the
    /// server has records we haven't seen.
    fn reconcile_usn(&mut self, resp_usn: i64) -> Result<()> {
        if resp_usn == self.last_max_usn + 1 {
            self.last_max_usn = resp_usn;
            self.db
                .put_meta(schema::LAST_MAX_USN_META_KEY, &self.last_max_usn)?;
        } else {
            log::debug!(
                "Server usn {} is not contiguous with local watermark {}; behind",
                resp_usn,
                self.last_max_usn
            );
            self.is_behind = true;
        }
        Ok(())
    }

    /// 409 marks us behind and leaves the record dirty for the next pass;
    /// every other error aborts the sync.
    fn note_conflict(&mut self, e: Error) -> Result<()> {
        if e.is_conflict() {
            log::debug!("Server rejected stale update; will retry after catching up");
            self.is_behind = true;
            Ok(())
        } else {
            Err(e)
        }
    }

    fn upload_books(&mut self) -> Result<usize> {
        let mut uploaded = 0;
        for mut book in self.db.get_dirty_books()? {
            self.scope.err_if_interrupted()?;
            if book.usn == 0 && book.deleted {
                // Never made it upstream; nothing to tell the server.
                self.db.expunge_book(&book.uuid)?;
                continue;
            }
            if book.usn == 0 {
                let resp = match self.client.create_book(&book.label) {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.note_conflict(e)?;
                        continue;
                    }
                };
                if resp.uuid != book.uuid {
                    self.db.adopt_book_uuid(&book.uuid, &resp.uuid)?;
                    book.uuid = resp.uuid;
                }
                book.usn = resp.usn;
                book.dirty = false;
                self.db.save_book(&book)?;
                self.reconcile_usn(book.usn)?;
            } else if book.deleted {
                // A book whose notes still carry unsent changes keeps its
                // tombstone local for now; a later sync picks it up once the
                // notes have drained.
                if self.db.count_dirty_notes_in_book(&book.uuid)? > 0 {
                    log::debug!(
                        "Holding back deletion of book {}: it still has dirty notes",
                        book.uuid
                    );
                    continue;
                }
                let resp = match self.client.delete_book(&book.uuid) {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.note_conflict(e)?;
                        continue;
                    }
                };
                self.db.expunge_book(&book.uuid)?;
                self.reconcile_usn(resp.usn)?;
            } else {
                let resp = match self.client.update_book(&book.uuid, &book.label) {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.note_conflict(e)?;
                        continue;
                    }
                };
                book.usn = resp.usn;
                book.dirty = false;
                self.db.save_book(&book)?;
                self.reconcile_usn(book.usn)?;
            }
            uploaded += 1;
        }
        Ok(uploaded)
    }

    fn upload_notes(&mut self) -> Result<usize> {
        let mut uploaded = 0;
        for mut note in self.db.get_dirty_notes()? {
            self.scope.err_if_interrupted()?;
            if note.usn == 0 && note.deleted {
                self.db.expunge_note(&note.uuid)?;
                continue;
            }
            if note.usn == 0 {
                let resp = match self.client.create_note(&note.book_uuid, &note.body) {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.note_conflict(e)?;
                        continue;
                    }
                };
                if resp.uuid != note.uuid {
                    self.db.adopt_note_uuid(&note.uuid, &resp.uuid)?;
                    note.uuid = resp.uuid;
                }
                note.usn = resp.usn;
                note.dirty = false;
                self.db.save_note(&note)?;
                self.reconcile_usn(note.usn)?;
            } else if note.deleted {
                let resp = match self.client.delete_note(&note.uuid) {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.note_conflict(e)?;
                        continue;
                    }
                };
                self.db.expunge_note(&note.uuid)?;
                self.reconcile_usn(resp.usn)?;
            } else {
                let resp = match self
                    .client
                    .update_note(&note.uuid, &note.book_uuid, &note.body)
                {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.note_conflict(e)?;
                        continue;
                    }
                };
                note.usn = resp.usn;
                note.dirty = false;
                self.db.save_note(&note)?;
                self.reconcile_usn(note.usn)?;
            }
            uploaded += 1;
        }
        Ok(uploaded)
    }
}
