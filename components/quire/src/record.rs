/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::*;
use rusqlite::Row;
use uuid::Uuid;

/// A named collection of notes.
///
/// `usn` is 0 until the server first acknowledges the book; `dirty` means the
/// local copy has changes not yet uploaded. A deleted book keeps its label
/// until the deletion is propagated, so the tombstone can still be matched by
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub uuid: String,
    pub label: String,
    pub usn: i64,
    pub dirty: bool,
    pub deleted: bool,
}

impl Book {
    /// A freshly created local book, not yet known to the server.
    pub fn new_local(label: impl Into<String>) -> Self {
        Book {
            uuid: Uuid::new_v4().to_string(),
            label: label.into(),
            usn: 0,
            dirty: true,
            deleted: false,
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Book> {
        Ok(Book {
            uuid: row.get("uuid")?,
            label: row.get("label")?,
            usn: row.get("usn")?,
            dirty: row.get("dirty")?,
            deleted: row.get("deleted")?,
        })
    }
}

/// A single note. `id` is the local rowid, used only for display and
/// command-line addressing; it never leaves this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: i64,
    pub uuid: String,
    pub book_uuid: String,
    pub body: String,
    pub added_on: i64,
    pub edited_on: i64,
    pub usn: i64,
    pub dirty: bool,
    pub deleted: bool,
}

impl Note {
    /// A freshly created local note, not yet known to the server.
    pub fn new_local(book_uuid: impl Into<String>, body: impl Into<String>, added_on: i64) -> Self {
        Note {
            id: 0,
            uuid: Uuid::new_v4().to_string(),
            book_uuid: book_uuid.into(),
            body: body.into(),
            added_on,
            edited_on: 0,
            usn: 0,
            dirty: true,
            deleted: false,
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Note> {
        Ok(Note {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            book_uuid: row.get("book_uuid")?,
            body: row.get("body")?,
            added_on: row.get("added_on")?,
            edited_on: row.get("edited_on")?,
            usn: row.get("usn")?,
            dirty: row.get("dirty")?,
            deleted: row.get("deleted")?,
        })
    }
}
