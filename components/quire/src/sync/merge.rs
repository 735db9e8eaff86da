/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Applying downloaded server records onto the local store.
//!
//! The server always wins on record fields; local divergence survives in two
//! sanctioned ways only. A local book whose label collides with an incoming
//! one is renamed (`label_2`, `label_3`, …) and marked dirty rather than
//! clobbered, and a note body edited on both sides is folded into a conflict
//! report and marked dirty so the user's resolution uploads later.
//!
//! Merging is per-record and order-independent within a kind; books are
//! applied before notes, expunges last.

use crate::db::NotebookDb;
use crate::error::*;
use crate::record::{Book, Note};
use crate::sync::conflict::report_conflicts;
use crate::sync::fragment::{FragmentBook, FragmentNote, SyncList};
use interrupt_support::Interruptee;

/// A full download applies a server record only if it is strictly newer than
/// the local copy; an incremental (step) download trusts the delta window
/// and applies everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    Full,
    Step,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct MergeStats {
    pub books: usize,
    pub notes: usize,
    pub expunged: usize,
    pub conflicts: usize,
}

pub(super) fn apply_sync_list(
    db: &NotebookDb,
    list: &SyncList,
    mode: Mode,
    scope: &dyn Interruptee,
) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    for book in list.books.values() {
        scope.err_if_interrupted()?;
        if merge_book(db, book, mode)? {
            stats.books += 1;
        }
    }
    for note in list.notes.values() {
        scope.err_if_interrupted()?;
        match merge_note(db, note, mode)? {
            NoteOutcome::Skipped => {}
            NoteOutcome::Applied => stats.notes += 1,
            NoteOutcome::Conflicted => {
                stats.notes += 1;
                stats.conflicts += 1;
            }
        }
    }
    for uuid in &list.expunged_notes {
        scope.err_if_interrupted()?;
        db.expunge_note(uuid)?;
        stats.expunged += 1;
    }
    for uuid in &list.expunged_books {
        scope.err_if_interrupted()?;
        db.expunge_book(uuid)?;
        stats.expunged += 1;
    }
    Ok(stats)
}

/// Deletes every local record absent from a full download, on the grounds
/// that the server no longer has it. A record that has never been uploaded
/// (`dirty && usn == 0`) is spared.
pub(super) fn full_sync_cleanup(
    db: &NotebookDb,
    list: &SyncList,
    scope: &dyn Interruptee,
) -> Result<usize> {
    let mut cleaned = 0;
    for (uuid, dirty, usn) in db.all_book_states()? {
        scope.err_if_interrupted()?;
        if !list.books.contains_key(&uuid) && !(dirty && usn == 0) {
            log::debug!("Cleaning up local book {} absent from server", uuid);
            db.expunge_book(&uuid)?;
            cleaned += 1;
        }
    }
    for (uuid, dirty, usn) in db.all_note_states()? {
        scope.err_if_interrupted()?;
        if !list.notes.contains_key(&uuid) && !(dirty && usn == 0) {
            log::debug!("Cleaning up local note {} absent from server", uuid);
            db.expunge_note(&uuid)?;
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

fn merge_book(db: &NotebookDb, server: &FragmentBook, mode: Mode) -> Result<bool> {
    let local = db.get_book(&server.uuid)?;
    if let Some(local) = &local {
        if mode == Mode::Full && server.usn <= local.usn {
            if server.label != local.label {
                log::debug!(
                    "Skipping server book {} at usn {}: local copy has the same usn but a \
                     different label",
                    server.uuid,
                    server.usn
                );
            }
            return Ok(false);
        }
    }

    // Make room for the incoming label. The colliding local book is dirty
    // local work; it gets a fresh name and uploads later under it. An
    // incoming tombstone claims no label, so nothing moves for it.
    if let Some(mut duplicate) = db.get_book_by_label(&server.label)? {
        if duplicate.uuid != server.uuid && !server.deleted {
            duplicate.label = resolve_label(db, &server.label)?;
            duplicate.dirty = true;
            log::debug!(
                "Renaming local book {} to {:?} to make room for incoming label",
                duplicate.uuid,
                duplicate.label
            );
            db.save_book(&duplicate)?;
        }
    }

    let incoming = Book {
        uuid: server.uuid.clone(),
        label: server.label.clone(),
        usn: server.usn,
        dirty: false,
        deleted: server.deleted,
    };
    match local {
        Some(_) => db.save_book(&incoming)?,
        None => db.insert_book(&incoming)?,
    }
    Ok(true)
}

enum NoteOutcome {
    Skipped,
    Applied,
    Conflicted,
}

/// The server's copy taken wholesale, clean.
fn clean_note(server: &FragmentNote) -> Note {
    Note {
        id: 0,
        uuid: server.uuid.clone(),
        book_uuid: server.book_uuid.clone(),
        body: server.body.clone(),
        added_on: server.added_on,
        edited_on: server.edited_on,
        usn: server.usn,
        dirty: false,
        deleted: server.deleted,
    }
}

fn merge_note(db: &NotebookDb, server: &FragmentNote, mode: Mode) -> Result<NoteOutcome> {
    let local = match db.get_note(&server.uuid)? {
        None => {
            db.insert_note(&clean_note(server))?;
            return Ok(NoteOutcome::Applied);
        }
        Some(local) => local,
    };

    if mode == Mode::Full && server.usn <= local.usn {
        if server.body != local.body {
            log::debug!(
                "Skipping server note {} at usn {}: local copy has the same usn but a \
                 different body",
                server.uuid,
                server.usn
            );
        }
        return Ok(NoteOutcome::Skipped);
    }

    // A note in a locally-deleted book is left alone; the book deletion is
    // on its way to the server and will take the note with it.
    if let Some(book) = db.get_book(&local.book_uuid)? {
        if book.deleted {
            return Ok(NoteOutcome::Skipped);
        }
    }

    // Tombstones do not resist server updates.
    if local.deleted {
        let mut merged = clean_note(server);
        merged.id = local.id;
        db.save_note(&merged)?;
        return Ok(NoteOutcome::Applied);
    }

    let (merged, conflicted) = merge_note_fields(db, &local, server)?;
    db.save_note(&merged)?;
    Ok(if conflicted {
        NoteOutcome::Conflicted
    } else {
        NoteOutcome::Applied
    })
}

/// Three-way field merge of a note edited on both sides.
///
/// - `book_uuid`: a dirty local move wins if its target book is still alive
///   locally; otherwise the server's placement is taken.
/// - `edited_on`: the later of the two.
/// - `body`: equal bodies pass through; differing bodies become a conflict
///   report and the note is marked dirty so the resolution is uploaded.
fn merge_note_fields(
    db: &NotebookDb,
    local: &Note,
    server: &FragmentNote,
) -> Result<(Note, bool)> {
    let keep_local_book = local.dirty
        && local.book_uuid != server.book_uuid
        && matches!(db.get_book(&local.book_uuid)?, Some(book) if !book.deleted);
    let book_uuid = if keep_local_book {
        local.book_uuid.clone()
    } else {
        server.book_uuid.clone()
    };

    let (body, conflicted) = if local.body == server.body {
        (server.body.clone(), false)
    } else {
        log::debug!("Reporting body conflict on note {}", server.uuid);
        (report_conflicts(&local.body, &server.body), true)
    };

    let merged = Note {
        id: local.id,
        uuid: server.uuid.clone(),
        book_uuid,
        body,
        added_on: server.added_on,
        edited_on: local.edited_on.max(server.edited_on),
        usn: server.usn,
        dirty: conflicted || keep_local_book,
        deleted: false,
    };
    Ok((merged, conflicted))
}

/// Appends `_2`, `_3`, … to `label` until the result is unused among live
/// books.
fn resolve_label(db: &NotebookDb, label: &str) -> Result<String> {
    let mut suffix = 2u64;
    loop {
        let candidate = format!("{}_{}", label, suffix);
        if db.get_book_by_label(&candidate)?.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
    }
}
