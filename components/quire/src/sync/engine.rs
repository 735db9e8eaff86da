/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The sync orchestrator.
//!
//! One sync runs entirely inside a single local transaction:
//!
//! 1. Read the server's `{full_sync_before, max_usn, current_time}` and our
//!    `{last_sync_time, last_max_usn}` watermarks.
//! 2. Classify: an emptied server triggers the re-upload bootstrap; a stale
//!    `last_sync_time` forces a full download; a watermark gap means an
//!    incremental one; otherwise nothing to download.
//! 3. Download and merge, then upload everything dirty.
//! 4. If the upload discovered the server had moved on, one more
//!    incremental download/upload pair settles the stragglers.
//! 5. Commit. Any error on the way rolls the whole transaction back.

use crate::db::NotebookDb;
use crate::error::*;
use crate::schema;
use crate::sync::client::RemoteClient;
use crate::sync::fragment::{fetch_sync_list, SyncList};
use crate::sync::integrity;
use crate::sync::merge::{self, Mode};
use crate::sync::upload;
use interrupt_support::Interruptee;

/// Answers the one question the engine cannot decide alone: the server has
/// been emptied, should local data be uploaded again?
pub trait BootstrapPrompt {
    fn confirm_reupload(&self, books: u32, notes: u32) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncOpts {
    /// Download everything regardless of watermarks.
    pub full: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
    UploadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub mode: SyncMode,
    pub downloaded_books: usize,
    pub downloaded_notes: usize,
    pub uploaded_books: usize,
    pub uploaded_notes: usize,
    pub conflicts: usize,
    /// True when a second download/upload pass ran.
    pub caught_up: bool,
}

pub fn sync(
    db: &NotebookDb,
    client: &dyn RemoteClient,
    opts: &SyncOpts,
    prompt: &dyn BootstrapPrompt,
    scope: &dyn Interruptee,
) -> Result<SyncSummary> {
    integrity::report_before_sync(db)?;

    let tx = db.unchecked_transaction()?;
    let state = client.get_sync_state()?;
    let mut last_max_usn: i64 = db.get_meta(schema::LAST_MAX_USN_META_KEY)?.unwrap_or(0);
    let last_sync_at: i64 = db.get_meta(schema::LAST_SYNC_META_KEY)?.unwrap_or(0);

    // The server reports no data at all, but we have synced before and have
    // something to offer. Either the account was wiped deliberately or this
    // client is pointed somewhere new; only the user knows whether pushing
    // local data up again is wanted.
    if state.max_usn == 0 && last_max_usn > 0 {
        let books = db.count_live_books()?;
        let notes = db.count_live_notes()?;
        if books + notes > 0 {
            if !prompt.confirm_reupload(books, notes) {
                // Dropping `tx` rolls back; nothing has been written yet.
                return Err(Error::SyncCancelled);
            }
            log::info!(
                "Server is empty; re-uploading {} book(s) and {} note(s)",
                books,
                notes
            );
            db.mark_all_unsent()?;
            db.put_meta(schema::LAST_MAX_USN_META_KEY, &0i64)?;
            last_max_usn = 0;
        }
    }

    let mut summary = SyncSummary {
        mode: SyncMode::UploadOnly,
        downloaded_books: 0,
        downloaded_notes: 0,
        uploaded_books: 0,
        uploaded_notes: 0,
        conflicts: 0,
        caught_up: false,
    };

    if opts.full || last_sync_at < state.full_sync_before {
        log::debug!("Starting full sync");
        summary.mode = SyncMode::Full;
        let list = fetch_sync_list(client, 0, scope)?;
        merge::full_sync_cleanup(db, &list, scope)?;
        let stats = merge::apply_sync_list(db, &list, Mode::Full, scope)?;
        summary.downloaded_books = stats.books;
        summary.downloaded_notes = stats.notes;
        summary.conflicts = stats.conflicts;
        save_sync_state(db, &list, state.current_time)?;
    } else if last_max_usn != state.max_usn {
        log::debug!("Starting incremental sync after usn {}", last_max_usn);
        summary.mode = SyncMode::Incremental;
        let list = fetch_sync_list(client, last_max_usn, scope)?;
        let stats = merge::apply_sync_list(db, &list, Mode::Step, scope)?;
        summary.downloaded_books = stats.books;
        summary.downloaded_notes = stats.notes;
        summary.conflicts = stats.conflicts;
        save_sync_state(db, &list, state.current_time)?;
    } else {
        log::debug!("Local data is up to date with server usn {}", state.max_usn);
        db.put_meta(schema::LAST_SYNC_META_KEY, &state.current_time)?;
    }

    let outcome = upload::upload_all(db, client, scope)?;
    summary.uploaded_books = outcome.books;
    summary.uploaded_notes = outcome.notes;

    if outcome.is_behind {
        // Someone else wrote to the account while we were uploading. Pull
        // their records, then retry whatever the server turned away.
        log::debug!("Client fell behind during upload; running catch-up pass");
        summary.caught_up = true;
        let after = db.get_meta(schema::LAST_MAX_USN_META_KEY)?.unwrap_or(0);
        let list = fetch_sync_list(client, after, scope)?;
        let stats = merge::apply_sync_list(db, &list, Mode::Step, scope)?;
        summary.downloaded_books += stats.books;
        summary.downloaded_notes += stats.notes;
        summary.conflicts += stats.conflicts;
        save_sync_state(db, &list, state.current_time)?;

        let outcome = upload::upload_all(db, client, scope)?;
        summary.uploaded_books += outcome.books;
        summary.uploaded_notes += outcome.notes;
    }

    tx.commit()?;
    integrity::report_after_sync(db)?;
    Ok(summary)
}

/// Records what this download taught us.
///
/// A positive `frag_max_usn` is the new watermark. An empty download is
/// ambiguous: `user_max_usn == 0` means the server truly has nothing (reset
/// the watermark so the bootstrap can trigger), while a positive one just
/// means we were already caught up (keep the watermark).
fn save_sync_state(db: &NotebookDb, list: &SyncList, state_time: i64) -> Result<()> {
    if list.frag_max_usn > 0 {
        db.put_meta(schema::LAST_MAX_USN_META_KEY, &list.frag_max_usn)?;
    } else if list.user_max_usn == 0 {
        db.put_meta(schema::LAST_MAX_USN_META_KEY, &0i64)?;
    }
    let server_time = if list.current_time > 0 {
        list.current_time
    } else {
        state_time
    };
    db.put_meta(schema::LAST_SYNC_META_KEY, &server_time)?;
    Ok(())
}

#[cfg(test)]
pub(crate) struct AnswerPrompt(pub bool);

#[cfg(test)]
impl BootstrapPrompt for AnswerPrompt {
    fn confirm_reupload(&self, _books: u32, _notes: u32) -> bool {
        self.0
    }
}
