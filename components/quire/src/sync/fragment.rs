/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Server delta pages and their in-memory aggregate.
//!
//! The server hands out its state as successive "fragments": one page of
//! records with USNs above the requested watermark. `frag_max_usn == 0`
//! marks the final, empty page; `user_max_usn` on that page distinguishes a
//! caught-up client from a genuinely empty server.

use crate::error::*;
use crate::sync::client::RemoteClient;
use interrupt_support::Interruptee;
use serde_derive::*;
use std::collections::{HashMap, HashSet};

/// A book as it appears on the wire. `created_at`/`updated_at` are server
/// bookkeeping we carry but don't interpret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentBook {
    pub uuid: String,
    #[serde(default)]
    pub usn: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub added_on: i64,
    pub label: String,
    #[serde(default)]
    pub deleted: bool,
}

/// A note as it appears on the wire. The body travels under the name
/// `content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentNote {
    pub uuid: String,
    pub book_uuid: String,
    #[serde(default)]
    pub usn: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub added_on: i64,
    #[serde(default)]
    pub edited_on: i64,
    #[serde(rename = "content", default)]
    pub body: String,
    #[serde(default)]
    pub deleted: bool,
}

/// One page of server state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncFragment {
    #[serde(default)]
    pub frag_max_usn: i64,
    #[serde(default)]
    pub user_max_usn: i64,
    #[serde(default)]
    pub current_time: i64,
    #[serde(default)]
    pub notes: Vec<FragmentNote>,
    #[serde(default)]
    pub books: Vec<FragmentBook>,
    #[serde(default)]
    pub expunged_notes: Vec<String>,
    #[serde(default)]
    pub expunged_books: Vec<String>,
}

/// Every fragment of one download folded together: last write wins per uuid,
/// expunge sets union, and the maxima seen across pages.
#[derive(Debug, Default)]
pub struct SyncList {
    pub frag_max_usn: i64,
    pub user_max_usn: i64,
    pub current_time: i64,
    pub notes: HashMap<String, FragmentNote>,
    pub books: HashMap<String, FragmentBook>,
    pub expunged_notes: HashSet<String>,
    pub expunged_books: HashSet<String>,
}

impl SyncList {
    pub fn fold(&mut self, fragment: SyncFragment) {
        self.frag_max_usn = self.frag_max_usn.max(fragment.frag_max_usn);
        self.user_max_usn = self.user_max_usn.max(fragment.user_max_usn);
        self.current_time = self.current_time.max(fragment.current_time);
        for note in fragment.notes {
            self.notes.insert(note.uuid.clone(), note);
        }
        for book in fragment.books {
            self.books.insert(book.uuid.clone(), book);
        }
        self.expunged_notes.extend(fragment.expunged_notes);
        self.expunged_books.extend(fragment.expunged_books);
    }
}

/// Pulls pages starting after `after_usn` (0 for a full download) until the
/// server reports no more.
pub fn fetch_sync_list(
    client: &dyn RemoteClient,
    after_usn: i64,
    scope: &dyn Interruptee,
) -> Result<SyncList> {
    let mut list = SyncList::default();
    let mut after = after_usn;
    loop {
        scope.err_if_interrupted()?;
        let fragment = client.get_sync_fragment(after)?;
        let frag_max = fragment.frag_max_usn;
        log::debug!(
            "Fetched fragment after usn {}: {} books, {} notes, frag max {}",
            after,
            fragment.books.len(),
            fragment.notes.len(),
            frag_max
        );
        list.fold(fragment);
        if frag_max == 0 {
            break;
        }
        after = frag_max;
    }
    Ok(list)
}
