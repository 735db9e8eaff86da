/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An in-memory server for unit tests, faithful to the pieces of server
//! behavior the engine depends on: monotonic usns, paginated fragments, 409
//! on demand, and expunge lists for deletions.

use crate::error::*;
use crate::sync::client::{RemoteClient, SyncState};
use crate::sync::fragment::{FragmentBook, FragmentNote, SyncFragment};
use std::cell::RefCell;
use std::collections::BTreeMap;

pub(crate) struct ServerState {
    pub books: BTreeMap<String, FragmentBook>,
    pub notes: BTreeMap<String, FragmentNote>,
    /// Deletions keep their usn so incremental pulls see them.
    pub expunged_books: Vec<(i64, String)>,
    pub expunged_notes: Vec<(i64, String)>,
    pub max_usn: i64,
    pub full_sync_before: i64,
    pub current_time: i64,
    /// Records per fragment page.
    pub page_size: usize,
    /// The next N create calls are refused with a 409.
    pub conflict_creates: u32,
    /// The next N update calls fail with a 500.
    pub error_updates: u32,
    /// A book "another client" inserts immediately before the next create
    /// lands, giving that create a non-contiguous usn.
    pub interleave_book: Option<String>,
    next_id: u64,
}

impl ServerState {
    fn next_usn(&mut self) -> i64 {
        self.max_usn += 1;
        self.max_usn
    }

    fn new_uuid(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }

    fn insert_book(&mut self, label: &str, deleted: bool) -> String {
        let uuid = self.new_uuid();
        let usn = self.next_usn();
        self.books.insert(
            uuid.clone(),
            FragmentBook {
                uuid: uuid.clone(),
                usn,
                label: label.to_string(),
                deleted,
                ..Default::default()
            },
        );
        uuid
    }
}

pub(crate) struct FakeServer {
    pub state: RefCell<ServerState>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(ServerState {
                books: BTreeMap::new(),
                notes: BTreeMap::new(),
                expunged_books: Vec::new(),
                expunged_notes: Vec::new(),
                max_usn: 0,
                full_sync_before: 0,
                current_time: 1000,
                page_size: 100,
                conflict_creates: 0,
                error_updates: 0,
                interleave_book: None,
                next_id: 0,
            }),
        }
    }

    /// Seeds a book as though another client had uploaded it.
    pub fn put_book(&self, label: &str, deleted: bool) -> String {
        self.state.borrow_mut().insert_book(label, deleted)
    }

    /// Seeds a note as though another client had uploaded it.
    pub fn put_note(&self, book_uuid: &str, body: &str, deleted: bool) -> String {
        let mut state = self.state.borrow_mut();
        let uuid = state.new_uuid();
        let usn = state.next_usn();
        state.notes.insert(
            uuid.clone(),
            FragmentNote {
                uuid: uuid.clone(),
                book_uuid: book_uuid.to_string(),
                usn,
                body: body.to_string(),
                deleted,
                ..Default::default()
            },
        );
        uuid
    }

    fn check_create(&self, state: &mut ServerState) -> Result<()> {
        if state.conflict_creates > 0 {
            state.conflict_creates -= 1;
            return Err(Error::HttpStatus {
                status: 409,
                url: "fake://create".into(),
            });
        }
        if let Some(label) = state.interleave_book.take() {
            state.insert_book(&label, false);
        }
        Ok(())
    }

    fn check_update(&self, state: &mut ServerState) -> Result<()> {
        if state.error_updates > 0 {
            state.error_updates -= 1;
            return Err(Error::HttpStatus {
                status: 500,
                url: "fake://update".into(),
            });
        }
        Ok(())
    }
}

impl RemoteClient for FakeServer {
    fn get_sync_state(&self) -> Result<SyncState> {
        let state = self.state.borrow();
        Ok(SyncState {
            full_sync_before: state.full_sync_before,
            max_usn: state.max_usn,
            current_time: state.current_time,
        })
    }

    fn get_sync_fragment(&self, after_usn: i64) -> Result<SyncFragment> {
        let state = self.state.borrow();
        enum Item {
            Book(FragmentBook),
            Note(FragmentNote),
        }
        let mut items: Vec<(i64, Item)> = state
            .books
            .values()
            .filter(|b| b.usn > after_usn)
            .map(|b| (b.usn, Item::Book(b.clone())))
            .chain(
                state
                    .notes
                    .values()
                    .filter(|n| n.usn > after_usn)
                    .map(|n| (n.usn, Item::Note(n.clone()))),
            )
            .collect();
        items.sort_by_key(|(usn, _)| *usn);
        items.truncate(state.page_size);

        // Expunges ride along with the page that covers their usn range so a
        // paginated pull never skips over live records.
        let cutoff = if items.len() == state.page_size {
            items.last().map(|(usn, _)| *usn).unwrap_or(i64::MAX)
        } else {
            i64::MAX
        };
        let expunged_books: Vec<_> = state
            .expunged_books
            .iter()
            .filter(|(usn, _)| *usn > after_usn && *usn <= cutoff)
            .cloned()
            .collect();
        let expunged_notes: Vec<_> = state
            .expunged_notes
            .iter()
            .filter(|(usn, _)| *usn > after_usn && *usn <= cutoff)
            .cloned()
            .collect();
        let frag_max_usn = items
            .last()
            .map(|(usn, _)| *usn)
            .into_iter()
            .chain(expunged_books.iter().map(|(usn, _)| *usn))
            .chain(expunged_notes.iter().map(|(usn, _)| *usn))
            .max()
            .unwrap_or(0);

        let mut fragment = SyncFragment {
            frag_max_usn,
            user_max_usn: state.max_usn,
            current_time: state.current_time,
            expunged_books: expunged_books.into_iter().map(|(_, uuid)| uuid).collect(),
            expunged_notes: expunged_notes.into_iter().map(|(_, uuid)| uuid).collect(),
            ..Default::default()
        };
        for (_, item) in items {
            match item {
                Item::Book(book) => fragment.books.push(book),
                Item::Note(note) => fragment.notes.push(note),
            }
        }
        Ok(fragment)
    }

    fn create_book(&self, label: &str) -> Result<FragmentBook> {
        let mut state = self.state.borrow_mut();
        self.check_create(&mut state)?;
        let uuid = state.insert_book(label, false);
        Ok(state.books[&uuid].clone())
    }

    fn update_book(&self, uuid: &str, label: &str) -> Result<FragmentBook> {
        let mut state = self.state.borrow_mut();
        self.check_update(&mut state)?;
        let usn = state.next_usn();
        let book = state
            .books
            .get_mut(uuid)
            .ok_or_else(|| Error::HttpStatus {
                status: 404,
                url: format!("fake://books/{}", uuid),
            })?;
        book.label = label.to_string();
        book.usn = usn;
        Ok(book.clone())
    }

    fn delete_book(&self, uuid: &str) -> Result<FragmentBook> {
        let mut state = self.state.borrow_mut();
        let mut book = state.books.remove(uuid).ok_or_else(|| Error::HttpStatus {
            status: 404,
            url: format!("fake://books/{}", uuid),
        })?;
        book.usn = state.next_usn();
        book.deleted = true;
        let usn = book.usn;
        state.expunged_books.push((usn, uuid.to_string()));
        Ok(book)
    }

    fn create_note(&self, book_uuid: &str, body: &str) -> Result<FragmentNote> {
        let mut state = self.state.borrow_mut();
        self.check_create(&mut state)?;
        let uuid = state.new_uuid();
        let usn = state.next_usn();
        let note = FragmentNote {
            uuid: uuid.clone(),
            book_uuid: book_uuid.to_string(),
            usn,
            body: body.to_string(),
            ..Default::default()
        };
        state.notes.insert(uuid, note.clone());
        Ok(note)
    }

    fn update_note(&self, uuid: &str, book_uuid: &str, body: &str) -> Result<FragmentNote> {
        let mut state = self.state.borrow_mut();
        self.check_update(&mut state)?;
        let usn = state.next_usn();
        let note = state
            .notes
            .get_mut(uuid)
            .ok_or_else(|| Error::HttpStatus {
                status: 404,
                url: format!("fake://notes/{}", uuid),
            })?;
        note.book_uuid = book_uuid.to_string();
        note.body = body.to_string();
        note.usn = usn;
        Ok(note.clone())
    }

    fn delete_note(&self, uuid: &str) -> Result<FragmentNote> {
        let mut state = self.state.borrow_mut();
        let mut note = state.notes.remove(uuid).ok_or_else(|| Error::HttpStatus {
            status: 404,
            url: format!("fake://notes/{}", uuid),
        })?;
        note.usn = state.next_usn();
        note.deleted = true;
        note.body = String::new();
        let usn = note.usn;
        state.expunged_notes.push((usn, uuid.to_string()));
        Ok(note)
    }

    fn signout(&self) -> Result<()> {
        Ok(())
    }
}
