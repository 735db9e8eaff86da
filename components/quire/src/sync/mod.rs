/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Bidirectional sync between the local notebook and the server.
//!
//! The server stamps every mutation with a per-user monotonic Update
//! Sequence Number (USN). A sync downloads everything newer than our
//! `last_max_usn` watermark (paged "fragments"), merges it into the local
//! store, then uploads every locally-dirty record. If the server moved on
//! while we were uploading we are "behind": one more download/upload pair
//! settles the records the server rejected with 409.

pub mod client;
pub mod conflict;
pub mod engine;
pub mod fragment;
pub mod integrity;
mod merge;
#[cfg(test)]
pub(crate) mod testing;
mod upload;

pub use engine::{sync, BootstrapPrompt, SyncMode, SyncOpts, SyncSummary};
