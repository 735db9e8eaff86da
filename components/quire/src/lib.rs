/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]

mod db;
mod error;
mod record;
mod schema;
mod store;
pub mod sync;
mod util;

pub use crate::db::{NotebookDb, UncheckedTransaction};
pub use crate::error::*;
pub use crate::record::*;
pub use crate::store::*;
pub use crate::sync::client::{HttpClient, RemoteClient, SyncState};
pub use crate::sync::engine::{BootstrapPrompt, SyncMode, SyncOpts, SyncSummary};
pub use interrupt_support::{InterruptHandle, Interruptee, NeverInterrupts};
