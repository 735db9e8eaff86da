/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Post-sync structural checks.
//!
//! A note whose book is missing or tombstoned should not survive a sync.
//! When one does, we say so and leave the data alone; silently repairing it
//! would hide whatever put it there.

use crate::db::NotebookDb;
use crate::error::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedNote {
    pub uuid: String,
    pub book_uuid: String,
}

pub fn orphaned_notes(db: &NotebookDb) -> Result<Vec<OrphanedNote>> {
    Ok(db
        .orphaned_notes()?
        .into_iter()
        .map(|(uuid, book_uuid)| OrphanedNote { uuid, book_uuid })
        .collect())
}

/// Pre-sync scan: interesting to a developer, not to the user.
pub(super) fn report_before_sync(db: &NotebookDb) -> Result<()> {
    let orphans = orphaned_notes(db)?;
    if !orphans.is_empty() {
        log::debug!("{} orphaned note(s) before sync", orphans.len());
        for orphan in &orphans {
            log::debug!("  note {} references book {}", orphan.uuid, orphan.book_uuid);
        }
    }
    Ok(())
}

/// Post-commit scan: a warning the user should see, never a failure.
pub(super) fn report_after_sync(db: &NotebookDb) -> Result<()> {
    let orphans = orphaned_notes(db)?;
    if !orphans.is_empty() {
        log::warn!(
            "Sync finished with {} orphaned note(s); their books are missing or deleted",
            orphans.len()
        );
        for orphan in &orphans {
            log::warn!("  note {} references book {}", orphan.uuid, orphan.book_uuid);
        }
    }
    Ok(())
}
