/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Cooperative cancellation for long-running operations.
//!
//! A sync holds a database transaction for its whole run, so it checks an
//! [`Interruptee`] between records; tripping the flag makes the next check
//! fail with [`Interrupted`], which unwinds through the normal error path
//! and rolls the transaction back.

#![warn(rust_2018_idioms)]

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The error returned when an operation notices it has been interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("The operation was interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Something that knows whether the current operation should stop.
pub trait Interruptee {
    fn was_interrupted(&self) -> bool;

    fn err_if_interrupted(&self) -> Result<(), Interrupted> {
        if self.was_interrupted() {
            return Err(Interrupted);
        }
        Ok(())
    }
}

/// For callers that have no interrupt mechanism.
pub struct NeverInterrupts;

impl Interruptee for NeverInterrupts {
    #[inline]
    fn was_interrupted(&self) -> bool {
        false
    }
}

/// A shareable flag: hand clones to whatever might want to stop the
/// operation (a signal handler, another thread) and pass it as the
/// operation's `Interruptee`.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl Interruptee for InterruptHandle {
    fn was_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_interrupts() {
        assert!(!NeverInterrupts.was_interrupted());
        assert!(NeverInterrupts.err_if_interrupted().is_ok());
    }

    #[test]
    fn test_handle_trips_all_clones() {
        let handle = InterruptHandle::new();
        let observer = handle.clone();
        assert!(observer.err_if_interrupted().is_ok());
        handle.interrupt();
        assert!(observer.was_interrupted());
        assert_eq!(observer.err_if_interrupted(), Err(Interrupted));
    }
}
