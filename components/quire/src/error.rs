/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),

    #[error("Error parsing JSON data: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Error parsing URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Error in network request: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Server returned {content_type:?} where JSON was expected ({url})")]
    UnexpectedContentType { content_type: String, url: String },

    #[error("{0}")]
    Interrupted(#[from] interrupt_support::Interrupted),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Sync cancelled at user request")]
    SyncCancelled,

    #[error("No record with uuid exists (when one was required): {0:?}")]
    NoSuchRecord(String),

    #[error("A book named {0:?} already exists")]
    DuplicateLabel(String),

    #[error("Cannot use database schema version {0}")]
    IncompatibleVersion(i64),
}

impl Error {
    /// True for a 409 response, which the server uses to mean "your update
    /// is stale, pull first".
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::HttpStatus { status: 409, .. })
    }

    /// True for a 401 response: the session is missing, expired or rejected.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::HttpStatus { status: 401, .. })
    }
}
