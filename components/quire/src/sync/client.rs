/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Typed adapter over the server's sync endpoints.

use crate::error::*;
use crate::sync::fragment::{FragmentBook, FragmentNote, SyncFragment};
use crate::util;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_derive::*;
use std::cell::RefCell;
use std::time::Duration;
use url::Url;

/// `GET /v3/sync/state`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub full_sync_before: i64,
    #[serde(default)]
    pub max_usn: i64,
    #[serde(default)]
    pub current_time: i64,
}

/// The server operations the sync engine needs. `HttpClient` is the real
/// thing; tests substitute an in-memory server.
pub trait RemoteClient {
    fn get_sync_state(&self) -> Result<SyncState>;
    fn get_sync_fragment(&self, after_usn: i64) -> Result<SyncFragment>;
    fn create_book(&self, label: &str) -> Result<FragmentBook>;
    fn update_book(&self, uuid: &str, label: &str) -> Result<FragmentBook>;
    fn delete_book(&self, uuid: &str) -> Result<FragmentBook>;
    fn create_note(&self, book_uuid: &str, body: &str) -> Result<FragmentNote>;
    fn update_note(&self, uuid: &str, book_uuid: &str, body: &str) -> Result<FragmentNote>;
    fn delete_note(&self, uuid: &str) -> Result<FragmentNote>;
    fn signout(&self) -> Result<()>;
}

#[derive(Serialize)]
struct BookBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct NoteBody<'a> {
    book_uuid: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct BookEnvelope {
    book: FragmentBook,
}

#[derive(Deserialize)]
struct NoteEnvelope {
    result: FragmentNote,
}

#[derive(Deserialize)]
struct FragmentEnvelope {
    fragment: SyncFragment,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpClient {
    base_url: Url,
    session_token: Option<String>,
    client: Client,
    limiter: RefCell<RateLimiter>,
}

impl HttpClient {
    pub fn new(base_url: Url, session_token: Option<String>) -> Result<Self> {
        Ok(Self {
            base_url,
            session_token,
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            // ~50 requests per second, bursting to 100.
            limiter: RefCell::new(RateLimiter::new(100, 0.05)),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::SetHostOnCannotBeABaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.session_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder) -> Result<reqwest::blocking::Response> {
        self.limiter.borrow_mut().wait();
        let response = self.authorized(builder).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    fn send_json<T: serde::de::DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("application/json") {
            return Err(Error::UnexpectedContentType {
                content_type,
                url: response.url().to_string(),
            });
        }
        Ok(response.json()?)
    }
}

impl RemoteClient for HttpClient {
    fn get_sync_state(&self) -> Result<SyncState> {
        let url = self.url(&["v3", "sync", "state"])?;
        self.send_json(self.client.get(url))
    }

    fn get_sync_fragment(&self, after_usn: i64) -> Result<SyncFragment> {
        let mut url = self.url(&["v3", "sync", "fragment"])?;
        url.query_pairs_mut()
            .append_pair("after_usn", &after_usn.to_string());
        let envelope: FragmentEnvelope = self.send_json(self.client.get(url))?;
        Ok(envelope.fragment)
    }

    fn create_book(&self, label: &str) -> Result<FragmentBook> {
        let url = self.url(&["v3", "books"])?;
        let envelope: BookEnvelope =
            self.send_json(self.client.post(url).json(&BookBody { name: label }))?;
        Ok(envelope.book)
    }

    fn update_book(&self, uuid: &str, label: &str) -> Result<FragmentBook> {
        let url = self.url(&["v3", "books", uuid])?;
        let envelope: BookEnvelope =
            self.send_json(self.client.patch(url).json(&BookBody { name: label }))?;
        Ok(envelope.book)
    }

    fn delete_book(&self, uuid: &str) -> Result<FragmentBook> {
        let url = self.url(&["v3", "books", uuid])?;
        let envelope: BookEnvelope = self.send_json(self.client.delete(url))?;
        Ok(envelope.book)
    }

    fn create_note(&self, book_uuid: &str, body: &str) -> Result<FragmentNote> {
        let url = self.url(&["v3", "notes"])?;
        let envelope: NoteEnvelope = self.send_json(
            self.client
                .post(url)
                .json(&NoteBody {
                    book_uuid,
                    content: body,
                }),
        )?;
        Ok(envelope.result)
    }

    fn update_note(&self, uuid: &str, book_uuid: &str, body: &str) -> Result<FragmentNote> {
        let url = self.url(&["v3", "notes", uuid])?;
        let envelope: NoteEnvelope = self.send_json(
            self.client
                .patch(url)
                .json(&NoteBody {
                    book_uuid,
                    content: body,
                }),
        )?;
        Ok(envelope.result)
    }

    fn delete_note(&self, uuid: &str) -> Result<FragmentNote> {
        let url = self.url(&["v3", "notes", uuid])?;
        let envelope: NoteEnvelope = self.send_json(self.client.delete(url))?;
        Ok(envelope.result)
    }

    fn signout(&self) -> Result<()> {
        if self.session_token.is_none() {
            return Err(Error::NotLoggedIn);
        }
        let url = self.url(&["v3", "signout"])?;
        self.send(self.client.post(url))?;
        Ok(())
    }
}

/// Simple token bucket. One token per request; tokens renew at
/// `renewal_rate` per millisecond up to `capacity`.
pub(crate) struct RateLimiter {
    capacity: u32,
    tokens: u32,
    renewal_rate: f64, // per ms.
    last_refill: u64,  // in ms.
}

impl RateLimiter {
    pub fn new(capacity: u32, renewal_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            renewal_rate,
            last_refill: util::now_millis(),
        }
    }

    pub fn check(&mut self) -> bool {
        self.refill();
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    /// Blocks until a token is available.
    pub fn wait(&mut self) {
        while !self.check() {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn refill(&mut self) {
        let now = util::now_millis();
        let new_tokens = ((now.saturating_sub(self.last_refill)) as f64 * self.renewal_rate) as u32;
        if new_tokens > 0 {
            self.last_refill = now;
            self.tokens = std::cmp::min(self.capacity, self.tokens.saturating_add(new_tokens));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = HttpClient::new(Url::parse("https://api.example.com").unwrap(), None).unwrap();
        assert_eq!(
            client.url(&["v3", "sync", "state"]).unwrap().as_str(),
            "https://api.example.com/v3/sync/state"
        );
        // A trailing slash on the base does not double up.
        let client =
            HttpClient::new(Url::parse("https://api.example.com/").unwrap(), None).unwrap();
        assert_eq!(
            client.url(&["v3", "books", "abc"]).unwrap().as_str(),
            "https://api.example.com/v3/books/abc"
        );
    }

    #[test]
    fn test_signout_requires_session() {
        let client = HttpClient::new(Url::parse("https://api.example.com").unwrap(), None).unwrap();
        assert!(matches!(client.signout().unwrap_err(), Error::NotLoggedIn));
    }

    #[test]
    fn test_request_bodies() {
        let book = serde_json::to_string(&BookBody { name: "js" }).unwrap();
        assert_eq!(book, r#"{"name":"js"}"#);
        let note = serde_json::to_string(&NoteBody {
            book_uuid: "b1",
            content: "hello",
        })
        .unwrap();
        assert_eq!(note, r#"{"book_uuid":"b1","content":"hello"}"#);
    }

    #[test]
    fn test_response_envelopes() {
        let book: BookEnvelope =
            serde_json::from_str(r#"{"book":{"uuid":"b1","usn":4,"label":"js"}}"#).unwrap();
        assert_eq!(book.book.usn, 4);
        let note: NoteEnvelope = serde_json::from_str(
            r#"{"result":{"uuid":"n1","book_uuid":"b1","usn":5,"content":"body"}}"#,
        )
        .unwrap();
        assert_eq!(note.result.body, "body");
        let fragment: FragmentEnvelope =
            serde_json::from_str(r#"{"fragment":{"frag_max_usn":0,"user_max_usn":7,"current_time":123}}"#)
                .unwrap();
        assert_eq!(fragment.fragment.user_max_usn, 7);
    }

    #[test]
    fn test_rate_limiter_recovery() {
        let capacity = 10;
        let renewal_rate = 1.0 / 1000.0; // 1 token per second.
        let mut limiter = RateLimiter::new(capacity, renewal_rate);
        for _ in 0..capacity {
            assert!(limiter.check());
        }
        assert!(!limiter.check());
        assert_eq!(limiter.tokens, 0);
        // Jump back in time (5s).
        limiter.last_refill -= 5000;
        assert!(limiter.check());
        assert_eq!(limiter.tokens, 4);
    }
}
