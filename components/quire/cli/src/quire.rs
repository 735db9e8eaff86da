/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![warn(rust_2018_idioms)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use interrupt_support::NeverInterrupts;
use quire::{BootstrapPrompt, HttpClient, NoteStore, RemoteClient, SyncOpts};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "quire", about = "A command-line personal notebook")]
struct Cli {
    /// Path to the notebook database.
    #[arg(long, env = "QUIRE_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    /// Base URL of the sync server.
    #[arg(long, env = "QUIRE_SERVER", value_name = "URL")]
    server: Option<Url>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a note to a book, creating the book if needed.
    Add {
        book: String,
        /// The note body; omit to just create the book.
        body: Option<String>,
    },
    /// Replace the body of a note.
    Edit { note_id: i64, body: String },
    /// Remove a book or a note.
    #[command(subcommand)]
    Remove(RemoveCommand),
    /// List books, or the notes in one book.
    View { book: Option<String> },
    /// Synchronize with the server.
    Sync {
        /// Download everything, not just changes.
        #[arg(long)]
        full: bool,
    },
    /// Store a session token for the sync server.
    Login {
        #[arg(long)]
        token: String,
        /// Token expiry, as reported by the server.
        #[arg(long, default_value_t = 0)]
        expiry: i64,
    },
    /// Sign out and forget the session.
    Logout,
}

#[derive(Debug, Subcommand)]
enum RemoveCommand {
    Book { label: String },
    Note { note_id: i64 },
}

/// Asks on the terminal before local data is re-uploaded to an emptied
/// server.
struct StdinPrompt;

impl BootstrapPrompt for StdinPrompt {
    fn confirm_reupload(&self, books: u32, notes: u32) -> bool {
        print!(
            "The server has no data, but you have {} book(s) and {} note(s) locally.\n\
             Upload them to the server? [y/N] ",
            books, notes
        );
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory on this platform; pass --db")?;
    Ok(base.join("quire").join("quire.db"))
}

fn open_store(cli: &Cli) -> Result<NoteStore> {
    let path = match &cli.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    NoteStore::new(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn server_url(cli: &Cli) -> Result<Url> {
    cli.server
        .clone()
        .context("No sync server configured; pass --server or set QUIRE_SERVER")
}

fn first_line(body: &str) -> &str {
    body.lines().next().unwrap_or("")
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = open_store(&cli)?;

    match &cli.command {
        Command::Add { book, body } => {
            let book = match store.get_book_by_label(book)? {
                Some(existing) => existing,
                None => {
                    let created = store.add_book(book)?;
                    println!("Created book {}", created.label);
                    created
                }
            };
            if let Some(body) = body {
                let note = store.add_note(&book.uuid, body)?;
                println!("Added note ({}) to {}", note.id, book.label);
            }
        }
        Command::Edit { note_id, body } => {
            let note = store
                .get_note_by_id(*note_id)?
                .with_context(|| format!("No note with id {}", note_id))?;
            store.update_note(&note.uuid, body)?;
            println!("Updated note ({})", note_id);
        }
        Command::Remove(RemoveCommand::Book { label }) => {
            let book = store
                .get_book_by_label(label)?
                .with_context(|| format!("No book named {:?}", label))?;
            store.remove_book(&book.uuid)?;
            println!("Removed book {} and its notes", label);
        }
        Command::Remove(RemoveCommand::Note { note_id }) => {
            let note = store
                .get_note_by_id(*note_id)?
                .with_context(|| format!("No note with id {}", note_id))?;
            store.remove_note(&note.uuid)?;
            println!("Removed note ({})", note_id);
        }
        Command::View { book } => match book {
            None => {
                for book in store.get_all_books()? {
                    let count = store.get_notes_in_book(&book.uuid)?.len();
                    println!("{} ({})", book.label, count);
                }
            }
            Some(label) => {
                let book = store
                    .get_book_by_label(label)?
                    .with_context(|| format!("No book named {:?}", label))?;
                for note in store.get_notes_in_book(&book.uuid)? {
                    println!("({}) {}", note.id, first_line(&note.body));
                }
            }
        },
        Command::Sync { full } => {
            let token = store.session_token()?;
            if token.is_none() {
                bail!("Not logged in; run `quire login` first");
            }
            let client = HttpClient::new(server_url(&cli)?, token)?;
            let summary = store
                .sync(&client, &SyncOpts { full: *full }, &StdinPrompt, &NeverInterrupts)
                .map_err(|e| {
                    if e.is_auth_failure() {
                        anyhow::anyhow!("The server rejected the session; log in again")
                    } else {
                        anyhow::Error::from(e)
                    }
                })?;
            println!(
                "Synced: downloaded {} book(s) and {} note(s), uploaded {} book(s) and {} note(s)",
                summary.downloaded_books,
                summary.downloaded_notes,
                summary.uploaded_books,
                summary.uploaded_notes
            );
            if summary.conflicts > 0 {
                println!(
                    "{} note(s) had conflicting edits; look for conflict markers",
                    summary.conflicts
                );
            }
        }
        Command::Login { token, expiry } => {
            store.save_session(token, *expiry)?;
            println!("Session saved");
        }
        Command::Logout => {
            if let Some(token) = store.session_token()? {
                if let Ok(url) = server_url(&cli) {
                    let client = HttpClient::new(url, Some(token))?;
                    if let Err(e) = client.signout() {
                        log::warn!("Sign-out request failed: {}", e);
                    }
                }
            }
            store.clear_session()?;
            println!("Logged out");
        }
    }
    Ok(())
}
