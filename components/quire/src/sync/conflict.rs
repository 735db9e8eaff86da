/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Line-level conflict reporting for note bodies.
//!
//! When a note was edited both locally and on the server we don't try to
//! guess a winner. Both versions are aligned on their longest common
//! subsequence of lines and every run of disagreement becomes a marked hunk:
//!
//! ```text
//! <<<<<<< Local
//! local lines
//! =======
//! server lines
//! >>>>>>> Server
//! ```
//!
//! The merged body is written back dirty so the user's resolution is
//! uploaded on a later sync.

const LOCAL_MARKER: &str = "<<<<<<< Local";
const SEPARATOR: &str = "=======";
const SERVER_MARKER: &str = ">>>>>>> Server";

/// Merges `local` and `server`, emitting conflict hunks where they disagree.
///
/// Identical inputs are returned unchanged. A hunk never collapses: an empty
/// side is represented by a single blank line. Runs of disagreement
/// separated by a matching line produce separate hunks. The output keeps the
/// trailing-newline status of the side with more content, except that a
/// trailing hunk is always newline-terminated.
pub fn report_conflicts(local: &str, server: &str) -> String {
    if local == server {
        return local.to_string();
    }

    let (ours, ours_newline) = split_records(local);
    let (theirs, theirs_newline) = split_records(server);

    let table = lcs_table(&ours, &theirs);
    let mut out: Vec<&str> = Vec::new();
    let mut pending_ours: Vec<&str> = Vec::new();
    let mut pending_theirs: Vec<&str> = Vec::new();
    let mut last_was_hunk = false;

    let (mut i, mut j) = (0, 0);
    while i < ours.len() && j < theirs.len() {
        if ours[i] == theirs[j] {
            flush_hunk(&mut out, &mut pending_ours, &mut pending_theirs);
            out.push(ours[i]);
            last_was_hunk = false;
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            pending_ours.push(ours[i]);
            i += 1;
        } else {
            pending_theirs.push(theirs[j]);
            j += 1;
        }
    }
    pending_ours.extend(&ours[i..]);
    pending_theirs.extend(&theirs[j..]);
    if flush_hunk(&mut out, &mut pending_ours, &mut pending_theirs) {
        last_was_hunk = true;
    }

    let terminate = if last_was_hunk {
        true
    } else {
        // The last line matched on both sides; keep the newline of the side
        // with more content.
        match ours.len().cmp(&theirs.len()) {
            std::cmp::Ordering::Greater => ours_newline,
            std::cmp::Ordering::Less => theirs_newline,
            std::cmp::Ordering::Equal => {
                if local.len() >= server.len() {
                    ours_newline
                } else {
                    theirs_newline
                }
            }
        }
    };

    let mut merged = out.join("\n");
    if terminate && !out.is_empty() {
        merged.push('\n');
    }
    merged
}

/// Splits into newline-terminated records, remembering whether the input
/// ended with a terminator. An empty input has no records at all, while
/// `"\n"` is one empty record.
fn split_records(s: &str) -> (Vec<&str>, bool) {
    if s.is_empty() {
        return (Vec::new(), false);
    }
    let terminated = s.ends_with('\n');
    let body = if terminated { &s[..s.len() - 1] } else { s };
    (body.split('\n').collect(), terminated)
}

/// `table[i][j]` is the LCS length of `ours[i..]` and `theirs[j..]`.
fn lcs_table(ours: &[&str], theirs: &[&str]) -> Vec<Vec<u32>> {
    let mut table = vec![vec![0u32; theirs.len() + 1]; ours.len() + 1];
    for i in (0..ours.len()).rev() {
        for j in (0..theirs.len()).rev() {
            table[i][j] = if ours[i] == theirs[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    table
}

/// Emits the pending mismatch block as one marked hunk. Returns whether a
/// hunk was written.
fn flush_hunk<'a>(
    out: &mut Vec<&'a str>,
    ours: &mut Vec<&'a str>,
    theirs: &mut Vec<&'a str>,
) -> bool {
    if ours.is_empty() && theirs.is_empty() {
        return false;
    }
    out.push(LOCAL_MARKER);
    if ours.is_empty() {
        out.push("");
    } else {
        out.append(ours);
    }
    out.push(SEPARATOR);
    if theirs.is_empty() {
        out.push("");
    } else {
        out.append(theirs);
    }
    out.push(SERVER_MARKER);
    ours.clear();
    theirs.clear();
    true
}
