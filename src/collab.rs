// model = "claude-opus-4-5"
// created = "2026-07-30"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Collaborator shapes and the two protocol envelopes.
//!
//! A collaborator is anything that watches the document and proposes
//! edits: a disk loader, a language-server client, a linter, a remote
//! co-editor, an in-process UI. The buffer drives each one from its own
//! threads, so every shape takes `&self` and must be `Send + Sync`; a
//! push/pull pair in particular is called concurrently from two threads
//! over one object.
//!
//! Shapes:
//!
//! - [`AsyncCollaborator`]: the full protocol. `push` consumes document
//!   snapshots, `pull` produces edit responses; both may block.
//! - [`CommandCollaborator`]: the raw-command protocol for mirrors that
//!   cannot afford snapshots. `push` receives every published command
//!   set, `pull` produces command sets directly.
//! - [`SyncCollaborator`]: request/response in one call, for
//!   collaborators with no state worth a thread pair.

use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use thiserror::Error;

use crate::crdt::command::CommandSet;
use crate::crdt::string::AnnotatedString;

/// A fault raised by a collaborator.
///
/// Faults never poison the buffer: the offending collaborator is logged
/// and retired, and the document keeps serving everyone else.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What the buffer tells a collaborator.
#[derive(Clone, Debug)]
pub struct EditNotification {
    /// The current document snapshot.
    pub content: AnnotatedString,
    /// True once the loader has delivered the whole file.
    pub fully_loaded: bool,
    /// Bumped whenever a file this document references changes.
    pub referenced_file_version: u64,
    /// True once the buffer has begun shutting down.
    pub shutdown: bool,
}

impl EditNotification {
    /// The initial state of a fresh document.
    pub fn new() -> EditNotification {
        return EditNotification {
            content: AnnotatedString::new(),
            fully_loaded: false,
            referenced_file_version: 0,
            shutdown: false,
        };
    }
}

impl Default for EditNotification {
    fn default() -> Self {
        return Self::new();
    }
}

/// What a collaborator tells the buffer.
#[derive(Clone, Debug, Default)]
pub struct EditResponse {
    /// Commands to integrate into the document.
    pub content_updates: CommandSet,
    /// Declare the document fully loaded.
    pub become_loaded: bool,
    /// Count this response as user activity for debouncing.
    pub become_used: bool,
    /// A file this document references has changed.
    pub referenced_file_changed: bool,
    /// This collaborator is finished and wants to retire.
    pub done: bool,
}

// =============================================================================
// Metadata and profiling marks
// =============================================================================

/// The protocol events a collaborator is profiled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mark {
    /// The collaborator's edits were applied to the document.
    Change,
    /// The buffer handed the collaborator a notification.
    Request,
    /// The collaborator answered with a response.
    Response,
}

impl Mark {
    pub(crate) fn label(&self) -> &'static str {
        return match self {
            Mark::Change => "chg",
            Mark::Request => "rqst",
            Mark::Response => "rsp",
        };
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct MarkTimes {
    change: Option<(SystemTime, Instant)>,
    request: Option<(SystemTime, Instant)>,
    response: Option<(SystemTime, Instant)>,
}

/// Identity, debounce configuration, and profiling timestamps shared by
/// every collaborator shape.
#[derive(Debug)]
pub struct CollabMeta {
    name: String,
    push_delay_from_idle: Duration,
    push_delay_from_start: Duration,
    marks: Mutex<MarkTimes>,
}

impl CollabMeta {
    /// Create metadata for a collaborator called `name`.
    ///
    /// `push_delay_from_idle` is how long the typist must be idle before
    /// this collaborator hears about a change; `push_delay_from_start`
    /// caps how long a change can be withheld while the typist keeps
    /// going.
    pub fn new(
        name: impl Into<String>,
        push_delay_from_idle: Duration,
        push_delay_from_start: Duration,
    ) -> CollabMeta {
        return CollabMeta {
            name: name.into(),
            push_delay_from_idle,
            push_delay_from_start,
            marks: Mutex::new(MarkTimes::default()),
        };
    }

    /// The collaborator's display name.
    pub fn name(&self) -> &str {
        return &self.name;
    }

    /// Debounce: required typist idle time before a push.
    pub fn push_delay_from_idle(&self) -> Duration {
        return self.push_delay_from_idle;
    }

    /// Debounce: maximum delay after the first unseen change.
    pub fn push_delay_from_start(&self) -> Duration {
        return self.push_delay_from_start;
    }

    /// Record that this collaborator's edits were applied.
    pub fn mark_change(&self) {
        self.marks.lock().change = Some((SystemTime::now(), Instant::now()));
    }

    /// Record that a notification was handed to this collaborator.
    pub fn mark_request(&self) {
        self.marks.lock().request = Some((SystemTime::now(), Instant::now()));
    }

    /// Record that this collaborator responded.
    pub fn mark_response(&self) {
        self.marks.lock().response = Some((SystemTime::now(), Instant::now()));
    }

    /// Append one profile line per event marked within `horizon`.
    pub(crate) fn profile_lines(&self, document: &str, horizon: Duration, out: &mut Vec<String>) {
        let marks = *self.marks.lock();
        let events = [
            (Mark::Change, marks.change),
            (Mark::Request, marks.request),
            (Mark::Response, marks.response),
        ];
        for (mark, stamp) in events {
            let Some((wall, instant)) = stamp else {
                continue;
            };
            let age = instant.elapsed();
            if age > horizon {
                continue;
            }
            let since_epoch = wall.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            out.push(format!(
                "{}:{}:{}: {}.{:03} ({:.0?} ago)",
                document,
                self.name,
                mark.label(),
                since_epoch.as_secs(),
                since_epoch.subsec_millis(),
                age,
            ));
        }
    }
}

// =============================================================================
// Collaborator shapes
// =============================================================================

/// The full asynchronous protocol: one thread pushes snapshots in, a
/// second pulls responses out.
pub trait AsyncCollaborator: Send + Sync {
    /// Shared metadata.
    fn meta(&self) -> &CollabMeta;

    /// Consume a document snapshot. May block.
    fn push(&self, notification: EditNotification) -> Result<(), CollabError>;

    /// Produce the next batch of edits. May block until there are some.
    fn pull(&self) -> Result<EditResponse, CollabError>;

    /// Unblock any in-flight `pull`; the buffer is shutting down.
    fn shutdown(&self) {}
}

/// The raw-command protocol: sees every published command set, produces
/// command sets directly.
pub trait CommandCollaborator: Send + Sync {
    /// Shared metadata.
    fn meta(&self) -> &CollabMeta;

    /// Receive a published command set. Called under the buffer lock;
    /// hand the set off, do not do work here.
    fn push(&self, commands: &CommandSet) -> Result<(), CollabError>;

    /// Produce the next batch of commands. May block until there are
    /// some.
    fn pull(&self) -> Result<CommandSet, CollabError>;

    /// Unblock any in-flight `pull`; the buffer is shutting down.
    fn shutdown(&self) {}
}

/// The one-call protocol: a notification in, a response out.
pub trait SyncCollaborator: Send + Sync {
    /// Shared metadata.
    fn meta(&self) -> &CollabMeta;

    /// Handle one notification.
    fn edit(&self, notification: EditNotification) -> Result<EditResponse, CollabError>;

    /// The buffer is shutting down.
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_record_and_age_out() {
        let meta = CollabMeta::new("linter", Duration::ZERO, Duration::ZERO);
        meta.mark_request();
        meta.mark_response();

        let mut lines = Vec::new();
        meta.profile_lines("scratch.txt", Duration::from_secs(5), &mut lines);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("scratch.txt:linter:rqst: "));
        assert!(lines[1].starts_with("scratch.txt:linter:rsp: "));

        std::thread::sleep(Duration::from_millis(5));
        lines.clear();
        meta.profile_lines("scratch.txt", Duration::from_millis(1), &mut lines);
        assert!(lines.is_empty());
    }

    #[test]
    fn unmarked_events_produce_no_lines() {
        let meta = CollabMeta::new("loader", Duration::ZERO, Duration::ZERO);
        let mut lines = Vec::new();
        meta.profile_lines("scratch.txt", Duration::from_secs(5), &mut lines);
        assert!(lines.is_empty());
    }
}
