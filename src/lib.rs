// model = "claude-opus-4-5"
// created = "2026-07-29"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! Chorus - a collaborative editing buffer.
//!
//! One logical document, an arbitrary set of collaborators: loaders,
//! linters, language servers, remote co-editors, UIs. The document is a
//! convergent annotated string; the buffer coordinates everyone's
//! push/pull loops around it.
//!
//! # Quick Start
//!
//! ```
//! use chorus::buffer::Buffer;
//! use chorus::crdt::id::{Id, Site};
//!
//! // Create a document and a local editing identity.
//! let buffer = Buffer::new("scratch.txt");
//! let mut site = Site::new();
//!
//! // Edit the document.
//! let cmds = site.make_insert(Id::BEGIN, Id::END, "Hello, World!");
//! buffer.push_changes(&cmds);
//! assert_eq!(buffer.content_snapshot().render(), "Hello, World!");
//! ```

pub mod buffer;
pub mod collab;
pub mod crdt;
