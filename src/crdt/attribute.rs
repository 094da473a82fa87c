// model = "claude-opus-4-5"
// created = "2026-07-29"
// modified = "2026-07-31"
// driver = "Isaac Clayton"

//! Attribute payloads and annotations.
//!
//! Attributes are the vocabulary collaborators use to decorate the
//! document: a linter attaches diagnostics and fix-its, a type-layout
//! collaborator attaches sizes, a remote co-editor attaches cursors and
//! selections, a loader attaches dependencies. The buffer itself never
//! interprets a payload; it only stores it under its ID and tombstones it
//! on deletion.
//!
//! An `Annotation` ties an attribute to a half-open span of character
//! IDs. Because the span is expressed in character identity rather than
//! position, it survives concurrent inserts and deletes inside it.

use serde::Deserialize;
use serde::Serialize;

use super::id::Id;

/// A set of free-form tags, e.g. syntax-highlighting scopes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub tags: Vec<String>,
}

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Unset,
    Ignored,
    Note,
    Warning,
    Error,
    Fatal,
}

/// A compiler or linter diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Where a fix-it came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixitKind {
    #[default]
    Unset,
    Autosuggest,
    CompileFix,
    TidyFix,
}

/// A proposed replacement for the annotated span, tied to a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixit {
    pub kind: FixitKind,
    pub diagnostic: Id,
    pub replacement: String,
}

/// What a size annotation measures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeKind {
    #[default]
    Unset,
    OffsetIntoParent,
    SizeofSelf,
}

/// Layout information for the annotated declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeAnnotation {
    pub kind: SizeKind,
    pub size: u64,
    pub bits: u32,
}

/// Context lines to show above the span when it scrolls off-screen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopContext {
    pub lines: Vec<String>,
}

/// A reference into another buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRef {
    pub buffer: Id,
    pub lines: Vec<i32>,
}

/// A named out-of-band string, e.g. rendered documentation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferString {
    pub name: String,
    pub contents: String,
}

/// A file this document depends on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub filename: String,
}

/// The tagged union of everything an attribute can carry.
///
/// `Cursor` and `Selection` are opaque markers: their meaning is entirely
/// in the span of the annotation that references them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    TagSet(TagSet),
    Diagnostic(Diagnostic),
    Fixit(Fixit),
    Size(SizeAnnotation),
    TopContext(TopContext),
    BufferRef(BufferRef),
    Cursor,
    Selection,
    BufferString(BufferString),
    Dependency(Dependency),
}

/// A half-open span `[begin, end)` of character IDs decorated by the
/// attribute `attribute`. All three fields are identities, never
/// positions; the span's extent is resolved against the character chain
/// at read time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub begin: Id,
    pub end: Id,
    pub attribute: Id,
}
