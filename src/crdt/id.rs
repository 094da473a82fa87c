// model = "claude-opus-4-5"
// created = "2026-07-29"
// modified = "2026-08-01"
// driver = "Isaac Clayton"

//! Identifiers and the per-site allocator.
//!
//! # Identifier layout
//!
//! An `Id` is a single `u64`: the allocation counter in the high 48 bits
//! and the site tag in the low 16. Comparing the raw integers therefore
//! orders IDs counter-major, with the site as tiebreaker:
//!
//! - Globally unique: every site owns its own counter sequence.
//! - Monotonic: a site never hands out a smaller ID than it already has.
//! - Never reused: deletion tombstones an entity, it does not free its ID.
//!
//! Counter zero is reserved, which is where the two sentinels live:
//! `Id::BEGIN` and `Id::END` bracket the character chain of every
//! document and are never used by a real character.

use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use super::attribute::Annotation;
use super::attribute::Attribute;
use super::command::Command;
use super::command::CommandSet;

/// A globally unique identifier for a character, attribute, annotation,
/// or the command that created it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(pub u64);

impl Id {
    /// Sentinel for the front of the character chain.
    pub const BEGIN: Id = Id(0);

    /// Sentinel for the back of the character chain.
    pub const END: Id = Id(1);

    /// Bits reserved for the site tag.
    const SITE_BITS: u32 = 16;

    /// Build an ID from a site tag and a counter value.
    pub fn new(site: u16, counter: u64) -> Id {
        return Id(counter << Id::SITE_BITS | site as u64);
    }

    /// The site that allocated this ID.
    pub fn site(&self) -> u16 {
        return (self.0 & 0xffff) as u16;
    }

    /// The allocation counter of this ID.
    pub fn counter(&self) -> u64 {
        return self.0 >> Id::SITE_BITS;
    }

    /// True for `BEGIN` and `END`.
    pub fn is_sentinel(&self) -> bool {
        return self.counter() == 0;
    }

    /// The ID of the character `offset` places into the span this ID
    /// starts. A span insert allocates one counter per character, so the
    /// k-th character of the span is `id.offset(k)`.
    pub fn offset(&self, offset: u64) -> Id {
        return Id::new(self.site(), self.counter() + offset);
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Id::BEGIN {
            return write!(f, "Id(BEGIN)");
        }
        if *self == Id::END {
            return write!(f, "Id(END)");
        }
        return write!(f, "Id({}@{})", self.counter(), self.site());
    }
}

/// Source of fresh site tags for `Site::new`. Site 0 is reserved for the
/// sentinels.
static NEXT_SITE: AtomicU16 = AtomicU16::new(1);

/// A replica identity plus its allocation counter.
///
/// Every process (or every independent editing agent within one) holds
/// its own `Site` and builds commands through it. Two sites never produce
/// the same ID, so commands built concurrently at different sites can be
/// integrated in any order.
#[derive(Debug)]
pub struct Site {
    site: u16,
    counter: u64,
}

impl Site {
    /// Create a site with a process-unique tag.
    pub fn new() -> Site {
        let site = NEXT_SITE.fetch_add(1, Ordering::Relaxed);
        assert!(site != 0, "site tags exhausted");
        return Site { site, counter: 0 };
    }

    /// Create a site with a caller-assigned tag. Tag 0 is reserved.
    pub fn with_id(site: u16) -> Site {
        assert!(site != 0, "site 0 is reserved for the sentinels");
        return Site { site, counter: 0 };
    }

    /// The tag of this site.
    pub fn site_id(&self) -> u16 {
        return self.site;
    }

    /// Reserve `count` consecutive counters and return the first ID.
    fn allocate(&mut self, count: u64) -> Id {
        let id = Id::new(self.site, self.counter + 1);
        self.counter += count;
        return id;
    }

    /// Build a command inserting `text` into the gap between the
    /// characters `after` and `before`. One command covers the whole
    /// span; the command ID names its first character.
    pub fn make_insert(&mut self, after: Id, before: Id, text: &str) -> CommandSet {
        let count = text.chars().count() as u64;
        if count == 0 {
            return CommandSet::new();
        }
        let id = self.allocate(count);
        return CommandSet::from(Command::insert(id, after, before, text));
    }

    /// Build a command deleting the character `target`.
    pub fn make_delete(&self, target: Id) -> CommandSet {
        return CommandSet::from(Command::delete(target));
    }

    /// Build a command declaring a new attribute; returns its ID.
    pub fn make_decl_attribute(&mut self, payload: Attribute) -> (CommandSet, Id) {
        let id = self.allocate(1);
        return (CommandSet::from(Command::decl_attribute(id, payload)), id);
    }

    /// Build a command deleting the attribute `target`.
    pub fn make_delete_attribute(&self, target: Id) -> CommandSet {
        return CommandSet::from(Command::delete_attribute(target));
    }

    /// Build a command marking the half-open character span
    /// `[begin, end)` with the attribute `attribute`; returns the
    /// annotation's ID.
    pub fn make_mark_annotation(&mut self, begin: Id, end: Id, attribute: Id) -> (CommandSet, Id) {
        let id = self.allocate(1);
        let annotation = Annotation { begin, end, attribute };
        return (CommandSet::from(Command::mark_annotation(id, annotation)), id);
    }

    /// Build a command deleting the annotation `target`.
    pub fn make_delete_annotation(&self, target: Id) -> CommandSet {
        return CommandSet::from(Command::delete_annotation(target));
    }
}

impl Default for Site {
    fn default() -> Self {
        return Self::new();
    }
}
