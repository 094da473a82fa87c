// model = "claude-opus-4-5"
// created = "2026-07-29"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! The annotated string: a convergent ordered sequence of characters
//! plus attribute and annotation tables.
//!
//! Key design decisions:
//!
//! 1. **Dual insertion context**: every character permanently remembers
//!    the pair of characters its author inserted it between. The pair
//!    never changes, which is what lets concurrent inserts into the same
//!    gap be ordered the same way on every replica.
//!
//! 2. **Tombstones, never removal**: deleting a character flips its
//!    visibility and leaves it in the chain. Deleted attributes and
//!    annotations move to a graveyard set. Either way the ID stays
//!    addressable forever, so a command written against state another
//!    replica has since edited still lands.
//!
//! 3. **Interval narrowing for concurrent inserts**: integration walks
//!    the chain between the insert's anchors, fences off the characters
//!    whose own context spans the whole gap, picks the sub-gap by
//!    ascending command ID, and repeats until the gap is empty. Siblings
//!    competing for one gap therefore end up in ascending ID order.
//!
//! 4. **Copy-on-write tables**: the four tables sit behind `Arc`, so
//!    cloning a snapshot is O(1) and the first mutation of an integration
//!    pays for the copy.
//!
//! Scan cost is O(n) per integrated character. Correct and simple wins
//! over fast here; the documents this buffer coordinates are source
//! files, not gigabytes.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use super::attribute::Annotation;
use super::attribute::Attribute;
use super::command::Command;
use super::command::CommandSet;
use super::command::Op;
use super::id::Id;

// =============================================================================
// Character
// =============================================================================

/// One character of the document.
///
/// `prev`/`next` place the character in the current chain; they are
/// patched as neighbours arrive. `after`/`before` are the insertion
/// context chosen by the author and never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Character {
    pub id: Id,
    pub visible: bool,
    pub ch: char,
    pub next: Id,
    pub prev: Id,
    pub after: Id,
    pub before: Id,
}

// =============================================================================
// AnnotatedString
// =============================================================================

/// The document value: characters in a sentinel-bracketed chain,
/// attributes and annotations keyed by ID, and the graveyard of deleted
/// attribute/annotation IDs.
///
/// This is a pure value type. `integrate` returns a new string and never
/// mutates the receiver; clones share structure until written.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedString {
    pub(crate) chars: Arc<FxHashMap<Id, Character>>,
    pub(crate) attrs: Arc<FxHashMap<Id, Attribute>>,
    pub(crate) annos: Arc<FxHashMap<Id, Annotation>>,
    pub(crate) graveyard: Arc<FxHashSet<Id>>,
}

impl AnnotatedString {
    /// Create the canonical empty document: the two sentinels linked to
    /// each other.
    pub fn new() -> AnnotatedString {
        let mut chars = FxHashMap::default();
        chars.insert(Id::BEGIN, Character {
            id: Id::BEGIN,
            visible: false,
            ch: '\0',
            next: Id::END,
            prev: Id::BEGIN,
            after: Id::BEGIN,
            before: Id::END,
        });
        chars.insert(Id::END, Character {
            id: Id::END,
            visible: false,
            ch: '\0',
            next: Id::END,
            prev: Id::BEGIN,
            after: Id::BEGIN,
            before: Id::END,
        });
        return AnnotatedString {
            chars: Arc::new(chars),
            attrs: Arc::new(FxHashMap::default()),
            annos: Arc::new(FxHashMap::default()),
            graveyard: Arc::new(FxHashSet::default()),
        };
    }

    /// Apply every command of `commands` to a copy of this string and
    /// return the copy.
    ///
    /// Total: malformed commands (unknown anchors or targets) are
    /// skipped, duplicate command IDs are no-ops. Replicas that
    /// integrate the same multiset of command sets converge to equal
    /// values regardless of delivery order, provided each set only
    /// references IDs it introduces itself or that both replicas already
    /// know.
    pub fn integrate(&self, commands: &CommandSet) -> AnnotatedString {
        let mut next = self.clone();
        for command in commands {
            next.apply(command);
        }
        return next;
    }

    fn apply(&mut self, command: &Command) {
        match &command.op {
            Op::Insert { after, before, text } => {
                self.apply_insert(command.id, *after, *before, text);
            }
            Op::Delete => self.apply_delete(command.id),
            Op::DeclAttribute(payload) => self.apply_decl_attribute(command.id, payload),
            Op::DeleteAttribute => self.apply_delete_attribute(command.id),
            Op::MarkAnnotation(annotation) => self.apply_mark_annotation(command.id, *annotation),
            Op::DeleteAnnotation => self.apply_delete_annotation(command.id),
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Walk every character from `BEGIN` to `END` in chain order,
    /// sentinels and tombstones included.
    pub fn chain(&self) -> Chain<'_> {
        return Chain { doc: self, cur: Some(Id::BEGIN) };
    }

    /// Visible characters in document order.
    pub fn iter(&self) -> impl Iterator<Item = (Id, char)> + '_ {
        return self.chain().filter(|c| c.visible).map(|c| (c.id, c.ch));
    }

    /// The visible text.
    pub fn render(&self) -> String {
        return self.iter().map(|(_, ch)| ch).collect();
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        return self.chars.values().filter(|c| c.visible).count();
    }

    /// True if no characters are visible.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Look up a character, tombstoned or not.
    pub fn character(&self, id: Id) -> Option<&Character> {
        return self.chars.get(&id);
    }

    /// Look up a live attribute.
    pub fn attribute(&self, id: Id) -> Option<&Attribute> {
        return self.attrs.get(&id);
    }

    /// Look up a live annotation.
    pub fn annotation(&self, id: Id) -> Option<&Annotation> {
        return self.annos.get(&id);
    }

    /// Iterate the live attributes.
    pub fn attributes(&self) -> impl Iterator<Item = (Id, &Attribute)> {
        return self.attrs.iter().map(|(id, a)| (*id, a));
    }

    /// Iterate the live annotations.
    pub fn annotations(&self) -> impl Iterator<Item = (Id, &Annotation)> {
        return self.annos.iter().map(|(id, a)| (*id, a));
    }

    /// True if the ID was an attribute or annotation that has been
    /// deleted.
    pub fn is_tombstoned(&self, id: Id) -> bool {
        return self.graveyard.contains(&id);
    }

    /// True if the half-open span of `annotation` contains the character
    /// `target`, resolved against the current chain.
    pub fn span_contains(&self, annotation: Id, target: Id) -> bool {
        let Some(a) = self.annos.get(&annotation) else {
            return false;
        };
        let mut cur = a.begin;
        loop {
            if cur == a.end || cur == Id::END {
                return false;
            }
            if cur == target {
                return true;
            }
            cur = match self.chars.get(&cur) {
                Some(c) => c.next,
                None => return false,
            };
        }
    }

    // =========================================================================
    // Insert integration
    // =========================================================================

    /// Chain order and the position of every character in it.
    fn chain_positions(&self) -> (Vec<Id>, FxHashMap<Id, usize>) {
        let mut order = Vec::with_capacity(self.chars.len());
        let mut pos = FxHashMap::default();
        let mut cur = Id::BEGIN;
        loop {
            pos.insert(cur, order.len());
            order.push(cur);
            if cur == Id::END {
                break;
            }
            cur = self.chars[&cur].next;
        }
        return (order, pos);
    }

    fn apply_insert(&mut self, id: Id, after: Id, before: Id, text: &str) {
        if text.is_empty() {
            return;
        }
        // Idempotence: the first character stands in for the whole span,
        // since a span is created by exactly one command.
        if self.chars.contains_key(&id) {
            return;
        }
        if !self.chars.contains_key(&after) || !self.chars.contains_key(&before) {
            return;
        }
        {
            let (_, pos) = self.chain_positions();
            if pos[&after] >= pos[&before] {
                return;
            }
        }
        // Span characters chain off one another: character k goes
        // between character k-1 and the span's original right anchor.
        let mut anchor = after;
        for (k, ch) in text.chars().enumerate() {
            let cid = id.offset(k as u64);
            self.integrate_char(cid, anchor, before, ch);
            anchor = cid;
        }
    }

    /// Place one character using its insertion context.
    ///
    /// Narrow the gap until it is empty: fence off the characters whose
    /// own context spans the current gap, order them (and the new
    /// character) by ascending ID, and descend into the chosen sub-gap.
    /// Characters that were inserted into a sub-gap are invisible to the
    /// fence, which is what keeps the result independent of arrival
    /// order.
    fn integrate_char(&mut self, id: Id, after: Id, before: Id, ch: char) {
        let (order, pos) = self.chain_positions();
        let mut left = after;
        let mut right = before;
        loop {
            let li = pos[&left];
            let ri = pos[&right];
            if li + 1 == ri {
                break;
            }
            let mut fenced = vec![left];
            for &d in &order[li + 1..ri] {
                let dc = &self.chars[&d];
                if pos[&dc.after] <= li && ri <= pos[&dc.before] {
                    fenced.push(d);
                }
            }
            fenced.push(right);
            // A non-empty gap always fences at least one character.
            debug_assert!(fenced.len() > 2);
            let mut i = 1;
            while i < fenced.len() - 1 && fenced[i] < id {
                i += 1;
            }
            left = fenced[i - 1];
            right = fenced[i];
        }
        let chars = Arc::make_mut(&mut self.chars);
        let next = chars[&left].next;
        if let Some(l) = chars.get_mut(&left) {
            l.next = id;
        }
        if let Some(r) = chars.get_mut(&next) {
            r.prev = id;
        }
        chars.insert(id, Character {
            id,
            visible: true,
            ch,
            next,
            prev: left,
            after,
            before,
        });
    }

    // =========================================================================
    // Delete / attribute / annotation integration
    // =========================================================================

    fn apply_delete(&mut self, id: Id) {
        if id.is_sentinel() || !self.chars.contains_key(&id) {
            return;
        }
        let chars = Arc::make_mut(&mut self.chars);
        if let Some(c) = chars.get_mut(&id) {
            c.visible = false;
        }
    }

    fn apply_decl_attribute(&mut self, id: Id, payload: &Attribute) {
        if self.attrs.contains_key(&id) || self.graveyard.contains(&id) {
            return;
        }
        Arc::make_mut(&mut self.attrs).insert(id, payload.clone());
    }

    fn apply_delete_attribute(&mut self, id: Id) {
        if !self.attrs.contains_key(&id) {
            return;
        }
        Arc::make_mut(&mut self.attrs).remove(&id);
        Arc::make_mut(&mut self.graveyard).insert(id);
    }

    fn apply_mark_annotation(&mut self, id: Id, annotation: Annotation) {
        if self.annos.contains_key(&id) || self.graveyard.contains(&id) {
            return;
        }
        if !self.chars.contains_key(&annotation.begin) || !self.chars.contains_key(&annotation.end) {
            return;
        }
        // A deleted attribute is still addressable; an unknown one is a
        // protocol violation.
        if !self.attrs.contains_key(&annotation.attribute)
            && !self.graveyard.contains(&annotation.attribute)
        {
            return;
        }
        Arc::make_mut(&mut self.annos).insert(id, annotation);
    }

    fn apply_delete_annotation(&mut self, id: Id) {
        if !self.annos.contains_key(&id) {
            return;
        }
        Arc::make_mut(&mut self.annos).remove(&id);
        Arc::make_mut(&mut self.graveyard).insert(id);
    }
}

impl Default for AnnotatedString {
    fn default() -> Self {
        return Self::new();
    }
}

/// Iterator over the character chain, sentinels included.
pub struct Chain<'a> {
    doc: &'a AnnotatedString,
    cur: Option<Id>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Character;

    fn next(&mut self) -> Option<&'a Character> {
        let id = self.cur?;
        let c = self.doc.chars.get(&id)?;
        self.cur = if id == Id::END { None } else { Some(c.next) };
        return Some(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::attribute::Diagnostic;
    use crate::crdt::attribute::Severity;
    use crate::crdt::id::Site;

    fn diagnostic() -> Attribute {
        return Attribute::Diagnostic(Diagnostic {
            severity: Severity::Warning,
            message: "test".to_string(),
        });
    }

    #[test]
    fn empty_document_renders_empty() {
        let doc = AnnotatedString::new();
        assert_eq!(doc.render(), "");
        assert!(doc.is_empty());
        assert_eq!(doc.chain().count(), 2);
    }

    #[test]
    fn single_site_insert() {
        let mut site = Site::with_id(1);
        let doc = AnnotatedString::new()
            .integrate(&site.make_insert(Id::BEGIN, Id::END, "hi"));
        assert_eq!(doc.render(), "hi");
        assert_eq!(doc.len(), 2);
        // Begin, 'h', 'i', End.
        assert_eq!(doc.chain().count(), 4);
    }

    #[test]
    fn chain_links_are_bidirectional() {
        let mut site = Site::with_id(1);
        let doc = AnnotatedString::new()
            .integrate(&site.make_insert(Id::BEGIN, Id::END, "abc"));
        let forward: Vec<Id> = doc.chain().map(|c| c.id).collect();
        let mut backward = Vec::new();
        let mut cur = Id::END;
        loop {
            backward.push(cur);
            if cur == Id::BEGIN {
                break;
            }
            cur = doc.character(cur).unwrap().prev;
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn concurrent_inserts_into_the_same_gap_order_by_id() {
        let mut site_a = Site::with_id(1);
        let mut site_b = Site::with_id(2);
        let a = site_a.make_insert(Id::BEGIN, Id::END, "a");
        let b = site_b.make_insert(Id::BEGIN, Id::END, "b");

        let one = AnnotatedString::new().integrate(&a).integrate(&b);
        let two = AnnotatedString::new().integrate(&b).integrate(&a);

        assert_eq!(one.render(), "ab");
        assert_eq!(two.render(), "ab");
        assert_eq!(one, two);
    }

    #[test]
    fn integration_is_idempotent() {
        let mut site = Site::with_id(1);
        let cmds = site.make_insert(Id::BEGIN, Id::END, "hello");
        let once = AnnotatedString::new().integrate(&cmds);
        let twice = once.integrate(&cmds);
        assert_eq!(once, twice);
    }

    #[test]
    fn tombstoned_character_still_anchors_inserts() {
        let mut site = Site::with_id(1);
        let insert = site.make_insert(Id::BEGIN, Id::END, "xy");
        let x = insert.iter().next().unwrap().id;
        let y = x.offset(1);

        let doc = AnnotatedString::new()
            .integrate(&insert)
            .integrate(&site.make_delete(x))
            .integrate(&site.make_insert(x, y, "z"));

        assert_eq!(doc.render(), "zy");
        assert!(!doc.character(x).unwrap().visible);
    }

    #[test]
    fn delete_is_idempotent_and_keeps_the_chain() {
        let mut site = Site::with_id(1);
        let insert = site.make_insert(Id::BEGIN, Id::END, "ab");
        let a = insert.iter().next().unwrap().id;
        let doc = AnnotatedString::new().integrate(&insert);
        let del = site.make_delete(a);
        let once = doc.integrate(&del);
        let twice = once.integrate(&del);
        assert_eq!(once, twice);
        assert_eq!(once.render(), "b");
        assert_eq!(once.chain().count(), 4);
    }

    #[test]
    fn annotation_survives_intervening_inserts() {
        let mut site = Site::with_id(1);
        let mut other = Site::with_id(2);
        let insert = site.make_insert(Id::BEGIN, Id::END, "abc");
        let a = insert.iter().next().unwrap().id;
        let b = a.offset(1);
        let c = a.offset(2);

        let (decl, attr) = other.make_decl_attribute(diagnostic());
        let (mark, anno) = other.make_mark_annotation(a, c, attr);
        let fresh = other.make_insert(a, b, "q");
        let q = fresh.iter().next().unwrap().id;

        let doc = AnnotatedString::new()
            .integrate(&insert)
            .integrate(&decl)
            .integrate(&mark)
            .integrate(&fresh);

        let span = doc.annotation(anno).unwrap();
        assert_eq!((span.begin, span.end), (a, c));
        assert!(doc.span_contains(anno, a));
        assert!(doc.span_contains(anno, q));
        assert!(doc.span_contains(anno, b));
        assert!(!doc.span_contains(anno, c));
    }

    #[test]
    fn attribute_delete_moves_to_graveyard() {
        let mut site = Site::with_id(1);
        let (decl, attr) = site.make_decl_attribute(diagnostic());
        let doc = AnnotatedString::new()
            .integrate(&decl)
            .integrate(&site.make_delete_attribute(attr));
        assert!(doc.attribute(attr).is_none());
        assert!(doc.is_tombstoned(attr));
        // Redeclaring a tombstoned ID stays a no-op forever.
        let again = doc.integrate(&decl);
        assert!(again.attribute(attr).is_none());
    }

    #[test]
    fn annotation_may_reference_a_deleted_attribute() {
        let mut site = Site::with_id(1);
        let insert = site.make_insert(Id::BEGIN, Id::END, "ab");
        let a = insert.iter().next().unwrap().id;
        let b = a.offset(1);
        let (decl, attr) = site.make_decl_attribute(diagnostic());
        let (mark, anno) = site.make_mark_annotation(a, b, attr);

        let doc = AnnotatedString::new()
            .integrate(&insert)
            .integrate(&decl)
            .integrate(&site.make_delete_attribute(attr))
            .integrate(&mark);

        assert!(doc.annotation(anno).is_some());
    }

    #[test]
    fn malformed_commands_are_skipped() {
        let mut site = Site::with_id(1);
        let doc = AnnotatedString::new();
        let ghost = Id::new(9, 9);

        // Insert anchored on unknown characters.
        let bad_insert = site.make_insert(ghost, Id::END, "a");
        assert_eq!(doc.integrate(&bad_insert), doc);

        // Delete of an unknown character, and of a sentinel.
        assert_eq!(doc.integrate(&site.make_delete(ghost)), doc);
        assert_eq!(doc.integrate(&site.make_delete(Id::BEGIN)), doc);

        // Annotation over unknown characters.
        let (decl, attr) = site.make_decl_attribute(diagnostic());
        let with_attr = doc.integrate(&decl);
        let (mark, _) = site.make_mark_annotation(ghost, Id::END, attr);
        assert_eq!(with_attr.integrate(&mark), with_attr);

        // Annotation over an unknown attribute.
        let (mark, _) = site.make_mark_annotation(Id::BEGIN, Id::END, ghost);
        assert_eq!(with_attr.integrate(&mark), with_attr);

        // Insert whose anchors are reversed.
        let backwards = site.make_insert(Id::END, Id::BEGIN, "a");
        assert_eq!(doc.integrate(&backwards), doc);
    }

    #[test]
    fn concurrent_insert_against_a_prefixed_sibling_converges() {
        // Site 1 inserts "y" at the front. Site 3, having seen it,
        // inserts "z" before it. Site 2 concurrently inserts "x" at the
        // front with an ID between the two. The fence must hide "z"
        // (whose context ends at "y") from "x", or the two delivery
        // orders disagree.
        let mut site1 = Site::with_id(1);
        let mut site2 = Site::with_id(2);
        let mut site3 = Site::with_id(3);

        let y = site1.make_insert(Id::BEGIN, Id::END, "y");
        let y_id = y.iter().next().unwrap().id;
        let x = site2.make_insert(Id::BEGIN, Id::END, "x");
        let z = site3.make_insert(Id::BEGIN, y_id, "z");

        let one = AnnotatedString::new().integrate(&x).integrate(&y).integrate(&z);
        let two = AnnotatedString::new().integrate(&y).integrate(&z).integrate(&x);

        assert_eq!(one.render(), two.render());
        assert_eq!(one, two);
        assert_eq!(one.render(), "zyx");
    }

    #[test]
    fn concurrent_spans_interleave_deterministically() {
        // Both spans target the same gap and their per-character IDs
        // alternate numerically, so every replica settles on the same
        // ascending-ID weave.
        let mut site1 = Site::with_id(1);
        let mut site2 = Site::with_id(2);
        let a = site1.make_insert(Id::BEGIN, Id::END, "aaa");
        let b = site2.make_insert(Id::BEGIN, Id::END, "bbb");

        let one = AnnotatedString::new().integrate(&a).integrate(&b);
        let two = AnnotatedString::new().integrate(&b).integrate(&a);

        assert_eq!(one, two);
        assert_eq!(one.render(), "ababab");
    }

    #[test]
    fn render_matches_visible_chain_traversal() {
        let mut site = Site::with_id(1);
        let insert = site.make_insert(Id::BEGIN, Id::END, "hello");
        let h = insert.iter().next().unwrap().id;
        let doc = AnnotatedString::new()
            .integrate(&insert)
            .integrate(&site.make_delete(h.offset(1)));
        let by_chain: String = doc
            .chain()
            .filter(|c| c.visible)
            .map(|c| c.ch)
            .collect();
        assert_eq!(doc.render(), by_chain);
        assert_eq!(doc.render(), "hllo");
    }

    #[test]
    fn insertion_context_never_changes() {
        let mut site = Site::with_id(1);
        let mut other = Site::with_id(2);
        let insert = site.make_insert(Id::BEGIN, Id::END, "ab");
        let a = insert.iter().next().unwrap().id;
        let b = a.offset(1);
        let doc = AnnotatedString::new()
            .integrate(&insert)
            .integrate(&other.make_insert(a, b, "x"));
        let before = doc.character(b).unwrap();
        assert_eq!(before.after, a);
        assert_eq!(before.before, Id::END);
        assert_eq!(before.prev, doc.character(a).unwrap().next);
    }
}
