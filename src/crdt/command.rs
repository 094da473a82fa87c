// model = "claude-opus-4-5"
// created = "2026-07-29"
// modified = "2026-08-01"
// driver = "Isaac Clayton"

//! Commands: the unit of document mutation.
//!
//! Every edit, no matter which collaborator produced it, travels as a
//! `Command`. The command's `id` doubles as the identity of whatever the
//! command creates (the first character of an insert span, a declared
//! attribute, a marked annotation) or affects (the target of the delete
//! variants). That makes replay detection trivial: a command whose ID is
//! already known is a no-op.
//!
//! When a user types "hello" we do not build five insert commands.
//! One `Insert` carries the whole span; character k of the span owns
//! `id.offset(k)` and is anchored after its predecessor in the span.
//!
//! A `CommandSet` is an ordered batch. It is the atomic unit of listener
//! fan-out: subscribers see whole sets, never fragments of one.

use serde::Deserialize;
use serde::Serialize;

use super::attribute::Annotation;
use super::attribute::Attribute;
use super::id::Id;

/// What a command does to the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Insert `text` into the gap between the characters `after` and
    /// `before`, as observed by the command's author.
    Insert { after: Id, before: Id, text: String },

    /// Tombstone the character named by the command ID.
    Delete,

    /// Declare a new attribute under the command ID.
    DeclAttribute(Attribute),

    /// Tombstone the attribute named by the command ID.
    DeleteAttribute,

    /// Mark an annotation span under the command ID.
    MarkAnnotation(Annotation),

    /// Tombstone the annotation named by the command ID.
    DeleteAnnotation,
}

/// A single document mutation, identified for idempotent replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Id,
    pub op: Op,
}

impl Command {
    /// Create an insert command for a span of text.
    pub fn insert(id: Id, after: Id, before: Id, text: &str) -> Command {
        return Command {
            id,
            op: Op::Insert { after, before, text: text.to_string() },
        };
    }

    /// Create a delete command for a character.
    pub fn delete(target: Id) -> Command {
        return Command { id: target, op: Op::Delete };
    }

    /// Create an attribute declaration command.
    pub fn decl_attribute(id: Id, payload: Attribute) -> Command {
        return Command { id, op: Op::DeclAttribute(payload) };
    }

    /// Create an attribute deletion command.
    pub fn delete_attribute(target: Id) -> Command {
        return Command { id: target, op: Op::DeleteAttribute };
    }

    /// Create an annotation mark command.
    pub fn mark_annotation(id: Id, annotation: Annotation) -> Command {
        return Command { id, op: Op::MarkAnnotation(annotation) };
    }

    /// Create an annotation deletion command.
    pub fn delete_annotation(target: Id) -> Command {
        return Command { id: target, op: Op::DeleteAnnotation };
    }
}

/// An ordered batch of commands, atomic as a fan-out unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSet {
    commands: Vec<Command>,
}

impl CommandSet {
    /// Create an empty set.
    pub fn new() -> CommandSet {
        return CommandSet { commands: Vec::new() };
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Append every command of `other`, preserving order.
    pub fn append(&mut self, other: CommandSet) {
        self.commands.extend(other.commands);
    }

    /// Number of commands in the set.
    pub fn len(&self) -> usize {
        return self.commands.len();
    }

    /// True if the set carries no commands.
    pub fn is_empty(&self) -> bool {
        return self.commands.is_empty();
    }

    /// Iterate the commands in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        return self.commands.iter();
    }
}

impl From<Command> for CommandSet {
    fn from(command: Command) -> CommandSet {
        return CommandSet { commands: vec![command] };
    }
}

impl FromIterator<Command> for CommandSet {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> CommandSet {
        return CommandSet { commands: iter.into_iter().collect() };
    }
}

impl<'a> IntoIterator for &'a CommandSet {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        return self.commands.iter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_command_names_its_first_character() {
        let id = Id::new(1, 1);
        let cmd = Command::insert(id, Id::BEGIN, Id::END, "hello");
        assert_eq!(cmd.id, id);
        match &cmd.op {
            Op::Insert { after, before, text } => {
                assert_eq!(*after, Id::BEGIN);
                assert_eq!(*before, Id::END);
                assert_eq!(text, "hello");
            }
            _ => panic!("expected Insert"),
        }
    }

    #[test]
    fn delete_command_names_its_target() {
        let target = Id::new(2, 9);
        let cmd = Command::delete(target);
        assert_eq!(cmd.id, target);
        assert_eq!(cmd.op, Op::Delete);
    }

    #[test]
    fn append_preserves_order() {
        let mut a = CommandSet::from(Command::delete(Id::new(1, 1)));
        let b = CommandSet::from(Command::delete(Id::new(1, 2)));
        a.append(b);
        let ids: Vec<Id> = a.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![Id::new(1, 1), Id::new(1, 2)]);
    }

    #[test]
    fn command_sets_round_trip_through_json() {
        let mut set = CommandSet::new();
        set.push(Command::insert(Id::new(1, 1), Id::BEGIN, Id::END, "hi"));
        set.push(Command::delete(Id::new(1, 1)));
        let encoded = serde_json::to_string(&set).unwrap();
        let decoded: CommandSet = serde_json::from_str(&encoded).unwrap();
        assert_eq!(set, decoded);
    }
}
