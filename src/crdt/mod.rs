// model = "claude-opus-4-5"
// created = "2026-07-29"
// modified = "2026-08-01"
// driver = "Isaac Clayton"

//! The document data model: identifiers, commands, attributes, and the
//! annotated string they act on.
//!
//! Everything here is a value. Integration is a pure function from a
//! document and a command set to a new document, and it is total,
//! idempotent per command ID, and order-insensitive across command sets
//! that do not reference each other's IDs. That is the contract the
//! buffer coordinator and every replication scheme above it lean on.

pub mod attribute;
pub mod command;
pub mod id;
pub mod string;
pub mod wire;
