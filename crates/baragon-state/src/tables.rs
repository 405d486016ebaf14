//! redb table definitions for the Baragon state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Service records keyed by `{service_id}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Node outcomes keyed by `{request_id}`.
pub const OUTCOMES: TableDefinition<&str, &[u8]> = TableDefinition::new("outcomes");

/// Coordinator request records keyed by `{request_id}`.
pub const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("requests");
