//! redb table definitions for the coordination store.
//!
//! Both tables are keyed by the absolute node path (`/a/b/c`). Sorting by
//! path keeps every subtree contiguous, so children and descendants are
//! found with a single range scan from `{path}/`.

use redb::TableDefinition;

/// Raw node payloads.
pub const NODE_DATA: TableDefinition<&str, &[u8]> = TableDefinition::new("node_data");

/// JSON-serialized [`crate::Stat`] per node.
pub const NODE_STAT: TableDefinition<&str, &[u8]> = TableDefinition::new("node_stat");
