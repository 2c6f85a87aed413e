//! Cache nodes and their configuration

mod definition;
mod node;
mod policy;
mod schema;

pub use definition::{CacheNodeDefinition, CacheNodeDefinitionBuilder, DEFAULT_IDENTIFIER_KEYS};
pub use node::{CacheNode, NodeStats, SyncReport};
pub use policy::TtlPolicy;
pub use schema::{FieldKind, FieldSpec, ParseFieldKindError};
