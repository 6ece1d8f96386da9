//! Callable capabilities exposed to the model.
//!
//! [`registry`] holds the generic machinery; [`knowledge`] provides the
//! built-in memory tools (`remember`, `recall`, `forget_fact`) wired up by
//! [`builtin_registry`] at start-up.

pub mod knowledge;
pub mod registry;

pub use registry::{ParamSpec, ParamType, RegistryBuilder, ToolHandler, ToolRegistry, ToolSchema, ToolSpec};

use crate::config::MemoryConfig;
use crate::error::RegistryError;
use crate::memory::knowledge::KnowledgeStore;

/// Build the registry every runtime starts with.
///
/// Returns the builder so callers can add their own tools before freezing it.
pub fn builtin_registry(
    store: KnowledgeStore,
    memory: &MemoryConfig,
) -> Result<RegistryBuilder, RegistryError> {
    let mut builder = RegistryBuilder::new();
    knowledge::register(&mut builder, store, memory)?;
    Ok(builder)
}
