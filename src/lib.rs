//! Personal assistant backend: a bounded tool-calling loop with persistent
//! semantic memory.
//!
//! A user message goes through the [`orchestrator`], which builds context from
//! the conversation log and the fact store ([`context`]), calls the language
//! model ([`model`]), runs any requested tools concurrently ([`tools`]) and
//! loops until the model answers or the round limit is hit. The reply is
//! stored and the latest turns are handed to the background [`extractor`],
//! which mines them for durable facts.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (bundled), one shared connection, every call on the
//!   blocking pool
//! - **Fact search**: full linear scan, cosine similarity, facts tagged with
//!   the embedding model that produced them
//! - **Embeddings**: OpenAI-compatible `/embeddings` or a local hashing embedder
//! - **Model**: OpenAI-compatible `/chat/completions` with function calling,
//!   per-call timeout and exponential backoff
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`embedding`]: Text-to-vector providers
//! - [`memory`]: Conversation log, fact store, similarity ranking, statistics
//! - [`tools`]: Tool registry and the built-in memory tools
//! - [`model`]: Model-completion interface, OpenAI-compatible client, retry
//! - [`context`]: Per-request context assembly and system prompt
//! - [`orchestrator`]: The tool-calling state machine
//! - [`extractor`]: Background fact extraction queue and worker
//! - [`runtime`]: Wiring of all of the above

pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod runtime;
pub mod tools;
