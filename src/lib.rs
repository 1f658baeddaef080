//! Memory retrieval for AI agents: rules, summaries, documents and code, served over MCP.
//!
//! recollect stores text fragments in an append-only log addressed by an offset
//! table and answers queries with a cascade of increasingly expensive stages:
//! exact name patterns, then an FTS5 keyword index, then vector similarity. Every
//! candidate is re-ranked by how much of the query it covers, weighted by its
//! memory class:
//!
//! | Class | Source | Retention |
//! |-------|--------|-----------|
//! | **rule** | hand-written project rules | permanent |
//! | **reflective_correction** | lessons recorded after a mistake | permanent |
//! | **consolidated_summary** | LLM summaries of finished sessions | long-term |
//! | **document** | ingested reference text | long-term |
//! | **code_unit** | modules, classes and functions from the code indexer | until the next indexing run |
//! | **raw_episodic** | verbatim user/assistant exchanges | until consolidated |
//!
//! # Architecture
//!
//! - **Storage**: newline-delimited JSON log (JSONL) + offset table + flat vector file
//! - **Index**: immutable generations (names, SQLite FTS5, vectors, dependency
//!   graph) swapped atomically; readers never block on writers
//! - **Embeddings / LLM**: pluggable HTTP clients behind traits
//! - **Transport**: MCP over stdio or streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`store`]: the offset-indexed chunk store
//! - [`index`]: index generations and the atomic handle serving them
//! - [`retrieval`]: the cascading orchestrator and the coverage scorer
//! - [`code`]: code scanning, the dependency graph and context expansion
//! - [`consolidation`]: deferred summarization of finished sessions
//! - [`engine`]: the long-lived handle tying it all together

pub mod code;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod llm;
pub mod memory;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod tools;
