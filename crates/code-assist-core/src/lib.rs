//! # Code Assist Core
//!
//! Pure logic for the code-assistant pipeline: data models, symbol
//! extraction, chunk planning, the vector-store abstraction, provider
//! traits, heuristic intent classification, and LLM reply parsing.
//!
//! This crate contains no tokio, reqwest, sqlx, or filesystem I/O. The
//! `code-assist` app crate supplies the runtime pieces (HTTP providers,
//! SQLite store, filesystem collaborators) and the services that drive
//! them.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Symbols, chunks, intents, project snapshots |
//! | [`indexer`] | Regex symbol extraction per language family |
//! | [`chunk`] | Strategy selection and chunk boundaries |
//! | [`embedding`] | Embedding trait and vector helpers |
//! | [`llm`] | Chat-completion trait, messages, blocked-as-data responses |
//! | [`intent`] | Heuristic classifier, file prioritization, token budget |
//! | [`response`] | Structured reply parsing with plain-text fallback |
//! | [`source`] | Project, version, and component collaborator traits |
//! | [`store`] | Vector store trait, code index wrapper, in-memory store |

pub mod chunk;
pub mod embedding;
pub mod indexer;
pub mod intent;
pub mod llm;
pub mod models;
pub mod response;
pub mod source;
pub mod store;

/// Approximate characters-per-token ratio used for every token estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token cost of a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}
