//! # Code Assist
//!
//! An AI coding assistant that answers prompts about a project with the
//! right files in context.
//!
//! A prompt is classified (LLM first, keyword heuristics as fallback), the
//! intent's scope is resolved into a token-budgeted file list (optionally
//! through a per-version semantic index), and the LLM's reply is parsed
//! into display text plus proposed file operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Workspace  │──▶│ Chunk+Embed  │──▶│ Vector store │
//! │ (projects)  │   │  (indexing)  │   │ SQLite / mem │
//! └──────┬──────┘   └──────────────┘   └──────┬───────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Intent    │──▶│ File scope + │──▶│  Assistant   │──▶ LLM
//! │ classifier  │   │ token budget │   │ orchestrator │
//! └─────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Pure logic (symbol extraction, chunk planning, the store trait,
//! heuristics, reply parsing) lives in `code-assist-core`. This crate adds
//! the runtime: providers, persistence, the services, and the `assist` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`cancel`] | Cooperative cancellation helpers |
//! | [`workspace`] | Filesystem-backed project, version, and component collaborators |
//! | [`indexer`] | Project-wide symbol index |
//! | [`chunker`] | File and project chunking |
//! | [`embedding`] | Embedding providers and batched embedding |
//! | [`llm`] | Chat-completion clients |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | Persistent vector store |
//! | [`semantic_search`] | Per-version index build and similarity search |
//! | [`intent`] | Intent classification and file selection |
//! | [`assistant`] | Conversational orchestrator |
//! | [`progress`] | Indexing progress reporting |
//! | [`services`] | Service graph construction |
//! | [`stats`] | Index status output |

pub mod assistant;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod intent;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod semantic_search;
pub mod services;
pub mod sqlite_store;
pub mod stats;
pub mod workspace;
