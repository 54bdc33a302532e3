//! # Memory Search
//!
//! Hybrid retrieval over a personal memory corpus: Markdown notes and JSON
//! fact files under one root directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │   Corpus    │──▶│   Indexer    │──▶│     SQLite      │
//! │ MD + JSON   │   │ Chunk+Embed  │   │ FTS5 + vectors  │
//! └─────────────┘   └──────────────┘   └────────┬────────┘
//!                                               │
//!                         ┌─────────────────────┤
//!                         ▼                     ▼
//!                    ┌──────────┐         ┌──────────┐
//!                    │  BM25    │         │  Cosine  │
//!                    └────┬─────┘         └────┬─────┘
//!                         └──────▶ RRF ◀───────┘
//!                                  │
//!                                dedup ──▶ results
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! msearch rebuild                 # index the corpus
//! msearch search "websocket reconnect"
//! msearch search 解密 --mode bm25 -c fact
//! msearch stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | Corpus scanning |
//! | [`db`] | Database connection and error classification |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` |
//! | [`embedding`] | Concrete embedding backends |
//! | [`engine`] | The [`Engine`] handle |
//! | [`stats`] | Index statistics |

pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;

pub use engine::Engine;
pub use memory_search_core::{Error, Result};
