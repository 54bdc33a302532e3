//! # Memory Search Core
//!
//! Storage-agnostic logic for the memory-search engine: data models,
//! chunking, tokenization, rank fusion, deduplication, the [`store::Store`]
//! abstraction, the embedding trait, and the generic indexing and query
//! pipelines.
//!
//! This crate does no filesystem or database I/O. The `memory-search` app
//! crate provides the SQLite store, corpus scanning and concrete embedding
//! backends.

pub mod chunk;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod indexer;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenize;

pub use error::{Error, Result};
