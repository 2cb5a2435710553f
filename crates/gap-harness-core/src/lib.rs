//! # Gap Harness Core
//!
//! Shared, I/O-free logic for Gap Harness: the compliance data model,
//! retrieval and evaluator seams, gap aggregation, and the sequential
//! analysis pipeline that ties them together.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Backends (SQLite index, chat-model client, JSON result sink) live in
//! the `gap-harness` app crate and plug in through the traits defined here.

pub mod aggregate;
pub mod error;
pub mod evaluator;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod scoring;
