//! # Gap Harness
//!
//! Compliance gap analysis between an organisation's internal risk and
//! control matrix and an external regulation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RCM JSON   │──▶│ SQLite index │──▶│  Retriever   │──┐
//! └────────────┘   │ (+ vectors)  │   └──────────────┘  │
//!                  └──────────────┘                     ▼
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ Regulation │──▶│ gap extract  │──▶│ GapPipeline          │──▶│ results    │
//! │ PDF / text │   │ (2 stages)   │   │ rubric × question    │   │ JSON + log │
//! └────────────┘   └──────────────┘   │ → chat model         │   └────────────┘
//!                                     └──────────────────────┘
//! ```
//!
//! The pipeline itself lives in `gap-harness-core`; this crate supplies the
//! backends and the `gap` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`rcm`] | Risk-and-control matrix input format |
//! | [`rcm_gen`] | Risk-and-control matrix generation |
//! | [`index`] | SQLite item index and retriever |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat-model client and evaluator |
//! | [`inputs`] | Requirement and rubric loading |
//! | [`rubrics`] | Rubric display and generation |
//! | [`extract`] | Requirement extraction from regulations |
//! | [`progress`] | Live progress reporting |
//! | [`sink`] | Result persistence |
//! | [`analyze`] | The `gap analyze` command |
//! | [`search`] | The `gap search` command |
//! | [`stats`] | Run statistics |

pub mod analyze;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod index;
pub mod inputs;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod rcm;
pub mod rcm_gen;
pub mod rubrics;
pub mod search;
pub mod sink;
pub mod stats;
