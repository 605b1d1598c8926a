//! # page-ingest
//!
//! Enriches per-page document artifacts (page images and page text) with
//! named entities and embeddings, and loads them into a hybrid
//! (vector + keyword) search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────────────────────────┐   ┌─────────┐
//! │ Acquisition  │──▶│ Orchestrator (batches, join barrier)      │──▶│  Index  │
//! │ S3 → staging │   │  extract → embed → assemble → ingest      │   │ (POST)  │
//! └──────────────┘   └───────────────────────┬───────────────────┘   └─────────┘
//!                                            ▼
//!                                    ┌──────────────┐
//!                                    │ audit/*.json │
//!                                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pingest check                 # validate config, prompts, credentials
//! pingest run all --fetch       # stage from S3, then run both pipelines
//! pingest run text              # text pages only, from the staging dir
//! pingest schema                # print the expected index mapping
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Per-stage error taxonomy |
//! | [`acquire`] | Staging directory scan and S3 download |
//! | [`extract`] | Image and text entity extraction |
//! | [`embedding`] | Embedding generation |
//! | [`assemble`] | Record assembly |
//! | [`ingest`] | Signed index delivery and audit copies |
//! | [`orchestrator`] | Batched, fault-isolated execution |
//! | [`pipeline`] | Image and text pipeline driver |
//! | [`progress`] | Batch progress reporting |
//! | [`remote`] | Signed JSON POST with retry |
//! | [`retry`] | Retry policy |
//! | [`schema`] | Expected index mapping |
//! | [`sigv4`] | AWS SigV4 request signing |

pub mod acquire;
pub mod assemble;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod sigv4;
