//! # Product Harvest
//!
//! Runs external product scrapers, normalizes what they write and upserts
//! it idempotently into a document store, keeping a summary of every run.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Scrapers   │──▶│   Artifact   │──▶│ Persistence  │──▶│  SQLite  │
//! │ (processes) │   │    Reader    │   │ identity+hash│   │ documents│
//! └─────────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!        ▲                                                     │
//!        │            ┌──────────────┐                         ▼
//!        └────────────│ Orchestrator │──▶ ejecucion_*.json  enrich / admin
//!                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest init                              # create the database
//! harvest sources                           # check configured scrapers
//! harvest run --sources alkosto,exito --pages 2
//! harvest enrich --limit 100                # embed stored products
//! harvest admin --stats-only
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite document store |
//! | [`persistence`] | Idempotent product upserts |
//! | [`artifact`] | JSON / JSON-Lines artifact reader |
//! | [`runner`] | Bounded source process execution |
//! | [`pipeline`] | Multi-source orchestration and run summaries |
//! | [`embedding`] | Embedding service client |
//! | [`enrich`] | Embedding enrichment command |
//! | [`admin`] | Backup, stats and clear |
//! | [`upload`] | Direct record upload |
//! | [`sources`] | Source listing |

pub mod admin;
pub mod artifact;
pub mod config;
pub mod db;
pub mod embedding;
pub mod enrich;
pub mod logging;
pub mod migrate;
pub mod persistence;
pub mod pipeline;
pub mod runner;
pub mod sources;
pub mod sqlite_store;
pub mod upload;

pub use harvest_core::{identity, models, store};
