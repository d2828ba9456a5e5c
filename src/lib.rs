//! # Capture Relay
//!
//! Mirrors changed capture notes into external systems.
//!
//! Each run scans a directory of Markdown notes with YAML-style headers,
//! fingerprints every note, records the fingerprints in a SQLite ledger and
//! hands each consumer the notes it has not yet settled at their current
//! content. Consumers keep independent checkpoints: one failing, or being
//! added later, never disturbs the others.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ capture/*.md│──▶│  Dispatcher  │──▶│    Ledger    │
//! │ header+body │   │ refresh/prune│   │ notes        │
//! └─────────────┘   └──────┬───────┘   │ emissions    │
//!                          │           └──────▲───────┘
//!                          ▼                  │ mark_emitted
//!                   ┌──────────────┐          │
//!                   │   runtime    │──────────┘
//!                   │ per consumer │──▶ taskwarrior, ...
//!                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! capture-relay --list-consumers
//! capture-relay --consumer taskwarrior --log-level debug
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`frontmatter`] | Header/body split and header parsing |
//! | [`notes`] | Capture directory scan and fingerprints |
//! | [`models`] | Records, change states, outcomes |
//! | [`ledger`] | SQLite change ledger |
//! | [`dispatch`] | Change detection and pending queries |
//! | [`consumer`] | Consumer trait and type registry |
//! | [`runtime`] | Per-consumer dispatch loop |
//! | [`taskwarrior`] | Taskwarrior consumer |
//! | [`config`] | TOML configuration |
//! | [`run`] | One full pass, as driven by the CLI |

pub mod config;
pub mod consumer;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod frontmatter;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod notes;
pub mod run;
pub mod runtime;
pub mod taskwarrior;
