//! # Context Triage
//!
//! Query triage and multi-source retrieval for grounded AI answers.
//!
//! A question is classified into a knowledge category, routed to the
//! knowledge sources registered for that category, searched across those
//! sources concurrently, and answered from the highest-confidence quotes.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────────┐   ┌─────────────┐
//! │ Classifier │──▶│    Retrieval    │──▶│ Synthesizer │
//! │ pre/model/ │   │  Orchestrator   │   │ floor+cite  │
//! │   post     │   └───┬────┬────┬───┘   └─────────────┘
//! └────────────┘       │    │    │
//!                      ▼    ▼    ▼
//!              ┌────────┐ ┌──────┐ ┌────────┐
//!              │Registry│ │Caches│ │ Vector │
//!              │ (fs)   │ │ +fs  │ │ Index  │
//!              └────────┘ └──────┘ └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! triage sources                         # list sources and staleness
//! triage classify "pizza spikes me hours later"
//! triage ask "How do I use an extended bolus?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error types |
//! | [`registry`] | Knowledge source discovery and staleness |
//! | [`cache`] | Upload and search result caches |
//! | [`provider`] | Generation, embedding, and file store collaborators |
//! | [`vector`] | Vector index abstraction |
//! | [`response`] | Structured model response parsing |
//! | [`classifier`] | Query classification |
//! | [`retrieval`] | Multi-source retrieval fan-out |
//! | [`synthesis`] | Answer synthesis |
//! | [`service`] | End-to-end question answering |

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod registry;
pub mod response;
pub mod retrieval;
pub mod service;
pub mod synthesis;
pub mod vector;

pub use error::{ProviderError, Result, TriageError};
pub use models::{Category, Classification, KnowledgeSource, SearchResult};
pub use service::{Answer, TriageService};
