//! Conversation and search orchestration for a place-finding assistant.
//!
//! The crate is transport-agnostic: a messaging adapter feeds user
//! utterances, shared locations, and button callbacks into
//! [`orchestrator::DialogueOrchestrator`] and delivers the returned
//! [`types::ResponseDescriptor`]s. Behind the orchestrator sit the
//! [`search::SearchAggregator`] (AI-grounded search with a structured
//! fallback), per-provider daily quotas, a TTL result cache, and SQLite
//! persistence for sessions, cache entries, and the API-call ledger.

pub mod cache;
pub mod config;
pub mod geo;
pub mod intent;
pub mod orchestrator;
pub mod providers;
pub mod quota;
pub mod ranking;
pub mod search;
pub mod session;
pub mod state;
pub mod traits;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod integration_tests;
