// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-reflect
//!
//! Synthesized knowledge ("mental models") about entities, concepts and events,
//! derived from a growing corpus of atomic facts, plus an agentic loop that
//! answers questions by reasoning over that knowledge.
//!
//! ## Architecture
//!
//! - **Models** (`model`, `provenance`): mental-model records whose observations
//!   can only be built from retrieved fact ids
//! - **Storage** (`store`): per-bank keyed persistence, in memory (DashMap) or durable (redb)
//! - **Collaborators** (`facts`, `llm`): fact recall and the reasoning-step protocol
//! - **Refresh pipeline** (`emergent`, `structural`, `generate`, `refresh`): derives,
//!   classifies and regenerates models as a background operation
//! - **Agent loop** (`agent`): bounded reflect/research tool-calling state machine
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use akh_reflect::bank::BankProfile;
//! use akh_reflect::config::ReflectConfig;
//! use akh_reflect::engine::Engine;
//! use akh_reflect::facts::FactCorpus;
//! use akh_reflect::llm::{OllamaClient, RuleClassifier};
//! use akh_reflect::store::mem::MemStore;
//!
//! let config = ReflectConfig::default();
//! let ollama = Arc::new(OllamaClient::new(config.llm.clone()));
//! let engine = Engine::new(
//!     config,
//!     Arc::new(MemStore::new()),
//!     Arc::new(FactCorpus::new()),
//!     ollama,
//!     Arc::new(RuleClassifier::new()),
//! )
//! .unwrap();
//! let profile = BankProfile::new("acme").with_mission("Be a PM for the engineering team");
//! let op = engine.submit_refresh(&profile).unwrap();
//! println!("{:?}", engine.wait_operation(&op).unwrap());
//! ```

pub mod agent;
pub mod bank;
pub mod clock;
pub mod config;
pub mod emergent;
pub mod engine;
pub mod error;
pub mod facts;
pub mod generate;
pub mod llm;
pub mod model;
pub mod paths;
pub mod provenance;
pub mod refresh;
pub mod store;
pub mod structural;
