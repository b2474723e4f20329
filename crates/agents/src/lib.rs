//! Retrieval engine and reasoning loop for kgrag
//!
//! This crate contains the hybrid graph-vector retrieval engine and the
//! bounded ReAct agent that consumes it:
//! - fusion: combines vector-similarity and graph-proximity rankings
//! - walker: multi-hop path expansion over the knowledge graph
//! - retriever: orchestrates both signals into one cited result
//! - controller: the think-act-observe loop driving a language model

pub mod config;
pub mod controller;
pub mod error;
pub mod fusion;
pub mod inference;
pub mod retriever;
pub mod store;
pub mod tools;
pub mod walker;

pub use config::{AgentConfig, RetrievalConfig};
pub use controller::{ChatSession, ReasoningController};
pub use error::{AgentError, Result};
pub use inference::{ChatClient, ChatMessage, EmbedClient, Embedder, Planner, PlannerDecision};
pub use retriever::HybridRetriever;
pub use store::{GraphStore, SimilarityIndex, SurrealGraphStore, SurrealSimilarityIndex};
pub use tools::{Tool, ToolObservation, ToolRegistry};
