//! Core domain types for kgrag
//!
//! This crate defines the fundamental data structures used throughout
//! the system: entities, relations, communities, retrieval candidates,
//! and the reasoning trace.

pub mod entity;
pub mod relation;
pub mod community;
pub mod provenance;
pub mod retrieval;
pub mod trace;
pub mod error;

pub use entity::{Entity, LayerTag};
pub use relation::{Relation, RelationType};
pub use community::Community;
pub use provenance::Provenance;
pub use retrieval::{CandidateKind, GraphPath, RetrievalCandidate, RetrievalResult};
pub use trace::{AgentAction, AgentOutcome, AnswerStatus, ReasoningStep, ReasoningTrace};
pub use error::{CoreError, Result};
