//! Candidate generation and field resolution.

pub mod candidates;
pub mod resolver;

pub use candidates::{CandidateGenerator, FieldCandidate, SourceText};
pub use resolver::{
    Contradiction, ContradictionSeverity, FieldResolver, ResolvedFields,
};
