//! Claim extraction, validation and level-of-assurance handling.

pub mod loa;
pub mod path;
pub mod processor;

pub use loa::{LoaMappingEntry, LoaOrdering, LoaValueMapping};
pub use path::ClaimPath;
pub use processor::{
    process, CanonicalClaims, ClaimError, ClaimPathSpec, LoaInstructions, ProcessingInstructions,
    Requirement, ValidationMode,
};
