//! Evidence validation: scoring claims against the evidence pool.

pub mod similarity;
pub mod validator;

pub use similarity::{fits_shape, shape_compatibility, structural_similarity};
pub use validator::{EvidenceThresholds, EvidenceValidator, EvidenceVerdict};
