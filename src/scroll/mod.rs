pub mod engine;
pub mod signature;
pub mod state;

pub use engine::ScrollEngine;
pub use signature::{compute_signature, signature_distance, signatures_match};
pub use state::ScrollPosition;
