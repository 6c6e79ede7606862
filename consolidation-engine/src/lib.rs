pub mod engine;
pub mod vacuum;

pub use engine::{ConsolidationCandidate, ConsolidationEngine, ConsolidationRequest, ConsolidationSummary};
pub use vacuum::{VacuumRequest, VacuumSummary};
