pub mod backend;
pub mod citation;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod quote;
pub mod trust;
