pub mod batch;
pub mod orchestrator;
pub mod output;
