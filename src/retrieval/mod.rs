pub mod orchestrator;
pub mod scorer;
