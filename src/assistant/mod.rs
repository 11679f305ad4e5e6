pub mod executors;
pub mod functions;
pub mod orchestrator;
