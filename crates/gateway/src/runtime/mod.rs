pub mod dispatch;
pub mod orchestrator;
pub mod sweeper;
