mod orchestrator;
mod reaper;

pub use orchestrator::WorkerOrchestrator;
pub use reaper::Reaper;
