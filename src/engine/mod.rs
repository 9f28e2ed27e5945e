pub mod assignment;
pub mod eligibility;
pub mod lifecycle;
pub mod queue;
pub mod scoring;
pub mod state_machine;
