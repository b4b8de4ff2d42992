//! Validation Module
//! Mission: Tenant-scoped validation runs, baselines, and the replay gate

pub mod replay;
pub mod store;

pub use replay::{evaluate_replay_policy, ReplayGateInputs, ReplayGateOutcome};
pub use store::ValidationService;
