//! Provider Adapters
//! Mission: The only code paths allowed to talk to external providers
//!
//! Adapters return domain-shaped data, never raw provider payloads, and
//! normalize every transport failure into a typed `AdapterError`.

pub mod bridge;
pub mod data;
pub mod execution;
pub mod research;

pub use bridge::{DataBridgeAdapter, InMemoryDataBridgeAdapter};
pub use data::{InMemoryTraderDataAdapter, TraderDataAdapter, TraderDataHttpAdapter};
pub use execution::{
    ExecutionAdapter, InMemoryExecutionAdapter, LiveEngineExecutionAdapter, ProviderDeploymentState,
    ProviderOrderState, ProviderPortfolio,
};
pub use research::{InMemoryResearchAdapter, ProviderBacktestOutcome, ResearchAdapter};
