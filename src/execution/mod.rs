//! Execution Module
//! Mission: Adapter-only side effects, deployment/order domain flows

pub mod commands;
pub mod service;

pub use commands::{
    CancelOrderCommand, CreateDeploymentCommand, ExecutionCommandService, PlaceOrderCommand,
    StopDeploymentCommand,
};
pub use service::ExecutionService;
