//! Lifecycle state machines
//! Mission: Deterministic transitions for deployments, orders, and
//! orchestrator runs, with provider-status normalization
//!
//! Terminal states are absorbing. Applying a provider-reported status that is
//! not reachable from the current state preserves the current state, unless
//! the target is `failed`.

use thiserror::Error;

pub const DEPLOYMENT_STATES: &[&str] =
    &["queued", "running", "paused", "stopping", "stopped", "failed"];
pub const DEPLOYMENT_TERMINAL_STATES: &[&str] = &["stopped", "failed"];

pub const ORDER_STATES: &[&str] = &["pending", "filled", "cancelled", "failed"];
pub const ORDER_TERMINAL_STATES: &[&str] = &["filled", "cancelled", "failed"];

pub const ORCHESTRATOR_INITIAL_STATE: &str = "received";
pub const ORCHESTRATOR_STATES: &[&str] = &[
    "received",
    "queued",
    "executing",
    "awaiting_tool",
    "awaiting_user_confirmation",
    "completed",
    "failed",
    "cancelled",
];
pub const ORCHESTRATOR_TERMINAL_STATES: &[&str] = &["completed", "failed", "cancelled"];

/// Raised when an orchestrator run transition violates the contract.
#[derive(Debug, Clone, Error)]
#[error("Invalid orchestrator transition: {from} -> {to}")]
pub struct OrchestratorTransitionError {
    pub from: String,
    pub to: String,
}

fn deployment_targets(current: &str) -> &'static [&'static str] {
    match current {
        "queued" => &["queued", "running", "failed", "stopping", "stopped"],
        "running" => &["running", "paused", "stopping", "stopped", "failed"],
        "paused" => &["paused", "running", "stopping", "stopped", "failed"],
        "stopping" => &["stopping", "stopped", "failed"],
        "stopped" => &["stopped"],
        "failed" => &["failed"],
        _ => &[],
    }
}

fn order_targets(current: &str) -> &'static [&'static str] {
    match current {
        "pending" => &["pending", "filled", "cancelled", "failed"],
        "filled" => &["filled"],
        "cancelled" => &["cancelled"],
        "failed" => &["failed"],
        _ => &[],
    }
}

fn orchestrator_targets(current: &str) -> &'static [&'static str] {
    match current {
        "received" => &["received", "queued", "failed", "cancelled"],
        "queued" => &["queued", "executing", "failed", "cancelled"],
        "executing" => &[
            "executing",
            "awaiting_tool",
            "awaiting_user_confirmation",
            "completed",
            "failed",
            "cancelled",
        ],
        "awaiting_tool" => &["awaiting_tool", "executing", "failed", "cancelled"],
        "awaiting_user_confirmation" => {
            &["awaiting_user_confirmation", "executing", "failed", "cancelled"]
        }
        "completed" => &["completed"],
        "failed" => &["failed"],
        "cancelled" => &["cancelled"],
        _ => &[],
    }
}

/// Normalize a provider-reported deployment status; unknown maps to `failed`.
pub fn map_provider_deployment_status(raw: Option<&str>) -> &'static str {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("queued") | Some("pending") | Some("starting") => "queued",
        Some("running") | Some("active") => "running",
        Some("paused") => "paused",
        Some("halting") | Some("stopping") => "stopping",
        Some("stopped") | Some("terminated") => "stopped",
        _ => "failed",
    }
}

/// Normalize a provider-reported order status; `failed` is the safe default.
pub fn map_provider_order_status(raw: Option<&str>) -> &'static str {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("pending") | Some("queued") | Some("open") | Some("working")
        | Some("partially_filled") => "pending",
        Some("filled") | Some("executed") => "filled",
        Some("cancelled") | Some("canceled") => "cancelled",
        _ => "failed",
    }
}

pub fn is_valid_deployment_transition(current: &str, target: &str) -> bool {
    DEPLOYMENT_STATES.contains(&target) && deployment_targets(current).contains(&target)
}

/// Apply a provider status to a deployment's current state.
pub fn apply_deployment_transition(current: &str, provider_status: Option<&str>) -> String {
    let target = map_provider_deployment_status(provider_status);
    if !DEPLOYMENT_STATES.contains(&current) {
        return target.to_string();
    }
    if is_valid_deployment_transition(current, target) {
        return target.to_string();
    }
    if DEPLOYMENT_TERMINAL_STATES.contains(&current) {
        return current.to_string();
    }
    if target == "failed" {
        return "failed".to_string();
    }
    current.to_string()
}

/// Apply a provider status to an order's current state.
pub fn apply_order_transition(current: &str, provider_status: Option<&str>) -> String {
    let target = map_provider_order_status(provider_status);
    if !ORDER_STATES.contains(&current) {
        return target.to_string();
    }
    if order_targets(current).contains(&target) {
        return target.to_string();
    }
    if ORDER_TERMINAL_STATES.contains(&current) {
        return current.to_string();
    }
    if target == "failed" {
        return "failed".to_string();
    }
    current.to_string()
}

pub fn is_orchestrator_terminal(state: &str) -> bool {
    ORCHESTRATOR_TERMINAL_STATES.contains(&state)
}

pub fn can_orchestrator_transition(current: &str, target: &str) -> bool {
    ORCHESTRATOR_STATES.contains(&target) && orchestrator_targets(current).contains(&target)
}

/// Validate and perform an orchestrator transition.
pub fn orchestrator_transition(
    current: &str,
    target: &str,
) -> Result<String, OrchestratorTransitionError> {
    if !can_orchestrator_transition(current, target) {
        return Err(OrchestratorTransitionError {
            from: current.to_string(),
            to: target.to_string(),
        });
    }
    Ok(target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_deployment_status_mapping() {
        assert_eq!(map_provider_deployment_status(Some("active")), "running");
        assert_eq!(map_provider_deployment_status(Some("halting")), "stopping");
        assert_eq!(map_provider_deployment_status(Some("terminated")), "stopped");
        assert_eq!(map_provider_deployment_status(Some("error")), "failed");
        assert_eq!(map_provider_deployment_status(Some("something-new")), "failed");
        assert_eq!(map_provider_deployment_status(None), "failed");
    }

    #[test]
    fn test_provider_order_status_mapping() {
        assert_eq!(map_provider_order_status(Some("partially_filled")), "pending");
        assert_eq!(map_provider_order_status(Some("executed")), "filled");
        assert_eq!(map_provider_order_status(Some("canceled")), "cancelled");
        assert_eq!(map_provider_order_status(Some("rejected")), "failed");
        assert_eq!(map_provider_order_status(None), "failed");
    }

    #[test]
    fn test_terminal_deployment_states_are_absorbing() {
        assert_eq!(apply_deployment_transition("stopped", Some("running")), "stopped");
        assert_eq!(apply_deployment_transition("failed", Some("running")), "failed");
        assert_eq!(apply_deployment_transition("stopped", Some("error")), "stopped");
    }

    #[test]
    fn test_unreachable_target_preserves_current_unless_failed() {
        // stopping cannot go back to running; state is preserved
        assert_eq!(apply_deployment_transition("stopping", Some("running")), "stopping");
        // but an error always lands in failed from a non-terminal state
        assert_eq!(apply_deployment_transition("stopping", Some("error")), "failed");
    }

    #[test]
    fn test_deployment_happy_path_transitions() {
        assert_eq!(apply_deployment_transition("queued", Some("running")), "running");
        assert_eq!(apply_deployment_transition("running", Some("stopping")), "stopping");
        assert_eq!(apply_deployment_transition("stopping", Some("stopped")), "stopped");
    }

    #[test]
    fn test_terminal_order_states_are_absorbing() {
        assert_eq!(apply_order_transition("filled", Some("cancelled")), "filled");
        assert_eq!(apply_order_transition("cancelled", Some("filled")), "cancelled");
        assert_eq!(apply_order_transition("failed", Some("filled")), "failed");
    }

    #[test]
    fn test_order_pending_can_reach_every_terminal() {
        assert_eq!(apply_order_transition("pending", Some("filled")), "filled");
        assert_eq!(apply_order_transition("pending", Some("canceled")), "cancelled");
        assert_eq!(apply_order_transition("pending", Some("rejected")), "failed");
    }

    #[test]
    fn test_orchestrator_transition_validation() {
        assert!(orchestrator_transition("received", "queued").is_ok());
        assert!(orchestrator_transition("queued", "executing").is_ok());
        assert!(orchestrator_transition("executing", "awaiting_tool").is_ok());
        assert!(orchestrator_transition("awaiting_tool", "executing").is_ok());
        assert!(orchestrator_transition("executing", "completed").is_ok());

        let err = orchestrator_transition("received", "executing").unwrap_err();
        assert_eq!(err.from, "received");
        assert_eq!(err.to, "executing");
    }

    #[test]
    fn test_orchestrator_terminal_states_reject_all_transitions() {
        for terminal in ORCHESTRATOR_TERMINAL_STATES {
            for target in ORCHESTRATOR_STATES {
                if target == terminal {
                    continue;
                }
                assert!(
                    orchestrator_transition(terminal, target).is_err(),
                    "{terminal} -> {target} should be rejected"
                );
            }
        }
    }

    #[test]
    fn test_cancel_reachable_from_all_non_terminal_states() {
        for state in ORCHESTRATOR_STATES {
            if is_orchestrator_terminal(state) {
                continue;
            }
            assert!(can_orchestrator_transition(state, "cancelled"));
        }
    }
}
