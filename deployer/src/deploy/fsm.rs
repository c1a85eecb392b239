//! Finite State Machine for deployment status

use crate::errors::AppError;
use crate::models::deployment::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// A worker takes the deployment
    Claim,

    /// Container launched and published
    Succeed,

    /// Pipeline failed or was aborted
    Fail,

    /// Health check found the container dead
    ContainerLost,
}

/// Compute the status an event leads to
pub fn next_status(
    state: DeploymentStatus,
    event: DeploymentEvent,
) -> Result<DeploymentStatus, AppError> {
    let new_state = match (state, event) {
        // From Pending
        (DeploymentStatus::Pending, DeploymentEvent::Claim) => DeploymentStatus::Building,
        (DeploymentStatus::Pending, DeploymentEvent::Fail) => DeploymentStatus::Failed,

        // From Building
        (DeploymentStatus::Building, DeploymentEvent::Succeed) => DeploymentStatus::Deployed,
        (DeploymentStatus::Building, DeploymentEvent::Fail) => DeploymentStatus::Failed,

        // From Deployed
        (DeploymentStatus::Deployed, DeploymentEvent::ContainerLost) => DeploymentStatus::Failed,

        // Invalid transitions
        (state, event) => {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {:?}",
                state, event
            )));
        }
    };

    Ok(new_state)
}

/// Check a direct status change against the transition table
pub fn validate_transition(
    from: DeploymentStatus,
    to: DeploymentStatus,
) -> Result<(), AppError> {
    let allowed = [
        DeploymentEvent::Claim,
        DeploymentEvent::Succeed,
        DeploymentEvent::Fail,
        DeploymentEvent::ContainerLost,
    ]
    .into_iter()
    .any(|event| matches!(next_status(from, event), Ok(next) if next == to));

    if allowed {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!("{} -> {}", from, to)))
    }
}
