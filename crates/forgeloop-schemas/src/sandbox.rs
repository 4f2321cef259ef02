//! Sandbox descriptor types shared between the sandbox manager and its
//! callers. The live resource (workspace handle, child processes) lives in
//! `forgeloop-sandbox`; this crate only carries the identifiers and
//! lifecycle enum needed to reference a sandbox from elsewhere.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SandboxId = Uuid;

/// Sandbox lifecycle. Terminal state ([`SandboxState::Destroyed`]) is
/// absorbing: INITIALIZING → READY → (BUSY ↔ READY)* → CLEANING → DESTROYED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SandboxState {
    Initializing,
    Ready,
    Busy,
    Cleaning,
    Destroyed,
}

impl SandboxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxState::Destroyed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Initializing, Ready)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready, Cleaning)
                | (Busy, Cleaning)
                | (Cleaning, Destroyed)
                // any non-terminal state can be torn down directly on error paths
                | (Initializing, Cleaning)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroyed_is_absorbing() {
        assert!(SandboxState::Destroyed.is_terminal());
        assert!(!SandboxState::Destroyed.can_transition_to(SandboxState::Ready));
    }

    #[test]
    fn happy_path_transitions() {
        assert!(SandboxState::Initializing.can_transition_to(SandboxState::Ready));
        assert!(SandboxState::Ready.can_transition_to(SandboxState::Busy));
        assert!(SandboxState::Busy.can_transition_to(SandboxState::Ready));
        assert!(SandboxState::Ready.can_transition_to(SandboxState::Cleaning));
        assert!(SandboxState::Cleaning.can_transition_to(SandboxState::Destroyed));
    }
}
