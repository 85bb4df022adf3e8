// crates/partid-daemon/src/state.rs
//
// Lifecycle state machine for the PartID daemon.
//
// Valid transitions:
//   Initializing -> Loading -> Serving
//   Any state -> ShuttingDown

use std::fmt;

/// Lifecycle states of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Reading configuration and opening storage.
    Initializing,
    /// Restoring the catalog and applying the seed file.
    Loading,
    /// Accepting RPC requests; maintenance running.
    Serving,
    ShuttingDown,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Initializing => write!(f, "Initializing"),
            NodeState::Loading => write!(f, "Loading"),
            NodeState::Serving => write!(f, "Serving"),
            NodeState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

pub struct NodeStateMachine {
    pub current: NodeState,
}

impl NodeStateMachine {
    pub fn new() -> Self {
        Self {
            current: NodeState::Initializing,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition(&mut self, new_state: NodeState) -> Result<(), String> {
        let valid = matches!(
            (&self.current, &new_state),
            (_, NodeState::ShuttingDown)
                | (NodeState::Initializing, NodeState::Loading)
                | (NodeState::Loading, NodeState::Serving)
        );

        if valid {
            tracing::info!("State transition: {} -> {}", self.current, new_state);
            self.current = new_state;
            Ok(())
        } else {
            Err(format!(
                "Invalid state transition: {} -> {}",
                self.current, new_state
            ))
        }
    }
}

impl Default for NodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
