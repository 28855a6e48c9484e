//! Container lifecycle state types.

use serde::{Deserialize, Serialize};

/// Container lifecycle states.
///
/// States only move forward: `Created → Running → Exited`, or straight from
/// `Created` to `Exited` when a never-started container is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Domain defined but never started.
    Created,

    /// Domain started.
    Running,

    /// Domain stopped.
    Exited,
}

impl ContainerState {
    /// Check if the container is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Exited)
    }

    /// Check if the container can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerState::Created)
    }

    /// Check if a stop would change anything.
    pub fn can_stop(&self) -> bool {
        matches!(self, ContainerState::Created | ContainerState::Running)
    }

    /// Check if the container can be removed.
    pub fn can_remove(&self) -> bool {
        matches!(self, ContainerState::Created | ContainerState::Exited)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ContainerState) -> bool {
        matches!(
            (self, next),
            (ContainerState::Created, ContainerState::Running)
                | (ContainerState::Created, ContainerState::Exited)
                | (ContainerState::Running, ContainerState::Exited)
        )
    }

    /// Get the state name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_predicates() {
        // (state, is_terminal, can_start, can_stop, can_remove)
        let cases = [
            (ContainerState::Created, false, true, true, true),
            (ContainerState::Running, false, false, true, false),
            (ContainerState::Exited, true, false, false, true),
        ];

        for (state, terminal, start, stop, remove) in cases {
            assert_eq!(state.is_terminal(), terminal, "{:?}.is_terminal()", state);
            assert_eq!(state.can_start(), start, "{:?}.can_start()", state);
            assert_eq!(state.can_stop(), stop, "{:?}.can_stop()", state);
            assert_eq!(state.can_remove(), remove, "{:?}.can_remove()", state);
        }
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use ContainerState::*;
        let all = [Created, Running, Exited];
        let allowed = [(Created, Running), (Created, Exited), (Running, Exited)];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ContainerState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
