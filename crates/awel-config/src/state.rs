use serde::{Deserialize, Serialize};

/// Lifecycle state of a flow document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
  #[default]
  Initializing,
  Developing,
  Testing,
  Deployed,
  Running,
  Disabled,
  LoadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid flow state transition from '{from}' to '{to}'")]
pub struct StateTransitionError {
  pub from: FlowState,
  pub to: FlowState,
}

impl FlowState {
  /// States reachable from `self` in a single step. Staying put is always allowed.
  pub fn allowed_transitions(self) -> &'static [FlowState] {
    use FlowState::*;
    match self {
      Initializing => &[Initializing, Developing, LoadFailed],
      Developing => &[Developing, Testing, Deployed, Disabled, LoadFailed],
      Testing => &[Testing, Developing, Deployed, Disabled, LoadFailed],
      Deployed => &[Deployed, Developing, Testing, Running, Disabled, LoadFailed],
      Running => &[Running, Deployed, Disabled, LoadFailed],
      Disabled => &[Disabled, Deployed, Developing],
      LoadFailed => &[LoadFailed, Developing, Deployed, Disabled],
    }
  }

  pub fn can_change_to(self, next: FlowState) -> bool {
    self.allowed_transitions().contains(&next)
  }

  /// Validate a transition, returning the new state on success.
  pub fn transition(self, next: FlowState) -> Result<FlowState, StateTransitionError> {
    if self.can_change_to(next) {
      Ok(next)
    } else {
      Err(StateTransitionError { from: self, to: next })
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      FlowState::Initializing => "initializing",
      FlowState::Developing => "developing",
      FlowState::Testing => "testing",
      FlowState::Deployed => "deployed",
      FlowState::Running => "running",
      FlowState::Disabled => "disabled",
      FlowState::LoadFailed => "load_failed",
    }
  }
}

impl std::fmt::Display for FlowState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path_to_running() {
    let state = FlowState::Initializing
      .transition(FlowState::Developing)
      .and_then(|s| s.transition(FlowState::Testing))
      .and_then(|s| s.transition(FlowState::Deployed))
      .and_then(|s| s.transition(FlowState::Running))
      .unwrap();
    assert_eq!(state, FlowState::Running);
  }

  #[test]
  fn test_illegal_transitions_rejected() {
    assert!(!FlowState::Initializing.can_change_to(FlowState::Running));
    assert!(!FlowState::Disabled.can_change_to(FlowState::Running));
    let err = FlowState::Running
      .transition(FlowState::Testing)
      .unwrap_err();
    assert_eq!(err.from, FlowState::Running);
    assert_eq!(err.to, FlowState::Testing);
    assert_eq!(
      err.to_string(),
      "invalid flow state transition from 'running' to 'testing'"
    );
  }

  #[test]
  fn test_every_state_can_stay() {
    for state in [
      FlowState::Initializing,
      FlowState::Developing,
      FlowState::Testing,
      FlowState::Deployed,
      FlowState::Running,
      FlowState::Disabled,
      FlowState::LoadFailed,
    ] {
      assert!(state.can_change_to(state));
    }
  }

  #[test]
  fn test_serde_snake_case() {
    let json = serde_json::to_string(&FlowState::LoadFailed).unwrap();
    assert_eq!(json, "\"load_failed\"");
    let parsed: FlowState = serde_json::from_str("\"deployed\"").unwrap();
    assert_eq!(parsed, FlowState::Deployed);
  }
}
