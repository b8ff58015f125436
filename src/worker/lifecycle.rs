//! Worker lifecycle state and the signals a worker sends its host.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Lifecycle state of a cache manager version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, install not started
  Parsed,
  /// Install phase running
  Installing,
  /// Installed, waiting to activate
  Installed,
  /// Activate phase running
  Activating,
  /// Serving requests
  Activated,
  /// Failed or replaced
  Redundant,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(label)
  }
}

fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
  use WorkerState::*;

  matches!(
    (from, to),
    (Parsed, Installing)
      | (Installing, Installed)
      | (Installing, Redundant)
      | (Installed, Activating)
      | (Activating, Activated)
      | (Activating, Redundant)
      | (Activated, Redundant)
  )
}

/// Tracks the lifecycle state plus the skip-waiting and claim-clients
/// signals raised towards the host.
#[derive(Debug)]
pub struct Lifecycle {
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::resume(WorkerState::Parsed)
  }

  /// Pick up a worker the host already moved to `state`.
  pub fn resume(state: WorkerState) -> Self {
    Self {
      state: Mutex::new(state),
      skip_waiting: AtomicBool::new(false),
      clients_claimed: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state.lock().map(|s| *s).unwrap_or(WorkerState::Redundant)
  }

  /// Move to `to`, rejecting transitions the lifecycle does not allow.
  pub fn transition(&self, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let from = *state;
    if !is_valid_transition(from, to) {
      return Err(eyre!("Invalid lifecycle transition: {} -> {}", from, to));
    }

    debug!(from = %from, to = %to, "lifecycle transition");
    *state = to;
    Ok(())
  }

  /// Ask the host to activate this version without waiting for the old one
  /// to drain.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Take control of already open pages. Only an activated worker can claim.
  pub fn claim_clients(&self) -> Result<()> {
    let state = self.state();
    if state != WorkerState::Activated {
      return Err(eyre!("Cannot claim clients while {}", state));
    }
    self.clients_claimed.store(true, Ordering::SeqCst);
    Ok(())
  }

  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normal_lifecycle() {
    let lc = Lifecycle::new();
    assert_eq!(lc.state(), WorkerState::Parsed);
    lc.transition(WorkerState::Installing).unwrap();
    lc.transition(WorkerState::Installed).unwrap();
    lc.transition(WorkerState::Activating).unwrap();
    lc.transition(WorkerState::Activated).unwrap();
    assert_eq!(lc.state(), WorkerState::Activated);
  }

  #[test]
  fn test_invalid_transition_keeps_state() {
    let lc = Lifecycle::new();
    assert!(lc.transition(WorkerState::Activated).is_err());
    assert_eq!(lc.state(), WorkerState::Parsed);
  }

  #[test]
  fn test_install_twice_rejected() {
    let lc = Lifecycle::resume(WorkerState::Installed);
    assert!(lc.transition(WorkerState::Installing).is_err());
  }

  #[test]
  fn test_claim_requires_activated() {
    let lc = Lifecycle::resume(WorkerState::Installed);
    assert!(lc.claim_clients().is_err());
    assert!(!lc.clients_claimed());

    let lc = Lifecycle::resume(WorkerState::Activated);
    lc.claim_clients().unwrap();
    assert!(lc.clients_claimed());
  }

  #[test]
  fn test_skip_waiting_signal() {
    let lc = Lifecycle::new();
    assert!(!lc.skip_waiting_requested());
    lc.skip_waiting();
    assert!(lc.skip_waiting_requested());
  }
}
