//! Lifecycle states of an asset cache generation.

use thiserror::Error;

/// Where a generation is in its install/activate lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
  /// Known but not yet installed
  #[default]
  Parsed,
  /// Populating the manifest
  Installing,
  /// Installed, waiting to activate
  Installed,
  /// Purging obsolete generations
  Activating,
  /// Serving requests
  Activated,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid lifecycle transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
  pub from: GenerationState,
  pub to: GenerationState,
}

impl GenerationState {
  /// Move to `to`, rejecting anything outside the normal lifecycle.
  pub fn transition(&mut self, to: GenerationState) -> Result<(), InvalidTransition> {
    if !is_valid_transition(*self, to) {
      return Err(InvalidTransition { from: *self, to });
    }
    *self = to;
    Ok(())
  }
}

fn is_valid_transition(from: GenerationState, to: GenerationState) -> bool {
  use GenerationState::*;

  matches!(
    (from, to),
    (Parsed, Installing)
      | (Installing, Installed)
      // Reinstall refreshes the manifest of an existing generation
      | (Installed, Installing)
      | (Activated, Installing)
      | (Installed, Activating)
      // Re-activation purges again without reinstalling
      | (Activated, Activating)
      | (Activating, Activated)
  )
}
