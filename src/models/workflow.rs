// src/models/workflow.rs

use std::fmt;

use crate::error::MarketplaceError;

/// A status enum whose legal moves are listed in an explicit table.
///
/// Anything not returned by `successors` is rejected with
/// `MarketplaceError::InvalidTransition`.
pub trait Workflow: Copy + Eq + fmt::Display + 'static {
    const ENTITY: &'static str;

    fn successors(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    fn transition(self, next: Self) -> Result<Self, MarketplaceError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MarketplaceError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}
