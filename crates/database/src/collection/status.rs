//! Collection lifecycle status.

use core::fmt;
use strand_core::{Error, Result};

/// Lifecycle status of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CollectionStatus {
    /// Created, sync not started.
    #[default]
    Idle,
    /// Sync started, first commit not yet marked ready.
    Loading,
    Ready,
    Error,
    /// Sync stopped and data released.
    CleanedUp,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Idle => "idle",
            CollectionStatus::Loading => "loading",
            CollectionStatus::Ready => "ready",
            CollectionStatus::Error => "error",
            CollectionStatus::CleanedUp => "cleaned-up",
        }
    }

    /// Whether moving from `self` to `to` is allowed.
    pub fn can_transition_to(&self, to: CollectionStatus) -> bool {
        use CollectionStatus::{CleanedUp, Idle, Loading, Ready};
        if *self == to {
            return true;
        }
        matches!(
            (self, to),
            (Idle, Loading | CollectionStatus::Error | CleanedUp)
                | (Loading, Ready | CollectionStatus::Error | CleanedUp)
                | (Ready, CleanedUp | CollectionStatus::Error)
                | (CollectionStatus::Error, CleanedUp | Idle)
                | (CleanedUp, Loading | CollectionStatus::Error)
        )
    }

    pub(crate) fn check_transition(&self, collection: &str, to: CollectionStatus) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidStatusTransition {
                collection: collection.into(),
                from: self.as_str().into(),
                to: to.as_str().into(),
            })
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted to status listeners after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub from: CollectionStatus,
    pub to: CollectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use CollectionStatus::{CleanedUp, Idle, Loading, Ready};

    #[test]
    fn test_transitions() {
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Ready));
        assert!(Ready.can_transition_to(CleanedUp));
        assert!(CleanedUp.can_transition_to(Loading));
        assert!(CollectionStatus::Error.can_transition_to(Idle));
        assert!(Ready.can_transition_to(Ready));

        assert!(!Idle.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Loading));
        assert!(!CollectionStatus::Error.can_transition_to(Ready));
        assert!(!CleanedUp.can_transition_to(Idle));
    }

    #[test]
    fn test_check_transition_error() {
        let err = Ready.check_transition("todos", Idle).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidStatusTransition {
                collection: "todos".into(),
                from: "ready".into(),
                to: "idle".into(),
            }
        );
        assert_eq!(err.to_string(), "collection `todos` cannot move from ready to idle");
    }
}
