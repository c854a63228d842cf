//! Validation state machine.
//!
//! Folds entitlement check results into state transitions. Callers act only
//! on the returned [`Transition`]s, which bounds notification traffic to one
//! message per actual change.

use feedmarket_core::GrantInfo;

/// Entitlement state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationState {
    /// No check has completed yet.
    #[default]
    Unvalidated,
    /// The most recent check granted access.
    Valid,
    /// The most recent check denied access.
    Invalid,
}

impl ValidationState {
    /// Whether data may be uploaded to the peer in this state.
    pub fn allows_upload(&self) -> bool {
        matches!(self, ValidationState::Valid)
    }
}

/// Result of one entitlement check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Granted(Option<GrantInfo>),
    Denied(String),
}

impl From<anyhow::Result<Option<GrantInfo>>> for CheckOutcome {
    fn from(result: anyhow::Result<Option<GrantInfo>>) -> Self {
        match result {
            Ok(info) => CheckOutcome::Granted(info),
            Err(e) => CheckOutcome::Denied(e.to_string()),
        }
    }
}

/// A change of [`ValidationState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Entered `Valid`.
    Granted { info: Option<GrantInfo> },
    /// Entered `Invalid`.
    Denied { reason: String },
}

/// Per-connection validation state with check counters.
#[derive(Debug, Default)]
pub struct ValidationMachine {
    state: ValidationState,
    checks: u64,
    transitions: u64,
}

impl ValidationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// Number of outcomes applied.
    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Number of state changes so far.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Apply a check outcome.
    ///
    /// Returns a transition only when the state changes. Confirming the
    /// current state returns `None`.
    pub fn apply(&mut self, outcome: CheckOutcome) -> Option<Transition> {
        self.checks += 1;

        let transition = match outcome {
            CheckOutcome::Granted(_) if self.state == ValidationState::Valid => None,
            CheckOutcome::Granted(info) => {
                self.state = ValidationState::Valid;
                Some(Transition::Granted { info })
            }
            CheckOutcome::Denied(_) if self.state == ValidationState::Invalid => None,
            CheckOutcome::Denied(reason) => {
                self.state = ValidationState::Invalid;
                Some(Transition::Denied { reason })
            }
        };

        if transition.is_some() {
            self.transitions += 1;
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn granted() -> CheckOutcome {
        CheckOutcome::Granted(None)
    }

    fn denied(reason: &str) -> CheckOutcome {
        CheckOutcome::Denied(reason.to_string())
    }

    #[test]
    fn test_first_outcome_always_transitions() {
        let mut m = ValidationMachine::new();
        assert_eq!(m.state(), ValidationState::Unvalidated);
        assert_eq!(m.apply(granted()), Some(Transition::Granted { info: None }));

        let mut m = ValidationMachine::new();
        assert_eq!(
            m.apply(denied("expired")),
            Some(Transition::Denied {
                reason: "expired".into()
            })
        );
        assert_eq!(m.state(), ValidationState::Invalid);
    }

    #[test]
    fn test_repeat_outcomes_are_silent() {
        let mut m = ValidationMachine::new();
        assert!(m.apply(granted()).is_some());
        assert!(m.apply(granted()).is_none());
        assert!(m.apply(granted()).is_none());
        assert!(m.apply(denied("a")).is_some());
        assert!(m.apply(denied("b")).is_none());
        assert_eq!(m.checks(), 5);
        assert_eq!(m.transitions(), 2);
    }

    #[test]
    fn test_grant_deny_grant_emits_each_change() {
        let mut m = ValidationMachine::new();
        let info = GrantInfo::new().with("plan", "trial");

        let t1 = m.apply(CheckOutcome::Granted(Some(info.clone())));
        let t2 = m.apply(denied("expired"));
        let t3 = m.apply(granted());

        assert_eq!(t1, Some(Transition::Granted { info: Some(info) }));
        assert_eq!(
            t2,
            Some(Transition::Denied {
                reason: "expired".into()
            })
        );
        assert_eq!(t3, Some(Transition::Granted { info: None }));
        assert!(m.state().allows_upload());
    }

    #[test]
    fn test_outcome_from_check_result() {
        let ok: anyhow::Result<Option<GrantInfo>> = Ok(None);
        assert_eq!(CheckOutcome::from(ok), granted());

        let err: anyhow::Result<Option<GrantInfo>> = Err(anyhow::anyhow!("card declined"));
        assert_eq!(CheckOutcome::from(err), denied("card declined"));
    }

    proptest! {
        #[test]
        fn transitions_track_changes_only(outcomes in prop::collection::vec(any::<bool>(), 0..64)) {
            let mut m = ValidationMachine::new();
            let mut previous: Option<bool> = None;
            let mut expected = 0u64;

            for ok in outcomes {
                let outcome = if ok { granted() } else { denied("no") };
                let changed = previous != Some(ok);
                let transition = m.apply(outcome);

                prop_assert_eq!(transition.is_some(), changed);
                prop_assert_eq!(m.state().allows_upload(), ok);
                if changed {
                    expected += 1;
                }
                previous = Some(ok);
            }

            prop_assert_eq!(m.transitions(), expected);
        }
    }
}
