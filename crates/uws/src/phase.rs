use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The lifecycle state of a job.
///
/// `PENDING → QUEUED → EXECUTING → COMPLETED | ERROR | ABORTED`, with
/// `ARCHIVED` reached from any finished state at destruction time, and
/// `HELD`/`SUSPENDED` as the service-initiated parking states.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionPhase {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Archived,
    Held,
    Suspended,
    Unknown,
}

impl ExecutionPhase {
    /// Terminal phases: parameters are frozen, only the destruction time
    /// may still change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed
                | ExecutionPhase::Error
                | ExecutionPhase::Aborted
                | ExecutionPhase::Archived
        )
    }

    /// Whether the job currently occupies, or is waiting for, an
    /// execution slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Queued | ExecutionPhase::Executing | ExecutionPhase::Suspended
        )
    }

    /// Legal transitions of the phase machine. A no-op transition to the
    /// current phase is always allowed.
    pub fn can_transition_to(self, to: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        if self == to {
            return true;
        }
        match self {
            Pending => matches!(to, Queued | Executing | Aborted | Error | Held),
            Queued => matches!(to, Executing | Aborted | Error | Held),
            Executing => matches!(to, Completed | Error | Aborted | Suspended),
            Suspended => matches!(to, Executing | Aborted | Error),
            Held => matches!(to, Pending | Queued | Executing | Aborted | Error),
            Completed | Error | Aborted => matches!(to, Archived),
            Archived => false,
            // An unknown phase carries no history to constrain.
            Unknown => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::ExecutionPhase::{self, *};

    #[test]
    fn test_wire_names_are_upper_case() {
        assert_eq!(Executing.to_string(), "EXECUTING");
        assert_eq!("aborted".parse::<ExecutionPhase>().unwrap(), Aborted);
    }

    #[test]
    fn test_nominal_path() {
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Archived));
    }

    #[test]
    fn test_no_way_back_from_terminal_phases() {
        for terminal in [Completed, Error, Aborted, Archived] {
            for to in ExecutionPhase::iter() {
                if to == terminal || (to == Archived && terminal != Archived) {
                    continue;
                }
                assert!(
                    !terminal.can_transition_to(to),
                    "{terminal} must not go back to {to}"
                );
            }
        }
    }

    #[test]
    fn test_abort_is_reachable_from_active_phases() {
        for from in [Pending, Queued, Executing, Held, Suspended] {
            assert!(from.can_transition_to(Aborted), "{from}");
        }
    }
}
