//! Core type definitions for conversion jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a conversion job.
///
/// The only legal edges are `CREATED -> CONVERTING -> {SUCCESSFUL | FAILED}`.
/// `SUCCESSFUL` and `FAILED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Persisted, not yet handed to a converter.
    Created,
    /// A converter process has been (or is about to be) started.
    Converting,
    /// The output artifact is available.
    Successful,
    /// The conversion failed; see the failure reason.
    Failed,
}

impl JobState {
    /// All states, in lifecycle order.
    pub const ALL: [JobState; 4] = [
        JobState::Created,
        JobState::Converting,
        JobState::Successful,
        JobState::Failed,
    ];

    /// Whether no further transitions can happen from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the job state machine.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Converting)
                | (Self::Converting, Self::Successful)
                | (Self::Converting, Self::Failed)
        )
    }

    /// Upper-case name used on the wire and in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Converting => "CONVERTING",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "CONVERTING" => Ok(Self::Converting),
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Converting.is_terminal());
        assert!(JobState::Successful.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_only_forward_edges_are_legal() {
        let legal = [
            (JobState::Created, JobState::Converting),
            (JobState::Converting, JobState::Successful),
            (JobState::Converting, JobState::Failed),
        ];

        for from in JobState::ALL {
            for to in JobState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_state_round_trip_names() {
        for state in JobState::ALL {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert_eq!("converting".parse::<JobState>().unwrap(), JobState::Converting);
        assert!("queued".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serde_uses_upper_case() {
        let json = serde_json::to_string(&JobState::Successful).unwrap();
        assert_eq!(json, "\"SUCCESSFUL\"");
    }
}
