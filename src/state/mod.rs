//! Live state of monitored hosts and services, and the derived overall state.
//!
//! Every entity publishes an `overall_state_id` on a shared 0-4 scale:
//! 0 no problem, 1 acknowledged problem, 2 downtimed problem,
//! 3 non-critical problem, 4 critical problem.

mod engine;

pub use engine::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a textual state does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseStateError {
    pub kind: &'static str,
    pub value: String,
}

/// Kind of monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Host,
    Service,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Host => f.write_str("host"),
            EntityKind::Service => f.write_str("service"),
        }
    }
}

/// Severity published on every entity.
///
/// Variants are declared in ascending severity so `Ord` gives the
/// aggregation order used for hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OverallState {
    Ok = 0,
    Acknowledged = 1,
    Downtimed = 2,
    Problem = 3,
    Critical = 4,
}

impl OverallState {
    /// Code stored as `overall_state_id`.
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(OverallState::Ok),
            1 => Some(OverallState::Acknowledged),
            2 => Some(OverallState::Downtimed),
            3 => Some(OverallState::Problem),
            4 => Some(OverallState::Critical),
            _ => None,
        }
    }

    /// Apply acknowledgement and downtime suppression to a problem class.
    ///
    /// Acknowledgement is checked first, so an entity that is both
    /// acknowledged and downtimed reports `Acknowledged`.
    pub fn suppressed(class: Option<OverallState>, acknowledged: bool, downtimed: bool) -> Self {
        match class {
            None => OverallState::Ok,
            Some(_) if acknowledged => OverallState::Acknowledged,
            Some(_) if downtimed => OverallState::Downtimed,
            Some(class) => class,
        }
    }
}

/// Confirmation level of a check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateType {
    Soft,
    Hard,
}

impl StateType {
    pub fn as_str(self) -> &'static str {
        match self {
            StateType::Soft => "SOFT",
            StateType::Hard => "HARD",
        }
    }
}

impl FromStr for StateType {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SOFT" => Ok(StateType::Soft),
            "HARD" => Ok(StateType::Hard),
            other => Err(ParseStateError {
                kind: "state type",
                value: other.to_string(),
            }),
        }
    }
}

/// A check state that can be classified into a problem severity.
pub trait CheckState: Copy + Eq + FromStr<Err = ParseStateError> {
    /// `None` when the state is not a problem, otherwise the unsuppressed
    /// severity class (`Problem` or `Critical`).
    fn problem_class(self) -> Option<OverallState>;

    fn as_str(self) -> &'static str;
}

/// Service check state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceState {
    Ok,
    Warning,
    Critical,
    Unknown,
    /// Set by the monitoring layer when the owning host is down or unreachable.
    Unreachable,
}

impl CheckState for ServiceState {
    fn problem_class(self) -> Option<OverallState> {
        match self {
            ServiceState::Ok => None,
            ServiceState::Warning | ServiceState::Unknown => Some(OverallState::Problem),
            ServiceState::Critical | ServiceState::Unreachable => Some(OverallState::Critical),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ServiceState::Ok => "OK",
            ServiceState::Warning => "WARNING",
            ServiceState::Critical => "CRITICAL",
            ServiceState::Unknown => "UNKNOWN",
            ServiceState::Unreachable => "UNREACHABLE",
        }
    }
}

impl FromStr for ServiceState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(ServiceState::Ok),
            "WARNING" => Ok(ServiceState::Warning),
            "CRITICAL" => Ok(ServiceState::Critical),
            "UNKNOWN" => Ok(ServiceState::Unknown),
            "UNREACHABLE" => Ok(ServiceState::Unreachable),
            other => Err(ParseStateError {
                kind: "service state",
                value: other.to_string(),
            }),
        }
    }
}

/// Host check state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostState {
    Up,
    Down,
    Unreachable,
}

impl CheckState for HostState {
    fn problem_class(self) -> Option<OverallState> {
        match self {
            HostState::Up => None,
            HostState::Unreachable => Some(OverallState::Problem),
            HostState::Down => Some(OverallState::Critical),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            HostState::Up => "UP",
            HostState::Down => "DOWN",
            HostState::Unreachable => "UNREACHABLE",
        }
    }
}

impl FromStr for HostState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(HostState::Up),
            "DOWN" => Ok(HostState::Down),
            "UNREACHABLE" => Ok(HostState::Unreachable),
            other => Err(ParseStateError {
                kind: "host state",
                value: other.to_string(),
            }),
        }
    }
}

/// Persisted live state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState<S> {
    pub state: S,
    pub state_type: StateType,
    pub acknowledged: bool,
    pub downtimed: bool,
    /// State carried by the most recent HARD update.
    pub last_hard_state: S,
}

impl<S: CheckState> LiveState<S> {
    /// Live state of an entity that has never been checked.
    pub fn initial(state: S) -> Self {
        Self {
            state,
            state_type: StateType::Hard,
            acknowledged: false,
            downtimed: false,
            last_hard_state: state,
        }
    }

    /// The entity's own overall state, ignoring anything it aggregates.
    pub fn overall_state(&self) -> OverallState {
        OverallState::suppressed(
            self.last_hard_state.problem_class(),
            self.acknowledged,
            self.downtimed,
        )
    }

    /// Merge an update into this live state.
    ///
    /// Fails when the update does not say whether it is SOFT or HARD.
    pub fn apply(&self, update: &LiveStateUpdate<S>) -> Result<LiveState<S>, String> {
        let state_type = update
            .state_type
            .ok_or_else(|| "missing field 'state_type'".to_string())?;
        let state = update.state.unwrap_or(self.state);

        Ok(LiveState {
            state,
            state_type,
            acknowledged: update.acknowledged.unwrap_or(self.acknowledged),
            downtimed: update.downtimed.unwrap_or(self.downtimed),
            last_hard_state: match state_type {
                StateType::Hard => state,
                StateType::Soft => self.last_hard_state,
            },
        })
    }
}

/// Changed live-state fields carried by an update. Absent fields keep
/// their stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStateUpdate<S> {
    pub state: Option<S>,
    pub state_type: Option<StateType>,
    pub acknowledged: Option<bool>,
    pub downtimed: Option<bool>,
}

impl<S> Default for LiveStateUpdate<S> {
    fn default() -> Self {
        Self {
            state: None,
            state_type: None,
            acknowledged: None,
            downtimed: None,
        }
    }
}

#[cfg(test)]
impl<S> LiveStateUpdate<S> {
    /// A HARD update to the given state.
    pub fn hard(state: S) -> Self {
        Self {
            state: Some(state),
            state_type: Some(StateType::Hard),
            ..Default::default()
        }
    }

    /// A SOFT update to the given state.
    pub fn soft(state: S) -> Self {
        Self {
            state: Some(state),
            state_type: Some(StateType::Soft),
            ..Default::default()
        }
    }

    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = Some(acknowledged);
        self
    }

    pub fn downtimed(mut self, downtimed: bool) -> Self {
        self.downtimed = Some(downtimed);
        self
    }
}

/// Host overall state: the most severe of its own state and the last
/// known codes of its services.
pub fn aggregate_host_state<I>(own: OverallState, services: I) -> OverallState
where
    I: IntoIterator<Item = OverallState>,
{
    services.into_iter().fold(own, Ord::max)
}
