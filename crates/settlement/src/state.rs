//! Progress of a single settlement attempt.

use serde::{Deserialize, Serialize};

/// Where a settlement attempt stands.
///
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──► Failed
/// ```
///
/// Each state has exactly one predecessor, so an attempt can only move
/// forward along the diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SettlementState {
    #[default]
    NotStarted,

    /// Transfers are being applied.
    Running,

    /// A transfer was refused and applied transfers are being undone.
    Compensating,

    /// Every transfer applied. Only completed receipts can be reversed.
    Completed,

    /// Compensation finished after a refused transfer.
    Failed,
}

impl SettlementState {
    /// The state an attempt must be in to enter `self`.
    pub fn predecessor(self) -> Option<SettlementState> {
        match self {
            SettlementState::NotStarted => None,
            SettlementState::Running => Some(SettlementState::NotStarted),
            SettlementState::Compensating | SettlementState::Completed => {
                Some(SettlementState::Running)
            }
            SettlementState::Failed => Some(SettlementState::Compensating),
        }
    }

    pub fn is_reversible(self) -> bool {
        self == SettlementState::Completed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::NotStarted => "NotStarted",
            SettlementState::Running => "Running",
            SettlementState::Compensating => "Compensating",
            SettlementState::Completed => "Completed",
            SettlementState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
