//! Purchase FSM State Definitions
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use serde::Serialize;
use std::fmt;

/// Transaction status
///
/// ```text
/// PENDING ──┬──▶ SETTLED
///           ├──▶ FAILED
///           └──▶ EXPIRED
/// ```
///
/// Terminal states are sticky: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TransactionStatus {
    /// Created, waiting for a confirmation signal
    Pending = 0,

    /// Terminal: payment confirmed, grant applied or pending-apply
    Settled = 10,

    /// Terminal: provider rejected or amount mismatched
    Failed = -10,

    /// Terminal: TTL elapsed before confirmation
    Expired = -20,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only `Pending` may move, and only to a terminal state
    #[inline]
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == TransactionStatus::Pending && next.is_terminal()
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            10 => Some(TransactionStatus::Settled),
            -10 => Some(TransactionStatus::Failed),
            -20 => Some(TransactionStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Settled => "settled",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

/// Grant progress of a settled transaction
///
/// `PendingApply` is set in the same atomic step as `SETTLED`; the grant
/// service moves it to `Applied` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum GrantState {
    /// Nothing to grant (pending, failed or expired)
    None = 0,
    PendingApply = 1,
    Applied = 2,
}

impl GrantState {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(GrantState::None),
            1 => Some(GrantState::PendingApply),
            2 => Some(GrantState::Applied),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantState::None => "none",
            GrantState::PendingApply => "pending_apply",
            GrantState::Applied => "applied",
        }
    }
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
