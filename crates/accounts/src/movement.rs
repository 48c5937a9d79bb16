//! Ledger entries and the arithmetic over them.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bankbook_core::{DomainError, Entity};

/// Movement identifier (stable across the movement's lifetime).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for MovementId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s)
            .map(Self)
            .map_err(|e| DomainError::invalid_id(format!("MovementId: {e}")))
    }
}

/// Direction of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    /// Money leaves the account (subject to the liquidity check).
    Payment,
    /// Money enters the account.
    Deposit,
}

impl MovementKind {
    /// Contribution of `amount` to the ledger balance.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            MovementKind::Deposit => amount,
            MovementKind::Payment => -amount,
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MovementKind::Payment => f.write_str("payment"),
            MovementKind::Deposit => f.write_str("deposit"),
        }
    }
}

/// A single payment or deposit recorded on an account's ledger.
///
/// Everything about a movement is fixed once it is recorded. The only change a
/// ledger accepts afterwards is removing its most recent movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    id: MovementId,
    /// Position on the account's ledger; never reused, even after removals.
    sequence: u64,
    kind: MovementKind,
    amount: Decimal,
    timestamp: DateTime<Utc>,
    /// Account balance right after this movement was applied.
    balance_snapshot: Decimal,
}

impl Movement {
    pub(crate) fn new(
        id: MovementId,
        sequence: u64,
        kind: MovementKind,
        amount: Decimal,
        timestamp: DateTime<Utc>,
        balance_snapshot: Decimal,
    ) -> Self {
        Self {
            id,
            sequence,
            kind,
            amount,
            timestamp,
            balance_snapshot,
        }
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn balance_snapshot(&self) -> Decimal {
        self.balance_snapshot
    }

    /// Signed effect on the ledger balance.
    pub fn effect(&self) -> Decimal {
        self.kind.signed(self.amount)
    }

    /// Ordering key for "most recent": later timestamp first, then later sequence.
    pub fn recency_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// `begin_balance` plus the signed sum of `movements`.
///
/// Order-independent: the same set of movements always yields the same balance.
/// `None` when a partial sum leaves the range of `Decimal`.
pub fn ledger_balance<'a>(
    begin_balance: Decimal,
    movements: impl IntoIterator<Item = &'a Movement>,
) -> Option<Decimal> {
    movements
        .into_iter()
        .try_fold(begin_balance, |balance, m| balance.checked_add(m.effect()))
}

/// The most recent movement by `(timestamp desc, sequence desc)`.
pub fn latest(movements: &[Movement]) -> Option<&Movement> {
    movements.iter().max_by_key(|m| m.recency_key())
}

/// Movements ordered most recent first.
pub fn most_recent_first(movements: &[Movement]) -> Vec<&Movement> {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by(|a, b| b.recency_key().cmp(&a.recency_key()));
    ordered
}
