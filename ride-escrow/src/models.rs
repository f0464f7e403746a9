//! Core data models for the ride escrow
//!
//! Ride records, the ride status state machine, fee percentages and
//! the audit events emitted by every state change.

use crate::{amount::TokenAmount, error::EscrowError, EscrowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ride identifier, allocated sequentially from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(pub u64);

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque caller identity supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new<S: Into<String>>(value: S) -> EscrowResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EscrowError::invalid_input("Address cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ride state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RideStatus {
    /// Offered by its owner, no passenger yet
    Created,
    /// A passenger joined and the fare is held in escrow
    Joined,
    /// Fare settled to the owner minus the platform fee
    Completed,
    /// Ride called off, any escrowed fare returned to the passenger
    Canceled,
}

impl RideStatus {
    /// Numeric status code as reported by the on-chain ledger
    pub fn code(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Joined => 1,
            Self::Completed => 2,
            Self::Canceled => 3,
        }
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    pub fn can_join(&self) -> bool {
        matches!(self, Self::Created)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, Self::Joined)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Created | Self::Joined)
    }
}

/// Platform cut taken from the fare at completion, in whole percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FeePercentage(u8);

impl FeePercentage {
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> EscrowResult<Self> {
        if value > Self::MAX {
            return Err(EscrowError::invalid_input(format!(
                "Fee percentage {} is outside 0-{}",
                value,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Split `fare` into `(fee, payment)`; the fee truncates toward zero
    pub fn split(&self, fare: TokenAmount) -> EscrowResult<(TokenAmount, TokenAmount)> {
        let fee = fare.mul_div(self.0 as u128, Self::MAX as u128)?;
        let payment = fare.checked_sub(fee)?;
        Ok((fee, payment))
    }
}

impl Default for FeePercentage {
    fn default() -> Self {
        Self(10)
    }
}

impl TryFrom<u8> for FeePercentage {
    type Error = EscrowError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FeePercentage> for u8 {
    fn from(value: FeePercentage) -> Self {
        value.0
    }
}

/// A single ride escrow record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub fare: TokenAmount,
    pub status: RideStatus,

    // Parties
    pub owner: Address,
    pub passenger: Option<Address>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Ride {
    /// Create a new ride in the `Created` state
    pub fn new(id: RideId, fare: TokenAmount, owner: Address) -> Self {
        let now = Utc::now();
        Self {
            id,
            fare,
            status: RideStatus::Created,
            owner,
            passenger: None,
            created_at: now,
            updated_at: now,
            joined_at: None,
            settled_at: None,
        }
    }

    /// Validate a state transition
    pub fn validate_transition(&self, to: RideStatus, operation: &'static str) -> EscrowResult<()> {
        let valid = match (self.status, to) {
            (RideStatus::Created, RideStatus::Joined) => true,
            (RideStatus::Created, RideStatus::Canceled) => true,
            (RideStatus::Joined, RideStatus::Completed) => true,
            (RideStatus::Joined, RideStatus::Canceled) => true,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(EscrowError::invalid_state(self.id, self.status, operation))
        }
    }

    /// Whether `address` is the owner or the passenger of this ride
    pub fn involves(&self, address: &Address) -> bool {
        &self.owner == address || self.passenger.as_ref() == Some(address)
    }

    /// Fare currently held in escrow for this ride
    pub fn escrowed(&self) -> TokenAmount {
        if self.status == RideStatus::Joined {
            self.fare
        } else {
            TokenAmount::ZERO
        }
    }
}

/// Outcome of completing a ride
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub ride_id: RideId,
    pub fare: TokenAmount,
    pub fee: TokenAmount,
    pub payment: TokenAmount,
}

/// Kinds of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RideEventKind {
    #[serde(rename = "ride.created")]
    RideCreated,
    #[serde(rename = "ride.joined")]
    RideJoined,
    #[serde(rename = "ride.completed")]
    RideCompleted,
    #[serde(rename = "ride.canceled")]
    RideCanceled,
    #[serde(rename = "treasury.withdrawn")]
    TreasuryWithdrawn,
    #[serde(rename = "fee.updated")]
    FeeUpdated,
}

/// Escrow event for audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideEvent {
    pub id: Uuid,
    pub kind: RideEventKind,
    pub ride_id: Option<RideId>,
    pub actor: Address,
    pub amount: Option<TokenAmount>,
    pub status: Option<RideStatus>,
    pub metadata: Option<serde_json::Value>,

    // Timestamp (immutable)
    pub created_at: DateTime<Utc>,
}

impl RideEvent {
    pub fn new(kind: RideEventKind, actor: Address) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            ride_id: None,
            actor,
            amount: None,
            status: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_ride(mut self, ride: &Ride) -> Self {
        self.ride_id = Some(ride.id);
        self.status = Some(ride.status);
        self
    }

    pub fn with_amount(mut self, amount: TokenAmount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ride() -> Ride {
        Ride::new(
            RideId(1),
            TokenAmount::from_tokens(1),
            Address::new("driver").unwrap(),
        )
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RideStatus::Created.code(), 0);
        assert_eq!(RideStatus::Joined.code(), 1);
        assert_eq!(RideStatus::Completed.code(), 2);
        assert_eq!(RideStatus::Canceled.code(), 3);
    }

    #[test]
    fn test_transitions() {
        let mut ride = ride();
        assert!(ride.validate_transition(RideStatus::Joined, "join_ride").is_ok());
        assert!(ride.validate_transition(RideStatus::Completed, "complete_ride").is_err());

        ride.status = RideStatus::Joined;
        assert!(ride.validate_transition(RideStatus::Completed, "complete_ride").is_ok());
        assert!(ride.validate_transition(RideStatus::Joined, "join_ride").is_err());

        for terminal in [RideStatus::Completed, RideStatus::Canceled] {
            ride.status = terminal;
            assert!(terminal.is_terminal());
            for to in [
                RideStatus::Created,
                RideStatus::Joined,
                RideStatus::Completed,
                RideStatus::Canceled,
            ] {
                assert!(ride.validate_transition(to, "any").is_err());
            }
        }
    }

    #[test]
    fn test_fee_split() {
        let fee = FeePercentage::new(10).unwrap();
        let (cut, payment) = fee.split(TokenAmount::from_tokens(1)).unwrap();
        assert_eq!(cut, TokenAmount::parse_decimal("0.1").unwrap());
        assert_eq!(payment, TokenAmount::parse_decimal("0.9").unwrap());

        let all = FeePercentage::new(100).unwrap();
        let (cut, payment) = all.split(TokenAmount::from_tokens(3)).unwrap();
        assert_eq!(cut, TokenAmount::from_tokens(3));
        assert!(payment.is_zero());
    }

    #[test]
    fn test_fee_percentage_range() {
        assert!(FeePercentage::new(0).is_ok());
        assert!(FeePercentage::new(100).is_ok());
        assert!(matches!(
            FeePercentage::new(150),
            Err(EscrowError::InvalidInput(_))
        ));
        assert!(serde_json::from_str::<FeePercentage>("101").is_err());
    }

    #[test]
    fn test_empty_address_rejected() {
        assert!(Address::new("  ").is_err());
    }

    #[test]
    fn test_escrowed_only_while_joined() {
        let mut ride = ride();
        assert!(ride.escrowed().is_zero());
        ride.status = RideStatus::Joined;
        assert_eq!(ride.escrowed(), ride.fare);
        ride.status = RideStatus::Completed;
        assert!(ride.escrowed().is_zero());
    }
}
