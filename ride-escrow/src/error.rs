//! Error types for the ride escrow
//!
//! Every failed operation returns one of these and leaves the ledger
//! untouched.

use crate::models::{RideId, RideStatus};
use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Ride id unknown to the ledger
    #[error("Ride {0} not found")]
    NotFound(RideId),

    /// Operation attempted while the ride is in the wrong status
    #[error("Invalid state for {operation} on ride {ride_id}: ride is {status:?}")]
    InvalidState {
        ride_id: RideId,
        status: RideStatus,
        operation: &'static str,
    },

    /// Caller lacks the role the operation requires
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Out-of-range or malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Token ledger refused or failed a transfer
    #[error("Transfer failed: {0}")]
    TransferFailure(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscrowError {
    /// Create an invalid state error
    pub fn invalid_state(ride_id: RideId, status: RideStatus, operation: &'static str) -> Self {
        Self::InvalidState {
            ride_id,
            status,
            operation,
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a transfer failure
    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Self::TransferFailure(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Stable name of the error kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidInput(_) => "invalid_input",
            Self::TransferFailure(_) => "transfer_failure",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<config::ConfigError> for EscrowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(EscrowError::NotFound(RideId(7)).kind(), "not_found");
        assert_eq!(
            EscrowError::invalid_state(RideId(1), RideStatus::Completed, "join_ride").kind(),
            "invalid_state"
        );
        assert_eq!(EscrowError::transfer("boom").kind(), "transfer_failure");
    }

    #[test]
    fn test_invalid_state_message() {
        let err = EscrowError::invalid_state(RideId(3), RideStatus::Joined, "join_ride");
        assert_eq!(
            err.to_string(),
            "Invalid state for join_ride on ride 3: ride is Joined"
        );
    }
}
