//! Ride-sharing escrow ledger
//!
//! This crate keeps ride records and settles their fares:
//! - rides move Created -> Joined -> Completed, or are Canceled while open
//! - the passenger's fare is escrowed on join through a [`token::TokenLedger`]
//! - completion pays the owner the fare minus the platform fee
//! - cancellation refunds the escrowed fare to the passenger

pub mod amount;
pub mod error;
pub mod escrow;
pub mod models;
pub mod settings;
pub mod token;

pub use error::EscrowError;

pub use amount::TokenAmount;
pub use escrow::{CancelPolicy, EscrowConfig, RideEscrow};
pub use models::{Address, FeePercentage, Ride, RideEvent, RideEventKind, RideId, RideStatus, Settlement};
pub use settings::EscrowSettings;
pub use token::{InMemoryTokenLedger, TokenLedger};

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
