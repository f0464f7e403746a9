//! Ride Escrow - ride lifecycle and fare settlement
//!
//! [`RideEscrow`] owns the ride store and drives every status transition.
//! Each state-changing operation holds the store lock for its whole
//! duration, including the token ledger call, so operations are applied
//! one at a time in a total order. State is written back only after the
//! token movement succeeds.

use crate::{
    amount::TokenAmount,
    error::EscrowError,
    models::{Address, FeePercentage, Ride, RideEvent, RideEventKind, RideId, RideStatus, Settlement},
    token::TokenLedger,
    EscrowResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Who may cancel a ride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Any caller may cancel an open ride
    #[default]
    Anyone,
    /// Only the ride owner, its passenger or the admin
    Participants,
}

/// Configuration for the ride escrow
#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// Escrow owner, allowed to withdraw and change the fee
    pub admin: Address,
    /// Fee applied to rides completed from now on
    pub fee_percentage: FeePercentage,
    /// Cancellation rights
    pub cancel_policy: CancelPolicy,
    /// Largest fare a ride may be created with
    pub max_fare: TokenAmount,
}

impl EscrowConfig {
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            fee_percentage: FeePercentage::default(),
            cancel_policy: CancelPolicy::default(),
            max_fare: TokenAmount::from_tokens(1_000_000),
        }
    }
}

#[derive(Debug)]
struct EscrowState {
    rides: BTreeMap<RideId, Ride>,
    next_id: u64,
    fee_percentage: FeePercentage,
    accrued_fees: TokenAmount,
    events: Vec<RideEvent>,
}

impl EscrowState {
    fn ride(&self, ride_id: RideId) -> EscrowResult<&Ride> {
        self.rides.get(&ride_id).ok_or(EscrowError::NotFound(ride_id))
    }

    fn escrowed_total(&self) -> EscrowResult<TokenAmount> {
        self.rides
            .values()
            .try_fold(TokenAmount::ZERO, |total, ride| total.checked_add(ride.escrowed()))
    }
}

/// Ledger of ride escrows
pub struct RideEscrow {
    config: EscrowConfig,
    ledger: Arc<dyn TokenLedger>,
    state: Mutex<EscrowState>,
}

impl RideEscrow {
    /// Create a new ride escrow settling through `ledger`
    pub fn new(config: EscrowConfig, ledger: Arc<dyn TokenLedger>) -> Self {
        info!(
            "Initializing ride escrow (admin: {}, fee: {}%, escrow account: {})",
            config.admin,
            config.fee_percentage.value(),
            ledger.escrow_account()
        );

        let state = EscrowState {
            rides: BTreeMap::new(),
            next_id: 1,
            fee_percentage: config.fee_percentage,
            accrued_fees: TokenAmount::ZERO,
            events: Vec::new(),
        };

        Self {
            config,
            ledger,
            state: Mutex::new(state),
        }
    }

    /// Offer a new ride; the caller becomes its owner
    pub async fn create_ride(&self, caller: &Address, fare: TokenAmount) -> EscrowResult<Ride> {
        if fare.is_zero() {
            return Err(EscrowError::invalid_input("Fare must be greater than 0"));
        }
        if fare > self.config.max_fare {
            return Err(EscrowError::invalid_input(format!(
                "Fare {} exceeds maximum {}",
                fare, self.config.max_fare
            )));
        }

        let mut state = self.state.lock().await;
        let ride = Ride::new(RideId(state.next_id), fare, caller.clone());
        state.next_id += 1;
        state.rides.insert(ride.id, ride.clone());
        state.events.push(
            RideEvent::new(RideEventKind::RideCreated, caller.clone())
                .for_ride(&ride)
                .with_amount(fare),
        );

        info!("Created ride {} (owner: {}, fare: {})", ride.id, caller, fare);

        Ok(ride)
    }

    /// Join an open ride as its passenger, escrowing the fare
    pub async fn join_ride(&self, caller: &Address, ride_id: RideId) -> EscrowResult<Ride> {
        let mut state = self.state.lock().await;
        let mut ride = state.ride(ride_id)?.clone();
        ride.validate_transition(RideStatus::Joined, "join_ride")?;

        if let Err(e) = self.ledger.collect(caller, ride.fare).await {
            warn!("Could not collect fare for ride {} from {}: {}", ride_id, caller, e);
            return Err(e);
        }

        let now = Utc::now();
        ride.passenger = Some(caller.clone());
        ride.status = RideStatus::Joined;
        ride.joined_at = Some(now);
        ride.updated_at = now;

        state.rides.insert(ride_id, ride.clone());
        state.events.push(
            RideEvent::new(RideEventKind::RideJoined, caller.clone())
                .for_ride(&ride)
                .with_amount(ride.fare),
        );

        info!("Passenger {} joined ride {}", caller, ride_id);

        Ok(ride)
    }

    /// Settle a joined ride: the owner is paid the fare minus the fee
    pub async fn complete_ride(&self, caller: &Address, ride_id: RideId) -> EscrowResult<Settlement> {
        let mut state = self.state.lock().await;
        let mut ride = state.ride(ride_id)?.clone();

        if &ride.owner != caller {
            warn!("{} tried to complete ride {} owned by {}", caller, ride_id, ride.owner);
            return Err(EscrowError::unauthorized("Only the ride owner can complete a ride"));
        }
        ride.validate_transition(RideStatus::Completed, "complete_ride")?;

        let fee_percentage = state.fee_percentage;
        let (fee, payment) = fee_percentage.split(ride.fare)?;
        let accrued_fees = state.accrued_fees.checked_add(fee)?;

        if !payment.is_zero() {
            if let Err(e) = self.ledger.transfer(&ride.owner, payment).await {
                warn!("Payment for ride {} failed: {}", ride_id, e);
                return Err(e);
            }
        }

        let now = Utc::now();
        ride.status = RideStatus::Completed;
        ride.settled_at = Some(now);
        ride.updated_at = now;

        state.accrued_fees = accrued_fees;
        state.rides.insert(ride_id, ride.clone());
        state.events.push(
            RideEvent::new(RideEventKind::RideCompleted, caller.clone())
                .for_ride(&ride)
                .with_amount(payment)
                .with_metadata(serde_json::json!({
                    "fare": ride.fare,
                    "fee": fee,
                    "fee_percentage": fee_percentage.value(),
                })),
        );

        info!(
            "Completed ride {}: paid {} to {}, retained fee {}",
            ride_id, payment, ride.owner, fee
        );

        Ok(Settlement {
            ride_id,
            fare: ride.fare,
            fee,
            payment,
        })
    }

    /// Call off an open ride, refunding any escrowed fare to the passenger
    pub async fn cancel_ride(&self, caller: &Address, ride_id: RideId) -> EscrowResult<Ride> {
        let mut state = self.state.lock().await;
        let mut ride = state.ride(ride_id)?.clone();

        if self.config.cancel_policy == CancelPolicy::Participants
            && !ride.involves(caller)
            && caller != &self.config.admin
        {
            warn!("{} tried to cancel ride {} without taking part in it", caller, ride_id);
            return Err(EscrowError::unauthorized(
                "Only ride participants or the admin can cancel a ride",
            ));
        }
        ride.validate_transition(RideStatus::Canceled, "cancel_ride")?;

        let refund = ride.escrowed();
        if let (Some(passenger), false) = (ride.passenger.as_ref(), refund.is_zero()) {
            if let Err(e) = self.ledger.transfer(passenger, refund).await {
                warn!("Refund for ride {} failed: {}", ride_id, e);
                return Err(e);
            }
        }

        let now = Utc::now();
        ride.status = RideStatus::Canceled;
        ride.settled_at = Some(now);
        ride.updated_at = now;

        state.rides.insert(ride_id, ride.clone());
        state.events.push(
            RideEvent::new(RideEventKind::RideCanceled, caller.clone())
                .for_ride(&ride)
                .with_amount(refund),
        );

        info!("Canceled ride {} (refunded {})", ride_id, refund);

        Ok(ride)
    }

    /// Pay `amount` out of the escrow account to the admin
    ///
    /// Fares held for joined rides are never withdrawable.
    pub async fn withdraw_payment(&self, caller: &Address, amount: TokenAmount) -> EscrowResult<()> {
        self.require_admin(caller, "withdraw_payment")?;
        if amount.is_zero() {
            return Err(EscrowError::invalid_input("Withdrawal amount must be greater than 0"));
        }

        let mut state = self.state.lock().await;
        let withdrawable = self.withdrawable_in(&state).await?;
        if amount > withdrawable {
            return Err(EscrowError::invalid_input(format!(
                "Withdrawal {} exceeds withdrawable balance {}",
                amount, withdrawable
            )));
        }

        if let Err(e) = self.ledger.transfer(&self.config.admin, amount).await {
            warn!("Withdrawal of {} failed: {}", amount, e);
            return Err(e);
        }

        state.accrued_fees = state.accrued_fees.saturating_sub(amount);
        state.events.push(
            RideEvent::new(RideEventKind::TreasuryWithdrawn, caller.clone()).with_amount(amount),
        );

        info!("Withdrew {} to {}", amount, self.config.admin);

        Ok(())
    }

    /// Change the fee taken from rides completed after this call
    pub async fn update_fee_percentage(
        &self,
        caller: &Address,
        new_percentage: u8,
    ) -> EscrowResult<FeePercentage> {
        self.require_admin(caller, "update_fee_percentage")?;
        let fee_percentage = FeePercentage::new(new_percentage)?;

        let mut state = self.state.lock().await;
        let previous = state.fee_percentage;
        state.fee_percentage = fee_percentage;
        state.events.push(
            RideEvent::new(RideEventKind::FeeUpdated, caller.clone()).with_metadata(serde_json::json!({
                "previous": previous.value(),
                "current": fee_percentage.value(),
            })),
        );

        info!(
            "Fee percentage updated: {}% -> {}%",
            previous.value(),
            fee_percentage.value()
        );

        Ok(fee_percentage)
    }

    /// Current status of a ride
    pub async fn get_ride_status(&self, ride_id: RideId) -> EscrowResult<RideStatus> {
        let state = self.state.lock().await;
        let status = state.ride(ride_id)?.status;
        debug!("Ride {} status: {:?}", ride_id, status);
        Ok(status)
    }

    /// Full ride record
    pub async fn get_ride(&self, ride_id: RideId) -> EscrowResult<Ride> {
        self.state.lock().await.ride(ride_id).cloned()
    }

    /// Fee percentage applied to the next completion
    pub async fn fee_percentage(&self) -> FeePercentage {
        self.state.lock().await.fee_percentage
    }

    /// All rides owned or joined by `address`, in id order
    pub async fn rides_for(&self, address: &Address) -> Vec<Ride> {
        self.state
            .lock()
            .await
            .rides
            .values()
            .filter(|ride| ride.involves(address))
            .cloned()
            .collect()
    }

    /// All rides in id order
    pub async fn rides(&self) -> Vec<Ride> {
        self.state.lock().await.rides.values().cloned().collect()
    }

    /// Audit events for one ride
    pub async fn ride_events(&self, ride_id: RideId) -> EscrowResult<Vec<RideEvent>> {
        let state = self.state.lock().await;
        state.ride(ride_id)?;
        let events = state
            .events
            .iter()
            .filter(|event| event.ride_id == Some(ride_id))
            .cloned()
            .collect();
        Ok(events)
    }

    /// Full audit trail in the order operations were applied
    pub async fn events(&self) -> Vec<RideEvent> {
        self.state.lock().await.events.clone()
    }

    /// Fares currently held for joined rides
    pub async fn escrowed_total(&self) -> EscrowResult<TokenAmount> {
        self.state.lock().await.escrowed_total()
    }

    /// Fees retained since the last withdrawals
    pub async fn accrued_fees(&self) -> TokenAmount {
        self.state.lock().await.accrued_fees
    }

    /// Escrow account balance not backing any joined ride
    pub async fn withdrawable(&self) -> EscrowResult<TokenAmount> {
        let state = self.state.lock().await;
        let withdrawable = self.withdrawable_in(&state).await?;
        Ok(withdrawable)
    }

    /// Identity allowed to withdraw and change the fee
    pub fn admin(&self) -> &Address {
        &self.config.admin
    }

    /// Configuration the escrow was created with
    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    async fn withdrawable_in(&self, state: &EscrowState) -> EscrowResult<TokenAmount> {
        let balance = self.ledger.balance_of(self.ledger.escrow_account()).await?;
        Ok(balance.saturating_sub(state.escrowed_total()?))
    }

    fn require_admin(&self, caller: &Address, operation: &str) -> EscrowResult<()> {
        if caller != &self.config.admin {
            warn!("{} is not allowed to call {}", caller, operation);
            return Err(EscrowError::unauthorized(format!(
                "Only the admin can call {}",
                operation
            )));
        }
        Ok(())
    }
}
