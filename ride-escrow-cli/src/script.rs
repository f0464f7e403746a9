//! Ride scripts: JSON sequences of escrow operations replayed against an
//! in-memory token ledger.

use ride_escrow::{
    Address, EscrowError, EscrowResult, InMemoryTokenLedger, Ride, RideEscrow, RideId, TokenAmount,
    TokenLedger,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Opening balances minted before the first step
    #[serde(default)]
    pub balances: BTreeMap<String, TokenAmount>,
    pub steps: Vec<Step>,
}

/// One scripted operation
///
/// Amounts and percentages stay raw until the step runs, so an invalid
/// value fails that step instead of the whole script.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateRide { caller: String, fare: String },
    JoinRide { caller: String, ride_id: RideId },
    CompleteRide { caller: String, ride_id: RideId },
    CancelRide { caller: String, ride_id: RideId },
    WithdrawPayment { caller: String, amount: String },
    UpdateFeePercentage { caller: String, percentage: u64 },
    GetRideStatus { ride_id: RideId },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateRide { .. } => "create_ride",
            Self::JoinRide { .. } => "join_ride",
            Self::CompleteRide { .. } => "complete_ride",
            Self::CancelRide { .. } => "cancel_ride",
            Self::WithdrawPayment { .. } => "withdraw_payment",
            Self::UpdateFeePercentage { .. } => "update_fee_percentage",
            Self::GetRideStatus { .. } => "get_ride_status",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepError {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub steps: Vec<StepOutcome>,
    pub rides: Vec<Ride>,
    pub balances: BTreeMap<Address, TokenAmount>,
    pub fee_percentage: u8,
    pub accrued_fees: TokenAmount,
}

/// Replay `script`; a failing step is recorded and the replay carries on
pub async fn replay(
    escrow: &RideEscrow,
    ledger: &InMemoryTokenLedger,
    script: Script,
) -> EscrowResult<Report> {
    for (account, amount) in &script.balances {
        ledger.mint(&Address::new(account.clone())?, *amount).await?;
    }

    let mut steps = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.into_iter().enumerate() {
        let op = step.name();
        let outcome = match apply(escrow, step).await {
            Ok(value) => StepOutcome {
                index,
                op,
                value: Some(value),
                error: None,
            },
            Err(e) => {
                warn!("Step {} ({}) failed: {}", index, op, e);
                StepOutcome {
                    index,
                    op,
                    value: None,
                    error: Some(StepError {
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                }
            }
        };
        steps.push(outcome);
    }

    let mut balances: BTreeMap<Address, TokenAmount> = ledger.balances().await.into_iter().collect();
    let escrow_account = ledger.escrow_account().clone();
    if !balances.contains_key(&escrow_account) {
        balances.insert(escrow_account.clone(), ledger.balance_of(&escrow_account).await?);
    }

    info!("Replayed {} steps", steps.len());

    Ok(Report {
        steps,
        rides: escrow.rides().await,
        balances,
        fee_percentage: escrow.fee_percentage().await.value(),
        accrued_fees: escrow.accrued_fees().await,
    })
}

async fn apply(escrow: &RideEscrow, step: Step) -> EscrowResult<Value> {
    let value = match step {
        Step::CreateRide { caller, fare } => {
            let fare = TokenAmount::parse_decimal(&fare)?;
            serde_json::to_value(escrow.create_ride(&Address::new(caller)?, fare).await?)?
        }
        Step::JoinRide { caller, ride_id } => {
            serde_json::to_value(escrow.join_ride(&Address::new(caller)?, ride_id).await?)?
        }
        Step::CompleteRide { caller, ride_id } => {
            serde_json::to_value(escrow.complete_ride(&Address::new(caller)?, ride_id).await?)?
        }
        Step::CancelRide { caller, ride_id } => {
            serde_json::to_value(escrow.cancel_ride(&Address::new(caller)?, ride_id).await?)?
        }
        Step::WithdrawPayment { caller, amount } => {
            let amount = TokenAmount::parse_decimal(&amount)?;
            escrow.withdraw_payment(&Address::new(caller)?, amount).await?;
            json!({ "amount": amount })
        }
        Step::UpdateFeePercentage { caller, percentage } => {
            let percentage = u8::try_from(percentage).map_err(|_| {
                EscrowError::invalid_input(format!(
                    "Fee percentage {} is out of range (0-100)",
                    percentage
                ))
            })?;
            let fee = escrow
                .update_fee_percentage(&Address::new(caller)?, percentage)
                .await?;
            json!({ "fee_percentage": fee.value() })
        }
        Step::GetRideStatus { ride_id } => {
            let status = escrow.get_ride_status(ride_id).await?;
            json!({ "status": status, "code": status.code() })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ride_escrow::EscrowConfig;

    const SCRIPT: &str = r#"{
        "balances": { "passenger": "1" },
        "steps": [
            { "op": "create_ride", "caller": "owner", "fare": "1" },
            { "op": "join_ride", "caller": "passenger", "ride_id": 1 },
            { "op": "join_ride", "caller": "someone", "ride_id": 1 },
            { "op": "complete_ride", "caller": "owner", "ride_id": 1 },
            { "op": "get_ride_status", "ride_id": 1 },
            { "op": "update_fee_percentage", "caller": "owner", "percentage": 150 }
        ]
    }"#;

    fn owner_escrow(ledger: std::sync::Arc<InMemoryTokenLedger>) -> RideEscrow {
        RideEscrow::new(EscrowConfig::new(Address::new("owner").unwrap()), ledger)
    }

    #[tokio::test]
    async fn test_replay_records_each_step() {
        let ledger = std::sync::Arc::new(InMemoryTokenLedger::new(Address::new("escrow").unwrap()));
        let escrow = owner_escrow(ledger.clone());
        let script: Script = serde_json::from_str(SCRIPT).unwrap();

        let report = replay(&escrow, &ledger, script).await.unwrap();

        assert_eq!(report.steps.len(), 6);
        assert!(report.steps[1].error.is_none());
        assert_eq!(report.steps[2].error.as_ref().unwrap().kind, "invalid_state");
        assert_eq!(report.steps[4].value.as_ref().unwrap()["code"], 2);
        assert_eq!(report.steps[5].error.as_ref().unwrap().kind, "invalid_input");

        let owner = Address::new("owner").unwrap();
        assert_eq!(report.balances[&owner], TokenAmount::parse_decimal("0.9").unwrap());
        assert_eq!(report.accrued_fees, TokenAmount::parse_decimal("0.1").unwrap());
        assert_eq!(report.fee_percentage, 10);
    }

    #[tokio::test]
    async fn test_empty_caller_is_a_step_error() {
        let ledger = std::sync::Arc::new(InMemoryTokenLedger::new(Address::new("escrow").unwrap()));
        let escrow = owner_escrow(ledger.clone());
        let script: Script = serde_json::from_str(
            r#"{ "steps": [ { "op": "create_ride", "caller": "", "fare": "1" } ] }"#,
        )
        .unwrap();

        let report = replay(&escrow, &ledger, script).await.unwrap();

        assert_eq!(report.steps[0].error.as_ref().unwrap().kind, "invalid_input");
        assert!(report.rides.is_empty());
    }

    #[tokio::test]
    async fn test_bad_values_fail_only_their_step() {
        let ledger = std::sync::Arc::new(InMemoryTokenLedger::new(Address::new("escrow").unwrap()));
        let escrow = owner_escrow(ledger.clone());
        let script: Script = serde_json::from_str(
            r#"{ "steps": [
                { "op": "create_ride", "caller": "owner", "fare": "-1" },
                { "op": "create_ride", "caller": "owner", "fare": "abc" },
                { "op": "update_fee_percentage", "caller": "owner", "percentage": 300 },
                { "op": "withdraw_payment", "caller": "owner", "amount": "0.0000000000000000001" },
                { "op": "create_ride", "caller": "owner", "fare": "2" }
            ] }"#,
        )
        .unwrap();

        let report = replay(&escrow, &ledger, script).await.unwrap();

        assert_eq!(report.steps.len(), 5);
        for outcome in &report.steps[..4] {
            assert_eq!(outcome.error.as_ref().unwrap().kind, "invalid_input");
        }
        assert!(report.steps[4].error.is_none());
        assert_eq!(report.rides.len(), 1);
        assert_eq!(report.rides[0].fare, TokenAmount::from_tokens(2));
        assert_eq!(report.fee_percentage, 10);
    }
}
