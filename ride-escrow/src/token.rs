//! Token ledger - moves fares, fees and refunds
//!
//! The escrow never holds balances itself. It talks to a fungible token
//! ledger through [`TokenLedger`], bound to the escrow's own account.
//! [`InMemoryTokenLedger`] backs tests and script replay.

use crate::{amount::TokenAmount, error::EscrowError, models::Address, EscrowResult};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Fungible token ledger as seen from the escrow account
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Account that holds escrowed fares and retained fees
    fn escrow_account(&self) -> &Address;

    /// Move `amount` from the escrow account to `to`
    async fn transfer(&self, to: &Address, amount: TokenAmount) -> EscrowResult<()>;

    /// Pull `amount` from `from` into the escrow account
    async fn collect(&self, from: &Address, amount: TokenAmount) -> EscrowResult<()>;

    /// Current balance of `account`
    async fn balance_of(&self, account: &Address) -> EscrowResult<TokenAmount>;
}

/// In-memory token ledger
pub struct InMemoryTokenLedger {
    escrow_account: Address,
    balances: RwLock<HashMap<Address, TokenAmount>>,
    fail_next: AtomicBool,
}

impl InMemoryTokenLedger {
    pub fn new(escrow_account: Address) -> Self {
        Self {
            escrow_account,
            balances: RwLock::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Credit `amount` to `account` out of thin air
    pub async fn mint(&self, account: &Address, amount: TokenAmount) -> EscrowResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(account.clone()).or_default();
        *balance = balance.checked_add(amount)?;
        debug!("Minted {} to {}", amount, account);
        Ok(())
    }

    /// Make the next transfer or collect fail
    pub fn fail_next_transfer(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Snapshot of all non-zero balances
    pub async fn balances(&self) -> HashMap<Address, TokenAmount> {
        self.balances
            .read()
            .await
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(account, amount)| (account.clone(), *amount))
            .collect()
    }

    async fn move_tokens(&self, from: &Address, to: &Address, amount: TokenAmount) -> EscrowResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            warn!("Injected transfer failure: {} -> {} ({})", from, to, amount);
            return Err(EscrowError::transfer("Token ledger rejected the transfer"));
        }

        let mut balances = self.balances.write().await;
        let available = balances.get(from).copied().unwrap_or_default();
        if available < amount {
            return Err(EscrowError::transfer(format!(
                "Insufficient balance for {}: has {}, needs {}",
                from, available, amount
            )));
        }
        if from == to {
            return Ok(());
        }

        let credited = balances
            .get(to)
            .copied()
            .unwrap_or_default()
            .checked_add(amount)
            .map_err(|_| EscrowError::transfer(format!("Balance overflow for {}", to)))?;

        balances.insert(from.clone(), available.saturating_sub(amount));
        balances.insert(to.clone(), credited);

        debug!("Moved {} from {} to {}", amount, from, to);
        Ok(())
    }
}

#[async_trait]
impl TokenLedger for InMemoryTokenLedger {
    fn escrow_account(&self) -> &Address {
        &self.escrow_account
    }

    async fn transfer(&self, to: &Address, amount: TokenAmount) -> EscrowResult<()> {
        self.move_tokens(&self.escrow_account, to, amount).await
    }

    async fn collect(&self, from: &Address, amount: TokenAmount) -> EscrowResult<()> {
        self.move_tokens(from, &self.escrow_account, amount).await
    }

    async fn balance_of(&self, account: &Address) -> EscrowResult<TokenAmount> {
        Ok(self
            .balances
            .read()
            .await
            .get(account)
            .copied()
            .unwrap_or_default())
    }
}
