//! Credit accounting collaborator.
//!
//! Balances are checked before a task is created and charged after, so a
//! requester is never charged for a submission that was rejected.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::CreditsConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreditError {
    #[error("Insufficient credits: need {required}, have {available}")]
    Insufficient { required: u64, available: u64 },

    #[error("Credit ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance. `None` means the requester is not metered.
    async fn balance(&self, requester: &str) -> Result<Option<u64>, CreditError>;

    /// Charge `amount`. Returns the remaining balance when metered.
    async fn deduct(&self, requester: &str, amount: u64) -> Result<Option<u64>, CreditError>;

    /// Fail with [`CreditError::Insufficient`] unless `amount` is affordable.
    async fn ensure(&self, requester: &str, amount: u64) -> Result<(), CreditError> {
        match self.balance(requester).await? {
            Some(available) if available < amount => Err(CreditError::Insufficient {
                required: amount,
                available,
            }),
            _ => Ok(()),
        }
    }
}

/// Ledger that never runs out.
#[derive(Debug, Default)]
pub struct UnmeteredLedger;

#[async_trait]
impl CreditLedger for UnmeteredLedger {
    async fn balance(&self, _requester: &str) -> Result<Option<u64>, CreditError> {
        Ok(None)
    }

    async fn deduct(&self, _requester: &str, _amount: u64) -> Result<Option<u64>, CreditError> {
        Ok(None)
    }
}

/// Per-requester balances held in memory. Unknown requesters start with
/// `initial_balance`.
pub struct InMemoryLedger {
    initial_balance: u64,
    balances: RwLock<HashMap<String, u64>>,
}

impl InMemoryLedger {
    pub fn new(initial_balance: u64) -> Self {
        Self {
            initial_balance,
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_balance(&self, requester: &str, balance: u64) {
        self.balances
            .write()
            .await
            .insert(requester.to_string(), balance);
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn balance(&self, requester: &str) -> Result<Option<u64>, CreditError> {
        let balances = self.balances.read().await;
        Ok(Some(
            balances
                .get(requester)
                .copied()
                .unwrap_or(self.initial_balance),
        ))
    }

    async fn deduct(&self, requester: &str, amount: u64) -> Result<Option<u64>, CreditError> {
        let mut balances = self.balances.write().await;
        let balance = balances
            .entry(requester.to_string())
            .or_insert(self.initial_balance);
        if *balance < amount {
            return Err(CreditError::Insufficient {
                required: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(Some(*balance))
    }
}

/// Ledger described by the `[credits]` section.
pub fn ledger_from_config(config: &CreditsConfig) -> Arc<dyn CreditLedger> {
    match config.initial_balance {
        Some(initial) => Arc::new(InMemoryLedger::new(initial)),
        None => Arc::new(UnmeteredLedger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_unmetered_always_affordable() {
        let ledger = UnmeteredLedger;
        assert_ok!(ledger.ensure("anyone", u64::MAX).await);
        assert_eq!(ledger.deduct("anyone", 10).await, Ok(None));
    }

    #[tokio::test]
    async fn test_in_memory_balance_and_deduct() {
        let ledger = InMemoryLedger::new(2);
        assert_eq!(ledger.balance("alice").await, Ok(Some(2)));
        assert_eq!(ledger.deduct("alice", 1).await, Ok(Some(1)));
        assert_eq!(ledger.deduct("alice", 1).await, Ok(Some(0)));
        assert_eq!(
            ledger.ensure("alice", 1).await,
            Err(CreditError::Insufficient {
                required: 1,
                available: 0
            })
        );
        // Balances are per requester.
        assert_ok!(ledger.ensure("bob", 1).await);
    }

    #[tokio::test]
    async fn test_deduct_never_goes_negative() {
        let ledger = InMemoryLedger::new(0);
        ledger.set_balance("alice", 1).await;
        assert_err!(ledger.deduct("alice", 5).await);
        assert_eq!(ledger.balance("alice").await, Ok(Some(1)));
    }

    #[tokio::test]
    async fn test_ledger_from_config() {
        let unmetered = ledger_from_config(&CreditsConfig {
            cost_per_image: 1,
            initial_balance: None,
        });
        assert_eq!(unmetered.balance("x").await, Ok(None));

        let metered = ledger_from_config(&CreditsConfig {
            cost_per_image: 1,
            initial_balance: Some(3),
        });
        assert_eq!(metered.balance("x").await, Ok(Some(3)));
    }
}
