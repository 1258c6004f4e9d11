//! User balance ledger.
//!
//! Balances live behind the [`LedgerStore`] trait so durable storage can be
//! swapped in without touching the pipeline. The credit and debit
//! operations are the atomicity boundary: the sufficiency check and the
//! debit execute as one conditional update under the store's per-user
//! entry lock, so concurrent withdrawals for the same user can never
//! jointly overdraw. Balance never goes below zero; an operation that
//! would drive it negative is rejected before being applied.

use crate::errors::{DicepayResult, ValidationError};
use crate::games::types::GameType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type UserId = u64;

/// Per-user account state: balance plus profile counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub balance: Decimal,
    pub games_played: u64,
    pub even_odd_games: u64,
    pub higher_lower_games: u64,
    pub bowling_games: u64,
    pub registered_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            games_played: 0,
            even_odd_games: 0,
            higher_lower_games: 0,
            bowling_games: 0,
            registered_at: Utc::now(),
        }
    }
}

/// Storage boundary for user accounts
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> DicepayResult<Option<UserAccount>>;

    async fn upsert(&self, account: UserAccount) -> DicepayResult<()>;

    /// Durability checkpoint; a no-op for the in-memory store
    async fn flush(&self) -> DicepayResult<()>;

    /// Atomically add `amount` to the balance, creating the account on
    /// first contact. Returns the new balance.
    async fn credit(&self, user_id: UserId, amount: Decimal) -> DicepayResult<Decimal>;

    /// Atomically debit `amount` if the balance covers it, otherwise fail
    /// with `InsufficientFunds` and change nothing. Returns the new balance.
    async fn try_debit(&self, user_id: UserId, amount: Decimal) -> DicepayResult<Decimal>;

    /// Bump the played-games counters after a settled wager
    async fn record_game(&self, user_id: UserId, game: GameType) -> DicepayResult<()>;
}

/// Sharded in-memory ledger. The map's per-key entry lock is what makes
/// credit/try_debit safe against concurrent callers for the same user.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: DashMap<UserId, UserAccount>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get(&self, user_id: UserId) -> DicepayResult<Option<UserAccount>> {
        Ok(self.accounts.get(&user_id).map(|entry| entry.clone()))
    }

    async fn upsert(&self, account: UserAccount) -> DicepayResult<()> {
        self.accounts.insert(account.user_id, account);
        Ok(())
    }

    async fn flush(&self) -> DicepayResult<()> {
        Ok(())
    }

    async fn credit(&self, user_id: UserId, amount: Decimal) -> DicepayResult<Decimal> {
        let mut entry = self
            .accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id));
        entry.balance += amount;
        let balance = entry.balance;
        drop(entry);

        info!("credited {} to user {}, balance now {}", amount, user_id, balance);
        Ok(balance)
    }

    async fn try_debit(&self, user_id: UserId, amount: Decimal) -> DicepayResult<Decimal> {
        let Some(mut entry) = self.accounts.get_mut(&user_id) else {
            return Err(ValidationError::InsufficientFunds {
                available: Decimal::ZERO,
                requested: amount,
            }
            .into());
        };

        if entry.balance < amount {
            let available = entry.balance;
            drop(entry);
            return Err(ValidationError::InsufficientFunds {
                available,
                requested: amount,
            }
            .into());
        }

        entry.balance -= amount;
        let balance = entry.balance;
        drop(entry);

        info!("debited {} from user {}, balance now {}", amount, user_id, balance);
        Ok(balance)
    }

    async fn record_game(&self, user_id: UserId, game: GameType) -> DicepayResult<()> {
        let mut entry = self
            .accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id));
        entry.games_played += 1;
        match game {
            GameType::EvenOdd => entry.even_odd_games += 1,
            GameType::HigherLower => entry.higher_lower_games += 1,
            GameType::Bowling => entry.bowling_games += 1,
        }
        Ok(())
    }
}
